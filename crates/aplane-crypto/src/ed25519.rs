use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::mnemonic;
use crate::provider::{
    ArgSpec, KeyFamily, KeyMaterial, MnemonicScheme, ParamMap, ParamSpec, Provider, ProviderError,
};
use crate::secret::SecretBytes;

/// Native Ed25519 account keys. The account address is the public key
/// itself; the secret is the 32-byte seed, exportable as a 25-word phrase.
pub struct Ed25519Provider;

pub const TYPE_LABEL: &str = "ed25519";

fn signing_key_from_secret(secret: &SecretBytes) -> Result<SigningKey, ProviderError> {
    secret.with_bytes(|bytes| {
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ProviderError::InvalidSecret(format!("seed length {}", bytes.len())))?;
        Ok(SigningKey::from_bytes(&seed))
    })
}

impl Provider for Ed25519Provider {
    fn type_label(&self) -> &'static str {
        TYPE_LABEL
    }

    fn family(&self) -> KeyFamily {
        KeyFamily::Native
    }

    fn mnemonic_scheme(&self) -> MnemonicScheme {
        MnemonicScheme {
            words: mnemonic::PHRASE_WORDS,
            wordlist: "english",
        }
    }

    fn creation_params(&self) -> &'static [ParamSpec] {
        &[]
    }

    fn runtime_args(&self) -> &'static [ArgSpec] {
        &[]
    }

    fn validate_params(&self, _params: &ParamMap) -> Result<(), ProviderError> {
        Ok(())
    }

    fn generate(&self, _params: &ParamMap) -> Result<KeyMaterial, ProviderError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        Ok(KeyMaterial {
            secret: Some(SecretBytes::new(signing_key.to_bytes().to_vec())),
            public_key: signing_key.verifying_key().to_bytes().to_vec(),
            teal: None,
        })
    }

    fn from_mnemonic(&self, phrase: &str) -> Result<KeyMaterial, ProviderError> {
        let seed = mnemonic::decode(phrase)
            .map_err(|e| ProviderError::InvalidMnemonic(e.to_string()))?;
        let signing_key = SigningKey::from_bytes(&seed);
        Ok(KeyMaterial {
            secret: Some(SecretBytes::new(seed.to_vec())),
            public_key: signing_key.verifying_key().to_bytes().to_vec(),
            teal: None,
        })
    }

    fn sign(&self, secret: SecretBytes, message: &[u8]) -> Result<Vec<u8>, ProviderError> {
        let signing_key = signing_key_from_secret(&secret)?;
        let signature = signing_key.sign(message);
        drop(secret);
        Ok(signature.to_bytes().to_vec())
    }
}

/// Verify a detached Ed25519 signature. Used by tests and by clients that
/// double-check envelopes before submission.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), ProviderError> {
    let pk_bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| ProviderError::InvalidSecret(format!("pubkey length {}", public_key.len())))?;
    let vk = VerifyingKey::from_bytes(&pk_bytes)
        .map_err(|e| ProviderError::InvalidSecret(e.to_string()))?;
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| ProviderError::SignFailed(format!("signature length {}", signature.len())))?;
    vk.verify(message, &ed25519_dalek::Signature::from_bytes(&sig_bytes))
        .map_err(|_| ProviderError::SignFailed("verification failed".into()))
}
