use pqcrypto_falcon::falcon1024;
use pqcrypto_traits::sign::{DetachedSignature, PublicKey, SecretKey};

use crate::provider::{
    require_param, ArgSpec, KeyFamily, KeyMaterial, MnemonicScheme, ParamMap, ParamSpec, Provider,
    ProviderError,
};
use crate::secret::SecretBytes;

/// Falcon-1024 post-quantum keys, held behind a LogicSig account.
///
/// The account's program embeds the Falcon public key and verifies a
/// detached signature over the transaction id, passed in argument slot 0.
/// The signature is produced off-chain by this provider; the program is
/// compiled once at key-generation time.
pub struct Falcon1024Provider;

pub const TYPE_LABEL: &str = "falcon1024-v1";

fn teal_for_pubkey(public_key: &[u8]) -> String {
    format!(
        "#pragma version 12\n\
         txn TxID\n\
         arg 0\n\
         byte 0x{}\n\
         falcon_verify\n",
        hex::encode(public_key)
    )
}

impl Provider for Falcon1024Provider {
    fn type_label(&self) -> &'static str {
        TYPE_LABEL
    }

    fn family(&self) -> KeyFamily {
        KeyFamily::DsaLogicSig
    }

    // A word phrase over a ~2.3 KiB secret has no usability value; Falcon
    // keys export as raw hex instead.
    fn mnemonic_scheme(&self) -> MnemonicScheme {
        MnemonicScheme::NONE
    }

    fn creation_params(&self) -> &'static [ParamSpec] {
        &[]
    }

    fn runtime_args(&self) -> &'static [ArgSpec] {
        &[]
    }

    fn signature_len(&self) -> usize {
        falcon1024::signature_bytes()
    }

    fn validate_params(&self, _params: &ParamMap) -> Result<(), ProviderError> {
        Ok(())
    }

    fn generate(&self, _params: &ParamMap) -> Result<KeyMaterial, ProviderError> {
        let (pk, sk) = falcon1024::keypair();
        let public_key = pk.as_bytes().to_vec();
        let teal = teal_for_pubkey(&public_key);
        Ok(KeyMaterial {
            secret: Some(SecretBytes::new(sk.as_bytes().to_vec())),
            public_key,
            teal: Some(teal),
        })
    }

    fn sign(&self, secret: SecretBytes, message: &[u8]) -> Result<Vec<u8>, ProviderError> {
        let result = secret.with_bytes(|bytes| {
            let sk = falcon1024::SecretKey::from_bytes(bytes)
                .map_err(|e| ProviderError::InvalidSecret(e.to_string()))?;
            Ok(falcon1024::detached_sign(message, &sk).as_bytes().to_vec())
        });
        drop(secret);
        result
    }

    fn build_args(
        &self,
        signature: Option<Vec<u8>>,
        _user_args: &ParamMap,
    ) -> Result<Vec<Vec<u8>>, ProviderError> {
        let signature = signature.ok_or(ProviderError::MissingArg("signature"))?;
        Ok(vec![signature])
    }

    fn teal_source(&self, params: &ParamMap) -> Result<String, ProviderError> {
        let pk_hex = require_param(params, "public_key")?;
        let public_key = hex::decode(pk_hex).map_err(|e| ProviderError::InvalidParam {
            name: "public_key",
            reason: e.to_string(),
        })?;
        if public_key.len() != falcon1024::public_key_bytes() {
            return Err(ProviderError::InvalidParam {
                name: "public_key",
                reason: format!(
                    "expected {} bytes, got {}",
                    falcon1024::public_key_bytes(),
                    public_key.len()
                ),
            });
        }
        Ok(teal_for_pubkey(&public_key))
    }
}

/// Verify a detached Falcon-1024 signature.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), ProviderError> {
    let pk = falcon1024::PublicKey::from_bytes(public_key)
        .map_err(|e| ProviderError::InvalidSecret(e.to_string()))?;
    let sig = falcon1024::DetachedSignature::from_bytes(signature)
        .map_err(|e| ProviderError::SignFailed(e.to_string()))?;
    falcon1024::verify_detached_signature(&sig, message, &pk)
        .map_err(|_| ProviderError::SignFailed("verification failed".into()))
}
