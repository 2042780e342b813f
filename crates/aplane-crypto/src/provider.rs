//! The signature-scheme provider registry.
//!
//! Every key type the daemon can hold — native Ed25519, DSA-backed
//! LogicSigs, parameterized template LogicSigs — is a [`Provider`]. The
//! registry is built once at daemon startup and passed by `Arc` into the
//! store and the dispatcher; nothing registers itself through global state.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::secret::SecretBytes;

/// Creation parameters and runtime arguments arrive as string-keyed string
/// values straight from JSON; providers parse and validate.
pub type ParamMap = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown key type: {0}")]
    UnknownType(String),

    #[error("missing parameter: {0}")]
    MissingParam(&'static str),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParam { name: &'static str, reason: String },

    #[error("missing runtime argument: {0}")]
    MissingArg(&'static str),

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("invalid secret material: {0}")]
    InvalidSecret(String),

    #[error("signing failed: {0}")]
    SignFailed(String),

    #[error("operation not supported by this key type")]
    Unsupported,
}

/// Display classification for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// Plain Ed25519 account keys.
    Native,
    /// LogicSig accounts whose program verifies a DSA signature passed in
    /// the argument vector (slot 0 is reserved for the signature).
    DsaLogicSig,
    /// Parameterized template LogicSigs with no secret at all.
    GenericTemplate,
}

impl KeyFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyFamily::Native => "native",
            KeyFamily::DsaLogicSig => "dsa-logicsig",
            KeyFamily::GenericTemplate => "template",
        }
    }
}

/// How (and whether) a key type round-trips through a word phrase.
/// `words == 0` means the type has no mnemonic form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MnemonicScheme {
    pub words: usize,
    pub wordlist: &'static str,
}

impl MnemonicScheme {
    pub const NONE: MnemonicScheme = MnemonicScheme { words: 0, wordlist: "" };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Uint64,
    Bytes,
    String,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Address => "address",
            ParamType::Uint64 => "uint64",
            ParamType::Bytes => "bytes",
            ParamType::String => "string",
        }
    }
}

/// One named creation parameter (shown by clients when generating a key).
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub ty: ParamType,
    pub required: bool,
    pub example: Option<&'static str>,
}

/// One named runtime argument presented at signing time. The position in
/// the provider's list fixes the argument's index in the final LogicSig
/// argument vector (after any reserved signature slot).
#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub ty: ParamType,
}

/// Freshly generated or imported key material, before the store wraps it in
/// an encrypted record. `teal` is set for providers that compile to a
/// LogicSig; the store sends it to the node and derives the address from
/// the returned bytecode.
pub struct KeyMaterial {
    pub secret: Option<SecretBytes>,
    pub public_key: Vec<u8>,
    pub teal: Option<String>,
}

pub trait Provider: Send + Sync {
    fn type_label(&self) -> &'static str;

    fn family(&self) -> KeyFamily;

    fn mnemonic_scheme(&self) -> MnemonicScheme;

    fn creation_params(&self) -> &'static [ParamSpec];

    fn runtime_args(&self) -> &'static [ArgSpec];

    /// Worst-case signature length in bytes. This is what the reserved
    /// argument slot contributes to the group's LogicSig byte budget.
    /// Zero for schemes that produce no signature.
    fn signature_len(&self) -> usize {
        0
    }

    /// Validate creation parameters without generating anything.
    fn validate_params(&self, params: &ParamMap) -> Result<(), ProviderError>;

    /// Generate fresh key material from the given creation parameters.
    fn generate(&self, params: &ParamMap) -> Result<KeyMaterial, ProviderError>;

    /// Reconstruct key material from a mnemonic phrase.
    fn from_mnemonic(&self, _phrase: &str) -> Result<KeyMaterial, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    /// Produce a signature over `message` with the decrypted secret. Takes
    /// ownership of the secret; the container is wiped on every exit path.
    fn sign(&self, _secret: SecretBytes, _message: &[u8]) -> Result<Vec<u8>, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    /// Build the ordered LogicSig argument vector from an optional
    /// signature (occupying the reserved slot) and the caller-supplied
    /// runtime arguments.
    fn build_args(
        &self,
        _signature: Option<Vec<u8>>,
        _user_args: &ParamMap,
    ) -> Result<Vec<Vec<u8>>, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    /// TEAL source for the provider's LogicSig, parameterized as needed.
    fn teal_source(&self, _params: &ParamMap) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported)
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

pub struct ProviderRegistry {
    providers: BTreeMap<&'static str, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self { providers: BTreeMap::new() }
    }

    /// The standard provider set the daemon ships with.
    pub fn with_default_providers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::ed25519::Ed25519Provider));
        registry.register(Arc::new(crate::falcon::Falcon1024Provider));
        registry.register(Arc::new(crate::templates::TimelockProvider));
        registry.register(Arc::new(crate::templates::HashlockProvider));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.type_label(), provider);
    }

    pub fn get(&self, label: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(label)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownType(label.to_string()))
    }

    pub fn enumerate(&self) -> Vec<&'static str> {
        self.providers.keys().copied().collect()
    }

    pub fn is_generic_template(&self, label: &str) -> bool {
        self.providers
            .get(label)
            .map(|p| p.family() == KeyFamily::GenericTemplate)
            .unwrap_or(false)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Shared param helpers ─────────────────────────────────────────────────────

pub(crate) fn require_param<'a>(
    params: &'a ParamMap,
    name: &'static str,
) -> Result<&'a str, ProviderError> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or(ProviderError::MissingParam(name))
}

pub(crate) fn parse_u64(name: &'static str, value: &str) -> Result<u64, ProviderError> {
    value.parse().map_err(|_| ProviderError::InvalidParam {
        name,
        reason: format!("not an unsigned integer: {value}"),
    })
}
