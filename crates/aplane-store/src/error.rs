use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bad passphrase")]
    BadPassphrase,

    #[error("keystore metadata missing at {0}")]
    MetadataMissing(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("signer is locked")]
    Locked,

    #[error("corrupt key record {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("invalid parameters: {0}")]
    BadParams(String),

    #[error("invalid mnemonic: {0}")]
    BadMnemonic(String),

    #[error("TEAL compile failed: {0}")]
    CompileFailed(String),

    #[error("node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("no TEAL compiler endpoint configured")]
    NoCompiler,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for aplane_core::Error {
    fn from(e: StoreError) -> Self {
        use aplane_core::Error;
        match e {
            StoreError::BadPassphrase => Error::forbidden("bad passphrase"),
            StoreError::Locked => Error::forbidden("signer is locked"),
            StoreError::NotFound(addr) => Error::not_found(format!("key not found: {addr}")),
            StoreError::BadParams(m) => Error::bad_request(format!("invalid parameters: {m}")),
            StoreError::BadMnemonic(m) => Error::bad_request(format!("invalid mnemonic: {m}")),
            StoreError::CompileFailed(m) => Error::bad_request(format!("TEAL compile failed: {m}")),
            StoreError::NodeUnreachable(m) => Error::unavailable(format!("node unreachable: {m}")),
            StoreError::NoCompiler => Error::unavailable("no TEAL compiler endpoint configured"),
            other => Error::internal(other.to_string()),
        }
    }
}

impl From<aplane_crypto::ProviderError> for StoreError {
    fn from(e: aplane_crypto::ProviderError) -> Self {
        use aplane_crypto::ProviderError;
        match e {
            ProviderError::InvalidMnemonic(m) => StoreError::BadMnemonic(m),
            other => StoreError::BadParams(other.to_string()),
        }
    }
}
