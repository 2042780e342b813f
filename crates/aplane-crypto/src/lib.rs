pub mod ed25519;
pub mod falcon;
pub mod mnemonic;
pub mod provider;
pub mod secret;
pub mod templates;

pub use provider::{
    ArgSpec, KeyFamily, KeyMaterial, MnemonicScheme, ParamMap, ParamSpec, ParamType, Provider,
    ProviderError, ProviderRegistry,
};
pub use secret::SecretBytes;
