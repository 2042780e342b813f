pub mod algod;
pub mod error;
pub mod meta;
pub mod record;
pub mod store;
pub mod watcher;

pub use algod::AlgodClient;
pub use error::StoreError;
pub use store::{DecryptedKey, KeyIndexSnapshot, KeyStore};
