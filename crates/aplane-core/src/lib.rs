pub mod codec;
pub mod constants;
pub mod error;
pub mod transaction;
pub mod types;

pub use error::Error;
pub use transaction::{LogicSig, SignedTransaction, Transaction, TransactionType};
pub use types::{Address, Digest, MicroAlgos, Round, TxId};
