//! Protocol constants the signing daemon depends on.

/// Fallback minimum transaction fee (microAlgos) when the node has not
/// reported one.
pub const MIN_FEE_FALLBACK: u64 = 1000;

/// Per-transaction contribution to an atomic group's LogicSig byte pool.
pub const LOGIC_SIG_BUDGET_PER_TXN: u64 = 1000;

/// Maximum number of transactions in one atomic group.
pub const MAX_GROUP_SIZE: usize = 16;

/// Domain-separation prefix for transaction ids and signatures.
pub const TX_PREFIX: &[u8] = b"TX";

/// Domain-separation prefix for group digests.
pub const TG_PREFIX: &[u8] = b"TG";

/// Domain-separation prefix for LogicSig account addresses.
pub const PROGRAM_PREFIX: &[u8] = b"Program";

/// The minimal always-true LogicSig program (`#pragma version 1; int 1`).
/// Dummy transactions are signed with this program; it carries no secret.
pub const ALWAYS_TRUE_PROGRAM: &[u8] = &[0x01, 0x20, 0x01, 0x01, 0x22];
