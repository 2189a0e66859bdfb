//! Cryptographic derivations.
//!
//! Provides the scrypt master derivation, its cost factor, and the
//! BLAKE2b identifier sequence.

pub mod cost;
pub mod identifier;
pub mod master;

pub use cost::CostFactor;
pub use identifier::{DerivedIdentifier, derive_identifier};
pub use master::{MasterKey, RootIdentifier, derive, stretch};

/// Length of the master key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of the root identifier (32 bytes).
pub const ROOT_LEN: usize = 32;
/// Length of a derived identifier (BLAKE2b-256 digest).
pub const IDENTIFIER_LEN: usize = 32;
/// Length of the scrypt output split into key and root.
pub const OUTPUT_LEN: usize = KEY_LEN + ROOT_LEN;
/// Length of the encoded index (little-endian u32).
pub const INDEX_LEN: usize = 4;
