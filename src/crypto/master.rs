use std::fmt;
use std::io;
use std::time::Instant;

use tracing::debug;

use super::{CostFactor, DerivedIdentifier, KEY_LEN, OUTPUT_LEN, ROOT_LEN, identifier};
use crate::error::{Error, Result};
use crate::memory::{Protector, SecretBytes};

/// Symmetric key for the storage layer. Locked and zeroized on drop.
pub struct MasterKey(SecretBytes);

/// Seed of the per-record identifier sequence. Locked and zeroized on drop.
pub struct RootIdentifier(SecretBytes);

impl MasterKey {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl RootIdentifier {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Derive the `n`th record identifier.
    pub fn derive(&self, n: u32) -> DerivedIdentifier {
        identifier::hash_index(self.0.as_slice(), n)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

impl fmt::Debug for RootIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootIdentifier([REDACTED])")
    }
}

/// Derive the master key and root identifier from a master password and an
/// account identifier.
///
/// The identifier is appended to the password and scrypt runs with an empty
/// salt. Identical inputs always give identical outputs.
///
/// This blocks for as long as the cost factor dictates; run it on a worker
/// thread if the caller must stay responsive.
pub fn derive(
    protector: &Protector,
    master_password: &[u8],
    identifier: &[u8],
    cost: CostFactor,
) -> Result<(MasterKey, RootIdentifier)> {
    if master_password.is_empty() {
        return Err(Error::EmptyPassword);
    }

    let mut input = SecretBytes::zeroed(master_password.len() + identifier.len(), protector)?;
    let (password_part, identifier_part) = input.as_mut_slice().split_at_mut(master_password.len());
    password_part.copy_from_slice(master_password);
    identifier_part.copy_from_slice(identifier);

    let output = stretch(protector, input.as_slice(), cost)?;
    drop(input);

    let (key, root) = output.as_slice().split_at(KEY_LEN);
    let master_key = MasterKey(SecretBytes::copy_from(key, protector)?);
    let root_identifier = RootIdentifier(SecretBytes::copy_from(&root[..ROOT_LEN], protector)?);

    Ok((master_key, root_identifier))
}

/// Run scrypt over `input` with an empty salt into a protected 64-byte buffer.
pub fn stretch(protector: &Protector, input: &[u8], cost: CostFactor) -> Result<SecretBytes> {
    let params = cost.params()?;
    reserve_working_memory(cost.memory_bytes())?;

    let mut output = SecretBytes::zeroed(OUTPUT_LEN, protector)?;

    debug!(
        log_n = cost.log_n(),
        r = cost.r(),
        p = cost.p(),
        memory_bytes = cost.memory_bytes(),
        "running scrypt"
    );
    let started = Instant::now();
    scrypt::scrypt(input, &[], &params, output.as_mut_slice())
        .map_err(|e| Error::resource("run scrypt", io::Error::other(e.to_string())))?;
    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "scrypt finished");

    Ok(output)
}

/// scrypt aborts the process when its scratchpad allocation fails, so probe
/// for the memory first and report a recoverable error instead.
fn reserve_working_memory(bytes: usize) -> Result<()> {
    let mut probe: Vec<u8> = Vec::new();
    probe.try_reserve_exact(bytes).map_err(|e| {
        Error::resource(
            "reserve scrypt working memory",
            io::Error::new(io::ErrorKind::OutOfMemory, e),
        )
    })
}
