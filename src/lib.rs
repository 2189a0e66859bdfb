//! Tranquil key derivation
//!
//! Turns one master password and a per-account identifier into long-term
//! secrets:
//! - a 32-byte master key for the storage layer
//! - a 32-byte root identifier, the seed of an unbounded sequence of
//!   unlinkable per-record identifiers
//!
//! The expensive step (scrypt) runs once per [`Session`]; record identifiers
//! are then a single BLAKE2b call each. Every secret buffer lives in a
//! [`memory::SecretBytes`], locked against swapping and zeroized on drop.

pub mod crypto;
pub mod error;
pub mod memory;

pub use crate::crypto::{
    CostFactor, DerivedIdentifier, MasterKey, RootIdentifier, derive, derive_identifier,
};
pub use crate::error::{CostParam, Error, Result};
pub use crate::memory::{LockPolicy, MemoryProtector, MlockProtector, Protector, SecretBytes};

use tracing::info;

/// Secrets derived for one account, held for the length of a session.
#[derive(Debug)]
pub struct Session {
    master_key: MasterKey,
    root_identifier: RootIdentifier,
}

impl Session {
    /// Derive with an `mlock` protector that refuses to continue if locking fails.
    pub fn open(master_password: &[u8], identifier: &[u8], cost: CostFactor) -> Result<Self> {
        Self::open_with_protector(
            master_password,
            identifier,
            cost,
            MlockProtector::shared(LockPolicy::Required),
        )
    }

    pub fn open_with_protector(
        master_password: &[u8],
        identifier: &[u8],
        cost: CostFactor,
        protector: Protector,
    ) -> Result<Self> {
        let (master_key, root_identifier) =
            crypto::derive(&protector, master_password, identifier, cost)?;
        info!(log_n = cost.log_n(), r = cost.r(), p = cost.p(), "session secrets derived");

        Ok(Self {
            master_key,
            root_identifier,
        })
    }

    pub fn master_key(&self) -> &MasterKey {
        &self.master_key
    }

    pub fn root_identifier(&self) -> &RootIdentifier {
        &self.root_identifier
    }

    pub fn identifier(&self, n: u32) -> DerivedIdentifier {
        self.root_identifier.derive(n)
    }

    /// Identifiers from `start` up to and including index `u32::MAX`.
    pub fn identifiers(&self, start: u32) -> Identifiers<'_> {
        Identifiers {
            root: &self.root_identifier,
            next: Some(start),
        }
    }

    pub fn into_parts(self) -> (MasterKey, RootIdentifier) {
        (self.master_key, self.root_identifier)
    }
}

/// Iterator over `(n, identifier)` pairs. See [`Session::identifiers`].
#[derive(Debug)]
pub struct Identifiers<'a> {
    root: &'a RootIdentifier,
    next: Option<u32>,
}

impl Iterator for Identifiers<'_> {
    type Item = (u32, DerivedIdentifier);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.next?;
        self.next = n.checked_add(1);
        Some((n, self.root.derive(n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(password: &str, identifier: &str) -> Session {
        Session::open_with_protector(
            password.as_bytes(),
            identifier.as_bytes(),
            CostFactor::new(4, 1, 1).unwrap(),
            MlockProtector::shared(LockPolicy::BestEffort),
        )
        .unwrap()
    }

    #[test]
    fn identifiers_match_the_free_function() {
        let s = session("pw", "alice");
        for n in [0u32, 1, 2, 1000, u32::MAX] {
            let expected = derive_identifier(s.root_identifier().as_bytes(), u64::from(n)).unwrap();
            assert_eq!(s.identifier(n), expected);
        }
    }

    #[test]
    fn sessions_are_reproducible() {
        let a = session("pw", "alice");
        let b = session("pw", "alice");
        assert_eq!(a.master_key().as_bytes(), b.master_key().as_bytes());
        assert_eq!(a.identifier(7), b.identifier(7));
    }

    #[test]
    fn accounts_do_not_share_identifiers() {
        let a = session("pw", "alice");
        let b = session("pw", "bob");
        assert_ne!(a.identifier(0), b.identifier(0));
    }

    #[test]
    fn sequence_counts_up_from_start() {
        let s = session("pw", "alice");
        let got: Vec<_> = s.identifiers(10).take(3).collect();
        assert_eq!(
            got,
            vec![
                (10, s.identifier(10)),
                (11, s.identifier(11)),
                (12, s.identifier(12)),
            ]
        );
    }

    #[test]
    fn sequence_ends_after_last_index() {
        let s = session("pw", "alice");
        let tail: Vec<_> = s.identifiers(u32::MAX - 1).map(|(n, _)| n).collect();
        assert_eq!(tail, vec![u32::MAX - 1, u32::MAX]);
    }

    #[test]
    fn into_parts_hands_over_both_secrets() {
        let s = session("pw", "alice");
        let expected = s.identifier(3);
        let (key, root) = s.into_parts();
        assert_eq!(key.as_bytes().len(), 32);
        assert_eq!(root.derive(3), expected);
    }

    #[test]
    fn invalid_password_is_an_error() {
        let err = Session::open_with_protector(
            b"",
            b"alice",
            CostFactor::new(4, 1, 1).unwrap(),
            MlockProtector::shared(LockPolicy::BestEffort),
        )
        .unwrap_err();
        assert!(matches!(err, Error::EmptyPassword));
    }
}
