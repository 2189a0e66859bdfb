use std::fmt;
use std::str::FromStr;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{IDENTIFIER_LEN, INDEX_LEN, ROOT_LEN};
use crate::error::{Error, Result};

type Blake2b256 = Blake2b<U32>;

/// Opaque per-record lookup name.
///
/// Safe to publish: it reveals nothing about the root it came from, and two
/// identifiers from the same root cannot be linked without that root.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DerivedIdentifier([u8; IDENTIFIER_LEN]);

impl DerivedIdentifier {
    pub fn from_bytes(bytes: [u8; IDENTIFIER_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IDENTIFIER_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Derive the `n`th identifier from a raw root identifier.
///
/// `root` must be exactly 32 bytes. `n` is encoded as a little-endian `u32`,
/// so values at or above 2^32 wrap: `n = 2^32` names the same record as `n = 0`.
pub fn derive_identifier(root: &[u8], n: u64) -> Result<DerivedIdentifier> {
    if root.len() != ROOT_LEN {
        return Err(Error::InputLength {
            expected: ROOT_LEN,
            actual: root.len(),
        });
    }
    Ok(hash_index(root, n as u32))
}

/// BLAKE2b-256 over `root || le32(n)`. The root is streamed into the hasher
/// rather than copied into a temporary buffer.
pub(crate) fn hash_index(root: &[u8], n: u32) -> DerivedIdentifier {
    let index: [u8; INDEX_LEN] = n.to_le_bytes();

    let mut hasher = Blake2b256::new();
    hasher.update(root);
    hasher.update(index);
    DerivedIdentifier(hasher.finalize().into())
}

impl fmt::Display for DerivedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DerivedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedIdentifier({self})")
    }
}

impl FromStr for DerivedIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; IDENTIFIER_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| match e {
            hex::FromHexError::InvalidHexCharacter { c, index } => {
                Error::InvalidHex { character: c, index }
            }
            hex::FromHexError::OddLength | hex::FromHexError::InvalidStringLength => {
                Error::InputLength {
                    expected: IDENTIFIER_LEN,
                    actual: s.len() / 2,
                }
            }
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for DerivedIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DerivedIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blake2b_256(data: &[u8]) -> [u8; 32] {
        Blake2b256::digest(data).into()
    }

    #[test]
    fn zero_root_index_zero_hashes_36_zero_bytes() {
        let id = derive_identifier(&[0u8; 32], 0).unwrap();
        assert_eq!(id.as_bytes(), &blake2b_256(&[0u8; 36]));
    }

    #[test]
    fn index_is_little_endian() {
        let mut input = [0u8; 36];
        input[32] = 1;

        let one = derive_identifier(&[0u8; 32], 1).unwrap();
        let zero = derive_identifier(&[0u8; 32], 0).unwrap();
        assert_eq!(one.as_bytes(), &blake2b_256(&input));
        assert_ne!(one, zero);
    }

    #[test]
    fn index_wraps_at_u32() {
        let root = [9u8; 32];
        assert_eq!(
            derive_identifier(&root, 1 << 32).unwrap(),
            derive_identifier(&root, 0).unwrap()
        );
        assert_eq!(
            derive_identifier(&root, (1 << 32) + 7).unwrap(),
            derive_identifier(&root, 7).unwrap()
        );
    }

    #[test]
    fn distinct_indices_give_distinct_identifiers() {
        let root = [3u8; 32];
        let ids: std::collections::HashSet<_> = (0..1000)
            .map(|n| derive_identifier(&root, n).unwrap())
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn distinct_roots_give_distinct_identifiers() {
        let a = derive_identifier(&[1u8; 32], 5).unwrap();
        let b = derive_identifier(&[2u8; 32], 5).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_root_length_is_rejected() {
        for len in [0, 31, 33, 64] {
            let err = derive_identifier(&vec![0u8; len], 0).unwrap_err();
            assert!(matches!(
                err,
                Error::InputLength { expected: 32, actual } if actual == len
            ));
        }
    }

    #[test]
    fn hex_display_and_parse_agree() {
        let id = derive_identifier(&[0u8; 32], 42).unwrap();
        let text = id.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<DerivedIdentifier>().unwrap(), id);
        assert!("abcd".parse::<DerivedIdentifier>().is_err());
    }

    #[test]
    fn parse_errors_distinguish_length_from_characters() {
        let err = "zz".repeat(32).parse::<DerivedIdentifier>().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidHex {
                character: 'z',
                index: 0
            }
        ));

        let err = "abc".parse::<DerivedIdentifier>().unwrap_err();
        assert!(matches!(
            err,
            Error::InputLength {
                expected: 32,
                actual: 1
            }
        ));

        let err = "ab".repeat(33).parse::<DerivedIdentifier>().unwrap_err();
        assert!(matches!(
            err,
            Error::InputLength {
                expected: 32,
                actual: 33
            }
        ));
    }

    #[test]
    fn serializes_as_hex_string() {
        let id = DerivedIdentifier::from_bytes([0xAB; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        assert_eq!(serde_json::from_str::<DerivedIdentifier>(&json).unwrap(), id);
    }
}
