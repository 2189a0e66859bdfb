use serde::{Deserialize, Serialize};

use super::OUTPUT_LEN;
use crate::error::{CostParam, Error, Result};

/// Validated scrypt cost factor.
///
/// `log_n` is the work-factor exponent: the effective scrypt `N` is `2^log_n`.
/// The only way to obtain a value is [`CostFactor::new`] (or deserializing,
/// which goes through it), so every `CostFactor` in existence satisfies the
/// scrypt constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCostFactor", into = "RawCostFactor")]
pub struct CostFactor {
    log_n: u8,
    r: u32,
    p: u32,
}

impl Default for CostFactor {
    fn default() -> Self {
        Self {
            // 2^15 * 128 * 8 bytes = 32 MiB
            log_n: 15,
            r: 8,
            p: 1,
        }
    }
}

impl CostFactor {
    pub fn new(log_n: u8, r: u32, p: u32) -> Result<Self> {
        let cost = Self { log_n, r, p };
        cost.validate()?;
        Ok(cost)
    }

    pub fn log_n(&self) -> u8 {
        self.log_n
    }

    pub fn r(&self) -> u32 {
        self.r
    }

    pub fn p(&self) -> u32 {
        self.p
    }

    /// Bytes of working memory a derivation with this cost requests:
    /// `128·r·2^N` for the scrypt scratchpad plus `128·r·p` for the block buffer.
    pub fn memory_bytes(&self) -> usize {
        let block = 128 * self.r as usize;
        block * (1usize << self.log_n) + block * self.p as usize
    }

    fn validate(&self) -> Result<()> {
        use CostParam::{N, P, R};

        if self.log_n == 0 {
            return Err(Error::parameter(N, "work factor exponent must be at least 1"));
        }
        if u32::from(self.log_n) >= usize::BITS {
            return Err(Error::parameter(N, "work factor exceeds the platform word size"));
        }
        if self.r == 0 {
            return Err(Error::parameter(R, "block size must be at least 1"));
        }
        if self.p == 0 {
            return Err(Error::parameter(P, "parallelism must be at least 1"));
        }
        if u64::from(self.r) * u64::from(self.p) >= 1 << 30 {
            return Err(Error::parameter(P, "r * p must be below 2^30"));
        }
        if u64::from(self.log_n) >= 16 * u64::from(self.r) {
            return Err(Error::parameter(N, "2^N must be below 2^(16 * r)"));
        }

        let block = usize::try_from(self.r)
            .ok()
            .and_then(|r| r.checked_mul(128))
            .ok_or(Error::parameter(R, "block size is not representable"))?;
        let scratch = block
            .checked_mul(1usize << self.log_n)
            .ok_or(Error::parameter(N, "memory cost is not representable"))?;
        let blocks = usize::try_from(self.p)
            .ok()
            .and_then(|p| block.checked_mul(p))
            .ok_or(Error::parameter(P, "parallel memory cost is not representable"))?;
        scratch
            .checked_add(blocks)
            .ok_or(Error::parameter(N, "memory cost is not representable"))?;

        debug_assert!(
            self.params().is_ok(),
            "cost factor passed validation but scrypt rejected it"
        );
        Ok(())
    }

    /// Build the scrypt parameters.
    ///
    /// `validate` mirrors every rule of `scrypt::Params::new`, so for a
    /// constructed `CostFactor` this never fails; the error only exists in
    /// case the two drift apart.
    pub(crate) fn params(&self) -> Result<scrypt::Params> {
        scrypt::Params::new(self.log_n, self.r, self.p, OUTPUT_LEN)
            .map_err(|_| Error::parameter(CostParam::N, "combination rejected by scrypt"))
    }
}

/// Wire shape of a cost factor as the configuration layer writes it.
#[derive(Serialize, Deserialize)]
struct RawCostFactor {
    #[serde(rename = "N")]
    log_n: u8,
    r: u32,
    p: u32,
}

impl TryFrom<RawCostFactor> for CostFactor {
    type Error = Error;

    fn try_from(raw: RawCostFactor) -> Result<Self> {
        CostFactor::new(raw.log_n, raw.r, raw.p)
    }
}

impl From<CostFactor> for RawCostFactor {
    fn from(cost: CostFactor) -> Self {
        Self {
            log_n: cost.log_n,
            r: cost.r,
            p: cost.p,
        }
    }
}
