use std::fmt;
use std::io;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Names the scrypt cost parameter a validation failure is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostParam {
    /// Work-factor exponent (effective factor is `2^N`).
    N,
    /// Block size.
    R,
    /// Parallelism.
    P,
}

impl fmt::Display for CostParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostParam::N => f.write_str("N"),
            CostParam::R => f.write_str("r"),
            CostParam::P => f.write_str("p"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The cost factor violates a scrypt constraint. Fix the configuration and retry.
    #[error("invalid cost factor {param}: {reason}")]
    Parameter {
        param: CostParam,
        reason: &'static str,
    },

    /// The environment cannot provide the memory the derivation needs, or cannot
    /// lock it. Not retried automatically.
    #[error("unable to {action}: {source}")]
    Resource {
        action: &'static str,
        #[source]
        source: io::Error,
    },

    /// A fixed-size input had the wrong length.
    #[error("expected {expected} bytes of input, got {actual}")]
    InputLength { expected: usize, actual: usize },

    /// A hex-encoded identifier contained a non-hex character.
    #[error("invalid hex character {character:?} at position {index}")]
    InvalidHex { character: char, index: usize },

    #[error("master password must not be empty")]
    EmptyPassword,
}

impl Error {
    pub(crate) fn parameter(param: CostParam, reason: &'static str) -> Self {
        Error::Parameter { param, reason }
    }

    pub(crate) fn resource(action: &'static str, source: io::Error) -> Self {
        Error::Resource { action, source }
    }
}
