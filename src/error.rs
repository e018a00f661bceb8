// src/error.rs
use core::fmt;

/// Library-wide error for tdigest-rs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TdError {
    /// User tried to insert NaN during digest construction.
    /// `context` pinpoints where it came from (e.g., "sample value", "merged digest").
    NanInput { context: &'static str },

    /// Quantile argument outside [0,1].
    QuantileOutOfRange,

    /// Weight must be a positive integer.
    NonPositiveWeight,

    /// Serialized digest carried an unknown format tag.
    UnknownEncoding { tag: i32 },

    /// Serialized digest ended before all announced fields were read.
    Truncated { what: &'static str },

    /// A count in a serialized digest was impossible (negative, or too large
    /// for the announced buffer).
    BadCount { what: &'static str },

    /// Varint ran past its 6-byte cap; the value is implausibly large.
    VarintOverflow,
}

impl fmt::Display for TdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TdError::NanInput { context } => write!(
                f,
                "tdigest: NaN values are not allowed ({}). \
hint: drop NaNs before adding them to the digest",
                context
            ),
            TdError::QuantileOutOfRange => {
                write!(f, "tdigest: quantile must be in [0,1]")
            }
            TdError::NonPositiveWeight => {
                write!(f, "tdigest: sample weight must be >= 1")
            }
            TdError::UnknownEncoding { tag } => write!(
                f,
                "tdigest: unknown serialization format tag {} (expected 1 or 2)",
                tag
            ),
            TdError::Truncated { what } => {
                write!(f, "tdigest: serialized digest is truncated ({})", what)
            }
            TdError::BadCount { what } => {
                write!(f, "tdigest: implausible count in serialized digest ({})", what)
            }
            TdError::VarintOverflow => {
                write!(f, "tdigest: varint is implausibly large (over 6 bytes)")
            }
        }
    }
}

impl std::error::Error for TdError {}

pub type TdResult<T> = Result<T, TdError>;
