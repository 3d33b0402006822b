//! Error types returned by the metric stream core.

use std::result;
use std::sync::PoisonError;
use thiserror::Error;

/// A specialized `Result` type for metric operations.
pub type MetricResult<T> = result::Result<T, MetricError>;

/// Errors returned by the metrics pipeline.
///
/// `record` on the hot path never surfaces these: invalid measurements are
/// dropped with a one-time warning instead. Everything else -- setup,
/// serialization, transport selection -- returns a `MetricError`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetricError {
    /// Other errors not covered by a more specific case.
    #[error("metrics error: {0}")]
    Other(String),

    /// Invalid aggregation, view, or transport configuration supplied at setup.
    #[error("config error: {0}")]
    Config(String),

    /// A duplicate instrument was created with a conflicting descriptor.
    ///
    /// The first registration wins; this is surfaced as a warning, not a
    /// hard failure, so it is not returned from `create_*` -- it is logged.
    #[error("instrument conflict for '{name}': {reason}")]
    InstrumentConflict {
        /// Name of the conflicting instrument.
        name: String,
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// The serializer could not encode or decode a message.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No content type matched any supported encoding.
    #[error("Not supported content type: {0}")]
    UnsupportedContentType(String),

    /// Too many readers registered for the native bitmask width without
    /// big-integer support enabled.
    #[error("capacity warning: {0}")]
    Capacity(String),
}

impl<T> From<PoisonError<T>> for MetricError {
    fn from(err: PoisonError<T>) -> Self {
        MetricError::Other(err.to_string())
    }
}
