use thiserror::Error;

/// Error taxonomy for the anonymization and restoration pipelines.
///
/// Callers (CLI binaries, the supervisor) match on this enum to decide exit
/// codes and IPC event types; `Cancelled` is not a failure and must not be
/// reported as one.
#[derive(Debug, Error)]
pub enum RvaError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid key length: expected 16, 24, or 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("failed to open video decoder: {0}")]
    DecodeOpenFailed(String),

    #[error("failed to open video encoder: {0}")]
    EncodeOpenFailed(String),

    #[error("tracker does not support this operation: {0}")]
    TrackerUnsupported(String),

    #[error("detector error: {0}")]
    DetectorError(String),

    #[error("data pack is truncated")]
    PackTruncated,

    #[error("data pack is malformed: {0}")]
    PackMalformed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("decrypted payload shape mismatch: expected {expected} bytes, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("payload too large to embed: {0} bytes")]
    PayloadTooLarge(u64),

    #[error("job was cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    InternalError(String),
}

impl RvaError {
    /// Whether this error represents cooperative cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RvaError::Cancelled)
    }
}
