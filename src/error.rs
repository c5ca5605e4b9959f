//! Error types for the sidecar.

/// Top-level error type for the inference sidecar.
///
/// Variants carry the human-readable message that ultimately lands in the
/// `error` field of a wire reply, so messages are written for the host
/// application, not for internal logs.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    /// Malformed or incomplete wire command.
    #[error("{0}")]
    Protocol(String),

    /// Model loading or session error.
    #[error("{0}")]
    Model(String),

    /// Inference backend failure.
    #[error("{0}")]
    Backend(String),

    /// Audio file decode error.
    #[error("{0}")]
    Audio(String),

    /// Model repository download error.
    #[error("{0}")]
    Download(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SidecarError>;
