use thiserror::Error;

/// The error taxonomy for the scan core. Kept narrow and matched on by kind rather than
/// string — mirrors the teacher's `MediaError` shape.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "database")]
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("plugin error: {0}")]
    Plugin(String),

    #[error("fatal scan error: {0}")]
    Fatal(String),

    #[error("scan cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;
