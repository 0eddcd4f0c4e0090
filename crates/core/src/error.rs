use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Browser launch, CDP connection or context creation failed.
    #[error("Browser error: {0}")]
    Browser(String),

    /// A capture step that the bundle cannot do without (the screenshot) failed.
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
