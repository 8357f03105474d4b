use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("NAME_COLLISION: {0}")]
    NameCollision(String),
    #[error("NAME_INVALID: {0}")]
    InvalidName(String),
    #[error("CONTENT_FETCH: {0}")]
    ContentFetch(String),
    #[error("ASSET_LOAD: {0}")]
    AssetLoad(String),
    #[error("CAPACITY_EXHAUSTED: {0}")]
    Capacity(String),
    #[error("PERSISTENCE_FAILURE: {0}")]
    Persistence(String),
    #[error("WORKSPACE_NOT_FOUND: {0}")]
    WorkspaceNotFound(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("UNSUPPORTED: {0}")]
    Unsupported(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the rest of the document tree stays valid after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Capacity(_) | Self::WorkspaceNotFound(_) | Self::Internal(_)
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Persistence(value.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(value: image::ImageError) -> Self {
        Self::ContentFetch(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        Self::ContentFetch(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
