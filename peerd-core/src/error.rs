use thiserror::Error;

pub type Result<T> = std::result::Result<T, PeerError>;

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("server status error: {0}")]
    ServerStatus(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("internal server error: {0}")]
    Internal(String),

    #[error("storage execution error: {0}")]
    StorageExecution(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PeerError {
    /// Stable error code written into error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BadRequestError",
            Self::ServerStatus(_) => "ServerStatusError",
            Self::NotFound(_) => "NotFoundError",
            Self::AlreadyExists(_) => "AlreadyExistsError",
            Self::PreconditionFailed(_) => "PreconditionFailedError",
            Self::Internal(_) => "InternalServerError",
            Self::StorageExecution(_) => "StorageExecutionError",
            Self::Transport(_) => "TransportError",
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IOError",
            Self::Json(_) => "JSONError",
        }
    }

    /// The text sent to the client next to the code.
    pub fn detail(&self) -> String {
        match self {
            Self::BadRequest(m)
            | Self::ServerStatus(m)
            | Self::NotFound(m)
            | Self::AlreadyExists(m)
            | Self::PreconditionFailed(m)
            | Self::Internal(m)
            | Self::StorageExecution(m)
            | Self::Transport(m)
            | Self::Config(m) => m.clone(),
            Self::Io(e) => e.to_string(),
            Self::Json(e) => e.to_string(),
        }
    }

    /// Errors caused by the request rather than by this node.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::BadRequest(_)
                | Self::ServerStatus(_)
                | Self::NotFound(_)
                | Self::AlreadyExists(_)
                | Self::PreconditionFailed(_)
        )
    }
}
