use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("missing command")]
    MissingCommand,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
