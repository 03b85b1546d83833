use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing argument: {0}")]
    Argument(String),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Navigation timeout: {0}")]
    NavigationTimeout(String),

    #[error("Action timeout: {0}")]
    ActionTimeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
