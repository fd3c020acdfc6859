use thiserror::Error;

#[derive(Error, Debug)]
pub enum TributaryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Unknown source provider: {0}")]
    UnknownSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TributaryError>;
