use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Remote mailbox error: {0}")]
    Remote(String),

    #[error("Remote protocol violation: {0}")]
    Protocol(String),

    #[error("Index store error: {0}")]
    Store(String),

    #[error("Query parse error: {0}")]
    Query(String),

    #[error("Search engine error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("Index store has been terminated")]
    Terminated,

    #[error("Indexer is not running")]
    NotRunning,

    #[error("Indexer worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
