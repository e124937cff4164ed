use thiserror::Error;

pub type HkResult<T> = Result<T, HkError>;

#[derive(Debug, Error)]
pub enum HkError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HkError {
    pub fn codec(msg: impl Into<String>) -> Self {
        HkError::Codec(msg.into())
    }
}
