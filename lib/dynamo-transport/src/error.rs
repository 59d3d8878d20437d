use dynamo_core::EncodeError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Invalid subject: {0:?}")]
    InvalidSubject(String),

    #[error("Invalid subject pattern: {0:?}")]
    InvalidPattern(String),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] EncodeError),
}
