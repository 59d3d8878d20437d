use crate::event::EventKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Backend not found: {0}")]
    BackendNotFound(String),
}

/// A payload that cannot be turned into a lifecycle event
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] rmp_serde::decode::Error),

    #[error("unknown event kind code {0}")]
    UnknownKind(u8),

    #[error("{0} event carries no backend")]
    MissingBackend(EventKind),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("serialization failed: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),
}

/// An event that decoded fine but must not touch the registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("backend name is empty")]
    EmptyName,

    #[error("backend name {0:?} is malformed")]
    MalformedName(String),

    #[error("backend {0} has no host")]
    EmptyHost(String),

    #[error("backend {name} has implausible port {port}")]
    InvalidPort { name: String, port: u16 },
}

impl ValidationError {
    /// Short label used as a metrics dimension
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::EmptyName => "empty_name",
            ValidationError::MalformedName(_) => "malformed_name",
            ValidationError::EmptyHost(_) => "empty_host",
            ValidationError::InvalidPort { .. } => "invalid_port",
        }
    }
}
