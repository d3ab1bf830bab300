use std::fmt::{self, Display};

use crate::profile::ProfileId;

/// Why a profile form was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingName,
    MissingHost,
    MissingPort,
    InvalidPort(String),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingName => write!(f, "Please input a profile name"),
            Self::MissingHost => write!(f, "Please input proxy host"),
            Self::MissingPort => write!(f, "Please input proxy port"),
            Self::InvalidPort(port) => {
                write!(f, "Port '{port}' must be a number between 1 and 65535")
            }
        }
    }
}

/// Every failure a surface can receive from a profile or activation command.
///
/// None of these are retried. When a command fails the persisted state stays
/// at its last consistent value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    Validation(ValidationError),
    NotFound(ProfileId),
    LastProfile,
    Apply(String),
    Persistence(String),
}

impl From<ValidationError> for ProxyError {
    fn from(error: ValidationError) -> Self {
        ProxyError::Validation(error)
    }
}

impl Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Validation(error) => write!(f, "Invalid profile: {error}"),
            ProxyError::NotFound(id) => write!(f, "No profile with id '{id}'"),
            ProxyError::LastProfile => write!(f, "Cannot delete the only remaining profile"),
            ProxyError::Apply(detail) => write!(f, "Failed to apply proxy settings: {detail}"),
            ProxyError::Persistence(detail) => write!(f, "Failed to persist state: {detail}"),
        }
    }
}

impl std::error::Error for ProxyError {}
