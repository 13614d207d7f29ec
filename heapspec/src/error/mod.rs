//! Error types
//!
//! Three classes:
//! - [`ContractError`]: raised while a contract is being built, before any traffic
//! - [`ProtocolError`]: the channel to the verification server failed
//! - [`ConfigError`]: connection options could not be loaded
//!
//! A contract that does not hold is *not* an error; it is a
//! [`VerificationResult::Failure`](crate::result::VerificationResult::Failure).

use std::path::PathBuf;

use thiserror::Error;

use crate::types::TypeDescriptor;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Contract construction error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: TypeDescriptor,
        found: TypeDescriptor,
    },

    /// A type that cannot appear in the given position (e.g. `void` as an element)
    #[error("Invalid type {ty}: {message}")]
    InvalidType { ty: TypeDescriptor, message: String },

    #[error("Arity mismatch: {ty} expects {expected} elements, got {found}")]
    ArityMismatch {
        ty: TypeDescriptor,
        expected: u64,
        found: usize,
    },

    #[error("Unknown location: {message}")]
    UnknownLocation { message: String },

    #[error("Index {index} out of range for allocation of {ty} (length {length})")]
    IndexOutOfRange {
        index: usize,
        length: u64,
        ty: TypeDescriptor,
    },

    #[error("Ill-formed contract: {message}")]
    IllFormedContract { message: String },

    #[error("Execution statement already declared")]
    DuplicateExecution,

    #[error("Return value already declared")]
    DuplicateReturn,
}

impl ContractError {
    pub fn type_mismatch(expected: &TypeDescriptor, found: &TypeDescriptor) -> Self {
        Self::TypeMismatch {
            expected: expected.clone(),
            found: found.clone(),
        }
    }

    pub fn invalid_type(ty: &TypeDescriptor, message: impl Into<String>) -> Self {
        Self::InvalidType {
            ty: ty.clone(),
            message: message.into(),
        }
    }

    pub fn unknown_location(message: impl Into<String>) -> Self {
        Self::UnknownLocation {
            message: message.into(),
        }
    }

    pub fn ill_formed(message: impl Into<String>) -> Self {
        Self::IllFormedContract {
            message: message.into(),
        }
    }

    /// Short name of the error kind, stable across message wording changes
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TypeMismatch { .. } | Self::InvalidType { .. } => "TypeMismatch",
            Self::ArityMismatch { .. } => "ArityMismatch",
            Self::UnknownLocation { .. } => "UnknownLocation",
            Self::IndexOutOfRange { .. } => "IndexOutOfRange",
            Self::IllFormedContract { .. } => "IllFormedContract",
            Self::DuplicateExecution => "DuplicateExecution",
            Self::DuplicateReturn => "DuplicateReturn",
        }
    }
}

/// Transport or session failure
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Channel closed by the server")]
    Disconnected,

    #[error("Malformed response: {message}")]
    Malformed { message: String },

    #[error("Server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },
}

impl ProtocolError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}

/// Connection option loading error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}
