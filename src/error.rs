//! Error types for signature generation and indexed retrieval.
//!
//! Pure components only fail on malformed input (`InvalidImage`) or on
//! signatures produced under a different configuration
//! (`ConfigurationMismatch`). Everything that touches the index store can
//! additionally fail with `StoreUnavailable`.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The input could not be interpreted as a 2D intensity raster.
    #[error("invalid image: {reason}")]
    InvalidImage { reason: String },

    /// An index store call failed after the store's own retry budget.
    #[error("index store unavailable during {operation}: {message}")]
    StoreUnavailable { operation: String, message: String },

    /// Two signatures (or a signature and a stored record) were produced
    /// under different configurations and cannot be compared.
    #[error("configuration mismatch: expected {expected}, found {found}")]
    ConfigurationMismatch { expected: String, found: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl Error {
    pub fn invalid_image(reason: impl Into<String>) -> Self {
        Error::InvalidImage {
            reason: reason.into(),
        }
    }

    pub fn store_unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::StoreUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Invalid input and configuration problems are deterministic; only
    /// store and IO failures are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable { .. } | Error::Io { .. })
    }

    /// Stable error code for callers that map errors onto their own surface.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidImage { .. } => "INVALID_IMAGE",
            Error::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
            Error::ConfigurationMismatch { .. } => "CONFIGURATION_MISMATCH",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization {
            message: err.to_string(),
        }
    }
}
