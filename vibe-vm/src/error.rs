//! Vibe VM error types
//!
//! Re-exports vibe-error and provides VM-specific conveniences.

pub use vibe_error::{Error, ErrorKind, ErrorStatus, Result};

/// Create an InvalidCommand error
pub fn invalid_command(reason: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidCommand, reason)
}

/// Create an OracleError error
pub fn oracle_error(message: impl Into<String>) -> Error {
    Error::oracle(message)
}

/// Create a ListExtractionFailure error
pub fn list_extraction_failure() -> Error {
    Error::new(ErrorKind::ListExtractionFailure, "no list produced for this map")
}

/// Create an UnknownCapability error
pub fn unknown_capability(name: impl Into<String>) -> Error {
    Error::unknown_capability(name)
}

/// Create an AttachmentError error
pub fn attachment_error(file: impl Into<String>, reason: impl Into<String>) -> Error {
    Error::attachment(file, reason)
}

/// Create a SerializationFailed error
pub fn serialization_error(message: impl Into<String>) -> Error {
    Error::serialization(message)
}

/// Create an IoFailed error
pub fn io_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::IoFailed, message)
}

/// Create a Cancelled error
pub fn cancelled() -> Error {
    Error::cancelled()
}

/// Create a ConfigInvalid error
pub fn config_invalid(message: impl Into<String>) -> Error {
    Error::config_invalid(message)
}
