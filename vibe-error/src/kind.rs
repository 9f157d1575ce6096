//! Error kinds for vibe operations

use std::fmt;

/// The kind of error that occurred.
///
/// Callers match on `ErrorKind` to decide how to react; the CLI only prints
/// it, while the compiler and interpreter use it to tell recoverable oracle
/// mistakes from fatal ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// Invalid configuration (missing API key, unknown provider, ...)
    ConfigInvalid,

    /// Invalid argument passed to a function or the CLI
    InvalidArgument,

    /// The operation was cancelled through its cancellation token
    Cancelled,

    // =========================================================================
    // Program model errors
    // =========================================================================
    /// A Command asked for tools and a response schema at the same time
    InvalidCommand,

    /// Serialization/deserialization of a program failed
    SerializationFailed,

    // =========================================================================
    // Oracle errors
    // =========================================================================
    /// Non-retryable transport or service failure, or retries exhausted
    OracleError,

    /// The service asked us to slow down
    RateLimited,

    // =========================================================================
    // Compiler errors
    // =========================================================================
    /// The oracle classified a line outside the offered vocabulary,
    /// or returned malformed structured output
    ClassificationError,

    /// EndMap was returned with no open map, even after one correction
    InvalidEndMap,

    /// Maps nested beyond the supported depth
    NestingTooDeep,

    // =========================================================================
    // Interpreter errors
    // =========================================================================
    /// A map's dimension reply did not contain a JSON array, even after repair
    ListExtractionFailure,

    /// A tool name is not present in the registry
    UnknownCapability,

    /// A file attachment is missing or too large
    AttachmentError,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// File not found
    FileNotFound,

    /// Permission denied
    PermissionDenied,

    /// IO operation failed
    IoFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::Cancelled => "Cancelled",

            // Program model
            ErrorKind::InvalidCommand => "InvalidCommand",
            ErrorKind::SerializationFailed => "SerializationFailed",

            // Oracle
            ErrorKind::OracleError => "OracleError",
            ErrorKind::RateLimited => "RateLimited",

            // Compiler
            ErrorKind::ClassificationError => "ClassificationError",
            ErrorKind::InvalidEndMap => "InvalidEndMap",
            ErrorKind::NestingTooDeep => "NestingTooDeep",

            // Interpreter
            ErrorKind::ListExtractionFailure => "ListExtractionFailure",
            ErrorKind::UnknownCapability => "UnknownCapability",
            ErrorKind::AttachmentError => "AttachmentError",

            // IO
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::IoFailed => "IoFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::RateLimited)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::InvalidEndMap.to_string(), "InvalidEndMap");
        assert_eq!(ErrorKind::OracleError.to_string(), "OracleError");
    }

    #[test]
    fn test_is_retryable() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::OracleError.is_retryable());
        assert!(!ErrorKind::ListExtractionFailure.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }
}
