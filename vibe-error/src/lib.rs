//! # vibe-error
//!
//! Unified error handling for the vibe compiler and runner.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what went wrong (e.g., InvalidEndMap, ListExtractionFailure)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Locate the cause (line number, statement path, model)
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use vibe_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::InvalidEndMap, "EndMap with no open map")
//!         .with_operation("compiler::advance")
//!         .with_context("line", "3")
//!         .with_context("text", "combine all summaries"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All functions return `Result<T, vibe_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent layers only append context
//! - Don't abuse `From<OtherError>` to prevent raw error leakage

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using vibe Error
pub type Result<T> = std::result::Result<T, Error>;
