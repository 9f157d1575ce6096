//! # Vibe VM
//!
//! Runs natural-language programs where an LLM is the compute unit.
//!
//! ## Core Concepts
//! - **Program**: a tree of `Command` and `Map` statements
//! - **Oracle**: the retrying, cancellable client every exchange goes through
//! - **Conversation**: the turn history an exchange is sent with; forked per map branch
//! - **Interpreter**: executes a program, fanning maps out over their lists
//! - **Provider**: trait-based LLM communication (Gemini, scripted)

pub mod attachment;
pub mod conversation;
pub mod error;
pub mod interpreter;
pub mod oracle;
pub mod program;
pub mod prompts;
pub mod provider;
pub mod schema;
pub mod tools;
pub mod transcript;

pub use conversation::{ChatOptions, Conversation};
pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use interpreter::{extract_list, Interpreter, InterpreterConfig};
pub use oracle::{OracleClient, RetryPolicy};
pub use program::{Command, Map, Program, ProgramBuilder, Statement};
pub use provider::{
    FunctionCall, GeminiProvider, GenerateRequest, LlmProvider, Part, ProviderConfig, ProviderError, ProviderReply,
    Role, ScriptedProvider, ToolDescriptor, Turn,
};
pub use tools::ToolRegistry;
pub use transcript::{Direction, FileTranscript, MemoryTranscript, Transcript, TranscriptSink};

/// Re-exported so callers can cancel runs without depending on tokio-util
pub use tokio_util::sync::CancellationToken;
