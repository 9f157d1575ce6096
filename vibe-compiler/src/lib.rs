//! # Vibe Compiler
//!
//! Turns a vibe file (one loosely-worded instruction per line) into a
//! [`vibe_vm::Program`]:
//! 1. Each non-blank line is handed to a [`LineClassifier`]
//! 2. `Map` lines open a new scope whose dimension asks for a JSON list
//! 3. `Command` lines land in the innermost open scope
//! 4. `EndMap` closes the innermost scope and the line is classified again
//! 5. Whatever is still open at the end of input is closed, innermost first
//!
//! The classifier, not a grammar, decides structure, so the compiler hands
//! it the open map's dimension as context and corrects an impossible
//! `EndMap` once before giving up.

mod classifier;
mod compiler;
pub mod prompts;

pub use classifier::{
    classification_schema, parse_classification, Classification, LineClassifier, LineKind, OracleClassifier,
};
pub use compiler::{CompileState, Compiler, CompilerConfig, MAX_MAP_DEPTH};
