//! # Tool registry
//!
//! Maps the stable tool names that appear in programs (`search`,
//! `url_context`, `read_file`) to the descriptors sent to the oracle, and
//! executes the tools that run on this machine.

use crate::attachment;
use crate::error::{self, Result};
use crate::provider::{FunctionCall, ToolDescriptor};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

pub const URL_CONTEXT: &str = "url_context";
pub const SEARCH: &str = "search";
pub const READ_FILE: &str = "read_file";

/// Function name the model uses when calling the local file reader
const READ_FILE_FUNCTION: &str = "ReadFile";

/// Registry of every tool a program may name
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDescriptor>,
    /// Directory `read_file` is confined to
    root: PathBuf,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// The standard registry, reading files relative to the working directory
    pub fn new() -> Self {
        Self::with_root(".")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let mut tools = BTreeMap::new();
        tools.insert(
            URL_CONTEXT.to_string(),
            ToolDescriptor::Builtin {
                name: URL_CONTEXT.into(),
                body: json!({ "url_context": {} }),
            },
        );
        tools.insert(
            SEARCH.to_string(),
            ToolDescriptor::Builtin {
                name: SEARCH.into(),
                body: json!({ "google_search": {} }),
            },
        );
        tools.insert(
            READ_FILE.to_string(),
            ToolDescriptor::Function {
                name: READ_FILE_FUNCTION.into(),
                description: "Read a file on the local filesystem within the current directory. \
                              The full contents of the file will be returned as text."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "The path to the file you want to read"
                        }
                    },
                    "required": ["path"]
                }),
            },
        );
        Self {
            tools,
            root: root.into(),
        }
    }

    /// All registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Look up one tool
    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor> {
        self.tools
            .get(name)
            .ok_or_else(|| error::unknown_capability(name).with_operation("tools::resolve"))
    }

    /// Look up every name, failing on the first unknown one
    pub fn resolve_all<'a, I>(&self, names: I) -> Result<Vec<ToolDescriptor>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        names
            .into_iter()
            .map(|name| self.resolve(name).cloned())
            .collect()
    }

    /// Run a function call the model made against a local tool.
    ///
    /// Failures are reported back to the model as an `error` field rather
    /// than aborting the exchange; an unknown function is a hard error.
    pub fn call_local(&self, call: &FunctionCall) -> Result<serde_json::Value> {
        match call.name.as_str() {
            READ_FILE_FUNCTION | READ_FILE => {
                let Some(path) = call.args.get("path").and_then(|p| p.as_str()) else {
                    return Ok(json!({ "error": "missing 'path' argument" }));
                };
                match self.read_file(path) {
                    Ok(content) => Ok(json!({ "path": path, "content": content })),
                    Err(e) => Ok(json!({ "path": path, "error": e.message() })),
                }
            }
            other => Err(error::unknown_capability(other).with_operation("tools::call_local")),
        }
    }

    fn read_file(&self, path: &str) -> Result<String> {
        let relative = Path::new(path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(error::attachment_error(path, "path escapes the working directory"));
        }
        attachment::read_text(&self.root.join(relative))
    }
}
