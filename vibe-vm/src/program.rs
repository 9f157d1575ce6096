//! # Vibe Programs
//!
//! The compiled form of a vibe file: a tree of two statement kinds.
//!
//! - **Command**: one natural-language request to the oracle
//! - **Map**: a `dimension` command that yields a list, and a `body`
//!   program executed once per element
//!
//! Programs serialize to JSON with a `node_type` discriminator on every
//! statement, so a compiled program can be stored and run later without
//! recompiling the source lines.

use crate::error::{self, Error, Result};
use crate::prompts;
use crate::schema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single request to the oracle.
///
/// `tools` and `response_schema` are mutually exclusive: the service cannot
/// run a tool-augmented request with a schema-constrained decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CommandFields")]
pub struct Command {
    prompt: String,
    tools: BTreeSet<String>,
    files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

/// Unvalidated wire shape of a [`Command`]
#[derive(Deserialize)]
struct CommandFields {
    prompt: String,
    #[serde(default)]
    tools: BTreeSet<String>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    response_schema: Option<serde_json::Value>,
}

impl TryFrom<CommandFields> for Command {
    type Error = Error;

    fn try_from(fields: CommandFields) -> Result<Self> {
        Command::try_new(fields.prompt, fields.tools, fields.files, fields.response_schema)
    }
}

impl Command {
    /// A plain command with no tools, files or schema
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            tools: BTreeSet::new(),
            files: Vec::new(),
            response_schema: None,
        }
    }

    /// Build and validate a command in one step
    pub fn try_new<T, F>(
        prompt: impl Into<String>,
        tools: T,
        files: F,
        response_schema: Option<serde_json::Value>,
    ) -> Result<Self>
    where
        T: IntoIterator,
        T::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        let command = Self {
            prompt: prompt.into(),
            tools: tools.into_iter().map(Into::into).collect(),
            files: files.into_iter().map(Into::into).collect(),
            response_schema,
        };
        command.validate()?;
        Ok(command)
    }

    /// The dimension command of a map.
    ///
    /// The line is rewritten to demand a JSON array. The generic list schema
    /// is attached only when no tools are requested.
    pub fn list_dimension<T, F>(line: &str, tools: T, files: F) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        let tools: BTreeSet<String> = tools.into_iter().map(Into::into).collect();
        let response_schema = if tools.is_empty() {
            Some(schema::generic_list_schema())
        } else {
            None
        };
        Self {
            prompt: prompts::require_json_list(line),
            tools,
            files: files.into_iter().map(Into::into).collect(),
            response_schema,
        }
    }

    pub fn with_files<F>(mut self, files: F) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tools<T>(mut self, tools: T) -> Result<Self>
    where
        T: IntoIterator,
        T::Item: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self.validate()?;
        Ok(self)
    }

    pub fn with_response_schema(mut self, response_schema: serde_json::Value) -> Result<Self> {
        self.response_schema = Some(response_schema);
        self.validate()?;
        Ok(self)
    }

    /// Check the tools/schema exclusion rule
    pub fn validate(&self) -> Result<()> {
        if !self.tools.is_empty() && self.response_schema.is_some() {
            return Err(error::invalid_command(
                "a command cannot request tools and a response schema at the same time",
            )
            .with_context("prompt", truncate(&self.prompt, 60)));
        }
        Ok(())
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn tools(&self) -> &BTreeSet<String> {
        &self.tools
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn response_schema(&self) -> Option<&serde_json::Value> {
        self.response_schema.as_ref()
    }
}

/// Iterate `body` once per element of the list produced by `dimension`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Map {
    pub dimension: Command,
    pub body: Program,
}

impl Map {
    /// A map with an empty body
    pub fn new(dimension: Command) -> Self {
        Self {
            dimension,
            body: Program::new(),
        }
    }
}

/// A program statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type")]
pub enum Statement {
    Command(Command),
    Map(Map),
}

impl From<Command> for Statement {
    fn from(command: Command) -> Self {
        Statement::Command(command)
    }
}

impl From<Map> for Statement {
    fn from(map: Map) -> Self {
        Statement::Map(map)
    }
}

/// An ordered sequence of statements; insertion order is execution order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    statements: Vec<Statement>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_statements(statements: Vec<Statement>) -> Self {
        Self { statements }
    }

    /// Append a statement
    pub fn push(&mut self, statement: impl Into<Statement>) {
        self.statements.push(statement.into());
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter()
    }

    /// Deepest map nesting (0 for a program without maps)
    pub fn depth(&self) -> usize {
        self.statements
            .iter()
            .map(|s| match s {
                Statement::Command(_) => 0,
                Statement::Map(m) => 1 + m.body.depth(),
            })
            .max()
            .unwrap_or(0)
    }

    /// Serialize as pretty-printed tagged JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            error::serialization_error(format!("failed to serialize program: {}", e))
                .with_operation("program::to_json")
                .set_source(e)
        })
    }

    /// Load a program previously produced by [`Program::to_json`]
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            error::serialization_error(format!("failed to parse program: {}", e))
                .with_operation("program::from_json")
                .set_source(e)
        })
    }
}

// ============================================================================
// Rendering
// ============================================================================

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tools = if self.tools.is_empty() {
            "none".to_string()
        } else {
            self.tools.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        let files = if self.files.is_empty() {
            "none".to_string()
        } else {
            self.files.join(", ")
        };
        let schema = match &self.response_schema {
            Some(s) => s.to_string(),
            None => "none".to_string(),
        };
        write!(
            f,
            "Command({:?}, tools=[{}], files=[{}], schema={})",
            self.prompt, tools, files, schema
        )
    }
}

impl fmt::Display for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = indent(&self.body.to_string());
        write!(f, "Map(\n  dimension: {}\n  body: {})", self.dimension, body)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Command(c) => c.fmt(f),
            Statement::Map(m) => m.fmt(f),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.statements.is_empty() {
            return write!(f, "Program([])");
        }
        writeln!(f, "Program([")?;
        for (i, statement) in self.statements.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, indent(&statement.to_string()))?;
        }
        write!(f, "])")
    }
}

fn indent(s: &str) -> String {
    s.replace('\n', "\n  ")
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Assemble a program in code instead of compiling it from lines.
///
/// ```rust
/// use vibe_vm::{Command, ProgramBuilder};
///
/// let program = ProgramBuilder::new()
///     .command(Command::new("find the three largest cities in Peru"))
///     .map("for each city", ["search"], Vec::<String>::new(), |body| {
///         body.command(Command::new("look up the city's population"))
///     })
///     .command(Command::new("rank the cities by population"))
///     .build();
///
/// assert_eq!(program.len(), 3);
/// assert_eq!(program.depth(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(mut self, command: Command) -> Self {
        self.program.push(command);
        self
    }

    /// Append a map whose dimension is `prompt` rewritten as a list request;
    /// `body` fills in the statements run for each element.
    pub fn map<T, F, B>(mut self, prompt: &str, tools: T, files: F, body: B) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
        B: FnOnce(ProgramBuilder) -> ProgramBuilder,
    {
        let mut map = Map::new(Command::list_dimension(prompt, tools, files));
        map.body = body(ProgramBuilder::new()).build();
        self.program.push(map);
        self
    }

    pub fn build(self) -> Program {
        self.program
    }
}
