//! Compiler implementation - a stack machine over classified lines

use crate::classifier::{Classification, LineClassifier, LineKind};
use tracing::{debug, info, warn};
use vibe_vm::error::{Error, ErrorKind, Result};
use vibe_vm::{Command, Map, Program, Statement, ToolRegistry};

/// Deepest map nesting a program may have
pub const MAX_MAP_DEPTH: usize = 64;

/// Configuration for the compiler
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Tools a line may ask for
    pub registry: ToolRegistry,
    pub max_depth: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            registry: ToolRegistry::new(),
            max_depth: MAX_MAP_DEPTH,
        }
    }
}

/// Open scopes of one compile run.
///
/// Open maps live on the stack until they close, at which point they are
/// appended to whatever scope encloses them.
#[derive(Debug)]
pub struct CompileState {
    top: Program,
    open: Vec<Map>,
    max_depth: usize,
}

impl CompileState {
    pub fn new(max_depth: usize) -> Self {
        Self {
            top: Program::new(),
            open: Vec::new(),
            max_depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn has_open_map(&self) -> bool {
        !self.open.is_empty()
    }

    /// Kinds the classifier may answer with in the current scope
    pub fn vocabulary(&self) -> Vec<LineKind> {
        if self.has_open_map() {
            vec![LineKind::Map, LineKind::Command, LineKind::EndMap]
        } else {
            vec![LineKind::Map, LineKind::Command]
        }
    }

    /// Dimension prompt of the innermost open map
    pub fn open_dimension(&self) -> Option<&str> {
        self.open.last().map(|map| map.dimension.prompt())
    }

    /// Append to the innermost open scope
    pub fn push(&mut self, statement: impl Into<Statement>) {
        match self.open.last_mut() {
            Some(map) => map.body.push(statement),
            None => self.top.push(statement),
        }
    }

    pub fn open_map(&mut self, map: Map) -> Result<()> {
        if self.open.len() >= self.max_depth {
            return Err(Error::new(
                ErrorKind::NestingTooDeep,
                format!("maps nested deeper than {} levels", self.max_depth),
            ));
        }
        self.open.push(map);
        Ok(())
    }

    /// Close the innermost open map; false if none was open
    pub fn close_map(&mut self) -> bool {
        match self.open.pop() {
            Some(map) => {
                self.push(map);
                true
            }
            None => false,
        }
    }

    /// Close everything still open, innermost first
    pub fn finish(mut self) -> Program {
        while self.close_map() {}
        self.top
    }
}

/// Turns vibe source lines into a [`Program`]
pub struct Compiler<C: LineClassifier> {
    classifier: C,
    config: CompilerConfig,
}

impl<C: LineClassifier> Compiler<C> {
    pub fn new(classifier: C) -> Self {
        Self::with_config(classifier, CompilerConfig::default())
    }

    pub fn with_config(classifier: C, config: CompilerConfig) -> Self {
        Self { classifier, config }
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Compile `lines`. Blank lines are skipped and the rest trimmed; any
    /// failure aborts the whole compile with the offending line attached.
    pub async fn compile<I, S>(&mut self, lines: I) -> Result<Program>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lines: Vec<String> = lines
            .into_iter()
            .map(|line| line.as_ref().trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        let total = lines.len();
        let mut state = CompileState::new(self.config.max_depth);

        for (index, line) in lines.iter().enumerate() {
            info!("compiling line {}/{}", index + 1, total);
            self.advance(line, &mut state).await.map_err(|e| {
                e.with_operation("compiler::compile")
                    .with_context("line", (index + 1).to_string())
                    .with_context("text", line.as_str())
            })?;
        }

        Ok(state.finish())
    }

    /// Process one line. An `EndMap` closes the innermost map and the same
    /// line is classified again, so this loops at most `depth + 1` times.
    pub async fn advance(&mut self, line: &str, state: &mut CompileState) -> Result<()> {
        loop {
            let vocabulary = state.vocabulary();
            let classification = self
                .classifier
                .classify(line, state.open_dimension(), &vocabulary)
                .await?;
            debug!(kind = %classification.kind, depth = state.depth(), "classified");

            if classification.kind != LineKind::EndMap {
                return self.place(line, classification, state);
            }
            if state.close_map() {
                continue;
            }

            warn!("EndMap with no open map, asking for a correction");
            let corrected = self.classifier.reclassify_invalid_end_map(line, &vocabulary).await?;
            if corrected.kind == LineKind::EndMap {
                return Err(Error::new(
                    ErrorKind::InvalidEndMap,
                    "EndMap with no open map, even after a correction",
                ));
            }
            return self.place(line, corrected, state);
        }
    }

    fn place(&self, line: &str, classification: Classification, state: &mut CompileState) -> Result<()> {
        for tool in &classification.tools {
            self.config.registry.resolve(tool)?;
        }

        match classification.kind {
            LineKind::Map => {
                let dimension = Command::list_dimension(line, classification.tools, classification.files);
                state.open_map(Map::new(dimension))
            }
            LineKind::Command => {
                let command = Command::try_new(line, classification.tools, classification.files, None)?;
                state.push(command);
                Ok(())
            }
            LineKind::EndMap => Err(Error::unexpected("EndMap reached statement placement")),
        }
    }
}
