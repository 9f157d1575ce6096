//! Line classification
//!
//! The compiler never parses a vibe line itself; it asks a [`LineClassifier`]
//! what the line is. [`OracleClassifier`] asks the model on one shared
//! conversation with a schema-constrained reply. Tests substitute a scripted
//! classifier behind the same trait.

use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;
use vibe_vm::error::{Error, Result};
use vibe_vm::oracle::{self, OracleClient};
use vibe_vm::{schema, ChatOptions, Conversation, LlmProvider};

use crate::prompts;

/// What a source line turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineKind {
    Map,
    Command,
    EndMap,
}

impl LineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineKind::Map => "Map",
            LineKind::Command => "Command",
            LineKind::EndMap => "EndMap",
        }
    }
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Map" => Ok(LineKind::Map),
            "Command" => Ok(LineKind::Command),
            "EndMap" => Ok(LineKind::EndMap),
            other => Err(Error::classification(format!("unknown line type '{}'", other))),
        }
    }
}

/// The classifier's verdict for one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: LineKind,
    pub tools: Vec<String>,
    pub files: Vec<String>,
}

impl Classification {
    pub fn new(kind: LineKind) -> Self {
        Self {
            kind,
            tools: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }
}

/// Decides the structure of each source line
#[allow(async_fn_in_trait)]
pub trait LineClassifier {
    /// Classify `line`. `open_map` is the dimension prompt of the innermost
    /// open map, if any; `vocabulary` lists the kinds on offer.
    async fn classify(&mut self, line: &str, open_map: Option<&str>, vocabulary: &[LineKind])
        -> Result<Classification>;

    /// Second opinion after `EndMap` was returned with no map open
    async fn reclassify_invalid_end_map(&mut self, line: &str, vocabulary: &[LineKind]) -> Result<Classification>;
}

/// Wire shape of a classification reply
#[derive(Deserialize)]
struct ClassificationReply {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    files: Vec<String>,
}

/// Parse a classification reply. Any of the three kinds is accepted; which
/// one is legal in the current scope is the compiler's call.
pub fn parse_classification(text: &str) -> Result<Classification> {
    let reply: ClassificationReply = serde_json::from_str(text).map_err(|e| {
        Error::classification(format!("malformed classification: {}", e))
            .with_context("reply", text)
            .set_source(e)
    })?;
    Ok(Classification {
        kind: reply.kind.parse()?,
        tools: reply.tools,
        files: reply.files,
    })
}

/// Response schema whose `type` enum is exactly `vocabulary`
pub fn classification_schema(vocabulary: &[LineKind], tool_names: &[&str]) -> serde_json::Value {
    let kinds: Vec<&str> = vocabulary.iter().map(LineKind::as_str).collect();
    json!({
        "type": "object",
        "properties": {
            "type": {
                "type": "string",
                "enum": kinds,
                "description": "The type of statement this line represents"
            },
            "tools": schema::string_enum_array(tool_names, "Names of the tools needed to execute this line"),
            "files": schema::string_array("Files to attach when executing this line"),
        },
        "required": ["type", "tools", "files"]
    })
}

/// Classifier backed by the oracle
pub struct OracleClassifier<P: LlmProvider> {
    conversation: Conversation<P>,
    tool_names: Vec<String>,
}

impl<P: LlmProvider> OracleClassifier<P> {
    pub fn new(oracle: Arc<OracleClient<P>>) -> Self {
        let tool_names = oracle.registry().names().into_iter().map(String::from).collect();
        Self {
            conversation: Conversation::new(oracle, Some(prompts::COMPILER_SYSTEM_PROMPT)),
            tool_names,
        }
    }

    pub fn conversation(&self) -> &Conversation<P> {
        &self.conversation
    }

    async fn ask(&mut self, prompt: &str, vocabulary: &[LineKind]) -> Result<Classification> {
        let names: Vec<&str> = self.tool_names.iter().map(String::as_str).collect();
        let options = ChatOptions::default().with_response_schema(classification_schema(vocabulary, &names));

        let text = self
            .conversation
            .chat(prompt, Vec::new(), options)
            .await
            .map_err(|e| match oracle::malformed_reply(&e) {
                Some(reply) => Error::classification("classification reply is not JSON").with_context("reply", reply),
                None => e,
            })?;
        debug!(reply = %text, "classification");
        parse_classification(&text)
    }
}

impl<P: LlmProvider> LineClassifier for OracleClassifier<P> {
    async fn classify(
        &mut self,
        line: &str,
        open_map: Option<&str>,
        vocabulary: &[LineKind],
    ) -> Result<Classification> {
        let prompt = prompts::classification_prompt(line, open_map);
        self.ask(&prompt, vocabulary).await
    }

    async fn reclassify_invalid_end_map(&mut self, line: &str, vocabulary: &[LineKind]) -> Result<Classification> {
        let prompt = prompts::retry_classification_prompt(line);
        self.ask(&prompt, vocabulary).await
    }
}
