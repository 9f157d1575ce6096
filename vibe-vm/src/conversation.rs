//! Conversation history
//!
//! A conversation is an ordered list of user/model turns plus the system
//! instruction it was opened with. Every exchange sends the whole history.
//! Forking produces an independent deep copy that shares only the oracle.

use crate::error::Result;
use crate::oracle::OracleClient;
use crate::provider::{GenerateRequest, LlmProvider, Part, Role, ToolDescriptor, Turn};
use std::sync::Arc;

/// Per-exchange options
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub tools: Vec<ToolDescriptor>,
    pub response_schema: Option<serde_json::Value>,
}

impl ChatOptions {
    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

pub struct Conversation<P: LlmProvider> {
    oracle: Arc<OracleClient<P>>,
    system_instruction: Option<Arc<str>>,
    turns: Vec<Turn>,
}

impl<P: LlmProvider> Conversation<P> {
    pub fn new(oracle: Arc<OracleClient<P>>, system_instruction: Option<&str>) -> Self {
        Self {
            oracle,
            system_instruction: system_instruction.map(Arc::from),
            turns: Vec::new(),
        }
    }

    /// Independent copy of the history; later changes to either side are
    /// invisible to the other
    pub fn fork(&self) -> Self {
        Self {
            oracle: Arc::clone(&self.oracle),
            system_instruction: self.system_instruction.clone(),
            turns: self.turns.clone(),
        }
    }

    /// Send `prompt` (after any attachments) with the full history.
    ///
    /// On success the history grows by one user and one model turn. On
    /// failure it is left exactly as it was before the call.
    pub async fn chat(&mut self, prompt: &str, attachments: Vec<Part>, options: ChatOptions) -> Result<String> {
        let mut parts = attachments;
        parts.push(Part::text(prompt));
        self.turns.push(Turn::with_parts(Role::User, parts));

        let mut request = GenerateRequest::new(self.oracle.model(), self.turns.clone())
            .with_tools(options.tools);
        if let Some(instruction) = &self.system_instruction {
            request = request.with_system_instruction(instruction.as_ref());
        }
        if let Some(schema) = options.response_schema {
            request = request.with_response_schema(schema);
        }

        match self.oracle.exchange(request).await {
            Ok(text) => {
                self.turns.push(Turn::model(text.clone()));
                Ok(text)
            }
            Err(e) => {
                self.turns.pop();
                Err(e)
            }
        }
    }

    /// Add a user turn without an exchange
    pub fn append_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::user(text));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }

    pub fn oracle(&self) -> &Arc<OracleClient<P>> {
        &self.oracle
    }
}
