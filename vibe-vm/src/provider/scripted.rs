//! Scripted provider - replays queued replies, useful for testing
//!
//! Every request is recorded so tests can assert on exactly what the
//! compiler or interpreter sent. Replies are either consumed in order from a
//! queue, or computed by a responder closure from the request.

use super::*;
use std::collections::VecDeque;
use std::sync::Mutex;

type Responder =
    Box<dyn Fn(&GenerateRequest) -> std::result::Result<ProviderReply, ProviderError> + Send + Sync>;

/// In-memory provider with canned replies
#[derive(Default)]
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<std::result::Result<ProviderReply, ProviderError>>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request by calling `responder`; queued replies still win
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&GenerateRequest) -> std::result::Result<ProviderReply, ProviderError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Default::default()
        }
    }

    /// Queue a text reply
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(ProviderReply::text(text)))
    }

    /// Queue an arbitrary reply
    pub fn reply_with(self, reply: ProviderReply) -> Self {
        self.push(Ok(reply))
    }

    /// Queue a failure
    pub fn fail(self, error: ProviderError) -> Self {
        self.push(Err(error))
    }

    fn push(self, item: std::result::Result<ProviderReply, ProviderError>) -> Self {
        self.lock_queue().push_back(item);
        self
    }

    /// Every request received so far, oldest first
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Replies still waiting in the queue
    pub fn remaining(&self) -> usize {
        self.lock_queue().len()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<std::result::Result<ProviderReply, ProviderError>>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, request: &GenerateRequest) -> std::result::Result<ProviderReply, ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if let Some(next) = self.lock_queue().pop_front() {
            return next;
        }

        match &self.responder {
            Some(responder) => responder(request),
            None => Err(ProviderError::Other("scripted provider has no reply left".into())),
        }
    }
}
