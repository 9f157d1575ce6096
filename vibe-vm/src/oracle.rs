//! # Oracle client
//!
//! Wraps an [`LlmProvider`] with everything an exchange needs beyond the raw
//! request: rate-limit retries with backoff, the transcript mirror,
//! cancellation, and the local function-call loop for tools executed on this
//! machine. Both the compiler and the interpreter talk to the model only
//! through [`OracleClient::exchange`].

use crate::error::{self, Error, ErrorKind, ErrorStatus, Result};
use crate::provider::{GenerateRequest, LlmProvider, Part, ProviderError, ProviderReply, Role, Turn};
use crate::tools::ToolRegistry;
use crate::transcript::{Direction, Transcript};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on local function-call round trips inside one exchange
pub const MAX_LOCAL_ROUNDS: usize = 8;

/// When and how often rate-limited requests are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based). The service's hint wins.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        hint.unwrap_or_else(|| self.base_delay.saturating_mul(2u32.saturating_pow(attempt)))
    }
}

/// Shared, retrying front end to a provider
pub struct OracleClient<P: LlmProvider> {
    provider: P,
    model: String,
    retry: RetryPolicy,
    transcript: Option<Transcript>,
    cancel: CancellationToken,
    registry: ToolRegistry,
}

impl<P: LlmProvider> OracleClient<P> {
    pub fn new(provider: P) -> Self {
        let model = provider.default_model().to_string();
        Self {
            provider,
            model,
            retry: RetryPolicy::default(),
            transcript: None,
            cancel: CancellationToken::new(),
            registry: ToolRegistry::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one logical exchange and return the reply text.
    ///
    /// Local function calls are answered and the request re-sent on a
    /// scratch copy; the caller's history never sees those turns. When the
    /// request carries a response schema the text must parse as JSON.
    pub async fn exchange(&self, request: GenerateRequest) -> Result<String> {
        let mut request = request;

        for round in 0..=MAX_LOCAL_ROUNDS {
            let reply = self.send(&request).await?;
            if reply.function_calls.is_empty() {
                return finish(reply, request.response_schema.is_some());
            }
            if round == MAX_LOCAL_ROUNDS {
                break;
            }

            debug!(round, calls = reply.function_calls.len(), "answering local function calls");
            let mut responses = Vec::with_capacity(reply.function_calls.len());
            for call in &reply.function_calls {
                let response = self
                    .registry
                    .call_local(call)
                    .map_err(|e| e.with_operation("oracle::exchange"))?;
                responses.push(Part::FunctionResponse {
                    name: call.name.clone(),
                    response,
                });
            }
            let calls = reply
                .function_calls
                .into_iter()
                .map(Part::FunctionCall)
                .collect();
            request.turns.push(Turn::with_parts(Role::Model, calls));
            request.turns.push(Turn::with_parts(Role::User, responses));
        }

        Err(error::oracle_error(format!(
            "model still calling local tools after {} rounds",
            MAX_LOCAL_ROUNDS
        ))
        .with_operation("oracle::exchange"))
    }

    /// Send one request, retrying rate limits
    async fn send(&self, request: &GenerateRequest) -> Result<ProviderReply> {
        let payload = serde_json::to_string_pretty(request)
            .map_err(|e| error::serialization_error(format!("failed to encode request: {}", e)))?;
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(error::cancelled().with_operation("oracle::send"));
            }
            self.record(Direction::Outbound, &payload);
            debug!(model = %self.model, turns = request.turns.len(), attempt, "sending request");

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(error::cancelled().with_operation("oracle::send"));
                }
                outcome = self.provider.generate(request) => outcome,
            };

            match outcome {
                Ok(reply) => {
                    self.record(Direction::Inbound, &reply.raw);
                    return Ok(reply);
                }
                Err(ProviderError::RateLimited { retry_after, body }) => {
                    self.record(Direction::Inbound, &body);
                    if attempt >= self.retry.max_retries {
                        return Err(error::oracle_error(format!(
                            "still rate limited after {} retries: {}",
                            self.retry.max_retries, body
                        ))
                        .with_status(ErrorStatus::Persistent)
                        .with_operation("oracle::send")
                        .with_context("provider", self.provider.name())
                        .with_context("attempts", (attempt + 1).to_string()));
                    }

                    let delay = self.retry.delay_for(attempt, retry_after);
                    warn!(
                        attempt = attempt + 1,
                        max = self.retry.max_retries,
                        delay_secs = delay.as_secs_f64(),
                        "rate limited, backing off"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            return Err(error::cancelled().with_operation("oracle::send"));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    self.record(Direction::Inbound, &e.to_string());
                    return Err(error::oracle_error(e.to_string())
                        .with_operation("oracle::send")
                        .with_context("provider", self.provider.name())
                        .set_source(e));
                }
            }
        }
    }

    fn record(&self, direction: Direction, body: &str) {
        if let Some(transcript) = &self.transcript {
            if let Err(e) = transcript.append(direction, body) {
                warn!(error = %e, "failed to write transcript record");
            }
        }
    }
}

/// The offending text when `error` is a reply that ignored its response
/// schema, so callers can turn it into their own failure kind
pub fn malformed_reply(error: &Error) -> Option<&str> {
    if error.kind() == ErrorKind::OracleError {
        error.context_value("reply")
    } else {
        None
    }
}

fn finish(reply: ProviderReply, expects_json: bool) -> Result<String> {
    let text = reply.text.ok_or_else(|| {
        error::oracle_error("reply contained no text").with_operation("oracle::exchange")
    })?;
    if expects_json {
        if let Err(e) = serde_json::from_str::<serde_json::Value>(&text) {
            return Err(error::oracle_error(format!("reply is not the requested JSON: {}", e))
                .with_operation("oracle::exchange")
                .with_context("reply", text));
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FunctionCall, ScriptedProvider};
    use crate::transcript::MemoryTranscript;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn rate_limited(hint: Option<Duration>) -> ProviderError {
        ProviderError::RateLimited {
            retry_after: hint,
            body: "{\"error\":{\"code\":429}}".into(),
        }
    }

    fn request(text: &str) -> GenerateRequest {
        GenerateRequest::new("scripted-model", vec![Turn::user(text)])
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..5).map(|a| policy.delay_for(a, None).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert_eq!(
            policy.delay_for(3, Some(Duration::from_millis(1500))),
            Duration::from_millis(1500)
        );
    }

    #[tokio::test]
    async fn test_plain_exchange() {
        let client = OracleClient::new(ScriptedProvider::new().reply("42"));
        let text = tokio_test::assert_ok!(client.exchange(request("answer")).await);
        assert_eq!(text, "42");
        assert_eq!(client.provider().request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_exponential_backoff() {
        let provider = ScriptedProvider::new()
            .fail(rate_limited(None))
            .fail(rate_limited(None))
            .reply("finally");
        let client = OracleClient::new(provider);

        let start = Instant::now();
        let text = client.exchange(request("q")).await.unwrap();
        assert_eq!(text, "finally");
        assert_eq!(client.provider().request_count(), 3);
        // 1s + 2s
        assert_eq!(start.elapsed().as_secs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_hint_wins() {
        let provider = ScriptedProvider::new()
            .fail(rate_limited(Some(Duration::from_secs(7))))
            .reply("ok");
        let client = OracleClient::new(provider);

        let start = Instant::now();
        client.exchange(request("q")).await.unwrap();
        assert_eq!(start.elapsed().as_secs(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let mut provider = ScriptedProvider::new();
        for _ in 0..6 {
            provider = provider.fail(rate_limited(None));
        }
        provider = provider.reply("never reached");
        let client = OracleClient::new(provider);

        let start = Instant::now();
        let err = client.exchange(request("q")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OracleError);
        assert_eq!(err.status(), ErrorStatus::Persistent);
        assert!(err.message().contains("429"));
        assert_eq!(client.provider().request_count(), 6);
        assert_eq!(client.provider().remaining(), 1);
        assert_eq!(start.elapsed().as_secs(), 1 + 2 + 4 + 8 + 16);
    }

    #[tokio::test]
    async fn test_other_failures_are_not_retried() {
        let provider = ScriptedProvider::new()
            .fail(ProviderError::Api {
                status: 500,
                message: "boom".into(),
            })
            .reply("unused");
        let client = OracleClient::new(provider);

        let err = client.exchange(request("q")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OracleError);
        assert_eq!(client.provider().request_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let cancel = CancellationToken::new();
        let client = OracleClient::new(ScriptedProvider::new().reply("x")).with_cancellation(cancel.clone());
        cancel.cancel();

        let err = client.exchange(request("q")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(client.provider().request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let provider = ScriptedProvider::new()
            .fail(rate_limited(Some(Duration::from_secs(60))))
            .reply("late");
        let client = OracleClient::new(provider).with_cancellation(cancel.clone());

        let trigger = cancel.clone();
        let (result, _) = tokio::join!(client.exchange(request("q")), async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
        assert_eq!(client.provider().request_count(), 1);
    }

    #[tokio::test]
    async fn test_schema_requires_json() {
        let client = OracleClient::new(ScriptedProvider::new().reply("not json").reply("[\"a\"]"));

        let err = client
            .exchange(request("q").with_response_schema(json!({"type": "array"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OracleError);
        assert_eq!(malformed_reply(&err), Some("not json"));

        let ok = client
            .exchange(request("q").with_response_schema(json!({"type": "array"})))
            .await
            .unwrap();
        assert_eq!(ok, "[\"a\"]");
    }

    #[tokio::test]
    async fn test_transcript_mirrors_exchange() {
        let transcript = MemoryTranscript::new();
        let client = OracleClient::new(ScriptedProvider::new().reply("pong"))
            .with_transcript(Arc::new(transcript.clone()));

        client.exchange(request("ping")).await.unwrap();

        let records = transcript.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, Direction::Outbound);
        assert!(records[0].1.contains("ping"));
        assert_eq!(records[1], (Direction::Inbound, "pong".to_string()));
    }

    #[tokio::test]
    async fn test_local_function_loop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("todo.txt"), "water plants").unwrap();

        let provider = ScriptedProvider::new()
            .reply_with(ProviderReply::function_calls(vec![FunctionCall {
                name: "ReadFile".into(),
                args: json!({"path": "todo.txt"}),
            }]))
            .reply("You need to water the plants.");
        let client = OracleClient::new(provider).with_registry(ToolRegistry::with_root(dir.path()));

        let text = client.exchange(request("what is on my list?")).await.unwrap();
        assert_eq!(text, "You need to water the plants.");

        let requests = client.provider().requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].turns.len(), 1);
        assert_eq!(requests[1].turns.len(), 3);
        match &requests[1].turns[2].parts[0] {
            Part::FunctionResponse { response, .. } => assert_eq!(response["content"], "water plants"),
            other => panic!("expected function response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_function_loop_is_bounded() {
        let looping = ScriptedProvider::with_responder(|_| {
            Ok(ProviderReply::function_calls(vec![FunctionCall {
                name: "ReadFile".into(),
                args: json!({"path": "missing.txt"}),
            }]))
        });
        let client = OracleClient::new(looping);

        let err = client.exchange(request("loop forever")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OracleError);
        assert_eq!(client.provider().request_count(), MAX_LOCAL_ROUNDS + 1);
    }
}
