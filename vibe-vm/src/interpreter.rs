//! # Forking interpreter
//!
//! Executes a [`Program`] statement by statement against one conversation.
//! A `Map` first asks for its dimension list on the shared conversation, then
//! runs its body once per element on a forked copy, and finally appends a
//! single summary of every branch result to the parent.
//!
//! Branches may run concurrently (`InterpreterConfig::map_concurrency`), but
//! they go through an order-preserving buffer, so the summary always lists
//! results in input order and the parent is mutated only once.

use crate::attachment;
use crate::conversation::{ChatOptions, Conversation};
use crate::error::{self, Error, Result};
use crate::oracle::{self, OracleClient};
use crate::program::{Command, Map, Program, Statement};
use crate::prompts;
use crate::provider::LlmProvider;
use crate::schema;
use futures_util::future::LocalBoxFuture;
use futures_util::{stream, FutureExt, StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Map branches in flight at once; 1 runs them one after another
    pub map_concurrency: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self { map_concurrency: 1 }
    }
}

pub struct Interpreter<P: LlmProvider> {
    oracle: Arc<OracleClient<P>>,
    config: InterpreterConfig,
}

impl<P: LlmProvider> Interpreter<P> {
    pub fn new(oracle: Arc<OracleClient<P>>) -> Self {
        Self {
            oracle,
            config: InterpreterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// A fresh conversation seeded with the runner instruction
    pub fn conversation(&self) -> Conversation<P> {
        Conversation::new(Arc::clone(&self.oracle), Some(prompts::RUNNER_SYSTEM_PROMPT))
    }

    /// Run `program` from scratch and return the last statement's result
    pub async fn run(&self, program: &Program) -> Result<String> {
        let mut conversation = self.conversation();
        info!(statements = program.len(), depth = program.depth(), "running program");
        self.execute(program, &mut conversation).await
    }

    /// Execute `program` on an existing conversation
    pub fn execute<'a>(
        &'a self,
        program: &'a Program,
        conversation: &'a mut Conversation<P>,
    ) -> LocalBoxFuture<'a, Result<String>> {
        self.execute_at(program, conversation, "")
    }

    fn execute_at<'a>(
        &'a self,
        program: &'a Program,
        conversation: &'a mut Conversation<P>,
        prefix: &'a str,
    ) -> LocalBoxFuture<'a, Result<String>> {
        async move {
            let mut last = String::new();
            for (index, statement) in program.iter().enumerate() {
                let path = if prefix.is_empty() {
                    (index + 1).to_string()
                } else {
                    format!("{}.{}", prefix, index + 1)
                };
                debug!(statement = %path, "executing");

                let outcome = match statement {
                    Statement::Command(command) => self.execute_command(command, conversation).await,
                    Statement::Map(map) => self.execute_map(map, conversation, &path).await,
                };
                last = outcome.map_err(|e| at_statement(e, &path))?;
            }
            Ok(last)
        }
        .boxed_local()
    }

    /// Attach files, resolve tools, and run one exchange
    pub async fn execute_command(&self, command: &Command, conversation: &mut Conversation<P>) -> Result<String> {
        let tools = self.oracle.registry().resolve_all(command.tools())?;
        let attachments = command
            .files()
            .iter()
            .map(|file| attachment::load(file))
            .collect::<Result<Vec<_>>>()?;

        let mut options = ChatOptions::default().with_tools(tools);
        if let Some(schema) = command.response_schema() {
            options = options.with_response_schema(schema.clone());
        }
        conversation.chat(command.prompt(), attachments, options).await
    }

    async fn execute_map(&self, map: &Map, conversation: &mut Conversation<P>, path: &str) -> Result<String> {
        let elements = self.dimension(map, conversation).await?;
        let total = elements.len();
        info!(statement = %path, branches = total, "expanding map");

        let parent = &*conversation;
        let concurrency = self.config.map_concurrency.max(1);
        let results: Vec<(Value, String)> = stream::iter(elements.into_iter().enumerate())
            .map(|(index, element)| {
                let mut branch = parent.fork();
                async move {
                    info!(statement = %path, "map branch {}/{}", index + 1, total);
                    branch.append_user(prompts::branch_context(&element));
                    let result = self.execute_at(&map.body, &mut branch, path).await?;
                    Ok::<_, Error>((element, result))
                }
            })
            .buffered(concurrency)
            .try_collect()
            .await?;

        let summary = prompts::branch_results(&results);
        conversation.append_user(summary.clone());
        Ok(summary)
    }

    /// Produce the map's list, with a single repair exchange when the first
    /// answer has no parseable array
    async fn dimension(&self, map: &Map, conversation: &mut Conversation<P>) -> Result<Vec<Value>> {
        // A schema-constrained dimension may still come back as prose; that
        // reply goes to the repair exchange like any other listless answer
        let listing = match self.execute_command(&map.dimension, conversation).await {
            Ok(text) => text,
            Err(e) => match oracle::malformed_reply(&e) {
                Some(reply) => reply.to_string(),
                None => return Err(e),
            },
        };
        if let Some(elements) = extract_list(&listing) {
            return Ok(elements);
        }

        warn!("no list in the dimension reply, asking for a repair");
        let repair = prompts::repair_json_list(map.dimension.prompt(), &listing);
        let options = ChatOptions::default().with_response_schema(schema::generic_list_schema());
        let repaired = match conversation.chat(&repair, Vec::new(), options).await {
            Ok(text) => text,
            Err(e) => {
                return Err(match oracle::malformed_reply(&e) {
                    Some(reply) => error::list_extraction_failure().with_context("reply", reply),
                    None => e,
                })
            }
        };

        extract_list(&repaired).ok_or_else(|| error::list_extraction_failure().with_context("reply", repaired))
    }
}

/// Parse the text between the first `[` and the last `]` as a JSON array
pub fn extract_list(text: &str) -> Option<Vec<Value>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    match serde_json::from_str(&text[start..=end]) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Tag an error with the innermost statement it came from
fn at_statement(error: Error, path: &str) -> Error {
    if error.context_value("statement").is_some() {
        error
    } else {
        error.with_context("statement", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::program::ProgramBuilder;
    use crate::provider::{
        GenerateRequest, ProviderError, ProviderReply, Role, ScriptedProvider,
    };
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::time::Duration;

    fn interpreter(provider: ScriptedProvider) -> Interpreter<ScriptedProvider> {
        Interpreter::new(Arc::new(OracleClient::new(provider)))
    }

    fn no_tools() -> BTreeSet<String> {
        BTreeSet::new()
    }

    #[test]
    fn test_extract_list_is_lenient() {
        assert_eq!(
            extract_list("Sure! Here you go: [\"a\", \"b\"] Hope that helps."),
            Some(vec![json!("a"), json!("b")])
        );
        assert_eq!(extract_list("```json\n[1, [2, 3]]\n```"), Some(vec![json!(1), json!([2, 3])]));
        assert_eq!(extract_list("no list here"), None);
        assert_eq!(extract_list("] backwards ["), None);
        assert_eq!(extract_list("[not json]"), None);
    }

    #[tokio::test]
    async fn test_empty_program() {
        let interp = interpreter(ScriptedProvider::new());
        assert_eq!(interp.run(&Program::new()).await.unwrap(), "");
        assert_eq!(interp.oracle.provider().request_count(), 0);
    }

    #[tokio::test]
    async fn test_commands_share_one_conversation() {
        let interp = interpreter(ScriptedProvider::new().reply("3").reply("9"));
        let program = ProgramBuilder::new()
            .command(Command::new("pick a number"))
            .command(Command::new("square it"))
            .build();

        assert_eq!(interp.run(&program).await.unwrap(), "9");
        let requests = interp.oracle.provider().requests();
        assert_eq!(requests[1].turns.len(), 3);
        assert_eq!(
            requests[1].system_instruction.as_deref(),
            Some(prompts::RUNNER_SYSTEM_PROMPT)
        );
    }

    #[tokio::test]
    async fn test_map_runs_branch_per_element() {
        let provider = ScriptedProvider::new()
            .reply("[\"Lima\", \"Oslo\"]")
            .reply("Peru")
            .reply("Norway");
        let interp = interpreter(provider);
        let program = ProgramBuilder::new()
            .map("for each capital", no_tools(), Vec::<String>::new(), |body| {
                body.command(Command::new("which country?"))
            })
            .build();

        let mut conversation = interp.conversation();
        let result = interp.execute(&program, &mut conversation).await.unwrap();
        assert_eq!(
            result,
            "Here are the results of the previous instruction:\nLima: Peru\nOslo: Norway\n"
        );

        // dimension pair plus the summary
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.turns()[2].role, Role::User);

        // each branch saw the dimension pair and its own element, never its sibling
        let requests = interp.oracle.provider().requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].turns.len(), 4);
        assert!(requests[2].turns[2].text().ends_with("Oslo"));
        assert!(!requests[2].turns.iter().any(|t| t.text().contains("Peru")));
    }

    #[tokio::test]
    async fn test_exactly_one_repair_exchange() {
        let provider = ScriptedProvider::new()
            .reply("The items are apples and pears.")
            .reply("[\"apples\", \"pears\"]")
            .reply("red")
            .reply("green");
        let interp = interpreter(provider);
        let program = ProgramBuilder::new()
            .map("for each fruit", ["search"], Vec::<String>::new(), |body| {
                body.command(Command::new("what colour?"))
            })
            .build();

        let result = interp.run(&program).await.unwrap();
        assert!(result.contains("apples: red"));
        assert!(result.contains("pears: green"));

        let requests = interp.oracle.provider().requests();
        assert_eq!(requests.len(), 4);
        // the dimension used search, so it was sent without a schema
        assert!(requests[0].response_schema.is_none());
        assert_eq!(requests[1].response_schema, Some(schema::generic_list_schema()));
        assert!(requests[1].tools.is_empty());
    }

    #[tokio::test]
    async fn test_repair_after_schema_violation() {
        let provider = ScriptedProvider::new()
            .reply("apples and pears")
            .reply("[\"apples\", \"pears\"]")
            .reply("red")
            .reply("green");
        let interp = interpreter(provider);
        let program = ProgramBuilder::new()
            .map("for each fruit", no_tools(), Vec::<String>::new(), |body| {
                body.command(Command::new("what colour?"))
            })
            .build();

        let result = interp.run(&program).await.unwrap();
        assert!(result.contains("apples: red"));
        assert!(result.contains("pears: green"));

        let requests = interp.oracle.provider().requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0].response_schema, Some(schema::generic_list_schema()));
        assert_eq!(requests[1].response_schema, Some(schema::generic_list_schema()));
        assert!(requests[1].turns.last().unwrap().text().contains("apples and pears"));
    }

    #[tokio::test]
    async fn test_schema_violation_twice() {
        let provider = ScriptedProvider::new()
            .reply("apples and pears")
            .reply("still prose")
            .reply("never sent");
        let interp = interpreter(provider);
        let program = ProgramBuilder::new()
            .map("for each fruit", no_tools(), Vec::<String>::new(), |body| {
                body.command(Command::new("what colour?"))
            })
            .build();

        let err = interp.run(&program).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ListExtractionFailure);
        assert_eq!(err.context_value("statement"), Some("1"));
        assert_eq!(interp.oracle.provider().remaining(), 1);
    }

    #[tokio::test]
    async fn test_second_list_failure() {
        let provider = ScriptedProvider::new()
            .reply("warmed up")
            .reply("nothing useful")
            .reply("{\"items\": 2}")
            .reply("never sent");
        let interp = interpreter(provider);
        let program = ProgramBuilder::new()
            .command(Command::new("warm up"))
            .map("for each thing", ["search"], Vec::<String>::new(), |body| {
                body.command(Command::new("go"))
            })
            .build();

        let err = interp.run(&program).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ListExtractionFailure);
        assert_eq!(err.message(), "no list produced for this map");
        assert_eq!(err.context_value("statement"), Some("2"));
        assert_eq!(interp.oracle.provider().remaining(), 1);
    }

    #[tokio::test]
    async fn test_repair_reply_not_json() {
        let provider = ScriptedProvider::new()
            .reply("I could not find any.")
            .reply("sorry, still no list");
        let interp = interpreter(provider);
        let program = ProgramBuilder::new()
            .map("for each result", ["search"], Vec::<String>::new(), |body| {
                body.command(Command::new("open it"))
            })
            .build();

        let err = interp.run(&program).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ListExtractionFailure);
        assert_eq!(err.context_value("reply"), Some("sorry, still no list"));
    }

    #[tokio::test]
    async fn test_empty_list_yields_bare_summary() {
        let interp = interpreter(ScriptedProvider::new().reply("[]"));
        let program = ProgramBuilder::new()
            .map("for each unicorn", no_tools(), Vec::<String>::new(), |body| {
                body.command(Command::new("describe it"))
            })
            .build();

        assert_eq!(
            interp.run(&program).await.unwrap(),
            "Here are the results of the previous instruction:\n"
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported() {
        let interp = interpreter(ScriptedProvider::new().reply("unused"));
        let command = Command::new("do magic").with_tools(["teleport"]).unwrap();
        let program = ProgramBuilder::new().command(command).build();

        let err = interp.run(&program).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownCapability);
        assert_eq!(err.context_value("statement"), Some("1"));
        assert_eq!(interp.oracle.provider().request_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_attachment() {
        let interp = interpreter(ScriptedProvider::new().reply("unused"));
        let program = ProgramBuilder::new()
            .command(Command::new("summarize").with_files(vec!["/no/such/report.pdf".to_string()]))
            .build();

        let err = interp.run(&program).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AttachmentError);
    }

    #[tokio::test]
    async fn test_nested_error_path() {
        let provider = ScriptedProvider::new()
            .reply("[\"x\"]")
            .reply("fine")
            .fail(ProviderError::Api {
                status: 400,
                message: "bad request".into(),
            });
        let interp = interpreter(provider);
        let program = ProgramBuilder::new()
            .map("for each letter", no_tools(), Vec::<String>::new(), |body| {
                body.command(Command::new("first"))
                    .command(Command::new("second"))
            })
            .build();

        let err = interp.run(&program).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OracleError);
        assert_eq!(err.context_value("statement"), Some("1.2"));
    }

    /// Replies to branch requests after a delay that shrinks with the
    /// element, so later branches finish first
    struct SlowProvider {
        finished: Mutex<Vec<u64>>,
    }

    impl LlmProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        fn default_model(&self) -> &str {
            "slow-model"
        }

        async fn generate(&self, request: &GenerateRequest) -> std::result::Result<ProviderReply, ProviderError> {
            if request.turns.len() == 1 {
                return Ok(ProviderReply::text("[1, 2, 3, 4]"));
            }
            let context = request.turns[2].text();
            let element: u64 = context
                .rsplit('\n')
                .next()
                .and_then(|n| n.trim().parse().ok())
                .ok_or_else(|| ProviderError::Other(format!("no element in {:?}", context)))?;

            tokio::time::sleep(Duration::from_millis(100 * (5 - element))).await;
            self.finished.lock().unwrap().push(element);
            Ok(ProviderReply::text(format!("done {}", element)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_branches_keep_input_order() {
        let provider = SlowProvider {
            finished: Mutex::new(Vec::new()),
        };
        let interp = Interpreter::new(Arc::new(OracleClient::new(provider)))
            .with_config(InterpreterConfig { map_concurrency: 4 });
        let program = ProgramBuilder::new()
            .map("for each number", no_tools(), Vec::<String>::new(), |body| {
                body.command(Command::new("process it"))
            })
            .build();

        let summary = interp.run(&program).await.unwrap();
        assert_eq!(
            summary,
            "Here are the results of the previous instruction:\n1: done 1\n2: done 2\n3: done 3\n4: done 4\n"
        );
        assert_eq!(*interp.oracle.provider().finished.lock().unwrap(), vec![4, 3, 2, 1]);
    }
}
