//! The tool invocation loop implementation.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use talk2sql_core::error::{Error, ProviderError, Result};
use talk2sql_core::event::{DomainEvent, EventBus};
use talk2sql_core::history::HistoryStore;
use talk2sql_core::message::{ConversationId, Message};
use talk2sql_core::provider::{ProposalRequest, Provider};
use talk2sql_core::scratchpad::Scratchpad;
use talk2sql_core::tool::{ExecutionContext, Observation, ToolRegistry};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::bridge;
use crate::stream_event::AgentStreamEvent;

/// Answer returned when the iteration cap is hit.
pub const FALLBACK_ANSWER: &str = "No answer found";

/// How a loop run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopResult {
    /// The terminal tool was called; its arguments, verbatim.
    Answered { payload: Value },
    /// `max_iterations` ran out first.
    Exhausted,
}

impl LoopResult {
    /// `{"answer": "No answer found", "tools_used": []}`
    pub fn fallback_payload() -> Value {
        serde_json::json!({ "answer": FALLBACK_ANSWER, "tools_used": [] })
    }

    /// The caller-facing payload.
    pub fn payload(&self) -> Value {
        match self {
            LoopResult::Answered { payload } => payload.clone(),
            LoopResult::Exhausted => Self::fallback_payload(),
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, LoopResult::Answered { .. })
    }

    /// The natural-language answer text.
    pub fn answer(&self) -> String {
        match self {
            LoopResult::Answered { payload } => match &payload["answer"] {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            },
            LoopResult::Exhausted => FALLBACK_ANSWER.to_string(),
        }
    }
}

/// Everything one run of the loop produced.
#[derive(Debug)]
pub struct LoopRun {
    pub result: LoopResult,
    pub scratchpad: Scratchpad,
    pub context: ExecutionContext,
}

impl LoopRun {
    pub fn iterations(&self) -> u32 {
        self.scratchpad.len() as u32
    }
}

/// The caller-facing outcome of `invoke`.
#[derive(Debug)]
pub struct InvokeOutcome {
    pub result: LoopResult,
    pub iterations: u32,
    pub context: ExecutionContext,
}

impl From<LoopRun> for InvokeOutcome {
    fn from(run: LoopRun) -> Self {
        Self {
            iterations: run.iterations(),
            result: run.result,
            context: run.context,
        }
    }
}

/// How each iteration gets its proposal.
#[derive(Clone, Copy)]
enum ProposalMode<'a> {
    /// Await the provider's complete response.
    Complete,
    /// Stream the turn through the bridge.
    Streaming {
        sink: Option<&'a UnboundedSender<AgentStreamEvent>>,
    },
}

impl<'a> ProposalMode<'a> {
    fn sink(self) -> Option<&'a UnboundedSender<AgentStreamEvent>> {
        match self {
            ProposalMode::Complete => None,
            ProposalMode::Streaming { sink } => sink,
        }
    }
}

/// Drives the model through propose → execute → observe cycles.
///
/// One executor serves any number of concurrent invocations: every
/// invocation gets its own scratchpad, counter and `ExecutionContext`, and
/// the registry is only read.
pub struct AgentExecutor {
    /// The model provider
    provider: Arc<dyn Provider>,

    /// Durable chat history
    history: Arc<dyn HistoryStore>,

    /// Hard cap on iterations per invocation
    max_iterations: u32,

    /// Upper bound on one streamed model turn
    iteration_timeout: Duration,

    /// Event bus for domain events
    event_bus: Arc<EventBus>,
}

impl AgentExecutor {
    pub fn new(provider: Arc<dyn Provider>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            provider,
            history,
            max_iterations: 5,
            iteration_timeout: Duration::from_secs(120),
            event_bus: Arc::new(EventBus::default()),
        }
    }

    /// Set the maximum number of loop iterations.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Bound each streamed model turn.
    pub fn with_iteration_timeout(mut self, timeout: Duration) -> Self {
        self.iteration_timeout = timeout;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run the loop without touching history.
    pub async fn run(
        &self,
        tools: &ToolRegistry,
        schema_context: &str,
        user_input: &str,
        history: &[Message],
    ) -> Result<LoopRun> {
        let ctx = ExecutionContext::new();
        self.drive(tools, ctx, schema_context, user_input, history, ProposalMode::Complete)
            .await
            .inspect_err(|e| self.report("run", e))
    }

    /// Streaming twin of [`run`](Self::run).
    pub async fn run_streaming(
        &self,
        tools: &ToolRegistry,
        schema_context: &str,
        user_input: &str,
        history: &[Message],
        sink: Option<UnboundedSender<AgentStreamEvent>>,
    ) -> Result<LoopRun> {
        let mode = ProposalMode::Streaming { sink: sink.as_ref() };
        let result = self
            .drive(tools, ExecutionContext::new(), schema_context, user_input, history, mode)
            .await;
        self.finish_stream(None, &result, sink.as_ref());
        result.inspect_err(|e| self.report("run_streaming", e))
    }

    /// Load history, run the loop, and append the exchange.
    ///
    /// Exactly one human and one assistant message are appended per call,
    /// and only once the loop has terminated. Nothing is appended on error.
    pub async fn invoke(
        &self,
        tools: &ToolRegistry,
        conversation_id: &ConversationId,
        schema_context: &str,
        user_input: &str,
    ) -> Result<InvokeOutcome> {
        let run = self
            .invoke_inner(tools, conversation_id, schema_context, user_input, ProposalMode::Complete)
            .await
            .inspect_err(|e| self.report("invoke", e))?;
        Ok(run.into())
    }

    /// Streaming twin of [`invoke`](Self::invoke).
    ///
    /// The `done` event is sent after the exchange was appended.
    pub async fn invoke_streaming(
        &self,
        tools: &ToolRegistry,
        conversation_id: &ConversationId,
        schema_context: &str,
        user_input: &str,
        sink: Option<UnboundedSender<AgentStreamEvent>>,
    ) -> Result<InvokeOutcome> {
        let mode = ProposalMode::Streaming { sink: sink.as_ref() };
        let result = self
            .invoke_inner(tools, conversation_id, schema_context, user_input, mode)
            .await;
        self.finish_stream(Some(conversation_id), &result, sink.as_ref());
        let run = result.inspect_err(|e| self.report("invoke_streaming", e))?;
        Ok(run.into())
    }

    async fn invoke_inner(
        &self,
        tools: &ToolRegistry,
        conversation_id: &ConversationId,
        schema_context: &str,
        user_input: &str,
        mode: ProposalMode<'_>,
    ) -> Result<LoopRun> {
        info!(conversation_id = %conversation_id, "Invoking tool loop");

        let history = self.history.load(conversation_id).await?;
        let ctx = ExecutionContext::for_conversation(conversation_id.clone());
        let run = self
            .drive(tools, ctx, schema_context, user_input, &history, mode)
            .await?;

        self.persist(conversation_id, user_input, &run).await?;
        Ok(run)
    }

    /// Append the (question, final payload) pair in one call.
    async fn persist(
        &self,
        conversation_id: &ConversationId,
        user_input: &str,
        run: &LoopRun,
    ) -> Result<()> {
        let mut assistant = Message::assistant(serde_json::to_string(&run.result.payload())?);
        if let Some(query) = &run.context.last_query {
            assistant = assistant.with_metadata("query", Value::String(query.clone()));
        }
        if let Some(result) = &run.context.last_result {
            assistant = assistant.with_metadata("result", serde_json::to_value(result)?);
        }

        self.history
            .append(conversation_id, vec![Message::human(user_input), assistant])
            .await?;
        debug!(conversation_id = %conversation_id, "Exchange appended to history");
        Ok(())
    }

    /// The loop proper.
    async fn drive(
        &self,
        tools: &ToolRegistry,
        mut ctx: ExecutionContext,
        schema_context: &str,
        user_input: &str,
        history: &[Message],
        mode: ProposalMode<'_>,
    ) -> Result<LoopRun> {
        let terminal = tools
            .terminal_name()
            .ok_or_else(|| Error::Config {
                message: "tool registry has no terminal tool".into(),
            })?
            .to_string();

        let conversation_id = ctx.conversation_id.as_ref().map(|c| c.to_string());
        let definitions = tools.definitions();
        let mut scratchpad = Scratchpad::new();
        let mut answer = None;
        let mut seen_ids = HashSet::new();

        for iteration in 1..=self.max_iterations {
            debug!(
                conversation_id = conversation_id.as_deref().unwrap_or("-"),
                iteration,
                "Loop iteration"
            );

            let request = ProposalRequest {
                schema_context: schema_context.to_string(),
                user_input: user_input.to_string(),
                history: history.to_vec(),
                scratchpad: scratchpad.entries().to_vec(),
                tools: definitions.clone(),
            };

            let mut call = match mode {
                ProposalMode::Complete => self.provider.propose(&request).await?,
                ProposalMode::Streaming { sink } => {
                    let turn = bridge::propose_streaming(
                        self.provider.as_ref(),
                        &request,
                        &terminal,
                        sink.cloned(),
                        iteration,
                    );
                    tokio::time::timeout(self.iteration_timeout, turn)
                        .await
                        .map_err(|_| {
                            ProviderError::Timeout(format!(
                                "model turn {iteration} exceeded {}s",
                                self.iteration_timeout.as_secs()
                            ))
                        })??
                }
            };

            // Observations are matched to proposals by id
            if call.id.is_empty() || seen_ids.contains(&call.id) {
                let id = fallback_call_id(iteration, &seen_ids);
                debug!(
                    iteration,
                    original = %call.id,
                    id = %id,
                    "Replacing missing or repeated call id"
                );
                call.id = id;
            }
            seen_ids.insert(call.id.clone());

            // Unknown tools are fatal: nothing is recorded for this turn
            let tool = tools.resolve(&call.name)?;

            emit(
                mode.sink(),
                AgentStreamEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                },
            );

            let start = Instant::now();
            let observation = match tool.execute(call.arguments.clone(), &mut ctx).await {
                Ok(observation) => observation,
                Err(e) => {
                    warn!(tool = %call.name, iteration, error = %e, "Tool execution failed");
                    Observation::failure(&e)
                }
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            debug!(
                tool = %call.name,
                iteration,
                success = observation.success,
                duration_ms,
                "Tool executed"
            );
            self.event_bus.publish(DomainEvent::ToolExecuted {
                conversation_id: conversation_id.clone(),
                iteration,
                tool_name: call.name.clone(),
                success: observation.success,
                duration_ms,
                timestamp: Utc::now(),
            });
            emit(
                mode.sink(),
                AgentStreamEvent::ToolResult {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    output: observation.output.clone(),
                    success: observation.success,
                },
            );

            let is_terminal = tools.is_terminal(&call.name);
            if is_terminal {
                answer = Some(call.arguments.clone());
            }
            scratchpad.push(call, observation);
            if is_terminal {
                break;
            }
        }

        let result = match answer {
            Some(payload) => LoopResult::Answered { payload },
            None => {
                warn!(
                    conversation_id = conversation_id.as_deref().unwrap_or("-"),
                    max_iterations = self.max_iterations,
                    "Iteration cap reached without a final answer"
                );
                LoopResult::Exhausted
            }
        };

        info!(
            conversation_id = conversation_id.as_deref().unwrap_or("-"),
            iterations = scratchpad.len(),
            answered = result.is_answered(),
            "Tool loop finished"
        );
        self.event_bus.publish(DomainEvent::LoopFinished {
            conversation_id,
            iterations: scratchpad.len() as u32,
            answered: result.is_answered(),
            timestamp: Utc::now(),
        });

        Ok(LoopRun {
            result,
            scratchpad,
            context: ctx,
        })
    }

    /// Send the closing `done` or `error` event of a streamed run.
    fn finish_stream(
        &self,
        conversation_id: Option<&ConversationId>,
        result: &Result<LoopRun>,
        sink: Option<&UnboundedSender<AgentStreamEvent>>,
    ) {
        let event = match result {
            Ok(run) => AgentStreamEvent::Done {
                conversation_id: conversation_id.map(|c| c.to_string()),
                iterations: run.iterations(),
                answered: run.result.is_answered(),
                payload: run.result.payload(),
            },
            Err(e) => AgentStreamEvent::Error {
                message: e.to_string(),
            },
        };
        emit(sink, event);
    }

    fn report(&self, context: &str, error: &Error) {
        warn!(context, error = %error, "Tool loop failed");
        self.event_bus.publish(DomainEvent::ErrorOccurred {
            context: context.to_string(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}

fn fallback_call_id(iteration: u32, seen: &HashSet<String>) -> String {
    let mut id = format!("call_{iteration}");
    while seen.contains(&id) {
        id.push('_');
    }
    id
}

fn emit(sink: Option<&UnboundedSender<AgentStreamEvent>>, event: AgentStreamEvent) {
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}
