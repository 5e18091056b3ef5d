//! Streaming token bridge: one model turn, coalesced into one tool call.
//!
//! A producer task drains the provider's chunk stream into an unbounded
//! queue of [`BridgeItem`]s, forwarding partial output to an optional sink
//! as it goes. The consumer blocks on the queue, merging fragments until a
//! sentinel arrives:
//!
//! - [`BridgeItem::Done`]: the terminal tool's name was seen this turn; the
//!   producer is aborted at once.
//! - [`BridgeItem::StepEnd`]: the turn ended on a non-terminal tool.
//!
//! A queue that closes without a sentinel means the producer died, which
//! surfaces as `ProviderError::StreamInterrupted`. The bridge has no timeout
//! of its own; the loop bounds each streamed turn.

use talk2sql_core::error::ProviderError;
use talk2sql_core::provider::{ChunkReceiver, ProposalRequest, Provider, ToolCallDelta};
use talk2sql_core::tool::ToolCall;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::stream_event::AgentStreamEvent;

/// One entry on the bridge queue.
#[derive(Debug, Clone)]
pub enum BridgeItem {
    /// A fragment of the in-progress tool call.
    Fragment(ToolCallDelta),
    /// End of a turn whose tool is not terminal.
    StepEnd,
    /// End of a turn that proposed the terminal tool.
    Done,
    /// The provider stream failed.
    Failed(ProviderError),
}

/// How a coalesced turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEnd {
    StepEnd,
    Done,
}

/// A tool call being assembled from fragments.
#[derive(Debug, Clone, Default)]
pub struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
    index: Option<u32>,
    fragments: usize,
}

impl PartialToolCall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment. The id is set once; name and argument text are
    /// appended in arrival order. Fragments of a second call in the same
    /// turn are dropped.
    pub fn merge(&mut self, delta: ToolCallDelta) {
        match self.index {
            None => self.index = Some(delta.index),
            Some(index) if index != delta.index => {
                warn!(
                    index = delta.index,
                    kept = index,
                    "Dropping fragment of an extra tool call"
                );
                return;
            }
            Some(_) => {}
        }

        if self.id.is_none() {
            self.id = delta.id.filter(|id| !id.is_empty());
        }
        if let Some(name) = delta.name {
            self.name.push_str(&name);
        }
        self.arguments.push_str(&delta.arguments);
        self.fragments += 1;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments_text(&self) -> &str {
        &self.arguments
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    /// Finish the call. `fallback_id` is used when the provider sent none.
    pub fn into_tool_call(self, fallback_id: String) -> Result<ToolCall, ProviderError> {
        if self.fragments == 0 || self.name.is_empty() {
            return Err(ProviderError::NoToolCall(
                "stream ended without a tool call".into(),
            ));
        }
        Ok(ToolCall {
            id: self.id.unwrap_or(fallback_id),
            arguments: ToolCall::parse_arguments(&self.arguments),
            name: self.name,
        })
    }
}

/// Aborts the producer task when dropped (turn timeout or early return).
struct ProducerGuard(JoinHandle<()>);

impl ProducerGuard {
    fn abort(&self) {
        self.0.abort();
    }
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Start the producer for one turn.
pub fn spawn_producer(
    chunks: ChunkReceiver,
    terminal_tool: String,
    sink: Option<UnboundedSender<AgentStreamEvent>>,
) -> (JoinHandle<()>, UnboundedReceiver<BridgeItem>) {
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(produce(chunks, queue_tx, terminal_tool, sink));
    (handle, queue_rx)
}

async fn produce(
    mut chunks: ChunkReceiver,
    queue: UnboundedSender<BridgeItem>,
    terminal_tool: String,
    sink: Option<UnboundedSender<AgentStreamEvent>>,
) {
    // Name of the first call in this turn, as assembled so far
    let mut name = String::new();
    let mut first_index = None;

    while let Some(item) = chunks.recv().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = queue.send(BridgeItem::Failed(e));
                return;
            }
        };

        if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
            forward(&sink, text);
        }

        if let Some(delta) = chunk.tool_call {
            if *first_index.get_or_insert(delta.index) == delta.index {
                if let Some(part) = &delta.name {
                    name.push_str(part);
                }
            }
            if !delta.arguments.is_empty() {
                forward(&sink, delta.arguments.clone());
            }
            if queue.send(BridgeItem::Fragment(delta)).is_err() {
                return; // consumer gone
            }
        } else {
            trace!("Chunk without tool-call fragment");
        }

        if chunk.done {
            break;
        }
    }

    // End of the provider stream also ends the turn
    let sentinel = if name == terminal_tool {
        BridgeItem::Done
    } else {
        BridgeItem::StepEnd
    };
    let _ = queue.send(sentinel);
}

fn forward(sink: &Option<UnboundedSender<AgentStreamEvent>>, content: String) {
    if let Some(sink) = sink {
        let _ = sink.send(AgentStreamEvent::Chunk { content });
    }
}

/// Block on the queue until a sentinel, merging fragments in order.
pub async fn coalesce(
    queue: &mut UnboundedReceiver<BridgeItem>,
) -> Result<(PartialToolCall, TurnEnd), ProviderError> {
    let mut partial = PartialToolCall::new();
    loop {
        match queue.recv().await {
            Some(BridgeItem::Fragment(delta)) => partial.merge(delta),
            Some(BridgeItem::StepEnd) => return Ok((partial, TurnEnd::StepEnd)),
            Some(BridgeItem::Done) => return Ok((partial, TurnEnd::Done)),
            Some(BridgeItem::Failed(e)) => return Err(e),
            None => {
                return Err(ProviderError::StreamInterrupted(
                    "bridge queue closed before end of turn".into(),
                ));
            }
        }
    }
}

/// Run one streamed model turn and return its single tool call.
pub async fn propose_streaming(
    provider: &dyn Provider,
    request: &ProposalRequest,
    terminal_tool: &str,
    sink: Option<UnboundedSender<AgentStreamEvent>>,
    iteration: u32,
) -> Result<ToolCall, ProviderError> {
    let chunks = provider.stream(request).await?;
    let (handle, mut queue) = spawn_producer(chunks, terminal_tool.to_string(), sink);
    let producer = ProducerGuard(handle);

    let (partial, end) = coalesce(&mut queue).await?;
    if end == TurnEnd::Done {
        producer.abort();
    }

    debug!(
        iteration,
        fragments = partial.fragment_count(),
        terminal = end == TurnEnd::Done,
        "Coalesced streamed tool call"
    );
    partial.into_tool_call(format!("call_{iteration}"))
}
