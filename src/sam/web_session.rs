//! Streaming web adapter.
//!
//! Bridges an agent run to a streaming UI protocol: the run's lifecycle
//! events are filtered to one `session_id` and queued into a bounded
//! channel the caller drains as an async stream. After the provider
//! returns the full text, the adapter *simulates* delta streaming by
//! chunking it into `agent.delta` events before the terminal
//! `agent.message` (a real streaming provider would publish its
//! incremental tokens directly instead).
//!
//! Temporary subscriptions are always removed when the run ends — success
//! or failure — so no handler leaks across runs. The runner's error is
//! surfaced from [`RunStream::finish`] after the stream drains.
//!
//! # Example
//!
//! ```rust,no_run
//! use sam::context::RequestContext;
//! use sam::web_session::{run_with_events, StreamConfig};
//! # async fn demo(agent: std::sync::Arc<sam::agent::SamAgent>) {
//! let ctx = RequestContext::new("alice");
//! let mut stream = run_with_events(agent, "hello", "sess-1", ctx, StreamConfig::default()).await;
//! while let Some(event) = stream.next_event().await {
//!     println!("{}: {}", event.event, event.payload);
//! }
//! let reply = stream.finish().await.unwrap();
//! # let _ = reply;
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::agent::{AgentError, SamAgent};
use crate::context::RequestContext;
use crate::event_bus::{names, EventHandler, HandlerError};

/// One event observed during a run.
#[derive(Debug, Clone)]
pub struct RunEvent {
    /// Canonical event name (see [`names`]).
    pub event: String,
    /// The published payload.
    pub payload: Value,
}

/// Tunables for the simulated delta stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Characters per `agent.delta` chunk.
    pub chunk_size: usize,
    /// Pause between chunks.
    pub chunk_delay: Duration,
    /// Bound of the event queue; publishers wait when the consumer lags.
    pub queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            chunk_delay: Duration::from_millis(30),
            queue_capacity: 256,
        }
    }
}

/// Temporary subscriber forwarding one session's events into the queue.
struct QueueHandler {
    session_id: String,
    tx: mpsc::Sender<RunEvent>,
}

#[async_trait]
impl EventHandler for QueueHandler {
    async fn on_event(&self, event: &str, payload: &Value) -> Result<(), HandlerError> {
        let matches = payload
            .get("session_id")
            .and_then(Value::as_str)
            .map(|sid| sid == self.session_id)
            .unwrap_or(false);
        if matches {
            // A closed receiver just means the consumer went away early;
            // the run keeps going.
            let _ = self
                .tx
                .send(RunEvent {
                    event: event.to_string(),
                    payload: payload.clone(),
                })
                .await;
        }
        Ok(())
    }
}

/// Handle on a streaming run: an event queue plus the runner task.
pub struct RunStream {
    rx: mpsc::Receiver<RunEvent>,
    task: JoinHandle<Result<String, AgentError>>,
}

impl RunStream {
    /// Next queued event; `None` once the run is over and the queue
    /// drained.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    /// Wait for the runner and return its result. Call after draining the
    /// stream; any run error re-raises here.
    pub async fn finish(self) -> Result<String, AgentError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(AgentError::Provider(format!("runner task failed: {}", e))),
        }
    }

    /// Adapt the queue into a [`tokio_stream::Stream`] (e.g. for SSE),
    /// plus the runner handle for the final result.
    pub fn into_parts(self) -> (ReceiverStream<RunEvent>, JoinHandle<Result<String, AgentError>>) {
        (ReceiverStream::new(self.rx), self.task)
    }
}

/// Split text into chunks of at most `chunk_size` characters, respecting
/// char boundaries.
fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if current.chars().count() >= chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Launch a run and stream its events for `session_id`.
///
/// The run itself executes with `publish_final_event=false`; the adapter
/// publishes the `agent.delta` chunks and the terminal `agent.message`
/// (carrying a session-stats snapshot) once the text is known.
pub async fn run_with_events(
    agent: Arc<SamAgent>,
    prompt: impl Into<String>,
    session_id: impl Into<String>,
    ctx: RequestContext,
    config: StreamConfig,
) -> RunStream {
    let prompt = prompt.into();
    let session_id = session_id.into();
    let bus = agent.bus().clone();

    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let handler: Arc<dyn EventHandler> = Arc::new(QueueHandler {
        session_id: session_id.clone(),
        tx,
    });

    for event in names::ALL {
        bus.subscribe(event, Arc::clone(&handler)).await;
    }

    let task = tokio::spawn(async move {
        let result = agent.run(&prompt, &session_id, &ctx, false).await;

        if let Ok(text) = &result {
            for chunk in chunk_text(text, config.chunk_size.max(1)) {
                agent.publish_delta(&session_id, &ctx.user_id, &chunk).await;
                tokio::time::sleep(config.chunk_delay).await;
            }
            agent.publish_message(&session_id, &ctx.user_id, text).await;
        }

        // No subscriber leaks across runs, on either path.
        for event in names::ALL {
            bus.unsubscribe(event, &handler).await;
        }
        drop(handler);

        result
    });

    RunStream { rx, task }
}

/// Convenience helper for single-turn, non-streaming runs.
pub async fn run_once(
    agent: &SamAgent,
    prompt: &str,
    session_id: &str,
    ctx: &RequestContext,
) -> Result<String, AgentError> {
    agent.run(prompt, session_id, ctx, true).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_text_respects_char_boundaries() {
        let chunks = chunk_text("héllo wörld, this is sam", 5);
        assert!(chunks.iter().all(|c| c.chars().count() <= 5));
        assert_eq!(chunks.concat(), "héllo wörld, this is sam");
    }

    #[test]
    fn test_chunk_text_empty() {
        assert!(chunk_text("", 20).is_empty());
    }
}
