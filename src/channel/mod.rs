//! Polling request/response bridge between the host and archived page content
//!
//! The only channel to a sandboxed page is "evaluate this script and return
//! its value", initiated by the host — yet requests conceptually originate
//! from the page. The bridge inverts the direction: the host repeatedly
//! evaluates an advance call against the page-side counterpart, delivering
//! the previous request's response (or `null` on the opening poll) and
//! receiving the next pending request in the same round trip. Requests are
//! handled strictly one at a time, in the order the page produced them.

use crate::surface::{BrowsingSurface, SurfaceError};
use crate::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Page-side global object the host polls
const BRIDGE_BINDING: &str = "window.__ambryBridge";

/// Handles a single page-originated request
///
/// The handler resolves to exactly one of a success payload (`Ok`) or a
/// failure payload (`Err`); either way the outcome travels back to the page
/// in the next advance call.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: Value) -> BoxFuture<'_, Result<Value, Value>>;
}

/// Response delivered to the page with the next advance call
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum ChannelReply {
    Data(Value),
    Error(Value),
}

/// Host side of the polling bridge
///
/// One instance per browsing surface. `run` drives one polling loop; each
/// call supersedes any loop still in flight (a new qualifying page load must
/// discard old channel state, never interleave with it), which the
/// generation counter enforces by state rather than convention.
pub struct MessageChannel {
    surface: Arc<dyn BrowsingSurface>,
    handler: Mutex<Option<Arc<dyn RequestHandler>>>,
    generation: AtomicU64,
}

impl MessageChannel {
    /// Creates a channel over the given surface, with no handler registered
    pub fn new(surface: Arc<dyn BrowsingSurface>) -> Self {
        Self {
            surface,
            handler: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Registers the request handler
    pub fn set_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    /// Removes the request handler
    ///
    /// Requests arriving while no handler is registered are rejected with a
    /// deterministic failure so the page side is never left waiting.
    pub fn clear_handler(&self) {
        *self.handler.lock().unwrap() = None;
    }

    /// Runs one polling loop until the page reports nothing more to send
    ///
    /// Call once per qualifying full-document load. Starting a new run bumps
    /// the channel generation; a previous loop still in flight observes the
    /// bump and exits before its next evaluation instead of interleaving.
    pub async fn run(&self) -> Result<(), SurfaceError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(generation, "channel loop starting");

        let mut reply: Option<ChannelReply> = None;
        loop {
            if self.generation.load(Ordering::SeqCst) != generation {
                tracing::debug!(generation, "channel loop superseded");
                return Ok(());
            }

            let script = advance_script(reply.as_ref());
            let request = self.surface.execute_javascript(&script).await?;
            if request.is_null() {
                tracing::debug!(generation, "channel drained");
                return Ok(());
            }

            let handler = self.handler.lock().unwrap().clone();
            reply = Some(match handler {
                None => {
                    tracing::warn!("channel request arrived with no handler registered");
                    ChannelReply::Error(Value::String(
                        "no request handler registered".to_string(),
                    ))
                }
                Some(handler) => match handler.handle(request).await {
                    Ok(data) => ChannelReply::Data(data),
                    Err(error) => ChannelReply::Error(error),
                },
            });
        }
    }
}

/// Builds the advance evaluation for the given pending reply
fn advance_script(reply: Option<&ChannelReply>) -> String {
    let payload = match reply {
        // Opening poll: no response owed to the page yet.
        None => "null".to_string(),
        Some(reply) => serde_json::to_string(reply).unwrap_or_else(|_| "null".to_string()),
    };
    format!("{b} ? {b}.advance({payload}) : null", b = BRIDGE_BINDING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::SurfaceEvent;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::broadcast;
    use url::Url;

    /// Surface stub that returns a scripted sequence of evaluation results
    /// and records every script it was asked to evaluate.
    struct ScriptedSurface {
        results: Mutex<VecDeque<Value>>,
        scripts: Mutex<Vec<String>>,
        events: broadcast::Sender<SurfaceEvent>,
    }

    impl ScriptedSurface {
        fn new(results: Vec<Value>) -> Arc<Self> {
            let (events, _) = broadcast::channel(8);
            Arc::new(Self {
                results: Mutex::new(results.into()),
                scripts: Mutex::new(Vec::new()),
                events,
            })
        }

        fn scripts(&self) -> Vec<String> {
            self.scripts.lock().unwrap().clone()
        }
    }

    impl BrowsingSurface for ScriptedSurface {
        fn is_active(&self) -> bool {
            true
        }

        fn current_url(&self) -> Url {
            Url::parse("https://example.com/").unwrap()
        }

        fn page_title(&self) -> String {
            String::new()
        }

        fn is_loading(&self) -> bool {
            false
        }

        fn load_url(&self, _url: &Url) -> BoxFuture<'_, Result<(), SurfaceError>> {
            Box::pin(async { Ok(()) })
        }

        fn execute_javascript(&self, script: &str) -> BoxFuture<'_, Result<Value, SurfaceError>> {
            self.scripts.lock().unwrap().push(script.to_string());
            let next = self
                .results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Value::Null);
            Box::pin(async move { Ok(next) })
        }

        fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
            self.events.subscribe()
        }
    }

    struct EchoHandler;

    impl RequestHandler for EchoHandler {
        fn handle(&self, request: Value) -> BoxFuture<'_, Result<Value, Value>> {
            Box::pin(async move { Ok(json!({ "echo": request })) })
        }
    }

    struct FailingHandler;

    impl RequestHandler for FailingHandler {
        fn handle(&self, _request: Value) -> BoxFuture<'_, Result<Value, Value>> {
            Box::pin(async move { Err(Value::String("handler failed".to_string())) })
        }
    }

    #[tokio::test]
    async fn test_empty_queue_issues_one_evaluation() {
        let surface = ScriptedSurface::new(vec![Value::Null]);
        let channel = MessageChannel::new(surface.clone());
        channel.set_handler(Arc::new(EchoHandler));

        channel.run().await.unwrap();

        let scripts = surface.scripts();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].contains("advance(null)"));
    }

    #[tokio::test]
    async fn test_single_request_then_drain() {
        let surface = ScriptedSurface::new(vec![json!({"call": "ping"}), Value::Null]);
        let channel = MessageChannel::new(surface.clone());
        channel.set_handler(Arc::new(EchoHandler));

        channel.run().await.unwrap();

        let scripts = surface.scripts();
        assert_eq!(scripts.len(), 2);
        assert!(scripts[0].contains("advance(null)"));
        // The second evaluation both answers ping and fetches the next request.
        assert!(scripts[1].contains(r#""data""#));
        assert!(scripts[1].contains(r#""echo""#));
    }

    #[tokio::test]
    async fn test_requests_answered_in_order() {
        let surface = ScriptedSurface::new(vec![
            json!({"seq": 1}),
            json!({"seq": 2}),
            Value::Null,
        ]);
        let channel = MessageChannel::new(surface.clone());
        channel.set_handler(Arc::new(EchoHandler));

        channel.run().await.unwrap();

        let scripts = surface.scripts();
        assert_eq!(scripts.len(), 3);
        assert!(scripts[1].contains(r#""seq":1"#));
        assert!(scripts[2].contains(r#""seq":2"#));
    }

    #[tokio::test]
    async fn test_missing_handler_rejects_request() {
        let surface = ScriptedSurface::new(vec![json!({"call": "ping"}), Value::Null]);
        let channel = MessageChannel::new(surface.clone());

        channel.run().await.unwrap();

        let scripts = surface.scripts();
        assert_eq!(scripts.len(), 2);
        assert!(scripts[1].contains(r#""error""#));
        assert!(scripts[1].contains("no request handler registered"));
    }

    #[tokio::test]
    async fn test_handler_failure_forwarded_and_loop_continues() {
        let surface = ScriptedSurface::new(vec![
            json!({"call": "a"}),
            json!({"call": "b"}),
            Value::Null,
        ]);
        let channel = MessageChannel::new(surface.clone());
        channel.set_handler(Arc::new(FailingHandler));

        channel.run().await.unwrap();

        let scripts = surface.scripts();
        assert_eq!(scripts.len(), 3);
        assert!(scripts[1].contains(r#""error""#));
        assert!(scripts[2].contains(r#""error""#));
    }

    /// Handler that starts a fresh polling loop mid-dispatch, as a new page
    /// load would, leaving the outer loop superseded.
    struct RestartingHandler {
        channel: Arc<MessageChannel>,
    }

    impl RequestHandler for RestartingHandler {
        fn handle(&self, _request: Value) -> BoxFuture<'_, Result<Value, Value>> {
            let channel = Arc::clone(&self.channel);
            Box::pin(async move {
                channel.run().await.ok();
                Ok(Value::String("late".to_string()))
            })
        }
    }

    #[tokio::test]
    async fn test_new_run_supersedes_old_loop() {
        // Outer loop fetches one request; while it is being handled a new run
        // starts (and drains immediately). The outer loop must then exit
        // without delivering its response.
        let surface = ScriptedSurface::new(vec![json!({"call": "a"}), Value::Null]);
        let channel = Arc::new(MessageChannel::new(surface.clone()));
        channel.set_handler(Arc::new(RestartingHandler {
            channel: Arc::clone(&channel),
        }));

        channel.run().await.unwrap();

        let scripts = surface.scripts();
        assert_eq!(scripts.len(), 2);
        // Both evaluations are opening polls; the stale response never ships.
        assert!(scripts[0].contains("advance(null)"));
        assert!(scripts[1].contains("advance(null)"));
    }

    #[test]
    fn test_advance_script_shapes() {
        assert_eq!(
            advance_script(None),
            "window.__ambryBridge ? window.__ambryBridge.advance(null) : null"
        );

        let data = advance_script(Some(&ChannelReply::Data(json!(42))));
        assert!(data.contains(r#"advance({"data":42})"#));

        let error = advance_script(Some(&ChannelReply::Error(json!("boom"))));
        assert!(error.contains(r#"advance({"error":"boom"})"#));
    }
}
