//! Scoped RPC fabric shared by the machine and session connectors.
//!
//! Each connector owns one [`RpcRegistry`] scoped to either a machine id or a
//! session id. Handlers are registered under `scopePrefix:methodName`; on
//! every (re)connect the registry reasserts every method it owns so the peer
//! can rebuild its method-to-connection routing table.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

mod error;

pub use error::RpcError;

/// A handler's return future, boxed so the registry can store handlers of
/// different concrete future types in one map.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A registered RPC handler: takes the already-parsed params and produces a
/// JSON result or an error message.
pub type BoxedHandler = Box<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Outbound side of a connector, used only to announce method registration.
/// The real send/receive loop lives in `beacon-transport`; this trait is
/// kept minimal so `beacon-rpc` never depends on it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Announce that `method` is now routed to us.
    async fn send_register(&self, method: &str);
}

/// The result of dispatching one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcOutcome {
    /// The handler ran and produced a result.
    Result(Value),
    /// The handler ran and returned an error.
    Error(String),
}

/// `scopePrefix:methodName` handler table for one connector.
pub struct RpcRegistry {
    scope_prefix: String,
    handlers: Mutex<HashMap<String, Arc<BoxedHandler>>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
}

impl RpcRegistry {
    /// Create an empty registry scoped to `scope_prefix` (a machine or
    /// session id).
    #[must_use]
    pub fn new(scope_prefix: impl Into<String>) -> Self {
        Self {
            scope_prefix: scope_prefix.into(),
            handlers: Mutex::new(HashMap::new()),
            transport: Mutex::new(None),
        }
    }

    /// This registry's scope prefix.
    #[must_use]
    pub fn scope_prefix(&self) -> &str {
        &self.scope_prefix
    }

    /// Build the fully-scoped method name for `name`.
    #[must_use]
    pub fn scoped_method(&self, name: &str) -> String {
        format!("{}:{name}", self.scope_prefix)
    }

    /// Register `handler` under `name`. Overwrites any prior handler for the
    /// same name. If a transport is currently connected, announces the
    /// registration immediately.
    pub async fn register(&self, name: &str, handler: BoxedHandler) {
        let scoped = self.scoped_method(name);
        self.handlers.lock().insert(scoped.clone(), Arc::new(handler));

        let transport = self.transport.lock().clone();
        if let Some(transport) = transport {
            transport.send_register(&scoped).await;
        }
    }

    /// Remember `transport` and reassert every registered method against it.
    pub async fn on_connect(&self, transport: Arc<dyn Transport>) {
        let methods: Vec<String> = self.handlers.lock().keys().cloned().collect();
        *self.transport.lock() = Some(transport.clone());
        for method in methods {
            transport.send_register(&method).await;
        }
    }

    /// Forget the current transport. Handlers remain registered.
    pub fn on_disconnect(&self) {
        *self.transport.lock() = None;
    }

    /// Dispatch an inbound request. `method` is expected to already carry the
    /// scope prefix (the caller is responsible for routing to the right
    /// registry). `raw_params` is tolerated as malformed JSON and treated as
    /// `null` in that case.
    pub async fn handle_request(&self, method: &str, raw_params: &str) -> RpcOutcome {
        let handler = self.handlers.lock().get(method).cloned();
        let Some(handler) = handler else {
            return RpcOutcome::Error("Method not found".to_string());
        };

        let params = parse_params_tolerant(raw_params);
        match handler(params).await {
            Ok(value) => RpcOutcome::Result(value),
            Err(message) => RpcOutcome::Error(message),
        }
    }

    /// Number of handlers currently registered. Test/diagnostic helper.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

/// Parse `raw` as JSON, tolerating malformed input by falling back to `null`
/// rather than rejecting the request outright.
fn parse_params_tolerant(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(raw).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingTransport {
        registered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_register(&self, method: &str) {
            self.registered.lock().push(method.to_string());
        }
    }

    fn echo_handler() -> BoxedHandler {
        Box::new(|params: Value| Box::pin(async move { Ok(params) }))
    }

    #[tokio::test]
    async fn register_scopes_by_prefix() {
        let registry = RpcRegistry::new("session-123");
        registry.register("readFile", echo_handler()).await;
        assert_eq!(registry.handler_count(), 1);
        assert!(registry
            .handlers
            .lock()
            .contains_key("session-123:readFile"));
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let registry = RpcRegistry::new("session-123");
        let outcome = registry
            .handle_request("session-123:nonexistent", "{}")
            .await;
        assert_eq!(outcome, RpcOutcome::Error("Method not found".to_string()));
    }

    #[tokio::test]
    async fn malformed_params_are_treated_as_null() {
        let registry = RpcRegistry::new("m1");
        registry.register("ping", echo_handler()).await;
        let outcome = registry.handle_request("m1:ping", "not json").await;
        assert_eq!(outcome, RpcOutcome::Result(Value::Null));
    }

    #[tokio::test]
    async fn handler_error_is_surfaced() {
        let registry = RpcRegistry::new("m1");
        registry
            .register(
                "boom",
                Box::new(|_| Box::pin(async { Err("kaboom".to_string()) })),
            )
            .await;
        let outcome = registry.handle_request("m1:boom", "{}").await;
        assert_eq!(outcome, RpcOutcome::Error("kaboom".to_string()));
    }

    #[tokio::test]
    async fn on_connect_reasserts_every_registered_method() {
        let registry = RpcRegistry::new("m1");
        registry.register("a", echo_handler()).await;
        registry.register("b", echo_handler()).await;

        let transport = Arc::new(RecordingTransport {
            registered: Mutex::new(Vec::new()),
        });
        registry.on_connect(transport.clone()).await;

        let mut seen = transport.registered.lock().clone();
        seen.sort();
        assert_eq!(seen, vec!["m1:a".to_string(), "m1:b".to_string()]);
    }

    #[tokio::test]
    async fn registering_while_connected_announces_immediately() {
        let registry = RpcRegistry::new("m1");
        let transport = Arc::new(RecordingTransport {
            registered: Mutex::new(Vec::new()),
        });
        registry.on_connect(transport.clone()).await;

        registry.register("late", echo_handler()).await;
        assert_eq!(
            transport.registered.lock().clone(),
            vec!["m1:late".to_string()]
        );
    }

    #[tokio::test]
    async fn on_disconnect_preserves_handlers() {
        let registry = RpcRegistry::new("m1");
        registry.register("a", echo_handler()).await;
        registry.on_disconnect();
        assert_eq!(registry.handler_count(), 1);
    }

    #[tokio::test]
    async fn reregistering_same_name_overwrites() {
        let registry = RpcRegistry::new("m1");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        registry
            .register(
                "x",
                Box::new(move |_| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { Ok(Value::from(1)) })
                }),
            )
            .await;
        registry
            .register("x", Box::new(|_| Box::pin(async { Ok(Value::from(2)) })))
            .await;

        let outcome = registry.handle_request("m1:x", "{}").await;
        assert_eq!(outcome, RpcOutcome::Result(Value::from(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
