//! Request/response handling keyed by action name.

use super::panic_message;
use crate::connection::ClientConnection;
use crate::error::GatewayError;
use async_trait::async_trait;
use courier_event_system::{ErrorCode, Request, Response};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Handler for one request action.
///
/// Closures of the form `Fn(Request, Arc<ClientConnection>) -> impl
/// Future<Output = anyhow::Result<Response>>` implement this trait
/// automatically.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request, client: Arc<ClientConnection>) -> anyhow::Result<Response>;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Request, Arc<ClientConnection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
{
    async fn handle(&self, request: Request, client: Arc<ClientConnection>) -> anyhow::Result<Response> {
        (self)(request, client).await
    }
}

/// Action → handler table. At most one handler per action.
#[derive(Default)]
pub struct RequestRegistry {
    handlers: DashMap<String, Arc<dyn RequestHandler>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `action`.
    ///
    /// # Returns
    ///
    /// `GatewayError::DuplicateHandler` if the action already has a handler.
    pub fn register(&self, action: &str, handler: Arc<dyn RequestHandler>) -> Result<(), GatewayError> {
        match self.handlers.entry(action.to_string()) {
            Entry::Occupied(_) => Err(GatewayError::DuplicateHandler(action.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                info!("📝 Registered request handler for action '{}'", action);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, action: &str) -> bool {
        self.handlers.remove(action).is_some()
    }

    pub fn has_handler(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    pub fn registered_actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.handlers.iter().map(|entry| entry.key().clone()).collect();
        actions.sort();
        actions
    }

    /// Runs the handler for `request.action`. Never fails: unknown actions,
    /// handler errors and panics all become error responses correlated to
    /// the request id.
    pub async fn handle(&self, request: Request, client: Arc<ClientConnection>) -> Response {
        let request_id = request.id.clone();
        let action = request.action.clone();

        let Some(handler) = self.handlers.get(&action).map(|entry| Arc::clone(entry.value())) else {
            debug!("No request handler for action '{}'", action);
            return Response::error(request_id, ErrorCode::UnknownAction, format!("Unknown action: {}", action));
        };

        let outcome = AssertUnwindSafe(handler.handle(request, client)).catch_unwind().await;
        let failure = match outcome {
            Ok(Ok(response)) => return response,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };

        error!("❌ Error in request:{}: {}", action, failure);
        Response::error(request_id, ErrorCode::HandlerError, failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> Arc<ClientConnection> {
        ClientConnection::new(None).0
    }

    fn echo() -> Arc<dyn RequestHandler> {
        Arc::new(|request: Request, _client: Arc<ClientConnection>| async move {
            Ok::<_, anyhow::Error>(Response::success(request.id, request.payload))
        })
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = RequestRegistry::new();
        registry.register("echo", echo()).unwrap();

        assert!(matches!(
            registry.register("echo", echo()),
            Err(GatewayError::DuplicateHandler(action)) if action == "echo"
        ));
        assert!(registry.has_handler("echo"));
        assert!(registry.unregister("echo"));
        assert!(!registry.has_handler("echo"));
    }

    #[tokio::test]
    async fn handler_response_is_returned() {
        let registry = RequestRegistry::new();
        registry.register("echo", echo()).unwrap();

        let request = Request::new("echo", json!({"x": 1}));
        let response = registry.handle(request.clone(), client()).await;
        assert!(response.success);
        assert_eq!(response.request_id, request.id);
        assert_eq!(response.payload, json!({"x": 1}));
    }

    #[tokio::test]
    async fn unknown_action_becomes_error_response() {
        let registry = RequestRegistry::new();
        let request = Request::new("nope", json!({}));
        let response = registry.handle(request.clone(), client()).await;

        assert!(!response.success);
        assert_eq!(response.request_id, request.id);
        assert_eq!(response.payload["code"], "UNKNOWN_ACTION");
        assert_eq!(response.payload["message"], "Unknown action: nope");
    }

    #[tokio::test]
    async fn handler_failures_become_error_responses() {
        let registry = RequestRegistry::new();
        registry
            .register(
                "fail",
                Arc::new(|_request: Request, _client: Arc<ClientConnection>| async move {
                    Err::<Response, _>(anyhow::anyhow!("boom"))
                }),
            )
            .unwrap();
        registry
            .register(
                "panic",
                Arc::new(|request: Request, _client: Arc<ClientConnection>| async move {
                    if !request.action.is_empty() {
                        panic!("handler exploded");
                    }
                    Ok::<_, anyhow::Error>(Response::success(request.id, json!(null)))
                }),
            )
            .unwrap();

        let failed = registry.handle(Request::new("fail", json!({})), client()).await;
        assert_eq!(failed.payload["code"], "HANDLER_ERROR");
        assert_eq!(failed.payload["message"], "boom");

        let panicked = registry.handle(Request::new("panic", json!({})), client()).await;
        assert!(!panicked.success);
        assert_eq!(panicked.payload["code"], "HANDLER_ERROR");
        assert_eq!(panicked.payload["message"], "handler exploded");
    }

    #[test]
    fn actions_are_listed_sorted() {
        let registry = RequestRegistry::new();
        registry.register("b", echo()).unwrap();
        registry.register("a", echo()).unwrap();
        assert_eq!(registry.registered_actions(), vec!["a".to_string(), "b".to_string()]);
    }
}
