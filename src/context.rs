//! Per-request handler context.

use std::collections::HashMap;

use axum::http::{HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{CardError, Result};

/// Normalized request parameters.
pub type Params = Map<String, Value>;

/// The inbound request as seen by a handler.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// HTTP method (`GET` for WebSocket upgrades).
    pub method: Method,
    /// Full request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
}

/// One client subscription on a WebSocket connection.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Client supplied or generated id.
    pub subscription_id: String,
    /// Subscribed topic.
    pub topic: String,
    /// `auto` or `manual`.
    pub ack_policy: String,
    /// Free-form client metadata.
    pub client_info: Value,
}

/// Live view of a WebSocket connection.
///
/// Handlers run concurrently with the connection's receive loop; the watch
/// receivers always reflect the latest state the loop published.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    last_message: watch::Receiver<Option<Value>>,
    subscriptions: watch::Receiver<Vec<Subscription>>,
}

/// Publishing side of a [`ConnectionHandle`], owned by the connection loop.
#[derive(Debug)]
pub struct ConnectionState {
    id: Uuid,
    last_message: watch::Sender<Option<Value>>,
    subscriptions: watch::Sender<Vec<Subscription>>,
}

impl ConnectionState {
    /// Create state for a new connection.
    pub fn new() -> Self {
        let (last_message, _) = watch::channel(None);
        let (subscriptions, _) = watch::channel(Vec::new());
        Self {
            id: Uuid::new_v4(),
            last_message,
            subscriptions,
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// A handle for handlers.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            last_message: self.last_message.subscribe(),
            subscriptions: self.subscriptions.subscribe(),
        }
    }

    /// Record the latest client message.
    pub fn set_last_message(&self, message: Value) {
        self.last_message.send_replace(Some(message));
    }

    /// Current subscriptions.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.borrow().clone()
    }

    /// Add or replace a subscription.
    pub fn subscribe(&self, subscription: Subscription) {
        self.subscriptions.send_modify(|subs| {
            subs.retain(|s| s.subscription_id != subscription.subscription_id);
            subs.push(subscription);
        });
    }

    /// Remove a subscription, returning whether it existed.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut removed = false;
        self.subscriptions.send_if_modified(|subs| {
            let before = subs.len();
            subs.retain(|s| s.subscription_id != subscription_id);
            removed = subs.len() != before;
            removed
        });
        removed
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHandle {
    /// Connection identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The most recent free-form message the client sent, if any.
    pub fn last_message(&self) -> Option<Value> {
        self.last_message.borrow().clone()
    }

    /// Wait until the client sends another message. Returns `None` once the
    /// connection is gone.
    pub async fn next_message(&mut self) -> Option<Value> {
        self.last_message.changed().await.ok()?;
        self.last_message.borrow_and_update().clone()
    }

    /// Active subscriptions.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.borrow().clone()
    }
}

/// Everything a handler gets to see about the request or connection.
#[derive(Debug, Clone, Default)]
pub struct CardContext {
    /// The inbound request.
    pub request: RequestInfo,
    /// Merged query, body or initial-message parameters.
    pub params: Params,
    /// Path parameters captured by the router.
    pub path: HashMap<String, String>,
    /// Set for WebSocket routes.
    pub connection: Option<ConnectionHandle>,
}

impl CardContext {
    /// Context for a plain request.
    pub fn new(request: RequestInfo, params: Params) -> Self {
        Self {
            request,
            params,
            path: HashMap::new(),
            connection: None,
        }
    }

    /// Attach path parameters.
    pub fn with_path(mut self, path: HashMap<String, String>) -> Self {
        self.path = path;
        self
    }

    /// Attach a WebSocket connection handle.
    pub fn with_connection(mut self, connection: ConnectionHandle) -> Self {
        self.connection = Some(connection);
        self
    }

    /// The `filters` parameter, if present.
    pub fn filters(&self) -> Option<&Value> {
        self.params.get("filters")
    }

    /// One parameter.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// One path parameter.
    pub fn path_param(&self, key: &str) -> Option<&str> {
        self.path.get(key).map(String::as_str)
    }

    /// Deserialize all parameters into a typed struct.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.params.clone()))
            .map_err(|e| CardError::BadRequest(format!("Invalid parameters: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn typed_params_and_filters() {
        #[derive(Deserialize)]
        struct Q {
            limit: u32,
        }
        let mut params = Params::new();
        params.insert("limit".into(), json!(5));
        params.insert("filters".into(), json!({"region": "eu"}));
        let ctx = CardContext::new(RequestInfo::default(), params);

        assert_eq!(ctx.filters(), Some(&json!({"region": "eu"})));
        assert_eq!(ctx.params_as::<Q>().unwrap().limit, 5);
        assert!(matches!(
            CardContext::default().params_as::<Q>(),
            Err(CardError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn handle_sees_live_connection_state() {
        let state = ConnectionState::new();
        let mut handle = state.handle();
        assert_eq!(handle.id(), state.id());
        assert!(handle.last_message().is_none());

        state.subscribe(Subscription {
            subscription_id: "s1".into(),
            topic: "sales".into(),
            ack_policy: "auto".into(),
            client_info: Value::Null,
        });
        assert_eq!(handle.subscriptions().len(), 1);

        state.set_last_message(json!({"hello": 1}));
        assert_eq!(handle.next_message().await, Some(json!({"hello": 1})));

        assert!(state.unsubscribe("s1"));
        assert!(!state.unsubscribe("s1"));
        assert!(handle.subscriptions().is_empty());

        drop(state);
        assert_eq!(handle.next_message().await, None);
    }
}
