//! Subscription-style WebSocket consumers.
//!
//! A [`CardConsumer`] speaks a small JSON protocol over one socket:
//!
//! | client sends                               | server replies                        |
//! |--------------------------------------------|---------------------------------------|
//! | `{"action":"subscribe", "subscriptionId"…}`| `{"action":"subscribed", …}`          |
//! | `{"action":"unsubscribe", …}`              | `{"action":"unsubscribed", …}`        |
//! | `{"action":"ping"}`                        | `{"action":"pong", …}`                |
//! | `{"action":"ack", …}`                      | nothing ([`CardConsumer::on_ack`])    |
//! | anything else                              | nothing (kept as the last message)    |
//!
//! The handler starts on the first subscription. Each item it yields is
//! validated and sent as `{"data", "timestamp", "subscriptionIds"[, "id"]}`; a
//! message `id` is added while any subscription acknowledges manually. The
//! server pings every `heartbeat_interval_secs`.

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::extract::ws::{Message, WebSocketUpgrade, close_code};
use axum::routing::{MethodRouter, get};
use futures::{Sink, Stream, StreamExt};
use serde_json::{Value, json};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::ConsumerOptions;
use crate::context::{CardContext, ConnectionState, RequestInfo, Subscription};
use crate::error::{CardError, HandlerError, Result, ValidationError};
use crate::handler::Handler;
use crate::normalize::{HandlerOutput, ItemStream};
use crate::params::parse_websocket_params;
use crate::policy::ErrorPolicy;
use crate::schema::RecordSchema;
use crate::server::routes::path_params;
use crate::server::socket::{close, inbound_value, send_json};
use crate::types::RawItem;
use crate::utils::now_rfc3339;

/// A subscription-driven WebSocket card.
#[async_trait]
pub trait CardConsumer: Send + Sync + 'static {
    /// Schema outgoing items are validated against.
    type Schema: RecordSchema;

    /// The schema instance.
    fn schema(&self) -> &Self::Schema;

    /// Produce the items to push to subscribers.
    async fn handle(&self, ctx: CardContext) -> std::result::Result<HandlerOutput, HandlerError>;

    /// Called for every `ack` message.
    async fn on_ack(&self, _ack: &Value) {}
}

/// What happened to one outgoing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The validated record was sent.
    Sent,
    /// Validation failed and the item was dropped.
    Skipped,
    /// Validation failed and an error message was sent instead.
    Reported,
    /// Validation failed, an error message was sent and the socket closed.
    Closed,
}

/// Validate one item and send it, or apply `policy` if it is rejected.
///
/// - [`ErrorPolicy::Abort`] sends `{"action":"error","message":…}` and closes the socket.
/// - [`ErrorPolicy::Report`] sends `{"action":"error","__validation_error":[…]}`.
/// - [`ErrorPolicy::Skip`] drops the item.
pub async fn send_validated<Tx, S>(
    tx: &mut Tx,
    schema: &S,
    item: RawItem,
    policy: ErrorPolicy,
) -> Result<Delivery>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    S: RecordSchema + ?Sized,
{
    deliver(tx, schema, item, policy, |record| record).await
}

async fn deliver<Tx, S, W>(
    tx: &mut Tx,
    schema: &S,
    item: RawItem,
    policy: ErrorPolicy,
    wrap: W,
) -> Result<Delivery>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    S: RecordSchema + ?Sized,
    W: FnOnce(Value) -> Value,
{
    let rejected = match schema.validate(item) {
        Ok(record) => {
            let record = serde_json::to_value(&record)?;
            send_json(tx, &wrap(record)).await?;
            return Ok(Delivery::Sent);
        }
        Err(rejected) => rejected,
    };

    match policy {
        ErrorPolicy::Abort => {
            warn!(schema = schema.name(), error = %rejected, "closing consumer on invalid item");
            send_json(tx, &validation_message(&rejected)).await?;
            close(tx, close_code::ERROR, "invalid item").await;
            Ok(Delivery::Closed)
        }
        ErrorPolicy::Report => {
            send_json(
                tx,
                &json!({
                    "action": "error",
                    "__validation_error": rejected.fields,
                    "timestamp": now_rfc3339(),
                }),
            )
            .await?;
            Ok(Delivery::Reported)
        }
        ErrorPolicy::Skip => {
            warn!(schema = schema.name(), error = %rejected, "skipping invalid item");
            Ok(Delivery::Skipped)
        }
    }
}

fn validation_message(error: &ValidationError) -> Value {
    json!({
        "action": "error",
        "message": error.to_string(),
        "timestamp": now_rfc3339(),
    })
}

async fn heartbeat_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_item(running: &mut Option<ItemStream>) -> Option<std::result::Result<RawItem, CardError>> {
    match running {
        Some(items) => items.next().await,
        None => std::future::pending().await,
    }
}

/// One connection's protocol state.
struct Session<'a, C: CardConsumer> {
    consumer: &'a C,
    handler: &'a Handler,
    options: &'a ConsumerOptions,
    state: ConnectionState,
    base: CardContext,
    running: Option<ItemStream>,
    sequence: u64,
}

impl<C: CardConsumer> Session<'_, C> {
    fn envelope(&mut self, data: Value) -> Value {
        let subscriptions = self.state.subscriptions();
        let mut message = json!({
            "data": data,
            "timestamp": now_rfc3339(),
            "subscriptionIds": subscriptions
                .iter()
                .map(|s| s.subscription_id.as_str())
                .collect::<Vec<_>>(),
        });
        if subscriptions.iter().any(|s| s.ack_policy == "manual") {
            self.sequence += 1;
            message["id"] = json!(format!("msg-{}-{}", self.state.id(), self.sequence));
        }
        message
    }

    async fn on_message<Tx>(&mut self, tx: &mut Tx, text: &str) -> Result<()>
    where
        Tx: Sink<Message> + Unpin,
        Tx::Error: Display,
    {
        let content = inbound_value(text);
        let action = content
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match action.as_str() {
            "subscribe" => {
                let subscription_id = content
                    .get("subscriptionId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        format!("sub-{}-{}", self.state.id(), self.state.subscriptions().len())
                    });
                let topic = content.get("topic").and_then(Value::as_str).unwrap_or("").to_string();
                let ack_policy = content
                    .get("ackPolicy")
                    .and_then(Value::as_str)
                    .unwrap_or(self.options.ack_policy.as_str())
                    .to_string();
                let client_info = content.get("clientInfo").cloned().unwrap_or_else(|| json!({}));
                self.state.subscribe(Subscription {
                    subscription_id: subscription_id.clone(),
                    topic: topic.clone(),
                    ack_policy,
                    client_info,
                });
                send_json(
                    tx,
                    &json!({
                        "action": "subscribed",
                        "subscriptionId": subscription_id,
                        "topic": topic,
                        "timestamp": now_rfc3339(),
                    }),
                )
                .await?;

                if self.running.is_none() {
                    debug!(connection = %self.state.id(), "starting consumer handler");
                    let ctx = self.base.clone().with_connection(self.state.handle());
                    self.running = Some(self.handler.invoke(ctx));
                }
            }
            "unsubscribe" => {
                let subscription_id = content.get("subscriptionId").and_then(Value::as_str);
                if let Some(id) = subscription_id.filter(|id| self.state.unsubscribe(id)) {
                    send_json(
                        tx,
                        &json!({
                            "action": "unsubscribed",
                            "subscriptionId": id,
                            "timestamp": now_rfc3339(),
                        }),
                    )
                    .await?;
                }
            }
            "ping" => {
                send_json(tx, &json!({"action": "pong", "timestamp": now_rfc3339()})).await?;
            }
            "ack" => self.consumer.on_ack(&content).await,
            _ => self.state.set_last_message(content),
        }
        Ok(())
    }

    /// Returns `false` once the socket has been closed.
    async fn on_item<Tx>(
        &mut self,
        tx: &mut Tx,
        item: Option<std::result::Result<RawItem, CardError>>,
    ) -> Result<bool>
    where
        Tx: Sink<Message> + Unpin,
        Tx::Error: Display,
    {
        match item {
            Some(Ok(raw)) => {
                let consumer: &C = self.consumer;
                let policy = self.options.policy;
                let delivery =
                    deliver(tx, consumer.schema(), raw, policy, |record| self.envelope(record))
                        .await?;
                Ok(delivery != Delivery::Closed)
            }
            Some(Err(err)) => {
                self.running = None;
                let message = match &err {
                    CardError::Handler(_) if self.options.masking.mask_errors => self
                        .options
                        .masking
                        .masked_error_message
                        .clone()
                        .unwrap_or_else(|| "internal error".to_string()),
                    CardError::Handler(h) => h.message().to_string(),
                    other => other.user_message(),
                };
                warn!(connection = %self.state.id(), error = %err, "consumer handler failed");
                send_json(
                    tx,
                    &json!({
                        "action": "error",
                        "message": format!("Handler error: {message}"),
                        "timestamp": now_rfc3339(),
                    }),
                )
                .await?;
                Ok(true)
            }
            None => {
                debug!(connection = %self.state.id(), "consumer handler finished");
                self.running = None;
                Ok(true)
            }
        }
    }
}

/// Run the consumer protocol until the client leaves or the socket is closed.
pub async fn serve_consumer<C, Tx, Rx, E>(
    consumer: &C,
    handler: &Handler,
    options: &ConsumerOptions,
    ctx: CardContext,
    mut tx: Tx,
    mut rx: Rx,
) where
    C: CardConsumer,
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = std::result::Result<Message, E>> + Unpin,
{
    let mut session = Session {
        consumer,
        handler,
        options,
        state: ConnectionState::new(),
        base: ctx,
        running: None,
        sequence: 0,
    };
    let mut heartbeat = options.heartbeat_interval().map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        let step = tokio::select! {
            biased;

            inbound = rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => session.on_message(&mut tx, text.as_str()).await,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => Ok(()),
            },
            _ = heartbeat_tick(&mut heartbeat) => {
                send_json(&mut tx, &json!({"action": "ping", "timestamp": now_rfc3339()})).await
            }
            item = next_item(&mut session.running) => match session.on_item(&mut tx, item).await {
                Ok(true) => Ok(()),
                Ok(false) => break,
                Err(err) => Err(err),
            },
        };
        if let Err(err) = step {
            debug!(connection = %session.state.id(), error = %err, "consumer connection ended");
            break;
        }
    }
    debug!(connection = %session.state.id(), "consumer disconnected, dropping handler");
}

/// The consumer's `handle` as a [`Handler`].
pub fn consumer_handler<C: CardConsumer>(consumer: Arc<C>) -> Handler {
    Handler::future(move |ctx| {
        let consumer = Arc::clone(&consumer);
        async move { consumer.handle(ctx).await }
    })
}

/// Serve a consumer on a WebSocket route.
pub fn consumer_route<C, St>(consumer: C, options: ConsumerOptions) -> MethodRouter<St>
where
    C: CardConsumer,
    St: Clone + Send + Sync + 'static,
{
    let consumer = Arc::new(consumer);
    let handler = consumer_handler(Arc::clone(&consumer));
    let options = Arc::new(options);

    get(move |ws: WebSocketUpgrade, request: Request| {
        let consumer = Arc::clone(&consumer);
        let handler = handler.clone();
        let options = Arc::clone(&options);
        async move {
            let (mut parts, _) = request.into_parts();
            let path = path_params(&mut parts).await;
            let params = parse_websocket_params(parts.uri.query());
            let request = RequestInfo {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
            };
            let ctx = CardContext::new(request, params).with_path(path);
            ws.on_upgrade(move |socket| async move {
                let (tx, rx) = socket.split();
                serve_consumer(consumer.as_ref(), &handler, &options, ctx, tx, rx).await;
            })
        }
    })
}
