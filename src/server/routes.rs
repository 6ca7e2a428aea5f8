//! Route binders
//!
//! Each binder returns an axum [`MethodRouter`] that can be mounted under any
//! path. Handlers are invoked per request with a fresh [`CardContext`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use axum::Router;
//! use cardkit::prelude::*;
//!
//! let app: Router = Router::new()
//!     .route("/cards/revenue", http_route(revenue(), Typed::<NumberCardRecord>::new(), RouteOptions::default()))
//!     .route("/cards/rows", streaming_route(rows(), Unchecked, StreamFormat::Ndjson, RouteOptions::default()))
//!     .route("/ws/rows", websocket_route(rows(), Unchecked, RouteOptions::default()));
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, RawPathParams, Request};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter, get, on};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, error};

use crate::config::RouteOptions;
use crate::context::{CardContext, ConnectionState, RequestInfo};
use crate::encode::{FrameEncoder, StreamFormat};
use crate::error::{CardError, Result};
use crate::handler::Handler;
use crate::params::{parse_http_params, parse_websocket_params, params_from_initial_message};
use crate::pipeline::{Aborted, Frame, collect_frames, validate_stream};
use crate::schema::RecordSchema;
use crate::server::socket::{next_text, pump_frames};

/// Largest request body read for parameters.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

impl IntoResponse for Aborted {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        (status, Json(serde_json::json!({ "detail": self.detail() }))).into_response()
    }
}

pub(crate) async fn path_params(parts: &mut Parts) -> HashMap<String, String> {
    match RawPathParams::from_request_parts(parts, &()).await {
        Ok(params) => params
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
        Err(_) => HashMap::new(),
    }
}

/// Build the handler context for a plain or streaming HTTP request.
pub async fn request_context(request: Request) -> Result<CardContext> {
    let (mut parts, body) = request.into_parts();
    let path = path_params(&mut parts).await;
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| CardError::BadRequest(format!("Failed to read request body: {e}")))?;
    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let params = parse_http_params(&parts.method, parts.uri.query(), content_type, &body)?;

    let request = RequestInfo {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
    };
    Ok(CardContext::new(request, params).with_path(path))
}

/// A handler bound to a schema and options.
pub(crate) struct CardRoute<S> {
    handler: Handler,
    schema: Arc<S>,
    options: RouteOptions,
}

impl<S: RecordSchema> CardRoute<S> {
    pub(crate) fn new(handler: Handler, schema: S, options: RouteOptions) -> Arc<Self> {
        Arc::new(Self {
            handler,
            schema: Arc::new(schema),
            options,
        })
    }

    fn frames(&self, ctx: CardContext) -> BoxStream<'static, Frame<S::Record>> {
        validate_stream(
            self.handler.invoke(ctx),
            Arc::clone(&self.schema),
            self.options.policies,
            self.options.masking.clone(),
        )
    }

    pub(crate) async fn serve_json(&self, request: Request) -> Response {
        let ctx = match request_context(request).await {
            Ok(ctx) => ctx,
            Err(err) => return err.into_response(),
        };
        match collect_frames(self.frames(ctx), &self.options.masking).await {
            Ok(records) => Json(records).into_response(),
            Err(aborted) => aborted.into_response(),
        }
    }

    async fn serve_stream(&self, format: StreamFormat, request: Request) -> Response {
        let ctx = match request_context(request).await {
            Ok(ctx) => ctx,
            Err(err) => return err.into_response(),
        };
        let mut frames = self.frames(ctx);

        // Nothing has been written yet, so an abort on the first frame can
        // still use a proper error status.
        let first = frames.next().await;
        if let Some(Frame::Abort(aborted)) = first {
            return aborted.into_response();
        }

        let mut encoder = FrameEncoder::new(format, self.options.sse.clone());
        let masking = self.options.masking.clone();
        let body = async_stream::stream! {
            let mut next = first;
            while let Some(frame) = next {
                match encoder.encode(&frame) {
                    Ok(bytes) => yield Ok::<Bytes, Infallible>(bytes),
                    Err(err) => {
                        error!(error = %err, "record could not be encoded, ending stream");
                        let aborted = Aborted::new(err, None, &masking);
                        if let Ok(bytes) = encoder.encode(&Frame::<S::Record>::Abort(aborted)) {
                            yield Ok(bytes);
                        }
                        break;
                    }
                }
                if frame.is_abort() {
                    break;
                }
                next = frames.next().await;
            }
        };

        (
            [
                (CONTENT_TYPE, format.media_type()),
                (CACHE_CONTROL, "no-cache"),
            ],
            Body::from_stream(body),
        )
            .into_response()
    }

    async fn serve_socket(self: Arc<Self>, socket: WebSocket, mut ctx: CardContext) {
        let (tx, mut rx) = socket.split();

        // The first message only supplies params the query string did not.
        if self.options.wait_for_initial_message && ctx.params.is_empty() {
            match next_text(&mut rx).await {
                Some(text) => ctx.params.extend(params_from_initial_message(&text)),
                None => {
                    debug!("websocket closed before its initial message");
                    return;
                }
            }
        }

        let state = ConnectionState::new();
        let frames = self.frames(ctx.with_connection(state.handle()));
        let outcome = pump_frames(tx, rx, frames, &state).await;
        debug!(connection = %state.id(), ?outcome, "websocket card stream finished");
    }
}

fn get_or_post() -> MethodFilter {
    MethodFilter::GET.or(MethodFilter::POST)
}

/// Plain route: collect all items, validate, answer with a JSON array.
///
/// Serves GET and POST. An abort answers `{"detail": ...}` with 400 for
/// validation failures and 500 for handler failures.
pub fn http_route<S, St>(handler: Handler, schema: S, options: RouteOptions) -> MethodRouter<St>
where
    S: RecordSchema,
    St: Clone + Send + Sync + 'static,
{
    let route = CardRoute::new(handler, schema, options);
    on(get_or_post(), move |request: Request| {
        let route = Arc::clone(&route);
        async move { route.serve_json(request).await }
    })
}

/// Streaming route: one NDJSON line or SSE frame per item.
///
/// An abort on the first item answers with an error status; later aborts end
/// the body with a final error frame.
pub fn streaming_route<S, St>(
    handler: Handler,
    schema: S,
    format: StreamFormat,
    options: RouteOptions,
) -> MethodRouter<St>
where
    S: RecordSchema,
    St: Clone + Send + Sync + 'static,
{
    let route = CardRoute::new(handler, schema, options);
    on(get_or_post(), move |request: Request| {
        let route = Arc::clone(&route);
        async move { route.serve_stream(format, request).await }
    })
}

/// WebSocket route: one text frame per item.
///
/// Parameters come from the upgrade query string. When configured and the
/// query string carries none, the first client message supplies them instead.
/// The socket closes with 1000 once the handler is exhausted, or with 1011
/// after an abort frame.
pub fn websocket_route<S, St>(handler: Handler, schema: S, options: RouteOptions) -> MethodRouter<St>
where
    S: RecordSchema,
    St: Clone + Send + Sync + 'static,
{
    let route = CardRoute::new(handler, schema, options);
    get(move |ws: WebSocketUpgrade, request: Request| {
        let route = Arc::clone(&route);
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
            ws.on_upgrade(move |socket| route.serve_socket(socket, ctx))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{self, Method};
    use serde_json::json;

    #[tokio::test]
    async fn context_merges_query_and_path() {
        let request = http::Request::builder()
            .method(Method::GET)
            .uri("/cards/7?limit=5")
            .body(Body::empty())
            .unwrap();
        let ctx = request_context(request).await.unwrap();
        assert_eq!(ctx.param("limit"), Some(&json!("5")));
        assert_eq!(ctx.request.method, Method::GET);
        // Outside a router there are no path parameters.
        assert!(ctx.path.is_empty());
    }

    #[tokio::test]
    async fn context_reads_json_bodies() {
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/cards")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"params": {"region": "eu"}}"#))
            .unwrap();
        let ctx = request_context(request).await.unwrap();
        assert_eq!(ctx.param("region"), Some(&json!("eu")));
    }

    #[tokio::test]
    async fn context_rejects_non_utf8_bodies() {
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/cards")
            .body(Body::from(vec![0xff, 0xfe, 0x00]))
            .unwrap();
        let err = request_context(request).await.unwrap_err();
        assert!(matches!(err, CardError::BadRequest(_)));
    }
}
