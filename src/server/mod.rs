//! axum integration
//!
//! - [`routes`]: function-style binders (`http_route`, `streaming_route`, `websocket_route`)
//! - [`view`]: trait-style card views
//! - [`consumer`]: subscription-style WebSocket consumers
//! - [`CardRouter`]: registers any of the above under paths

pub mod consumer;
pub mod routes;
pub mod socket;
pub mod view;

use axum::Router;

use crate::config::{ConsumerOptions, RouteOptions};
use crate::encode::StreamFormat;
use crate::handler::Handler;
use crate::schema::RecordSchema;

pub use consumer::{CardConsumer, Delivery, consumer_route, send_validated};
pub use routes::{http_route, streaming_route, websocket_route};
pub use view::{CardView, view_route};

/// Builder collecting card endpoints into an [`axum::Router`].
///
/// ```rust,ignore
/// let app: axum::Router = CardRouter::new()
///     .http("/cards/revenue", revenue(), Typed::<NumberCardRecord>::new(), RouteOptions::default())
///     .streaming("/cards/rows", rows(), Unchecked, StreamFormat::Sse, RouteOptions::production())
///     .view("/cards/summary", Summary::default())
///     .into_router();
/// ```
#[derive(Debug)]
pub struct CardRouter<St = ()> {
    router: Router<St>,
}

impl<St> Default for CardRouter<St>
where
    St: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<St> CardRouter<St>
where
    St: Clone + Send + Sync + 'static,
{
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            router: Router::new(),
        }
    }

    /// Register a plain JSON route.
    pub fn http<S: RecordSchema>(
        self,
        path: &str,
        handler: Handler,
        schema: S,
        options: RouteOptions,
    ) -> Self {
        self.route(path, http_route(handler, schema, options))
    }

    /// Register an NDJSON or SSE route.
    pub fn streaming<S: RecordSchema>(
        self,
        path: &str,
        handler: Handler,
        schema: S,
        format: StreamFormat,
        options: RouteOptions,
    ) -> Self {
        self.route(path, streaming_route(handler, schema, format, options))
    }

    /// Register a WebSocket route.
    pub fn websocket<S: RecordSchema>(
        self,
        path: &str,
        handler: Handler,
        schema: S,
        options: RouteOptions,
    ) -> Self {
        self.route(path, websocket_route(handler, schema, options))
    }

    /// Register a card view.
    pub fn view<V: CardView>(self, path: &str, view: V) -> Self {
        self.route(path, view_route(view))
    }

    /// Register a subscription consumer.
    pub fn consumer<C: CardConsumer>(self, path: &str, consumer: C, options: ConsumerOptions) -> Self {
        self.route(path, consumer_route(consumer, options))
    }

    fn route(self, path: &str, method_router: axum::routing::MethodRouter<St>) -> Self {
        tracing::debug!(path, "registering card route");
        Self {
            router: self.router.route(path, method_router),
        }
    }

    /// The finished router.
    pub fn into_router(self) -> Router<St> {
        self.router
    }
}

impl<St> From<CardRouter<St>> for Router<St> {
    fn from(cards: CardRouter<St>) -> Self {
        cards.router
    }
}
