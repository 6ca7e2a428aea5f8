//! Class-style card views.
//!
//! A [`CardView`] declares its record schema and a `handle` method; the view
//! binder does parameter parsing, validation and response assembly.
//!
//! ```rust,ignore
//! struct Revenue;
//!
//! #[async_trait]
//! impl CardView for Revenue {
//!     type Schema = Typed<NumberCardRecord>;
//!
//!     fn schema(&self) -> &Self::Schema {
//!         static SCHEMA: LazyLock<Typed<NumberCardRecord>> = LazyLock::new(Typed::new);
//!         &SCHEMA
//!     }
//!
//!     async fn handle(&self, ctx: CardContext) -> Result<HandlerOutput, HandlerError> {
//!         HandlerOutput::serialize(&load_revenue(ctx.filters()).await?)
//!     }
//! }
//!
//! let app = Router::new().route("/cards/revenue", view_route(Revenue));
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use axum::routing::MethodRouter;

use crate::config::RouteOptions;
use crate::context::CardContext;
use crate::error::{HandlerError, ValidationError};
use crate::handler::Handler;
use crate::normalize::HandlerOutput;
use crate::schema::RecordSchema;
use crate::server::routes::http_route;
use crate::types::RawItem;

/// A card endpoint with a declared output schema.
#[async_trait]
pub trait CardView: Send + Sync + 'static {
    /// Schema every produced item is validated against.
    type Schema: RecordSchema;

    /// The schema instance.
    fn schema(&self) -> &Self::Schema;

    /// Error policies and masking for this view.
    fn options(&self) -> RouteOptions {
        RouteOptions::default()
    }

    /// Produce the card's items.
    async fn handle(&self, ctx: CardContext) -> Result<HandlerOutput, HandlerError>;
}

/// Validates through the view's own schema.
struct ViewSchema<V>(Arc<V>);

impl<V: CardView> RecordSchema for ViewSchema<V> {
    type Record = <V::Schema as RecordSchema>::Record;

    fn name(&self) -> &str {
        self.0.schema().name()
    }

    fn validate(&self, raw: RawItem) -> Result<Self::Record, ValidationError> {
        self.0.schema().validate(raw)
    }
}

/// Serve a view on GET and POST with the same contract as
/// [`http_route`](crate::server::routes::http_route).
pub fn view_route<V, St>(view: V) -> MethodRouter<St>
where
    V: CardView,
    St: Clone + Send + Sync + 'static,
{
    let view = Arc::new(view);
    let options = view.options();
    let handler = {
        let view = Arc::clone(&view);
        Handler::future(move |ctx| {
            let view = Arc::clone(&view);
            async move { view.handle(ctx).await }
        })
    };
    http_route(handler, ViewSchema(view), options)
}
