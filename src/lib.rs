//! # cardkit
//!
//! Typed dashboard card handlers served over axum.
//!
//! A card handler is a plain function, closure, future, iterator or stream
//! producing raw items. `cardkit` binds it to a record schema and an error
//! policy and serves it as:
//!
//! - a JSON array (`http_route`)
//! - NDJSON or Server-Sent Events (`streaming_route`)
//! - WebSocket text frames (`websocket_route`)
//! - a subscription-style WebSocket consumer (`consumer_route`)
//!
//! ## Features
//!
//! - `schema` (default): JSON Schema backed record schemas
//! - `telemetry` (default): tracing subscriber initialization helpers
//!
//! ## Example
//!
//! ```rust,ignore
//! use cardkit::prelude::*;
//! use serde_json::json;
//!
//! let revenue = Handler::sync(|ctx| {
//!     let region = ctx.param("region").cloned().unwrap_or(json!("all"));
//!     Ok(json!({
//!         "kind": "number",
//!         "report_id": "sales",
//!         "card_id": "revenue",
//!         "data": {"value": 1250.0, "label": region},
//!     }))
//! });
//!
//! let app: axum::Router = CardRouter::new()
//!     .http("/cards/revenue", revenue, Typed::<NumberCardRecord>::new(), RouteOptions::production())
//!     .into_router();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod encode;
pub mod error;
pub mod handler;
pub mod normalize;
pub mod params;
pub mod pipeline;
pub mod policy;
pub mod schema;
pub mod server;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod types;
pub mod utils;

pub use config::{ConsumerOptions, RouteOptions};
pub use context::{CardContext, ConnectionHandle, Params};
pub use encode::{SseOptions, StreamFormat};
pub use error::{CardError, HandlerError, Result, ValidationError};
pub use handler::Handler;
pub use normalize::HandlerOutput;
pub use policy::{ErrorPayload, ErrorPolicies, ErrorPolicy};
pub use schema::RecordSchema;
pub use server::CardRouter;

/// Commonly used imports.
pub mod prelude {
    pub use crate::config::{ConsumerOptions, RouteOptions};
    pub use crate::context::{CardContext, Params};
    pub use crate::encode::{SseOptions, StreamFormat};
    pub use crate::error::{CardError, HandlerError, Result, ValidationError};
    pub use crate::handler::Handler;
    pub use crate::normalize::HandlerOutput;
    pub use crate::policy::{ErrorPolicies, ErrorPolicy};
    #[cfg(feature = "schema")]
    pub use crate::schema::JsonSchema;
    pub use crate::schema::{FlatCard, RecordSchema, Typed, Unchecked};
    pub use crate::server::{
        CardConsumer, CardRouter, CardView, consumer_route, http_route, send_validated,
        streaming_route, view_route, websocket_route,
    };
    pub use crate::types::*;
}
