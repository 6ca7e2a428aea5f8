//! Handler invocation
//!
//! A card handler comes in one of four shapes: it returns a value, returns a
//! synchronous iterator, returns a future, or returns a stream. [`Handler`] is
//! the tagged variant over those shapes; it is resolved once per invocation and
//! always produces the same normalized [`ItemStream`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use cardkit::handler::Handler;
//! use serde_json::json;
//!
//! let rows = Handler::iter(|_ctx| (1..=3).map(|i| json!({ "id": i })));
//! let single = Handler::future(|ctx| async move {
//!     let region = ctx.param("region").cloned().unwrap_or_default();
//!     Ok(json!({ "region": region, "value": 42.0 }))
//! });
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, Stream};
use futures::{FutureExt, StreamExt};

use crate::context::CardContext;
use crate::error::HandlerError;
use crate::normalize::{HandlerOutput, IntoItem, ItemStream, RawIter, RawStream, failed};

type ValueFn = dyn Fn(CardContext) -> Result<HandlerOutput, HandlerError> + Send + Sync;
type IterFn = dyn Fn(CardContext) -> RawIter + Send + Sync;
type FutureFn =
    dyn Fn(CardContext) -> BoxFuture<'static, Result<HandlerOutput, HandlerError>> + Send + Sync;
type StreamFn = dyn Fn(CardContext) -> RawStream + Send + Sync;

/// A user handler in one of its accepted shapes.
#[derive(Clone)]
pub enum Handler {
    /// Synchronous, returns its whole output at once. Runs on the polling task.
    Value(Arc<ValueFn>),
    /// Synchronous, returns an iterator pulled one item at a time.
    Iter(Arc<IterFn>),
    /// Asynchronous, resolves to its whole output.
    Future(Arc<FutureFn>),
    /// Asynchronous, yields items as they become available.
    Stream(Arc<StreamFn>),
    /// Synchronous, moved to the blocking thread pool.
    Blocking(Arc<ValueFn>),
}

impl Handler {
    /// Wrap a synchronous handler returning its whole output.
    pub fn sync<F, O>(f: F) -> Self
    where
        F: Fn(CardContext) -> Result<O, HandlerError> + Send + Sync + 'static,
        O: Into<HandlerOutput>,
    {
        Self::Value(Arc::new(
            move |ctx| -> Result<HandlerOutput, HandlerError> { f(ctx).map(Into::into) },
        ))
    }

    /// Wrap a synchronous generator-style handler.
    pub fn iter<F, I>(f: F) -> Self
    where
        F: Fn(CardContext) -> I + Send + Sync + 'static,
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: IntoItem + 'static,
    {
        Self::Iter(Arc::new(move |ctx| {
            Box::new(f(ctx).into_iter().map(IntoItem::into_item)) as RawIter
        }))
    }

    /// Wrap an asynchronous handler returning its whole output.
    pub fn future<F, Fut, O>(f: F) -> Self
    where
        F: Fn(CardContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
        O: Into<HandlerOutput>,
    {
        Self::Future(Arc::new(
            move |ctx| -> BoxFuture<'static, Result<HandlerOutput, HandlerError>> {
                let fut = f(ctx);
                async move { fut.await.map(Into::into) }.boxed()
            },
        ))
    }

    /// Wrap an asynchronous generator-style handler.
    pub fn stream<F, S>(f: F) -> Self
    where
        F: Fn(CardContext) -> S + Send + Sync + 'static,
        S: Stream + Send + 'static,
        S::Item: IntoItem,
    {
        Self::Stream(Arc::new(move |ctx| f(ctx).map(IntoItem::into_item).boxed()))
    }

    /// Wrap a synchronous handler that may block for a long time.
    pub fn blocking<F, O>(f: F) -> Self
    where
        F: Fn(CardContext) -> Result<O, HandlerError> + Send + Sync + 'static,
        O: Into<HandlerOutput>,
    {
        Self::Blocking(Arc::new(
            move |ctx| -> Result<HandlerOutput, HandlerError> { f(ctx).map(Into::into) },
        ))
    }

    /// Name of the handler shape, for diagnostics.
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Iter(_) => "iter",
            Self::Future(_) => "future",
            Self::Stream(_) => "stream",
            Self::Blocking(_) => "blocking",
        }
    }

    /// Call the handler and normalize whatever it produced.
    ///
    /// A failure of the call itself becomes a single `CardError::Handler` item,
    /// so callers see invocation and per-item failures the same way.
    pub fn invoke(&self, ctx: CardContext) -> ItemStream {
        match self {
            Self::Value(f) => match f(ctx) {
                Ok(output) => output.into_stream(),
                Err(error) => failed(error),
            },
            Self::Iter(f) => HandlerOutput::Iter(f(ctx)).into_stream(),
            Self::Future(f) => resolve(f(ctx)),
            Self::Stream(f) => HandlerOutput::Stream(f(ctx)).into_stream(),
            Self::Blocking(f) => {
                let f = Arc::clone(f);
                resolve(
                    async move {
                        tokio::task::spawn_blocking(move || f(ctx))
                            .await
                            .unwrap_or_else(|join| Err(HandlerError::from_error(join)))
                    }
                    .boxed(),
                )
            }
        }
    }
}

fn resolve(fut: BoxFuture<'static, Result<HandlerOutput, HandlerError>>) -> ItemStream {
    stream::once(fut)
        .flat_map(|result| match result {
            Ok(output) => output.into_stream(),
            Err(error) => failed(error),
        })
        .boxed()
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.shape()).finish()
    }
}
