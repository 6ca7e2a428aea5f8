//! Result normalization
//!
//! Whatever a handler produced (nothing, one item, a sequence, a sync iterator
//! or an async stream) becomes one lazy, single-pass, ordered [`ItemStream`].

use std::fmt;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::Serialize;

use crate::error::{CardError, HandlerError};
use crate::types::RawItem;

/// Normalized handler output.
pub type ItemStream = BoxStream<'static, Result<RawItem, CardError>>;

/// Boxed sync iterator of items.
pub type RawIter = Box<dyn Iterator<Item = Result<RawItem, HandlerError>> + Send>;

/// Boxed async stream of items.
pub type RawStream = BoxStream<'static, Result<RawItem, HandlerError>>;

/// An item, or an item-level handler failure.
pub trait IntoItem {
    /// Convert into an item result.
    fn into_item(self) -> Result<RawItem, HandlerError>;
}

impl IntoItem for RawItem {
    fn into_item(self) -> Result<RawItem, HandlerError> {
        Ok(self)
    }
}

impl<E: Into<HandlerError>> IntoItem for Result<RawItem, E> {
    fn into_item(self) -> Result<RawItem, HandlerError> {
        self.map_err(Into::into)
    }
}

/// What a handler returned, before normalization.
pub enum HandlerOutput {
    /// No items.
    Empty,
    /// A bare value, treated as a one-item sequence.
    One(RawItem),
    /// An ordered, already materialized sequence.
    Many(Vec<RawItem>),
    /// A synchronous iterator, pulled lazily.
    Iter(RawIter),
    /// An asynchronous stream.
    Stream(RawStream),
}

impl HandlerOutput {
    /// A single serializable object.
    pub fn serialize<T: Serialize>(value: &T) -> Result<Self, HandlerError> {
        Ok(Self::One(serde_json::to_value(value)?))
    }

    /// A sequence of serializable objects.
    pub fn records<I, T>(items: I) -> Result<Self, HandlerError>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let items = items
            .into_iter()
            .map(|item| serde_json::to_value(&item))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Many(items))
    }

    /// A lazily pulled iterator.
    pub fn iter<I>(iter: I) -> Self
    where
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: IntoItem + 'static,
    {
        Self::Iter(Box::new(iter.into_iter().map(IntoItem::into_item)))
    }

    /// An asynchronous stream.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream + Send + 'static,
        S::Item: IntoItem,
    {
        Self::Stream(stream.map(IntoItem::into_item).boxed())
    }

    /// Flatten into the uniform item stream, preserving order.
    pub fn into_stream(self) -> ItemStream {
        match self {
            Self::Empty => stream::empty().boxed(),
            Self::One(item) => stream::iter([Ok(item)]).boxed(),
            Self::Many(items) => stream::iter(items.into_iter().map(Ok)).boxed(),
            Self::Iter(iter) => stream::iter(iter.map(|r| r.map_err(CardError::from))).boxed(),
            Self::Stream(s) => s.map(|r| r.map_err(CardError::from)).boxed(),
        }
    }
}

/// A stream that yields one handler failure and ends.
pub fn failed(error: HandlerError) -> ItemStream {
    stream::iter([Err(CardError::Handler(error))]).boxed()
}

impl From<RawItem> for HandlerOutput {
    fn from(value: RawItem) -> Self {
        match value {
            RawItem::Null => Self::Empty,
            RawItem::Array(items) => Self::Many(items),
            other => Self::One(other),
        }
    }
}

impl From<Vec<RawItem>> for HandlerOutput {
    fn from(items: Vec<RawItem>) -> Self {
        Self::Many(items)
    }
}

impl From<Option<RawItem>> for HandlerOutput {
    fn from(value: Option<RawItem>) -> Self {
        value.map_or(Self::Empty, Self::from)
    }
}

impl fmt::Debug for HandlerOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::One(item) => f.debug_tuple("One").field(item).finish(),
            Self::Many(items) => f.debug_tuple("Many").field(&items.len()).finish(),
            Self::Iter(_) => f.write_str("Iter(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn collect_ok(output: HandlerOutput) -> Vec<RawItem> {
        output
            .into_stream()
            .map(|r| r.expect("item"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn every_shape_preserves_order() {
        let expected = vec![json!(1), json!(2), json!(3)];

        assert_eq!(collect_ok(HandlerOutput::from(json!([1, 2, 3]))).await, expected);
        assert_eq!(collect_ok(HandlerOutput::Many(expected.clone())).await, expected);
        assert_eq!(
            collect_ok(HandlerOutput::iter((1..=3).map(|i| json!(i)))).await,
            expected
        );
        assert_eq!(
            collect_ok(HandlerOutput::stream(stream::iter(expected.clone()))).await,
            expected
        );
    }

    #[tokio::test]
    async fn bare_values_are_one_item_and_null_is_empty() {
        assert_eq!(
            collect_ok(HandlerOutput::from(json!({"id": 1}))).await,
            vec![json!({"id": 1})]
        );
        assert!(collect_ok(HandlerOutput::from(RawItem::Null)).await.is_empty());
        assert!(collect_ok(HandlerOutput::from(None::<RawItem>)).await.is_empty());
    }

    #[tokio::test]
    async fn item_errors_surface_as_handler_errors() {
        let items = vec![
            Ok(json!(1)),
            Err(HandlerError::new("row 2 unreadable")),
            Ok(json!(3)),
        ];
        let results: Vec<_> = HandlerOutput::iter(items).into_stream().collect().await;
        assert_eq!(results.len(), 3);
        assert!(matches!(results[1], Err(CardError::Handler(_))));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn iterators_are_pulled_lazily() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let iter = (0..100).map(move |i| {
            counter.fetch_add(1, Ordering::SeqCst);
            json!(i)
        });
        let mut s = HandlerOutput::iter(iter).into_stream();
        let _ = s.next().await;
        let _ = s.next().await;
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn records_serializes_objects() {
        #[derive(Serialize)]
        struct Row {
            id: u32,
        }
        let out = HandlerOutput::records(vec![Row { id: 1 }, Row { id: 2 }]).unwrap();
        match out {
            HandlerOutput::Many(items) => assert_eq!(items, vec![json!({"id": 1}), json!({"id": 2})]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
