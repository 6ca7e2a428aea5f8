//! Validation pipeline
//!
//! Items flow from the normalized handler output through the record schema and
//! come out as [`Frame`]s. This is the only place that decides, per failing
//! item, what the configured [`ErrorPolicy`] means.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::CardError;
use crate::normalize::ItemStream;
use crate::policy::{ErrorPayload, ErrorPolicies, ErrorPolicy, Masking};
use crate::schema::RecordSchema;

/// The failure that ended a stream under [`ErrorPolicy::Abort`].
#[derive(Debug)]
pub struct Aborted {
    /// The underlying failure.
    pub error: CardError,
    /// The payload sent to clients (handler messages possibly masked).
    pub payload: ErrorPayload,
}

impl Aborted {
    /// Build from an error observed at `index`.
    pub fn new(error: CardError, index: Option<usize>, masking: &Masking) -> Self {
        let payload = ErrorPayload::from_error(&error, index, masking);
        Self { error, payload }
    }

    /// The `detail` member of an HTTP error body.
    pub fn detail(&self) -> Value {
        match &self.error {
            CardError::Validation(_) => self.error.detail(),
            _ => Value::String(self.payload.message.clone()),
        }
    }
}

impl std::fmt::Display for Aborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.error, f)
    }
}

/// One unit of pipeline output.
#[derive(Debug)]
pub enum Frame<R> {
    /// A validated record.
    Record(R),
    /// An inline error payload replacing a failed item.
    Error(ErrorPayload),
    /// The final frame of an aborted stream.
    Abort(Aborted),
}

impl<R> Frame<R> {
    /// Whether this frame ends the stream.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort(_))
    }

    /// The record, if this is one.
    pub fn into_record(self) -> Option<R> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }
}

/// Validate every item in order, applying the error policies.
///
/// The returned stream ends after an [`Frame::Abort`]; nothing past the
/// failing item is pulled from `items`. Dropping the returned stream drops the
/// handler's output.
pub fn validate_stream<S>(
    items: ItemStream,
    schema: Arc<S>,
    policies: ErrorPolicies,
    masking: Masking,
) -> BoxStream<'static, Frame<S::Record>>
where
    S: RecordSchema,
{
    let frames = async_stream::stream! {
        let mut items = items;
        let mut index = 0usize;
        while let Some(item) = items.next().await {
            let result = item.and_then(|raw| schema.validate(raw).map_err(CardError::from));
            match result {
                Ok(record) => yield Frame::Record(record),
                Err(err) => match policies.for_error(&err) {
                    ErrorPolicy::Abort => {
                        error!(schema = schema.name(), index, error = %err, "aborting card stream");
                        yield Frame::Abort(Aborted::new(err, Some(index), &masking));
                        break;
                    }
                    ErrorPolicy::Skip => {
                        warn!(schema = schema.name(), index, error = %err, "skipping failed item");
                    }
                    ErrorPolicy::Report => {
                        debug!(schema = schema.name(), index, error = %err, "reporting failed item");
                        yield Frame::Error(ErrorPayload::from_error(&err, Some(index), &masking));
                    }
                },
            }
            index += 1;
        }
    };
    frames.boxed()
}

/// Drain a frame stream into the body of a plain JSON response.
///
/// Records and reported errors keep their order; an abort discards everything
/// collected so far.
pub async fn collect_frames<R>(
    mut frames: BoxStream<'static, Frame<R>>,
    masking: &Masking,
) -> Result<Vec<Value>, Aborted>
where
    R: serde::Serialize,
{
    let mut out = Vec::new();
    let mut index = 0usize;
    while let Some(frame) = frames.next().await {
        let value = match frame {
            Frame::Record(record) => serde_json::to_value(&record)
                .map_err(|e| Aborted::new(CardError::from(e), Some(index), masking))?,
            Frame::Error(payload) => serde_json::to_value(&payload)
                .map_err(|e| Aborted::new(CardError::from(e), Some(index), masking))?,
            Frame::Abort(aborted) => return Err(aborted),
        };
        out.push(value);
        index += 1;
    }
    Ok(out)
}
