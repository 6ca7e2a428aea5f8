//! Transport encoders
//!
//! One call encodes exactly one unit: an NDJSON line, an SSE frame or a
//! WebSocket text payload. Nothing is buffered across records.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CardError, Result};
use crate::pipeline::Frame;

/// Framing of a streaming HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// Newline-delimited JSON.
    #[default]
    Ndjson,
    /// Server-Sent Events.
    Sse,
}

impl StreamFormat {
    /// Response media type.
    pub const fn media_type(&self) -> &'static str {
        match self {
            Self::Ndjson => "application/x-ndjson",
            Self::Sse => "text/event-stream",
        }
    }

    /// Canonical name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ndjson => "ndjson",
            Self::Sse => "sse",
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamFormat {
    type Err = CardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ndjson" => Ok(Self::Ndjson),
            "sse" => Ok(Self::Sse),
            other => Err(CardError::Config(format!(
                "Invalid stream format: {other}. Valid options: ndjson, sse"
            ))),
        }
    }
}

/// Optional SSE fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SseOptions {
    /// `event:` name for record frames. Error frames always use `error`.
    pub event: Option<String>,
    /// Emit a monotonically increasing `id:` field, starting at 1.
    pub include_id: bool,
}

impl SseOptions {
    /// Name record frames.
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Number frames.
    pub fn with_ids(mut self, include_id: bool) -> Self {
        self.include_id = include_id;
        self
    }
}

/// Encode one NDJSON line.
pub fn encode_ndjson<T: Serialize + ?Sized>(record: &T) -> Result<Bytes> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

/// Encode one SSE frame.
pub fn encode_sse<T: Serialize + ?Sized>(
    record: &T,
    event: Option<&str>,
    id: Option<u64>,
) -> Result<Bytes> {
    let data = serde_json::to_string(record)?;
    let mut frame = String::with_capacity(data.len() + 32);
    if let Some(event) = event {
        frame.push_str("event: ");
        frame.push_str(event);
        frame.push('\n');
    }
    if let Some(id) = id {
        frame.push_str(&format!("id: {id}\n"));
    }
    frame.push_str("data: ");
    frame.push_str(&data);
    frame.push_str("\n\n");
    Ok(Bytes::from(frame))
}

/// Encode one WebSocket text payload.
pub fn encode_ws_text<T: Serialize + ?Sized>(record: &T) -> Result<String> {
    Ok(serde_json::to_string(record)?)
}

/// Stateful encoder for a single streaming response.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    format: StreamFormat,
    sse: SseOptions,
    sequence: u64,
}

impl FrameEncoder {
    /// Create an encoder for one response.
    pub fn new(format: StreamFormat, sse: SseOptions) -> Self {
        Self {
            format,
            sse,
            sequence: 0,
        }
    }

    /// The format this encoder writes.
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Encode one pipeline frame.
    pub fn encode<R: Serialize>(&mut self, frame: &Frame<R>) -> Result<Bytes> {
        match frame {
            Frame::Record(record) => {
                let event = self.sse.event.clone();
                self.unit(record, event.as_deref())
            }
            Frame::Error(payload) => self.unit(payload, Some("error")),
            Frame::Abort(aborted) => self.unit(&aborted.payload, Some("error")),
        }
    }

    fn unit<T: Serialize + ?Sized>(&mut self, value: &T, event: Option<&str>) -> Result<Bytes> {
        match self.format {
            StreamFormat::Ndjson => encode_ndjson(value),
            StreamFormat::Sse => {
                self.sequence += 1;
                let id = self.sse.include_id.then_some(self.sequence);
                encode_sse(value, event, id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::pipeline::Aborted;
    use crate::policy::Masking;
    use serde_json::json;

    #[derive(Serialize)]
    struct Reading {
        id: u32,
        value: f64,
    }

    #[test]
    fn ndjson_is_one_compact_line() {
        let bytes = encode_ndjson(&Reading { id: 1, value: 1.5 }).unwrap();
        assert_eq!(&bytes[..], b"{\"id\":1,\"value\":1.5}\n");
        // Map keys come out sorted, so the form is stable.
        let bytes = encode_ndjson(&json!({"value": 1.5, "id": 1})).unwrap();
        assert_eq!(&bytes[..], b"{\"id\":1,\"value\":1.5}\n");
    }

    #[test]
    fn sse_frames_start_with_data_and_end_blank() {
        let bytes = encode_sse(&Reading { id: 1, value: 1.5 }, None, None).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.ends_with("\n\n"));
        assert_eq!(text, "data: {\"id\":1,\"value\":1.5}\n\n");

        let bytes = encode_sse(&json!({"a": "line\nbreak"}), Some("card"), Some(7)).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            "event: card\nid: 7\ndata: {\"a\":\"line\\nbreak\"}\n\n"
        );
    }

    #[test]
    fn ws_text_is_plain_json() {
        assert_eq!(
            encode_ws_text(&Reading { id: 2, value: 0.0 }).unwrap(),
            "{\"id\":2,\"value\":0.0}"
        );
    }

    #[test]
    fn format_names_are_exact() {
        assert_eq!("ndjson".parse::<StreamFormat>().unwrap(), StreamFormat::Ndjson);
        assert_eq!("sse".parse::<StreamFormat>().unwrap(), StreamFormat::Sse);
        assert!("SSE".parse::<StreamFormat>().is_err());
        assert!("json".parse::<StreamFormat>().is_err());
        assert_eq!(StreamFormat::Sse.media_type(), "text/event-stream");
    }

    #[test]
    fn encoder_numbers_sse_frames_and_marks_errors() {
        let mut encoder = FrameEncoder::new(
            StreamFormat::Sse,
            SseOptions::default().with_event("card").with_ids(true),
        );
        let first = encoder.encode(&Frame::Record(json!({"id": 1}))).unwrap();
        assert_eq!(&first[..], b"event: card\nid: 1\ndata: {\"id\":1}\n\n");

        let aborted = Aborted::new(HandlerError::new("boom").into(), Some(1), &Masking::default());
        let last = encoder.encode(&Frame::<serde_json::Value>::Abort(aborted)).unwrap();
        let text = std::str::from_utf8(&last).unwrap();
        assert!(text.starts_with("event: error\nid: 2\ndata: "), "{text}");
        assert!(text.contains("\"message\":\"boom\""));
    }

    #[test]
    fn ndjson_encoder_writes_error_payloads_as_lines() {
        let mut encoder = FrameEncoder::new(StreamFormat::Ndjson, SseOptions::default());
        let aborted = Aborted::new(HandlerError::new("boom").into(), None, &Masking::default());
        let line = encoder.encode(&Frame::<serde_json::Value>::Abort(aborted)).unwrap();
        assert!(line.ends_with(b"\n"));
        let parsed: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(parsed["action"], "error");
        assert_eq!(parsed["kind"], "handler");
    }
}
