//! WebSocket plumbing shared by card routes and consumers.
//!
//! Everything here is generic over a `Sink<Message>` / `Stream` pair so the
//! loops run the same against an axum socket and an in-memory channel.

use std::fmt::Display;

use axum::extract::ws::{CloseFrame, Message, close_code};
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::context::ConnectionState;
use crate::encode::encode_ws_text;
use crate::error::{CardError, Result};
use crate::pipeline::Frame;

/// How a frame pump ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Every frame was sent and the socket closed normally (1000).
    Completed,
    /// An abort frame was sent and the socket closed with an error (1011).
    Aborted,
    /// The client went away; the frame stream was dropped undrained.
    Disconnected,
}

/// Send one JSON text frame.
pub async fn send_json<Tx, T>(tx: &mut Tx, value: &T) -> Result<()>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    T: Serialize + ?Sized,
{
    let text = encode_ws_text(value)?;
    send_text(tx, text).await
}

/// Send an already encoded text frame.
pub async fn send_text<Tx>(tx: &mut Tx, text: String) -> Result<()>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    tx.send(Message::Text(text.into()))
        .await
        .map_err(|e| CardError::Transport(e.to_string()))
}

/// Send a close frame. Failures are ignored: the peer may already be gone.
pub async fn close<Tx>(tx: &mut Tx, code: u16, reason: &'static str)
where
    Tx: Sink<Message> + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = tx.send(Message::Close(Some(frame))).await;
}

/// A client text payload as JSON, or as a JSON string if it is not JSON.
pub fn inbound_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Wait for the next text message. `None` once the client closes or errors.
pub async fn next_text<Rx, E>(rx: &mut Rx) -> Option<String>
where
    Rx: Stream<Item = std::result::Result<Message, E>> + Unpin,
{
    while let Some(message) = rx.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Binary(bytes)) => {
                if let Ok(text) = std::str::from_utf8(&bytes) {
                    return Some(text.to_string());
                }
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Send frames until the stream ends, aborts or the client leaves.
///
/// Inbound text messages are published as the connection's last message while
/// frames are flowing.
pub async fn pump_frames<R, Tx, Rx, E>(
    mut tx: Tx,
    mut rx: Rx,
    mut frames: BoxStream<'static, Frame<R>>,
    state: &ConnectionState,
) -> PumpOutcome
where
    R: Serialize,
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = std::result::Result<Message, E>> + Unpin,
{
    loop {
        tokio::select! {
            biased;

            inbound = rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => state.set_last_message(inbound_value(text.as_str())),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!(connection = %state.id(), "client left, dropping card stream");
                    return PumpOutcome::Disconnected;
                }
                Some(Ok(_)) => {}
            },
            frame = frames.next() => {
                let Some(frame) = frame else {
                    close(&mut tx, close_code::NORMAL, "").await;
                    return PumpOutcome::Completed;
                };
                let aborting = frame.is_abort();
                // Records need not be Sync: encode before the await.
                let encoded = match frame {
                    Frame::Record(record) => encode_ws_text(&record),
                    Frame::Error(payload) => encode_ws_text(&payload),
                    Frame::Abort(aborted) => encode_ws_text(&aborted.payload),
                };
                let sent = match encoded {
                    Ok(text) => send_text(&mut tx, text).await,
                    Err(err) => Err(err),
                };
                match sent {
                    Ok(()) if aborting => {
                        close(&mut tx, close_code::ERROR, "card stream aborted").await;
                        return PumpOutcome::Aborted;
                    }
                    Ok(()) => {}
                    Err(CardError::Transport(reason)) => {
                        debug!(connection = %state.id(), %reason, "send failed, dropping card stream");
                        return PumpOutcome::Disconnected;
                    }
                    Err(err) => {
                        debug!(connection = %state.id(), error = %err, "record could not be encoded");
                        close(&mut tx, close_code::ERROR, "card stream aborted").await;
                        return PumpOutcome::Aborted;
                    }
                }
            }
        }
    }
}
