//! Server-Sent Events streaming route tests

use axum::Router;
use axum::http::{StatusCode, header};
use cardkit::prelude::*;
use serde_json::{Value, json};

use crate::support::{broken_card, get, number_card, post_json};

fn cards(handler: Handler, options: RouteOptions) -> Router {
    CardRouter::new()
        .streaming(
            "/cards",
            handler,
            Typed::<NumberCardRecord>::new(),
            StreamFormat::Sse,
            options,
        )
        .into_router()
}

/// Split an SSE body into frames of `(field, value)` lines.
fn frames(body: &str) -> Vec<Vec<(&str, &str)>> {
    body.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| {
            frame
                .lines()
                .filter_map(|line| line.split_once(": "))
                .collect()
        })
        .collect()
}

fn data(frame: &[(&str, &str)]) -> Value {
    let (_, data) = frame
        .iter()
        .find(|(field, _)| *field == "data")
        .expect("frame has data");
    serde_json::from_str(data).unwrap()
}

#[tokio::test]
async fn each_record_is_one_data_frame() {
    let handler = Handler::iter(|_ctx| vec![number_card("revenue", 10.0), number_card("orders", 4.0)]);
    let reply = get(cards(handler, RouteOptions::default()), "/cards").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header(header::CONTENT_TYPE), "text/event-stream");
    assert_eq!(reply.header(header::CACHE_CONTROL), "no-cache");

    let text = reply.text();
    assert!(text.starts_with("data: "));
    assert!(text.ends_with("\n\n"));

    let frames = frames(text);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].len(), 1);
    assert_eq!(data(&frames[0])["card_id"], "revenue");
    assert_eq!(data(&frames[1])["card_id"], "orders");
}

#[tokio::test]
async fn event_name_and_ids_are_configurable() {
    let handler = Handler::iter(|_ctx| vec![number_card("revenue", 10.0), number_card("orders", 4.0)]);
    let options = RouteOptions::new().with_sse(SseOptions::default().with_event("card").with_ids(true));
    let reply = get(cards(handler, options), "/cards").await;

    let frames = frames(reply.text());
    assert_eq!(frames[0][0], ("event", "card"));
    assert_eq!(frames[0][1], ("id", "1"));
    assert_eq!(frames[1][1], ("id", "2"));
}

#[tokio::test]
async fn reported_failures_use_error_event() {
    let handler = Handler::iter(|_ctx| vec![number_card("revenue", 10.0), broken_card()]);
    let options = RouteOptions::new().with_policy(ErrorPolicy::Report);
    let reply = get(cards(handler, options), "/cards").await;

    assert_eq!(reply.status, StatusCode::OK);
    let frames = frames(reply.text());
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1][0], ("event", "error"));
    let payload = data(&frames[1]);
    assert_eq!(payload["action"], "error");
    assert_eq!(payload["fields"][0]["path"], "card_id");
}

#[tokio::test]
async fn handler_failure_mid_stream_is_masked_in_production() {
    let handler = Handler::stream(|_ctx| {
        futures::stream::iter(vec![
            Ok(number_card("revenue", 10.0)),
            Err(HandlerError::new("replica lag")),
        ])
    });
    let reply = get(cards(handler, RouteOptions::production()), "/cards").await;

    assert_eq!(reply.status, StatusCode::OK);
    let frames = frames(reply.text());
    assert_eq!(frames.len(), 2);
    let payload = data(&frames[1]);
    assert_eq!(payload["kind"], "handler");
    assert_eq!(payload["message"], "internal error");
}

#[tokio::test]
async fn handler_failure_before_first_item_is_500() {
    let handler = Handler::future(|_ctx| async { Err::<Value, _>(HandlerError::new("no connection")) });
    let reply = get(cards(handler, RouteOptions::development()), "/cards").await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.json(), json!({"detail": "no connection"}));
}

#[tokio::test]
async fn post_body_params_reach_streaming_handlers() {
    let handler = Handler::sync(|ctx: CardContext| {
        let value = ctx.param("value").and_then(Value::as_f64).unwrap_or_default();
        Ok(number_card("echo", value))
    });
    let reply = post_json(cards(handler, RouteOptions::default()), "/cards", json!({"value": 7.5})).await;

    let frames = frames(reply.text());
    assert_eq!(data(&frames[0])["data"]["value"], 7.5);
}
