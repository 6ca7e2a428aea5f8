//! NDJSON streaming route tests

use axum::Router;
use axum::http::{StatusCode, header};
use cardkit::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use validator::Validate;

use crate::support::get;

#[derive(Debug, Serialize, Deserialize, Validate)]
struct Reading {
    #[validate(range(min = 0))]
    id: i64,
    value: f64,
}

fn readings(items: Vec<Value>, options: RouteOptions) -> Router {
    let handler = Handler::stream(move |_ctx| futures::stream::iter(items.clone()));
    CardRouter::new()
        .streaming("/readings", handler, Typed::<Reading>::new(), StreamFormat::Ndjson, options)
        .into_router()
}

#[tokio::test]
async fn one_line_per_record_in_order() {
    let items = vec![
        json!({"id": 1, "value": 1.5}),
        json!({"id": 2, "value": 2.5}),
        json!({"id": 3, "value": 3.5}),
    ];
    let reply = get(readings(items, RouteOptions::default()), "/readings").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header(header::CONTENT_TYPE), "application/x-ndjson");
    assert_eq!(reply.header(header::CACHE_CONTROL), "no-cache");
    assert_eq!(
        reply.text(),
        "{\"id\":1,\"value\":1.5}\n{\"id\":2,\"value\":2.5}\n{\"id\":3,\"value\":3.5}\n"
    );
}

#[tokio::test]
async fn abort_on_first_item_uses_error_status() {
    let items = vec![json!({"id": -1, "value": 1.0}), json!({"id": 2, "value": 2.0})];
    let reply = get(readings(items, RouteOptions::default()), "/readings").await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["detail"][0]["path"], "id");
}

#[tokio::test]
async fn later_abort_ends_stream_with_error_line() {
    let items = vec![
        json!({"id": 1, "value": 1.0}),
        json!({"id": -2, "value": 2.0}),
        json!({"id": 3, "value": 3.0}),
    ];
    let reply = get(readings(items, RouteOptions::default()), "/readings").await;

    assert_eq!(reply.status, StatusCode::OK);
    let lines: Vec<Value> = reply
        .text()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], json!({"id": 1, "value": 1.0}));
    assert_eq!(lines[1]["action"], "error");
    assert_eq!(lines[1]["kind"], "validation");
    assert_eq!(lines[1]["index"], 1);
}

#[tokio::test]
async fn skipped_items_never_appear() {
    let items = vec![
        json!({"id": -1, "value": 1.0}),
        json!({"id": 2, "value": 2.0}),
        json!({"value": 3.0}),
    ];
    let options = RouteOptions::new().with_policy(ErrorPolicy::Skip);
    let reply = get(readings(items, options), "/readings").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.text(), "{\"id\":2,\"value\":2.0}\n");
}

#[tokio::test]
async fn empty_handler_gives_empty_body() {
    let reply = get(readings(Vec::new(), RouteOptions::default()), "/readings").await;

    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.is_empty());
}
