mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use message_ledger::client::LocalNetwork;
use message_ledger::daemon::{build_router, AppState};

fn app(token: &str) -> Router {
    let network = LocalNetwork::from_config(&common::config()).unwrap();
    build_router(AppState {
        network: Arc::new(network),
        token: token.to_string(),
    })
}

fn post(uri: &str, party: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", "Bearer token")
        .header("x-party", party)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, party: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-api-key", "token")
        .header("x-party", party)
        .body(Body::empty())
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn daemon_health_and_auth() {
    let app = app("token");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/messages")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"contents":"hi","recipient":"PartyB","numberOfStatesToCreate":1})
                        .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn daemon_send_consume_and_query() {
    let app = app("token");

    let response = app
        .clone()
        .oneshot(post(
            "/messages",
            "PartyA",
            json!({"contents":"hi","recipient":"PartyB","numberOfStatesToCreate":1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let tx_id = body_string(response).await;
    assert_eq!(tx_id.len(), 64);

    let response = app
        .clone()
        .oneshot(get("/messages?status=active", "PartyB"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let entries: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(entries.as_array().unwrap().len(), 1);
    assert_eq!(entries[0]["entry"]["contents"], "hi - 0");

    let response = app
        .clone()
        .oneshot(post(
            "/messages/consume",
            "PartyB",
            json!({"txId": tx_id, "indexToConsume": 0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get("/messages?status=consumed", "PartyA"))
        .await
        .unwrap();
    let entries: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(entries.as_array().unwrap().len(), 1);
    assert_eq!(entries[0]["status"], "consumed");

    let response = app
        .clone()
        .oneshot(get(&format!("/transactions/{tx_id}"), "PartyA"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let finalized: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(finalized["id"], tx_id.as_str());
}

#[tokio::test]
async fn daemon_maps_errors_to_statuses() {
    let app = app("token");

    let response = app
        .clone()
        .oneshot(post(
            "/messages",
            "PartyA",
            json!({"contents":"hi","recipient":"PartyZ","numberOfStatesToCreate":1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"], "the recipient party PartyZ does not exist");
    assert_eq!(body["kind"], "unknown_party");

    let response = app
        .clone()
        .oneshot(get(&format!("/transactions/{}", "A".repeat(64)), "PartyA"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(get("/transactions/not-an-id", "PartyA"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // PartyA replying in its own name to its own message.
    let response = app
        .clone()
        .oneshot(post(
            "/messages",
            "PartyA",
            json!({"contents":"hi","recipient":"PartyB","numberOfStatesToCreate":1}),
        ))
        .await
        .unwrap();
    let tx_id = body_string(response).await;
    let response = app
        .clone()
        .oneshot(post(
            "/messages/reply",
            "PartyA",
            json!({"txId": tx_id, "index": 0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"], "only the original recipient may reply");
    assert_eq!(body["kind"], "validation_rejected");
}

#[tokio::test]
async fn daemon_broadcasts_to_observers() {
    let app = app("token");

    let response = app
        .clone()
        .oneshot(post(
            "/messages/broadcast",
            "PartyA",
            json!({"contents":"hello all","recipient":"PartyB"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get("/messages", "PartyC"))
        .await
        .unwrap();
    let entries: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(entries[0]["observed"], true);

    let response = app
        .clone()
        .oneshot(post(
            "/messages",
            "PartyB",
            json!({"contents":"direct","recipient":"PartyC","numberOfStatesToCreate":1}),
        ))
        .await
        .unwrap();
    let tx_id = body_string(response).await;
    let response = app
        .clone()
        .oneshot(post(
            &format!("/transactions/{tx_id}/broadcast"),
            "PartyB",
            json!({"observers": ["PartyD"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get(&format!("/transactions/{tx_id}"), "PartyD"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
