mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{Extension, Router};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha1::Sha1;
use tower::ServiceExt;

use bindbot::commands::CommandDispatcher;
use bindbot::events::{sign_body, EventSecret, SIGNATURE_HEADER};
use bindbot::reconciliation::start_reconciliation_worker;
use bindbot::routes::api_routes;
use common::{test_config, FakeAccounts, Harness, MONITORED_GROUP};

fn app(harness: &Harness, secret: Option<&str>) -> Router {
    let reconciliation = start_reconciliation_worker(harness.services.reconciliation.clone());
    api_routes()
        .layer(Extension(Arc::new(CommandDispatcher::new(
            harness.services.clone(),
        ))))
        .layer(Extension(reconciliation))
        .layer(Extension(EventSecret(secret.map(str::to_string))))
}

fn post(body: &Value, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/onebot/events")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn group_message(text: &str) -> Value {
    json!({
        "post_type": "message",
        "message_type": "group",
        "self_id": 10001,
        "user_id": 1001,
        "group_id": MONITORED_GROUP,
        "raw_message": text,
        "message": text
    })
}

// key: events-tests -> intake endpoint
#[tokio::test]
async fn command_message_gets_inline_reply() {
    let harness = Harness::new(test_config(), FakeAccounts::default());
    let response = app(&harness, None)
        .oneshot(post(&group_message("/ping"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let payload: Value = serde_json::from_slice(&body).unwrap();
    assert!(payload["reply"].as_str().unwrap().contains("Pong"));
}

#[tokio::test]
async fn plain_chat_and_meta_events_get_no_content() {
    let harness = Harness::new(test_config(), FakeAccounts::default());
    let response = app(&harness, None)
        .oneshot(post(&group_message("hello"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let heartbeat = json!({"post_type": "meta_event", "meta_event_type": "heartbeat"});
    let response = app(&harness, None)
        .oneshot(post(&heartbeat, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn leave_notice_is_queued_for_reconciliation() {
    let harness = Harness::new(test_config(), FakeAccounts::with_users(&[(55, 0, "vip")]));
    harness.bind(1001, 55).await;

    let notice = json!({
        "post_type": "notice",
        "notice_type": "group_decrease",
        "sub_type": "leave",
        "group_id": MONITORED_GROUP,
        "user_id": 1001,
        "operator_id": 1001
    });
    let response = app(&harness, None)
        .oneshot(post(&notice, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    for _ in 0..100 {
        if harness.accounts.group(55) == "default" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(harness.store.binding_count().await, 0);
    assert_eq!(harness.accounts.group(55), "default");
}

#[tokio::test]
async fn signed_intake_rejects_bad_signatures() {
    let harness = Harness::new(test_config(), FakeAccounts::default());
    let body = group_message("/ping");

    let response = app(&harness, Some("s3cret"))
        .oneshot(post(&body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app(&harness, Some("s3cret"))
        .oneshot(post(&body, Some("sha256=00".to_string())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let signature = sign_body("s3cret", body.to_string().as_bytes()).unwrap();
    let response = app(&harness, Some("s3cret"))
        .oneshot(post(&body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Signs the raw body with HMAC-SHA1 as go-cqhttp, NapCat and Lagrange do.
fn gateway_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn gateway_signed_leave_notice_is_reconciled() {
    let harness = Harness::new(test_config(), FakeAccounts::with_users(&[(55, 0, "vip")]));
    harness.bind(1001, 55).await;

    let notice = json!({
        "post_type": "notice",
        "notice_type": "group_decrease",
        "sub_type": "kick",
        "group_id": MONITORED_GROUP,
        "user_id": 1001,
        "operator_id": 9000
    });
    let signature = gateway_signature("s3cret", notice.to_string().as_bytes());
    let response = app(&harness, Some("s3cret"))
        .oneshot(post(&notice, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    for _ in 0..100 {
        if harness.accounts.group(55) == "default" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(harness.store.binding_count().await, 0);
    assert_eq!(harness.accounts.group(55), "default");
}

#[tokio::test]
async fn malformed_event_is_bad_request() {
    let harness = Harness::new(test_config(), FakeAccounts::default());
    let request = Request::builder()
        .method("POST")
        .uri("/onebot/events")
        .body(Body::from("not json"))
        .unwrap();
    let response = app(&harness, None).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn healthz_is_ok() {
    let harness = Harness::new(test_config(), FakeAccounts::default());
    let response = app(&harness, None)
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
