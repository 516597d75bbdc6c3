//! Webhook authentication and bad-payload handling (spec §8 properties 6, 8).

mod common;

use common::TestHarness;
use serde_json::json;

#[tokio::test]
async fn mismatched_secret_is_rejected_and_publishes_nothing() {
    let harness = TestHarness::start().await;

    let resp = harness
        .http
        .post(format!("{}/webhooks/sequin", harness.base_url))
        .bearer_auth("wrong-secret")
        .json(&json!({"action":"insert","record":{"symbol":"AAPL"},"changes":null,"metadata":{"table_schema":"public","table_name":"trades"}}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_authorization_header_is_rejected() {
    let harness = TestHarness::start().await;

    let resp = harness
        .http
        .post(format!("{}/webhooks/sequin", harness.base_url))
        .json(&json!({"action":"insert","record":{},"changes":null,"metadata":{"table_schema":"public","table_name":"trades"}}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_table_causes_zero_publishes_but_still_200() {
    let harness = TestHarness::start().await;

    let resp = harness
        .http
        .post(format!("{}/webhooks/sequin", harness.base_url))
        .bearer_auth(harness.webhook_secret())
        .json(&json!({"action":"insert","record":{"whatever":1},"changes":null,"metadata":{"table_schema":"public","table_name":"some_unclaimed_table"}}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn unparseable_body_is_rejected_as_bad_request() {
    let harness = TestHarness::start().await;

    let resp = harness
        .http
        .post(format!("{}/webhooks/sequin", harness.base_url))
        .bearer_auth(harness.webhook_secret())
        .header("content-type", "application/json")
        .body("{not valid json")
        .send()
        .await
        .expect("request failed");

    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_shape_is_accepted_and_wrapped_per_record() {
    let harness = TestHarness::start().await;

    let resp = harness
        .http
        .post(format!("{}/webhooks/sequin", harness.base_url))
        .bearer_auth(harness.webhook_secret())
        .json(&json!({"data":[{"action":"insert","record":{"whatever":1},"changes":null,"metadata":{"table_schema":"public","table_name":"some_unclaimed_table"}}]}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
}
