use crate::helpers::{
    envelope, subscription, TestApp, OPERATIONS_EMAIL, OWNER_EMAIL, OWNER_ID, OWNER_TOKEN,
};
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use subscription_billing::domain::{BillingDuration, SubscriptionStatus};

const STAFF_TOKEN: &str = "staff-token";
const STRANGER_TOKEN: &str = "stranger-token";

async fn spawn_with_callers() -> TestApp {
    let app = TestApp::spawn().await;
    app.mock_caller(OWNER_TOKEN, OWNER_ID, &[]).await;
    app.mock_caller(
        STAFF_TOKEN,
        1,
        &["payments_create", "payments_delete", "payments_read_all"],
    )
    .await;
    app.mock_caller(STRANGER_TOKEN, 99, &["payments_read"]).await;
    app
}

async fn send_json(app: &TestApp, method: Method, token: &str, body: Value) -> Value {
    let response = app
        .request(method, "/subscriptions", Some(token))
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request");

    envelope(response).await
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    // given
    let app = TestApp::spawn().await;

    // when
    let response = app
        .request(Method::GET, "/subscriptions/single", None)
        .send()
        .await
        .expect("Failed to execute request");

    // then
    assert_eq!(
        envelope(response).await,
        json!({ "success": "error", "error": "Unauthorized" })
    );
}

#[tokio::test]
async fn stranger_cannot_cancel_someone_elses_subscription() {
    // given
    let app = spawn_with_callers().await;
    let active = subscription();
    app.store.insert(active.clone());

    // when
    let body = app
        .post_lifecycle("cancel", active.subscription_id, STRANGER_TOKEN)
        .await;

    // then
    assert_eq!(body, json!({ "success": "error", "error": "Unauthorized" }));
    assert!(!app.store.get(active.subscription_id).cancel_on_renewal);
    assert!(app.store.transactions().is_empty());
}

#[tokio::test]
async fn owner_cancellation_flags_the_subscription_and_tells_operations() {
    // given
    let app = spawn_with_callers().await;
    app.mock_user(OWNER_ID, Some(OWNER_EMAIL)).await;
    app.mock_emails_accepted().await;
    let active = subscription();
    app.store.insert(active.clone());

    // when
    let body = app
        .post_lifecycle("cancel", active.subscription_id, OWNER_TOKEN)
        .await;

    // then
    assert_eq!(body["success"], "success");
    assert_eq!(
        body["data"]["subscription_id"],
        active.subscription_id.to_string()
    );
    assert!(app.store.get(active.subscription_id).cancel_on_renewal);

    let mut emails = Vec::new();
    for _ in 0..50 {
        emails = app.sent_emails().await;
        if !emails.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0]["To"], OPERATIONS_EMAIL);
    assert_eq!(emails[0]["Tag"], "subscriptionCancelled");
}

#[tokio::test]
async fn owner_can_pause_their_subscription() {
    // given
    let app = spawn_with_callers().await;
    app.mock_user(OWNER_ID, Some(OWNER_EMAIL)).await;
    app.mock_activation_succeeds().await;
    app.mock_emails_accepted().await;
    let active = subscription();
    app.store.insert(active.clone());

    // when
    let body = app
        .post_lifecycle("pause", active.subscription_id, OWNER_TOKEN)
        .await;

    // then
    assert_eq!(body["success"], "success");
    assert_eq!(
        app.store.get(active.subscription_id).status,
        SubscriptionStatus::Paused
    );
}

#[tokio::test]
async fn unknown_subscription_is_reported_in_the_envelope() {
    // given
    let app = spawn_with_callers().await;

    // when
    let body = app
        .post_lifecycle("resume", uuid::Uuid::new_v4(), STAFF_TOKEN)
        .await;

    // then
    assert_eq!(
        body,
        json!({ "success": "error", "error": "Subscription not found" })
    );
}

#[tokio::test]
async fn create_reports_the_first_missing_field_and_writes_nothing() {
    // given
    let app = spawn_with_callers().await;

    // when
    let body = send_json(
        &app,
        Method::POST,
        STAFF_TOKEN,
        json!({ "subscription_name": "Premium", "user_id": OWNER_ID, "amount": 1000 }),
    )
    .await;

    // then
    assert_eq!(
        body,
        json!({ "success": "error", "error": "duration is required" })
    );
    assert_eq!(app.store.writes(), 0);
    assert!(app.store.transactions().is_empty());
}

#[tokio::test]
async fn create_stores_an_active_subscription_and_records_it() {
    // given
    let app = spawn_with_callers().await;

    // when
    let body = send_json(
        &app,
        Method::POST,
        STAFF_TOKEN,
        json!({
            "subscription_name": "Premium",
            "user_id": OWNER_ID,
            "amount": 1000,
            "duration": "monthly"
        }),
    )
    .await;

    // then
    assert_eq!(body["success"], "success");
    assert_eq!(body["data"]["status"], "active");
    assert_eq!(body["data"]["duration"], "monthly");

    let transactions = app.store.transactions();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].memo, "Premium created");
    assert_eq!(transactions[0].amount, 1000);
}

#[tokio::test]
async fn create_requires_the_payments_create_capability() {
    // given
    let app = spawn_with_callers().await;

    // when
    let body = send_json(
        &app,
        Method::POST,
        OWNER_TOKEN,
        json!({
            "subscription_name": "Premium",
            "user_id": OWNER_ID,
            "amount": 1000,
            "duration": 30
        }),
    )
    .await;

    // then
    assert_eq!(body["error"], "Unauthorized");
    assert_eq!(app.store.writes(), 0);
}

#[tokio::test]
async fn malformed_json_is_reported_in_the_envelope() {
    // given
    let app = spawn_with_callers().await;

    // when
    let response = app
        .request(Method::POST, "/subscriptions", Some(STAFF_TOKEN))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("Failed to execute request");

    // then
    let body = envelope(response).await;
    assert_eq!(body["success"], "error");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn update_overwrites_only_the_given_fields() {
    // given
    let app = spawn_with_callers().await;
    let active = subscription();
    app.store.insert(active.clone());

    // when
    let body = send_json(
        &app,
        Method::PUT,
        STAFF_TOKEN,
        json!({ "user_id": OWNER_ID, "amount": 2500, "duration": "yearly" }),
    )
    .await;

    // then
    assert_eq!(
        body,
        json!({ "success": "success", "data": { "amount": 2500, "duration": "yearly" } })
    );
    let stored = app.store.get(active.subscription_id);
    assert_eq!(stored.amount, 2500);
    assert_eq!(stored.duration, BillingDuration::Yearly);
    assert_eq!(stored.subscription_name, active.subscription_name);
    assert_eq!(app.store.transactions()[0].memo, "Subscription updated");
}

#[tokio::test]
async fn delete_deactivates_the_users_subscription() {
    // given
    let app = spawn_with_callers().await;
    let active = subscription();
    app.store.insert(active.clone());

    // when
    let body = send_json(&app, Method::DELETE, STAFF_TOKEN, json!({ "user_id": OWNER_ID })).await;

    // then
    assert_eq!(
        body,
        json!({ "success": "success", "data": { "user_id": OWNER_ID } })
    );
    assert_eq!(
        app.store.get(active.subscription_id).status,
        SubscriptionStatus::Inactive
    );
    assert_eq!(app.store.transactions().len(), 1);
}

#[tokio::test]
async fn listing_requires_the_read_all_capability() {
    // given
    let app = spawn_with_callers().await;
    app.store.insert(subscription());

    // when
    let denied = app
        .request(Method::GET, "/subscriptions", Some(OWNER_TOKEN))
        .send()
        .await
        .expect("Failed to execute request");
    let allowed = app
        .request(Method::GET, "/subscriptions?page=1&limit=5", Some(STAFF_TOKEN))
        .send()
        .await
        .expect("Failed to execute request");

    // then
    assert_eq!(envelope(denied).await["error"], "Unauthorized");
    let page = envelope(allowed).await;
    assert_eq!(page["data"]["total"], 1);
    assert_eq!(page["data"]["limit"], 5);
    assert_eq!(page["data"]["subscriptions"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn owner_fetches_their_own_subscription() {
    // given
    let app = spawn_with_callers().await;
    let active = subscription();
    app.store.insert(active.clone());

    // when
    let response = app
        .request(Method::GET, "/subscriptions/single", Some(OWNER_TOKEN))
        .send()
        .await
        .expect("Failed to execute request");

    // then
    let body = envelope(response).await;
    assert_eq!(
        body["data"]["subscription_id"],
        active.subscription_id.to_string()
    );
}

#[tokio::test]
async fn owner_cannot_resume_a_deactivated_subscription() {
    // given
    let app = spawn_with_callers().await;
    app.mock_user(OWNER_ID, Some(OWNER_EMAIL)).await;
    app.mock_activation_succeeds().await;
    let mut retired = subscription();
    retired.status = SubscriptionStatus::Inactive;
    app.store.insert(retired.clone());

    // when
    let body = app
        .post_lifecycle("resume", retired.subscription_id, OWNER_TOKEN)
        .await;

    // then
    assert_eq!(
        body,
        json!({ "success": "error", "error": "Subscription is inactive" })
    );
    assert_eq!(
        app.store.get(retired.subscription_id).status,
        SubscriptionStatus::Inactive
    );
    assert!(app.store.transactions().is_empty());
}
