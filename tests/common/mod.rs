//! Test utilities and fixtures for Coursepay integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::{json, Value};
use tower::ServiceExt;

pub use coursepay::db::{init_db, queries, AppState};
pub use coursepay::error::AppError;
pub use coursepay::handlers;
pub use coursepay::models::*;
pub use coursepay::money::Money;
pub use coursepay::payments::{
    verify_stripe_signature, CreateSessionRequest, PaymentProvider, ProviderSession,
    RefundReceipt, SessionSnapshot, SessionState,
};

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const TEST_ADMIN_KEY: &str = "admin_test_key_0123456789";

/// Deterministic payment provider double.
///
/// Checkout sessions it creates start `Open`; tests move them around with
/// `set_session` to simulate provider-side progress. Signature verification
/// is the real HMAC implementation with a test secret.
pub struct MockProvider {
    pub webhook_secret: String,
    sessions: Mutex<HashMap<String, SessionSnapshot>>,
    refunds: Mutex<Vec<(String, i64)>>,
    pub fail_refunds: AtomicBool,
    counter: AtomicU64,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
            sessions: Mutex::new(HashMap::new()),
            refunds: Mutex::new(Vec::new()),
            fail_refunds: AtomicBool::new(false),
            counter: AtomicU64::new(0),
        }
    }

    /// Overwrite the provider-side state of a session.
    pub fn set_session(&self, id: &str, snapshot: SessionSnapshot) {
        self.sessions.lock().unwrap().insert(id.to_string(), snapshot);
    }

    /// Forget a session entirely (provider lookup will 404).
    pub fn remove_session(&self, id: &str) {
        self.sessions.lock().unwrap().remove(id);
    }

    /// Refund calls seen so far, as (charge_id, amount_cents).
    pub fn refund_calls(&self) -> Vec<(String, i64)> {
        self.refunds.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_checkout_session(
        &self,
        _req: &CreateSessionRequest,
    ) -> coursepay::error::Result<ProviderSession> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("cs_test_{:04}", n);
        self.sessions.lock().unwrap().insert(
            id.clone(),
            SessionSnapshot {
                state: SessionState::Open,
                charge_id: None,
                amount_refunded: None,
            },
        );
        Ok(ProviderSession {
            url: format!("https://checkout.test/pay/{}", id),
            id,
        })
    }

    async fn fetch_session(
        &self,
        provider_session_id: &str,
    ) -> coursepay::error::Result<SessionSnapshot> {
        self.sessions
            .lock()
            .unwrap()
            .get(provider_session_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("session {}", provider_session_id)))
    }

    async fn create_refund(
        &self,
        charge_id: &str,
        amount_cents: i64,
        _reason: Option<&str>,
    ) -> coursepay::error::Result<RefundReceipt> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(AppError::ProviderUnavailable("mock refund failure".into()));
        }
        let mut refunds = self.refunds.lock().unwrap();
        refunds.push((charge_id.to_string(), amount_cents));
        Ok(RefundReceipt {
            id: format!("re_test_{:04}", refunds.len()),
        })
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> coursepay::error::Result<bool> {
        verify_stripe_signature(&self.webhook_secret, payload, signature)
    }
}

/// Create an AppState over a pooled in-memory database plus the mock
/// provider handle for steering provider-side state.
pub fn create_test_state() -> (AppState, Arc<MockProvider>) {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(4).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    let provider = Arc::new(MockProvider::new());

    let state = AppState {
        db: pool,
        provider: provider.clone(),
        base_url: "http://localhost:3000".to_string(),
        success_url: "http://localhost:3000/success".to_string(),
        cancel_url: "http://localhost:3000/cancel".to_string(),
        admin_api_key: TEST_ADMIN_KEY.to_string(),
        checkout_ttl_secs: 30 * 60,
        refund_window_days: 90,
        suspend_on_dispute: true,
    };

    (state, provider)
}

/// Router with the full HTTP surface.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(handlers::checkout::router())
        .merge(handlers::webhooks::router())
        .merge(handlers::admin::router())
        .with_state(state)
}

pub fn create_test_course(conn: &Connection, title: &str, price_cents: i64) -> Course {
    queries::create_course(
        conn,
        &CreateCourse {
            title: title.to_string(),
            price_cents,
            currency: "usd".to_string(),
            purchasable: true,
        },
    )
    .expect("Failed to create test course")
}

pub fn create_unpurchasable_course(conn: &Connection, title: &str) -> Course {
    queries::create_course(
        conn,
        &CreateCourse {
            title: title.to_string(),
            price_cents: 4999,
            currency: "usd".to_string(),
            purchasable: false,
        },
    )
    .expect("Failed to create test course")
}

pub fn get_payment(state: &AppState, payment_id: &str) -> PaymentIntent {
    let conn = state.db.get().unwrap();
    queries::get_payment_intent(&conn, payment_id)
        .unwrap()
        .expect("payment intent should exist")
}

pub fn get_payment_by_session(state: &AppState, session_id: &str) -> PaymentIntent {
    let conn = state.db.get().unwrap();
    queries::get_payment_intent_by_session(&conn, session_id)
        .unwrap()
        .expect("payment intent should exist")
}

pub fn get_enrollment(state: &AppState, user_id: &str, course_id: &str) -> Option<Enrollment> {
    let conn = state.db.get().unwrap();
    queries::get_enrollment(&conn, user_id, course_id).unwrap()
}

/// Unique ids for provider events/charges so dedup never trips by accident.
pub fn unique_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().as_simple())
}

// ============ Requests ============

/// Drive the router with a request, returning (status, parsed JSON body).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

pub fn checkout_request(user_id: &str, course_id: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/checkout/{}", course_id))
        .header("x-user-id", user_id)
        .body(Body::empty())
        .unwrap()
}

pub fn status_request(user_id: &str, session_id: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(format!("/status/{}", session_id))
        .header("x-user-id", user_id)
        .body(Body::empty())
        .unwrap()
}

pub fn history_request(user_id: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri("/history")
        .header("x-user-id", user_id)
        .body(Body::empty())
        .unwrap()
}

pub fn admin_get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-admin-key", TEST_ADMIN_KEY)
        .body(Body::empty())
        .unwrap()
}

pub fn admin_post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-admin-key", TEST_ADMIN_KEY)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

// ============ Webhook payloads & signatures ============

pub fn compute_signature(payload: &[u8], secret: &str, timestamp: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn signature_header(payload: &[u8], secret: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signature = compute_signature(payload, secret, &timestamp);
    format!("t={},v1={}", timestamp, signature)
}

/// A webhook request with a valid signature over the payload.
pub fn webhook_request(payload: &Value) -> Request<Body> {
    let body = serde_json::to_vec(payload).unwrap();
    let header = signature_header(&body, TEST_WEBHOOK_SECRET);
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("stripe-signature", header)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

/// A webhook request signed with the wrong secret.
pub fn forged_webhook_request(payload: &Value) -> Request<Body> {
    let body = serde_json::to_vec(payload).unwrap();
    let header = signature_header(&body, "whsec_wrong_secret");
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("stripe-signature", header)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

pub fn session_completed_event(
    event_id: &str,
    session_id: &str,
    charge_id: &str,
    payment_id: &str,
) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "payment_status": "paid",
            "payment_intent": charge_id,
            "metadata": { "payment_id": payment_id }
        }}
    })
}

pub fn charge_succeeded_event(event_id: &str, charge_id: &str, payment_id: &str) -> Value {
    json!({
        "id": event_id,
        "type": "charge.succeeded",
        "data": { "object": {
            "id": charge_id,
            "payment_intent": charge_id,
            "failure_message": null,
            "metadata": { "payment_id": payment_id }
        }}
    })
}

pub fn payment_failed_event(event_id: &str, payment_id: &str, message: &str) -> Value {
    json!({
        "id": event_id,
        "type": "payment_intent.payment_failed",
        "data": { "object": {
            "id": unique_id("pi"),
            "last_payment_error": { "message": message },
            "metadata": { "payment_id": payment_id }
        }}
    })
}

pub fn dispute_created_event(event_id: &str, dispute_id: &str, charge_id: &str) -> Value {
    json!({
        "id": event_id,
        "type": "charge.dispute.created",
        "data": { "object": {
            "id": dispute_id,
            "charge": null,
            "payment_intent": charge_id,
            "reason": "fraudulent"
        }}
    })
}

// ============ Flows ============

/// Run a full checkout and deliver the completed-session webhook, returning
/// the settled payment intent.
pub async fn complete_purchase(
    app: &Router,
    state: &AppState,
    user_id: &str,
    course_id: &str,
) -> PaymentIntent {
    let (status, body) = send(app, checkout_request(user_id, course_id)).await;
    assert_eq!(status, StatusCode::OK, "checkout should succeed: {}", body);
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let intent = get_payment_by_session(state, &session_id);
    let charge_id = unique_id("pi");

    let event = session_completed_event(
        &unique_id("evt"),
        &session_id,
        &charge_id,
        &intent.id,
    );
    let (status, _) = send(app, webhook_request(&event)).await;
    assert_eq!(status, StatusCode::OK, "webhook should be accepted");

    get_payment(state, &intent.id)
}

/// Rewrite paid_at to simulate an old payment (refund window tests).
pub fn backdate_paid_at(state: &AppState, payment_id: &str, days_ago: i64) {
    let conn = state.db.get().unwrap();
    let ts = chrono::Utc::now().timestamp() - days_ago * 86400;
    conn.execute(
        "UPDATE payment_intents SET paid_at = ?1 WHERE id = ?2",
        rusqlite::params![ts, payment_id],
    )
    .unwrap();
}

/// Rewrite created_at to simulate a stale pending checkout.
pub fn backdate_created_at(state: &AppState, payment_id: &str, secs_ago: i64) {
    let conn = state.db.get().unwrap();
    let ts = chrono::Utc::now().timestamp() - secs_ago;
    conn.execute(
        "UPDATE payment_intents SET created_at = ?1 WHERE id = ?2",
        rusqlite::params![ts, payment_id],
    )
    .unwrap();
}
