//! Webhook event processor: the sole writer that transitions payment status
//! in response to provider notifications.
//!
//! Delivery is at-least-once and unordered, so everything here is built to
//! be safe under replay: signature verification fails closed, the dedup
//! record and all side effects share one database transaction, and state
//! changes go through the compare-and-set settlement path. Business no-ops
//! (unknown session, stale event, replayed transition) are acked with 200 so
//! the provider's retry policy is never triggered by idempotence; only
//! genuine store failures return 5xx for redelivery.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use rusqlite::Connection;

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::payments::{
    StripeCharge, StripeCheckoutSession, StripeDispute, StripePaymentIntentObject,
    StripeWebhookEvent,
};
use crate::settlement;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(handle_webhook))
}

/// Result type for webhook processing steps.
pub type WebhookResult = (StatusCode, &'static str);

pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (status, message) = process_webhook(&state, &headers, &body).await;
    (
        status,
        Json(serde_json::json!({
            "received": status.is_success(),
            "message": message,
        })),
    )
        .into_response()
}

async fn process_webhook(state: &AppState, headers: &HeaderMap, body: &Bytes) -> WebhookResult {
    let signature = match headers.get("stripe-signature").and_then(|v| v.to_str().ok()) {
        Some(s) => s,
        None => return (StatusCode::BAD_REQUEST, "Missing stripe-signature header"),
    };

    // Fails closed: nothing below runs without a verified signature.
    match state.provider.verify_webhook_signature(body, signature) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::UNAUTHORIZED, "Invalid signature"),
        Err(e) => {
            tracing::debug!("Malformed signature header: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid signature header");
        }
    }

    let event: StripeWebhookEvent = match serde_json::from_slice(body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to parse webhook payload: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    // Dedup record and side effects commit or roll back together, so a
    // failure after the dedup insert cannot eat the event.
    let tx = match conn.transaction() {
        Ok(tx) => tx,
        Err(e) => {
            tracing::error!("Failed to start transaction: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    match queries::try_record_webhook_event(&tx, state.provider.name(), &event.id) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::OK, "Already processed"),
        Err(e) => {
            tracing::error!("Failed to record webhook event {}: {}", event.id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    }

    let result = match dispatch_event(&tx, state, &event) {
        Ok(r) => r,
        Err(e) => {
            // Transient store trouble: roll back and let the provider
            // redeliver later.
            tracing::error!("Webhook processing error: event={}, {}", event.id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Processing error");
        }
    };

    if let Err(e) = tx.commit() {
        tracing::error!("Failed to commit webhook transaction: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
    }

    result
}

fn dispatch_event(
    conn: &Connection,
    state: &AppState,
    event: &StripeWebhookEvent,
) -> Result<WebhookResult> {
    match event.event_type.as_str() {
        "checkout.session.completed" => handle_session_completed(conn, event),
        "charge.succeeded" => handle_charge_succeeded(conn, event),
        "charge.failed" => handle_charge_failed(conn, event),
        "payment_intent.payment_failed" => handle_payment_failed(conn, event),
        "charge.dispute.created" => handle_dispute_created(conn, state, event),
        other => {
            // Forward compatibility: ack types we don't handle.
            tracing::debug!("Ignoring webhook event type {}", other);
            Ok((StatusCode::OK, "Event ignored"))
        }
    }
}

fn handle_session_completed(
    conn: &Connection,
    event: &StripeWebhookEvent,
) -> Result<WebhookResult> {
    let session: StripeCheckoutSession = match serde_json::from_value(event.data.object.clone()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to parse checkout session: {}", e);
            return Ok((StatusCode::BAD_REQUEST, "Invalid checkout session"));
        }
    };

    if session.payment_status.as_deref() == Some("unpaid") {
        return Ok((StatusCode::OK, "Session not paid"));
    }

    let Some(intent) = queries::get_payment_intent_by_session(conn, &session.id)? else {
        // Orphaned provider session (local insert failed or session belongs
        // elsewhere). Intentional no-op, never an error.
        tracing::warn!("No payment intent for provider session {}", session.id);
        return Ok((StatusCode::OK, "No matching payment"));
    };

    let Some(charge_id) = session.payment_intent.as_deref() else {
        // Redelivery would carry the same payload; reconciliation can settle
        // the session later instead.
        tracing::warn!(
            "Session {} completed without a charge reference",
            session.id
        );
        return Ok((StatusCode::OK, "Missing charge reference"));
    };

    Ok(outcome_reply(settlement::settle_success(
        conn, &intent, charge_id,
    )?))
}

/// Defense in depth: the session-completed event may be lost or arrive
/// after the charge event. Correlate through the metadata payment id we
/// planted at session creation.
fn handle_charge_succeeded(conn: &Connection, event: &StripeWebhookEvent) -> Result<WebhookResult> {
    let charge: StripeCharge = match serde_json::from_value(event.data.object.clone()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to parse charge: {}", e);
            return Ok((StatusCode::BAD_REQUEST, "Invalid charge"));
        }
    };

    let intent = match charge.metadata.as_ref().and_then(|m| m.payment_id.as_deref()) {
        Some(payment_id) => queries::get_payment_intent(conn, payment_id)?,
        None => queries::get_payment_intent_by_charge(conn, charge.charge_ref())?,
    };

    let Some(intent) = intent else {
        tracing::warn!("No payment intent for charge {}", charge.id);
        return Ok((StatusCode::OK, "No matching payment"));
    };

    Ok(outcome_reply(settlement::settle_success(
        conn,
        &intent,
        charge.charge_ref(),
    )?))
}

fn handle_charge_failed(conn: &Connection, event: &StripeWebhookEvent) -> Result<WebhookResult> {
    let charge: StripeCharge = match serde_json::from_value(event.data.object.clone()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to parse charge: {}", e);
            return Ok((StatusCode::BAD_REQUEST, "Invalid charge"));
        }
    };

    let Some(payment_id) = charge.metadata.as_ref().and_then(|m| m.payment_id.as_deref()) else {
        tracing::warn!("Failed charge {} carries no payment correlation", charge.id);
        return Ok((StatusCode::OK, "No matching payment"));
    };

    let Some(intent) = queries::get_payment_intent(conn, payment_id)? else {
        tracing::warn!("No payment intent {} for failed charge {}", payment_id, charge.id);
        return Ok((StatusCode::OK, "No matching payment"));
    };

    Ok(outcome_reply(settlement::settle_failure(
        conn,
        &intent,
        charge.failure_message.as_deref(),
    )?))
}

fn handle_payment_failed(conn: &Connection, event: &StripeWebhookEvent) -> Result<WebhookResult> {
    let object: StripePaymentIntentObject = match serde_json::from_value(event.data.object.clone())
    {
        Ok(o) => o,
        Err(e) => {
            tracing::error!("Failed to parse payment intent object: {}", e);
            return Ok((StatusCode::BAD_REQUEST, "Invalid payment intent"));
        }
    };

    let Some(payment_id) = object.metadata.as_ref().and_then(|m| m.payment_id.as_deref()) else {
        tracing::warn!("Failed payment {} carries no payment correlation", object.id);
        return Ok((StatusCode::OK, "No matching payment"));
    };

    let Some(intent) = queries::get_payment_intent(conn, payment_id)? else {
        tracing::warn!("No payment intent {} for failure event", payment_id);
        return Ok((StatusCode::OK, "No matching payment"));
    };

    let reason = object
        .last_payment_error
        .as_ref()
        .and_then(|e| e.message.as_deref());

    Ok(outcome_reply(settlement::settle_failure(
        conn, &intent, reason,
    )?))
}

fn handle_dispute_created(
    conn: &Connection,
    state: &AppState,
    event: &StripeWebhookEvent,
) -> Result<WebhookResult> {
    let dispute: StripeDispute = match serde_json::from_value(event.data.object.clone()) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("Failed to parse dispute: {}", e);
            return Ok((StatusCode::BAD_REQUEST, "Invalid dispute"));
        }
    };

    let Some(charge_ref) = dispute.charge_ref() else {
        tracing::warn!("Dispute {} has no charge reference", dispute.id);
        return Ok((StatusCode::OK, "Dispute missing charge reference"));
    };

    let Some(intent) = queries::get_payment_intent_by_charge(conn, charge_ref)? else {
        tracing::warn!("No payment intent for disputed charge {}", charge_ref);
        return Ok((StatusCode::OK, "No matching payment"));
    };

    settlement::settle_dispute(
        conn,
        &intent,
        &dispute.id,
        dispute.reason.as_deref(),
        state.suspend_on_dispute,
    )?;

    Ok((StatusCode::OK, "OK"))
}

/// Map a transition outcome onto the provider-facing reply. Conflicts are
/// acked: a stale event is the provider's redelivery doing its job, and
/// retrying it would never produce a different answer.
fn outcome_reply(outcome: crate::models::TransitionOutcome) -> WebhookResult {
    use crate::models::TransitionOutcome::*;
    match outcome {
        Applied => (StatusCode::OK, "OK"),
        AlreadyApplied => (StatusCode::OK, "Already applied"),
        Rejected => (StatusCode::OK, "State conflict ignored"),
    }
}
