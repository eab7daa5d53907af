//! Checkout orchestration and user-facing payment reads.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Router,
};
use serde::Serialize;

use crate::db::{queries, AppState};
use crate::error::{AppError, OptionExt, Result};
use crate::extractors::{AuthUser, Json, Query};
use crate::id::EntityType;
use crate::models::{CreatePaymentIntent, PaymentIntent, PaymentStatus};
use crate::pagination::{Paginated, PaginationQuery};
use crate::payments::{CreateSessionRequest, SessionState};
use crate::reconcile;
use crate::settlement;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/checkout/{course_id}", post(create_checkout))
        .route("/status/{session_id}", get(payment_status))
        .route("/history", get(payment_history))
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub redirect_url: String,
}

/// Create a provider checkout session and the local pending payment intent.
///
/// Eligibility first, then stale-pending self-healing, then the provider
/// call, then persistence. If persistence fails after the provider call the
/// orphaned provider session simply expires unused; the webhook processor
/// tolerates sessions it has no record of.
pub async fn create_checkout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(course_id): Path<String>,
) -> Result<Json<CheckoutResponse>> {
    let conn = state.db.get()?;

    let course = queries::get_course_by_id(&conn, &course_id)?.or_not_found("course")?;
    if !course.purchasable {
        return Err(AppError::InvalidCourse);
    }

    if let Some(enrollment) = queries::get_enrollment(&conn, &user_id, &course_id)? {
        if enrollment.payment_status == crate::models::EnrollmentPaymentStatus::Paid {
            return Err(AppError::AlreadyEnrolled);
        }
    }

    if let Some(pending) = queries::get_pending_payment(&conn, &user_id, &course_id)? {
        let age = chrono::Utc::now().timestamp() - pending.created_at;
        if age <= state.checkout_ttl_secs {
            // Recent pending payment: defer to the provider on whether the
            // session is actually still collectible.
            match state
                .provider
                .fetch_session(&pending.provider_session_id)
                .await
            {
                Ok(snapshot) => match snapshot.state {
                    SessionState::Open => return Err(AppError::PendingPaymentExists),
                    SessionState::Complete => {
                        // The user already paid; the webhook is merely late.
                        if let Some(charge_id) = snapshot.charge_id.as_deref() {
                            settlement::settle_success(&conn, &pending, charge_id)?;
                            return Err(AppError::AlreadyEnrolled);
                        }
                        return Err(AppError::PendingPaymentExists);
                    }
                    SessionState::Expired => {
                        settlement::settle_cancel(&conn, &pending)?;
                    }
                },
                Err(AppError::NotFound(_)) => {
                    settlement::settle_cancel(&conn, &pending)?;
                }
                Err(e) => return Err(e),
            }
        } else {
            // Past the TTL: abandoned checkout, cancel without asking.
            settlement::settle_cancel(&conn, &pending)?;
        }
    }

    // The intent id is generated before the provider call so it can travel
    // in session metadata for charge-level event correlation.
    let payment_id = EntityType::Payment.gen_id();

    let session = state
        .provider
        .create_checkout_session(&CreateSessionRequest {
            payment_id: payment_id.clone(),
            user_id: user_id.clone(),
            course_id: course.id.clone(),
            course_title: course.title.clone(),
            amount_cents: course.price_cents,
            currency: course.currency.clone(),
            success_url: state.success_url.clone(),
            cancel_url: state.cancel_url.clone(),
        })
        .await?;

    let intent = queries::create_payment_intent(
        &conn,
        &CreatePaymentIntent {
            id: payment_id,
            user_id,
            course_id: course.id.clone(),
            provider_session_id: session.id.clone(),
            amount: course.price(),
        },
    )?;

    tracing::info!(
        "Checkout created: payment={}, user={}, course={}, session={}",
        intent.id,
        intent.user_id,
        intent.course_id,
        session.id
    );

    Ok(Json(CheckoutResponse {
        session_id: session.id,
        redirect_url: session.url,
    }))
}

/// Current payment intent projection for a checkout session, owner-only.
///
/// A pending intent past the checkout TTL triggers a reconciliation read
/// against the provider before answering - the fallback for delayed
/// webhooks.
pub async fn payment_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<PaymentIntent>> {
    let intent = {
        let conn = state.db.get()?;
        queries::get_payment_intent_by_session(&conn, &session_id)?
            .or_not_found("payment session")?
    };

    // Same response as a missing session, so session ids can't be probed.
    if intent.user_id != user_id {
        return Err(AppError::NotFound("payment session".into()));
    }

    let stale = intent.status == PaymentStatus::Pending
        && chrono::Utc::now().timestamp() - intent.created_at > state.checkout_ttl_secs;

    let intent = if stale {
        match reconcile::reconcile_payment(&state, &intent.id).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!("Lazy reconciliation failed for {}: {}", intent.id, e);
                intent
            }
        }
    } else {
        intent
    };

    Ok(Json(intent))
}

/// Paginated payment history for the caller.
pub async fn payment_history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Paginated<PaymentIntent>>> {
    let (limit, offset) = pagination.window();
    let conn = state.db.get()?;

    let items = queries::list_payments_for_user(&conn, &user_id, limit, offset)?;
    let total = queries::count_payments_for_user(&conn, &user_id)?;

    Ok(Json(Paginated::new(items, total, limit, offset)))
}
