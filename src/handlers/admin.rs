//! Admin surface: ledger listing, refunds, manual reconciliation, and
//! read-only revenue analytics. Authorization is delegated - callers present
//! the configured admin key.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{AppError, OptionExt, Result};
use crate::extractors::{AdminKey, Json, Query};
use crate::id::is_valid_prefixed_id;
use crate::models::{PaymentIntent, PaymentRefund, PaymentStats};
use crate::money::Money;
use crate::pagination::{Paginated, PaginationQuery};
use crate::reconcile;
use crate::refunds;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/all", get(list_payments))
        .route("/admin/refund/{payment_id}", post(refund_payment))
        .route("/admin/reconcile/{payment_id}", post(reconcile_payment))
        .route("/admin/analytics", get(analytics))
}

pub async fn list_payments(
    State(state): State<AppState>,
    _admin: AdminKey,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Paginated<PaymentIntent>>> {
    let (limit, offset) = pagination.window();
    let conn = state.db.get()?;

    let items = queries::list_all_payments(&conn, limit, offset)?;
    let total = queries::count_all_payments(&conn)?;

    Ok(Json(Paginated::new(items, total, limit, offset)))
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    /// Decimal amount like "19.99"; omitted means the full remaining balance.
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub payment: PaymentIntent,
    pub applied: Money,
    pub full: bool,
    pub provider_refund_id: String,
    pub refund_history: Vec<PaymentRefund>,
}

pub async fn refund_payment(
    State(state): State<AppState>,
    _admin: AdminKey,
    Path(payment_id): Path<String>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<RefundResponse>> {
    // Cheap format check before touching the database.
    if !is_valid_prefixed_id(&payment_id) {
        return Err(AppError::NotFound("payment".into()));
    }

    // The payment's own currency scopes the amount parse.
    let currency = {
        let conn = state.db.get()?;
        queries::get_payment_intent(&conn, &payment_id)?
            .or_not_found("payment")?
            .amount
            .currency
    };

    let amount = request
        .amount
        .as_deref()
        .map(|s| Money::from_decimal_str(s, &currency))
        .transpose()?;

    let outcome =
        refunds::execute_refund(&state, &payment_id, amount, request.reason.as_deref()).await?;

    let refund_history = {
        let conn = state.db.get()?;
        queries::list_refunds_for_payment(&conn, &payment_id)?
    };

    Ok(Json(RefundResponse {
        payment: outcome.payment,
        applied: outcome.applied,
        full: outcome.full,
        provider_refund_id: outcome.provider_refund_id,
        refund_history,
    }))
}

pub async fn reconcile_payment(
    State(state): State<AppState>,
    _admin: AdminKey,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentIntent>> {
    if !is_valid_prefixed_id(&payment_id) {
        return Err(AppError::NotFound("payment".into()));
    }
    let intent = reconcile::reconcile_payment(&state, &payment_id).await?;
    Ok(Json(intent))
}

pub async fn analytics(
    State(state): State<AppState>,
    _admin: AdminKey,
) -> Result<Json<PaymentStats>> {
    let conn = state.db.get()?;
    Ok(Json(queries::payment_stats(&conn)?))
}
