//! Refund execution against the provider and the local ledger.
//!
//! The provider call comes first - money movement truth lives there. The
//! local update is a cache of it: refund accounting accumulates behind a
//! compare-and-set on the previous total, a history row is appended, and a
//! full refund transitions the intent and rolls the enrollment back. A crash
//! between the two halves is healed by `reconcile`, never by guessing.

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{PaymentIntent, PaymentStatus, TransitionOutcome};
use crate::money::Money;
use crate::settlement;

#[derive(Debug)]
pub struct RefundOutcome {
    pub payment: PaymentIntent,
    pub applied: Money,
    pub full: bool,
    pub provider_refund_id: String,
}

/// Validate and execute a refund for `payment_id`.
///
/// `amount` of None means the full remaining balance. Business-rule
/// violations (wrong state, bad amount, expired window) fail before any
/// provider call, leaving all state untouched.
pub async fn execute_refund(
    state: &AppState,
    payment_id: &str,
    amount: Option<Money>,
    reason: Option<&str>,
) -> Result<RefundOutcome> {
    let intent = {
        let conn = state.db.get()?;
        queries::get_payment_intent(&conn, payment_id)?
            .ok_or_else(|| AppError::NotFound(format!("payment {}", payment_id)))?
    };

    if intent.status != PaymentStatus::Succeeded {
        return Err(AppError::RefundNotAllowed(format!(
            "payment is {}, only succeeded payments can be refunded",
            intent.status
        )));
    }

    let Some(charge_id) = intent.provider_charge_id.clone() else {
        return Err(AppError::RefundNotAllowed(
            "payment has no charge reference".into(),
        ));
    };

    let paid_at = intent.paid_at.unwrap_or(intent.created_at);
    let window_secs = state.refund_window_days * 86400;
    if chrono::Utc::now().timestamp() - paid_at > window_secs {
        return Err(AppError::RefundWindowExpired);
    }

    let remaining = intent.remaining_refundable_cents();
    let apply_cents = match &amount {
        Some(m) => {
            if m.currency != intent.amount.currency {
                return Err(AppError::InvalidRefundAmount(format!(
                    "currency {} does not match payment currency {}",
                    m.currency, intent.amount.currency
                )));
            }
            if m.cents <= 0 {
                return Err(AppError::InvalidRefundAmount(
                    "amount must be positive".into(),
                ));
            }
            if m.cents > remaining {
                return Err(AppError::InvalidRefundAmount(format!(
                    "amount {} exceeds remaining refundable {}",
                    m.to_decimal_string(),
                    Money::new(remaining, &intent.amount.currency).to_decimal_string()
                )));
            }
            m.cents
        }
        None => {
            if remaining <= 0 {
                return Err(AppError::InvalidRefundAmount(
                    "nothing left to refund".into(),
                ));
            }
            remaining
        }
    };

    // Provider first: if this fails nothing local has changed and the caller
    // may simply retry.
    let receipt = state
        .provider
        .create_refund(&charge_id, apply_cents, reason)
        .await?;

    let prev_refunded = intent.refunded.cents;
    let full = prev_refunded + apply_cents >= intent.amount.cents;

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    if !queries::add_refund_accounting(&tx, &intent.id, apply_cents, prev_refunded)? {
        // A concurrent refund (or a webhook-driven one) moved the total
        // between our read and this write. The provider refund DID happen;
        // reconciliation will fold it in from provider truth.
        tracing::warn!(
            "Refund accounting conflict: payment={}, provider_refund={}; deferring to reconciliation",
            intent.id,
            receipt.id
        );
        return Err(AppError::StateConflict(
            "concurrent refund activity; re-check payment status".into(),
        ));
    }

    queries::create_payment_refund(&tx, &intent.id, Some(&receipt.id), apply_cents, reason)?;

    if full {
        let outcome = settlement::finalize_full_refund(&tx, &intent.id)?;
        if outcome == TransitionOutcome::Rejected {
            return Err(AppError::StateConflict(
                "payment state changed during refund".into(),
            ));
        }
    }

    tx.commit()?;

    let payment = {
        let conn = state.db.get()?;
        queries::get_payment_intent(&conn, &intent.id)?
            .ok_or_else(|| AppError::NotFound(format!("payment {}", intent.id)))?
    };

    tracing::info!(
        "Refund applied: payment={}, amount_cents={}, full={}, provider_refund={}",
        payment.id,
        apply_cents,
        full,
        receipt.id
    );

    Ok(RefundOutcome {
        applied: Money::new(apply_cents, &payment.amount.currency),
        full,
        provider_refund_id: receipt.id,
        payment,
    })
}
