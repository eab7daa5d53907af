//! Reconciliation: read provider truth back when webhooks are late or lost.
//!
//! Applies any resulting change through the same settlement path the webhook
//! processor uses, so reconciliation can never take a shortcut around the
//! state machine.

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{PaymentIntent, PaymentStatus};
use crate::payments::SessionState;
use crate::settlement;

/// Fetch the live provider state for a payment and fold any difference into
/// the local record. Returns the (possibly refreshed) intent.
pub async fn reconcile_payment(state: &AppState, payment_id: &str) -> Result<PaymentIntent> {
    let intent = {
        let conn = state.db.get()?;
        queries::get_payment_intent(&conn, payment_id)?
            .ok_or_else(|| AppError::NotFound(format!("payment {}", payment_id)))?
    };

    // Nothing a provider read could legally change.
    if matches!(
        intent.status,
        PaymentStatus::Failed | PaymentStatus::Canceled
    ) {
        return Ok(intent);
    }

    let snapshot = match state.provider.fetch_session(&intent.provider_session_id).await {
        Ok(s) => s,
        Err(AppError::NotFound(_)) => {
            // Provider no longer knows the session; a pending intent is
            // abandoned, anything settled stays as-is.
            if intent.status == PaymentStatus::Pending {
                let conn = state.db.get()?;
                settlement::settle_cancel(&conn, &intent)?;
            }
            return refreshed(state, &intent.id);
        }
        Err(e) => return Err(e),
    };

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    match snapshot.state {
        SessionState::Complete => {
            if let Some(charge_id) = snapshot.charge_id.as_deref() {
                settlement::settle_success(&tx, &intent, charge_id)?;
            } else {
                tracing::warn!(
                    "Provider reports session {} complete without a charge reference",
                    intent.provider_session_id
                );
            }
        }
        SessionState::Expired => {
            settlement::settle_cancel(&tx, &intent)?;
        }
        SessionState::Open => {}
    }

    // Fold in provider refund totals we may have missed (crash between a
    // provider refund and the local update).
    if let Some(provider_refunded) = snapshot.amount_refunded {
        if let Some(current) = queries::get_payment_intent(&tx, &intent.id)? {
            if matches!(
                current.status,
                PaymentStatus::Succeeded | PaymentStatus::Refunded
            ) {
                settlement::settle_refund_readback(&tx, &current, provider_refunded)?;
            }
        }
    }

    tx.commit()?;

    refreshed(state, &intent.id)
}

fn refreshed(state: &AppState, payment_id: &str) -> Result<PaymentIntent> {
    let conn = state.db.get()?;
    queries::get_payment_intent(&conn, payment_id)?
        .ok_or_else(|| AppError::NotFound(format!("payment {}", payment_id)))
}
