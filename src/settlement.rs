//! Settlement: the single authoritative path for applying payment state
//! transitions and their derived enrollment effects.
//!
//! Both the webhook processor and the reconciliation poller come through
//! here, so a transition behaves identically regardless of trigger source.
//! Every function takes a plain `&Connection` and composes into whatever
//! transaction the caller holds.

use chrono::Utc;
use rusqlite::Connection;

use crate::db::queries;
use crate::enrollment;
use crate::error::Result;
use crate::models::{PaymentIntent, PaymentStatus, StatusChange, TransitionOutcome};

/// Settle a successful charge against an intent.
///
/// Applies `pending -> succeeded` with the charge reference and `paid_at`,
/// then derives the enrollment. `AlreadyApplied` still re-derives the
/// enrollment so a crash between transition and upsert heals on redelivery.
pub fn settle_success(
    conn: &Connection,
    intent: &PaymentIntent,
    charge_id: &str,
) -> Result<TransitionOutcome> {
    let change = StatusChange {
        provider_charge_id: Some(charge_id.to_string()),
        paid_at: Some(Utc::now().timestamp()),
        ..Default::default()
    };

    let outcome = queries::transition_payment(conn, &intent.id, PaymentStatus::Succeeded, &change)?;

    match outcome {
        TransitionOutcome::Applied | TransitionOutcome::AlreadyApplied => {
            let settled = queries::get_payment_intent(conn, &intent.id)?
                .ok_or_else(|| crate::error::AppError::NotFound(format!("payment {}", intent.id)))?;
            enrollment::apply_payment_outcome(conn, &settled)?;
            if outcome == TransitionOutcome::Applied {
                tracing::info!(
                    "Payment succeeded: payment={}, user={}, course={}, charge={}",
                    intent.id,
                    intent.user_id,
                    intent.course_id,
                    charge_id
                );
            }
        }
        TransitionOutcome::Rejected => {
            tracing::warn!(
                "State conflict: payment={} cannot move {} -> succeeded (charge={})",
                intent.id,
                intent.status,
                charge_id
            );
        }
    }

    Ok(outcome)
}

/// Settle a failed charge: `pending -> failed` plus the failure reason.
/// An enrollment row created speculatively gets `payment_status=failed`;
/// its academic status stays untouched.
pub fn settle_failure(
    conn: &Connection,
    intent: &PaymentIntent,
    reason: Option<&str>,
) -> Result<TransitionOutcome> {
    let change = StatusChange {
        failure_reason: reason.map(|s| s.to_string()),
        ..Default::default()
    };

    let outcome = queries::transition_payment(conn, &intent.id, PaymentStatus::Failed, &change)?;

    match outcome {
        TransitionOutcome::Applied | TransitionOutcome::AlreadyApplied => {
            let settled = queries::get_payment_intent(conn, &intent.id)?
                .ok_or_else(|| crate::error::AppError::NotFound(format!("payment {}", intent.id)))?;
            enrollment::apply_payment_outcome(conn, &settled)?;
            if outcome == TransitionOutcome::Applied {
                tracing::info!(
                    "Payment failed: payment={}, reason={:?}",
                    intent.id,
                    reason
                );
            }
        }
        TransitionOutcome::Rejected => {
            tracing::warn!(
                "State conflict: payment={} cannot move {} -> failed",
                intent.id,
                intent.status
            );
        }
    }

    Ok(outcome)
}

/// Cancel a stale pending intent (lazy abandonment detection).
pub fn settle_cancel(conn: &Connection, intent: &PaymentIntent) -> Result<TransitionOutcome> {
    let outcome = queries::transition_payment(
        conn,
        &intent.id,
        PaymentStatus::Canceled,
        &StatusChange::default(),
    )?;

    if outcome == TransitionOutcome::Applied {
        tracing::info!(
            "Payment canceled: payment={}, session={}",
            intent.id,
            intent.provider_session_id
        );
    }

    Ok(outcome)
}

/// Record a dispute against a succeeded payment.
///
/// Disputes are a parallel annotation, not a status transition: the intent
/// stays `succeeded` until the dispute resolves into an actual refund.
/// When `suspend` is set, enrollment access is revoked pending resolution.
pub fn settle_dispute(
    conn: &Connection,
    intent: &PaymentIntent,
    dispute_id: &str,
    reason: Option<&str>,
    suspend: bool,
) -> Result<bool> {
    let recorded = queries::set_dispute(conn, &intent.id, dispute_id, reason)?;
    if !recorded {
        tracing::warn!(
            "Dispute not recorded: payment={} status={} dispute={}",
            intent.id,
            intent.status,
            dispute_id
        );
        return Ok(false);
    }

    if suspend {
        let suspended = queries::set_enrollment_status(
            conn,
            &intent.user_id,
            &intent.course_id,
            crate::models::EnrollmentStatus::Suspended,
        )?;
        if suspended {
            tracing::info!(
                "Enrollment suspended pending dispute: payment={}, dispute={}",
                intent.id,
                dispute_id
            );
        }
    } else {
        tracing::info!(
            "Dispute recorded without suspension: payment={}, dispute={}",
            intent.id,
            dispute_id
        );
    }

    Ok(true)
}

/// Bring local refund accounting up to a provider-reported total.
///
/// Used by reconciliation when the provider refunded more than we recorded
/// (a crash between the provider call and the local update). The difference
/// is accumulated behind the usual compare-and-set, a history row is
/// appended, and a now-full refund transitions the intent.
pub fn settle_refund_readback(
    conn: &Connection,
    intent: &PaymentIntent,
    provider_refunded_cents: i64,
) -> Result<bool> {
    let local = intent.refunded.cents;
    if provider_refunded_cents <= local {
        return Ok(false);
    }

    let delta = provider_refunded_cents - local;
    if !queries::add_refund_accounting(conn, &intent.id, delta, local)? {
        // Concurrent refund activity; the next reconcile pass settles it.
        return Ok(false);
    }
    queries::create_payment_refund(conn, &intent.id, None, delta, Some("reconciled"))?;

    tracing::info!(
        "Refund reconciled from provider: payment={}, delta_cents={}",
        intent.id,
        delta
    );

    if provider_refunded_cents >= intent.amount.cents {
        finalize_full_refund(conn, &intent.id)?;
    }

    Ok(true)
}

/// Transition a fully-refunded intent to `refunded` and roll the
/// enrollment back. Shared by the refund manager and reconciliation.
pub fn finalize_full_refund(conn: &Connection, payment_id: &str) -> Result<TransitionOutcome> {
    let change = StatusChange {
        refunded_at: Some(Utc::now().timestamp()),
        ..Default::default()
    };
    let outcome = queries::transition_payment(conn, payment_id, PaymentStatus::Refunded, &change)?;

    if matches!(
        outcome,
        TransitionOutcome::Applied | TransitionOutcome::AlreadyApplied
    ) {
        let settled = queries::get_payment_intent(conn, payment_id)?
            .ok_or_else(|| crate::error::AppError::NotFound(format!("payment {}", payment_id)))?;
        enrollment::apply_payment_outcome(conn, &settled)?;
    }

    Ok(outcome)
}
