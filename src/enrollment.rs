//! Enrollment derivation: mapping payment state to enrollment state.
//!
//! The mapping itself is a pure function; applying it is an upsert keyed by
//! `(user_id, course_id)`, so a partially-completed earlier attempt or a
//! webhook redelivery lands on the same final row.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{EnrollmentPaymentStatus, EnrollmentStatus, PaymentIntent, PaymentStatus};

/// What an enrollment should look like given a payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollmentTarget {
    pub payment_status: EnrollmentPaymentStatus,
    /// Academic status to set; None leaves it untouched.
    pub academic_status: Option<EnrollmentStatus>,
    /// Whether a missing enrollment row should be created. A failed payment
    /// only annotates an existing (speculative) row; it never creates one.
    pub create_if_missing: bool,
}

/// Pure derivation from payment status to enrollment target.
///
/// Returns None when the payment status implies no enrollment effect at all.
pub fn derived_target(status: PaymentStatus) -> Option<EnrollmentTarget> {
    match status {
        PaymentStatus::Succeeded => Some(EnrollmentTarget {
            payment_status: EnrollmentPaymentStatus::Paid,
            academic_status: Some(EnrollmentStatus::Active),
            create_if_missing: true,
        }),
        PaymentStatus::Failed => Some(EnrollmentTarget {
            payment_status: EnrollmentPaymentStatus::Failed,
            academic_status: None,
            create_if_missing: false,
        }),
        PaymentStatus::Refunded => Some(EnrollmentTarget {
            payment_status: EnrollmentPaymentStatus::Refunded,
            academic_status: Some(EnrollmentStatus::Inactive),
            create_if_missing: false,
        }),
        PaymentStatus::Pending | PaymentStatus::Canceled => None,
    }
}

/// Apply the enrollment state derived from a payment intent.
///
/// Idempotent: repeated application with the same payment state is a no-op.
/// A succeeded payment reactivates an enrollment previously left in
/// `refunded`/`inactive` - repurchase after refund is legal.
pub fn apply_payment_outcome(conn: &Connection, intent: &PaymentIntent) -> Result<()> {
    let Some(target) = derived_target(intent.status) else {
        return Ok(());
    };

    if target.create_if_missing {
        queries::upsert_enrollment(
            conn,
            &intent.user_id,
            &intent.course_id,
            &intent.id,
            target
                .academic_status
                .unwrap_or(EnrollmentStatus::Active),
            target.payment_status,
        )?;
    } else {
        let updated = queries::mark_enrollment_payment(
            conn,
            &intent.user_id,
            &intent.course_id,
            target.payment_status,
            target.academic_status,
        )?;
        if !updated {
            tracing::debug!(
                "No enrollment to update for payment {} ({} -> {:?})",
                intent.id,
                intent.status,
                target.payment_status
            );
        }
    }

    Ok(())
}
