use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode};

use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    query_all, query_one, COURSE_COLS, ENROLLMENT_COLS, PAYMENT_INTENT_COLS, PAYMENT_REFUND_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Courses ============

pub fn create_course(conn: &Connection, input: &CreateCourse) -> Result<Course> {
    let id = EntityType::Course.gen_id();
    let ts = now();
    let currency = input.currency.to_lowercase();

    conn.execute(
        "INSERT INTO courses (id, title, price_cents, currency, purchasable, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &id,
            &input.title,
            input.price_cents,
            &currency,
            input.purchasable as i64,
            ts
        ],
    )?;

    Ok(Course {
        id,
        title: input.title.clone(),
        price_cents: input.price_cents,
        currency,
        purchasable: input.purchasable,
        created_at: ts,
    })
}

pub fn get_course_by_id(conn: &Connection, id: &str) -> Result<Option<Course>> {
    query_one(
        conn,
        &format!("SELECT {} FROM courses WHERE id = ?1", COURSE_COLS),
        &[&id],
    )
}

pub fn list_courses(conn: &Connection) -> Result<Vec<Course>> {
    query_all(
        conn,
        &format!("SELECT {} FROM courses ORDER BY created_at", COURSE_COLS),
        &[],
    )
}

// ============ Payment Intents ============

/// Insert a new pending payment intent.
///
/// The partial unique index over `(user_id, course_id) WHERE status =
/// 'pending'` makes the store reject a second in-flight payment; that
/// constraint violation surfaces as `PendingPaymentExists`, which is what
/// the loser of a concurrent double-checkout sees.
pub fn create_payment_intent(
    conn: &Connection,
    input: &CreatePaymentIntent,
) -> Result<PaymentIntent> {
    let ts = now();

    let inserted = conn.execute(
        "INSERT INTO payment_intents
            (id, user_id, course_id, provider_session_id, amount_cents, currency, status, refunded_cents, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7)",
        params![
            &input.id,
            &input.user_id,
            &input.course_id,
            &input.provider_session_id,
            input.amount.cents,
            &input.amount.currency,
            ts
        ],
    );

    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, Some(ref msg)))
            if e.code == ErrorCode::ConstraintViolation
                && msg.contains("payment_intents.user_id") =>
        {
            return Err(AppError::PendingPaymentExists);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(PaymentIntent {
        id: input.id.clone(),
        user_id: input.user_id.clone(),
        course_id: input.course_id.clone(),
        provider_session_id: input.provider_session_id.clone(),
        provider_charge_id: None,
        amount: input.amount.clone(),
        refunded: crate::money::Money::zero(&input.amount.currency),
        status: PaymentStatus::Pending,
        failure_reason: None,
        dispute_id: None,
        dispute_reason: None,
        created_at: ts,
        paid_at: None,
        refunded_at: None,
    })
}

pub fn get_payment_intent(conn: &Connection, id: &str) -> Result<Option<PaymentIntent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_intents WHERE id = ?1",
            PAYMENT_INTENT_COLS
        ),
        &[&id],
    )
}

pub fn get_payment_intent_by_session(
    conn: &Connection,
    provider_session_id: &str,
) -> Result<Option<PaymentIntent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_intents WHERE provider_session_id = ?1",
            PAYMENT_INTENT_COLS
        ),
        &[&provider_session_id],
    )
}

pub fn get_payment_intent_by_charge(
    conn: &Connection,
    provider_charge_id: &str,
) -> Result<Option<PaymentIntent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_intents WHERE provider_charge_id = ?1",
            PAYMENT_INTENT_COLS
        ),
        &[&provider_charge_id],
    )
}

pub fn get_pending_payment(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
) -> Result<Option<PaymentIntent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_intents
             WHERE user_id = ?1 AND course_id = ?2 AND status = 'pending'",
            PAYMENT_INTENT_COLS
        ),
        &[&user_id, &course_id],
    )
}

pub fn list_payments_for_user(
    conn: &Connection,
    user_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<PaymentIntent>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payment_intents
             WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            PAYMENT_INTENT_COLS
        ),
        &[&user_id, &limit, &offset],
    )
}

pub fn count_payments_for_user(conn: &Connection, user_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM payment_intents WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn list_all_payments(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<PaymentIntent>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payment_intents ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            PAYMENT_INTENT_COLS
        ),
        &[&limit, &offset],
    )
}

pub fn count_all_payments(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM payment_intents", [], |row| row.get(0))?;
    Ok(count)
}

/// Apply a status transition through optimistic concurrency.
///
/// This is the only code that changes `payment_intents.status`. The current
/// row is read, the transition is checked against the state machine, and the
/// update is keyed on `(id, current_status)` so a concurrent writer causes
/// zero affected rows rather than a lost update. The caller learns which of
/// the three things happened; nothing is ever force-written.
pub fn transition_payment(
    conn: &Connection,
    id: &str,
    to: PaymentStatus,
    change: &StatusChange,
) -> Result<TransitionOutcome> {
    let current = get_payment_intent(conn, id)?
        .ok_or_else(|| AppError::NotFound(format!("payment {}", id)))?;

    if current.status == to {
        // Replay of an already-applied transition. A success replay carrying
        // a different charge id is a conflict, not idempotence.
        if to == PaymentStatus::Succeeded {
            if let (Some(existing), Some(incoming)) =
                (&current.provider_charge_id, &change.provider_charge_id)
            {
                if existing != incoming {
                    return Ok(TransitionOutcome::Rejected);
                }
            }
        }
        return Ok(TransitionOutcome::AlreadyApplied);
    }

    if !current.status.can_transition_to(to) {
        return Ok(TransitionOutcome::Rejected);
    }

    if to == PaymentStatus::Succeeded {
        // A success without a charge reference is not creditable.
        let Some(incoming) = &change.provider_charge_id else {
            return Ok(TransitionOutcome::Rejected);
        };
        if let Some(existing) = &current.provider_charge_id {
            if existing != incoming {
                return Ok(TransitionOutcome::Rejected);
            }
        }
    }

    let affected = conn.execute(
        "UPDATE payment_intents SET
            status = ?1,
            provider_charge_id = COALESCE(?2, provider_charge_id),
            paid_at = COALESCE(?3, paid_at),
            failure_reason = COALESCE(?4, failure_reason),
            refunded_at = COALESCE(?5, refunded_at)
         WHERE id = ?6 AND status = ?7",
        params![
            to.as_str(),
            &change.provider_charge_id,
            change.paid_at,
            &change.failure_reason,
            change.refunded_at,
            id,
            current.status.as_str()
        ],
    )?;

    if affected > 0 {
        return Ok(TransitionOutcome::Applied);
    }

    // Lost a race with a concurrent transition; re-read and classify.
    let after = get_payment_intent(conn, id)?
        .ok_or_else(|| AppError::NotFound(format!("payment {}", id)))?;
    if after.status == to {
        Ok(TransitionOutcome::AlreadyApplied)
    } else {
        Ok(TransitionOutcome::Rejected)
    }
}

/// Accumulate refund accounting behind a compare-and-set on the previous
/// refunded total. Returns false if a concurrent refund moved the total
/// first (caller re-reads and re-validates) or the delta would exceed the
/// original amount.
pub fn add_refund_accounting(
    conn: &Connection,
    id: &str,
    delta_cents: i64,
    expected_prev_cents: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payment_intents SET refunded_cents = refunded_cents + ?1
         WHERE id = ?2 AND refunded_cents = ?3
           AND status IN ('succeeded', 'refunded')
           AND refunded_cents + ?1 <= amount_cents",
        params![delta_cents, id, expected_prev_cents],
    )?;
    Ok(affected > 0)
}

/// Record dispute details on a succeeded payment. Conditional so a
/// redelivered dispute event or a second dispute id cannot clobber the
/// first annotation.
pub fn set_dispute(
    conn: &Connection,
    payment_id: &str,
    dispute_id: &str,
    reason: Option<&str>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payment_intents SET dispute_id = ?1, dispute_reason = ?2
         WHERE id = ?3 AND status IN ('succeeded', 'refunded')
           AND (dispute_id IS NULL OR dispute_id = ?1)",
        params![dispute_id, reason, payment_id],
    )?;
    Ok(affected > 0)
}

// ============ Refund History ============

pub fn create_payment_refund(
    conn: &Connection,
    payment_id: &str,
    provider_refund_id: Option<&str>,
    amount_cents: i64,
    reason: Option<&str>,
) -> Result<PaymentRefund> {
    let id = EntityType::Refund.gen_id();
    let ts = now();

    conn.execute(
        "INSERT INTO payment_refunds (id, payment_id, provider_refund_id, amount_cents, reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, payment_id, provider_refund_id, amount_cents, reason, ts],
    )?;

    Ok(PaymentRefund {
        id,
        payment_id: payment_id.to_string(),
        provider_refund_id: provider_refund_id.map(|s| s.to_string()),
        amount_cents,
        reason: reason.map(|s| s.to_string()),
        created_at: ts,
    })
}

pub fn list_refunds_for_payment(
    conn: &Connection,
    payment_id: &str,
) -> Result<Vec<PaymentRefund>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payment_refunds WHERE payment_id = ?1 ORDER BY created_at",
            PAYMENT_REFUND_COLS
        ),
        &[&payment_id],
    )
}

// ============ Enrollments ============

pub fn get_enrollment(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
) -> Result<Option<Enrollment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM enrollments WHERE user_id = ?1 AND course_id = ?2",
            ENROLLMENT_COLS
        ),
        &[&user_id, &course_id],
    )
}

/// Create or overwrite the enrollment for `(user, course)` with a target
/// state. Keyed upsert: applying the same target twice is a no-op, which is
/// what makes enrollment derivation safe to repeat after partial failures.
pub fn upsert_enrollment(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
    payment_id: &str,
    status: EnrollmentStatus,
    payment_status: EnrollmentPaymentStatus,
) -> Result<()> {
    let ts = now();
    conn.execute(
        "INSERT INTO enrollments (id, user_id, course_id, status, payment_status, payment_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT(user_id, course_id) DO UPDATE SET
             status = excluded.status,
             payment_status = excluded.payment_status,
             payment_id = excluded.payment_id,
             updated_at = excluded.updated_at",
        params![
            EntityType::Enrollment.gen_id(),
            user_id,
            course_id,
            status.as_str(),
            payment_status.as_str(),
            payment_id,
            ts
        ],
    )?;
    Ok(())
}

/// Update the payment-derived facet of an enrollment if one exists,
/// optionally changing the academic status as well. Returns false when no
/// enrollment row is present (nothing to update; not an error).
pub fn mark_enrollment_payment(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
    payment_status: EnrollmentPaymentStatus,
    academic: Option<EnrollmentStatus>,
) -> Result<bool> {
    let ts = now();
    let affected = match academic {
        Some(status) => conn.execute(
            "UPDATE enrollments SET payment_status = ?1, status = ?2, updated_at = ?3
             WHERE user_id = ?4 AND course_id = ?5",
            params![payment_status.as_str(), status.as_str(), ts, user_id, course_id],
        )?,
        None => conn.execute(
            "UPDATE enrollments SET payment_status = ?1, updated_at = ?2
             WHERE user_id = ?3 AND course_id = ?4",
            params![payment_status.as_str(), ts, user_id, course_id],
        )?,
    };
    Ok(affected > 0)
}

/// Set only the academic status (dispute suspension path).
pub fn set_enrollment_status(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
    status: EnrollmentStatus,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE enrollments SET status = ?1, updated_at = ?2
         WHERE user_id = ?3 AND course_id = ?4",
        params![status.as_str(), now(), user_id, course_id],
    )?;
    Ok(affected > 0)
}

// ============ Webhook Event Deduplication ============

/// Atomically record a webhook event, returning true if this is a new event.
///
/// Uses INSERT OR IGNORE for atomicity - if the (provider, event_id) pair
/// already exists, the insert is silently ignored and we return false.
pub fn try_record_webhook_event(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (provider, event_id, created_at) VALUES (?1, ?2, ?3)",
        params![provider, event_id, now()],
    )?;
    Ok(affected > 0)
}

/// Purge webhook dedup records beyond the retention period. Providers stop
/// redelivering long before this window closes, so old records carry no
/// idempotency value.
pub fn purge_old_webhook_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM webhook_events WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Analytics ============

pub fn payment_stats(conn: &Connection) -> Result<PaymentStats> {
    let mut stmt = conn.prepare(
        "SELECT currency,
                SUM(CASE WHEN status IN ('succeeded', 'refunded') THEN amount_cents ELSE 0 END),
                SUM(CASE WHEN status IN ('succeeded', 'refunded') THEN refunded_cents ELSE 0 END)
         FROM payment_intents
         GROUP BY currency
         ORDER BY currency",
    )?;
    let by_currency = stmt
        .query_map([], |row| {
            let currency: String = row.get(0)?;
            let gross: i64 = row.get(1)?;
            let refunded: i64 = row.get(2)?;
            Ok(CurrencyStats {
                currency,
                gross_cents: gross,
                refunded_cents: refunded,
                net_cents: gross - refunded,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let count_where = |sql: &str| -> Result<i64> {
        let count = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count)
    };

    Ok(PaymentStats {
        by_currency,
        pending_count: count_where("SELECT COUNT(*) FROM payment_intents WHERE status = 'pending'")?,
        succeeded_count: count_where(
            "SELECT COUNT(*) FROM payment_intents WHERE status = 'succeeded'",
        )?,
        failed_count: count_where("SELECT COUNT(*) FROM payment_intents WHERE status = 'failed'")?,
        canceled_count: count_where(
            "SELECT COUNT(*) FROM payment_intents WHERE status = 'canceled'",
        )?,
        refunded_count: count_where(
            "SELECT COUNT(*) FROM payment_intents WHERE status = 'refunded'",
        )?,
        disputed_count: count_where(
            "SELECT COUNT(*) FROM payment_intents WHERE dispute_id IS NOT NULL",
        )?,
    })
}
