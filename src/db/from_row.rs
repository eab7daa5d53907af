//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;
use crate::money::Money;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupt data.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const COURSE_COLS: &str = "id, title, price_cents, currency, purchasable, created_at";

pub const PAYMENT_INTENT_COLS: &str = "id, user_id, course_id, provider_session_id, provider_charge_id, amount_cents, currency, status, refunded_cents, failure_reason, dispute_id, dispute_reason, created_at, paid_at, refunded_at";

pub const PAYMENT_REFUND_COLS: &str =
    "id, payment_id, provider_refund_id, amount_cents, reason, created_at";

pub const ENROLLMENT_COLS: &str =
    "id, user_id, course_id, status, payment_status, payment_id, created_at, updated_at";

// ============ FromRow Implementations ============

impl FromRow for Course {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Course {
            id: row.get(0)?,
            title: row.get(1)?,
            price_cents: row.get(2)?,
            currency: row.get(3)?,
            purchasable: row.get::<_, i64>(4)? != 0,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for PaymentIntent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let amount_cents: i64 = row.get(5)?;
        let currency: String = row.get(6)?;
        let refunded_cents: i64 = row.get(8)?;
        Ok(PaymentIntent {
            id: row.get(0)?,
            user_id: row.get(1)?,
            course_id: row.get(2)?,
            provider_session_id: row.get(3)?,
            provider_charge_id: row.get(4)?,
            amount: Money::new(amount_cents, &currency),
            refunded: Money::new(refunded_cents, &currency),
            status: parse_enum(row, 7, "status")?,
            failure_reason: row.get(9)?,
            dispute_id: row.get(10)?,
            dispute_reason: row.get(11)?,
            created_at: row.get(12)?,
            paid_at: row.get(13)?,
            refunded_at: row.get(14)?,
        })
    }
}

impl FromRow for PaymentRefund {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PaymentRefund {
            id: row.get(0)?,
            payment_id: row.get(1)?,
            provider_refund_id: row.get(2)?,
            amount_cents: row.get(3)?,
            reason: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for Enrollment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Enrollment {
            id: row.get(0)?,
            user_id: row.get(1)?,
            course_id: row.get(2)?,
            status: parse_enum(row, 3, "status")?,
            payment_status: parse_enum(row, 4, "payment_status")?,
            payment_id: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}
