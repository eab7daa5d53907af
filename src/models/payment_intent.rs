use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Status of a payment intent.
///
/// Forward progress is monotonic: `pending` resolves to exactly one of
/// `succeeded`, `failed`, or `canceled`; only `succeeded` may later move to
/// `refunded` (full refund). `succeeded` remains mutable for refund
/// accounting but never for status regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Canceled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Refunded => "refunded",
        }
    }

    /// Whether any further status transition is possible from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Canceled | Self::Refunded)
    }

    /// Whether the transition `self -> next` is legal.
    ///
    /// Out-of-order webhook delivery is made safe by rejecting everything
    /// not listed here rather than applying it.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Succeeded)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Canceled)
                | (Self::Succeeded, Self::Refunded)
        )
    }
}

impl FromStr for PaymentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            "refunded" => Ok(Self::Refunded),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of attempting a status transition through the store.
///
/// `AlreadyApplied` distinguishes an idempotent replay from a genuine
/// conflict so webhook redelivery can be acked without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    AlreadyApplied,
    Rejected,
}

/// The ledger record of one attempted course purchase.
///
/// Created in `pending` by checkout, mutated only through the
/// compare-and-set transition path, never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub provider_session_id: String,
    /// Provider charge reference; set when the charge occurs.
    pub provider_charge_id: Option<String>,
    pub amount: Money,
    pub refunded: Money,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub dispute_id: Option<String>,
    pub dispute_reason: Option<String>,
    pub created_at: i64,
    pub paid_at: Option<i64>,
    pub refunded_at: Option<i64>,
}

impl PaymentIntent {
    /// Remaining refundable amount in minor units.
    pub fn remaining_refundable_cents(&self) -> i64 {
        self.amount.cents - self.refunded.cents
    }
}

/// Data required to persist a new pending payment intent.
#[derive(Debug, Clone)]
pub struct CreatePaymentIntent {
    /// Pre-generated intent id; it travels in provider session metadata so
    /// charge-level events can be correlated even without the session event.
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub provider_session_id: String,
    pub amount: Money,
}

/// Field updates that may accompany a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusChange {
    pub provider_charge_id: Option<String>,
    pub paid_at: Option<i64>,
    pub failure_reason: Option<String>,
    pub refunded_at: Option<i64>,
}

/// One applied refund against a payment intent. Append-only.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentRefund {
    pub id: String,
    pub payment_id: String,
    pub provider_refund_id: Option<String>,
    pub amount_cents: i64,
    pub reason: Option<String>,
    pub created_at: i64,
}

/// Revenue statistics for a single currency, amounts in minor units.
#[derive(Debug, Clone, Serialize)]
pub struct CurrencyStats {
    pub currency: String,
    /// Sum of amounts that reached `succeeded` (including later refunds).
    pub gross_cents: i64,
    /// Sum of refunded amounts.
    pub refunded_cents: i64,
    /// Gross minus refunds.
    pub net_cents: i64,
}

/// Aggregate statistics over the payment ledger.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentStats {
    /// Revenue by currency (amounts cannot be summed across currencies).
    pub by_currency: Vec<CurrencyStats>,
    pub pending_count: i64,
    pub succeeded_count: i64,
    pub failed_count: i64,
    pub canceled_count: i64,
    pub refunded_count: i64,
    pub disputed_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(Succeeded));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Canceled));
        assert!(Succeeded.can_transition_to(Refunded));
    }

    #[test]
    fn illegal_transitions_rejected() {
        use PaymentStatus::*;
        // Out-of-order delivery must never resurrect a resolved payment.
        assert!(!Failed.can_transition_to(Succeeded));
        assert!(!Canceled.can_transition_to(Succeeded));
        assert!(!Refunded.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Succeeded.can_transition_to(Canceled));
        assert!(!Failed.can_transition_to(Refunded));
        assert!(!Pending.can_transition_to(Refunded));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn terminal_states() {
        use PaymentStatus::*;
        assert!(Failed.is_terminal());
        assert!(Canceled.is_terminal());
        assert!(Refunded.is_terminal());
        assert!(!Pending.is_terminal());
        // Succeeded is terminal for forward progress but still refundable.
        assert!(!Succeeded.is_terminal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        use PaymentStatus::*;
        for status in [Pending, Succeeded, Failed, Canceled, Refunded] {
            assert_eq!(status.as_str().parse::<PaymentStatus>(), Ok(status));
        }
        assert!("garbage".parse::<PaymentStatus>().is_err());
    }
}
