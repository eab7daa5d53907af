use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Academic access state of an enrollment. The course-management
/// collaborator owns progress/grades; this engine only flips access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Suspended,
    Inactive,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Inactive => "inactive",
        }
    }
}

impl FromStr for EnrollmentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "inactive" => Ok(Self::Inactive),
            _ => Err(()),
        }
    }
}

/// Payment-derived facet of an enrollment, owned by this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentPaymentStatus {
    Pending,
    Paid,
    Refunded,
    Failed,
}

impl EnrollmentPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Refunded => "refunded",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for EnrollmentPaymentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "refunded" => Ok(Self::Refunded),
            "failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

/// One user's enrollment in one course. At most one row per
/// `(user_id, course_id)`; written exclusively through upserts so repeated
/// application of the same target state is a no-op.
#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub status: EnrollmentStatus,
    pub payment_status: EnrollmentPaymentStatus,
    /// Payment intent that last touched this enrollment.
    pub payment_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
