use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Course catalogue record. Owned by the external course-management
/// collaborator; mirrored here because checkout needs price and
/// purchasability without a network hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub price_cents: i64,
    pub currency: String,
    pub purchasable: bool,
    pub created_at: i64,
}

impl Course {
    pub fn price(&self) -> Money {
        Money::new(self.price_cents, &self.currency)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCourse {
    pub title: String,
    pub price_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_purchasable")]
    pub purchasable: bool,
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_purchasable() -> bool {
    true
}
