use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::PartiallyRefunded => "partially_refunded",
        }
    }

    /// Status an order lands in once `refunded` of `total` has gone back.
    pub fn after_refund(refunded: i64, total: i64) -> Self {
        if refunded >= total {
            Self::Refunded
        } else {
            Self::PartiallyRefunded
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            "partially_refunded" => Ok(Self::PartiallyRefunded),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Registered purchaser. None = guest checkout.
    pub user_id: Option<String>,
    /// Always present; the guest identity when `user_id` is None.
    pub purchaser_email: String,
    pub purchaser_name: Option<String>,
    pub event_id: String,
    pub total_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
    /// Cumulative amount returned to the purchaser. Never decreases.
    pub refund_amount_cents: i64,
    pub refund_reason: Option<String>,
    /// Stripe PaymentIntent id. Unique across orders; immutable once set.
    pub stripe_payment_intent_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub refunded_at: Option<i64>,
}

impl Order {
    pub fn is_guest(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn refundable_cents(&self) -> i64 {
        (self.total_cents - self.refund_amount_cents).max(0)
    }

    pub fn is_fully_refunded(&self) -> bool {
        self.status == OrderStatus::Refunded || self.refund_amount_cents >= self.total_cents
    }
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub user_id: Option<String>,
    pub purchaser_email: String,
    pub purchaser_name: Option<String>,
    pub event_id: String,
    pub total_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub stripe_payment_intent_id: Option<String>,
}
