use serde::{Deserialize, Serialize};

/// Policy bucket governing fee and deadline rules for a refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundType {
    /// Event was cancelled by the organizer. No fee, no deadline.
    FullCancellation,
    /// Purchaser changed their mind. Fixed fee, closes before the event.
    CustomerRequest,
}

impl RefundType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullCancellation => "full_cancellation",
            Self::CustomerRequest => "customer_request",
        }
    }
}

impl std::fmt::Display for RefundType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Full order id, or the 8-character display form
    pub order_id: String,
    pub refund_type: RefundType,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundSummary {
    /// Processor refund id (re_...)
    pub id: String,
    pub amount: i64,
    pub fee: i64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundOrderSummary {
    pub id: String,
    pub status: super::OrderStatus,
    pub total_amount: i64,
    pub previous_refund_amount: i64,
    pub new_refund_amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundResponse {
    pub refund: RefundSummary,
    pub order: RefundOrderSummary,
}
