use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Active,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(()),
        }
    }
}

/// One admitted seat. Multi-quantity purchases expand into one row per unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub order_id: String,
    pub ticket_type_id: String,
    pub event_id: String,
    pub unit_price_cents: i64,
    /// Always 1 (enforced by the schema)
    pub quantity: i64,
    pub confirmation_code: String,
    pub status: TicketStatus,
    pub attendee_name: Option<String>,
    pub attendee_email: Option<String>,
    pub created_at: i64,
}

/// Input row for the ticket batch insert.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub ticket_type_id: String,
    pub unit_price_cents: i64,
    pub attendee_name: Option<String>,
    pub attendee_email: Option<String>,
}
