use serde::{Deserialize, Serialize};

/// An event as seen by the payment engine. Owned by the catalog; this engine
/// only reads it, apart from the monotonic `sold_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Numeric id from the previous platform, still present in old checkout metadata
    pub legacy_id: Option<i64>,
    pub slug: String,
    pub name: String,
    /// Unix timestamp of the event start (refund deadlines hang off this)
    pub starts_at: i64,
    /// Event-wide seat ceiling across all ticket types (None = per-type only)
    pub capacity: Option<i64>,
    pub sold_count: i64,
    pub cancelled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Event {
    pub fn remaining(&self) -> Option<i64> {
        self.capacity.map(|cap| (cap - self.sold_count).max(0))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEvent {
    #[serde(default)]
    pub legacy_id: Option<i64>,
    pub slug: String,
    pub name: String,
    pub starts_at: i64,
    #[serde(default)]
    pub capacity: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketType {
    pub id: String,
    pub event_id: String,
    pub name: String,
    pub price_cents: i64,
    pub capacity: i64,
    pub sold_count: i64,
    /// Sale window bounds. Absent means unbounded on that side.
    pub sale_starts_at: Option<i64>,
    pub sale_ends_at: Option<i64>,
    pub created_at: i64,
}

impl TicketType {
    pub fn remaining(&self) -> i64 {
        (self.capacity - self.sold_count).max(0)
    }

    pub fn is_on_sale(&self, now: i64) -> bool {
        self.sale_starts_at.is_none_or(|start| now >= start)
            && self.sale_ends_at.is_none_or(|end| now < end)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketType {
    pub name: String,
    pub price_cents: i64,
    pub capacity: i64,
    #[serde(default)]
    pub sale_starts_at: Option<i64>,
    #[serde(default)]
    pub sale_ends_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket_type(start: Option<i64>, end: Option<i64>) -> TicketType {
        TicketType {
            id: "bo_tt_x".into(),
            event_id: "bo_evt_x".into(),
            name: "GA".into(),
            price_cents: 2500,
            capacity: 10,
            sold_count: 12,
            sale_starts_at: start,
            sale_ends_at: end,
            created_at: 0,
        }
    }

    #[test]
    fn test_no_window_is_always_on_sale() {
        assert!(ticket_type(None, None).is_on_sale(0));
    }

    #[test]
    fn test_window_is_half_open() {
        let tt = ticket_type(Some(100), Some(200));
        assert!(!tt.is_on_sale(99));
        assert!(tt.is_on_sale(100));
        assert!(tt.is_on_sale(199));
        assert!(!tt.is_on_sale(200));
    }

    #[test]
    fn test_remaining_never_negative() {
        assert_eq!(ticket_type(None, None).remaining(), 0);
    }
}
