//! Seat accounting for ticket types and events.
//!
//! `sold_count <= capacity` holds at all times: the read-side checks here
//! produce friendly errors, and the guarded UPDATEs inside `issue_tickets`
//! make the invariant hold under concurrent purchases. Sold counts only
//! ever grow; refunds do not release seats.

use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::queries;
use crate::error::AppError;
use crate::models::{Event, NewTicket, Order, Ticket, TicketType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub ticket_type_id: String,
    pub quantity: i64,
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("ticket type {0} not found")]
    UnknownTicketType(String),

    #[error("ticket type {ticket_type_id} does not belong to event {event_id}")]
    WrongEvent {
        ticket_type_id: String,
        event_id: String,
    },

    #[error("not enough seats for {ticket_type_id}: requested {requested}, remaining {remaining}")]
    TicketTypeSoldOut {
        ticket_type_id: String,
        requested: i64,
        remaining: i64,
    },

    #[error("event {event_id} is over capacity: requested {requested}, remaining {remaining}")]
    EventSoldOut {
        event_id: String,
        requested: i64,
        remaining: i64,
    },

    #[error(transparent)]
    Storage(#[from] AppError),
}

impl From<rusqlite::Error> for InventoryError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.into())
    }
}

impl From<InventoryError> for AppError {
    fn from(e: InventoryError) -> Self {
        match e {
            InventoryError::Storage(inner) => inner,
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl InventoryError {
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::TicketTypeSoldOut { .. } | Self::EventSoldOut { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemAvailability {
    pub ticket_type_id: String,
    pub name: String,
    pub requested: i64,
    pub remaining: i64,
    pub on_sale: bool,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Availability {
    pub event_id: String,
    /// Event-wide seats left, when the event has its own ceiling
    pub event_remaining: Option<i64>,
    pub items: Vec<ItemAvailability>,
    pub available: bool,
}

/// Combine line items per ticket type, keeping first-seen order.
pub fn aggregate(items: &[LineItem]) -> Vec<(String, i64)> {
    let mut totals: Vec<(String, i64)> = Vec::new();
    for item in items {
        match totals.iter_mut().find(|(id, _)| *id == item.ticket_type_id) {
            Some((_, qty)) => *qty = qty.saturating_add(item.quantity),
            None => totals.push((item.ticket_type_id.clone(), item.quantity)),
        }
    }
    totals
}

/// Load the ticket types named by `items`, checking they belong to `event_id`.
pub fn load_ticket_types(
    conn: &Connection,
    event_id: &str,
    items: &[LineItem],
) -> Result<Vec<(TicketType, i64)>, InventoryError> {
    aggregate(items)
        .into_iter()
        .map(|(id, qty)| {
            let ticket_type = queries::get_ticket_type_by_id(conn, &id)?
                .ok_or_else(|| InventoryError::UnknownTicketType(id.clone()))?;
            if ticket_type.event_id != event_id {
                return Err(InventoryError::WrongEvent {
                    ticket_type_id: id,
                    event_id: event_id.to_string(),
                });
            }
            Ok((ticket_type, qty))
        })
        .collect()
}

/// Pre-purchase view: remaining seats and sale windows for each requested type.
pub fn check_availability(
    conn: &Connection,
    event: &Event,
    items: &[LineItem],
    now: i64,
) -> Result<Availability, InventoryError> {
    // Fresh row: the caller's copy may come from the catalog cache.
    let event = queries::get_event_by_id(conn, &event.id)?
        .ok_or_else(|| AppError::NotFound(format!("event {}", event.id)))?;

    let requested_total = items.iter().fold(0i64, |acc, i| acc.saturating_add(i.quantity));
    let event_remaining = event.remaining();
    let event_ok = !event.cancelled && event_remaining.is_none_or(|r| requested_total <= r);

    let items: Vec<ItemAvailability> = load_ticket_types(conn, &event.id, items)?
        .into_iter()
        .map(|(tt, requested)| {
            let remaining = tt.remaining();
            let on_sale = tt.is_on_sale(now);
            ItemAvailability {
                available: on_sale && requested <= remaining,
                ticket_type_id: tt.id,
                name: tt.name,
                requested,
                remaining,
                on_sale,
            }
        })
        .collect();

    let available = event_ok && !items.is_empty() && items.iter().all(|i| i.available);

    Ok(Availability {
        event_id: event.id,
        event_remaining,
        items,
        available,
    })
}

/// Capacity pre-check run before an order row exists.
///
/// Sale windows are not enforced here: the payment has already been taken
/// and checkout applied them.
pub fn ensure_capacity(
    conn: &Connection,
    event_id: &str,
    ticket_types: &[(TicketType, i64)],
) -> Result<(), InventoryError> {
    for (tt, requested) in ticket_types {
        if *requested > tt.remaining() {
            return Err(InventoryError::TicketTypeSoldOut {
                ticket_type_id: tt.id.clone(),
                requested: *requested,
                remaining: tt.remaining(),
            });
        }
    }

    let event = queries::get_event_by_id(conn, event_id)?
        .ok_or_else(|| AppError::NotFound(format!("event {}", event_id)))?;
    let requested = ticket_types
        .iter()
        .fold(0i64, |acc, (_, q)| acc.saturating_add(*q));
    if let Some(remaining) = event.remaining()
        && requested > remaining
    {
        return Err(InventoryError::EventSoldOut {
            event_id: event_id.to_string(),
            requested,
            remaining,
        });
    }

    Ok(())
}

#[derive(Debug)]
pub enum IssueOutcome {
    Issued(Vec<Ticket>),
    /// Another delivery already issued this order's tickets
    AlreadyIssued(i64),
}

/// Issue one ticket row per seat for `order`, all or nothing.
///
/// Runs in an IMMEDIATE transaction so two deliveries of the same payment
/// serialize: the loser sees the winner's tickets and issues none.
pub fn issue_tickets(
    conn: &mut Connection,
    order: &Order,
    seats: &[NewTicket],
) -> Result<IssueOutcome, InventoryError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let existing = queries::count_tickets_for_order(&tx, &order.id)?;
    if existing > 0 {
        return Ok(IssueOutcome::AlreadyIssued(existing));
    }

    let per_type: Vec<LineItem> = seats
        .iter()
        .map(|s| LineItem {
            ticket_type_id: s.ticket_type_id.clone(),
            quantity: 1,
        })
        .collect();

    for (ticket_type_id, quantity) in aggregate(&per_type) {
        if !queries::increment_ticket_type_sold(&tx, &ticket_type_id, quantity)? {
            let remaining = queries::get_ticket_type_by_id(&tx, &ticket_type_id)?
                .map(|tt| tt.remaining())
                .unwrap_or(0);
            return Err(InventoryError::TicketTypeSoldOut {
                ticket_type_id,
                requested: quantity,
                remaining,
            });
        }
    }

    let total = seats.len() as i64;
    if !queries::increment_event_sold(&tx, &order.event_id, total)? {
        let remaining = queries::get_event_by_id(&tx, &order.event_id)?
            .and_then(|e| e.remaining())
            .unwrap_or(0);
        return Err(InventoryError::EventSoldOut {
            event_id: order.event_id.clone(),
            requested: total,
            remaining,
        });
    }

    let mut issued = Vec::with_capacity(seats.len());
    for seat in seats {
        issued.push(queries::create_ticket(&tx, order, seat)?);
    }

    tx.commit()?;

    tracing::debug!(order_id = %order.id, count = issued.len(), "Tickets issued");
    Ok(IssueOutcome::Issued(issued))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::models::{CreateEvent, CreateOrder, CreateTicketType, OrderStatus};

    struct Fixture {
        conn: Connection,
        event: Event,
        ga: TicketType,
    }

    fn fixture(event_capacity: Option<i64>, ga_capacity: i64) -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let event = queries::create_event(
            &conn,
            &CreateEvent {
                legacy_id: None,
                slug: "show".into(),
                name: "Show".into(),
                starts_at: 2_000_000_000,
                capacity: event_capacity,
            },
        )
        .unwrap();
        let ga = queries::create_ticket_type(
            &conn,
            &event.id,
            &CreateTicketType {
                name: "GA".into(),
                price_cents: 2500,
                capacity: ga_capacity,
                sale_starts_at: None,
                sale_ends_at: None,
            },
        )
        .unwrap();
        Fixture { conn, event, ga }
    }

    fn order(conn: &Connection, event_id: &str) -> Order {
        queries::create_order(
            conn,
            &CreateOrder {
                user_id: None,
                purchaser_email: "guest@example.com".into(),
                purchaser_name: None,
                event_id: event_id.into(),
                total_cents: 5000,
                currency: "usd".into(),
                status: OrderStatus::Completed,
                stripe_payment_intent_id: Some(format!("pi_{}", uuid::Uuid::new_v4().simple())),
            },
        )
        .unwrap()
    }

    fn seats(tt: &TicketType, n: usize) -> Vec<NewTicket> {
        (0..n)
            .map(|_| NewTicket {
                ticket_type_id: tt.id.clone(),
                unit_price_cents: tt.price_cents,
                attendee_name: None,
                attendee_email: None,
            })
            .collect()
    }

    #[test]
    fn test_aggregate_combines_duplicates() {
        let items = vec![
            LineItem { ticket_type_id: "a".into(), quantity: 1 },
            LineItem { ticket_type_id: "b".into(), quantity: 2 },
            LineItem { ticket_type_id: "a".into(), quantity: 3 },
        ];
        assert_eq!(aggregate(&items), vec![("a".into(), 4), ("b".into(), 2)]);
    }

    #[test]
    fn test_oversized_requests_saturate() {
        let items = vec![
            LineItem { ticket_type_id: "a".into(), quantity: i64::MAX },
            LineItem { ticket_type_id: "a".into(), quantity: i64::MAX },
        ];
        assert_eq!(aggregate(&items), vec![("a".into(), i64::MAX)]);

        let f = fixture(None, 2);
        let items = vec![
            LineItem { ticket_type_id: f.ga.id.clone(), quantity: i64::MAX },
            LineItem { ticket_type_id: f.ga.id.clone(), quantity: 1 },
        ];
        let availability = check_availability(&f.conn, &f.event, &items, 0).unwrap();
        assert!(!availability.available);

        let loaded = vec![(f.ga.clone(), i64::MAX), (f.ga.clone(), i64::MAX)];
        assert!(ensure_capacity(&f.conn, &f.event.id, &loaded).unwrap_err().is_capacity());
    }

    #[test]
    fn test_issue_is_idempotent_per_order() {
        let mut f = fixture(None, 10);
        let o = order(&f.conn, &f.event.id);

        let first = issue_tickets(&mut f.conn, &o, &seats(&f.ga, 2)).unwrap();
        assert!(matches!(first, IssueOutcome::Issued(ref t) if t.len() == 2));

        let second = issue_tickets(&mut f.conn, &o, &seats(&f.ga, 2)).unwrap();
        assert!(matches!(second, IssueOutcome::AlreadyIssued(2)));

        let tt = queries::get_ticket_type_by_id(&f.conn, &f.ga.id).unwrap().unwrap();
        assert_eq!(tt.sold_count, 2);
    }

    #[test]
    fn test_overflow_rolls_back_everything() {
        let mut f = fixture(None, 3);
        let o = order(&f.conn, &f.event.id);

        let err = issue_tickets(&mut f.conn, &o, &seats(&f.ga, 4)).unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(queries::count_tickets_for_order(&f.conn, &o.id).unwrap(), 0);
        let tt = queries::get_ticket_type_by_id(&f.conn, &f.ga.id).unwrap().unwrap();
        assert_eq!(tt.sold_count, 0);
    }

    #[test]
    fn test_event_ceiling_applies_across_types() {
        let mut f = fixture(Some(2), 10);
        let o = order(&f.conn, &f.event.id);

        let err = issue_tickets(&mut f.conn, &o, &seats(&f.ga, 3)).unwrap_err();
        assert!(matches!(err, InventoryError::EventSoldOut { remaining: 2, .. }));
        let tt = queries::get_ticket_type_by_id(&f.conn, &f.ga.id).unwrap().unwrap();
        assert_eq!(tt.sold_count, 0, "ticket type increment must roll back too");
    }

    #[test]
    fn test_ensure_capacity_and_availability() {
        let f = fixture(None, 2);
        let items = vec![LineItem { ticket_type_id: f.ga.id.clone(), quantity: 3 }];

        let loaded = load_ticket_types(&f.conn, &f.event.id, &items).unwrap();
        assert!(ensure_capacity(&f.conn, &f.event.id, &loaded).unwrap_err().is_capacity());

        let availability = check_availability(&f.conn, &f.event, &items, 0).unwrap();
        assert!(!availability.available);
        assert_eq!(availability.items[0].remaining, 2);
    }

    #[test]
    fn test_ticket_type_from_other_event_rejected() {
        let f = fixture(None, 2);
        let items = vec![LineItem { ticket_type_id: f.ga.id.clone(), quantity: 1 }];
        let err = load_ticket_types(&f.conn, "bo_evt_other", &items).unwrap_err();
        assert!(matches!(err, InventoryError::WrongEvent { .. }));
    }
}
