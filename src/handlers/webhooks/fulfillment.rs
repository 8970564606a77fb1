//! Turning a successful payment into exactly one order and one ticket set.

use std::collections::HashMap;

use rusqlite::Connection;
use serde::Deserialize;
use thiserror::Error;

use crate::db::{AppState, queries};
use crate::error::AppError;
use crate::id::short_id;
use crate::inventory::{self, IssueOutcome, LineItem};
use crate::models::{CreateOrder, Event, NewTicket, Order, OrderStatus};
use crate::notify::{Notification, TicketSummary};
use crate::payments::PaymentIntent;

use super::{WebhookAck, WebhookError};

/// Value of `user_id` for purchases made without an account.
pub const GUEST_USER_ID: &str = "guest";

/// Seats per line item.
pub const MAX_ITEM_QUANTITY: i64 = 1_000;

/// Cents per seat ($1,000,000).
pub const MAX_UNIT_PRICE: i64 = 100_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TicketItem {
    pub ticket_type_id: String,
    pub quantity: i64,
    /// Cents per seat
    pub unit_price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Purchaser {
    User(String),
    Guest,
}

/// Checkout metadata carried on the payment intent, validated in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutMetadata {
    /// Canonical id, legacy numeric id, or slug
    pub event_ref: String,
    pub purchaser: Purchaser,
    pub items: Vec<TicketItem>,
    pub email: String,
    pub name: Option<String>,
}

/// Every problem found in the metadata, not just the first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("missing [{}], invalid [{}]", .missing.join(", "), .invalid.join("; "))]
pub struct MetadataError {
    pub missing: Vec<&'static str>,
    pub invalid: Vec<String>,
}

fn field<'a>(map: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    map.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl CheckoutMetadata {
    pub fn from_metadata(map: &HashMap<String, String>) -> Result<Self, MetadataError> {
        let mut err = MetadataError::default();

        let event_ref = field(map, "event_id");
        if event_ref.is_none() {
            err.missing.push("event_id");
        }

        let purchaser = match field(map, "user_id") {
            None => {
                err.missing.push("user_id");
                None
            }
            Some(GUEST_USER_ID) => Some(Purchaser::Guest),
            Some(id) => Some(Purchaser::User(id.to_string())),
        };

        let email = match field(map, "email") {
            None => {
                err.missing.push("email");
                None
            }
            Some(email) if !email.contains('@') => {
                err.invalid.push(format!("email: {:?} is not an address", email));
                None
            }
            Some(email) => Some(email.to_string()),
        };

        let items = match field(map, "ticket_items") {
            None => {
                err.missing.push("ticket_items");
                None
            }
            Some(raw) => match serde_json::from_str::<Vec<TicketItem>>(raw) {
                Err(e) => {
                    err.invalid.push(format!("ticket_items: {}", e));
                    None
                }
                Ok(items) => {
                    let before = err.invalid.len();
                    if items.is_empty() {
                        err.invalid.push("ticket_items: at least one item required".into());
                    }
                    for (i, item) in items.iter().enumerate() {
                        if item.ticket_type_id.trim().is_empty() {
                            err.invalid.push(format!("ticket_items[{}].ticket_type_id: empty", i));
                        }
                        if !(1..=MAX_ITEM_QUANTITY).contains(&item.quantity) {
                            err.invalid.push(format!(
                                "ticket_items[{}].quantity: must be between 1 and {}, got {}",
                                i, MAX_ITEM_QUANTITY, item.quantity
                            ));
                        }
                        if !(0..=MAX_UNIT_PRICE).contains(&item.unit_price) {
                            err.invalid.push(format!(
                                "ticket_items[{}].unit_price: must be between 0 and {}, got {}",
                                i, MAX_UNIT_PRICE, item.unit_price
                            ));
                        }
                    }
                    if err.invalid.len() == before && checked_total(&items).is_none() {
                        err.invalid.push("ticket_items: total overflows".into());
                    }
                    (err.invalid.len() == before).then_some(items)
                }
            },
        };

        let name = field(map, "name").map(String::from);

        match (event_ref, purchaser, items, email) {
            (Some(event_ref), Some(purchaser), Some(items), Some(email))
                if err.missing.is_empty() && err.invalid.is_empty() =>
            {
                Ok(Self {
                    event_ref: event_ref.to_string(),
                    purchaser,
                    items,
                    email,
                    name,
                })
            }
            _ => Err(err),
        }
    }

    /// Sum of unit prices over every seat. Saturates, so an absurd total
    /// still compares greater than any amount paid.
    pub fn items_total(&self) -> i64 {
        checked_total(&self.items).unwrap_or(i64::MAX)
    }

    pub fn line_items(&self) -> Vec<LineItem> {
        self.items
            .iter()
            .map(|i| LineItem {
                ticket_type_id: i.ticket_type_id.clone(),
                quantity: i.quantity,
            })
            .collect()
    }

    /// One ticket per seat.
    pub fn seats(&self) -> Vec<NewTicket> {
        self.items
            .iter()
            .flat_map(|item| {
                (0..item.quantity).map(move |_| NewTicket {
                    ticket_type_id: item.ticket_type_id.clone(),
                    unit_price_cents: item.unit_price,
                    attendee_name: self.name.clone(),
                    attendee_email: Some(self.email.clone()),
                })
            })
            .collect()
    }

    pub fn user_id(&self) -> Option<String> {
        match &self.purchaser {
            Purchaser::User(id) => Some(id.clone()),
            Purchaser::Guest => None,
        }
    }
}

fn checked_total(items: &[TicketItem]) -> Option<i64> {
    items.iter().try_fold(0i64, |acc, item| {
        item.quantity
            .checked_mul(item.unit_price)
            .and_then(|line| acc.checked_add(line))
    })
}

#[derive(Debug)]
pub enum Guarded {
    Created(Order),
    /// An order for this payment already exists
    Duplicate(Order),
}

/// Create the order for a payment unless one already exists.
///
/// The UNIQUE payment reference is the authority: a concurrent insert that
/// loses the race gets the winner's order back.
pub fn idempotency_guard(conn: &Connection, input: &CreateOrder) -> Result<Guarded, AppError> {
    let payment_ref = input
        .stripe_payment_intent_id
        .as_deref()
        .ok_or_else(|| AppError::Internal("order without payment reference".into()))?;

    if let Some(existing) = queries::get_order_by_payment_intent(conn, payment_ref)? {
        return Ok(Guarded::Duplicate(existing));
    }

    match queries::create_order(conn, input) {
        Ok(order) => Ok(Guarded::Created(order)),
        Err(e) if e.is_constraint_on("stripe_payment_intent_id") => {
            tracing::info!(payment_intent = %payment_ref, "Lost order insert race, using existing order");
            queries::get_order_by_payment_intent(conn, payment_ref)?
                .map(Guarded::Duplicate)
                .ok_or(e)
        }
        Err(e) => Err(e),
    }
}

/// Fulfill a succeeded payment intent.
pub fn fulfill_payment(state: &AppState, intent: &PaymentIntent) -> Result<WebhookAck, WebhookError> {
    let meta = CheckoutMetadata::from_metadata(&intent.metadata).inspect_err(|e| {
        tracing::warn!(
            payment_intent = %intent.id,
            missing = ?e.missing,
            invalid = ?e.invalid,
            "Payment has unusable checkout metadata"
        );
    })?;

    let mut conn = state.db.get()?;

    let event = state
        .catalog
        .resolve(&conn, &meta.event_ref)?
        .ok_or_else(|| WebhookError::UnresolvableEvent(meta.event_ref.clone()))?;

    if let Some(existing) = queries::get_order_by_payment_intent(&conn, &intent.id)? {
        return settle_duplicate(state, &mut conn, existing, &meta, &event);
    }

    let ticket_types = inventory::load_ticket_types(&conn, &event.id, &meta.line_items())?;

    let amount = intent.paid_amount();
    let items_total = meta.items_total();
    if items_total > amount {
        return Err(WebhookError::InvalidItems(format!(
            "ticket items total {} exceeds amount paid {}",
            items_total, amount
        )));
    }

    inventory::ensure_capacity(&conn, &event.id, &ticket_types)?;

    let input = CreateOrder {
        user_id: meta.user_id(),
        purchaser_email: meta.email.clone(),
        purchaser_name: meta.name.clone(),
        event_id: event.id.clone(),
        total_cents: amount,
        currency: intent.currency.to_lowercase(),
        status: OrderStatus::Completed,
        stripe_payment_intent_id: Some(intent.id.clone()),
    };

    match idempotency_guard(&conn, &input)? {
        Guarded::Created(order) => {
            tracing::info!(
                order_id = %order.id,
                payment_intent = %intent.id,
                event_id = %event.id,
                total = amount,
                "Order created"
            );
            issue_and_confirm(state, &mut conn, &order, &meta, &event, "fulfilled")
        }
        Guarded::Duplicate(existing) => settle_duplicate(state, &mut conn, existing, &meta, &event),
    }
}

/// A duplicate delivery is a success, unless the earlier attempt left the
/// order without tickets; then this delivery finishes the job.
fn settle_duplicate(
    state: &AppState,
    conn: &mut Connection,
    order: Order,
    meta: &CheckoutMetadata,
    event: &Event,
) -> Result<WebhookAck, WebhookError> {
    if queries::count_tickets_for_order(conn, &order.id)? > 0 {
        tracing::debug!(order_id = %order.id, "Duplicate payment delivery acknowledged");
        return Ok(WebhookAck::for_order("duplicate", order.id));
    }

    if order.status != OrderStatus::Completed {
        // Refunded or failed before tickets existed; nothing to issue.
        return Ok(WebhookAck::for_order("duplicate", order.id));
    }

    tracing::warn!(order_id = %order.id, "Order has no tickets, repairing fulfillment");
    issue_and_confirm(state, conn, &order, meta, event, "repaired")
}

fn issue_and_confirm(
    state: &AppState,
    conn: &mut Connection,
    order: &Order,
    meta: &CheckoutMetadata,
    event: &Event,
    status: &'static str,
) -> Result<WebhookAck, WebhookError> {
    let tickets = match inventory::issue_tickets(conn, order, &meta.seats()) {
        Ok(IssueOutcome::Issued(tickets)) => tickets,
        Ok(IssueOutcome::AlreadyIssued(count)) => {
            tracing::debug!(order_id = %order.id, count, "Tickets issued by concurrent delivery");
            return Ok(WebhookAck::for_order("duplicate", order.id.clone()));
        }
        Err(e) => {
            tracing::error!(
                alert = "fulfillment_incomplete",
                order_id = %order.id,
                error = %e,
                "Ticket issuance failed; order awaits redelivery"
            );
            return Err(WebhookError::PartialFulfillment {
                order_id: order.id.clone(),
            });
        }
    };

    tracing::info!(
        order_id = %order.id,
        tickets = tickets.len(),
        "Order fulfilled"
    );

    state.notifier.enqueue(Notification::OrderConfirmed {
        order_id: order.id.clone(),
        short_id: short_id(&order.id),
        event_id: event.id.clone(),
        event_name: event.name.clone(),
        purchaser_email: order.purchaser_email.clone(),
        purchaser_name: order.purchaser_name.clone(),
        total_cents: order.total_cents,
        currency: order.currency.clone(),
        tickets: tickets
            .into_iter()
            .map(|t| TicketSummary {
                ticket_id: t.id,
                ticket_type_id: t.ticket_type_id,
                confirmation_code: t.confirmation_code,
            })
            .collect(),
    });

    Ok(WebhookAck::for_order(status, order.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn valid() -> HashMap<String, String> {
        metadata(&[
            ("event_id", "spring-gala"),
            ("user_id", "guest"),
            ("email", "guest@example.com"),
            ("name", "Gus Guest"),
            (
                "ticket_items",
                r#"[{"ticket_type_id":"bo_tt_a","quantity":2,"unit_price":2500}]"#,
            ),
        ])
    }

    #[test]
    fn test_valid_metadata_parses() {
        let meta = CheckoutMetadata::from_metadata(&valid()).unwrap();
        assert_eq!(meta.purchaser, Purchaser::Guest);
        assert_eq!(meta.items_total(), 5000);
        assert_eq!(meta.seats().len(), 2);
        assert_eq!(meta.user_id(), None);
    }

    #[test]
    fn test_registered_purchaser() {
        let mut map = valid();
        map.insert("user_id".into(), "user_123".into());
        let meta = CheckoutMetadata::from_metadata(&map).unwrap();
        assert_eq!(meta.user_id().as_deref(), Some("user_123"));
    }

    #[test]
    fn test_reports_every_missing_field() {
        let err = CheckoutMetadata::from_metadata(&metadata(&[("name", "x")])).unwrap_err();
        assert_eq!(err.missing, vec!["event_id", "user_id", "email", "ticket_items"]);
        assert!(err.invalid.is_empty());
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let mut map = valid();
        map.insert("ticket_items".into(), "  ".into());
        let err = CheckoutMetadata::from_metadata(&map).unwrap_err();
        assert_eq!(err.missing, vec!["ticket_items"]);
    }

    #[test]
    fn test_invalid_items_are_enumerated() {
        let mut map = valid();
        map.insert(
            "ticket_items".into(),
            r#"[{"ticket_type_id":"a","quantity":0,"unit_price":-1}]"#.into(),
        );
        let err = CheckoutMetadata::from_metadata(&map).unwrap_err();
        assert!(err.missing.is_empty());
        assert_eq!(err.invalid.len(), 2);
    }

    #[test]
    fn test_empty_and_non_json_items_invalid() {
        let mut map = valid();
        map.insert("ticket_items".into(), "[]".into());
        assert_eq!(CheckoutMetadata::from_metadata(&map).unwrap_err().invalid.len(), 1);

        map.insert("ticket_items".into(), "two GA please".into());
        assert_eq!(CheckoutMetadata::from_metadata(&map).unwrap_err().invalid.len(), 1);
    }

    #[test]
    fn test_bad_email_invalid() {
        let mut map = valid();
        map.insert("email".into(), "nobody".into());
        let err = CheckoutMetadata::from_metadata(&map).unwrap_err();
        assert!(err.invalid[0].starts_with("email"));
    }

    #[test]
    fn test_oversized_items_invalid() {
        let mut map = valid();
        map.insert(
            "ticket_items".into(),
            r#"[{"ticket_type_id":"a","quantity":2,"unit_price":4611686018427387904}]"#.into(),
        );
        let err = CheckoutMetadata::from_metadata(&map).unwrap_err();
        assert_eq!(err.invalid.len(), 1);
        assert!(err.invalid[0].contains("unit_price"));

        map.insert(
            "ticket_items".into(),
            r#"[{"ticket_type_id":"a","quantity":9223372036854775807,"unit_price":1}]"#.into(),
        );
        let err = CheckoutMetadata::from_metadata(&map).unwrap_err();
        assert!(err.invalid[0].contains("quantity"));
    }

    #[test]
    fn test_items_total_saturates() {
        let meta = CheckoutMetadata {
            event_ref: "e".into(),
            purchaser: Purchaser::Guest,
            items: vec![TicketItem {
                ticket_type_id: "a".into(),
                quantity: 2,
                unit_price: i64::MAX / 2 + 1,
            }],
            email: "a@example.com".into(),
            name: None,
        };
        assert_eq!(meta.items_total(), i64::MAX);
        assert_eq!(checked_total(&meta.items), None);
    }
}
