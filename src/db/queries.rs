use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{AppError, Result};
use crate::id::{EntityType, generate_confirmation_code};
use crate::models::*;

use super::from_row::{
    EVENT_COLS, ORDER_COLS, SESSION_COLS, TICKET_COLS, TICKET_TYPE_COLS, query_all, query_one,
};

/// Attempts at drawing an unused confirmation code before giving up.
const CONFIRMATION_CODE_ATTEMPTS: usize = 5;

pub fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Events ============

pub fn create_event(conn: &Connection, input: &CreateEvent) -> Result<Event> {
    let id = EntityType::Event.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO events (id, legacy_id, slug, name, starts_at, capacity, sold_count, cancelled, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7, ?7)",
        params![
            &id,
            input.legacy_id,
            &input.slug,
            &input.name,
            input.starts_at,
            input.capacity,
            now
        ],
    )?;

    Ok(Event {
        id,
        legacy_id: input.legacy_id,
        slug: input.slug.clone(),
        name: input.name.clone(),
        starts_at: input.starts_at,
        capacity: input.capacity,
        sold_count: 0,
        cancelled: false,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_event_by_id(conn: &Connection, id: &str) -> Result<Option<Event>> {
    query_one(
        conn,
        &format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLS),
        &[&id],
    )
}

pub fn get_event_by_legacy_id(conn: &Connection, legacy_id: i64) -> Result<Option<Event>> {
    query_one(
        conn,
        &format!("SELECT {} FROM events WHERE legacy_id = ?1", EVENT_COLS),
        &[&legacy_id],
    )
}

pub fn get_event_by_slug(conn: &Connection, slug: &str) -> Result<Option<Event>> {
    query_one(
        conn,
        &format!("SELECT {} FROM events WHERE slug = ?1", EVENT_COLS),
        &[&slug],
    )
}

pub fn set_event_cancelled(conn: &Connection, id: &str, cancelled: bool) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE events SET cancelled = ?1, updated_at = ?2 WHERE id = ?3",
        params![cancelled as i32, now(), id],
    )?;
    Ok(affected > 0)
}

/// Guarded increment of the event-wide sold count.
///
/// Returns false (and changes nothing) when the event has a ceiling and the
/// increment would cross it.
pub fn increment_event_sold(conn: &Connection, event_id: &str, quantity: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE events SET sold_count = sold_count + ?1, updated_at = ?2
         WHERE id = ?3 AND (capacity IS NULL OR sold_count + ?1 <= capacity)",
        params![quantity, now(), event_id],
    )?;
    Ok(affected > 0)
}

// ============ Ticket Types ============

pub fn create_ticket_type(
    conn: &Connection,
    event_id: &str,
    input: &CreateTicketType,
) -> Result<TicketType> {
    let id = EntityType::TicketType.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO ticket_types (id, event_id, name, price_cents, capacity, sold_count, sale_starts_at, sale_ends_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8)",
        params![
            &id,
            event_id,
            &input.name,
            input.price_cents,
            input.capacity,
            input.sale_starts_at,
            input.sale_ends_at,
            now
        ],
    )?;

    Ok(TicketType {
        id,
        event_id: event_id.to_string(),
        name: input.name.clone(),
        price_cents: input.price_cents,
        capacity: input.capacity,
        sold_count: 0,
        sale_starts_at: input.sale_starts_at,
        sale_ends_at: input.sale_ends_at,
        created_at: now,
    })
}

pub fn get_ticket_type_by_id(conn: &Connection, id: &str) -> Result<Option<TicketType>> {
    query_one(
        conn,
        &format!("SELECT {} FROM ticket_types WHERE id = ?1", TICKET_TYPE_COLS),
        &[&id],
    )
}

/// Guarded increment of a ticket type's sold count. False when it would oversell.
pub fn increment_ticket_type_sold(conn: &Connection, id: &str, quantity: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE ticket_types SET sold_count = sold_count + ?1
         WHERE id = ?2 AND sold_count + ?1 <= capacity",
        params![quantity, id],
    )?;
    Ok(affected > 0)
}

// ============ Orders ============

/// Insert an order. A second order for the same payment intent fails with
/// `AppError::ConstraintViolation { field: "stripe_payment_intent_id" }`.
pub fn create_order(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    let id = EntityType::Order.gen_id();
    let now = now();
    conn.execute(
        "INSERT INTO orders (id, user_id, purchaser_email, purchaser_name, event_id, total_cents, currency, status, refund_amount_cents, stripe_payment_intent_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?10)",
        params![
            &id,
            &input.user_id,
            &input.purchaser_email,
            &input.purchaser_name,
            &input.event_id,
            input.total_cents,
            &input.currency,
            input.status.as_str(),
            &input.stripe_payment_intent_id,
            now
        ],
    )?;

    Ok(Order {
        id,
        user_id: input.user_id.clone(),
        purchaser_email: input.purchaser_email.clone(),
        purchaser_name: input.purchaser_name.clone(),
        event_id: input.event_id.clone(),
        total_cents: input.total_cents,
        currency: input.currency.clone(),
        status: input.status,
        refund_amount_cents: 0,
        refund_reason: None,
        stripe_payment_intent_id: input.stripe_payment_intent_id.clone(),
        created_at: now,
        updated_at: now,
        refunded_at: None,
    })
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

pub fn get_order_by_payment_intent(
    conn: &Connection,
    payment_intent_id: &str,
) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE stripe_payment_intent_id = ?1",
            ORDER_COLS
        ),
        &[&payment_intent_id],
    )
}

/// Orders whose id ends with the given display suffix (case-insensitive).
pub fn find_orders_by_short_id(conn: &Connection, short_id: &str) -> Result<Vec<Order>> {
    let suffix = short_id.to_lowercase();
    query_all(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE lower(substr(id, -8)) = ?1 LIMIT 2",
            ORDER_COLS
        ),
        &[&suffix],
    )
}

/// Move a pending order for this payment to `failed`. Returns the order id
/// when a row changed; completed orders are never downgraded.
pub fn fail_pending_order(conn: &Connection, payment_intent_id: &str) -> Result<Option<String>> {
    conn.query_row(
        "UPDATE orders SET status = 'failed', updated_at = ?1
         WHERE stripe_payment_intent_id = ?2 AND status = 'pending'
         RETURNING id",
        params![now(), payment_intent_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

/// Compare-and-set the cumulative refund amount.
///
/// Writes only if the stored amount still equals `previous_cents`. Returns
/// false when another writer got there first.
pub fn record_refund(
    conn: &Connection,
    order_id: &str,
    previous_cents: i64,
    new_cents: i64,
    status: OrderStatus,
    reason: Option<&str>,
) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE orders
         SET refund_amount_cents = ?1, status = ?2, refund_reason = COALESCE(?3, refund_reason),
             refunded_at = ?4, updated_at = ?4
         WHERE id = ?5 AND refund_amount_cents = ?6",
        params![new_cents, status.as_str(), reason, now, order_id, previous_cents],
    )?;
    Ok(affected > 0)
}

/// Raise the cumulative refund amount to `amount_refunded` (capped at the
/// order total). Never lowers it, so replays and out-of-order deliveries
/// of `charge.refunded` are harmless. Returns true when the amount moved.
pub fn raise_refund_amount(conn: &Connection, order_id: &str, amount_refunded: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders
         SET refund_amount_cents = MIN(?1, total_cents),
             status = CASE WHEN MIN(?1, total_cents) >= total_cents
                           THEN 'refunded' ELSE 'partially_refunded' END,
             refunded_at = ?2, updated_at = ?2
         WHERE id = ?3
           AND refund_amount_cents < MIN(?1, total_cents)
           AND status IN ('completed', 'partially_refunded')",
        params![amount_refunded, now(), order_id],
    )?;
    Ok(affected > 0)
}

// ============ Tickets ============

/// Insert one ticket row with a fresh confirmation code, redrawing the code
/// on the (rare) collision.
pub fn create_ticket(conn: &Connection, order: &Order, input: &NewTicket) -> Result<Ticket> {
    let id = EntityType::Ticket.gen_id();
    let now = now();

    for _ in 0..CONFIRMATION_CODE_ATTEMPTS {
        let code = generate_confirmation_code();
        let inserted = conn.execute(
            "INSERT INTO tickets (id, order_id, ticket_type_id, event_id, unit_price_cents, quantity, confirmation_code, status, attendee_name, attendee_email, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, 'active', ?7, ?8, ?9)",
            params![
                &id,
                &order.id,
                &input.ticket_type_id,
                &order.event_id,
                input.unit_price_cents,
                &code,
                &input.attendee_name,
                &input.attendee_email,
                now
            ],
        );

        match inserted.map_err(AppError::from) {
            Ok(_) => {
                return Ok(Ticket {
                    id,
                    order_id: order.id.clone(),
                    ticket_type_id: input.ticket_type_id.clone(),
                    event_id: order.event_id.clone(),
                    unit_price_cents: input.unit_price_cents,
                    quantity: 1,
                    confirmation_code: code,
                    status: TicketStatus::Active,
                    attendee_name: input.attendee_name.clone(),
                    attendee_email: input.attendee_email.clone(),
                    created_at: now,
                });
            }
            Err(e) if e.is_constraint_on("confirmation_code") => {
                tracing::debug!(code = %code, "Confirmation code collision, redrawing");
            }
            Err(e) => return Err(e),
        }
    }

    Err(AppError::Internal(
        "Could not allocate a unique confirmation code".into(),
    ))
}

pub fn count_tickets_for_order(conn: &Connection, order_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM tickets WHERE order_id = ?1",
        params![order_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

pub fn list_tickets_for_order(conn: &Connection, order_id: &str) -> Result<Vec<Ticket>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM tickets WHERE order_id = ?1 ORDER BY created_at, id",
            TICKET_COLS
        ),
        &[&order_id],
    )
}

/// Cancel every active ticket of an order. Returns how many changed.
pub fn cancel_tickets_for_order(conn: &Connection, order_id: &str) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE tickets SET status = 'cancelled' WHERE order_id = ?1 AND status = 'active'",
        params![order_id],
    )?;
    Ok(affected)
}

// ============ Webhook Events ============

/// Record a processor event id. Returns false if it was already recorded.
pub fn try_record_webhook_event(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (provider, event_id, created_at) VALUES (?1, ?2, ?3)",
        params![provider, event_id, now()],
    )?;
    Ok(affected > 0)
}

pub fn purge_old_webhook_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - retention_days * 86400;
    let deleted = conn.execute(
        "DELETE FROM webhook_events WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Sessions ============

pub fn create_session(
    conn: &Connection,
    token_hash: &str,
    user_id: Option<&str>,
    guest_email: Option<&str>,
    guest_name: Option<&str>,
    expires_at: i64,
) -> Result<Session> {
    let now = now();
    conn.execute(
        "INSERT INTO sessions (token_hash, user_id, guest_email, guest_name, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![token_hash, user_id, guest_email, guest_name, expires_at, now],
    )?;

    Ok(Session {
        token_hash: token_hash.to_string(),
        user_id: user_id.map(String::from),
        guest_email: guest_email.map(String::from),
        guest_name: guest_name.map(String::from),
        expires_at,
        created_at: now,
    })
}

/// Look up an unexpired session by token hash.
pub fn get_session_by_token_hash(conn: &Connection, token_hash: &str) -> Result<Option<Session>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM sessions WHERE token_hash = ?1 AND expires_at > ?2",
            SESSION_COLS
        ),
        &[&token_hash, &now()],
    )
}
