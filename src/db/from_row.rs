//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const EVENT_COLS: &str =
    "id, legacy_id, slug, name, starts_at, capacity, sold_count, cancelled, created_at, updated_at";

pub const TICKET_TYPE_COLS: &str = "id, event_id, name, price_cents, capacity, sold_count, sale_starts_at, sale_ends_at, created_at";

pub const ORDER_COLS: &str = "id, user_id, purchaser_email, purchaser_name, event_id, total_cents, currency, status, refund_amount_cents, refund_reason, stripe_payment_intent_id, created_at, updated_at, refunded_at";

pub const TICKET_COLS: &str = "id, order_id, ticket_type_id, event_id, unit_price_cents, quantity, confirmation_code, status, attendee_name, attendee_email, created_at";

pub const SESSION_COLS: &str =
    "token_hash, user_id, guest_email, guest_name, expires_at, created_at";

// ============ FromRow Implementations ============

impl FromRow for Event {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Event {
            id: row.get(0)?,
            legacy_id: row.get(1)?,
            slug: row.get(2)?,
            name: row.get(3)?,
            starts_at: row.get(4)?,
            capacity: row.get(5)?,
            sold_count: row.get(6)?,
            cancelled: row.get::<_, i32>(7)? != 0,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl FromRow for TicketType {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(TicketType {
            id: row.get(0)?,
            event_id: row.get(1)?,
            name: row.get(2)?,
            price_cents: row.get(3)?,
            capacity: row.get(4)?,
            sold_count: row.get(5)?,
            sale_starts_at: row.get(6)?,
            sale_ends_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            user_id: row.get(1)?,
            purchaser_email: row.get(2)?,
            purchaser_name: row.get(3)?,
            event_id: row.get(4)?,
            total_cents: row.get(5)?,
            currency: row.get(6)?,
            status: parse_enum(row, 7, "status")?,
            refund_amount_cents: row.get(8)?,
            refund_reason: row.get(9)?,
            stripe_payment_intent_id: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            refunded_at: row.get(13)?,
        })
    }
}

impl FromRow for Ticket {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Ticket {
            id: row.get(0)?,
            order_id: row.get(1)?,
            ticket_type_id: row.get(2)?,
            event_id: row.get(3)?,
            unit_price_cents: row.get(4)?,
            quantity: row.get(5)?,
            confirmation_code: row.get(6)?,
            status: parse_enum(row, 7, "status")?,
            attendee_name: row.get(8)?,
            attendee_email: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

impl FromRow for Session {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Session {
            token_hash: row.get(0)?,
            user_id: row.get(1)?,
            guest_email: row.get(2)?,
            guest_name: row.get(3)?,
            expires_at: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}
