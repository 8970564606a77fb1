use rusqlite::Connection;

/// Initialize the database schema.
///
/// Constraints here are the correctness backstop for everything the webhook
/// and refund paths do: UNIQUE payment references, CHECKed capacity and
/// refund ceilings. Application checks run first for good errors; these
/// catch whatever races past them.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    // WAL lets availability reads proceed while a ticket batch holds the write lock.
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;

    conn.execute_batch(
        r#"
        -- Events (owned by the catalog; only sold_count is written here)
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            legacy_id INTEGER UNIQUE,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            starts_at INTEGER NOT NULL,
            capacity INTEGER CHECK (capacity IS NULL OR capacity >= 0),
            sold_count INTEGER NOT NULL DEFAULT 0,
            cancelled INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,

            CHECK (capacity IS NULL OR sold_count <= capacity)
        );

        -- Ticket types (price tiers within an event)
        CREATE TABLE IF NOT EXISTS ticket_types (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
            capacity INTEGER NOT NULL CHECK (capacity >= 0),
            sold_count INTEGER NOT NULL DEFAULT 0,
            sale_starts_at INTEGER,
            sale_ends_at INTEGER,
            created_at INTEGER NOT NULL,

            CHECK (sold_count <= capacity)
        );
        CREATE INDEX IF NOT EXISTS idx_ticket_types_event ON ticket_types(event_id);

        -- Orders: one per successful payment. Never deleted.
        -- stripe_payment_intent_id UNIQUE is the idempotency guard.
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            user_id TEXT,
            purchaser_email TEXT NOT NULL,
            purchaser_name TEXT,
            event_id TEXT NOT NULL REFERENCES events(id),
            total_cents INTEGER NOT NULL CHECK (total_cents >= 0),
            currency TEXT NOT NULL DEFAULT 'usd',
            status TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'failed', 'refunded', 'partially_refunded')),
            refund_amount_cents INTEGER NOT NULL DEFAULT 0,
            refund_reason TEXT,
            stripe_payment_intent_id TEXT UNIQUE,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            refunded_at INTEGER,

            CHECK (refund_amount_cents >= 0 AND refund_amount_cents <= total_cents)
        );
        CREATE INDEX IF NOT EXISTS idx_orders_event ON orders(event_id);
        CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id);

        -- Immutable payment reference once set
        CREATE TRIGGER IF NOT EXISTS trg_orders_payment_ref_immutable
        BEFORE UPDATE OF stripe_payment_intent_id ON orders
        WHEN OLD.stripe_payment_intent_id IS NOT NULL
            AND NEW.stripe_payment_intent_id IS NOT OLD.stripe_payment_intent_id
        BEGIN
            SELECT RAISE(ABORT, 'stripe_payment_intent_id is immutable');
        END;

        -- Tickets: one row per admitted seat
        CREATE TABLE IF NOT EXISTS tickets (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id),
            ticket_type_id TEXT NOT NULL REFERENCES ticket_types(id),
            event_id TEXT NOT NULL REFERENCES events(id),
            unit_price_cents INTEGER NOT NULL CHECK (unit_price_cents >= 0),
            quantity INTEGER NOT NULL DEFAULT 1 CHECK (quantity = 1),
            confirmation_code TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'cancelled')),
            attendee_name TEXT,
            attendee_email TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tickets_order ON tickets(order_id);

        -- Processor events already applied by refund reconciliation (replay bookkeeping)
        CREATE TABLE IF NOT EXISTS webhook_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,

            UNIQUE(provider, event_id)
        );

        -- Login sessions (issued elsewhere; read by the identity provider)
        CREATE TABLE IF NOT EXISTS sessions (
            token_hash TEXT PRIMARY KEY,
            user_id TEXT,
            guest_email TEXT,
            guest_name TEXT,
            expires_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,

            CHECK (user_id IS NOT NULL OR guest_email IS NOT NULL)
        );
        "#,
    )?;

    Ok(())
}
