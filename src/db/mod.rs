pub mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::catalog::EventCatalog;
use crate::identity::IdentityProvider;
use crate::notify::Notifier;
use crate::payments::{PaymentProcessor, WebhookVerifier};
use crate::refunds::RefundPolicy;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Checks `Stripe-Signature` on incoming webhooks
    pub verifier: Arc<WebhookVerifier>,
    /// Outbound processor API (intent lookups, refunds)
    pub processor: Arc<dyn PaymentProcessor>,
    /// Event lookups; cached, advisory only
    pub catalog: Arc<EventCatalog>,
    pub identity: Arc<dyn IdentityProvider>,
    pub notifier: Notifier,
    pub refund_policy: RefundPolicy,
}

/// Open a connection pool. Every connection waits up to `busy_timeout` for
/// a competing writer and enforces foreign keys.
pub fn create_pool(database_path: &str, busy_timeout: Duration) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    Pool::builder().max_size(10).build(manager)
}
