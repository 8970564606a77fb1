//! Caller identity for refund requests.
//!
//! Sessions are issued by the platform's auth layer; this service only
//! resolves a bearer token to either a registered user or a confirmed guest.

use axum::{extract::FromRequestParts, http::request::Parts};
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::Order;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    User { user_id: String },
    Guest { email: String },
}

impl Caller {
    /// Whether this caller purchased `order`.
    ///
    /// Users match on user id; guests match on email, and only against
    /// guest orders.
    pub fn owns(&self, order: &Order) -> bool {
        match self {
            Caller::User { user_id } => order.user_id.as_deref() == Some(user_id.as_str()),
            Caller::Guest { email } => {
                order.user_id.is_none() && order.purchaser_email.eq_ignore_ascii_case(email)
            }
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Caller::User { user_id } => user_id,
            Caller::Guest { email } => email,
        }
    }
}

pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token. `Ok(None)` means unknown or expired.
    fn resolve(&self, conn: &Connection, token: &str) -> Result<Option<Caller>>;
}

/// Looks tokens up in the `sessions` table by SHA-256 hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionIdentityProvider;

impl IdentityProvider for SessionIdentityProvider {
    fn resolve(&self, conn: &Connection, token: &str) -> Result<Option<Caller>> {
        let Some(session) = queries::get_session_by_token_hash(conn, &hash_token(token))? else {
            return Ok(None);
        };

        Ok(match (session.user_id, session.guest_email) {
            (Some(user_id), _) => Some(Caller::User { user_id }),
            (None, Some(email)) => Some(Caller::Guest { email }),
            (None, None) => None,
        })
    }
}

/// Hash a session token for storage and lookup. Lowercase hex.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"boxoffice-session-v1:");
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// New random session token (`bos_` + 64 hex chars).
pub fn generate_session_token() -> String {
    format!("bos_{}", hex::encode(rand::random::<[u8; 32]>()))
}

/// Caller resolved from `Authorization: Bearer <token>`, if any.
///
/// Never rejects for a missing or unknown token so the refund flow can
/// report `Unauthenticated` in its own precondition order.
#[derive(Debug, Clone)]
pub struct MaybeCaller(pub Option<Caller>);

impl FromRequestParts<AppState> for MaybeCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some(token) = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
        else {
            return Ok(MaybeCaller(None));
        };

        let conn = state.db.get()?;
        Ok(MaybeCaller(state.identity.resolve(&conn, token)?))
    }
}
