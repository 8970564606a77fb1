//! Prefixed ID generation for boxoffice entities.
//!
//! All IDs use a `bo_` brand prefix so they can never collide with payment
//! processor IDs (Stripe's `pi_`, `ch_`, `re_`, etc.).
//!
//! Format: `bo_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use rand::Rng;
use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &["bo_evt_", "bo_tt_", "bo_ord_", "bo_tkt_"];

/// Characters used in confirmation codes. No 0/O or 1/I/L so codes can be
/// read aloud at the door.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Validate that a string is a well-formed boxoffice ID.
///
/// Cheap check to reject garbage before hitting the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Event,
    TicketType,
    Order,
    Ticket,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Event => "bo_evt",
            Self::TicketType => "bo_tt",
            Self::Order => "bo_ord",
            Self::Ticket => "bo_tkt",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}

/// Short display form of an ID: its last 8 characters, upper-cased.
/// Shown on receipts and accepted back by the refund endpoint.
pub fn short_id(id: &str) -> String {
    let start = id.len().saturating_sub(8);
    id[start..].to_uppercase()
}

/// Generate a per-seat confirmation code such as `K7QM-2XPA`.
///
/// Uniqueness is enforced by the tickets table; callers retry on collision.
pub fn generate_confirmation_code() -> String {
    let mut rng = rand::thread_rng();
    let mut part = || -> String {
        (0..4)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    };
    format!("{}-{}", part(), part())
}
