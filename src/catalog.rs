//! Read-only view of events.
//!
//! Event references arrive in three shapes (canonical id, the old
//! platform's numeric id, or slug). Resolution results are cached; ticket
//! types are not, since their sold counts move with every purchase.

use std::time::Duration;

use rusqlite::Connection;

use crate::cache::TtlCache;
use crate::db::queries;
use crate::error::Result;
use crate::models::Event;

/// How a caller named an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRef<'a> {
    Id(&'a str),
    Legacy(i64),
    Slug(&'a str),
}

impl<'a> EventRef<'a> {
    pub fn parse(reference: &'a str) -> Self {
        let reference = reference.trim();
        if reference.starts_with("bo_evt_") {
            Self::Id(reference)
        } else if let Ok(legacy) = reference.parse::<i64>() {
            Self::Legacy(legacy)
        } else {
            Self::Slug(reference)
        }
    }
}

pub struct EventCatalog {
    cache: TtlCache<String, Event>,
}

impl EventCatalog {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(capacity, ttl),
        }
    }

    /// Resolve a reference to an event, consulting the cache first.
    pub fn resolve(&self, conn: &Connection, reference: &str) -> Result<Option<Event>> {
        let key = reference.trim().to_string();
        if let Some(event) = self.cache.get(&key) {
            return Ok(Some(event));
        }

        let event = Self::resolve_uncached(conn, reference)?;
        if let Some(ref event) = event {
            self.cache.insert(key, event.clone());
        }
        Ok(event)
    }

    /// Resolve straight from the datastore.
    pub fn resolve_uncached(conn: &Connection, reference: &str) -> Result<Option<Event>> {
        match EventRef::parse(reference) {
            EventRef::Id(id) => queries::get_event_by_id(conn, id),
            EventRef::Legacy(legacy) => queries::get_event_by_legacy_id(conn, legacy),
            EventRef::Slug(slug) => queries::get_event_by_slug(conn, slug),
        }
    }

    /// Drop every cached reference that resolved to this event.
    pub fn invalidate(&self, event_id: &str) {
        self.cache.invalidate_where(|event| event.id == event_id);
    }

    /// Persist a cancellation and evict the event from the cache.
    pub fn set_cancelled(&self, conn: &Connection, event_id: &str, cancelled: bool) -> Result<bool> {
        let changed = queries::set_event_cancelled(conn, event_id, cancelled)?;
        self.invalidate(event_id);
        if changed {
            tracing::info!(event_id = %event_id, cancelled, "Event cancellation flag updated");
        }
        Ok(changed)
    }
}
