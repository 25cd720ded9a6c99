//! Journal row shapes for escrow events.
//!
//! Amounts are carried as decimal strings end to end: they are `u128` in the
//! engine and exceed both SQLite integers and JSON-safe numbers.

use crowdtank_escrow::EscrowEvent;
use serde::{Deserialize, Serialize};

/// An escrow event flattened for storage, not yet assigned a row id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub event_type: String,
    pub campaign_id: String,
    pub actor: Option<String>,
    pub amount: String,
    /// Only set on `project_finalized`.
    pub status: Option<String>,
    pub timestamp: i64,
}

impl From<&EscrowEvent> for JournalEntry {
    fn from(event: &EscrowEvent) -> Self {
        let status = match event {
            EscrowEvent::ProjectFinalized { status, .. } => Some(status.as_str().to_string()),
            _ => None,
        };
        JournalEntry {
            event_type: event.kind().to_string(),
            campaign_id: event.campaign_id().to_string(),
            actor: event.actor().map(|a| a.as_str().to_string()),
            amount: event.amount().to_string(),
            status,
            // Clamp far-future timestamps rather than wrap.
            timestamp: i64::try_from(event.timestamp()).unwrap_or(i64::MAX),
        }
    }
}

/// A journaled event record as stored in / read from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventRecord {
    pub id: i64,
    pub event_type: String,
    pub campaign_id: String,
    pub actor: Option<String>,
    pub amount: String,
    pub status: Option<String>,
    pub timestamp: i64,
    pub created_at: i64,
}
