//! Escrow event journal.
//!
//! The engine publishes into [`JournalSink`] while holding a campaign lock,
//! so publishing only pushes onto an unbounded channel.  A background task
//! ([`run`]) drains the channel and commits events to SQLite in batches.
//! Journaling failures are logged and never reach escrow state.

use std::time::Duration;

use crowdtank_escrow::{EscrowEvent, EventSink};
use sqlx::SqlitePool;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::db;
use crate::events::JournalEntry;

const MAX_WRITE_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF_MS: u64 = 50;
const MAX_BACKOFF_MS: u64 = 2_000;

#[derive(Clone, Debug)]
pub struct JournalSink {
    tx: UnboundedSender<EscrowEvent>,
}

impl JournalSink {
    /// Create a sink and the receiving end that [`run`] drains.
    pub fn channel() -> (Self, UnboundedReceiver<EscrowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (JournalSink { tx }, rx)
    }
}

impl EventSink for JournalSink {
    fn publish(&self, event: EscrowEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!(
                kind = e.0.kind(),
                campaign_id = e.0.campaign_id(),
                "journal writer has stopped; event dropped"
            );
        }
    }
}

/// Drain published events into the database until every sink is dropped.
pub async fn run(pool: SqlitePool, mut rx: UnboundedReceiver<EscrowEvent>, batch_size: usize) {
    info!("Journal writer starting (batch size {batch_size})");

    while let Some(first) = rx.recv().await {
        let mut batch = vec![JournalEntry::from(&first)];
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(event) => batch.push(JournalEntry::from(&event)),
                Err(_) => break,
            }
        }
        write_batch(&pool, &batch).await;
    }

    info!("Journal writer stopped");
}

async fn write_batch(pool: &SqlitePool, batch: &[JournalEntry]) {
    let mut backoff = INITIAL_BACKOFF_MS;
    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        match db::insert_events(pool, batch).await {
            Ok(written) => {
                debug!("Journaled {written} events");
                return;
            }
            Err(e) if attempt < MAX_WRITE_ATTEMPTS => {
                warn!("Journal write failed (attempt {attempt}, will retry in {backoff}ms): {e}");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(MAX_BACKOFF_MS);
            }
            Err(e) => {
                error!(
                    "Journal write failed after {MAX_WRITE_ATTEMPTS} attempts; {} events lost: {e}",
                    batch.len()
                );
            }
        }
    }
}
