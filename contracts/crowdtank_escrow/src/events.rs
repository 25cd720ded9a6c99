//! Escrow events.
//!
//! Published after each committed state change, while the campaign lock is
//! still held, so the order of events for one campaign is its commit order.
//! Events are for observers only; the engine never reads them back.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{Amount, CampaignId, CampaignStatus, Identity};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscrowEvent {
    ProjectCreated {
        campaign_id: CampaignId,
        creator: Identity,
        goal: Amount,
        deadline: u64,
        timestamp: u64,
    },
    ProjectFunded {
        campaign_id: CampaignId,
        contributor: Identity,
        amount: Amount,
        amount_raised: Amount,
        timestamp: u64,
    },
    ProjectFinalized {
        campaign_id: CampaignId,
        status: CampaignStatus,
        amount_raised: Amount,
        timestamp: u64,
    },
    CreatorWithdrawal {
        campaign_id: CampaignId,
        creator: Identity,
        amount: Amount,
        timestamp: u64,
    },
    ContributionRefunded {
        campaign_id: CampaignId,
        contributor: Identity,
        amount: Amount,
        timestamp: u64,
    },
}

impl EscrowEvent {
    pub fn campaign_id(&self) -> CampaignId {
        match self {
            EscrowEvent::ProjectCreated { campaign_id, .. }
            | EscrowEvent::ProjectFunded { campaign_id, .. }
            | EscrowEvent::ProjectFinalized { campaign_id, .. }
            | EscrowEvent::CreatorWithdrawal { campaign_id, .. }
            | EscrowEvent::ContributionRefunded { campaign_id, .. } => *campaign_id,
        }
    }

    /// Short identifier, matches the serde tag.
    pub fn kind(&self) -> &'static str {
        match self {
            EscrowEvent::ProjectCreated { .. } => "project_created",
            EscrowEvent::ProjectFunded { .. } => "project_funded",
            EscrowEvent::ProjectFinalized { .. } => "project_finalized",
            EscrowEvent::CreatorWithdrawal { .. } => "creator_withdrawal",
            EscrowEvent::ContributionRefunded { .. } => "contribution_refunded",
        }
    }

    /// The party the event is about, if any.
    pub fn actor(&self) -> Option<&Identity> {
        match self {
            EscrowEvent::ProjectCreated { creator, .. }
            | EscrowEvent::CreatorWithdrawal { creator, .. } => Some(creator),
            EscrowEvent::ProjectFunded { contributor, .. }
            | EscrowEvent::ContributionRefunded { contributor, .. } => Some(contributor),
            EscrowEvent::ProjectFinalized { .. } => None,
        }
    }

    /// The value moved or targeted by the event.
    pub fn amount(&self) -> Amount {
        match self {
            EscrowEvent::ProjectCreated { goal, .. } => *goal,
            EscrowEvent::ProjectFunded { amount, .. }
            | EscrowEvent::CreatorWithdrawal { amount, .. }
            | EscrowEvent::ContributionRefunded { amount, .. } => *amount,
            EscrowEvent::ProjectFinalized { amount_raised, .. } => *amount_raised,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            EscrowEvent::ProjectCreated { timestamp, .. }
            | EscrowEvent::ProjectFunded { timestamp, .. }
            | EscrowEvent::ProjectFinalized { timestamp, .. }
            | EscrowEvent::CreatorWithdrawal { timestamp, .. }
            | EscrowEvent::ContributionRefunded { timestamp, .. } => *timestamp,
        }
    }
}

/// Receiver of escrow events. `publish` is called under a campaign lock and
/// must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: EscrowEvent);
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: EscrowEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<EscrowEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EscrowEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, campaign_id: CampaignId) -> Vec<EscrowEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.campaign_id() == campaign_id)
            .cloned()
            .collect()
    }

    pub fn take(&self) -> Vec<EscrowEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: EscrowEvent) {
        self.events.lock().push(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for std::sync::Arc<S> {
    fn publish(&self, event: EscrowEvent) {
        (**self).publish(event)
    }
}
