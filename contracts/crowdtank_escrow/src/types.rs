//! # Types
//!
//! Shared data structures used across all modules of the CrowdTank escrow.
//!
//! ## Design decisions
//!
//! ### Record / View split
//!
//! A [`Campaign`] is the mutable record owned by the registry and only ever
//! touched under its per-campaign lock. Callers never see it directly:
//!
//! - [`CampaignView`] — read-only projection returned by `get_project`.
//! - [`ContributionRecord`] — one audit row per contributor.
//!
//! ### Status as a Finite-State Machine
//!
//! [`CampaignStatus`] enforces a strict forward-only lifecycle:
//!
//! ```text
//! Open ──► Funded
//!   └────► Failed
//! ```
//!
//! Both terminal states are entered exactly once, by finalization.
//!
//! ### Claims
//!
//! Every payout (the creator's withdrawal, each contributor's refund) is a
//! [`ClaimState`]. A claim moves `Unclaimed → InFlight` atomically before the
//! ledger is called, then to `Settled` once the ledger confirms, or back to
//! `Unclaimed` if the transfer failed.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Campaign identifier.
pub type CampaignId = u64;

/// Value in the smallest transferable unit.
pub type Amount = u128;

/// Opaque party identity as authenticated by the host transport.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of a campaign.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Accepting contributions.
    Open,
    /// Deadline passed with the goal met; the creator may withdraw.
    Funded,
    /// Deadline passed short of the goal; contributors may reclaim.
    Failed,
}

impl CampaignStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CampaignStatus::Open)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CampaignStatus::Open => "open",
            CampaignStatus::Funded => "funded",
            CampaignStatus::Failed => "failed",
        }
    }
}

/// Settlement state of a single payout claim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    #[default]
    Unclaimed,
    /// Marked taken; the ledger transfer has not confirmed yet.
    InFlight,
    Settled,
}

/// Cumulative contribution of one identity to one campaign.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Contribution {
    /// Never decreases, including after a refund.
    pub amount: Amount,
    pub refund: ClaimState,
}

impl Contribution {
    /// What the contributor could still reclaim on a failed campaign.
    pub fn claimable(&self) -> Amount {
        match self.refund {
            ClaimState::Unclaimed => self.amount,
            ClaimState::InFlight | ClaimState::Settled => 0,
        }
    }
}

/// Input for `create_project`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub description: String,
    pub goal: Amount,
    pub duration_secs: u64,
    /// Caller-chosen id; the registry assigns one when absent.
    #[serde(default)]
    pub id: Option<CampaignId>,
}

/// Full in-memory record of a campaign.
#[derive(Clone, Debug)]
pub struct Campaign {
    pub id: CampaignId,
    pub creator: Identity,
    pub name: String,
    pub description: String,
    pub goal: Amount,
    pub created_at: u64,
    pub deadline: u64,
    pub amount_raised: Amount,
    pub status: CampaignStatus,
    pub contributions: HashMap<Identity, Contribution>,
    pub creator_claim: ClaimState,
    /// Value already handed back out through the ledger.
    pub released: Amount,
}

impl Campaign {
    pub fn custody_balance(&self) -> Amount {
        self.amount_raised - self.released
    }

    pub fn creator_withdrawn(&self) -> bool {
        self.creator_claim == ClaimState::Settled
    }

    pub fn view(&self) -> CampaignView {
        CampaignView {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            creator: self.creator.clone(),
            goal: self.goal,
            created_at: self.created_at,
            deadline: self.deadline,
            amount_raised: self.amount_raised,
            custody_balance: self.custody_balance(),
            status: self.status,
            creator_withdrawn: self.creator_withdrawn(),
            contributor_count: self.contributions.len(),
        }
    }

    pub fn contribution_records(&self) -> Vec<ContributionRecord> {
        let mut records: Vec<ContributionRecord> = self
            .contributions
            .iter()
            .map(|(who, c)| ContributionRecord {
                contributor: who.clone(),
                amount: c.amount,
                refunded: c.refund == ClaimState::Settled,
            })
            .collect();
        records.sort_by(|a, b| a.contributor.cmp(&b.contributor));
        records
    }
}

/// Read-only projection of a campaign.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignView {
    pub id: CampaignId,
    pub name: String,
    pub description: String,
    pub creator: Identity,
    pub goal: Amount,
    pub created_at: u64,
    pub deadline: u64,
    pub amount_raised: Amount,
    pub custody_balance: Amount,
    pub status: CampaignStatus,
    pub creator_withdrawn: bool,
    pub contributor_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub contributor: Identity,
    pub amount: Amount,
    pub refunded: bool,
}

/// Snapshot of the registry-wide counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowTotals {
    pub funded: u64,
    pub failed: u64,
}

/// Which path of `user_withdraw_funds` paid out, and how much.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Withdrawal {
    Creator { amount: Amount },
    Refund { amount: Amount },
}

impl Withdrawal {
    pub fn amount(&self) -> Amount {
        match *self {
            Withdrawal::Creator { amount } | Withdrawal::Refund { amount } => amount,
        }
    }
}
