//! # CrowdTank Escrow
//!
//! Crowdfunding escrow engine. A creator registers a campaign with a goal and
//! a deadline, funders contribute, and once the deadline has passed the
//! campaign is resolved exactly once to either `Funded` (the creator may
//! withdraw the whole balance) or `Failed` (every contributor may reclaim
//! their own contribution).
//!
//! | Phase        | Entry Point(s)                                         |
//! |--------------|--------------------------------------------------------|
//! | Registration | [`CrowdTank::create_project`]                          |
//! | Funding      | [`CrowdTank::fund_project`]                            |
//! | Finalization | [`CrowdTank::check_project_status`]                    |
//! | Settlement   | [`CrowdTank::user_withdraw_funds`]                     |
//! | Queries      | `get_project`, `get_remaining_funding`, `get_total_projects_funded`, `get_total_projects_failed`, `list_projects`, `get_contributions` |
//!
//! ## Architecture
//!
//! Record storage and id management live in [`storage`]. The payout protocol
//! lives in [`settlement`]. Value only ever leaves custody through the host's
//! [`Ledger`]; time only comes from the host's [`Clock`]; every committed
//! change is announced to the host's [`EventSink`]. This file contains the
//! public entry points, the finalization guard and event emissions.
//!
//! Each campaign has its own lock. Operations on one campaign are totally
//! ordered; operations on different campaigns run in parallel.

pub mod clock;
pub mod errors;
pub mod events;
pub mod ledger;
mod settlement;
mod storage;
mod types;

#[cfg(test)]
mod test_concurrency;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{EscrowError, Result};
pub use events::{EscrowEvent, EventSink, MemorySink, NullSink};
pub use ledger::{InMemoryLedger, Ledger, TransferError};
pub use storage::CampaignRegistry;
pub use types::{
    Amount, Campaign, CampaignId, CampaignStatus, CampaignView, ClaimState, Contribution,
    ContributionRecord, EscrowTotals, Identity, NewCampaign, Withdrawal,
};

use settlement::{ClaimGuard, Claimant};

pub struct CrowdTank<L, C = SystemClock, S = NullSink> {
    registry: CampaignRegistry,
    ledger: L,
    clock: C,
    sink: S,
    total_funded: AtomicU64,
    total_failed: AtomicU64,
}

impl<L: Ledger> CrowdTank<L> {
    /// Engine on the wall clock with events discarded.
    pub fn with_ledger(ledger: L) -> Self {
        Self::new(ledger, SystemClock, NullSink)
    }
}

impl<L: Ledger, C: Clock, S: EventSink> CrowdTank<L, C, S> {
    pub fn new(ledger: L, clock: C, sink: S) -> Self {
        Self {
            registry: CampaignRegistry::new(),
            ledger,
            clock,
            sink,
            total_funded: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Read-only access to the campaign records.
    pub fn registry(&self) -> &CampaignRegistry {
        &self.registry
    }

    // ─────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────

    /// Register a new campaign owned by `creator`.
    ///
    /// The deadline is `now + duration_secs`. Fails with `InvalidGoal`,
    /// `InvalidDuration` or `DuplicateId` without creating anything.
    pub fn create_project(&self, creator: &Identity, campaign: NewCampaign) -> Result<CampaignId> {
        let NewCampaign {
            name,
            description,
            goal,
            duration_secs,
            id,
        } = campaign;

        if goal == 0 {
            return Err(EscrowError::InvalidGoal);
        }
        if duration_secs == 0 {
            return Err(EscrowError::InvalidDuration);
        }
        let now = self.clock.now();
        let deadline = now
            .checked_add(duration_secs)
            .ok_or(EscrowError::InvalidDuration)?;

        let id = self.registry.insert_new(id, |id| {
            self.sink.publish(EscrowEvent::ProjectCreated {
                campaign_id: id,
                creator: creator.clone(),
                goal,
                deadline,
                timestamp: now,
            });
            Campaign {
                id,
                creator: creator.clone(),
                name,
                description,
                goal,
                created_at: now,
                deadline,
                amount_raised: 0,
                status: CampaignStatus::Open,
                contributions: HashMap::new(),
                creator_claim: ClaimState::Unclaimed,
                released: 0,
            }
        })?;

        info!(campaign_id = id, creator = %creator, goal = %goal, deadline, "campaign created");
        Ok(id)
    }

    pub fn get_project(&self, id: CampaignId) -> Result<CampaignView> {
        self.registry.view(id)
    }

    /// Every campaign, terminal ones included, ordered by id.
    pub fn list_projects(&self) -> Vec<CampaignView> {
        self.registry.views()
    }

    // ─────────────────────────────────────────────────────────
    // Funding
    // ─────────────────────────────────────────────────────────

    /// Contribute `amount` to campaign `id` on behalf of `contributor`.
    ///
    /// Accepted for as long as the campaign is `Open`, including after the
    /// deadline if nobody has finalized it yet. Returns the campaign total
    /// as of this contribution.
    pub fn fund_project(
        &self,
        contributor: &Identity,
        id: CampaignId,
        amount: Amount,
    ) -> Result<Amount> {
        if amount == 0 {
            return Err(EscrowError::InvalidAmount);
        }

        self.registry.with_campaign(id, |campaign| {
            if campaign.status != CampaignStatus::Open {
                return Err(EscrowError::CampaignClosed(id));
            }
            // Per-contributor totals never exceed the campaign total, so one
            // check covers both additions.
            let raised = campaign
                .amount_raised
                .checked_add(amount)
                .ok_or(EscrowError::InvalidAmount)?;

            campaign
                .contributions
                .entry(contributor.clone())
                .or_default()
                .amount += amount;
            campaign.amount_raised = raised;

            self.sink.publish(EscrowEvent::ProjectFunded {
                campaign_id: id,
                contributor: contributor.clone(),
                amount,
                amount_raised: raised,
                timestamp: self.clock.now(),
            });
            debug!(
                campaign_id = id,
                contributor = %contributor,
                amount = %amount,
                raised = %raised,
                "contribution accepted"
            );
            Ok(raised)
        })
    }

    /// `goal - amount_raised`, or zero once the goal is reached.
    pub fn get_remaining_funding(&self, id: CampaignId) -> Result<Amount> {
        let view = self.registry.view(id)?;
        Ok(view.goal.saturating_sub(view.amount_raised))
    }

    /// Cumulative amount `contributor` has put into campaign `id`.
    pub fn get_contribution(&self, id: CampaignId, contributor: &Identity) -> Result<Amount> {
        self.registry.with_campaign(id, |campaign| {
            Ok(campaign
                .contributions
                .get(contributor)
                .map(|c| c.amount)
                .unwrap_or(0))
        })
    }

    pub fn get_contributions(&self, id: CampaignId) -> Result<Vec<ContributionRecord>> {
        self.registry.contributions(id)
    }

    // ─────────────────────────────────────────────────────────
    // Finalization
    // ─────────────────────────────────────────────────────────

    /// Evaluate the goal/deadline guard and return the resulting status.
    ///
    /// Before the deadline this is a no-op. At or after it, an `Open`
    /// campaign becomes `Funded` or `Failed` and the matching global counter
    /// is bumped. A terminal campaign is returned unchanged, so calling this
    /// any number of times is safe.
    pub fn check_project_status(&self, id: CampaignId) -> Result<CampaignStatus> {
        self.registry.with_campaign(id, |campaign| {
            if campaign.status.is_terminal() {
                return Ok(campaign.status);
            }

            let now = self.clock.now();
            if now < campaign.deadline {
                debug!(
                    campaign_id = id,
                    now,
                    deadline = campaign.deadline,
                    "finalize before deadline; no-op"
                );
                return Ok(CampaignStatus::Open);
            }

            let status = if campaign.amount_raised >= campaign.goal {
                self.total_funded.fetch_add(1, Ordering::SeqCst);
                CampaignStatus::Funded
            } else {
                self.total_failed.fetch_add(1, Ordering::SeqCst);
                CampaignStatus::Failed
            };
            campaign.status = status;

            self.sink.publish(EscrowEvent::ProjectFinalized {
                campaign_id: id,
                status,
                amount_raised: campaign.amount_raised,
                timestamp: now,
            });
            info!(
                campaign_id = id,
                status = status.as_str(),
                raised = %campaign.amount_raised,
                goal = %campaign.goal,
                "campaign finalized"
            );
            Ok(status)
        })
    }

    // ─────────────────────────────────────────────────────────
    // Settlement
    // ─────────────────────────────────────────────────────────

    /// Withdraw whatever `caller` is owed by campaign `id`.
    ///
    /// The creator of a `Funded` campaign receives the full custody balance;
    /// a contributor to a `Failed` campaign receives their own contribution.
    /// Each claim pays at most once. If the ledger reports a failure the claim
    /// is left exactly as it was and `TransferFailed` is returned.
    pub fn user_withdraw_funds(&self, caller: &Identity, id: CampaignId) -> Result<Withdrawal> {
        let handle = self.registry.handle(id)?;
        let claim = {
            let mut campaign = handle.lock();
            settlement::open_claim(&mut *campaign, caller)?
        };
        let guard = ClaimGuard::new(handle, claim);

        let transfer = self
            .ledger
            .release(&guard.claim().recipient, guard.claim().amount);

        match transfer {
            Ok(()) => {
                let withdrawal = guard.settle(|campaign, claim| {
                    let timestamp = self.clock.now();
                    let event = match claim.claimant {
                        Claimant::Creator => EscrowEvent::CreatorWithdrawal {
                            campaign_id: campaign.id,
                            creator: claim.recipient.clone(),
                            amount: claim.amount,
                            timestamp,
                        },
                        Claimant::Contributor => EscrowEvent::ContributionRefunded {
                            campaign_id: campaign.id,
                            contributor: claim.recipient.clone(),
                            amount: claim.amount,
                            timestamp,
                        },
                    };
                    self.sink.publish(event);
                });
                info!(
                    campaign_id = id,
                    recipient = %caller,
                    withdrawal = ?withdrawal,
                    "funds released"
                );
                Ok(withdrawal)
            }
            Err(err) => {
                warn!(
                    campaign_id = id,
                    recipient = %caller,
                    error = %err,
                    "release failed; claim kept"
                );
                guard.roll_back();
                Err(EscrowError::TransferFailed { reason: err.reason })
            }
        }
    }

    // ─────────────────────────────────────────────────────────
    // Global counters
    // ─────────────────────────────────────────────────────────

    pub fn get_total_projects_funded(&self) -> u64 {
        self.total_funded.load(Ordering::SeqCst)
    }

    pub fn get_total_projects_failed(&self) -> u64 {
        self.total_failed.load(Ordering::SeqCst)
    }

    pub fn get_totals(&self) -> EscrowTotals {
        EscrowTotals {
            funded: self.get_total_projects_funded(),
            failed: self.get_total_projects_failed(),
        }
    }
}
