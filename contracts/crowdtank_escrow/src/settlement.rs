//! # Settlement
//!
//! `user_withdraw_funds` is one entry point with two independently guarded
//! paths, chosen by the caller's role and the campaign's terminal state:
//!
//! | Status   | Caller                         | Outcome                          |
//! |----------|--------------------------------|----------------------------------|
//! | `Open`   | creator or contributor         | `CampaignNotFinalized`           |
//! | `Open`   | anyone else                    | `NotEligible`                    |
//! | `Funded` | creator                        | whole custody balance, once      |
//! | `Funded` | anyone else                    | `NotEligible`                    |
//! | `Failed` | contributor (creator included) | own recorded amount, once        |
//! | `Failed` | creator without a contribution | `NotFunded`                      |
//! | `Failed` | anyone else                    | `NotEligible`                    |
//!
//! A payout is never "pay, then mark paid". The claim is marked `InFlight`
//! under the campaign lock first; the ledger is called with the lock
//! released; the claim is then either `Settled` or restored to `Unclaimed`.
//! A concurrent or reentrant attempt during the transfer sees the claim as
//! already taken. [`ClaimGuard`] restores the claim if the ledger panics.

use tracing::warn;

use crate::errors::{EscrowError, Result};
use crate::storage::CampaignHandle;
use crate::types::{Amount, Campaign, CampaignId, CampaignStatus, ClaimState, Identity, Withdrawal};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Claimant {
    Creator,
    Contributor,
}

/// A payout that has been marked `InFlight` and awaits the ledger.
#[derive(Clone, Debug)]
pub(crate) struct Claim {
    pub campaign_id: CampaignId,
    pub recipient: Identity,
    pub claimant: Claimant,
    pub amount: Amount,
}

impl Claim {
    pub fn withdrawal(&self) -> Withdrawal {
        match self.claimant {
            Claimant::Creator => Withdrawal::Creator {
                amount: self.amount,
            },
            Claimant::Contributor => Withdrawal::Refund {
                amount: self.amount,
            },
        }
    }

    fn set_state(&self, campaign: &mut Campaign, state: ClaimState) {
        match self.claimant {
            Claimant::Creator => campaign.creator_claim = state,
            Claimant::Contributor => {
                if let Some(c) = campaign.contributions.get_mut(&self.recipient) {
                    c.refund = state;
                }
            }
        }
    }
}

/// Validate `caller`'s claim and mark it `InFlight`. Must run under the
/// campaign lock; on `Err` nothing has been changed.
pub(crate) fn open_claim(campaign: &mut Campaign, caller: &Identity) -> Result<Claim> {
    let id = campaign.id;
    let is_creator = *caller == campaign.creator;

    match campaign.status {
        CampaignStatus::Open => {
            if is_creator || campaign.contributions.contains_key(caller) {
                Err(EscrowError::CampaignNotFinalized(id))
            } else {
                Err(EscrowError::NotEligible(id))
            }
        }
        CampaignStatus::Funded => {
            if !is_creator {
                return Err(EscrowError::NotEligible(id));
            }
            if campaign.creator_claim != ClaimState::Unclaimed {
                return Err(EscrowError::AlreadyWithdrawn(id));
            }
            let amount = campaign.custody_balance();
            campaign.creator_claim = ClaimState::InFlight;
            Ok(Claim {
                campaign_id: id,
                recipient: caller.clone(),
                claimant: Claimant::Creator,
                amount,
            })
        }
        CampaignStatus::Failed => match campaign.contributions.get_mut(caller) {
            Some(contribution) if contribution.amount > 0 => {
                let amount = contribution.claimable();
                if amount == 0 {
                    return Err(EscrowError::NothingToWithdraw(id));
                }
                contribution.refund = ClaimState::InFlight;
                Ok(Claim {
                    campaign_id: id,
                    recipient: caller.clone(),
                    claimant: Claimant::Contributor,
                    amount,
                })
            }
            _ if is_creator => Err(EscrowError::NotFunded(id)),
            _ => Err(EscrowError::NotEligible(id)),
        },
    }
}

/// Owns an `InFlight` claim until it is settled or rolled back.
pub(crate) struct ClaimGuard {
    handle: CampaignHandle,
    claim: Claim,
    armed: bool,
}

impl ClaimGuard {
    pub fn new(handle: CampaignHandle, claim: Claim) -> Self {
        Self {
            handle,
            claim,
            armed: true,
        }
    }

    pub fn claim(&self) -> &Claim {
        &self.claim
    }

    /// Mark the claim paid and debit custody. `on_settled` runs under the
    /// same lock acquisition, after the update.
    pub fn settle(mut self, on_settled: impl FnOnce(&Campaign, &Claim)) -> Withdrawal {
        self.armed = false;
        let mut campaign = self.handle.lock();
        self.claim.set_state(&mut *campaign, ClaimState::Settled);
        campaign.released += self.claim.amount;
        on_settled(&*campaign, &self.claim);
        self.claim.withdrawal()
    }

    /// Restore the claim so it can be retried.
    pub fn roll_back(mut self) {
        self.armed = false;
        self.restore();
    }

    fn restore(&self) {
        let mut campaign = self.handle.lock();
        self.claim.set_state(&mut *campaign, ClaimState::Unclaimed);
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                campaign_id = self.claim.campaign_id,
                recipient = %self.claim.recipient,
                "settlement abandoned mid-transfer; claim restored"
            );
            self.restore();
        }
    }
}
