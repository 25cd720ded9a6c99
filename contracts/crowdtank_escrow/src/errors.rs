//! Escrow error taxonomy.
//!
//! Every variant is returned before any state is mutated, or after the
//! mutation has been rolled back, so an `Err` always leaves the campaign
//! exactly as it was.

use thiserror::Error;

use crate::types::CampaignId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EscrowError {
    #[error("goal must be greater than zero")]
    InvalidGoal,

    #[error("duration must be greater than zero and keep the deadline representable")]
    InvalidDuration,

    #[error("amount must be greater than zero and must not overflow the campaign total")]
    InvalidAmount,

    #[error("campaign {0} already exists")]
    DuplicateId(CampaignId),

    #[error("campaign {0} not found")]
    NotFound(CampaignId),

    #[error("campaign {0} is closed to contributions")]
    CampaignClosed(CampaignId),

    #[error("campaign {0} has not been finalized")]
    CampaignNotFinalized(CampaignId),

    #[error("campaign {0} was not funded")]
    NotFunded(CampaignId),

    #[error("creator funds for campaign {0} were already withdrawn")]
    AlreadyWithdrawn(CampaignId),

    #[error("nothing left to withdraw from campaign {0}")]
    NothingToWithdraw(CampaignId),

    #[error("caller has no claim on campaign {0}")]
    NotEligible(CampaignId),

    #[error("transfer failed: {reason}")]
    TransferFailed { reason: String },
}

pub type Result<T> = std::result::Result<T, EscrowError>;
