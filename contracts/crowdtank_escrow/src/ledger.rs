//! # Ledger substrate
//!
//! The escrow never moves value itself. When a withdrawal or refund is
//! settled it asks a [`Ledger`] to release exactly the computed amount to
//! exactly one recipient, and treats the answer as authoritative:
//!
//! - `Ok(())` — the value left custody; the claim is settled.
//! - `Err(TransferError)` — nothing moved; the claim stays valid and the
//!   caller may retry.
//!
//! [`InMemoryLedger`] is a custodial book used by the gateway and by tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::types::{Amount, Identity};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct TransferError {
    pub reason: String,
}

impl TransferError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// "Release value to identity" primitive supplied by the host.
pub trait Ledger: Send + Sync {
    fn release(&self, recipient: &Identity, amount: Amount) -> Result<(), TransferError>;
}

impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    fn release(&self, recipient: &Identity, amount: Amount) -> Result<(), TransferError> {
        (**self).release(recipient, amount)
    }
}

#[derive(Debug, Default)]
struct Book {
    balances: HashMap<Identity, Amount>,
    rejected: HashSet<Identity>,
    total_released: Amount,
}

/// Custodial book that credits released value to recipients.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    book: Mutex<Book>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total value released to `who` so far.
    pub fn balance_of(&self, who: &Identity) -> Amount {
        self.book.lock().balances.get(who).copied().unwrap_or(0)
    }

    pub fn total_released(&self) -> Amount {
        self.book.lock().total_released
    }

    /// Make every subsequent release to `who` fail until re-enabled.
    pub fn reject_transfers_to(&self, who: &Identity) {
        self.book.lock().rejected.insert(who.clone());
    }

    pub fn accept_transfers_to(&self, who: &Identity) {
        self.book.lock().rejected.remove(who);
    }
}

impl Ledger for InMemoryLedger {
    fn release(&self, recipient: &Identity, amount: Amount) -> Result<(), TransferError> {
        let mut book = self.book.lock();
        if book.rejected.contains(recipient) {
            return Err(TransferError::new(format!(
                "recipient {recipient} rejected the transfer"
            )));
        }
        let total = book
            .total_released
            .checked_add(amount)
            .ok_or_else(|| TransferError::new("ledger total overflow"))?;
        let balance = book.balances.entry(recipient.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| TransferError::new("recipient balance overflow"))?;
        book.total_released = total;
        Ok(())
    }
}
