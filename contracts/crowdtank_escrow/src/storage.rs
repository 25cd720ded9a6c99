//! # Campaign Registry
//!
//! Owns the mapping from [`CampaignId`] to [`Campaign`] record and the id
//! counter.
//!
//! | Item        | Type                                              | Description                     |
//! |-------------|---------------------------------------------------|---------------------------------|
//! | `campaigns` | `DashMap<CampaignId, Arc<Mutex<Campaign>>>`       | One lock per campaign record    |
//! | `next_id`   | `AtomicU64`                                       | Next candidate id (starts at 1) |
//!
//! The map itself is only locked (per shard) to look up or insert a record
//! handle; all reads and writes of a record happen under that record's own
//! mutex, so work on different campaigns never contends.
//!
//! Records are never removed: terminal campaigns stay queryable for audit.
//!
//! Mutation is crate-private. Every funds-affecting change goes through the
//! escrow entry points in `lib.rs`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::errors::{EscrowError, Result};
use crate::types::{Campaign, CampaignId, CampaignView, ContributionRecord};

pub(crate) type CampaignHandle = Arc<Mutex<Campaign>>;

#[derive(Debug)]
pub struct CampaignRegistry {
    campaigns: DashMap<CampaignId, CampaignHandle>,
    next_id: AtomicU64,
}

impl Default for CampaignRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CampaignRegistry {
    pub fn new() -> Self {
        Self {
            campaigns: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Insert a new record under `requested`, or under the next free id.
    ///
    /// `build` runs while the id's map slot is held, so nobody can observe the
    /// campaign before `build` returns. Callers use that window to publish
    /// the creation event ahead of any other event for the campaign.
    pub(crate) fn insert_new(
        &self,
        requested: Option<CampaignId>,
        build: impl FnOnce(CampaignId) -> Campaign,
    ) -> Result<CampaignId> {
        let slot = match requested {
            Some(id) => match self.campaigns.entry(id) {
                Entry::Occupied(_) => return Err(EscrowError::DuplicateId(id)),
                Entry::Vacant(slot) => slot,
            },
            None => loop {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                // Ids taken by callers are skipped.
                if let Entry::Vacant(slot) = self.campaigns.entry(id) {
                    break slot;
                }
            },
        };
        let id = *slot.key();
        slot.insert(Arc::new(Mutex::new(build(id))));
        Ok(id)
    }

    /// Record handle for `id`. The map reference is dropped before returning
    /// so the caller can block on the record's mutex without holding a shard.
    pub(crate) fn handle(&self, id: CampaignId) -> Result<CampaignHandle> {
        self.campaigns
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EscrowError::NotFound(id))
    }

    /// Run `f` against the record for `id` under its lock.
    pub(crate) fn with_campaign<R>(
        &self,
        id: CampaignId,
        f: impl FnOnce(&mut Campaign) -> Result<R>,
    ) -> Result<R> {
        let handle = self.handle(id)?;
        let mut campaign = handle.lock();
        f(&mut *campaign)
    }

    pub fn view(&self, id: CampaignId) -> Result<CampaignView> {
        let handle = self.handle(id)?;
        let campaign = handle.lock();
        Ok(campaign.view())
    }

    pub fn contributions(&self, id: CampaignId) -> Result<Vec<ContributionRecord>> {
        let handle = self.handle(id)?;
        let campaign = handle.lock();
        Ok(campaign.contribution_records())
    }

    /// All campaigns ordered by id.
    pub fn views(&self) -> Vec<CampaignView> {
        let handles: Vec<CampaignHandle> = self
            .campaigns
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut views: Vec<CampaignView> = handles.iter().map(|h| h.lock().view()).collect();
        views.sort_by_key(|v| v.id);
        views
    }

    pub fn contains(&self, id: CampaignId) -> bool {
        self.campaigns.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}
