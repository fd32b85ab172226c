use async_trait::async_trait;
use shared::{
    domain::{MatchDocument, MatchId, PlayerId, PlayerStats, StatKind},
    protocol::{MatchUpdate, Precondition},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use crate::error::StoreError;

/// Buffer between a store's push source and the subscriber.
pub const SUBSCRIPTION_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateResult {
    Applied(MatchDocument),
    /// The precondition failed; carries the current stored document.
    Conflict(MatchDocument),
}

impl UpdateResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateResult::Applied(_))
    }

    pub fn document(&self) -> &MatchDocument {
        match self {
            UpdateResult::Applied(document) | UpdateResult::Conflict(document) => document,
        }
    }

    pub fn into_document(self) -> MatchDocument {
        match self {
            UpdateResult::Applied(document) | UpdateResult::Conflict(document) => document,
        }
    }
}

/// Live feed of snapshots for one match. The first snapshot is the document
/// as it was when the subscription opened. Dropping the handle unsubscribes.
pub struct MatchSubscription {
    match_id: MatchId,
    rx: mpsc::Receiver<MatchDocument>,
    task: JoinHandle<()>,
}

impl MatchSubscription {
    pub fn new(match_id: MatchId, rx: mpsc::Receiver<MatchDocument>, task: JoinHandle<()>) -> Self {
        Self { match_id, rx, task }
    }

    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    /// `None` once the push source has gone away.
    pub async fn next(&mut self) -> Option<MatchDocument> {
        self.rx.recv().await
    }
}

impl Drop for MatchSubscription {
    fn drop(&mut self) {
        self.task.abort();
        debug!(match_id = self.match_id.0, "match subscription released");
    }
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn create_match(&self, player_x: &PlayerId) -> Result<MatchDocument, StoreError>;
    async fn get_match(&self, match_id: MatchId) -> Result<MatchDocument, StoreError>;
    async fn update_match(
        &self,
        match_id: MatchId,
        update: MatchUpdate,
        precondition: Precondition,
    ) -> Result<UpdateResult, StoreError>;
    /// Oldest waiting matches first.
    async fn query_waiting_matches(&self, limit: u32) -> Result<Vec<MatchDocument>, StoreError>;
    async fn subscribe(&self, match_id: MatchId) -> Result<MatchSubscription, StoreError>;
}

#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn get_stats(&self, player_id: &PlayerId) -> Result<Option<PlayerStats>, StoreError>;
    async fn increment_stat(
        &self,
        player_id: &PlayerId,
        stat: StatKind,
    ) -> Result<PlayerStats, StoreError>;
    /// Returns `false` without writing when the player already has stats.
    async fn create_stats(
        &self,
        player_id: &PlayerId,
        initial: PlayerStats,
    ) -> Result<bool, StoreError>;
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
