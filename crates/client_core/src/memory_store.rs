use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use shared::{
    domain::{MatchDocument, MatchId, MatchStatus, PlayerId, PlayerStats, StatKind},
    protocol::{MatchUpdate, Precondition},
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    store::{MatchStore, MatchSubscription, StatsStore, UpdateResult, SUBSCRIPTION_BUFFER},
};

const EVENT_BUFFER: usize = 64;

#[derive(Default)]
struct Inner {
    next_id: i64,
    matches: BTreeMap<i64, MatchDocument>,
    stats: HashMap<PlayerId, PlayerStats>,
}

/// Process-local match and stats store with the same conditional-update
/// semantics as the server. Clones share state.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<MatchDocument>,
    latency: Duration,
    failures_remaining: Arc<AtomicU32>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            events,
            latency: Duration::ZERO,
            failures_remaining: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Delays every call by `latency`, like a network round-trip.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes the next `count` calls fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub async fn matches(&self) -> Vec<MatchDocument> {
        self.inner.lock().await.matches.values().cloned().collect()
    }

    async fn round_trip(&self) -> Result<(), StoreError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MatchStore for InMemoryStore {
    async fn create_match(&self, player_x: &PlayerId) -> Result<MatchDocument, StoreError> {
        self.round_trip().await?;
        let document = {
            let mut inner = self.inner.lock().await;
            inner.next_id += 1;
            let id = MatchId(inner.next_id);
            let document = MatchDocument::new_waiting(id, player_x.clone(), Utc::now());
            inner.matches.insert(id.0, document.clone());
            document
        };
        debug!(match_id = document.id.0, player_x = %player_x, "in-memory match created");
        let _ = self.events.send(document.clone());
        Ok(document)
    }

    async fn get_match(&self, match_id: MatchId) -> Result<MatchDocument, StoreError> {
        self.round_trip().await?;
        self.inner
            .lock()
            .await
            .matches
            .get(&match_id.0)
            .cloned()
            .ok_or(StoreError::MatchNotFound(match_id))
    }

    async fn update_match(
        &self,
        match_id: MatchId,
        update: MatchUpdate,
        precondition: Precondition,
    ) -> Result<UpdateResult, StoreError> {
        self.round_trip().await?;
        let result = {
            let mut inner = self.inner.lock().await;
            let document = inner
                .matches
                .get_mut(&match_id.0)
                .ok_or(StoreError::MatchNotFound(match_id))?;
            if precondition.holds_for(document) {
                let ends_game = update.ends_game(document);
                update.apply_to(document, Utc::now());
                let applied = document.clone();
                if ends_game {
                    for (player_id, stat) in applied.results() {
                        inner.stats.entry(player_id).or_default().increment(stat);
                    }
                }
                UpdateResult::Applied(applied)
            } else {
                UpdateResult::Conflict(document.clone())
            }
        };
        if let UpdateResult::Applied(document) = &result {
            let _ = self.events.send(document.clone());
        }
        Ok(result)
    }

    async fn query_waiting_matches(&self, limit: u32) -> Result<Vec<MatchDocument>, StoreError> {
        self.round_trip().await?;
        let inner = self.inner.lock().await;
        Ok(inner
            .matches
            .values()
            .filter(|document| document.status == MatchStatus::Waiting)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn subscribe(&self, match_id: MatchId) -> Result<MatchSubscription, StoreError> {
        let mut events = BroadcastStream::new(self.events.subscribe());
        let current = self.get_match(match_id).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            if tx.send(current).await.is_err() {
                return;
            }
            while let Some(item) = events.next().await {
                let document = match item {
                    Ok(document) if document.id == match_id => document,
                    Ok(_) => continue,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(match_id = match_id.0, skipped, "subscriber lagged; resending snapshot");
                        match inner.lock().await.matches.get(&match_id.0).cloned() {
                            Some(document) => document,
                            None => break,
                        }
                    }
                };
                if tx.send(document).await.is_err() {
                    break;
                }
            }
        });

        Ok(MatchSubscription::new(match_id, rx, task))
    }
}

#[async_trait]
impl StatsStore for InMemoryStore {
    async fn get_stats(&self, player_id: &PlayerId) -> Result<Option<PlayerStats>, StoreError> {
        self.round_trip().await?;
        Ok(self.inner.lock().await.stats.get(player_id).copied())
    }

    async fn increment_stat(
        &self,
        player_id: &PlayerId,
        stat: StatKind,
    ) -> Result<PlayerStats, StoreError> {
        self.round_trip().await?;
        let mut inner = self.inner.lock().await;
        let stats = inner.stats.entry(player_id.clone()).or_default();
        stats.increment(stat);
        Ok(*stats)
    }

    async fn create_stats(
        &self,
        player_id: &PlayerId,
        initial: PlayerStats,
    ) -> Result<bool, StoreError> {
        self.round_trip().await?;
        let mut inner = self.inner.lock().await;
        if inner.stats.contains_key(player_id) {
            return Ok(false);
        }
        inner.stats.insert(player_id.clone(), initial);
        Ok(true)
    }
}

#[cfg(test)]
#[path = "tests/memory_store_tests.rs"]
mod tests;
