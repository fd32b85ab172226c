use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use shared::domain::{PlayerStats, StatKind};
use tokio::time::timeout;

use super::*;
use crate::{memory_store::InMemoryStore, store::StatsStore, test_support::RecordingPresentation};

struct Player {
    coordinator: RemoteMatchCoordinator,
    view: RecordingPresentation,
}

impl Player {
    fn new(store: &InMemoryStore, id: &str) -> Self {
        Self::with_config(store, id, &ClientConfig::default())
    }

    fn with_config(store: &InMemoryStore, id: &str, config: &ClientConfig) -> Self {
        Self::with_match_store(Arc::new(store.clone()), id, config)
    }

    fn with_match_store(matches: Arc<dyn MatchStore>, id: &str, config: &ClientConfig) -> Self {
        Self {
            coordinator: RemoteMatchCoordinator::new(PlayerId::new(id), matches, config),
            view: RecordingPresentation::default(),
        }
    }

    async fn join(&mut self) -> MatchId {
        self.coordinator
            .find_or_create_match(&mut self.view)
            .await
            .expect("matchmaking")
    }

    async fn play(&mut self, index: usize) -> Result<(), PlayError> {
        self.coordinator.submit_move(index, &mut self.view).await
    }

    /// Applies every snapshot already pushed to this player.
    async fn sync(&mut self) {
        while let Ok(Some(document)) =
            timeout(Duration::from_millis(50), self.coordinator.next_snapshot()).await
        {
            self.coordinator
                .handle_snapshot(document, &mut self.view)
                .await
                .expect("snapshot");
        }
    }
}

/// X X X / O O _ / _ _ _
fn x_top_row() -> Board {
    Board::from_cells([
        Some(Mark::X),
        Some(Mark::X),
        Some(Mark::X),
        Some(Mark::O),
        Some(Mark::O),
        None,
        None,
        None,
        None,
    ])
}

/// Writes `board` straight into the store, as if the last move just landed.
async fn write_board(store: &InMemoryStore, match_id: MatchId, board: Board) {
    let current = store.get_match(match_id).await.expect("document");
    let written = store
        .update_match(
            match_id,
            MatchUpdate::play(board, board.next_mark()),
            Precondition::version(current.version),
        )
        .await
        .expect("write");
    assert!(written.is_applied());
}

async fn stats_of(store: &InMemoryStore, id: &str) -> Option<PlayerStats> {
    store.get_stats(&PlayerId::new(id)).await.expect("stats")
}

fn won_once() -> Option<PlayerStats> {
    Some(PlayerStats::first(StatKind::Wins))
}

fn lost_once() -> Option<PlayerStats> {
    Some(PlayerStats::first(StatKind::Losses))
}

async fn paired(store: &InMemoryStore) -> (Player, Player) {
    let mut alice = Player::new(store, "alice");
    let mut bob = Player::new(store, "bob");
    let created = alice.join().await;
    let claimed = bob.join().await;
    assert_eq!(created, claimed);
    alice.sync().await;
    (alice, bob)
}

#[tokio::test]
async fn first_player_waits_as_x_and_second_claims_as_o() {
    let store = InMemoryStore::new();
    let mut alice = Player::new(&store, "alice");
    let match_id = alice.join().await;
    assert_eq!(alice.coordinator.phase(), RemotePhase::Waiting);
    assert_eq!(alice.coordinator.my_mark(), Some(Mark::X));
    assert_eq!(alice.view.status(), WAITING_FOR_OPPONENT_TEXT);
    assert!(!alice.view.input_enabled);

    let mut bob = Player::new(&store, "bob");
    assert_eq!(bob.join().await, match_id);
    assert_eq!(bob.coordinator.my_mark(), Some(Mark::O));
    assert_eq!(bob.coordinator.phase(), RemotePhase::Active);
    assert_eq!(bob.view.status(), "Waiting for X to move");
    assert!(!bob.view.input_enabled);

    alice.sync().await;
    assert_eq!(alice.coordinator.phase(), RemotePhase::Active);
    assert_eq!(alice.view.status(), "Your turn (X)");
    assert!(alice.view.input_enabled);
}

#[tokio::test]
async fn player_never_claims_their_own_waiting_match() {
    let store = InMemoryStore::new();
    let mut first = Player::new(&store, "alice");
    let mut second = Player::new(&store, "alice");
    let a = first.join().await;
    let b = second.join().await;
    assert_ne!(a, b);
    assert_eq!(second.coordinator.my_mark(), Some(Mark::X));
}

#[tokio::test(start_paused = true)]
async fn concurrent_matchmaking_claims_a_waiting_match_once() {
    let store = InMemoryStore::new().with_latency(Duration::from_millis(20));
    let mut alice = Player::new(&store, "alice");
    let waiting = alice.join().await;

    let mut bob = Player::new(&store, "bob");
    let mut carol = Player::new(&store, "carol");
    let (bob_match, carol_match) = tokio::join!(bob.join(), carol.join());

    let joined: Vec<&Player> = [(&bob, bob_match), (&carol, carol_match)]
        .into_iter()
        .filter(|(_, match_id)| *match_id == waiting)
        .map(|(player, _)| player)
        .collect();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].coordinator.my_mark(), Some(Mark::O));
    assert_ne!(bob_match, carol_match);

    let matches = store.matches().await;
    let claimed = matches.iter().find(|m| m.id == waiting).expect("match");
    assert_eq!(claimed.status, MatchStatus::Active);
    assert_eq!(claimed.version, 2);
    assert_eq!(claimed.player_x, Some(PlayerId::new("alice")));
    assert!(claimed.player_o.is_some());

    let active = matches
        .iter()
        .filter(|m| m.status == MatchStatus::Active)
        .count();
    let waiting_now = matches
        .iter()
        .filter(|m| m.status == MatchStatus::Waiting)
        .count();
    assert_eq!((active, waiting_now), (1, 1));
}

#[tokio::test]
async fn moves_alternate_and_out_of_turn_moves_are_rejected() {
    let store = InMemoryStore::new();
    let (mut alice, mut bob) = paired(&store).await;

    assert_eq!(bob.play(0).await, Err(PlayError::NotYourTurn));

    alice.play(4).await.expect("x moves");
    assert_eq!(alice.view.cells[4], Some(Mark::X));
    assert_eq!(alice.view.status(), "Waiting for O to move");
    assert_eq!(alice.play(0).await, Err(PlayError::NotYourTurn));

    bob.sync().await;
    assert_eq!(bob.view.cells[4], Some(Mark::X));
    assert_eq!(bob.view.status(), "Your turn (O)");
    assert_eq!(bob.play(4).await, Err(PlayError::InvalidMove { index: 4 }));
    bob.play(0).await.expect("o moves");

    let document = store
        .get_match(alice.coordinator.match_id().expect("match"))
        .await
        .expect("document");
    assert_eq!(document.board.count(Mark::X), 1);
    assert_eq!(document.board.count(Mark::O), 1);
    assert_eq!(document.turn, Mark::X);
    assert!(document.board.has_valid_turn_balance());
}

struct InterleavingStore {
    inner: InMemoryStore,
    injected: Mutex<Option<(MatchId, MatchUpdate)>>,
}

#[async_trait]
impl MatchStore for InterleavingStore {
    async fn create_match(&self, player_x: &PlayerId) -> Result<MatchDocument, StoreError> {
        self.inner.create_match(player_x).await
    }

    async fn get_match(&self, match_id: MatchId) -> Result<MatchDocument, StoreError> {
        self.inner.get_match(match_id).await
    }

    async fn update_match(
        &self,
        match_id: MatchId,
        update: MatchUpdate,
        precondition: Precondition,
    ) -> Result<UpdateResult, StoreError> {
        let injected = self.injected.lock().expect("lock").take();
        if let Some((target, write)) = injected {
            self.inner
                .update_match(target, write, Precondition::none())
                .await?;
        }
        self.inner.update_match(match_id, update, precondition).await
    }

    async fn query_waiting_matches(&self, limit: u32) -> Result<Vec<MatchDocument>, StoreError> {
        self.inner.query_waiting_matches(limit).await
    }

    async fn subscribe(&self, match_id: MatchId) -> Result<MatchSubscription, StoreError> {
        self.inner.subscribe(match_id).await
    }
}

#[tokio::test]
async fn losing_the_version_race_is_not_your_turn() {
    let store = InMemoryStore::new();
    let interleaving = Arc::new(InterleavingStore {
        inner: store.clone(),
        injected: Mutex::new(None),
    });
    let mut alice =
        Player::with_match_store(interleaving.clone(), "alice", &ClientConfig::default());
    let match_id = alice.join().await;
    let mut bob = Player::new(&store, "bob");
    bob.join().await;
    alice.sync().await;

    let mut concurrent = Board::new();
    concurrent.apply_move(0, Mark::X).expect("move");
    *interleaving.injected.lock().expect("lock") =
        Some((match_id, MatchUpdate::play(concurrent, Mark::O)));

    assert_eq!(alice.play(4).await, Err(PlayError::NotYourTurn));
    assert_eq!(alice.coordinator.board(), &concurrent);

    let document = store.get_match(match_id).await.expect("document");
    assert_eq!(document.board, concurrent);
    assert_eq!(document.turn, Mark::O);
}

#[tokio::test]
async fn stale_snapshots_are_dropped() {
    let store = InMemoryStore::new();
    let (mut alice, mut bob) = paired(&store).await;
    alice.play(4).await.expect("move");
    bob.sync().await;

    let current = store
        .get_match(alice.coordinator.match_id().expect("match"))
        .await
        .expect("document");
    let mut stale = current.clone();
    stale.version -= 1;
    stale.board = Board::new();

    alice
        .coordinator
        .handle_snapshot(stale, &mut alice.view)
        .await
        .expect("snapshot");
    assert_eq!(alice.coordinator.board(), &current.board);
    assert_eq!(alice.coordinator.applied_version(), current.version);
    assert_eq!(alice.view.cells[4], Some(Mark::X));
}

#[tokio::test]
async fn terminal_board_finishes_once_and_counts_stats_once() {
    let store = InMemoryStore::new();
    let (mut alice, mut bob) = paired(&store).await;
    let match_id = alice.coordinator.match_id().expect("match");
    bob.sync().await;

    write_board(&store, match_id, x_top_row()).await;

    tokio::join!(alice.sync(), bob.sync());

    let document = store.get_match(match_id).await.expect("document");
    assert_eq!(document.status, MatchStatus::Finished);
    assert_eq!(document.winner, Winner::X);
    assert_eq!(stats_of(&store, "alice").await, won_once());
    assert_eq!(stats_of(&store, "bob").await, lost_once());

    assert_eq!(alice.coordinator.phase(), RemotePhase::Finished);
    assert_eq!(bob.coordinator.phase(), RemotePhase::Finished);
    assert_eq!(alice.view.status(), "You win!");
    assert_eq!(bob.view.status(), "You lose!");
    assert_eq!(alice.view.cues.iter().filter(|c| **c == Cue::Win).count(), 1);
    assert_eq!(bob.view.cues.iter().filter(|c| **c == Cue::Lose).count(), 1);
}

#[tokio::test]
async fn played_out_draw_records_a_draw_for_both() {
    let store = InMemoryStore::new();
    let (mut alice, mut bob) = paired(&store).await;

    // X O X / X O O / O X X
    let moves = [(0, true), (1, false), (2, true), (4, false), (3, true), (5, false), (7, true), (6, false), (8, true)];
    for (index, alice_moves) in moves {
        if alice_moves {
            alice.sync().await;
            alice.play(index).await.expect("alice moves");
        } else {
            bob.sync().await;
            bob.play(index).await.expect("bob moves");
        }
    }
    alice.sync().await;
    bob.sync().await;

    let draw = PlayerStats {
        wins: 0,
        losses: 0,
        draws: 1,
    };
    assert_eq!(store.get_stats(&PlayerId::new("alice")).await.expect("stats"), Some(draw));
    assert_eq!(store.get_stats(&PlayerId::new("bob")).await.expect("stats"), Some(draw));
    assert_eq!(alice.view.status(), "Draw!");
    assert_eq!(bob.view.cues.last(), Some(&Cue::Draw));
}

#[tokio::test]
async fn restart_clears_a_finished_match_for_both_players() {
    let store = InMemoryStore::new();
    let (mut alice, mut bob) = paired(&store).await;
    for (index, alice_moves) in [(0, true), (3, false), (1, true), (4, false), (2, true)] {
        if alice_moves {
            alice.sync().await;
            alice.play(index).await.expect("alice moves");
        } else {
            bob.sync().await;
            bob.play(index).await.expect("bob moves");
        }
    }
    assert_eq!(alice.coordinator.phase(), RemotePhase::Finished);

    bob.sync().await;
    bob.coordinator
        .restart(&mut bob.view)
        .await
        .expect("restart");
    assert_eq!(bob.coordinator.board(), &Board::new());
    assert_eq!(bob.coordinator.phase(), RemotePhase::Active);

    alice.sync().await;
    assert_eq!(alice.coordinator.phase(), RemotePhase::Active);
    assert_eq!(alice.view.status(), "Your turn (X)");
    assert!(alice.view.cells.iter().all(Option::is_none));
    alice.play(4).await.expect("new game");
}

#[tokio::test]
async fn late_finish_after_a_restart_is_not_applied() {
    let store = InMemoryStore::new();
    let (mut alice, mut bob) = paired(&store).await;
    let match_id = alice.coordinator.match_id().expect("match");
    bob.sync().await;

    write_board(&store, match_id, x_top_row()).await;
    bob.sync().await;
    bob.coordinator
        .restart(&mut bob.view)
        .await
        .expect("restart");

    // Alice only now sees the winning board and tries to finish it.
    alice.sync().await;

    let document = store.get_match(match_id).await.expect("document");
    assert_eq!(document.status, MatchStatus::Active);
    assert_eq!(document.winner, Winner::None);
    assert_eq!(document.board, Board::new());
    assert_eq!(stats_of(&store, "alice").await, won_once());
    assert_eq!(stats_of(&store, "bob").await, lost_once());

    assert_eq!(alice.coordinator.phase(), RemotePhase::Active);
    assert_eq!(alice.view.status(), "Your turn (X)");
}

#[tokio::test(start_paused = true)]
async fn finish_completes_when_the_caller_is_dropped() {
    let store = InMemoryStore::new().with_latency(Duration::from_millis(20));
    let (mut alice, _bob) = paired(&store).await;
    let match_id = alice.coordinator.match_id().expect("match");

    write_board(&store, match_id, x_top_row()).await;
    let snapshot = alice.coordinator.next_snapshot().await.expect("snapshot");
    assert_eq!(snapshot.board, x_top_row());

    let cut_short = timeout(
        Duration::from_millis(5),
        alice.coordinator.handle_snapshot(snapshot, &mut alice.view),
    )
    .await;
    assert!(cut_short.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let document = store.get_match(match_id).await.expect("document");
    assert_eq!(document.status, MatchStatus::Finished);
    assert_eq!(document.winner, Winner::X);
    assert_eq!(stats_of(&store, "alice").await, won_once());
    assert_eq!(stats_of(&store, "bob").await, lost_once());
}

/// Applies writes but loses the response to the first one `lose_ack`
/// picks, like a server that committed before the connection dropped.
struct LostAckStore {
    inner: InMemoryStore,
    lose_ack: Mutex<Option<fn(&MatchUpdate) -> bool>>,
}

impl LostAckStore {
    fn new(inner: &InMemoryStore, lose_ack: fn(&MatchUpdate) -> bool) -> Arc<Self> {
        Arc::new(Self {
            inner: inner.clone(),
            lose_ack: Mutex::new(Some(lose_ack)),
        })
    }
}

#[async_trait]
impl MatchStore for LostAckStore {
    async fn create_match(&self, player_x: &PlayerId) -> Result<MatchDocument, StoreError> {
        self.inner.create_match(player_x).await
    }

    async fn get_match(&self, match_id: MatchId) -> Result<MatchDocument, StoreError> {
        self.inner.get_match(match_id).await
    }

    async fn update_match(
        &self,
        match_id: MatchId,
        update: MatchUpdate,
        precondition: Precondition,
    ) -> Result<UpdateResult, StoreError> {
        let result = self
            .inner
            .update_match(match_id, update.clone(), precondition)
            .await?;
        let mut lose_ack = self.lose_ack.lock().expect("lock");
        if result.is_applied() && lose_ack.is_some_and(|picks| picks(&update)) {
            *lose_ack = None;
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        Ok(result)
    }

    async fn query_waiting_matches(&self, limit: u32) -> Result<Vec<MatchDocument>, StoreError> {
        self.inner.query_waiting_matches(limit).await
    }

    async fn subscribe(&self, match_id: MatchId) -> Result<MatchSubscription, StoreError> {
        self.inner.subscribe(match_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn claim_whose_response_was_lost_still_joins_the_match() {
    let store = InMemoryStore::new();
    let mut alice = Player::new(&store, "alice");
    let waiting = alice.join().await;

    let lossy = LostAckStore::new(&store, |update| update.player_o.is_some());
    let mut bob = Player::with_match_store(lossy, "bob", &ClientConfig::default());
    assert_eq!(bob.join().await, waiting);
    assert_eq!(bob.coordinator.my_mark(), Some(Mark::O));
    assert_eq!(store.matches().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn move_whose_response_was_lost_is_not_reported_as_lost() {
    let store = InMemoryStore::new();
    let lossy = LostAckStore::new(&store, |update| update.board.is_some());
    let mut alice = Player::with_match_store(lossy, "alice", &ClientConfig::default());
    alice.join().await;
    let mut bob = Player::new(&store, "bob");
    bob.join().await;
    alice.sync().await;

    alice.play(4).await.expect("move");
    assert_eq!(alice.view.status(), "Waiting for O to move");
    let document = store
        .get_match(alice.coordinator.match_id().expect("match"))
        .await
        .expect("document");
    assert_eq!(document.board.count(Mark::X), 1);
    assert_eq!(document.turn, Mark::O);
}

#[tokio::test(start_paused = true)]
async fn finish_whose_response_was_lost_counts_the_game_once() {
    let store = InMemoryStore::new();
    let lossy = LostAckStore::new(&store, |update| {
        update.status == Some(MatchStatus::Finished)
    });
    let mut alice = Player::with_match_store(lossy, "alice", &ClientConfig::default());
    let match_id = alice.join().await;
    let mut bob = Player::new(&store, "bob");
    bob.join().await;
    alice.sync().await;

    write_board(&store, match_id, x_top_row()).await;
    alice.sync().await;
    bob.sync().await;

    let document = store.get_match(match_id).await.expect("document");
    assert_eq!(document.status, MatchStatus::Finished);
    assert_eq!(stats_of(&store, "alice").await, won_once());
    assert_eq!(stats_of(&store, "bob").await, lost_once());
    assert_eq!(alice.view.status(), "You win!");
}

#[tokio::test(start_paused = true)]
async fn unavailable_store_is_retried_with_backoff() {
    let store = InMemoryStore::new();
    store.fail_next(2);
    let mut alice = Player::new(&store, "alice");

    let started = tokio::time::Instant::now();
    alice.join().await;
    let policy = RetryPolicy::default();
    assert!(started.elapsed() >= policy.delay_before(1) + policy.delay_before(2));
    assert_eq!(alice.coordinator.phase(), RemotePhase::Waiting);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_store_unavailable() {
    let store = InMemoryStore::new();
    store.fail_next(10);
    let config = ClientConfig {
        retry: RetryPolicy {
            attempts: 2,
            ..RetryPolicy::default()
        },
        ..ClientConfig::default()
    };
    let mut alice = Player::with_config(&store, "alice", &config);

    let result = alice
        .coordinator
        .find_or_create_match(&mut alice.view)
        .await;
    assert!(matches!(result, Err(PlayError::StoreUnavailable(_))));
    assert_eq!(alice.coordinator.phase(), RemotePhase::Idle);
    assert_eq!(alice.coordinator.match_id(), None);
}

#[tokio::test]
async fn leaving_keeps_the_match_and_stops_updates() {
    let store = InMemoryStore::new();
    let (mut alice, mut bob) = paired(&store).await;
    let match_id = alice.coordinator.match_id().expect("match");

    alice.coordinator.leave();
    assert_eq!(alice.coordinator.phase(), RemotePhase::Idle);
    assert_eq!(alice.play(0).await, Err(PlayError::NoActiveMatch));

    bob.sync().await;
    let document = store.get_match(match_id).await.expect("document");
    assert_eq!(document.status, MatchStatus::Active);

    let pushed = timeout(
        Duration::from_millis(50),
        alice.coordinator.next_snapshot(),
    )
    .await;
    assert!(pushed.is_err());
}
