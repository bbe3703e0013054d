//! Match state and the client tick loop

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::game::entity::{ExplosionRecord, Facing, Identity, Weapon, MAX_HEALTH};
use crate::game::outcome::{MatchPhase, MatchResult, OutcomeArbiter, ReportOutcome};
use crate::game::reconcile::{assign_role, RemoteEvent, RemoteReconciler, RoleAssignment};
use crate::game::sim::{self, Claim, SimEvent, SimulationState};
use crate::game::snapshot::SnapshotBuilder;
use crate::game::Intents;
use crate::store::protocol::{RoomSnapshot, Slot};
use crate::store::{sanitize_room_key, DocumentWrite, MatchDocument, StoreError};
use crate::util::time::{frame_duration, MatchClock};

const INTENT_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

/// Errors that stop a client from taking part in a match
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("Room is full")]
    RoomFull,

    #[error("Connection error: {0}")]
    Connection(#[from] StoreError),
}

/// Observable things that happened in a match
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    Joined { slot: Slot, resumed: bool },
    PhaseChanged(MatchPhase),
    OpponentJoined { name: String },
    OpponentLeft,
    OpponentFired { weapon: Weapon },
    IncomingAirstrike { target_x: f32 },
    ExplosionReplayed(ExplosionRecord),
    Local(SimEvent),
    ReportAcknowledged,
    /// The room was removed mid-match; no outcome follows
    RoomClosed,
    Ended(MatchResult),
}

/// What the HUD needs to draw one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HudView {
    pub phase: MatchPhase,
    pub slot: Option<Slot>,
    pub x: f32,
    pub y: f32,
    pub facing: Facing,
    pub health: u32,
    pub weapon: Weapon,
    pub opponent_name: Option<String>,
    pub opponent_x: Option<f32>,
    pub opponent_y: Option<f32>,
    pub opponent_health: Option<u32>,
    pub grenade_cooldown_ms: u64,
    pub sniper_cooldown_ms: u64,
    pub airstrikes_left: u32,
    /// Charge fraction while a grenade is held
    pub grenade_charge: Option<f32>,
    pub afk_remaining_ms: Option<u64>,
    pub result: Option<MatchResult>,
}

impl HudView {
    /// Health bar fill in [0, 1]
    pub fn health_fraction(health: u32) -> f32 {
        health.min(MAX_HEALTH) as f32 / MAX_HEALTH as f32
    }

    /// Cooldown label, whole seconds rounded up
    pub fn cooldown_label(remaining_ms: u64) -> Option<String> {
        (remaining_ms > 0).then(|| format!("{}s", remaining_ms.div_ceil(1000)))
    }
}

/// Match parameters for one client
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub room_code: String,
    pub player_name: String,
    pub player_handle: String,
    pub seed: u64,
    pub frame_rate: u32,
}

/// Writes to commit and events to announce after one step
#[derive(Debug, Default)]
pub struct StepOutput {
    pub writes: Vec<DocumentWrite>,
    pub events: Vec<MatchEvent>,
}

/// One client's view of a match, driven by frames and snapshots.
///
/// Holds no I/O; [`GameMatch`] feeds it and commits what it returns.
pub struct MatchState {
    room: String,
    identity: Identity,
    seed: u64,
    arbiter: OutcomeArbiter,
    sim: Option<SimulationState>,
    reconciler: Option<RemoteReconciler>,
    publisher: Option<SnapshotBuilder>,
    /// Last opponent seen, for declaring them the winner after they left
    last_opponent: Option<(String, String)>,
    left: bool,
}

impl MatchState {
    pub fn new(room_code: &str, raw_name: &str, handle: &str, seed: u64, now_ms: u64) -> Self {
        let room = sanitize_room_key(room_code);
        let identity = Identity::parse(raw_name, handle);
        Self {
            arbiter: OutcomeArbiter::new(identity.clone(), &room, now_ms),
            room,
            identity,
            seed,
            sim: None,
            reconciler: None,
            publisher: None,
            last_opponent: None,
            left: false,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn phase(&self) -> MatchPhase {
        self.arbiter.phase()
    }

    pub fn result(&self) -> Option<&MatchResult> {
        self.arbiter.result()
    }

    pub fn slot(&self) -> Option<Slot> {
        self.sim.as_ref().map(|s| s.slot)
    }

    pub fn sim(&self) -> Option<&SimulationState> {
        self.sim.as_ref()
    }

    /// Fold a room snapshot in. The first one assigns our role.
    pub fn on_snapshot(&mut self, value: Option<&Value>, now_ms: u64) -> Result<StepOutput, JoinError> {
        let mut out = StepOutput::default();
        if self.phase() == MatchPhase::Ended {
            return Ok(out);
        }

        let snapshot = match RoomSnapshot::from_value(value) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(room = %self.room, error = %e, "Ignoring malformed room snapshot");
                return Ok(out);
            }
        };

        if self.sim.is_none() {
            self.join(&snapshot, &mut out)?;
        } else if value.map_or(true, Value::is_null) && self.arbiter.room_closed() {
            out.events.push(MatchEvent::PhaseChanged(MatchPhase::Ended));
            out.events.push(MatchEvent::RoomClosed);
            // Nothing left to remove, and a leave merge would recreate the room
            self.left = true;
            return Ok(out);
        }
        let (Some(sim), Some(reconciler)) = (self.sim.as_mut(), self.reconciler.as_mut()) else {
            return Ok(out);
        };

        let observation = reconciler.observe(&snapshot);
        sim.opponent = observation.opponent;
        if let Some(health) = observation.own_health {
            sim.player.health = health;
        }

        for event in observation.events {
            match event {
                RemoteEvent::Joined { name, handle } => {
                    info!(room = %self.room, opponent = %name, "Opponent joined");
                    self.last_opponent = Some((name.clone(), handle));
                    out.events.push(MatchEvent::OpponentJoined { name });
                }
                RemoteEvent::Left => {
                    info!(room = %self.room, "Opponent left");
                    out.events.push(MatchEvent::OpponentLeft);
                }
                RemoteEvent::Fired { weapon } => out.events.push(MatchEvent::OpponentFired { weapon }),
                RemoteEvent::AirstrikeDesignated { target_x } => {
                    sim.schedule_remote_strike(target_x, now_ms);
                    out.events.push(MatchEvent::IncomingAirstrike { target_x });
                }
                RemoteEvent::ExplosionReplay(record) => {
                    sim.replay_explosion(&record);
                    out.events.push(MatchEvent::ExplosionReplayed(record));
                }
            }
        }
        if observation.heartbeat_advanced {
            self.arbiter.heartbeat(now_ms);
        }

        // Our own slot counts even before the claim echoes back
        let own = sim.slot;
        let occupied = Slot::ALL
            .iter()
            .filter(|slot| **slot == own || snapshot.slot(**slot).is_some())
            .count();
        if let Some(phase) = self.arbiter.observe_slots(occupied, now_ms) {
            out.events.push(MatchEvent::PhaseChanged(phase));
        }

        if let Some(record) = &snapshot.winner {
            if let Some(result) = self.arbiter.observe_outcome(record) {
                out.events.push(MatchEvent::PhaseChanged(MatchPhase::Ended));
                out.events.push(MatchEvent::Ended(result));
                out.writes.extend(self.teardown_writes());
            }
        }
        Ok(out)
    }

    fn join(&mut self, snapshot: &RoomSnapshot, out: &mut StepOutput) -> Result<(), JoinError> {
        let (sim, resumed) = match assign_role(snapshot, &self.identity) {
            RoleAssignment::Claimed(slot) => (
                SimulationState::new(&self.room, slot, self.identity.clone(), self.seed),
                false,
            ),
            RoleAssignment::Resumed(slot, record) => (
                SimulationState::resume(&self.room, slot, self.identity.clone(), &record, self.seed),
                true,
            ),
            RoleAssignment::Full => {
                warn!(room = %self.room, player = %self.identity.name, "Room is full");
                return Err(JoinError::RoomFull);
            }
        };

        let mut publisher = SnapshotBuilder::new(&sim);
        let writes = if resumed {
            publisher.resume(&sim)
        } else {
            publisher.claim(&sim)
        }
        .map_err(StoreError::from)?;

        info!(
            room = %self.room,
            player = %self.identity.name,
            slot = %sim.slot.key(),
            resumed,
            "Joined room"
        );
        out.writes.extend(writes);
        out.events.push(MatchEvent::Joined {
            slot: sim.slot,
            resumed,
        });

        self.reconciler = Some(RemoteReconciler::new(sim.slot));
        self.publisher = Some(publisher);
        self.sim = Some(sim);
        Ok(())
    }

    /// Run one frame of local simulation
    pub fn on_frame(&mut self, intents: &Intents, now_ms: u64) -> StepOutput {
        let mut out = StepOutput::default();
        match self.phase() {
            MatchPhase::Ended => return out,
            MatchPhase::Waiting => {
                if self.sim.is_some() {
                    out.writes.extend(self.arbiter.poll_watchdogs(now_ms));
                }
                return out;
            }
            MatchPhase::Playing => {}
        }

        if intents.report {
            self.report(&mut out);
            if self.phase() == MatchPhase::Ended {
                return out;
            }
        }

        let Some(sim) = self.sim.as_mut() else {
            return out;
        };
        let tick = sim::tick(sim, intents, now_ms);
        out.writes.extend(tick.writes);

        for claim in tick.claims {
            let write = match claim {
                Claim::LocalWins(reason) => self.arbiter.declare_self(reason),
                Claim::OpponentWins(reason) => match &self.last_opponent {
                    Some((name, handle)) => self.arbiter.declare(name, handle, reason),
                    None => None,
                },
            };
            out.writes.extend(write);
        }
        out.events.extend(tick.events.into_iter().map(MatchEvent::Local));

        if let Some(publisher) = self.publisher.as_mut() {
            match publisher.publish(sim) {
                Ok(write) => out.writes.push(write),
                Err(e) => error!(room = %self.room, error = %e, "Failed to serialize player record"),
            }
        }

        out.writes.extend(self.arbiter.poll_watchdogs(now_ms));
        out
    }

    fn report(&mut self, out: &mut StepOutput) {
        let opponent = self.sim.as_ref().and_then(|s| s.opponent.as_ref());
        match self.arbiter.report(opponent) {
            ReportOutcome::CheaterDetected(write) => {
                out.writes.push(write);
                out.events.push(MatchEvent::PhaseChanged(MatchPhase::Ended));
                out.events.push(MatchEvent::Ended(MatchResult::CheaterDetected));
                // The whole room is gone, our slot with it
                self.left = true;
            }
            ReportOutcome::Acknowledged => {
                info!(room = %self.room, "Report submitted");
                out.events.push(MatchEvent::ReportAcknowledged);
            }
            ReportOutcome::Ignored => {}
        }
    }

    /// Writes for a clean leave; empty once already left
    pub fn teardown_writes(&mut self) -> Vec<DocumentWrite> {
        if self.left {
            return Vec::new();
        }
        self.left = true;
        self.publisher.as_ref().map(SnapshotBuilder::leave).into_iter().collect()
    }

    pub fn view(&self, now_ms: u64) -> HudView {
        let mut view = HudView {
            phase: self.phase(),
            result: self.result().cloned(),
            afk_remaining_ms: self.arbiter.afk_remaining_ms(now_ms),
            ..Default::default()
        };
        let Some(sim) = &self.sim else {
            return view;
        };

        let player = &sim.player;
        view.slot = Some(sim.slot);
        view.x = player.x;
        view.y = player.y;
        view.facing = player.facing;
        view.health = player.health;
        view.weapon = player.weapon;
        view.grenade_cooldown_ms = sim.cooldown_remaining_ms(Weapon::Grenade, now_ms);
        view.sniper_cooldown_ms = sim.cooldown_remaining_ms(Weapon::Sniper, now_ms);
        view.airstrikes_left = sim.airstrikes_left();
        view.grenade_charge = sim.grenade_charge(now_ms);

        if let Some(opponent) = &sim.opponent {
            view.opponent_name = Some(opponent.name.clone());
            view.opponent_x = Some(opponent.x);
            view.opponent_y = Some(opponent.y);
            view.opponent_health = Some(opponent.settled_health());
        }
        view
    }
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub intents: mpsc::Sender<Intents>,
    pub events: broadcast::Sender<MatchEvent>,
    pub view: watch::Receiver<HudView>,
}

impl MatchHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.events.subscribe()
    }
}

/// A client's match loop over a shared document
pub struct GameMatch<D: MatchDocument> {
    doc: D,
    state: MatchState,
    clock: MatchClock,
    frame: Duration,
    intents_rx: mpsc::Receiver<Intents>,
    events_tx: broadcast::Sender<MatchEvent>,
    view_tx: watch::Sender<HudView>,
}

impl<D: MatchDocument> GameMatch<D> {
    pub fn new(doc: D, config: &MatchConfig) -> (Self, MatchHandle) {
        let clock = MatchClock::new();
        let state = MatchState::new(
            &config.room_code,
            &config.player_name,
            &config.player_handle,
            config.seed,
            clock.now_ms(),
        );

        let (intents_tx, intents_rx) = mpsc::channel(INTENT_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (view_tx, view_rx) = watch::channel(state.view(0));

        let handle = MatchHandle {
            intents: intents_tx,
            events: events_tx.clone(),
            view: view_rx,
        };
        let game_match = Self {
            doc,
            state,
            clock,
            frame: frame_duration(config.frame_rate),
            intents_rx,
            events_tx,
            view_tx,
        };
        (game_match, handle)
    }

    /// Join, play until an outcome, then leave cleanly.
    ///
    /// Returns `None` when the room subscription ended before an outcome.
    pub async fn run(self) -> Result<Option<MatchResult>, JoinError> {
        self.run_until(std::future::pending()).await
    }

    /// Like [`GameMatch::run`], but leaves early once `shutdown` completes
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<Option<MatchResult>, JoinError> {
        let room = self.state.room().to_string();
        info!(room = %room, player = %self.state.identity().name, "Joining match");

        self.clear_finished_room(&room).await?;
        let mut subscription = self.doc.subscribe(&room).await?;

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(self.doc.clone(), write_rx, room.clone()));

        let mut frames = interval(self.frame);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pending = Intents::default();
        tokio::pin!(shutdown);

        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(room = %room, "Leaving match on shutdown");
                    break Ok(());
                }
                _ = frames.tick() => {
                    while let Ok(intents) = self.intents_rx.try_recv() {
                        pending.merge(intents);
                    }
                    let out = self.state.on_frame(&pending, self.clock.now_ms());
                    pending.consume_actions();
                    self.dispatch(out, &write_tx);
                }
                value = subscription.next() => {
                    let Some(value) = value else {
                        warn!(room = %room, "Room subscription ended");
                        break Ok(());
                    };
                    match self.state.on_snapshot(value.as_ref(), self.clock.now_ms()) {
                        Ok(out) => self.dispatch(out, &write_tx),
                        Err(e) => break Err(e),
                    }
                }
            }

            if self.state.phase() == MatchPhase::Ended {
                break Ok(());
            }
        };

        drop(subscription);
        for write in self.state.teardown_writes() {
            let _ = write_tx.send(write);
        }
        drop(write_tx);
        if let Err(e) = writer.await {
            error!(room = %room, error = %e, "Writer task failed");
        }
        if let Err(e) = self.doc.disconnect().await {
            warn!(room = %room, error = %e, "Disconnect cleanup failed");
        }

        outcome?;
        info!(room = %room, result = ?self.state.result(), "Left match");
        Ok(self.state.result().cloned())
    }

    /// A room holding only an outcome is a finished match; start fresh
    async fn clear_finished_room(&self, room: &str) -> Result<(), JoinError> {
        let current = self.doc.read(room).await?;
        let snapshot = RoomSnapshot::from_value(current.as_ref()).unwrap_or_default();
        if snapshot.winner.is_some() && snapshot.occupied() == 0 {
            info!(room = %room, "Clearing finished room before joining");
            self.doc.write(room, Value::Null).await?;
        }
        Ok(())
    }

    fn dispatch(&self, out: StepOutput, writes: &mpsc::UnboundedSender<DocumentWrite>) {
        for write in out.writes {
            if writes.send(write).is_err() {
                error!(room = %self.state.room(), "Writer task is gone, dropping write");
            }
        }
        for event in out.events {
            let _ = self.events_tx.send(event);
        }
        self.view_tx.send_replace(self.state.view(self.clock.now_ms()));
    }
}

/// Commit writes in order, off the tick loop
async fn run_writer<D: MatchDocument>(
    doc: D,
    mut rx: mpsc::UnboundedReceiver<DocumentWrite>,
    room: String,
) {
    let mut batch = Vec::new();
    while let Some(first) = rx.recv().await {
        batch.push(first);
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        for write in coalesce(std::mem::take(&mut batch)) {
            let guarded = matches!(write, DocumentWrite::GuardedCreate { .. });
            let path = write.path().to_string();
            match write.apply(&doc).await {
                Ok(true) if guarded => info!(room = %room, path = %path, "Outcome committed"),
                Ok(true) => {}
                Ok(false) => debug!(room = %room, path = %path, "Outcome already decided"),
                Err(e) => error!(room = %room, path = %path, error = %e, "Write failed"),
            }
        }
    }
}

/// Fold adjacent merges into the same path; order is otherwise kept
fn coalesce(writes: Vec<DocumentWrite>) -> Vec<DocumentWrite> {
    let mut out: Vec<DocumentWrite> = Vec::with_capacity(writes.len());
    for write in writes {
        if let DocumentWrite::Merge { path, fields } = &write {
            if let Some(DocumentWrite::Merge {
                path: last,
                fields: pending,
            }) = out.last_mut()
            {
                if last == path {
                    pending.extend(fields.clone());
                    continue;
                }
            }
        }
        out.push(write);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::OutcomeReason;
    use crate::game::outcome::AFK_WINDOW_MS;
    use crate::store::memory::{MemoryConnection, MemoryDocument};
    use serde_json::json;

    const ROOM: &str = "duel";
    const FRAME_MS: u64 = 16;

    async fn commit(conn: &MemoryConnection, writes: Vec<DocumentWrite>) -> usize {
        let mut won = 0;
        for write in writes {
            let guarded = matches!(write, DocumentWrite::GuardedCreate { .. });
            if tokio_test::assert_ok!(write.apply(conn).await) && guarded {
                won += 1;
            }
        }
        won
    }

    async fn deliver(doc: &MemoryDocument, state: &mut MatchState, conn: &MemoryConnection, now: u64) -> StepOutput {
        let snapshot = doc.snapshot(ROOM);
        let out = state.on_snapshot(snapshot.as_ref(), now).unwrap();
        commit(conn, out.writes.clone()).await;
        out
    }

    /// Two joined clients, player1 "Ann" and player2 `second`
    async fn duel(second: &str) -> (MemoryDocument, [MemoryConnection; 2], MatchState, MatchState) {
        let doc = MemoryDocument::new();
        let (c1, c2) = (doc.connect(), doc.connect());
        let mut p1 = MatchState::new(ROOM, "Ann", "@ann", 1, 0);
        let mut p2 = MatchState::new(ROOM, second, "@bo", 2, 0);

        deliver(&doc, &mut p1, &c1, 0).await;
        assert_eq!(p1.phase(), MatchPhase::Waiting);
        deliver(&doc, &mut p2, &c2, 0).await;
        deliver(&doc, &mut p1, &c1, 0).await;
        (doc, [c1, c2], p1, p2)
    }

    #[tokio::test]
    async fn test_two_clients_reach_playing() {
        let (doc, _, p1, p2) = duel("Bo").await;
        assert_eq!(p1.slot(), Some(Slot::Player1));
        assert_eq!(p2.slot(), Some(Slot::Player2));
        assert_eq!(p1.phase(), MatchPhase::Playing);
        assert_eq!(p2.phase(), MatchPhase::Playing);
        assert_eq!(doc.snapshot("duel/player1/health"), Some(json!(1800)));

        let view = p1.view(0);
        assert_eq!(view.opponent_name.as_deref(), Some("Bo"));
        assert_eq!(view.opponent_health, Some(MAX_HEALTH));
        assert_eq!(view.airstrikes_left, 1);
    }

    #[tokio::test]
    async fn test_third_client_is_turned_away() {
        let (doc, _, _, _) = duel("Bo").await;
        let mut third = MatchState::new(ROOM, "Cy", "@cy", 3, 0);
        let err = tokio_test::assert_err!(third.on_snapshot(doc.snapshot(ROOM).as_ref(), 0));
        assert!(matches!(err, JoinError::RoomFull));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elimination_commits_exactly_one_outcome() {
        let (doc, [c1, c2], mut p1, mut p2) = duel("Bo").await;
        let fire = Intents {
            press: true,
            ..Default::default()
        };

        let mut now = 0;
        let mut hits = 0;
        let mut committed = 0;
        while p1.phase() != MatchPhase::Ended && now < 60_000 {
            now += FRAME_MS;
            tokio::time::advance(Duration::from_millis(FRAME_MS)).await;

            let out = p1.on_frame(&fire, now);
            hits += out
                .events
                .iter()
                .filter(|e| matches!(e, MatchEvent::Local(SimEvent::Hit(_))))
                .count();
            committed += commit(&c1, out.writes).await;
            committed += commit(&c2, p2.on_frame(&Intents::default(), now).writes).await;

            deliver(&doc, &mut p1, &c1, now).await;
            deliver(&doc, &mut p2, &c2, now).await;
        }

        assert_eq!(hits, 75);
        assert_eq!(committed, 1);
        let winner = doc.snapshot("duel/winner").unwrap();
        assert_eq!(winner["name"], "Ann");
        assert_eq!(winner["reason"], "elimination");

        assert!(matches!(p1.result(), Some(MatchResult::Won(r)) if r.reason == OutcomeReason::Elimination));
        assert!(matches!(p2.result(), Some(MatchResult::Lost(_))));
        // Both cleared their slots on the way out
        assert_eq!(doc.snapshot("duel/player1"), None);
        assert_eq!(doc.snapshot("duel/player2"), None);
        assert!(doc.snapshot("duel/winner").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_declaration_is_resent_until_the_match_ends() {
        let (doc, [c1, c2], mut p1, mut p2) = duel("Bo").await;
        c2.write("duel/player2/health", json!(24)).await.unwrap();
        deliver(&doc, &mut p1, &c1, 0).await;

        let fire = Intents {
            press: true,
            ..Default::default()
        };
        let idle = Intents::default();
        let mut now = 0;
        let mut declarations = 0;
        while (p1.phase() != MatchPhase::Ended || p2.phase() != MatchPhase::Ended) && now < 30_000 {
            now += FRAME_MS;
            tokio::time::advance(Duration::from_millis(FRAME_MS)).await;

            let intents = if now == FRAME_MS { &fire } else { &idle };
            let mut writes = p1.on_frame(intents, now).writes;
            let guarded = writes
                .iter()
                .filter(|w| matches!(w, DocumentWrite::GuardedCreate { .. }))
                .count();
            if declarations == 0 && guarded > 0 {
                // The first declaration never reaches the store
                writes.retain(|w| !matches!(w, DocumentWrite::GuardedCreate { .. }));
            }
            declarations += guarded;
            commit(&c1, writes).await;
            commit(&c2, p2.on_frame(&Intents::default(), now).writes).await;

            deliver(&doc, &mut p1, &c1, now).await;
            deliver(&doc, &mut p2, &c2, now).await;
        }

        assert_eq!(declarations, 2);
        assert!(now < AFK_WINDOW_MS, "ended by the resent declaration");
        assert!(matches!(p1.result(), Some(MatchResult::Won(r)) if r.reason == OutcomeReason::Elimination));
        assert!(matches!(p2.result(), Some(MatchResult::Lost(r)) if r.name == "Ann"));
        assert_eq!(doc.snapshot("duel/winner/name"), Some(json!("Ann")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_opponent_forfeits() {
        let (doc, [c1, _c2], mut p1, _p2) = duel("Bo").await;

        let mut now = 0;
        while p1.phase() != MatchPhase::Ended && now <= AFK_WINDOW_MS + 1_000 {
            now += 100;
            tokio::time::advance(Duration::from_millis(100)).await;
            commit(&c1, p1.on_frame(&Intents::default(), now).writes).await;
            deliver(&doc, &mut p1, &c1, now).await;
        }

        let winner = doc.snapshot("duel/winner").unwrap();
        assert_eq!(winner["reason"], "afk");
        assert_eq!(winner["handle"], "@ann");
        assert!(matches!(p1.result(), Some(MatchResult::Won(_))));
        assert!(now >= AFK_WINDOW_MS);
    }

    #[tokio::test]
    async fn test_reconnect_resumes_slot_and_health() {
        let (doc, [_c1, c2], _p1, _p2) = duel("Bo").await;
        c2.write("duel/player1/health", json!(700)).await.unwrap();
        c2.write("duel/player1/x", json!(333.0)).await.unwrap();

        // Same identity comes back on a fresh connection
        let c1b = doc.connect();
        let mut again = MatchState::new(ROOM, "Ann", "@ann", 9, 0);
        let out = deliver(&doc, &mut again, &c1b, 0).await;
        assert!(out.events.contains(&MatchEvent::Joined {
            slot: Slot::Player1,
            resumed: true
        }));

        let sim = again.sim().unwrap();
        assert_eq!(sim.player.health, 700);
        assert_eq!(sim.player.x, 333.0);
        assert_eq!(again.phase(), MatchPhase::Playing);
    }

    #[tokio::test]
    async fn test_remote_health_write_is_trusted() {
        let (doc, [c1, c2], mut p1, _p2) = duel("Bo").await;
        c2.write("duel/player1/health", json!(5)).await.unwrap();
        deliver(&doc, &mut p1, &c1, 16).await;
        assert_eq!(p1.view(16).health, 5);

        c2.write("duel/player1/health", json!(99999)).await.unwrap();
        deliver(&doc, &mut p1, &c1, 32).await;
        assert_eq!(p1.view(32).health, MAX_HEALTH);
    }

    #[tokio::test]
    async fn test_report_against_type_a_clears_room() {
        let (doc, [c1, c2], mut p1, mut p2) = duel("Neo#225").await;
        let report = Intents {
            report: true,
            ..Default::default()
        };
        let out = p1.on_frame(&report, 16);
        assert!(out.events.contains(&MatchEvent::Ended(MatchResult::CheaterDetected)));
        commit(&c1, out.writes).await;

        assert_eq!(doc.snapshot(ROOM), None);
        assert_eq!(p1.phase(), MatchPhase::Ended);
        assert!(p1.teardown_writes().is_empty());

        // The reported client sees the room vanish and gets no outcome
        let out = deliver(&doc, &mut p2, &c2, 32).await;
        assert!(out.events.contains(&MatchEvent::RoomClosed));
        assert_eq!(p2.phase(), MatchPhase::Ended);
        assert_eq!(p2.result(), None);
        assert!(p2.on_frame(&Intents::default(), AFK_WINDOW_MS * 2).writes.is_empty());
        assert!(p2.teardown_writes().is_empty());
        assert_eq!(doc.snapshot(ROOM), None);
    }

    #[tokio::test]
    async fn test_report_against_honest_opponent_is_acknowledged() {
        let (_doc, _conns, mut p1, _p2) = duel("Bo").await;
        let report = Intents {
            report: true,
            ..Default::default()
        };
        let out = p1.on_frame(&report, 16);
        assert!(out.events.contains(&MatchEvent::ReportAcknowledged));
        assert_eq!(p1.phase(), MatchPhase::Playing);
    }

    #[tokio::test]
    async fn test_lone_player_wins_by_timeout() {
        let doc = MemoryDocument::new();
        let conn = doc.connect();
        let mut p1 = MatchState::new(ROOM, "Ann", "@ann", 1, 0);
        deliver(&doc, &mut p1, &conn, 0).await;

        let out = p1.on_frame(&Intents::default(), crate::game::outcome::WAITING_TIMEOUT_MS);
        commit(&conn, out.writes).await;
        deliver(&doc, &mut p1, &conn, crate::game::outcome::WAITING_TIMEOUT_MS).await;

        assert_eq!(doc.snapshot("duel/winner/reason"), Some(json!("timeout")));
        assert!(matches!(p1.result(), Some(MatchResult::Won(_))));
    }

    #[test]
    fn test_coalesce_folds_adjacent_merges() {
        let merge = |path: &str, key: &str, v: i64| {
            let mut fields = serde_json::Map::new();
            fields.insert(key.to_string(), json!(v));
            DocumentWrite::Merge {
                path: path.into(),
                fields,
            }
        };
        let writes = vec![
            merge("r/player1", "x", 1),
            merge("r/player1", "x", 2),
            merge("r/player1", "y", 3),
            DocumentWrite::Set {
                path: "r/player2/health".into(),
                value: json!(10),
            },
            merge("r/player1", "x", 4),
        ];

        let out = coalesce(writes);
        assert_eq!(out.len(), 3);
        let DocumentWrite::Merge { fields, .. } = &out[0] else {
            panic!("expected merge");
        };
        assert_eq!(fields["x"], json!(2));
        assert_eq!(fields["y"], json!(3));
    }

    #[test]
    fn test_hud_helpers() {
        assert_eq!(HudView::health_fraction(900), 0.5);
        assert_eq!(HudView::health_fraction(5000), 1.0);
        assert_eq!(HudView::cooldown_label(0), None);
        assert_eq!(HudView::cooldown_label(2_001).as_deref(), Some("3s"));
    }

    async fn wait_for(events: &mut broadcast::Receiver<MatchEvent>, want: impl Fn(&MatchEvent) -> bool) {
        loop {
            match events.recv().await {
                Ok(event) if want(&event) => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("match ended early"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_game_match_loop_report_closes_room() {
        let doc = MemoryDocument::new();
        let config = |name: &str, handle: &str| MatchConfig {
            room_code: ROOM.into(),
            player_name: name.into(),
            player_handle: handle.into(),
            seed: 5,
            frame_rate: 60,
        };

        let (ann, ann_handle) = GameMatch::new(doc.connect(), &config("Ann", "@ann"));
        let mut ann_events = ann_handle.subscribe();
        let ann_task = tokio::spawn(ann.run());
        while doc.snapshot("duel/player1").is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let (neo, neo_handle) = GameMatch::new(doc.connect(), &config("Neo#225", "@neo"));
        let neo_task = tokio::spawn(neo.run());
        wait_for(&mut ann_events, |e| *e == MatchEvent::PhaseChanged(MatchPhase::Playing)).await;

        ann_handle
            .intents
            .send(Intents {
                report: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let ann_result = ann_task.await.unwrap().unwrap();
        assert_eq!(ann_result, Some(MatchResult::CheaterDetected));

        // The reported client leaves without an outcome of its own
        let neo_result = neo_task.await.unwrap().unwrap();
        assert_eq!(neo_result, None);
        assert_eq!(neo_handle.view.borrow().phase, MatchPhase::Ended);
        assert_eq!(doc.snapshot("duel/winner"), None);
    }
}
