//! Headless duel runner: bots drive one or two clients through a match

mod state;

pub use state::{AppState, StoreBackend};

use std::future::Future;
use std::time::Duration;

use futures::future::{self, FutureExt};
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::game::bot::BotDriver;
use crate::game::outcome::{MatchPhase, MatchResult};
use crate::game::r#match::{MatchConfig, MatchEvent};
use crate::game::{GameMatch, JoinError, MatchHandle};
use crate::store::protocol::RoomSnapshot;
use crate::store::{sanitize_room_key, MatchDocument, MemoryDocument};
use crate::util::time::{frame_duration, MatchClock};

/// How long the local duel waits for the first client's claim
const CLAIM_WAIT: Duration = Duration::from_secs(5);
const CLAIM_POLL: Duration = Duration::from_millis(10);

/// Run the configured duel until it ends or `shutdown` completes
pub async fn run(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), JoinError> {
    let shutdown = shutdown.shared();
    match &state.backend {
        StoreBackend::Memory(doc) => local_duel(&state, doc, shutdown).await,
        StoreBackend::Rtdb(doc) => {
            let result = play(doc.clone(), state.match_config(), shutdown).await?;
            report(&state.config.player_name, result.as_ref());
            Ok(())
        }
    }
}

/// Two bots on one in-process document
async fn local_duel(
    state: &AppState,
    doc: &MemoryDocument,
    shutdown: impl Future<Output = ()> + Clone + Send + 'static,
) -> Result<(), JoinError> {
    let first = state.match_config();
    let second = MatchConfig {
        player_name: "Rival".to_string(),
        player_handle: "@rival".to_string(),
        seed: first.seed.wrapping_add(1),
        ..first.clone()
    };

    let first_task = tokio::spawn(play(doc.connect(), first.clone(), shutdown.clone()));
    wait_for_claim(doc, &first.room_code).await;
    let second_task = tokio::spawn(play(doc.connect(), second.clone(), shutdown));

    let (first_result, second_result) = future::join(first_task, second_task).await;
    for (config, joined) in [(&first, first_result), (&second, second_result)] {
        match joined {
            Ok(Ok(result)) => report(&config.player_name, result.as_ref()),
            Ok(Err(e)) => warn!(player = %config.player_name, error = %e, "Client could not play"),
            Err(e) => warn!(player = %config.player_name, error = %e, "Client task failed"),
        }
    }
    Ok(())
}

/// The second client must not race the first for the same empty slot
async fn wait_for_claim(doc: &MemoryDocument, room_code: &str) {
    let room = sanitize_room_key(room_code);
    let claimed = async {
        loop {
            let occupied = RoomSnapshot::from_value(doc.snapshot(&room).as_ref())
                .map(|s| s.occupied())
                .unwrap_or(0);
            if occupied > 0 {
                return;
            }
            sleep(CLAIM_POLL).await;
        }
    };
    if tokio::time::timeout(CLAIM_WAIT, claimed).await.is_err() {
        warn!(room = %room, "First client has not claimed a slot yet, starting the second anyway");
    }
}

/// One bot-driven client
async fn play<D: MatchDocument>(
    doc: D,
    config: MatchConfig,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<Option<MatchResult>, JoinError> {
    let (game_match, handle) = GameMatch::new(doc, &config);
    let events = handle.subscribe();

    let bot = tokio::spawn(drive_bot(handle.clone(), config.seed, frame_duration(config.frame_rate)));
    let logger = tokio::spawn(log_events(config.player_name.clone(), events));

    let result = game_match.run_until(shutdown).await;
    bot.abort();
    logger.abort();
    result
}

async fn drive_bot(handle: MatchHandle, seed: u64, frame: Duration) {
    let mut bot = BotDriver::new(seed);
    let clock = MatchClock::new();
    let mut frames = interval(frame);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        frames.tick().await;
        let view = handle.view.borrow().clone();
        if view.phase == MatchPhase::Ended {
            break;
        }
        if handle.intents.send(bot.next_intents(&view, clock.now_ms())).await.is_err() {
            break;
        }
    }
}

async fn log_events(player: String, mut events: broadcast::Receiver<MatchEvent>) {
    loop {
        match events.recv().await {
            Ok(event @ (MatchEvent::Local(_) | MatchEvent::OpponentFired { .. })) => {
                debug!(player = %player, event = ?event, "Match event")
            }
            Ok(event) => info!(player = %player, event = ?event, "Match event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(player = %player, skipped, "Event log lagging")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn report(player: &str, result: Option<&MatchResult>) {
    match result {
        Some(MatchResult::Won(record)) => {
            info!(player = %player, reason = ?record.reason, "Match won")
        }
        Some(MatchResult::Lost(record)) => {
            info!(player = %player, winner = %record.name, reason = ?record.reason, "Match lost")
        }
        Some(MatchResult::CheaterDetected) => info!(player = %player, "Opponent removed for cheating"),
        None => info!(player = %player, "Left match without an outcome"),
    }
}
