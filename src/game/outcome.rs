//! Outcome arbitration: match phases, watchdogs and the guarded winner write

use serde_json::json;
use tracing::{info, warn};

use crate::game::entity::{Identity, OutcomeReason, OutcomeRecord, PrivilegedMode};
use crate::store::protocol::{PlayerRecord, WINNER_KEY};
use crate::store::{path, server_timestamp, DocumentWrite};

/// How long a lone player waits for an opponent before winning by timeout
pub const WAITING_TIMEOUT_MS: u64 = 180_000;
/// How long the opponent's heartbeat may stand still before they forfeit
pub const AFK_WINDOW_MS: u64 = 15_000;
/// How long an issued declaration may go unobserved before it is sent again
pub const DECLARE_RETRY_MS: u64 = 1_000;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPhase {
    /// Fewer than two slots occupied
    #[default]
    Waiting,
    /// Both slots occupied
    Playing,
    /// An outcome was observed, a report ended the match locally, or the room was closed
    Ended,
}

/// Result of a finished match, from this client's point of view
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Won(OutcomeRecord),
    Lost(OutcomeRecord),
    /// A report against a type A opponent ended the match locally
    CheaterDetected,
}

/// What a report did
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// Match ended locally; the write clears the room
    CheaterDetected(DocumentWrite),
    Acknowledged,
    /// Nobody to report
    Ignored,
}

/// Cancellable deadline on the match clock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watchdog {
    deadline: Option<u64>,
}

impl Watchdog {
    pub fn arm(&mut self, now_ms: u64, window_ms: u64) {
        self.deadline = Some(now_ms + window_ms);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// True once the deadline passed; a fired watchdog disarms itself
    pub fn fired(&mut self, now_ms: u64) -> bool {
        match self.deadline {
            Some(deadline) if now_ms >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.deadline.map(|d| d.saturating_sub(now_ms))
    }
}

/// The race-safe winner declaration protocol plus the phase machine
pub struct OutcomeArbiter {
    identity: Identity,
    room: String,
    phase: MatchPhase,
    result: Option<MatchResult>,
    /// The guarded write issued from this client, until an outcome shows up
    declared: Option<DocumentWrite>,
    resend: Watchdog,
    waiting_timeout: Watchdog,
    afk: Watchdog,
}

impl OutcomeArbiter {
    pub fn new(identity: Identity, room: &str, now_ms: u64) -> Self {
        let mut waiting_timeout = Watchdog::default();
        waiting_timeout.arm(now_ms, WAITING_TIMEOUT_MS);
        Self {
            identity,
            room: room.to_string(),
            phase: MatchPhase::Waiting,
            result: None,
            declared: None,
            resend: Watchdog::default(),
            waiting_timeout,
            afk: Watchdog::default(),
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn result(&self) -> Option<&MatchResult> {
        self.result.as_ref()
    }

    pub fn afk_remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.afk.remaining_ms(now_ms)
    }

    /// WAITING becomes PLAYING the instant both slots are occupied
    pub fn observe_slots(&mut self, occupied: usize, now_ms: u64) -> Option<MatchPhase> {
        if self.phase != MatchPhase::Waiting || occupied < 2 {
            return None;
        }
        self.phase = MatchPhase::Playing;
        self.waiting_timeout.cancel();
        self.afk.arm(now_ms, AFK_WINDOW_MS);
        info!(room = %self.room, "Both slots occupied, match playing");
        Some(MatchPhase::Playing)
    }

    /// The opponent's heartbeat advanced
    pub fn heartbeat(&mut self, now_ms: u64) {
        if self.phase == MatchPhase::Playing {
            self.afk.arm(now_ms, AFK_WINDOW_MS);
        }
    }

    /// An outcome record appeared; ends the match whoever wrote it
    pub fn observe_outcome(&mut self, record: &OutcomeRecord) -> Option<MatchResult> {
        if self.phase == MatchPhase::Ended {
            return None;
        }
        self.end();

        let result = if self.identity.matches(&record.name, &record.handle) {
            MatchResult::Won(record.clone())
        } else {
            MatchResult::Lost(record.clone())
        };
        info!(
            room = %self.room,
            winner = %record.name,
            reason = ?record.reason,
            "Match outcome observed"
        );
        self.result = Some(result.clone());
        Some(result)
    }

    /// Guarded write naming `name`/`handle` the winner.
    ///
    /// Every declaration path funnels through here; at most one declaration
    /// leaves this client and the store decides between racing clients.
    /// [`OutcomeArbiter::poll_watchdogs`] resends it while no outcome is seen.
    pub fn declare(&mut self, name: &str, handle: &str, reason: OutcomeReason) -> Option<DocumentWrite> {
        if self.declared.is_some() || self.phase == MatchPhase::Ended {
            return None;
        }
        info!(room = %self.room, winner = %name, reason = ?reason, "Declaring winner");

        let write = DocumentWrite::GuardedCreate {
            path: path(&[&self.room, WINNER_KEY]),
            value: json!({
                "name": name,
                "handle": handle,
                "reason": reason,
                "declaredAt": server_timestamp(),
            }),
        };
        self.declared = Some(write.clone());
        Some(write)
    }

    /// Declare ourselves the winner
    pub fn declare_self(&mut self, reason: OutcomeReason) -> Option<DocumentWrite> {
        let Identity { name, handle, .. } = self.identity.clone();
        self.declare(&name, &handle, reason)
    }

    /// Check the watchdog that belongs to the current phase, or resend an
    /// outstanding declaration
    pub fn poll_watchdogs(&mut self, now_ms: u64) -> Option<DocumentWrite> {
        if let Some(write) = &self.declared {
            if !self.resend.is_armed() {
                self.resend.arm(now_ms, DECLARE_RETRY_MS);
                return None;
            }
            if !self.resend.fired(now_ms) {
                return None;
            }
            warn!(room = %self.room, "No outcome observed yet, resending declaration");
            self.resend.arm(now_ms, DECLARE_RETRY_MS);
            return Some(write.clone());
        }

        match self.phase {
            MatchPhase::Waiting if self.waiting_timeout.fired(now_ms) => {
                info!(room = %self.room, "No opponent joined in time");
                self.declare_self(OutcomeReason::Timeout)
            }
            MatchPhase::Playing if self.afk.fired(now_ms) => {
                info!(room = %self.room, "Opponent heartbeat went stale");
                self.declare_self(OutcomeReason::Afk)
            }
            _ => None,
        }
    }

    /// Manual report. Only a type A opponent ends the match.
    pub fn report(&mut self, opponent: Option<&PlayerRecord>) -> ReportOutcome {
        let Some(opponent) = opponent else {
            return ReportOutcome::Ignored;
        };
        if self.phase == MatchPhase::Ended {
            return ReportOutcome::Ignored;
        }

        if opponent.hacker_type == Some(PrivilegedMode::TypeA) {
            info!(room = %self.room, opponent = %opponent.name, "Reported opponent confirmed cheating");
            self.end();
            self.result = Some(MatchResult::CheaterDetected);
            ReportOutcome::CheaterDetected(DocumentWrite::Remove {
                path: self.room.clone(),
            })
        } else {
            ReportOutcome::Acknowledged
        }
    }

    /// The room vanished under a playing match, as after a report cleared it.
    /// Ends the match with no outcome.
    pub fn room_closed(&mut self) -> bool {
        if self.phase != MatchPhase::Playing {
            return false;
        }
        info!(room = %self.room, "Room closed mid-match");
        self.end();
        true
    }

    fn end(&mut self) {
        self.phase = MatchPhase::Ended;
        self.declared = None;
        self.resend.cancel();
        self.waiting_timeout.cancel();
        self.afk.cancel();
    }
}
