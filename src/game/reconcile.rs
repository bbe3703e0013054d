//! Remote state reconciliation
//!
//! Every snapshot is the opponent's full current state. Discrete events are
//! inferred by diffing it against the previous one.

use crate::game::entity::{ExplosionRecord, Identity, Weapon};
use crate::store::protocol::{PlayerRecord, RoomSnapshot, Slot};

/// Event inferred from two consecutive opponent records
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Joined { name: String, handle: String },
    Left,
    Fired { weapon: Weapon },
    AirstrikeDesignated { target_x: f32 },
    ExplosionReplay(ExplosionRecord),
}

/// Derived events between `prev` and `next`.
///
/// A newly seen opponent only yields `Joined`: whatever is already in its
/// explosion log or airstrike target predates us and is not replayed.
pub fn diff(prev: Option<&PlayerRecord>, next: Option<&PlayerRecord>) -> Vec<RemoteEvent> {
    let (prev, next) = match (prev, next) {
        (None, None) => return Vec::new(),
        (Some(_), None) => return vec![RemoteEvent::Left],
        (None, Some(next)) => return vec![joined(next)],
        (Some(prev), Some(next)) => (prev, next),
    };

    if prev.name != next.name || prev.handle != next.handle {
        return vec![RemoteEvent::Left, joined(next)];
    }

    let mut events = Vec::new();
    if next.bullets.len() > prev.bullets.len() {
        events.push(RemoteEvent::Fired {
            weapon: next.weapon,
        });
    }
    if let (None, Some(target_x)) = (prev.airstrike_target, next.airstrike_target) {
        events.push(RemoteEvent::AirstrikeDesignated { target_x });
    }
    events.extend(
        next.explosions
            .iter()
            .skip(prev.explosions.len())
            .copied()
            .map(RemoteEvent::ExplosionReplay),
    );
    events
}

fn joined(record: &PlayerRecord) -> RemoteEvent {
    RemoteEvent::Joined {
        name: record.name.clone(),
        handle: record.handle.clone(),
    }
}

/// Outcome of the first role assignment
#[derive(Debug, Clone, PartialEq)]
pub enum RoleAssignment {
    Claimed(Slot),
    /// Reconnection: the slot already carries our identity
    Resumed(Slot, PlayerRecord),
    Full,
}

/// Resume a slot carrying our identity, else claim the first free one
pub fn assign_role(snapshot: &RoomSnapshot, identity: &Identity) -> RoleAssignment {
    for slot in Slot::ALL {
        if let Some(record) = snapshot.slot(slot) {
            if identity.matches(&record.name, &record.handle) {
                return RoleAssignment::Resumed(slot, record.clone());
            }
        }
    }

    Slot::ALL
        .into_iter()
        .find(|slot| snapshot.slot(*slot).is_none())
        .map(RoleAssignment::Claimed)
        .unwrap_or(RoleAssignment::Full)
}

/// What one snapshot says about the room
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub opponent: Option<PlayerRecord>,
    /// Our own health as settled in the document
    pub own_health: Option<u32>,
    pub events: Vec<RemoteEvent>,
    /// The opponent's heartbeat moved since the last snapshot
    pub heartbeat_advanced: bool,
}

/// Keeps the previous opponent record for diffing
pub struct RemoteReconciler {
    slot: Slot,
    last_opponent: Option<PlayerRecord>,
    last_heartbeat: Option<u64>,
}

impl RemoteReconciler {
    pub fn new(slot: Slot) -> Self {
        Self {
            slot,
            last_opponent: None,
            last_heartbeat: None,
        }
    }

    pub fn observe(&mut self, snapshot: &RoomSnapshot) -> Observation {
        let opponent = snapshot.slot(self.slot.other()).cloned();
        let events = diff(self.last_opponent.as_ref(), opponent.as_ref());

        let heartbeat = opponent.as_ref().and_then(|o| o.updated_at);
        let heartbeat_advanced = match (self.last_heartbeat, heartbeat) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(last), Some(now)) => now > last,
        };
        if opponent.is_none() {
            self.last_heartbeat = None;
        } else if heartbeat_advanced {
            self.last_heartbeat = heartbeat;
        }

        // Health may sit in a nameless record if an attacker wrote it after we left
        let own_health = self
            .own_record(snapshot)
            .filter(|r| !r.health.is_nan())
            .map(PlayerRecord::settled_health);

        self.last_opponent = opponent.clone();
        Observation {
            opponent,
            own_health,
            events,
            heartbeat_advanced,
        }
    }

    fn own_record<'a>(&self, snapshot: &'a RoomSnapshot) -> Option<&'a PlayerRecord> {
        match self.slot {
            Slot::Player1 => snapshot.player1.as_ref(),
            Slot::Player2 => snapshot.player2.as_ref(),
        }
    }
}
