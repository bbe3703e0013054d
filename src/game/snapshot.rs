//! State publishing - the local player's record in the match document

use serde::Serialize;
use serde_json::{Map, Value};

use crate::game::entity::{Bullet, ExplosionRecord, Facing, Grenade, PrivilegedMode, Weapon};
use crate::game::sim::SimulationState;
use crate::store::{path, server_timestamp, DocumentWrite};

/// Publishable fields of the local player.
///
/// Velocity never leaves the client. Health is only present in the initial
/// claim; afterwards whoever inflicts damage writes it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishedRecord<'a> {
    name: &'a str,
    handle: &'a str,
    x: f32,
    y: f32,
    dir: Facing,
    #[serde(skip_serializing_if = "Option::is_none")]
    health: Option<u32>,
    weapon: Weapon,
    bullets: &'a [Bullet],
    grenades: &'a [Grenade],
    last_grenade_time: Option<u64>,
    airstrike_used: bool,
    airstrike_target: Option<f32>,
    explosions: &'a [ExplosionRecord],
    is_hacker: bool,
    hacker_type: Option<PrivilegedMode>,
    updated_at: Value,
}

impl<'a> PublishedRecord<'a> {
    fn from_state(state: &'a SimulationState, health: Option<u32>) -> Self {
        let player = &state.player;
        Self {
            name: &player.identity.name,
            handle: &player.identity.handle,
            x: player.x,
            y: player.y,
            dir: player.facing,
            health,
            weapon: player.weapon,
            bullets: &state.bullets,
            grenades: &state.grenades,
            last_grenade_time: player.cooldowns.last_fired(Weapon::Grenade),
            airstrike_used: player.airstrike_used,
            airstrike_target: player.airstrike_target,
            explosions: &player.explosion_log,
            is_hacker: player.is_privileged(),
            hacker_type: player.identity.privileged,
            updated_at: server_timestamp(),
        }
    }
}

/// Builds the per-tick writes of the local player's slot
pub struct SnapshotBuilder {
    slot_path: String,
    /// Publishes since the slot was claimed
    published: u64,
}

impl SnapshotBuilder {
    pub fn new(state: &SimulationState) -> Self {
        Self {
            slot_path: path(&[&state.room, state.slot.key()]),
            published: 0,
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// Full record including health, written once when claiming a slot
    pub fn initial_record(state: &SimulationState) -> Result<Value, serde_json::Error> {
        serde_json::to_value(PublishedRecord::from_state(state, Some(state.player.health)))
    }

    /// Claim writes: the full record, then cleanup registration for the slot
    pub fn claim(&self, state: &SimulationState) -> Result<Vec<DocumentWrite>, serde_json::Error> {
        Ok(vec![
            DocumentWrite::Set {
                path: self.slot_path.clone(),
                value: Self::initial_record(state)?,
            },
            DocumentWrite::RegisterCleanup {
                path: self.slot_path.clone(),
            },
        ])
    }

    /// Resume writes after a reconnect: refresh the record without touching health
    pub fn resume(&mut self, state: &SimulationState) -> Result<Vec<DocumentWrite>, serde_json::Error> {
        Ok(vec![
            self.publish(state)?,
            DocumentWrite::RegisterCleanup {
                path: self.slot_path.clone(),
            },
        ])
    }

    /// Merge of every publishable field with a fresh heartbeat
    pub fn publish(&mut self, state: &SimulationState) -> Result<DocumentWrite, serde_json::Error> {
        let fields = match serde_json::to_value(PublishedRecord::from_state(state, None))? {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        self.published += 1;
        Ok(DocumentWrite::Merge {
            path: self.slot_path.clone(),
            fields,
        })
    }

    /// Explicit removal of the slot on a clean leave
    pub fn leave(&self) -> DocumentWrite {
        DocumentWrite::Remove {
            path: self.slot_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::Identity;
    use crate::store::protocol::Slot;
    use serde_json::json;

    fn state() -> SimulationState {
        SimulationState::new("arena", Slot::Player2, Identity::parse("Neo#225", "@neo"), 3)
    }

    #[test]
    fn test_publish_excludes_health_and_velocity() {
        let mut s = state();
        s.player.vx = 5.0;
        let mut builder = SnapshotBuilder::new(&s);

        let DocumentWrite::Merge { path, fields } = builder.publish(&s).unwrap() else {
            panic!("publish must merge");
        };
        assert_eq!(path, "arena/player2");
        assert!(!fields.contains_key("health"));
        assert!(!fields.contains_key("vx"));
        assert!(!fields.contains_key("vy"));
        assert_eq!(fields["name"], "Neo");
        assert_eq!(fields["hackerType"], "225");
        assert_eq!(fields["isHacker"], true);
        assert_eq!(fields["dir"], "left");
        assert_eq!(fields["updatedAt"], server_timestamp());
        assert_eq!(builder.published(), 1);
    }

    #[test]
    fn test_claim_sets_full_record_then_registers_cleanup() {
        let s = state();
        let builder = SnapshotBuilder::new(&s);
        let writes = builder.claim(&s).unwrap();

        match &writes[..] {
            [DocumentWrite::Set { path, value }, DocumentWrite::RegisterCleanup { path: cleanup }] => {
                assert_eq!(path, "arena/player2");
                assert_eq!(cleanup, "arena/player2");
                assert_eq!(value["health"], json!(1800));
                assert_eq!(value["bullets"], json!([]));
            }
            other => panic!("unexpected claim writes: {other:?}"),
        }
    }
}
