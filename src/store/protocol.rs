//! Match document wire records
//! These are the shapes both clients read and write under a room key

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::entity::{
    Bullet, ExplosionRecord, Facing, Grenade, OutcomeRecord, PrivilegedMode, Weapon, MAX_HEALTH,
};

/// One of the two participant slots in a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Player1,
    Player2,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Player1, Slot::Player2];

    /// Field name under the room key
    pub fn key(self) -> &'static str {
        match self {
            Slot::Player1 => "player1",
            Slot::Player2 => "player2",
        }
    }

    pub fn other(self) -> Slot {
        match self {
            Slot::Player1 => Slot::Player2,
            Slot::Player2 => Slot::Player1,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Field holding the outcome record
pub const WINNER_KEY: &str = "winner";

fn default_health() -> f64 {
    MAX_HEALTH as f64
}

/// Published per-player record.
///
/// Every field is defaulted: the store drops empty arrays, and an attacker's
/// health write can land on a slot that was just vacated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub dir: Facing,
    /// Settled health; written by whoever inflicted the damage
    #[serde(default = "default_health")]
    pub health: f64,
    #[serde(default)]
    pub weapon: Weapon,
    #[serde(default)]
    pub bullets: Vec<Bullet>,
    #[serde(default)]
    pub grenades: Vec<Grenade>,
    #[serde(default)]
    pub last_grenade_time: Option<u64>,
    #[serde(default)]
    pub airstrike_used: bool,
    #[serde(default)]
    pub airstrike_target: Option<f32>,
    #[serde(default)]
    pub explosions: Vec<ExplosionRecord>,
    #[serde(default)]
    pub is_hacker: bool,
    #[serde(default)]
    pub hacker_type: Option<PrivilegedMode>,
    /// Server-assigned heartbeat
    #[serde(default)]
    pub updated_at: Option<u64>,
}

impl PlayerRecord {
    /// A slot only counts as occupied once it carries an identity
    pub fn is_occupied(&self) -> bool {
        !self.name.is_empty()
    }

    /// Health as an integer in [0, MAX_HEALTH]
    pub fn settled_health(&self) -> u32 {
        if self.health.is_nan() {
            return 0;
        }
        self.health.clamp(0.0, MAX_HEALTH as f64).round() as u32
    }
}

/// Full value of a room
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RoomSnapshot {
    #[serde(default)]
    pub player1: Option<PlayerRecord>,
    #[serde(default)]
    pub player2: Option<PlayerRecord>,
    #[serde(default)]
    pub winner: Option<OutcomeRecord>,
}

impl RoomSnapshot {
    /// Parse a subscription payload; `None` (room absent) is an empty room
    pub fn from_value(value: Option<&Value>) -> Result<Self, serde_json::Error> {
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value) => Self::deserialize(value),
        }
    }

    /// Occupied record in `slot`
    pub fn slot(&self, slot: Slot) -> Option<&PlayerRecord> {
        let record = match slot {
            Slot::Player1 => self.player1.as_ref(),
            Slot::Player2 => self.player2.as_ref(),
        };
        record.filter(|r| r.is_occupied())
    }

    pub fn occupied(&self) -> usize {
        Slot::ALL.iter().filter(|s| self.slot(**s).is_some()).count()
    }
}
