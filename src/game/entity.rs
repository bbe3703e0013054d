//! Entity state model - players, projectiles, explosives and the match outcome

use serde::{Deserialize, Serialize};

use super::physics::{
    ARENA_WIDTH, BULLET_HEIGHT, BULLET_WIDTH, GROUND_Y, PLAYER_HEIGHT, PLAYER_WIDTH,
};
use crate::store::protocol::Slot;

/// Starting (and maximum) health of every player
pub const MAX_HEALTH: u32 = 1800;

/// Horizontal spawn inset from the arena edge
const SPAWN_INSET: f32 = 100.0;

/// Which way a player is facing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    Left,
    #[default]
    Right,
}

impl Facing {
    /// Direction sign along the x axis
    pub fn sign(self) -> f32 {
        match self {
            Facing::Left => -1.0,
            Facing::Right => 1.0,
        }
    }
}

/// Equippable weapons. Wire names follow the browser client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Weapon {
    /// Rapid-fire rifle
    #[default]
    #[serde(rename = "ak")]
    Rifle,
    /// Slow, high-damage rifle
    #[serde(rename = "awm")]
    Sniper,
    /// Charge-and-release lobbed explosive
    #[serde(rename = "grenade")]
    Grenade,
    /// Single-use delayed bombing run
    #[serde(rename = "airstrike")]
    Airstrike,
}

/// Privileged ("hacker") mode variants, selected by a marker in the display name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrivilegedMode {
    /// Blatant variant: also doubles movement speed and jump power
    #[serde(rename = "225")]
    TypeA,
    /// Quiet variant: bullet multiplier and damage override only
    #[serde(rename = "226")]
    TypeB,
}

impl PrivilegedMode {
    const ALL: [PrivilegedMode; 2] = [PrivilegedMode::TypeA, PrivilegedMode::TypeB];

    /// Name marker that enables this variant
    pub fn marker(self) -> &'static str {
        match self {
            PrivilegedMode::TypeA => "#225",
            PrivilegedMode::TypeB => "#226",
        }
    }

    pub fn doubles_movement(self) -> bool {
        matches!(self, PrivilegedMode::TypeA)
    }
}

/// Stable player identity as shown to the opponent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Display name with any privileged marker stripped
    pub name: String,
    pub handle: String,
    pub privileged: Option<PrivilegedMode>,
}

impl Identity {
    /// Derive the identity from the name typed at join time.
    ///
    /// The first privileged marker found selects the variant and is removed
    /// from the display name.
    pub fn parse(raw_name: &str, handle: &str) -> Self {
        let privileged = PrivilegedMode::ALL
            .into_iter()
            .find(|mode| raw_name.contains(mode.marker()));

        let name = match privileged {
            Some(mode) => raw_name.replace(mode.marker(), "").trim().to_string(),
            None => raw_name.trim().to_string(),
        };

        Self {
            name,
            handle: handle.trim().to_string(),
            privileged,
        }
    }

    /// True when a published record belongs to this identity
    pub fn matches(&self, name: &str, handle: &str) -> bool {
        self.name == name && self.handle == handle
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Aabb {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn player(x: f32, y: f32) -> Self {
        Self::new(x, y, PLAYER_WIDTH, PLAYER_HEIGHT)
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.x < other.x + other.w
            && self.x + self.w > other.x
            && self.y < other.y + other.h
            && self.y + self.h > other.y
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

/// Last time each weapon was fired (match clock milliseconds)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cooldowns {
    rifle: Option<u64>,
    sniper: Option<u64>,
    grenade: Option<u64>,
}

impl Cooldowns {
    pub fn last_fired(&self, weapon: Weapon) -> Option<u64> {
        match weapon {
            Weapon::Rifle => self.rifle,
            Weapon::Sniper => self.sniper,
            Weapon::Grenade => self.grenade,
            Weapon::Airstrike => None,
        }
    }

    pub fn mark_fired(&mut self, weapon: Weapon, now_ms: u64) {
        match weapon {
            Weapon::Rifle => self.rifle = Some(now_ms),
            Weapon::Sniper => self.sniper = Some(now_ms),
            Weapon::Grenade => self.grenade = Some(now_ms),
            Weapon::Airstrike => {}
        }
    }
}

/// The locally controlled player (authoritative on this client)
#[derive(Debug, Clone)]
pub struct PlayerEntity {
    pub identity: Identity,

    // Position and movement
    pub x: f32,
    pub y: f32,
    /// Never published
    pub vx: f32,
    /// Never published
    pub vy: f32,
    pub facing: Facing,

    // Combat
    pub health: u32,
    pub weapon: Weapon,
    pub cooldowns: Cooldowns,
    pub airstrike_used: bool,
    pub airstrike_target: Option<f32>,
    /// Explosions this client resolved, replayed visually by the peer
    pub explosion_log: Vec<ExplosionRecord>,
}

impl PlayerEntity {
    /// Fresh player at the spawn point of `slot`
    pub fn spawn(identity: Identity, slot: Slot) -> Self {
        let (x, facing) = match slot {
            Slot::Player1 => (SPAWN_INSET, Facing::Right),
            Slot::Player2 => (ARENA_WIDTH - SPAWN_INSET - PLAYER_WIDTH, Facing::Left),
        };

        Self {
            identity,
            x,
            y: GROUND_Y,
            vx: 0.0,
            vy: 0.0,
            facing,
            health: MAX_HEALTH,
            weapon: Weapon::Rifle,
            cooldowns: Cooldowns::default(),
            airstrike_used: false,
            airstrike_target: None,
            explosion_log: Vec::new(),
        }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::player(self.x, self.y)
    }

    pub fn is_grounded(&self) -> bool {
        self.y >= GROUND_Y
    }

    pub fn is_privileged(&self) -> bool {
        self.identity.privileged.is_some()
    }
}

/// Bullet in flight, owned by the client that fired it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bullet {
    pub id: String,
    pub x: f32,
    pub y: f32,
    /// +1.0 travelling right, -1.0 travelling left
    pub dir: f32,
    pub weapon: Weapon,
}

impl Bullet {
    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.x, self.y, BULLET_WIDTH, BULLET_HEIGHT)
    }
}

/// Lobbed grenade with a tick fuse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grenade {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    /// Ticks left before detonation
    pub fuse: u32,
}

/// Who computes damage for an explosive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Spawned by this client; damage is resolved here
    Local,
    /// Replay of the opponent's explosive; visuals only
    Remote,
}

/// Bombing aircraft crossing the arena
#[derive(Debug, Clone, PartialEq)]
pub struct Aircraft {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub target_x: f32,
    /// Bombs already released
    pub spent: bool,
    pub owner: Owner,
}

/// Falling bomb released by an aircraft
#[derive(Debug, Clone, PartialEq)]
pub struct Bomb {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub owner: Owner,
}

/// Transient explosion effect (render countdown only)
#[derive(Debug, Clone, PartialEq)]
pub struct Explosion {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    /// Render ticks left
    pub ttl: u32,
    pub owner: Owner,
}

/// Immutable explosion entry published so the peer can replay the effect
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExplosionRecord {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

/// Why a match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    Elimination,
    Afk,
    Timeout,
}

/// Terminal match result, written at most once per room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    /// Winner display name
    pub name: String,
    #[serde(default)]
    pub handle: String,
    pub reason: OutcomeReason,
    /// Server commit time
    #[serde(default)]
    pub declared_at: Option<u64>,
}

/// Spawn position helper for a bullet leaving `player`'s muzzle
pub fn muzzle_x(player: &PlayerEntity) -> f32 {
    match player.facing {
        Facing::Right => player.x + PLAYER_WIDTH,
        Facing::Left => player.x - BULLET_WIDTH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_strips_privileged_marker() {
        let id = Identity::parse("Neo#225", "@neo");
        assert_eq!(id.name, "Neo");
        assert_eq!(id.privileged, Some(PrivilegedMode::TypeA));

        let id = Identity::parse("#226Trinity", "@t");
        assert_eq!(id.name, "Trinity");
        assert_eq!(id.privileged, Some(PrivilegedMode::TypeB));

        let id = Identity::parse("  Morpheus ", " @m ");
        assert_eq!(id.name, "Morpheus");
        assert_eq!(id.handle, "@m");
        assert_eq!(id.privileged, None);
    }

    #[test]
    fn test_spawn_points_face_each_other() {
        let p1 = PlayerEntity::spawn(Identity::parse("a", "@a"), Slot::Player1);
        let p2 = PlayerEntity::spawn(Identity::parse("b", "@b"), Slot::Player2);
        assert_eq!(p1.facing, Facing::Right);
        assert_eq!(p2.facing, Facing::Left);
        assert!(p1.x < p2.x);
        assert!(p1.is_grounded() && p2.is_grounded());
        assert_eq!(p1.health, MAX_HEALTH);
    }

    #[test]
    fn test_weapon_wire_names() {
        assert_eq!(serde_json::to_string(&Weapon::Rifle).unwrap(), "\"ak\"");
        assert_eq!(serde_json::to_string(&Weapon::Sniper).unwrap(), "\"awm\"");
        let mode: PrivilegedMode = serde_json::from_str("\"225\"").unwrap();
        assert_eq!(mode, PrivilegedMode::TypeA);
    }

    #[test]
    fn test_aabb_overlap_is_strict() {
        let a = Aabb::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.overlaps(&Aabb::new(9.0, 9.0, 4.0, 4.0)));
        // Touching edges do not count
        assert!(!a.overlaps(&Aabb::new(10.0, 0.0, 4.0, 4.0)));
    }
}
