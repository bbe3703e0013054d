//! Combat system - weapons, cooldowns, damage

use super::entity::{Weapon, MAX_HEALTH};

/// Bullet damage used while privileged mode is active
pub const PRIVILEGED_BULLET_DAMAGE: u32 = 200;
/// Bullets per trigger pull while privileged mode is active
pub const PRIVILEGED_BULLETS_PER_SHOT: usize = 20;

/// Full charge time for a grenade throw
pub const GRENADE_CHARGE_MS: u64 = 1500;
/// Fuse length of a freshly thrown grenade
pub const GRENADE_FUSE_TICKS: u32 = 90;
/// Delay between airstrike designation and aircraft spawn
pub const AIRSTRIKE_DELAY_MS: u64 = 3000;
pub const AIRSTRIKE_BOMBS: usize = 5;
/// Lateral spread of released bombs around the aircraft centre
pub const BOMB_SPREAD: f32 = 30.0;
/// Share of the aircraft's horizontal speed inherited by its bombs
pub const BOMB_INHERITED_VELOCITY: f32 = 0.3;
/// Render lifetime of an explosion
pub const EXPLOSION_TTL_TICKS: u32 = 30;

/// Per-weapon constants
#[derive(Debug, Clone, Copy)]
pub struct WeaponStats {
    /// Damage per bullet hit (0 for explosives)
    pub damage: u32,
    /// Minimum interval between shots
    pub cooldown_ms: u64,
    /// Explosion radius (0 for bullets)
    pub blast_radius: f32,
    /// Damage at the centre of the explosion
    pub max_blast_damage: u32,
}

impl WeaponStats {
    pub fn for_weapon(weapon: Weapon) -> Self {
        match weapon {
            Weapon::Rifle => Self {
                damage: 24,
                cooldown_ms: 300,
                blast_radius: 0.0,
                max_blast_damage: 0,
            },
            Weapon::Sniper => Self {
                damage: 300,
                cooldown_ms: 3000,
                blast_radius: 0.0,
                max_blast_damage: 0,
            },
            Weapon::Grenade => Self {
                damage: 0,
                cooldown_ms: 4000,
                blast_radius: 120.0,
                max_blast_damage: 450,
            },
            // Single use, gated by the airstrike-used flag instead of a cooldown
            Weapon::Airstrike => Self {
                damage: 0,
                cooldown_ms: 0,
                blast_radius: 90.0,
                max_blast_damage: 250,
            },
        }
    }
}

/// Combat rules shared by every damage path
pub struct CombatSystem;

impl CombatSystem {
    /// Check the weapon's minimum inter-fire interval
    pub fn can_fire(last_fired: Option<u64>, now_ms: u64, stats: &WeaponStats) -> bool {
        match last_fired {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= stats.cooldown_ms,
        }
    }

    /// Milliseconds until the weapon can fire again
    pub fn cooldown_remaining(last_fired: Option<u64>, now_ms: u64, stats: &WeaponStats) -> u64 {
        match last_fired {
            None => 0,
            Some(last) => stats.cooldown_ms.saturating_sub(now_ms.saturating_sub(last)),
        }
    }

    /// Damage of a single bullet hit
    pub fn bullet_damage(weapon: Weapon, privileged: bool) -> u32 {
        if privileged {
            PRIVILEGED_BULLET_DAMAGE
        } else {
            WeaponStats::for_weapon(weapon).damage
        }
    }

    pub fn bullets_per_shot(privileged: bool) -> usize {
        if privileged {
            PRIVILEGED_BULLETS_PER_SHOT
        } else {
            1
        }
    }

    /// Apply damage to health, returns (new_health, is_dead).
    ///
    /// Returns `None` when the computation is not a number so the caller can
    /// skip the write instead of corrupting the stored health.
    pub fn apply_damage(current_health: f64, damage: f64) -> Option<(u32, bool)> {
        let new_health = current_health - damage;
        if new_health.is_nan() {
            return None;
        }
        let new_health = new_health.clamp(0.0, MAX_HEALTH as f64).round() as u32;
        Some((new_health, new_health == 0))
    }

    /// Linear falloff damage: full at the centre, zero at or beyond the radius
    pub fn explosion_damage(distance: f32, radius: f32, max_damage: u32) -> u32 {
        if radius <= 0.0 || distance.is_nan() || distance >= radius {
            return 0;
        }
        (max_damage as f32 * (1.0 - distance / radius)).round() as u32
    }
}

/// A bullet that struck the opponent this tick
#[derive(Debug, Clone, PartialEq)]
pub struct HitResult {
    pub bullet_id: String,
    pub damage: u32,
    pub opponent_health: u32,
    pub lethal: bool,
}
