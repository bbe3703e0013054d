//! Arena motion model - platformer kinematics and ballistic explosives
//!
//! All quantities are per simulation tick (one tick per rendered frame).

use super::entity::{Aircraft, Bomb, Facing, Grenade, PlayerEntity, PrivilegedMode};

pub const ARENA_WIDTH: f32 = 800.0;
pub const ARENA_HEIGHT: f32 = 450.0;
pub const PLAYER_WIDTH: f32 = 30.0;
pub const PLAYER_HEIGHT: f32 = 60.0;
/// Resting y of a player's top edge
pub const GROUND_Y: f32 = ARENA_HEIGHT - PLAYER_HEIGHT - 10.0;
/// Floor surface that explosives land on
pub const FLOOR_Y: f32 = GROUND_Y + PLAYER_HEIGHT;

pub const GRAVITY: f32 = 2.0;
pub const JUMP_POWER: f32 = -25.0;
pub const MOVE_SPEED: f32 = 5.0;

pub const BULLET_SPEED: f32 = 10.0;
pub const BULLET_WIDTH: f32 = 8.0;
pub const BULLET_HEIGHT: f32 = 4.0;

pub const GRENADE_SIZE: f32 = 10.0;
const GRENADE_GRAVITY: f32 = GRAVITY * 0.5;
const GRENADE_BOUNCE: f32 = 0.5;
const GRENADE_FRICTION: f32 = 0.7;

pub const AIRCRAFT_WIDTH: f32 = 60.0;
pub const AIRCRAFT_HEIGHT: f32 = 20.0;
pub const AIRCRAFT_Y: f32 = 40.0;
pub const AIRCRAFT_SPEED: f32 = 6.0;
/// Distance past the arena edge before an aircraft is removed
pub const AIRCRAFT_MARGIN: f32 = 200.0;

pub const BOMB_SIZE: f32 = 8.0;

/// Movement constants per privileged mode
#[derive(Debug, Clone, Copy)]
pub struct MovementStats {
    pub move_speed: f32,
    pub jump_power: f32,
}

impl MovementStats {
    pub fn for_mode(mode: Option<PrivilegedMode>) -> Self {
        match mode {
            Some(mode) if mode.doubles_movement() => Self {
                move_speed: MOVE_SPEED * 2.0,
                jump_power: JUMP_POWER * 2.0,
            },
            _ => Self {
                move_speed: MOVE_SPEED,
                jump_power: JUMP_POWER,
            },
        }
    }
}

/// Result of advancing an aircraft one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AircraftStep {
    /// Crossed its target this tick and should drop its bombs
    pub release: bool,
    /// Left the extended margin and should be removed
    pub gone: bool,
}

/// Physics system for the local simulation step
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Advance the player's kinematics for one tick.
    ///
    /// `move_dir` is -1, 0 or +1 from the held movement intents. Jumping only
    /// takes effect while grounded.
    pub fn step_player(player: &mut PlayerEntity, move_dir: f32, jump: bool, stats: &MovementStats) {
        let move_dir = move_dir.clamp(-1.0, 1.0);
        player.vx = move_dir * stats.move_speed;
        if move_dir < 0.0 {
            player.facing = Facing::Left;
        } else if move_dir > 0.0 {
            player.facing = Facing::Right;
        }

        if jump && player.is_grounded() {
            player.vy = stats.jump_power;
        }

        player.vy += GRAVITY;
        player.x += player.vx;
        player.y += player.vy;

        Self::clamp_to_arena(player);
    }

    /// Keep the player inside the arena: floor, ceiling and side walls
    pub fn clamp_to_arena(player: &mut PlayerEntity) {
        if player.y >= GROUND_Y {
            player.y = GROUND_Y;
            player.vy = 0.0;
        }
        if player.y < 0.0 {
            player.y = 0.0;
            player.vy = player.vy.max(0.0);
        }
        player.x = player.x.clamp(0.0, ARENA_WIDTH - PLAYER_WIDTH);
    }

    /// Move a bullet along its direction, returns false once it left the arena
    pub fn step_bullet(x: &mut f32, dir: f32) -> bool {
        *x += dir * BULLET_SPEED;
        *x > 0.0 && *x < ARENA_WIDTH
    }

    /// Advance a grenade one tick, returns true when its fuse ran out
    pub fn step_grenade(grenade: &mut Grenade) -> bool {
        grenade.vy += GRENADE_GRAVITY;
        grenade.x += grenade.vx;
        grenade.y += grenade.vy;

        let floor = FLOOR_Y - GRENADE_SIZE;
        if grenade.y >= floor {
            grenade.y = floor;
            grenade.vy = -grenade.vy * GRENADE_BOUNCE;
            grenade.vx *= GRENADE_FRICTION;
        }

        let right_wall = ARENA_WIDTH - GRENADE_SIZE;
        if grenade.x < 0.0 || grenade.x > right_wall {
            grenade.x = grenade.x.clamp(0.0, right_wall);
            grenade.vx = -grenade.vx;
        }

        grenade.fuse = grenade.fuse.saturating_sub(1);
        grenade.fuse == 0
    }

    /// Advance an aircraft at constant speed
    pub fn step_aircraft(aircraft: &mut Aircraft) -> AircraftStep {
        aircraft.x += aircraft.vx;

        let nose = aircraft.x + AIRCRAFT_WIDTH / 2.0;
        let crossed = if aircraft.vx >= 0.0 {
            nose >= aircraft.target_x
        } else {
            nose <= aircraft.target_x
        };
        let release = !aircraft.spent && crossed;
        if release {
            aircraft.spent = true;
        }

        let gone = aircraft.x > ARENA_WIDTH + AIRCRAFT_MARGIN
            || aircraft.x + AIRCRAFT_WIDTH < -AIRCRAFT_MARGIN;

        AircraftStep { release, gone }
    }

    /// Advance a bomb under gravity, returns true on ground contact
    pub fn step_bomb(bomb: &mut Bomb) -> bool {
        bomb.vy += GRAVITY;
        bomb.x += bomb.vx;
        bomb.y += bomb.vy;
        bomb.y + BOMB_SIZE >= FLOOR_Y
    }

    pub fn distance(ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
        let dx = bx - ax;
        let dy = by - ay;
        (dx * dx + dy * dy).sqrt()
    }
}
