//! Local simulation step
//!
//! One call to [`tick`] advances the locally controlled player and every
//! explosive this client owns by exactly one frame. All damage this client
//! inflicts is resolved here and leaves as [`DocumentWrite`]s; outcome claims
//! are handed to the arbiter by the caller.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::combat::{
    CombatSystem, HitResult, WeaponStats, AIRSTRIKE_BOMBS, AIRSTRIKE_DELAY_MS,
    BOMB_INHERITED_VELOCITY, BOMB_SPREAD, EXPLOSION_TTL_TICKS, GRENADE_CHARGE_MS,
    GRENADE_FUSE_TICKS,
};
use super::entity::{
    muzzle_x, Aabb, Aircraft, Bomb, Bullet, Explosion, ExplosionRecord, Grenade, Identity,
    OutcomeReason, Owner, PlayerEntity, Weapon,
};
use super::physics::{
    MovementStats, PhysicsSystem, AIRCRAFT_HEIGHT, AIRCRAFT_SPEED, AIRCRAFT_WIDTH, AIRCRAFT_Y,
    BOMB_SIZE, FLOOR_Y, GRENADE_SIZE, PLAYER_HEIGHT, PLAYER_WIDTH,
};
use super::{Intents, Trigger};
use crate::store::protocol::{PlayerRecord, Slot};
use crate::store::{path, DocumentWrite};

/// Vertical jitter of fired bullets around chest height
const BULLET_SPREAD_Y: f32 = 10.0;

/// Throw speed and lift at zero and full charge
const GRENADE_MIN_SPEED: f32 = 4.0;
const GRENADE_MAX_SPEED: f32 = 12.0;
const GRENADE_MIN_LIFT: f32 = 6.0;
const GRENADE_MAX_LIFT: f32 = 16.0;

/// Airstrike waiting for its aircraft
#[derive(Debug, Clone, PartialEq)]
pub struct PendingStrike {
    pub target_x: f32,
    pub spawn_at_ms: u64,
    pub owner: Owner,
}

/// Whose victory a tick established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    LocalWins(OutcomeReason),
    /// The local player died to a blast this client resolved
    OpponentWins(OutcomeReason),
}

/// Locally observable things that happened during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Fired { weapon: Weapon, bullets: usize },
    GrenadeThrown { power: f32 },
    AirstrikeDesignated { target_x: f32 },
    AircraftLaunched { owner: Owner },
    Hit(HitResult),
    BlastHitOpponent { damage: u32, opponent_health: u32 },
    BlastHitSelf { damage: u32, health: u32 },
    Exploded { x: f32, y: f32, radius: f32, owner: Owner },
}

/// Everything a tick wants to tell the outside world
#[derive(Debug, Default)]
pub struct TickOutput {
    pub writes: Vec<DocumentWrite>,
    pub events: Vec<SimEvent>,
    pub claims: Vec<Claim>,
}

/// Per-client simulation state
pub struct SimulationState {
    pub room: String,
    pub slot: Slot,
    pub player: PlayerEntity,
    /// Last-known opponent record, used as the collision target
    pub opponent: Option<PlayerRecord>,

    pub bullets: Vec<Bullet>,
    pub grenades: Vec<Grenade>,
    pub aircraft: Vec<Aircraft>,
    pub bombs: Vec<Bomb>,
    pub explosions: Vec<Explosion>,
    pub pending_strikes: Vec<PendingStrike>,

    /// When the current grenade charge began
    pub charge_started_at: Option<u64>,
    pub tick: u64,
    rng: ChaCha8Rng,
}

impl SimulationState {
    /// Fresh player at the spawn point of `slot`
    pub fn new(room: &str, slot: Slot, identity: Identity, seed: u64) -> Self {
        Self::with_player(room, slot, PlayerEntity::spawn(identity, slot), seed)
    }

    /// Pick up an existing slot after a reconnect, keeping its health and position
    pub fn resume(room: &str, slot: Slot, identity: Identity, record: &PlayerRecord, seed: u64) -> Self {
        let mut player = PlayerEntity::spawn(identity, slot);
        player.x = record.x;
        player.y = record.y;
        player.facing = record.dir;
        player.health = record.settled_health();
        player.weapon = record.weapon;
        player.airstrike_used = record.airstrike_used;
        player.airstrike_target = record.airstrike_target;
        player.explosion_log = record.explosions.clone();
        PhysicsSystem::clamp_to_arena(&mut player);
        if player.weapon == Weapon::Airstrike && player.airstrike_used {
            player.weapon = Weapon::Rifle;
        }
        Self::with_player(room, slot, player, seed)
    }

    fn with_player(room: &str, slot: Slot, player: PlayerEntity, seed: u64) -> Self {
        Self {
            room: room.to_string(),
            slot,
            player,
            opponent: None,
            bullets: Vec::new(),
            grenades: Vec::new(),
            aircraft: Vec::new(),
            bombs: Vec::new(),
            explosions: Vec::new(),
            pending_strikes: Vec::new(),
            charge_started_at: None,
            tick: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Milliseconds until `weapon` can fire again
    pub fn cooldown_remaining_ms(&self, weapon: Weapon, now_ms: u64) -> u64 {
        let stats = WeaponStats::for_weapon(weapon);
        CombatSystem::cooldown_remaining(self.player.cooldowns.last_fired(weapon), now_ms, &stats)
    }

    pub fn airstrikes_left(&self) -> u32 {
        if self.player.airstrike_used {
            0
        } else {
            1
        }
    }

    /// Grenade charge in [0, 1] while the trigger is held
    pub fn grenade_charge(&self, now_ms: u64) -> Option<f32> {
        self.charge_started_at
            .map(|start| (now_ms.saturating_sub(start) as f32 / GRENADE_CHARGE_MS as f32).min(1.0))
    }

    /// Queue the render-only replay of an opponent's airstrike
    pub fn schedule_remote_strike(&mut self, target_x: f32, now_ms: u64) {
        self.pending_strikes.push(PendingStrike {
            target_x,
            spawn_at_ms: now_ms + AIRSTRIKE_DELAY_MS,
            owner: Owner::Remote,
        });
    }

    /// Show an explosion the opponent resolved. No damage is computed.
    pub fn replay_explosion(&mut self, record: &ExplosionRecord) {
        self.explosions.push(Explosion {
            x: record.x,
            y: record.y,
            radius: record.radius,
            ttl: EXPLOSION_TTL_TICKS,
            owner: Owner::Remote,
        });
    }

    fn own_path(&self, field: &str) -> String {
        path(&[&self.room, self.slot.key(), field])
    }

    fn opponent_path(&self, field: &str) -> String {
        path(&[&self.room, self.slot.other().key(), field])
    }

    fn select_weapon(&mut self, weapon: Weapon) {
        if weapon == Weapon::Airstrike && self.player.airstrike_used {
            return;
        }
        if weapon != Weapon::Grenade {
            self.charge_started_at = None;
        }
        self.player.weapon = weapon;
    }

    fn advance_bullets(&mut self, out: &mut TickOutput) {
        let target = self.opponent.as_ref().map(|o| Aabb::player(o.x, o.y));
        let mut struck = Vec::new();

        self.bullets.retain_mut(|bullet| {
            if !PhysicsSystem::step_bullet(&mut bullet.x, bullet.dir) {
                return false;
            }
            match target {
                Some(target) if bullet.bounds().overlaps(&target) => {
                    struck.push((bullet.id.clone(), bullet.weapon));
                    false
                }
                _ => true,
            }
        });

        for (bullet_id, weapon) in struck {
            let damage = CombatSystem::bullet_damage(weapon, self.player.is_privileged());
            if let Some((opponent_health, lethal)) = self.damage_opponent(damage, out) {
                out.events.push(SimEvent::Hit(HitResult {
                    bullet_id,
                    damage,
                    opponent_health,
                    lethal,
                }));
            }
        }
    }

    fn advance_grenades(&mut self, out: &mut TickOutput) {
        let mut detonations = Vec::new();
        self.grenades.retain_mut(|grenade| {
            if PhysicsSystem::step_grenade(grenade) {
                detonations.push((grenade.x + GRENADE_SIZE / 2.0, grenade.y + GRENADE_SIZE / 2.0));
                false
            } else {
                true
            }
        });

        for (x, y) in detonations {
            self.detonate(x, y, Weapon::Grenade, out);
        }
    }

    fn launch_due_strikes(&mut self, now_ms: u64, out: &mut TickOutput) {
        let (due, waiting): (Vec<_>, Vec<_>) = self
            .pending_strikes
            .drain(..)
            .partition(|strike| strike.spawn_at_ms <= now_ms);
        self.pending_strikes = waiting;

        for strike in due {
            self.aircraft.push(Aircraft {
                x: -AIRCRAFT_WIDTH,
                y: AIRCRAFT_Y,
                vx: AIRCRAFT_SPEED,
                target_x: strike.target_x,
                spent: false,
                owner: strike.owner,
            });
            out.events.push(SimEvent::AircraftLaunched { owner: strike.owner });
        }
    }

    fn advance_aircraft(&mut self) {
        let mut releases = Vec::new();
        self.aircraft.retain_mut(|aircraft| {
            let step = PhysicsSystem::step_aircraft(aircraft);
            if step.release {
                releases.push((aircraft.x + AIRCRAFT_WIDTH / 2.0, aircraft.vx, aircraft.owner));
            }
            !step.gone
        });

        for (x, vx, owner) in releases {
            for _ in 0..AIRSTRIKE_BOMBS {
                let offset = self.rng.gen_range(-BOMB_SPREAD..=BOMB_SPREAD);
                let drift = self.rng.gen_range(-0.5..=0.5);
                self.bombs.push(Bomb {
                    x: x + offset - BOMB_SIZE / 2.0,
                    y: AIRCRAFT_Y + AIRCRAFT_HEIGHT,
                    vx: vx * BOMB_INHERITED_VELOCITY + drift,
                    vy: 0.0,
                    owner,
                });
            }
        }
    }

    fn advance_bombs(&mut self, out: &mut TickOutput) {
        let mut landed = Vec::new();
        self.bombs.retain_mut(|bomb| {
            if PhysicsSystem::step_bomb(bomb) {
                landed.push((bomb.x + BOMB_SIZE / 2.0, bomb.owner));
                false
            } else {
                true
            }
        });

        for (x, owner) in landed {
            // Remote bombs vanish; their explosion arrives through the opponent's log
            if owner == Owner::Local {
                self.detonate(x, FLOOR_Y - BOMB_SIZE / 2.0, Weapon::Airstrike, out);
            }
        }
    }

    fn decay_explosions(&mut self) {
        self.explosions.retain_mut(|explosion| {
            explosion.ttl = explosion.ttl.saturating_sub(1);
            explosion.ttl > 0
        });
    }

    /// Resolve a locally owned blast: record it, then damage the opponent and ourselves
    fn detonate(&mut self, x: f32, y: f32, weapon: Weapon, out: &mut TickOutput) {
        let stats = WeaponStats::for_weapon(weapon);
        let radius = stats.blast_radius;

        self.explosions.push(Explosion {
            x,
            y,
            radius,
            ttl: EXPLOSION_TTL_TICKS,
            owner: Owner::Local,
        });
        self.player.explosion_log.push(ExplosionRecord { x, y, radius });
        out.events.push(SimEvent::Exploded {
            x,
            y,
            radius,
            owner: Owner::Local,
        });

        if let Some(opponent) = &self.opponent {
            let (cx, cy) = Aabb::player(opponent.x, opponent.y).center();
            let distance = PhysicsSystem::distance(x, y, cx, cy);
            let damage = CombatSystem::explosion_damage(distance, radius, stats.max_blast_damage);
            if damage > 0 {
                if let Some((opponent_health, _)) = self.damage_opponent(damage, out) {
                    out.events.push(SimEvent::BlastHitOpponent {
                        damage,
                        opponent_health,
                    });
                }
            }
        }

        let (cx, cy) = self.player.bounds().center();
        let distance = PhysicsSystem::distance(x, y, cx, cy);
        let damage = CombatSystem::explosion_damage(distance, radius, stats.max_blast_damage);
        if damage > 0 {
            self.damage_self(damage, out);
        }
    }

    /// Write the opponent's new health. The attacker owns this write.
    fn damage_opponent(&mut self, damage: u32, out: &mut TickOutput) -> Option<(u32, bool)> {
        let current = self.opponent.as_ref()?.health;
        // Already down this tick; the lethal write and claim are out
        if current <= 0.0 {
            return None;
        }
        let Some((health, lethal)) = CombatSystem::apply_damage(current, damage as f64) else {
            warn!(room = %self.room, role = %self.slot, "Dropped non-numeric opponent health");
            return None;
        };

        if let Some(opponent) = self.opponent.as_mut() {
            opponent.health = health as f64;
        }
        out.writes.push(DocumentWrite::Set {
            path: self.opponent_path("health"),
            value: json!(health),
        });
        if lethal {
            out.claims.push(Claim::LocalWins(OutcomeReason::Elimination));
        }
        Some((health, lethal))
    }

    fn damage_self(&mut self, damage: u32, out: &mut TickOutput) {
        let Some((health, lethal)) = CombatSystem::apply_damage(self.player.health as f64, damage as f64)
        else {
            warn!(room = %self.room, role = %self.slot, "Dropped non-numeric own health");
            return;
        };

        self.player.health = health;
        out.writes.push(DocumentWrite::Set {
            path: self.own_path("health"),
            value: json!(health),
        });
        out.events.push(SimEvent::BlastHitSelf { damage, health });
        if lethal {
            out.claims.push(Claim::OpponentWins(OutcomeReason::Elimination));
        }
    }

    fn handle_trigger(&mut self, trigger: Trigger, now_ms: u64, out: &mut TickOutput) {
        let weapon = self.player.weapon;
        let stats = WeaponStats::for_weapon(weapon);
        let last_fired = self.player.cooldowns.last_fired(weapon);

        match (weapon, trigger) {
            (Weapon::Rifle | Weapon::Sniper, Trigger::Press) => {
                if !CombatSystem::can_fire(last_fired, now_ms, &stats) {
                    return;
                }
                self.fire_bullets(weapon, now_ms, out);
            }
            (Weapon::Grenade, Trigger::Press) => {
                if self.charge_started_at.is_none() && CombatSystem::can_fire(last_fired, now_ms, &stats) {
                    self.charge_started_at = Some(now_ms);
                }
            }
            (Weapon::Grenade, Trigger::Release) => {
                if let Some(started) = self.charge_started_at.take() {
                    self.throw_grenade(started, now_ms, out);
                }
            }
            _ => {}
        }
    }

    fn fire_bullets(&mut self, weapon: Weapon, now_ms: u64, out: &mut TickOutput) {
        let count = CombatSystem::bullets_per_shot(self.player.is_privileged());
        let x = muzzle_x(&self.player);
        let chest = self.player.y + PLAYER_HEIGHT / 2.0 - BULLET_SPREAD_Y;
        let dir = self.player.facing.sign();

        for _ in 0..count {
            let y = chest + self.rng.gen_range(-BULLET_SPREAD_Y..=BULLET_SPREAD_Y);
            self.bullets.push(Bullet {
                id: Uuid::new_v4().to_string(),
                x,
                y,
                dir,
                weapon,
            });
        }

        self.player.cooldowns.mark_fired(weapon, now_ms);
        out.events.push(SimEvent::Fired {
            weapon,
            bullets: count,
        });
    }

    fn throw_grenade(&mut self, started: u64, now_ms: u64, out: &mut TickOutput) {
        let power = (now_ms.saturating_sub(started) as f32 / GRENADE_CHARGE_MS as f32).min(1.0);
        let speed = GRENADE_MIN_SPEED + (GRENADE_MAX_SPEED - GRENADE_MIN_SPEED) * power;
        let lift = GRENADE_MIN_LIFT + (GRENADE_MAX_LIFT - GRENADE_MIN_LIFT) * power;

        self.grenades.push(Grenade {
            id: Uuid::new_v4().to_string(),
            x: self.player.x + PLAYER_WIDTH / 2.0 - GRENADE_SIZE / 2.0,
            y: self.player.y,
            vx: self.player.facing.sign() * speed,
            vy: -lift,
            fuse: GRENADE_FUSE_TICKS,
        });

        self.player.cooldowns.mark_fired(Weapon::Grenade, now_ms);
        out.events.push(SimEvent::GrenadeThrown { power });
    }

    /// Single-use: the first designation while targeting wins
    fn designate_airstrike(&mut self, target_x: f32, now_ms: u64, out: &mut TickOutput) {
        if self.player.airstrike_used || self.player.weapon != Weapon::Airstrike {
            return;
        }

        self.player.airstrike_used = true;
        self.player.airstrike_target = Some(target_x);
        self.player.weapon = Weapon::Rifle;
        self.pending_strikes.push(PendingStrike {
            target_x,
            spawn_at_ms: now_ms + AIRSTRIKE_DELAY_MS,
            owner: Owner::Local,
        });
        out.events.push(SimEvent::AirstrikeDesignated { target_x });
    }
}

/// Advance the local simulation by one frame.
///
/// Existing entities move before new ones spawn, so a grenade thrown on
/// tick `k` detonates on tick `k + GRENADE_FUSE_TICKS`.
pub fn tick(state: &mut SimulationState, intents: &Intents, now_ms: u64) -> TickOutput {
    let mut out = TickOutput::default();
    state.tick += 1;

    if let Some(weapon) = intents.select_weapon {
        state.select_weapon(weapon);
    }

    let stats = MovementStats::for_mode(state.player.identity.privileged);
    PhysicsSystem::step_player(&mut state.player, intents.move_dir(), intents.jump, &stats);

    state.advance_bullets(&mut out);
    state.advance_grenades(&mut out);
    state.launch_due_strikes(now_ms, &mut out);
    state.advance_aircraft();
    state.advance_bombs(&mut out);
    state.decay_explosions();

    for trigger in intents.triggers() {
        state.handle_trigger(trigger, now_ms, &mut out);
    }
    if let Some(target_x) = intents.airstrike_target {
        state.designate_airstrike(target_x, now_ms, &mut out);
    }

    out
}
