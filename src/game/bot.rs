//! Bot driver for headless duels

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::game::entity::Weapon;
use crate::game::outcome::MatchPhase;
use crate::game::r#match::HudView;
use crate::game::Intents;

/// Re-evaluate the state this often
const REEVALUATE_MS: u64 = 500;
/// Within this horizontal distance the bot stands and shoots
const ATTACK_RANGE: f32 = 350.0;
/// Within this distance the bot closes in
const CHASE_RANGE: f32 = 600.0;
/// Chance per attack frame to open with a heavier weapon
const SNIPER_CHANCE: f64 = 0.05;
const GRENADE_CHANCE: f64 = 0.02;
const AIRSTRIKE_CHANCE: f64 = 0.005;
const JUMP_CHANCE: f64 = 0.01;

/// Bot AI state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    /// No opponent in reach, roam
    Wander,
    /// Move toward the opponent
    Chase,
    /// Face the opponent and fire
    Attack,
}

/// Produces one frame of intents from what the HUD shows
#[derive(Debug, Clone)]
pub struct BotDriver {
    pub state: BotState,
    rng: ChaCha8Rng,
    next_evaluation_ms: u64,
    wander_dir: f32,
    wander_until_ms: u64,
    /// Release time of a grenade being charged
    release_at_ms: Option<u64>,
}

impl BotDriver {
    pub fn new(seed: u64) -> Self {
        Self {
            state: BotState::Wander,
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_evaluation_ms: 0,
            wander_dir: 1.0,
            wander_until_ms: 0,
            release_at_ms: None,
        }
    }

    pub fn next_intents(&mut self, view: &HudView, now_ms: u64) -> Intents {
        if view.phase != MatchPhase::Playing {
            return Intents::default();
        }

        if now_ms >= self.next_evaluation_ms {
            self.evaluate_state(view);
            self.next_evaluation_ms = now_ms + REEVALUATE_MS;
        }

        match self.state {
            BotState::Wander => self.wander(view, now_ms),
            BotState::Chase => self.chase(view),
            BotState::Attack => self.attack(view, now_ms),
        }
    }

    fn evaluate_state(&mut self, view: &HudView) {
        self.state = match view.opponent_x {
            Some(x) if (x - view.x).abs() < ATTACK_RANGE => BotState::Attack,
            Some(x) if (x - view.x).abs() < CHASE_RANGE => BotState::Chase,
            _ => BotState::Wander,
        };
    }

    fn wander(&mut self, view: &HudView, now_ms: u64) -> Intents {
        if now_ms >= self.wander_until_ms {
            self.wander_dir = if self.rng.gen_bool(0.5) { -1.0 } else { 1.0 };
            self.wander_until_ms = now_ms + self.rng.gen_range(1_000..3_000);
        }
        // Bias toward the opponent if we know where they are
        if let Some(x) = view.opponent_x {
            self.wander_dir = (x - view.x).signum();
        }
        self.steer(self.wander_dir)
    }

    fn chase(&mut self, view: &HudView) -> Intents {
        let dir = view.opponent_x.map(|x| (x - view.x).signum()).unwrap_or(0.0);
        let mut intents = self.steer(dir);
        intents.jump = self.rng.gen_bool(JUMP_CHANCE);
        intents
    }

    fn attack(&mut self, view: &HudView, now_ms: u64) -> Intents {
        let Some(target_x) = view.opponent_x else {
            return Intents::default();
        };

        if let Some(release_at) = self.release_at_ms {
            if now_ms < release_at {
                return Intents::default();
            }
            self.release_at_ms = None;
            return Intents {
                release: true,
                ..Default::default()
            };
        }

        // A frame of movement turns us around
        let toward = (target_x - view.x).signum();
        if toward != 0.0 && toward != view.facing.sign() {
            return self.steer(toward);
        }

        if view.airstrikes_left > 0 && self.rng.gen_bool(AIRSTRIKE_CHANCE) {
            return Intents {
                select_weapon: Some(Weapon::Airstrike),
                airstrike_target: Some(target_x),
                ..Default::default()
            };
        }
        if view.grenade_cooldown_ms == 0 && self.rng.gen_bool(GRENADE_CHANCE) {
            self.release_at_ms = Some(now_ms + self.rng.gen_range(300..1_500));
            return Intents {
                select_weapon: Some(Weapon::Grenade),
                press: true,
                ..Default::default()
            };
        }

        let weapon = if view.sniper_cooldown_ms == 0 && self.rng.gen_bool(SNIPER_CHANCE) {
            Weapon::Sniper
        } else {
            Weapon::Rifle
        };
        Intents {
            select_weapon: (weapon != view.weapon).then_some(weapon),
            press: true,
            ..Default::default()
        }
    }

    fn steer(&self, dir: f32) -> Intents {
        Intents {
            move_left: dir < 0.0,
            move_right: dir > 0.0,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::Facing;

    fn view(x: f32, opponent_x: Option<f32>) -> HudView {
        HudView {
            phase: MatchPhase::Playing,
            x,
            facing: Facing::Right,
            opponent_x,
            airstrikes_left: 0,
            grenade_cooldown_ms: 4_000,
            sniper_cooldown_ms: 3_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_idle_outside_playing() {
        let mut bot = BotDriver::new(1);
        let waiting = HudView::default();
        assert_eq!(bot.next_intents(&waiting, 0), Intents::default());
    }

    #[test]
    fn test_state_follows_distance() {
        let mut bot = BotDriver::new(1);
        bot.next_intents(&view(100.0, Some(200.0)), 0);
        assert_eq!(bot.state, BotState::Attack);

        bot.next_intents(&view(100.0, Some(600.0)), 500);
        assert_eq!(bot.state, BotState::Chase);

        bot.next_intents(&view(0.0, None), 1_000);
        assert_eq!(bot.state, BotState::Wander);
    }

    #[test]
    fn test_attack_fires_when_facing_target() {
        let mut bot = BotDriver::new(3);
        let intents = bot.next_intents(&view(100.0, Some(300.0)), 0);
        assert!(intents.press);
        assert!(!intents.move_left && !intents.move_right);
    }

    #[test]
    fn test_attack_turns_before_firing() {
        let mut bot = BotDriver::new(3);
        let intents = bot.next_intents(&view(300.0, Some(100.0)), 0);
        assert!(intents.move_left);
        assert!(!intents.press);
    }

    #[test]
    fn test_chase_moves_toward_opponent() {
        let mut bot = BotDriver::new(5);
        let intents = bot.next_intents(&view(700.0, Some(200.0)), 0);
        assert_eq!(bot.state, BotState::Chase);
        assert!(intents.move_left);
    }
}
