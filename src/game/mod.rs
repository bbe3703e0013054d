//! Game simulation modules

pub mod bot;
pub mod combat;
pub mod entity;
pub mod r#match;
pub mod outcome;
pub mod physics;
pub mod reconcile;
pub mod sim;
pub mod snapshot;

pub use r#match::{GameMatch, JoinError, MatchEvent, MatchHandle, MatchState};

use crate::game::entity::Weapon;

/// Fire button edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fires rifle/sniper, starts charging a grenade
    Press,
    /// Throws a charging grenade
    Release,
}

/// Intents for a single frame, produced by input handling
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Intents {
    pub move_left: bool,
    pub move_right: bool,
    pub jump: bool,
    /// Fire button went down since the last frame
    pub press: bool,
    /// Fire button came up since the last frame
    pub release: bool,
    pub select_weapon: Option<Weapon>,
    /// Arena x chosen while targeting an airstrike
    pub airstrike_target: Option<f32>,
    pub report: bool,
}

impl Intents {
    /// -1, 0 or +1 from the held movement keys
    pub fn move_dir(&self) -> f32 {
        match (self.move_left, self.move_right) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        }
    }

    /// Fold a newer intent frame into this one.
    ///
    /// Held keys follow the newer frame; one-shot actions survive until a
    /// frame consumes them.
    pub fn merge(&mut self, newer: Intents) {
        self.move_left = newer.move_left;
        self.move_right = newer.move_right;
        self.jump = newer.jump;
        self.press |= newer.press;
        self.release |= newer.release;
        self.select_weapon = newer.select_weapon.or(self.select_weapon);
        self.airstrike_target = newer.airstrike_target.or(self.airstrike_target);
        self.report |= newer.report;
    }

    /// Trigger edges in the order they apply: a tap between two frames
    /// yields a press followed by a release
    pub fn triggers(&self) -> impl Iterator<Item = Trigger> {
        let press = self.press.then_some(Trigger::Press);
        let release = self.release.then_some(Trigger::Release);
        press.into_iter().chain(release)
    }

    /// Drop the one-shot actions after a frame used them
    pub fn consume_actions(&mut self) {
        self.press = false;
        self.release = false;
        self.select_weapon = None;
        self.airstrike_target = None;
        self.report = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_one_shot_actions() {
        let mut pending = Intents {
            press: true,
            move_left: true,
            ..Default::default()
        };
        pending.merge(Intents {
            move_right: true,
            ..Default::default()
        });
        assert!(pending.press);
        assert_eq!(pending.move_dir(), 1.0);

        pending.consume_actions();
        assert_eq!(pending.triggers().count(), 0);
        assert!(pending.move_right);
    }

    #[test]
    fn test_tap_between_frames_keeps_both_edges() {
        let mut pending = Intents {
            press: true,
            ..Default::default()
        };
        pending.merge(Intents {
            release: true,
            ..Default::default()
        });
        let edges: Vec<_> = pending.triggers().collect();
        assert_eq!(edges, vec![Trigger::Press, Trigger::Release]);
    }
}
