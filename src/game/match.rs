//! Round and match lifecycle: phase, lives, score, countdown and time scale

use serde::{Deserialize, Serialize};

use super::entity::Side;
use super::tuning::{ROUNDS_TO_WIN, ROUND_COUNTDOWN, ROUND_INTERMISSION, STARTING_LIVES};

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No match running
    Menu,
    /// Round in progress (frozen while the countdown runs)
    Playing,
    /// Short pause between rounds
    RoundOver,
    /// Someone reached the winning score
    MatchOver,
}

/// Result of awarding a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    NextRound,
    MatchWon(Side),
}

/// Match/round bookkeeping. Mutated by hit resolution and explicit transitions only.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchState {
    pub phase: Phase,
    pub player_lives: u8,
    pub opponent_lives: u8,
    pub player_score: u8,
    pub opponent_score: u8,
    pub round: u32,
    pub winner: Option<Side>,
    /// Pre-round freeze, real seconds
    pub countdown: f32,
    pub time_scale: f32,
    /// Real seconds until `time_scale` returns to 1
    pub slow_motion_remaining: f32,
    /// Real seconds until the next round starts
    pub intermission: f32,
}

impl Default for MatchState {
    fn default() -> Self {
        Self {
            phase: Phase::Menu,
            player_lives: STARTING_LIVES,
            opponent_lives: STARTING_LIVES,
            player_score: 0,
            opponent_score: 0,
            round: 0,
            winner: None,
            countdown: 0.0,
            time_scale: 1.0,
            slow_motion_remaining: 0.0,
            intermission: 0.0,
        }
    }
}

impl MatchState {
    /// Fresh match, first round counting down
    pub fn start_match(&mut self) {
        *self = Self::default();
        self.round = 1;
        self.begin_round();
    }

    /// Start the next round: lives refilled, countdown armed
    pub fn begin_round(&mut self) {
        self.phase = Phase::Playing;
        self.player_lives = STARTING_LIVES;
        self.opponent_lives = STARTING_LIVES;
        self.countdown = ROUND_COUNTDOWN;
        self.intermission = 0.0;
        self.clear_slow_motion();
    }

    pub fn next_round(&mut self) {
        self.round += 1;
        self.begin_round();
    }

    pub fn reset_to_menu(&mut self) {
        *self = Self::default();
    }

    pub fn lives(&self, side: Side) -> u8 {
        match side {
            Side::Player => self.player_lives,
            Side::Opponent => self.opponent_lives,
        }
    }

    pub fn score(&self, side: Side) -> u8 {
        match side {
            Side::Player => self.player_score,
            Side::Opponent => self.opponent_score,
        }
    }

    /// Take one life from `side`, returning what is left
    pub fn lose_life(&mut self, side: Side) -> u8 {
        let lives = match side {
            Side::Player => &mut self.player_lives,
            Side::Opponent => &mut self.opponent_lives,
        };
        *lives = lives.saturating_sub(1);
        *lives
    }

    /// Award the round to `winner` and move to the next phase
    pub fn win_round(&mut self, winner: Side) -> RoundOutcome {
        let score = match winner {
            Side::Player => &mut self.player_score,
            Side::Opponent => &mut self.opponent_score,
        };
        *score += 1;
        let score = *score;
        self.clear_slow_motion();
        self.countdown = 0.0;

        if score >= ROUNDS_TO_WIN {
            self.phase = Phase::MatchOver;
            self.winner = Some(winner);
            RoundOutcome::MatchWon(winner)
        } else {
            self.phase = Phase::RoundOver;
            self.intermission = ROUND_INTERMISSION;
            RoundOutcome::NextRound
        }
    }

    pub fn slow_motion(&mut self, scale: f32, real_secs: f32) {
        // A killing blow's longer slow motion is never shortened by a later pulse.
        if self.slow_motion_remaining > 0.0 && self.time_scale <= scale {
            return;
        }
        self.time_scale = scale;
        self.slow_motion_remaining = real_secs;
    }

    fn clear_slow_motion(&mut self) {
        self.time_scale = 1.0;
        self.slow_motion_remaining = 0.0;
    }

    /// Advance the real-time timers that are not part of the fixed step
    pub fn advance_real_time(&mut self, real_dt: f32) {
        if self.slow_motion_remaining > 0.0 {
            self.slow_motion_remaining -= real_dt;
            if self.slow_motion_remaining <= 0.0 {
                self.clear_slow_motion();
            }
        }
        if self.countdown > 0.0 {
            self.countdown = (self.countdown - real_dt).max(0.0);
        }
    }

    /// Round intermission timer. Returns true when the next round should begin.
    pub fn advance_intermission(&mut self, real_dt: f32) -> bool {
        if self.phase != Phase::RoundOver {
            return false;
        }
        self.intermission -= real_dt;
        self.intermission <= 0.0
    }

    pub fn is_live(&self) -> bool {
        self.phase == Phase::Playing && self.countdown <= 0.0
    }
}
