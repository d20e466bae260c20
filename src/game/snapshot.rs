//! Complete world + match state, sent host to client and polled by presentation

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::entity::{BallState, Entity, Projectile, Side};
use super::events::GameEvent;
use super::r#match::{MatchState, Phase};
use super::tuning::BALL_COUNT;

/// Reasons a received snapshot is ignored
#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("expected {expected} balls, got {got}")]
    PoolSize { expected: usize, got: usize },

    #[error("ball id {0} is out of range")]
    BallOutOfRange(usize),

    #[error("ball id {0} appears twice")]
    DuplicateBall(usize),

    #[error("{0} holds missing ball {1}")]
    DanglingHold(&'static str, usize),

    #[error("ball {0} and its holder disagree")]
    HoldMismatch(usize),

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub x: f32,
    pub z: f32,
    pub cooldown: f32,
    pub holding_ball_id: Option<usize>,
    pub is_hit: bool,
    pub stun_timer: f32,
    pub invulnerable: f32,
}

impl From<&Entity> for EntitySnapshot {
    fn from(e: &Entity) -> Self {
        Self {
            x: e.x,
            z: e.z,
            cooldown: e.cooldown,
            holding_ball_id: e.holding_ball_id,
            is_hit: e.is_hit(),
            stun_timer: e.stun_timer,
            invulnerable: e.invulnerable,
        }
    }
}

impl EntitySnapshot {
    /// Overwrite a mirrored entity. Velocity is not replicated.
    pub fn apply_to(&self, e: &mut Entity) {
        e.x = self.x;
        e.z = self.z;
        e.vx = 0.0;
        e.vz = 0.0;
        e.cooldown = self.cooldown;
        e.holding_ball_id = self.holding_ball_id;
        e.stun_timer = self.stun_timer;
        e.invulnerable = self.invulnerable;
    }

    fn is_finite(&self) -> bool {
        [self.x, self.z, self.cooldown, self.stun_timer, self.invulnerable]
            .iter()
            .all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallSnapshot {
    pub id: usize,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub state: BallState,
    pub owner: Option<Side>,
    pub is_lethal: bool,
    pub grounded: bool,
}

impl From<&Projectile> for BallSnapshot {
    fn from(b: &Projectile) -> Self {
        Self {
            id: b.id,
            x: b.x,
            y: b.y,
            z: b.z,
            state: b.state,
            owner: b.owner,
            is_lethal: b.is_lethal,
            grounded: b.grounded,
        }
    }
}

impl BallSnapshot {
    pub fn to_projectile(&self) -> Projectile {
        Projectile {
            id: self.id,
            x: self.x,
            y: self.y,
            z: self.z,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            state: self.state,
            owner: self.owner,
            grounded: self.grounded,
            is_lethal: self.is_lethal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    pub phase: Phase,
    pub round: u32,
    pub player_score: u8,
    pub opponent_score: u8,
    pub player_lives: u8,
    pub opponent_lives: u8,
    pub winner: Option<Side>,
    pub countdown: f32,
    pub time_scale: f32,
}

impl From<&MatchState> for MatchSnapshot {
    fn from(m: &MatchState) -> Self {
        Self {
            phase: m.phase,
            round: m.round,
            player_score: m.player_score,
            opponent_score: m.opponent_score,
            player_lives: m.player_lives,
            opponent_lives: m.opponent_lives,
            winner: m.winner,
            countdown: m.countdown,
            time_scale: m.time_scale,
        }
    }
}

impl MatchSnapshot {
    pub fn apply_to(&self, m: &mut MatchState) {
        m.phase = self.phase;
        m.round = self.round;
        m.player_score = self.player_score;
        m.opponent_score = self.opponent_score;
        m.player_lives = self.player_lives;
        m.opponent_lives = self.opponent_lives;
        m.winner = self.winner;
        m.countdown = self.countdown;
        m.time_scale = self.time_scale;
        m.slow_motion_remaining = 0.0;
        m.intermission = 0.0;
    }
}

/// Authoritative and complete: applied by overwrite, never diffed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tick: u64,
    pub player: EntitySnapshot,
    pub opponent: EntitySnapshot,
    pub balls: Vec<BallSnapshot>,
    #[serde(default)]
    pub events: Vec<GameEvent>,
    pub game: MatchSnapshot,
}

impl Snapshot {
    /// Structural checks done at the transport boundary, before the engine sees it
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.balls.len() != BALL_COUNT {
            return Err(SnapshotError::PoolSize {
                expected: BALL_COUNT,
                got: self.balls.len(),
            });
        }

        let mut seen = [false; BALL_COUNT];
        for ball in &self.balls {
            let slot = seen
                .get_mut(ball.id)
                .ok_or(SnapshotError::BallOutOfRange(ball.id))?;
            if *slot {
                return Err(SnapshotError::DuplicateBall(ball.id));
            }
            *slot = true;
            if ![ball.x, ball.y, ball.z].iter().all(|v| v.is_finite()) {
                return Err(SnapshotError::NonFinite("ball"));
            }
        }

        let sides = [
            ("player", Side::Player, &self.player),
            ("opponent", Side::Opponent, &self.opponent),
        ];
        for (name, side, entity) in sides {
            if !entity.is_finite() {
                return Err(SnapshotError::NonFinite(name));
            }
            let Some(id) = entity.holding_ball_id else {
                continue;
            };
            let ball = self
                .balls
                .iter()
                .find(|b| b.id == id)
                .ok_or(SnapshotError::DanglingHold(name, id))?;
            if ball.state != BallState::Held || ball.owner != Some(side) {
                return Err(SnapshotError::HoldMismatch(id));
            }
        }

        // A ball is held exactly when its owner says it is holding that ball.
        for ball in &self.balls {
            let holder = match ball.owner {
                Some(Side::Player) => &self.player,
                Some(Side::Opponent) => &self.opponent,
                None if ball.state == BallState::Held => {
                    return Err(SnapshotError::HoldMismatch(ball.id))
                }
                None => continue,
            };
            let held = ball.state == BallState::Held;
            if held != (holder.holding_ball_id == Some(ball.id)) {
                return Err(SnapshotError::HoldMismatch(ball.id));
            }
        }

        if !self.game.countdown.is_finite() || !self.game.time_scale.is_finite() {
            return Err(SnapshotError::NonFinite("game"));
        }
        if self.events.iter().any(|e| !e.x.is_finite() || !e.z.is_finite()) {
            return Err(SnapshotError::NonFinite("events"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::engine::Engine;

    fn sample() -> Snapshot {
        let mut engine = Engine::new(5);
        engine.start_game();
        engine.view()
    }

    #[test]
    fn wire_format_is_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json["player"].get("holdingBallId").is_some());
        assert!(json["balls"][0].get("isLethal").is_some());
        assert_eq!(json["game"]["phase"], "playing");
        assert_eq!(json["game"]["timeScale"], 1.0);
    }

    #[test]
    fn accepts_a_fresh_engine_view() {
        assert_eq!(sample().validate(), Ok(()));
    }

    #[test]
    fn rejects_malformed_pools() {
        let mut snap = sample();
        snap.balls.pop();
        assert!(matches!(snap.validate(), Err(SnapshotError::PoolSize { got: 4, .. })));

        let mut snap = sample();
        snap.balls[1].id = 0;
        assert_eq!(snap.validate(), Err(SnapshotError::DuplicateBall(0)));

        let mut snap = sample();
        snap.balls[4].id = 9;
        assert_eq!(snap.validate(), Err(SnapshotError::BallOutOfRange(9)));
    }

    #[test]
    fn rejects_dangling_holds_and_nan() {
        let mut snap = sample();
        snap.opponent.holding_ball_id = Some(BALL_COUNT);
        assert!(matches!(snap.validate(), Err(SnapshotError::DanglingHold("opponent", _))));

        let mut snap = sample();
        snap.player.x = f32::NAN;
        assert_eq!(snap.validate(), Err(SnapshotError::NonFinite("player")));
    }

    #[test]
    fn rejects_holds_the_ball_does_not_confirm() {
        let mut snap = sample();
        snap.player.holding_ball_id = Some(2);
        snap.balls[2].state = BallState::Held;
        snap.balls[2].owner = Some(Side::Player);
        assert_eq!(snap.validate(), Ok(()));

        // Holder claims a ball that is still lying on the floor.
        let mut loose = snap.clone();
        loose.balls[2].state = BallState::Idle;
        loose.balls[2].owner = None;
        assert_eq!(loose.validate(), Err(SnapshotError::HoldMismatch(2)));

        // Ball held by the other side.
        let mut stolen = snap.clone();
        stolen.balls[2].owner = Some(Side::Opponent);
        assert_eq!(stolen.validate(), Err(SnapshotError::HoldMismatch(2)));

        // Ball held with nobody holding it.
        let mut orphan = snap;
        orphan.player.holding_ball_id = None;
        assert_eq!(orphan.validate(), Err(SnapshotError::HoldMismatch(2)));
    }

    #[test]
    fn missing_fields_fail_to_parse() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json.as_object_mut().unwrap().remove("game");
        assert!(serde_json::from_value::<Snapshot>(json).is_err());
    }
}
