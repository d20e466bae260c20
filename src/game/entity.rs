//! Combatants and the projectile pool. Plain state, no behavior beyond constructors.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::input::Vec2;
use super::tuning::{BALL_COUNT, BALL_RADIUS, BALL_SPAWN_SPREAD, PLAYER_RADIUS, PLAYER_START_Z};

/// The two combatants. The player owns the +Z half, the opponent the -Z half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Player,
    Opponent,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Side::Player => Side::Opponent,
            Side::Opponent => Side::Player,
        }
    }

    /// +1 for the player half, -1 for the opponent half
    pub fn home_sign(self) -> f32 {
        match self {
            Side::Player => 1.0,
            Side::Opponent => -1.0,
        }
    }
}

/// A combatant on the court
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub x: f32,
    pub z: f32,
    pub vx: f32,
    pub vz: f32,
    pub radius: f32,
    /// Gates starting a new dodge
    pub cooldown: f32,
    /// While positive the entity ignores all input
    pub stun_timer: f32,
    pub invulnerable: f32,
    pub holding_ball_id: Option<usize>,
    /// Most recent world-frame steering input
    pub steer: Vec2,
}

impl Entity {
    pub fn new(x: f32, z: f32) -> Self {
        Self {
            x,
            z,
            vx: 0.0,
            vz: 0.0,
            radius: PLAYER_RADIUS,
            cooldown: 0.0,
            stun_timer: 0.0,
            invulnerable: 0.0,
            holding_ball_id: None,
            steer: Vec2::ZERO,
        }
    }

    /// Fresh entity at its side's starting mark
    pub fn spawn(side: Side) -> Self {
        Self::new(0.0, PLAYER_START_Z * side.home_sign())
    }

    pub fn is_stunned(&self) -> bool {
        self.stun_timer > 0.0
    }

    pub fn is_hit(&self) -> bool {
        self.invulnerable > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallState {
    Idle,
    Held,
    Flying,
}

/// A throwable ball. `id` is its stable index in the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub id: usize,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub state: BallState,
    pub owner: Option<Side>,
    pub grounded: bool,
    /// Only ever true while flying; cleared for good on floor or entity contact
    pub is_lethal: bool,
}

impl Projectile {
    pub fn resting(id: usize, x: f32, z: f32) -> Self {
        Self {
            id,
            x,
            y: BALL_RADIUS,
            z,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            state: BallState::Idle,
            owner: None,
            grounded: true,
            is_lethal: false,
        }
    }

    /// Idle, or still flying after it stopped being dangerous
    pub fn is_collectable(&self) -> bool {
        match self.state {
            BallState::Idle => true,
            BallState::Flying => !self.is_lethal,
            BallState::Held => false,
        }
    }

    pub fn horizontal_distance(&self, x: f32, z: f32) -> f32 {
        let dx = self.x - x;
        let dz = self.z - z;
        (dx * dx + dz * dz).sqrt()
    }
}

/// Lay out a fresh pool on the center line
pub fn spawn_balls<R: Rng>(rng: &mut R) -> Vec<Projectile> {
    (0..BALL_COUNT)
        .map(|id| {
            let x = rng.gen_range(-BALL_SPAWN_SPREAD..BALL_SPAWN_SPREAD);
            Projectile::resting(id, x, 0.0)
        })
        .collect()
}
