//! Pickup, throw and hit rules

use rand::Rng;

use super::entity::{BallState, Entity, Projectile, Side};
use super::input::Vec2;
use super::tuning::{
    DEFLECT_JITTER, DEFLECT_POP, DEFLECT_SPEED_FACTOR, INVULNERABLE_GRACE, PICKUP_RANGE,
    STUN_DURATION, THROW_FORCE, THROW_STEER_BLEND, THROW_UP_FORCE,
};

/// How a ball came into someone's hands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pickup {
    /// Was lying idle
    Collected(usize),
    /// Was still in the air after losing its sting
    Caught(usize),
}

/// Hit registered during collision resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitResult {
    pub ball_id: usize,
    pub victim: Side,
    pub x: f32,
    pub z: f32,
}

/// Combat rules over entities and the ball pool
pub struct CombatSystem;

impl CombatSystem {
    /// Grab the first collectable ball in range, in pool order
    pub fn try_pickup(entity: &mut Entity, side: Side, balls: &mut [Projectile]) -> Option<Pickup> {
        if entity.holding_ball_id.is_some() {
            return None;
        }

        let ball = balls.iter_mut().find(|b| {
            b.is_collectable() && b.horizontal_distance(entity.x, entity.z) < PICKUP_RANGE
        })?;

        let pickup = if ball.state == BallState::Flying {
            Pickup::Caught(ball.id)
        } else {
            Pickup::Collected(ball.id)
        };

        ball.state = BallState::Held;
        ball.owner = Some(side);
        ball.grounded = false;
        ball.is_lethal = false;
        ball.vx = 0.0;
        ball.vy = 0.0;
        ball.vz = 0.0;
        entity.holding_ball_id = Some(ball.id);
        Some(pickup)
    }

    /// Aim from `thrower` at `target`, bent by the thrower's own lateral steering and an
    /// optional extra lateral jitter. Returns a unit vector in the court plane.
    pub fn aim(thrower: &Entity, target: &Entity, steer: Vec2, jitter: f32) -> (f32, f32) {
        let dx = target.x - thrower.x;
        let dz = target.z - thrower.z;
        let len = (dx * dx + dz * dz).sqrt();
        let (mut dir_x, mut dir_z) = if len > f32::EPSILON {
            (dx / len, dz / len)
        } else {
            (0.0, -thrower.z.signum())
        };

        dir_x += steer.x * THROW_STEER_BLEND + jitter;

        let len = (dir_x * dir_x + dir_z * dir_z).sqrt();
        if len > f32::EPSILON {
            dir_x /= len;
            dir_z /= len;
        }
        (dir_x, dir_z)
    }

    /// Release the held ball along `dir`. Returns the thrown ball id.
    pub fn throw(entity: &mut Entity, side: Side, balls: &mut [Projectile], dir: (f32, f32)) -> Option<usize> {
        let id = entity.holding_ball_id?;
        let ball = balls.get_mut(id)?;
        if ball.state != BallState::Held || ball.owner != Some(side) {
            // Out of sync; drop the claim rather than launch somebody else's ball.
            entity.holding_ball_id = None;
            return None;
        }

        ball.state = BallState::Flying;
        ball.owner = Some(side);
        ball.grounded = false;
        ball.is_lethal = true;
        ball.vx = dir.0 * THROW_FORCE;
        ball.vz = dir.1 * THROW_FORCE;
        ball.vy = THROW_UP_FORCE;
        entity.holding_ball_id = None;
        Some(id)
    }

    /// A flying, lethal ball that is not the victim's own and meets a vulnerable victim
    pub fn can_hit(ball: &Projectile, victim: &Entity, victim_side: Side) -> bool {
        ball.state == BallState::Flying
            && ball.is_lethal
            && ball.owner != Some(victim_side)
            && victim.invulnerable <= 0.0
    }

    /// Bounce a ball off whoever it struck: reflected, jittered, halved, harmless
    pub fn deflect<R: Rng>(ball: &mut Projectile, rng: &mut R) {
        let angle = rng.gen_range(-DEFLECT_JITTER..DEFLECT_JITTER);
        let (sin, cos) = angle.sin_cos();
        let rx = -ball.vx * DEFLECT_SPEED_FACTOR;
        let rz = -ball.vz * DEFLECT_SPEED_FACTOR;
        ball.vx = rx * cos - rz * sin;
        ball.vz = rx * sin + rz * cos;
        ball.vy = DEFLECT_POP;
        ball.is_lethal = false;
        ball.owner = None;
        ball.grounded = false;
    }

    /// Knock an entity down: stunned, then protected a little longer than the stun
    pub fn stun(victim: &mut Entity) {
        victim.stun_timer = STUN_DURATION;
        victim.invulnerable = STUN_DURATION + INVULNERABLE_GRACE;
        victim.vx = 0.0;
        victim.vz = 0.0;
    }
}
