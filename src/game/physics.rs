//! Movement integration, court bounds and ball flight

use super::entity::{BallState, Entity, Projectile, Side};
use super::tuning::{
    BALL_RADIUS, CHEST_HEIGHT, FLOOR_FRICTION, FLOOR_RESTITUTION, GRAVITY, HALF_LENGTH,
    HALF_WIDTH, HIT_MARGIN, HIT_VERTICAL_BAND, HOLD_HEIGHT, HOLD_OFFSET,
    SETTLE_HORIZONTAL_SPEED, SETTLE_VERTICAL_SPEED, WALL_DAMPING,
};

/// What happened to a free ball during one integration step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BallContact {
    pub floor: bool,
    pub wall: bool,
    pub settled: bool,
}

/// Physics system for entities and balls
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Move an entity by its velocity and keep it inside its own half
    pub fn integrate_entity(entity: &mut Entity, side: Side, dt: f32) {
        entity.x += entity.vx * dt;
        entity.z += entity.vz * dt;
        Self::clamp_to_half(entity, side);
    }

    /// Clamp to court width and to the side's half of the court length
    pub fn clamp_to_half(entity: &mut Entity, side: Side) {
        let r = entity.radius;
        entity.x = clamp_or_mid(entity.x, -HALF_WIDTH + r, HALF_WIDTH - r);
        entity.z = match side {
            Side::Player => clamp_or_mid(entity.z, r, HALF_LENGTH - r),
            Side::Opponent => clamp_or_mid(entity.z, -HALF_LENGTH + r, -r),
        };
    }

    /// Whether an entity position is within its half
    pub fn in_half(entity: &Entity, side: Side) -> bool {
        let r = entity.radius;
        let eps = 1e-4;
        let x_ok = entity.x >= -HALF_WIDTH + r - eps && entity.x <= HALF_WIDTH - r + eps;
        let z_ok = match side {
            Side::Player => entity.z >= r - eps && entity.z <= HALF_LENGTH - r + eps,
            Side::Opponent => entity.z >= -HALF_LENGTH + r - eps && entity.z <= -r + eps,
        };
        x_ok && z_ok
    }

    /// Pin a held ball in front of its holder
    pub fn snap_to_holder(ball: &mut Projectile, holder: &Entity, side: Side) {
        ball.x = holder.x;
        ball.y = HOLD_HEIGHT;
        // In front means toward the other half.
        ball.z = holder.z - side.home_sign() * HOLD_OFFSET;
        ball.vx = 0.0;
        ball.vy = 0.0;
        ball.vz = 0.0;
    }

    /// Gravity, floor bounce and wall reflection for a ball that is not held
    pub fn integrate_ball(ball: &mut Projectile, dt: f32) -> BallContact {
        let mut contact = BallContact::default();

        if !ball.grounded {
            ball.vy -= GRAVITY * dt;
        }

        ball.x += ball.vx * dt;
        ball.y += ball.vy * dt;
        ball.z += ball.vz * dt;

        if ball.y <= BALL_RADIUS {
            contact.floor = true;
            ball.y = BALL_RADIUS;
            ball.vy = -ball.vy * FLOOR_RESTITUTION;
            ball.vx *= FLOOR_FRICTION;
            ball.vz *= FLOOR_FRICTION;
            ball.is_lethal = false;

            if ball.vy.abs() < SETTLE_VERTICAL_SPEED
                && ball.vx.abs() < SETTLE_HORIZONTAL_SPEED
                && ball.vz.abs() < SETTLE_HORIZONTAL_SPEED
            {
                contact.settled = true;
                ball.grounded = true;
                ball.state = BallState::Idle;
                ball.owner = None;
                ball.vx = 0.0;
                ball.vy = 0.0;
                ball.vz = 0.0;
            } else {
                ball.grounded = false;
            }
        } else {
            ball.grounded = false;
        }

        let max_x = HALF_WIDTH - BALL_RADIUS;
        if ball.x > max_x {
            ball.x = max_x;
            ball.vx = -ball.vx * WALL_DAMPING;
            contact.wall = true;
        } else if ball.x < -max_x {
            ball.x = -max_x;
            ball.vx = -ball.vx * WALL_DAMPING;
            contact.wall = true;
        }

        let max_z = HALF_LENGTH - BALL_RADIUS;
        if ball.z > max_z {
            ball.z = max_z;
            ball.vz = -ball.vz * WALL_DAMPING;
            contact.wall = true;
        } else if ball.z < -max_z {
            ball.z = -max_z;
            ball.vz = -ball.vz * WALL_DAMPING;
            contact.wall = true;
        }

        contact
    }

    /// Ball against an upright body: horizontal distance plus a band around chest height
    pub fn check_hit(ball: &Projectile, entity: &Entity) -> bool {
        let dist = ball.horizontal_distance(entity.x, entity.z);
        let dy = (ball.y - CHEST_HEIGHT).abs();
        dist < entity.radius + BALL_RADIUS + HIT_MARGIN && dy < HIT_VERTICAL_BAND
    }
}

fn clamp_or_mid(v: f32, min: f32, max: f32) -> f32 {
    if v.is_finite() {
        v.clamp(min, max)
    } else {
        (min + max) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entities_cannot_cross_the_center_line() {
        let mut player = Entity::new(0.0, 1.0);
        player.vz = -100.0;
        PhysicsSystem::integrate_entity(&mut player, Side::Player, 0.1);
        assert_eq!(player.z, player.radius);

        let mut opponent = Entity::new(0.0, -1.0);
        opponent.vz = 100.0;
        opponent.vx = 100.0;
        PhysicsSystem::integrate_entity(&mut opponent, Side::Opponent, 0.1);
        assert_eq!(opponent.z, -opponent.radius);
        assert_eq!(opponent.x, HALF_WIDTH - opponent.radius);
    }

    #[test]
    fn floor_contact_clears_lethality() {
        let mut ball = Projectile::resting(0, 0.0, 0.0);
        ball.state = BallState::Flying;
        ball.is_lethal = true;
        ball.grounded = false;
        ball.y = BALL_RADIUS + 0.01;
        ball.vy = -10.0;
        ball.vz = 15.0;

        let contact = PhysicsSystem::integrate_ball(&mut ball, 1.0 / 60.0);
        assert!(contact.floor);
        assert!(!ball.is_lethal);
        assert!(ball.vy > 0.0);
        assert_eq!(ball.state, BallState::Flying);
    }

    #[test]
    fn slow_ball_settles_to_idle() {
        let mut ball = Projectile::resting(0, 0.0, 0.0);
        ball.state = BallState::Flying;
        ball.owner = Some(Side::Player);
        ball.grounded = false;
        ball.y = BALL_RADIUS;
        ball.vy = -0.5;
        ball.vx = 0.1;

        let contact = PhysicsSystem::integrate_ball(&mut ball, 1.0 / 60.0);
        assert!(contact.settled);
        assert_eq!(ball.state, BallState::Idle);
        assert_eq!(ball.owner, None);
        assert!(ball.grounded);
    }

    #[test]
    fn walls_reflect_and_damp() {
        let mut ball = Projectile::resting(0, HALF_WIDTH - BALL_RADIUS - 0.01, 0.0);
        ball.state = BallState::Flying;
        ball.grounded = false;
        ball.y = 2.0;
        ball.vx = 10.0;

        let contact = PhysicsSystem::integrate_ball(&mut ball, 0.1);
        assert!(contact.wall);
        assert_eq!(ball.x, HALF_WIDTH - BALL_RADIUS);
        assert!((ball.vx + 8.0).abs() < 1e-4);
    }

    #[test]
    fn held_ball_sits_in_front_of_holder() {
        let holder = Entity::new(1.0, 5.0);
        let mut ball = Projectile::resting(0, 0.0, 0.0);
        ball.vx = 3.0;
        PhysicsSystem::snap_to_holder(&mut ball, &holder, Side::Player);
        assert_eq!((ball.x, ball.y), (1.0, HOLD_HEIGHT));
        assert!(ball.z < holder.z);
        assert_eq!(ball.vx, 0.0);
    }

    #[test]
    fn hit_requires_chest_height_band() {
        let target = Entity::new(0.0, 0.0);
        let mut ball = Projectile::resting(0, 0.2, 0.2);
        ball.y = CHEST_HEIGHT;
        assert!(PhysicsSystem::check_hit(&ball, &target));
        ball.y = CHEST_HEIGHT + HIT_VERTICAL_BAND + 0.1;
        assert!(!PhysicsSystem::check_hit(&ball, &target));
    }
}
