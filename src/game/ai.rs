//! Single-player opponent: a four-state machine that seeks, aims, throws and
//! occasionally dodges. Tuned to be beatable.

use rand::Rng;

use super::entity::{BallState, Entity, Projectile, Side};
use super::tuning::{
    BOT_AIM_DELAY_MAX, BOT_AIM_DELAY_MIN, BOT_DODGE_CHANCE, BOT_DODGE_DURATION, BOT_DODGE_GATE_X,
    BOT_DODGE_GATE_Z, BOT_SEEK_LIMIT_Z, BOT_SPEED, BOT_STAGING_Z, BOT_STRAFE_SPEED,
    BOT_THROW_JITTER, BOT_THROW_LINE_Z, DODGE_SPEED,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Idle,
    Seeking,
    Attacking,
    Dodging,
}

/// What the bot wants to do this step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BotIntent {
    pub vx: f32,
    pub vz: f32,
    /// Lateral aim error to add when throwing this step
    pub throw: Option<f32>,
    /// Start a dodge (velocity already set in vx/vz)
    pub dodge: bool,
}

/// Opponent brain. Always plays the `Side::Opponent` half.
#[derive(Debug, Clone)]
pub struct BotBrain {
    state: BotState,
    action_timer: f32,
    target_ball: Option<usize>,
}

impl Default for BotBrain {
    fn default() -> Self {
        Self::new()
    }
}

impl BotBrain {
    pub fn new() -> Self {
        Self {
            state: BotState::Idle,
            action_timer: 0.0,
            target_ball: None,
        }
    }

    pub fn state(&self) -> BotState {
        self.state
    }

    pub fn target_ball(&self) -> Option<usize> {
        self.target_ball
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// A lethal player throw in the bot's half, closing in, and close enough to matter
    pub fn incoming_threat<'a>(me: &Entity, balls: &'a [Projectile]) -> Option<&'a Projectile> {
        balls.iter().find(|b| {
            b.state == BallState::Flying
                && b.is_lethal
                && b.owner == Some(Side::Player)
                && b.z < 0.0
                && b.vz < 0.0
                && (b.x - me.x).abs() < BOT_DODGE_GATE_X
                && (b.z - me.z).abs() < BOT_DODGE_GATE_Z
        })
    }

    /// Advance the state machine one step. `clock` is simulation time, used for strafing.
    pub fn think<R: Rng>(
        &mut self,
        me: &Entity,
        balls: &[Projectile],
        dt: f32,
        clock: f32,
        rng: &mut R,
    ) -> BotIntent {
        let mut intent = BotIntent {
            vx: me.vx,
            vz: me.vz,
            throw: None,
            dodge: false,
        };

        if self.state != BotState::Dodging && me.cooldown <= 0.0 {
            if let Some(ball) = Self::incoming_threat(me, balls) {
                if rng.gen_bool(BOT_DODGE_CHANCE) {
                    let dir = if ball.x > me.x { -1.0 } else { 1.0 };
                    self.state = BotState::Dodging;
                    self.action_timer = BOT_DODGE_DURATION;
                    intent.vx = dir * DODGE_SPEED;
                    intent.vz = 0.0;
                    intent.dodge = true;
                    return intent;
                }
            }
        }

        match self.state {
            BotState::Dodging => {
                self.action_timer -= dt;
                if self.action_timer <= 0.0 {
                    self.state = BotState::Idle;
                    intent.vx = 0.0;
                    intent.vz = 0.0;
                }
            }
            BotState::Idle => {
                if me.holding_ball_id.is_some() {
                    self.begin_attack(rng);
                } else {
                    self.state = BotState::Seeking;
                }
            }
            BotState::Seeking => {
                if me.holding_ball_id.is_some() {
                    self.target_ball = None;
                    self.begin_attack(rng);
                    return intent;
                }

                self.target_ball = Self::nearest_reachable(me, balls);
                let (tx, tz) = match self.target_ball.and_then(|id| balls.get(id)) {
                    Some(ball) => (ball.x, ball.z),
                    None => (0.0, BOT_STAGING_Z),
                };
                let (vx, vz) = steer_towards(me, tx, tz, BOT_SPEED);
                intent.vx = vx;
                intent.vz = vz;
            }
            BotState::Attacking => {
                let dz = BOT_THROW_LINE_Z - me.z;
                if dz.abs() > 0.5 {
                    intent.vz = dz.signum() * BOT_SPEED;
                    intent.vx = (clock * 2.0).sin() * BOT_STRAFE_SPEED;
                } else {
                    intent.vx = 0.0;
                    intent.vz = 0.0;
                }

                self.action_timer -= dt;
                if self.action_timer <= 0.0 {
                    if me.holding_ball_id.is_some() {
                        let jitter = (rng.gen::<f32>() - 0.5) * BOT_THROW_JITTER;
                        intent.throw = Some(jitter);
                    }
                    self.state = BotState::Idle;
                }
            }
        }

        intent
    }

    fn begin_attack<R: Rng>(&mut self, rng: &mut R) {
        self.state = BotState::Attacking;
        self.action_timer = rng.gen_range(BOT_AIM_DELAY_MIN..BOT_AIM_DELAY_MAX);
    }

    /// Nearest idle or spent ball on the bot's side of the court
    fn nearest_reachable(me: &Entity, balls: &[Projectile]) -> Option<usize> {
        balls
            .iter()
            .filter(|b| b.is_collectable() && b.z < BOT_SEEK_LIMIT_Z)
            .map(|b| (b.id, b.horizontal_distance(me.x, me.z)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }
}

fn steer_towards(me: &Entity, tx: f32, tz: f32, speed: f32) -> (f32, f32) {
    let dx = tx - me.x;
    let dz = tz - me.z;
    let len = (dx * dx + dz * dz).sqrt();
    if len > 0.1 {
        (dx / len * speed, dz / len * speed)
    } else {
        (0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(11)
    }

    #[test]
    fn empty_handed_bot_seeks_nearest_ball_on_its_side() {
        let mut brain = BotBrain::new();
        let me = Entity::new(0.0, -6.0);
        let balls = vec![
            Projectile::resting(0, 0.0, 5.0),
            Projectile::resting(1, 2.0, -2.0),
            Projectile::resting(2, -1.0, 0.0),
        ];
        let mut rng = rng();

        brain.think(&me, &balls, 1.0 / 60.0, 0.0, &mut rng);
        assert_eq!(brain.state(), BotState::Seeking);

        let intent = brain.think(&me, &balls, 1.0 / 60.0, 0.0, &mut rng);
        assert_eq!(brain.target_ball(), Some(1));
        assert!(intent.vz > 0.0);
        assert!(intent.vx > 0.0);
    }

    #[test]
    fn without_balls_bot_heads_to_staging_point() {
        let mut brain = BotBrain::new();
        let me = Entity::new(3.0, -8.0);
        let mut rng = rng();
        brain.think(&me, &[], 0.016, 0.0, &mut rng);
        let intent = brain.think(&me, &[], 0.016, 0.0, &mut rng);
        assert!(intent.vx < 0.0);
        assert!(intent.vz > 0.0);
    }

    #[test]
    fn holding_bot_attacks_then_throws_after_aim_delay() {
        let mut brain = BotBrain::new();
        let mut me = Entity::new(0.0, BOT_THROW_LINE_Z);
        me.holding_ball_id = Some(0);
        let mut rng = rng();

        brain.think(&me, &[], 0.1, 0.0, &mut rng);
        assert_eq!(brain.state(), BotState::Attacking);

        let mut thrown = None;
        for _ in 0..30 {
            let intent = brain.think(&me, &[], 0.1, 0.0, &mut rng);
            if let Some(jitter) = intent.throw {
                thrown = Some(jitter);
                break;
            }
        }
        let jitter = thrown.expect("bot should throw within the aim window");
        assert!(jitter.abs() <= BOT_THROW_JITTER / 2.0);
        assert_eq!(brain.state(), BotState::Idle);
    }

    #[test]
    fn only_lethal_converging_nearby_throws_are_threats() {
        let me = Entity::new(0.0, -5.0);
        let mut ball = Projectile::resting(0, 0.5, -3.0);
        ball.state = BallState::Flying;
        ball.owner = Some(Side::Player);
        ball.is_lethal = true;
        ball.vz = -15.0;
        assert!(BotBrain::incoming_threat(&me, std::slice::from_ref(&ball)).is_some());

        let mut spent = ball.clone();
        spent.is_lethal = false;
        assert!(BotBrain::incoming_threat(&me, std::slice::from_ref(&spent)).is_none());

        let mut receding = ball.clone();
        receding.vz = 15.0;
        assert!(BotBrain::incoming_threat(&me, std::slice::from_ref(&receding)).is_none());

        let mut wide = ball.clone();
        wide.x = 4.0;
        assert!(BotBrain::incoming_threat(&me, std::slice::from_ref(&wide)).is_none());
    }

    #[test]
    fn dodge_is_rare_but_happens_under_sustained_threat() {
        let me = Entity::new(0.0, -5.0);
        let mut ball = Projectile::resting(0, 0.5, -3.0);
        ball.state = BallState::Flying;
        ball.owner = Some(Side::Player);
        ball.is_lethal = true;
        ball.vz = -15.0;
        let balls = vec![ball];

        let mut rng = rng();
        let mut brain = BotBrain::new();
        let dodged = (0..2000).any(|_| brain.think(&me, &balls, 0.016, 0.0, &mut rng).dodge);
        assert!(dodged);
        assert_eq!(brain.state(), BotState::Dodging);
    }
}
