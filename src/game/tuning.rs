//! Court geometry and gameplay tuning

// Court: X spans COURT_WIDTH, Z spans COURT_LENGTH; the player owns +Z, the opponent -Z.
pub const COURT_WIDTH: f32 = 10.0;
pub const COURT_LENGTH: f32 = 18.0;
pub const HALF_WIDTH: f32 = COURT_WIDTH / 2.0;
pub const HALF_LENGTH: f32 = COURT_LENGTH / 2.0;

pub const PLAYER_RADIUS: f32 = 0.5;
pub const BALL_RADIUS: f32 = 0.3;
pub const BALL_COUNT: usize = 5;
/// Balls respawn on the center line at a random X within this span.
pub const BALL_SPAWN_SPREAD: f32 = 3.0;

pub const PLAYER_START_Z: f32 = 6.0;

// Movement
pub const PLAYER_SPEED: f32 = 8.0;
pub const BOT_SPEED: f32 = 5.0;
pub const DODGE_SPEED: f32 = 18.0;
pub const DODGE_COOLDOWN: f32 = 1.0;
/// Movement input is ignored for this long after a dodge starts.
pub const DODGE_LOCK: f32 = 0.3;
pub const DODGE_INVULNERABLE: f32 = 0.35;

// Ball flight
pub const GRAVITY: f32 = 25.0;
pub const THROW_FORCE: f32 = 20.0;
pub const THROW_UP_FORCE: f32 = 6.0;
/// How far lateral steering bends a throw.
pub const THROW_STEER_BLEND: f32 = 0.5;
pub const FLOOR_RESTITUTION: f32 = 0.6;
pub const FLOOR_FRICTION: f32 = 0.92;
pub const WALL_DAMPING: f32 = 0.8;
pub const SETTLE_VERTICAL_SPEED: f32 = 2.0;
pub const SETTLE_HORIZONTAL_SPEED: f32 = 0.5;

// Holding
pub const PICKUP_RANGE: f32 = 1.5;
pub const HOLD_OFFSET: f32 = 0.8;
pub const HOLD_HEIGHT: f32 = 1.0;

// Hits
pub const CHEST_HEIGHT: f32 = 1.0;
pub const HIT_VERTICAL_BAND: f32 = 1.2;
pub const HIT_MARGIN: f32 = 0.2;
pub const STUN_DURATION: f32 = 1.5;
pub const INVULNERABLE_GRACE: f32 = 0.5;
pub const DEFLECT_SPEED_FACTOR: f32 = 0.5;
pub const DEFLECT_JITTER: f32 = std::f32::consts::FRAC_PI_4;
pub const DEFLECT_POP: f32 = 8.0;

// Slow motion, in real seconds
pub const HIT_TIME_SCALE: f32 = 0.3;
pub const HIT_SLOW_MOTION: f32 = 0.25;
pub const KILL_TIME_SCALE: f32 = 0.1;
pub const KILL_SLOW_MOTION: f32 = 1.5;

// Match rules
pub const STARTING_LIVES: u8 = 3;
pub const ROUNDS_TO_WIN: u8 = 2;
pub const ROUND_COUNTDOWN: f32 = 3.0;
pub const ROUND_INTERMISSION: f32 = 2.0;

// Opponent AI. Deliberately forgiving.
pub const BOT_DODGE_CHANCE: f64 = 0.01;
pub const BOT_DODGE_DURATION: f32 = 0.3;
pub const BOT_DODGE_GATE_X: f32 = 2.0;
pub const BOT_DODGE_GATE_Z: f32 = 4.0;
pub const BOT_AIM_DELAY_MIN: f32 = 1.0;
pub const BOT_AIM_DELAY_MAX: f32 = 2.5;
pub const BOT_THROW_JITTER: f32 = 0.5;
pub const BOT_THROW_LINE_Z: f32 = -3.0;
pub const BOT_STAGING_Z: f32 = -4.0;
pub const BOT_STRAFE_SPEED: f32 = 2.0;
/// Balls past this Z are on the player's side and not worth chasing.
pub const BOT_SEEK_LIMIT_Z: f32 = 1.0;

// Presentation
pub const EVENT_LOG_CAPACITY: usize = 20;
pub const SNAPSHOT_EVENTS: usize = 5;
