//! Dodgeball Client - headless game client
//!
//! Plays either against the built-in AI (`solo`) or against another client through the
//! relay (`online`). An autopilot stands in for the touch controls and the state of the
//! court is reported through periodic log lines.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dodgeball_arena::config::SyncConfig;
use dodgeball_arena::game::entity::{BallState, Side};
use dodgeball_arena::game::tuning::PLAYER_START_Z;
use dodgeball_arena::game::{Engine, InputHandle, Phase, Snapshot, Vec2};
use dodgeball_arena::net::{SessionCommand, SessionStatus, SessionView, SyncSession};
use dodgeball_arena::store::{LocalStats, MatchReporter};
use dodgeball_arena::util::time::{period, INPUT_TPS, SIMULATION_TPS};

/// Seconds between court reports
const REPORT_EVERY: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "dodgeball-client", version, about = "Headless dodgeball arena client")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Seed for the simulation and the autopilot
    #[arg(long, env = "SEED", global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play against the built-in AI
    Solo {
        /// Matches to play before exiting
        #[arg(long, default_value_t = 1)]
        matches: u32,
    },
    /// Play another client through the relay
    Online(OnlineArgs),
}

#[derive(Args, Debug)]
struct OnlineArgs {
    #[arg(long, env = "RELAY_URL", default_value = "ws://127.0.0.1:8080/ws")]
    relay_url: String,

    /// Durable session id; reuse it to restore a match after a crash
    #[arg(long, env = "SESSION_ID")]
    session_id: Option<String>,

    #[arg(long, env = "USERNAME", default_value = "player")]
    username: String,

    /// Local UDP address for the direct channel
    #[arg(long, env = "DIRECT_BIND")]
    direct_bind: Option<SocketAddr>,

    /// Address the peer should send direct datagrams to
    #[arg(long, env = "DIRECT_ADVERTISE")]
    direct_advertise: Option<SocketAddr>,

    /// Rematches to request after the first match
    #[arg(long, default_value_t = 0)]
    rematches: u32,

    #[arg(long, env = "RELAY_MAX_RETRIES", default_value_t = 5)]
    relay_max_retries: u32,

    #[arg(long, env = "RELAY_BACKOFF_MS", default_value_t = 2000)]
    relay_backoff_ms: u64,

    #[arg(long, env = "DIRECT_TIMEOUT_MS", default_value_t = 3000)]
    direct_timeout_ms: u64,
}

impl OnlineArgs {
    fn sync_config(&self) -> SyncConfig {
        let defaults = SyncConfig::default();
        SyncConfig {
            relay_url: self.relay_url.clone(),
            session_id: self.session_id.clone().unwrap_or(defaults.session_id.clone()),
            username: self.username.clone(),
            direct_bind: self.direct_bind,
            direct_advertise: self.direct_advertise,
            relay_max_retries: self.relay_max_retries,
            relay_backoff: Duration::from_millis(self.relay_backoff_ms),
            direct_timeout: Duration::from_millis(self.direct_timeout_ms),
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let seed = cli.seed.unwrap_or_else(rand::random);
    let stats = LocalStats::new();

    match cli.command {
        Command::Solo { matches } => run_solo(seed, matches, &stats).await,
        Command::Online(args) => run_online(seed, args, &stats).await?,
    }

    let summary = stats.summary();
    info!(
        wins = summary.wins,
        losses = summary.losses,
        last = ?summary.last_result.map(|r| r.finished_at),
        "Client finished"
    );
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn run_solo(seed: u64, matches: u32, stats: &LocalStats) {
    info!(seed, matches, "Starting solo play");

    let input = InputHandle::new();
    let mut engine = Engine::new(seed);
    let mut autopilot = Autopilot::new(seed ^ 0x5eed);
    let mut reporter = MatchReporter::new();
    let mut played = 0;

    engine.start_game();

    let mut ticker = tokio::time::interval(period(SIMULATION_TPS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last = Instant::now();
    let mut last_report = Instant::now();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }

        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f32();
        last = now;

        let world = engine.view();
        autopilot.drive(&world, dt, &input);
        engine.frame(dt, &input);

        if now.duration_since(last_report) >= REPORT_EVERY {
            last_report = now;
            report("solo", &engine.view());
        }

        if reporter.observe(engine.match_state(), stats).is_some() {
            played += 1;
            report("solo", &engine.view());
            if played >= matches {
                break;
            }
            engine.restart_match();
        }
    }
}

async fn run_online(seed: u64, args: OnlineArgs, stats: &LocalStats) -> anyhow::Result<()> {
    let config = args.sync_config();
    info!(
        relay = %config.relay_url,
        session_id = %config.session_id,
        direct = ?config.direct_bind,
        "Starting online play"
    );

    let input = InputHandle::new();
    let session = SyncSession::new(config, seed, input.clone(), Arc::new(stats.clone()));
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (view_tx, mut view_rx) = watch::channel(session.view());
    let mut task = tokio::spawn(session.run(cmd_rx, view_tx));

    let mut autopilot = Autopilot::new(seed ^ 0x5eed);
    let mut ticker = tokio::time::interval(period(INPUT_TPS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last = Instant::now();
    let mut last_report = Instant::now();
    let mut rematches_left = args.rematches;
    let mut handled_match_over = false;
    let mut stopping = false;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut task => {
                return match result? {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        warn!(error = %e, "Session ended with an error");
                        Err(e.into())
                    }
                };
            }
            _ = &mut ctrl_c, if !stopping => {
                info!("Interrupted");
                stopping = true;
                let _ = cmd_tx.send(SessionCommand::Shutdown).await;
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f32();
                last = now;

                let view: SessionView = view_rx.borrow_and_update().clone();
                if view.status == SessionStatus::InMatch {
                    autopilot.drive(&view.world, dt, &input);
                }

                if now.duration_since(last_report) >= REPORT_EVERY {
                    last_report = now;
                    info!(status = ?view.status, role = ?view.role, code = ?view.code, link = ?view.link, "Session");
                    if view.role.is_some() {
                        report("online", &view.world);
                    }
                }

                if stopping {
                    continue;
                }
                if view.status == SessionStatus::MatchEnded {
                    info!("Match ended by the opponent");
                    stopping = true;
                    let _ = cmd_tx.send(SessionCommand::Shutdown).await;
                    continue;
                }

                let over = view.role.is_some() && view.world.game.phase == Phase::MatchOver;
                if !over {
                    handled_match_over = false;
                } else if !handled_match_over {
                    handled_match_over = true;
                    report("online", &view.world);
                    if rematches_left > 0 {
                        rematches_left -= 1;
                        let _ = cmd_tx.send(SessionCommand::RequestRematch).await;
                    } else {
                        stopping = true;
                        let _ = cmd_tx.send(SessionCommand::Shutdown).await;
                    }
                }
            }
        }
    }
}

fn report(label: &str, world: &Snapshot) {
    let game = &world.game;
    info!(
        mode = label,
        tick = world.tick,
        phase = ?game.phase,
        round = game.round,
        score = %format!("{}-{}", game.player_score, game.opponent_score),
        lives = %format!("{}-{}", game.player_lives, game.opponent_lives),
        winner = ?game.winner,
        player = %format!("({:.1}, {:.1})", world.player.x, world.player.z),
        opponent = %format!("({:.1}, {:.1})", world.opponent.x, world.opponent.z),
        "Court"
    );
}

/// Fills the input snapshot from what the local player can see.
/// Works in the local view: own half is positive Z, the opponent is at negative Z.
struct Autopilot {
    rng: ChaCha8Rng,
    aim_timer: f32,
}

impl Autopilot {
    const THROW_LINE_Z: f32 = 3.0;
    const DODGE_CHANCE: f64 = 0.2;

    fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            aim_timer: 1.0,
        }
    }

    fn drive(&mut self, world: &Snapshot, dt: f32, input: &InputHandle) {
        if world.game.phase != Phase::Playing || world.game.countdown > 0.0 {
            input.set_joystick(Vec2::default());
            return;
        }
        let me = &world.player;

        let threat = world.balls.iter().any(|b| {
            b.state == BallState::Flying
                && b.is_lethal
                && b.owner == Some(Side::Opponent)
                && (b.x - me.x).abs() < 1.5
                && b.z < me.z
                && me.z - b.z < 4.0
        });
        if threat && me.cooldown <= 0.0 && self.rng.gen_bool(Self::DODGE_CHANCE) {
            let side = if me.x > 0.0 { -1.0 } else { 1.0 };
            input.set_joystick(Vec2::new(side, 0.0));
            input.press_dodge();
            return;
        }

        if me.holding_ball_id.is_some() {
            let opponent = &world.opponent;
            input.set_joystick(toward(me.x, me.z, opponent.x, Self::THROW_LINE_Z));
            self.aim_timer -= dt;
            if self.aim_timer <= 0.0 && me.cooldown <= 0.0 {
                input.press_throw();
                self.aim_timer = self.rng.gen_range(0.5..1.5);
            }
            return;
        }

        let target = world
            .balls
            .iter()
            .filter(|b| b.z > 0.0)
            .filter(|b| b.state == BallState::Idle || (b.state == BallState::Flying && !b.is_lethal))
            .min_by(|a, b| {
                let da = (a.x - me.x).powi(2) + (a.z - me.z).powi(2);
                let db = (b.x - me.x).powi(2) + (b.z - me.z).powi(2);
                da.total_cmp(&db)
            });

        let steer = match target {
            Some(ball) => toward(me.x, me.z, ball.x, ball.z),
            None => toward(me.x, me.z, 0.0, PLAYER_START_Z),
        };
        input.set_joystick(steer);
    }
}

fn toward(x: f32, z: f32, tx: f32, tz: f32) -> Vec2 {
    let (dx, dz) = (tx - x, tz - z);
    let len = (dx * dx + dz * dz).sqrt();
    if len < 0.2 {
        return Vec2::default();
    }
    Vec2::new(dx / len, dz / len)
}
