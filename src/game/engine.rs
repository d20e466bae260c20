//! Fixed-step gameplay engine, mode-aware: solo against the bot, authoritative host, or
//! a client mirror that only takes snapshots.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::ai::BotBrain;
use super::clock::FixedStepClock;
use super::combat::{CombatSystem, HitResult, Pickup};
use super::entity::{spawn_balls, BallState, Entity, Projectile, Side};
use super::events::{EventKind, EventLog};
use super::input::{Actions, InputHandle, RemoteInput, Vec2};
use super::physics::PhysicsSystem;
use super::r#match::{MatchState, Phase, RoundOutcome};
use super::snapshot::{BallSnapshot, EntitySnapshot, MatchSnapshot, Snapshot, SnapshotError};
use super::tuning::{
    DODGE_COOLDOWN, DODGE_INVULNERABLE, DODGE_LOCK, DODGE_SPEED, EVENT_LOG_CAPACITY,
    HIT_SLOW_MOTION, HIT_TIME_SCALE, KILL_SLOW_MOTION, KILL_TIME_SCALE, PLAYER_SPEED,
    SNAPSHOT_EVENTS,
};

/// Who drives what
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Local player against the bot
    #[default]
    Single,
    /// Authoritative; the opponent entity follows remote input
    Host,
    /// Mirror only; state arrives in snapshots
    Client,
}

#[derive(Debug, Clone, Copy)]
struct PendingRound {
    winner: Side,
    /// Real seconds
    remaining: f32,
}

pub struct Engine {
    mode: Mode,
    player: Entity,
    opponent: Entity,
    balls: Vec<Projectile>,
    events: EventLog,
    state: MatchState,
    bot: BotBrain,
    remote: RemoteInput,
    clock: FixedStepClock,
    pending_round: Option<PendingRound>,
    rng: ChaCha8Rng,
    tick: u64,
    elapsed: f32,
}

impl Engine {
    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let balls = spawn_balls(&mut rng);
        Self {
            mode: Mode::Single,
            player: Entity::spawn(Side::Player),
            opponent: Entity::spawn(Side::Opponent),
            balls,
            events: EventLog::new(EVENT_LOG_CAPACITY),
            state: MatchState::default(),
            bot: BotBrain::new(),
            remote: RemoteInput::default(),
            clock: FixedStepClock::default(),
            pending_round: None,
            rng,
            tick: 0,
            elapsed: 0.0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }
        info!(from = ?self.mode, to = ?mode, "Engine mode changed");
        self.mode = mode;
        self.remote.reset();
        self.pending_round = None;
        self.clock.reset();
        if mode == Mode::Client {
            // The host numbers events from its own counter.
            self.events.reset();
        }
    }

    /// Fresh match from round 1
    pub fn start_game(&mut self) {
        self.state.start_match();
        self.pending_round = None;
        self.events.clear();
        self.reset_positions();
        info!(mode = ?self.mode, "Match started");
    }

    /// Rematch: scores, lives and rounds back to zero, one reset
    pub fn restart_match(&mut self) {
        info!(mode = ?self.mode, "Match restarted");
        self.start_game();
    }

    pub fn return_to_menu(&mut self) {
        self.state.reset_to_menu();
        self.pending_round = None;
        self.remote.reset();
        self.events.clear();
        self.reset_positions();
    }

    fn reset_positions(&mut self) {
        self.player = Entity::spawn(Side::Player);
        self.opponent = Entity::spawn(Side::Opponent);
        self.balls = spawn_balls(&mut self.rng);
        self.bot.reset();
        self.remote.release();
        self.clock.reset();
    }

    /// Advance by one real frame. Runs the real-time timers, then as many fixed steps as
    /// the scaled frame time allows. Returns the number of steps run.
    pub fn frame(&mut self, real_dt: f32, input: &InputHandle) -> u32 {
        if self.mode == Mode::Client {
            return 0;
        }
        let dt = FixedStepClock::cap(real_dt);

        match self.state.phase {
            Phase::Playing => {}
            Phase::RoundOver => {
                if self.state.advance_intermission(dt) {
                    self.state.next_round();
                    self.reset_positions();
                    info!(round = self.state.round, "Round started");
                }
                return 0;
            }
            Phase::Menu | Phase::MatchOver => return 0,
        }

        self.state.advance_real_time(dt);

        if let Some(pending) = self.pending_round.as_mut() {
            pending.remaining -= dt;
            if pending.remaining <= 0.0 {
                let winner = pending.winner;
                self.resolve_round(winner);
                return 0;
            }
        }

        let steps = self.clock.advance(dt, self.state.time_scale);
        let step = self.clock.step();
        for _ in 0..steps {
            self.update(step, input);
        }
        steps
    }

    /// One fixed simulation step
    pub fn update(&mut self, dt: f32, input: &InputHandle) {
        if self.mode == Mode::Client || !self.state.is_live() {
            return;
        }
        self.tick += 1;
        self.elapsed += dt;

        tick_timers(&mut self.player, dt);
        tick_timers(&mut self.opponent, dt);

        let (steer, actions) = input.take();
        self.drive(Side::Player, steer, actions);
        match self.mode {
            Mode::Single => self.drive_bot(dt),
            Mode::Host => {
                let steer = self.remote.steer();
                let actions = self.remote.take_actions();
                self.drive(Side::Opponent, steer, actions);
            }
            Mode::Client => {}
        }

        PhysicsSystem::integrate_entity(&mut self.player, Side::Player, dt);
        PhysicsSystem::integrate_entity(&mut self.opponent, Side::Opponent, dt);

        self.step_balls(dt);
        self.resolve_hits();
    }

    /// Apply steering and actions for a human-controlled entity. `steer` is world frame.
    fn drive(&mut self, side: Side, steer: Vec2, actions: Actions) {
        let (me, target) = pair(&mut self.player, &mut self.opponent, side);
        me.steer = steer;

        if me.is_stunned() {
            me.vx = 0.0;
            me.vz = 0.0;
            return;
        }

        if me.cooldown <= DODGE_COOLDOWN - DODGE_LOCK {
            me.vx = steer.x * PLAYER_SPEED;
            me.vz = steer.y * PLAYER_SPEED;
        }

        if actions.dodge && me.cooldown <= 0.0 {
            let (mut dx, mut dz) = (steer.x, steer.y);
            if dx.abs() < 0.1 && dz.abs() < 0.1 {
                // Standing still: dodge back toward the own back line.
                dx = 0.0;
                dz = side.home_sign();
            }
            let len = (dx * dx + dz * dz).sqrt();
            me.vx = dx / len * DODGE_SPEED;
            me.vz = dz / len * DODGE_SPEED;
            start_dodge(me);
        }

        if actions.throw {
            let dir = CombatSystem::aim(me, target, steer, 0.0);
            if CombatSystem::throw(me, side, &mut self.balls, dir).is_some() {
                self.events.push(EventKind::Throw, me.x, me.z, Some(side), None);
            }
        }

        auto_pickup(me, side, &mut self.balls, &mut self.events);
    }

    fn drive_bot(&mut self, dt: f32) {
        if self.opponent.is_stunned() {
            self.opponent.vx = 0.0;
            self.opponent.vz = 0.0;
            return;
        }

        let intent = self
            .bot
            .think(&self.opponent, &self.balls, dt, self.elapsed, &mut self.rng);

        let me = &mut self.opponent;
        me.vx = intent.vx;
        me.vz = intent.vz;
        if intent.dodge {
            start_dodge(me);
        }

        if let Some(jitter) = intent.throw {
            let dir = CombatSystem::aim(me, &self.player, Vec2::ZERO, jitter);
            if CombatSystem::throw(me, Side::Opponent, &mut self.balls, dir).is_some() {
                self.events
                    .push(EventKind::Throw, me.x, me.z, Some(Side::Opponent), None);
            }
        }

        auto_pickup(me, Side::Opponent, &mut self.balls, &mut self.events);
    }

    fn step_balls(&mut self, dt: f32) {
        for ball in self.balls.iter_mut() {
            if ball.state == BallState::Held {
                match ball.owner {
                    Some(Side::Player) => {
                        PhysicsSystem::snap_to_holder(ball, &self.player, Side::Player)
                    }
                    Some(Side::Opponent) => {
                        PhysicsSystem::snap_to_holder(ball, &self.opponent, Side::Opponent)
                    }
                    None => {
                        // Held without an owner cannot be pinned anywhere; let it fall.
                        ball.state = BallState::Flying;
                        ball.is_lethal = false;
                        PhysicsSystem::integrate_ball(ball, dt);
                    }
                }
            } else {
                PhysicsSystem::integrate_ball(ball, dt);
            }
        }
    }

    /// Hits are resolved in pool order so simultaneous hits have a fixed winner
    fn resolve_hits(&mut self) {
        for id in 0..self.balls.len() {
            for victim in [Side::Player, Side::Opponent] {
                let entity = match victim {
                    Side::Player => &self.player,
                    Side::Opponent => &self.opponent,
                };
                let ball = &self.balls[id];
                if !CombatSystem::can_hit(ball, entity, victim)
                    || !PhysicsSystem::check_hit(ball, entity)
                {
                    continue;
                }

                let hit = HitResult {
                    ball_id: id,
                    victim,
                    x: entity.x,
                    z: entity.z,
                };
                CombatSystem::deflect(&mut self.balls[id], &mut self.rng);
                self.on_hit(hit);
                break;
            }
        }
    }

    fn on_hit(&mut self, hit: HitResult) {
        if self.pending_round.is_some() {
            debug!(ball_id = hit.ball_id, victim = ?hit.victim, "Hit after killing blow ignored");
            return;
        }

        let (victim, _) = pair(&mut self.player, &mut self.opponent, hit.victim);
        CombatSystem::stun(victim);

        let text = match hit.victim {
            Side::Player => "OOF!",
            Side::Opponent => "BONK!",
        };
        self.events
            .push(EventKind::Hit, hit.x, hit.z, Some(hit.victim), Some(text));

        let lives = self.state.lose_life(hit.victim);
        debug!(ball_id = hit.ball_id, victim = ?hit.victim, lives, "Hit");

        if lives == 0 {
            self.state.slow_motion(KILL_TIME_SCALE, KILL_SLOW_MOTION);
            self.pending_round = Some(PendingRound {
                winner: hit.victim.other(),
                remaining: KILL_SLOW_MOTION,
            });
        } else {
            self.state.slow_motion(HIT_TIME_SCALE, HIT_SLOW_MOTION);
        }
    }

    fn resolve_round(&mut self, winner: Side) {
        self.pending_round = None;
        let outcome = self.state.win_round(winner);
        info!(
            winner = ?winner,
            player_score = self.state.player_score,
            opponent_score = self.state.opponent_score,
            "Round over"
        );
        if let RoundOutcome::MatchWon(side) = outcome {
            info!(winner = ?side, "Match over");
        }
        self.events.clear();
        self.reset_positions();
    }

    /// Input from the remote client, in its own frame. False when dropped as stale.
    pub fn set_remote_input(&mut self, seq: u32, joystick: Vec2, throw: bool, dodge: bool) -> bool {
        self.remote.accept(seq, joystick, throw, dodge)
    }

    /// Stop the remote-driven entity, e.g. while its owner is reconnecting
    pub fn release_remote_input(&mut self) {
        self.remote.release();
    }

    /// Forget the remote sequence position. A restarted client numbers its input from 1.
    pub fn reset_remote_input(&mut self) {
        self.remote.reset();
    }

    /// Client: accept the next host's tick and event numbering from scratch
    pub fn resync_mirror(&mut self) {
        self.events.reset();
    }

    /// Read-only view of the whole world, for presentation and replication
    pub fn view(&self) -> Snapshot {
        Snapshot {
            tick: self.tick,
            player: EntitySnapshot::from(&self.player),
            opponent: EntitySnapshot::from(&self.opponent),
            balls: self.balls.iter().map(BallSnapshot::from).collect(),
            events: self.events.latest(SNAPSHOT_EVENTS),
            game: MatchSnapshot::from(&self.state),
        }
    }

    /// Overwrite the mirror with an authoritative snapshot already in the local frame.
    /// Invalid snapshots leave the last good state untouched.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        snapshot.validate()?;

        snapshot.player.apply_to(&mut self.player);
        snapshot.opponent.apply_to(&mut self.opponent);

        let mut balls: Vec<Projectile> =
            snapshot.balls.iter().map(BallSnapshot::to_projectile).collect();
        balls.sort_by_key(|b| b.id);
        self.balls = balls;

        self.events.merge(&snapshot.events);
        snapshot.game.apply_to(&mut self.state);
        self.tick = snapshot.tick;
        Ok(())
    }

    pub fn player(&self) -> &Entity {
        &self.player
    }

    pub fn opponent(&self) -> &Entity {
        &self.opponent
    }

    pub fn balls(&self) -> &[Projectile] {
        &self.balls
    }

    pub fn match_state(&self) -> &MatchState {
        &self.state
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Winner of a round whose killing blow is still playing out
    pub fn pending_round(&self) -> Option<Side> {
        self.pending_round.map(|p| p.winner)
    }
}

fn pair<'a>(
    player: &'a mut Entity,
    opponent: &'a mut Entity,
    side: Side,
) -> (&'a mut Entity, &'a mut Entity) {
    match side {
        Side::Player => (player, opponent),
        Side::Opponent => (opponent, player),
    }
}

fn tick_timers(entity: &mut Entity, dt: f32) {
    entity.stun_timer = (entity.stun_timer - dt).max(0.0);
    entity.invulnerable = (entity.invulnerable - dt).max(0.0);
    entity.cooldown = (entity.cooldown - dt).max(0.0);
}

fn start_dodge(entity: &mut Entity) {
    entity.cooldown = DODGE_COOLDOWN;
    entity.invulnerable = entity.invulnerable.max(DODGE_INVULNERABLE);
}

fn auto_pickup(entity: &mut Entity, side: Side, balls: &mut [Projectile], events: &mut EventLog) {
    if entity.is_stunned() {
        return;
    }
    match CombatSystem::try_pickup(entity, side, balls) {
        Some(Pickup::Collected(_)) => {
            events.push(EventKind::Pickup, entity.x, entity.z, Some(side), None)
        }
        Some(Pickup::Caught(_)) => {
            events.push(EventKind::Catch, entity.x, entity.z, Some(side), Some("CATCH!"))
        }
        None => {}
    }
}
