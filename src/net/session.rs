//! Multiplayer session driver.
//!
//! One task owns the engine, both transports and every timer. Inbound relay events,
//! direct datagrams, timer ticks and user commands are serialized through a single
//! `select!` loop, so no handler ever runs concurrently with another.
//!
//! Handlers are synchronous and queue their outbound traffic in `outgoing`; the loop
//! flushes it after every wake-up. Peer payloads are dual-cast: to the relay whenever it
//! is up and to the direct channel whenever a peer address is known.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::game::snapshot::Snapshot;
use crate::game::{Engine, InputHandle, Mode, Phase};
use crate::net::direct::{Datagram, DirectChannel};
use crate::net::link::{Link, LinkEvent, LinkState};
use crate::net::perspective::invert;
use crate::net::relay::{RelayClient, RelayError, RelayEvent, RelaySettings};
use crate::net::rematch::{Rematch, RematchAction};
use crate::store::{MatchReporter, StatsRecorder};
use crate::util::time::{period, SIMULATION_TPS};
use crate::ws::protocol::{ClientMsg, InputPayload, PeerPayload, Role, ServerMsg};

const INBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Relay not reached yet
    Connecting,
    /// Waiting in the pairing queue
    Queued,
    InMatch,
    /// Opponent transport dropped, grace window running
    OpponentReconnecting,
    /// Opponent left or never came back; back at the menu
    MatchEnded,
    /// Relay retries exhausted
    Failed,
    Closed,
}

/// Requests from the embedding application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    RequestRematch,
    LeaveMatch,
    Shutdown,
}

/// Everything a presentation layer needs, in the local player's frame
#[derive(Debug, Clone)]
pub struct SessionView {
    pub status: SessionStatus,
    pub role: Option<Role>,
    pub code: Option<String>,
    pub link: LinkState,
    pub world: Snapshot,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Queued outbound traffic
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Relay-only control message
    Relay(ClientMsg),
    /// Dual-cast to the peer
    Peer(PeerPayload),
}

/// Where an inbound peer payload arrived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Relay,
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct SyncSession {
    config: SyncConfig,
    engine: Engine,
    input: InputHandle,
    role: Option<Role>,
    code: Option<String>,
    status: SessionStatus,
    link: Link,
    rematch: Rematch,
    /// Newest host tick applied on the client
    last_applied_tick: Option<u64>,
    input_seq: u32,
    reporter: MatchReporter,
    stats: Arc<dyn StatsRecorder>,
    outgoing: Vec<Outgoing>,
    relay: Option<RelayClient>,
    direct: Option<DirectChannel>,
    /// Our own direct address, advertised in `direct_offer`
    offer: Option<SocketAddr>,
}

impl SyncSession {
    pub fn new(config: SyncConfig, seed: u64, input: InputHandle, stats: Arc<dyn StatsRecorder>) -> Self {
        Self {
            config,
            engine: Engine::new(seed),
            input,
            role: None,
            code: None,
            status: SessionStatus::Connecting,
            link: Link::new(),
            rematch: Rematch::new(),
            last_applied_tick: None,
            input_seq: 0,
            reporter: MatchReporter::new(),
            stats,
            outgoing: Vec::new(),
            relay: None,
            direct: None,
            offer: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            status: self.status,
            role: self.role,
            code: self.code.clone(),
            link: self.link.state(),
            world: self.engine.view(),
        }
    }

    /// Drain queued outbound traffic without sending it
    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outgoing)
    }

    /// Drive the session until shutdown, relay failure or the command channel closes
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        views: watch::Sender<SessionView>,
    ) -> Result<(), SessionError> {
        let (relay_tx, mut relay_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (direct_tx, mut direct_rx) = mpsc::channel::<Datagram>(INBOUND_CAPACITY);

        self.relay = Some(RelayClient::spawn(RelaySettings::from(&self.config), relay_tx));

        if let Some(bind) = self.config.direct_bind {
            match DirectChannel::bind(
                bind,
                self.config.direct_advertise,
                self.config.direct_timeout,
                direct_tx,
            )
            .await
            {
                Ok(channel) => {
                    self.offer = Some(channel.advertised_addr());
                    self.direct = Some(channel);
                }
                Err(e) => warn!(error = %e, "Direct channel unavailable, relay only"),
            }
        } else {
            drop(direct_tx);
        }

        let mut frame = interval(period(SIMULATION_TPS));
        let mut snapshots = interval(self.config.snapshot_interval);
        let mut inputs = interval(self.config.input_interval);
        let mut pings = interval(self.config.ping_interval);
        let mut link_checks = interval(self.config.link_check_interval);
        for timer in [&mut frame, &mut snapshots, &mut inputs, &mut pings, &mut link_checks] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        let mut last_frame = Instant::now();
        let mut result = Ok(());

        info!(session_id = %self.config.session_id, "Sync session started");

        loop {
            tokio::select! {
                _ = frame.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_frame).as_secs_f32();
                    last_frame = now;
                    self.frame(dt);
                }
                _ = snapshots.tick() => self.snapshot_tick(),
                _ = inputs.tick() => self.input_tick(),
                _ = pings.tick() => self.ping_tick(),
                _ = link_checks.tick() => self.link_check(Instant::now()),
                Some(event) = relay_rx.recv() => {
                    if let RelayEvent::Failed { attempts } = event {
                        self.on_relay_event(event);
                        result = Err(RelayError::Exhausted(attempts).into());
                        break;
                    }
                    if self.on_relay_event(event) == Flow::Stop {
                        break;
                    }
                }
                Some(datagram) = direct_rx.recv() => self.on_datagram(datagram, Instant::now()),
                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::RequestRematch) => self.request_rematch(),
                    Some(SessionCommand::LeaveMatch) => self.leave_match(),
                    Some(SessionCommand::Shutdown) | None => {
                        if self.role.is_some() {
                            self.leave_match();
                            self.flush().await;
                        }
                        break;
                    }
                },
            }

            self.flush().await;
            views.send_replace(self.view());
        }

        self.teardown().await;
        views.send_replace(self.view());
        result
    }

    /// One display frame
    pub fn frame(&mut self, dt: f32) {
        self.engine.frame(dt, &self.input);
        self.reporter
            .observe(self.engine.match_state(), self.stats.as_ref());
    }

    /// Host: replicate the world
    pub fn snapshot_tick(&mut self) {
        if self.role != Some(Role::Host) || !self.in_match() {
            return;
        }
        let snapshot = Box::new(self.engine.view());
        self.outgoing.push(Outgoing::Peer(PeerPayload::State { snapshot }));
    }

    /// Client: send steering and any pending actions
    pub fn input_tick(&mut self) {
        if self.role != Some(Role::Client) || !self.in_match() {
            return;
        }
        let (joystick, actions) = self.input.take();
        self.input_seq = self.input_seq.wrapping_add(1);
        self.outgoing.push(Outgoing::Peer(PeerPayload::Input {
            payload: InputPayload {
                seq: self.input_seq,
                joystick,
                is_throwing: actions.throw,
                is_dodging: actions.dodge,
            },
        }));
    }

    pub fn ping_tick(&mut self) {
        if self.link.relay_up() {
            self.outgoing.push(Outgoing::Relay(ClientMsg::Ping));
        }
    }

    pub fn link_check(&mut self, now: Instant) {
        let event = self.direct.as_mut().and_then(|d| d.check(now));
        if let Some(event) = event {
            self.link.apply(event);
        }
    }

    /// Raise the local rematch flag after a finished match
    pub fn request_rematch(&mut self) {
        let Some(role) = self.role else {
            return;
        };
        if self.engine.match_state().phase != Phase::MatchOver {
            debug!("Rematch requested outside match over, ignored");
            return;
        }
        let (first, action) = self.rematch.request_local(role);
        if first {
            info!(code = ?self.code, "Rematch requested");
            self.outgoing.push(Outgoing::Peer(PeerPayload::RematchRequest));
        }
        self.apply_rematch(action);
    }

    /// Quit the match for good
    pub fn leave_match(&mut self) {
        if self.role.is_none() {
            self.outgoing.push(Outgoing::Relay(ClientMsg::LeaveQueue));
            return;
        }
        self.outgoing.push(Outgoing::Relay(ClientMsg::LeaveMatch));
        self.end_match(SessionStatus::MatchEnded);
    }

    fn on_relay_event(&mut self, event: RelayEvent) -> Flow {
        match event {
            RelayEvent::Connected { reconnect } => {
                self.link.apply(LinkEvent::RelayUp);
                if !reconnect && self.status == SessionStatus::Connecting {
                    self.status = SessionStatus::Queued;
                }
            }
            RelayEvent::Message(msg) => self.on_server_msg(msg),
            RelayEvent::Disconnected => {
                self.link.apply(LinkEvent::RelayDown);
            }
            RelayEvent::Failed { attempts } => {
                warn!(attempts, "Relay lost for good");
                self.link.apply(LinkEvent::RelayDown);
                self.end_match(SessionStatus::Failed);
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    pub fn on_server_msg(&mut self, msg: ServerMsg) {
        match msg {
            ServerMsg::MatchFound { role, code } => {
                info!(%role, %code, "Match found");
                self.begin_match(role, code);
            }
            ServerMsg::MatchRestored { role, code } => {
                info!(%role, %code, "Match restored");
                if self.role == Some(role) && self.code.as_deref() == Some(code.as_str()) {
                    self.status = SessionStatus::InMatch;
                    self.offer_direct();
                } else {
                    self.begin_match(role, code);
                }
            }
            ServerMsg::Queued => {
                debug!("Queued for a match");
                self.status = SessionStatus::Queued;
            }
            ServerMsg::OpponentReconnected => {
                info!(code = ?self.code, "Opponent reconnected");
                match self.role {
                    // A restarted client numbers its input from 1 again.
                    Some(Role::Host) => self.engine.reset_remote_input(),
                    // A restarted host counts ticks and events from 0 again.
                    Some(Role::Client) => self.resync_with_host(),
                    None => return,
                }
                self.status = SessionStatus::InMatch;
                // Their direct address may have changed with the new process.
                self.offer_direct();
            }
            ServerMsg::OpponentDisconnectedTemp => {
                info!(code = ?self.code, "Opponent dropped, waiting for them");
                if self.role.is_some() {
                    self.status = SessionStatus::OpponentReconnecting;
                    if self.role == Some(Role::Host) {
                        self.engine.release_remote_input();
                    }
                }
            }
            ServerMsg::OpponentLeft => {
                info!(code = ?self.code, "Opponent left the match");
                self.end_match(SessionStatus::MatchEnded);
            }
            ServerMsg::PeerDisconnected => {
                info!(code = ?self.code, "Opponent did not come back");
                self.end_match(SessionStatus::MatchEnded);
            }
            ServerMsg::Relay { payload } => match PeerPayload::from_value(payload) {
                Ok(payload) => self.on_peer_payload(payload, Channel::Relay),
                Err(e) => warn!(error = %e, "Dropped relayed payload"),
            },
            ServerMsg::Pong => debug!("Pong"),
            ServerMsg::Error { code, message } => {
                warn!(%code, %message, "Relay reported an error");
            }
        }
    }

    fn on_datagram(&mut self, datagram: Datagram, now: Instant) {
        let Some(direct) = self.direct.as_mut() else {
            return;
        };
        let (accepted, event) = direct.on_datagram(datagram.from, now);
        if let Some(event) = event {
            self.link.apply(event);
        }
        if accepted {
            self.on_peer_payload(datagram.payload, Channel::Direct);
        }
    }

    pub fn on_peer_payload(&mut self, payload: PeerPayload, via: Channel) {
        let Some(role) = self.role else {
            debug!(kind = payload.kind(), "Peer payload outside a match ignored");
            return;
        };
        debug!(kind = payload.kind(), ?via, "Peer payload");

        match (role, payload) {
            (Role::Client, PeerPayload::State { snapshot }) => self.apply_host_snapshot(&snapshot),
            (Role::Host, PeerPayload::Input { payload }) => {
                self.engine.set_remote_input(
                    payload.seq,
                    payload.joystick,
                    payload.is_throwing,
                    payload.is_dodging,
                );
            }
            (Role::Client, PeerPayload::Start) => {
                info!(code = ?self.code, "Host started the match");
                self.resync_with_host();
            }
            (Role::Client, PeerPayload::Restart) => {
                if self.rematch.local_requested() || self.rematch.remote_requested() {
                    info!(code = ?self.code, "Rematch starting");
                }
                self.rematch.clear();
            }
            (_, PeerPayload::RematchRequest) => {
                let action = self.rematch.on_remote_request(role);
                self.apply_rematch(action);
            }
            (_, PeerPayload::DirectOffer { addr }) => {
                if via == Channel::Direct {
                    debug!("Direct offer over the direct channel ignored");
                    return;
                }
                self.adopt_direct_peer(&addr);
            }
            (role, payload) => {
                debug!(%role, kind = payload.kind(), "Payload not meant for this role");
            }
        }
    }

    fn apply_host_snapshot(&mut self, snapshot: &Snapshot) {
        if self.last_applied_tick.is_some_and(|last| snapshot.tick <= last) {
            return;
        }
        match self.engine.apply_snapshot(&invert(snapshot)) {
            Ok(()) => {
                self.last_applied_tick = Some(snapshot.tick);
                self.reporter
                    .observe(self.engine.match_state(), self.stats.as_ref());
            }
            Err(e) => warn!(tick = snapshot.tick, error = %e, "Snapshot rejected"),
        }
    }

    /// Client: take the next snapshot whatever its tick
    fn resync_with_host(&mut self) {
        self.last_applied_tick = None;
        self.engine.resync_mirror();
    }

    fn apply_rematch(&mut self, action: RematchAction) {
        if action != RematchAction::Restart {
            return;
        }
        self.engine.restart_match();
        self.rematch.clear();
        self.outgoing.push(Outgoing::Peer(PeerPayload::Restart));
    }

    fn begin_match(&mut self, role: Role, code: String) {
        self.role = Some(role);
        self.code = Some(code);
        self.status = SessionStatus::InMatch;
        self.rematch.clear();
        self.last_applied_tick = None;
        self.input.clear();
        if let Some(event) = self.direct.as_mut().and_then(DirectChannel::forget_peer) {
            self.link.apply(event);
        }

        match role {
            Role::Host => {
                self.engine.set_mode(Mode::Host);
                self.engine.start_game();
                self.outgoing.push(Outgoing::Peer(PeerPayload::Start));
            }
            Role::Client => {
                self.engine.set_mode(Mode::Client);
                self.engine.return_to_menu();
            }
        }
        self.offer_direct();
    }

    fn end_match(&mut self, status: SessionStatus) {
        self.role = None;
        self.code = None;
        self.status = status;
        self.rematch.clear();
        self.last_applied_tick = None;
        self.engine.set_mode(Mode::Single);
        self.engine.return_to_menu();
        if let Some(event) = self.direct.as_mut().and_then(DirectChannel::forget_peer) {
            self.link.apply(event);
        }
    }

    fn offer_direct(&mut self) {
        if let Some(addr) = self.offer {
            self.outgoing.push(Outgoing::Peer(PeerPayload::DirectOffer {
                addr: addr.to_string(),
            }));
        }
    }

    fn adopt_direct_peer(&mut self, addr: &str) {
        let Some(direct) = self.direct.as_mut() else {
            return;
        };
        match addr.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Some(event) = direct.set_peer(addr) {
                    self.link.apply(event);
                }
            }
            Err(_) => warn!(%addr, "Unparseable direct offer"),
        }
    }

    fn in_match(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::InMatch | SessionStatus::OpponentReconnecting
        )
    }

    async fn flush(&mut self) {
        for out in std::mem::take(&mut self.outgoing) {
            match out {
                Outgoing::Relay(msg) => self.send_relay(msg),
                Outgoing::Peer(payload) => {
                    let relay_only = matches!(payload, PeerPayload::DirectOffer { .. });
                    if self.link.relay_up() {
                        match payload.to_value() {
                            Ok(value) => self.send_relay(ClientMsg::Relay { payload: value }),
                            Err(e) => warn!(error = %e, "Peer payload not serializable"),
                        }
                    }
                    if relay_only {
                        continue;
                    }
                    if let Some(direct) = self.direct.as_ref().filter(|d| d.peer().is_some()) {
                        if let Err(e) = direct.send(&payload).await {
                            debug!(error = %e, "Direct send failed");
                        }
                    }
                }
            }
        }
    }

    fn send_relay(&self, msg: ClientMsg) {
        if !self.link.relay_up() {
            return;
        }
        if let Some(relay) = self.relay.as_ref() {
            if let Err(e) = relay.send(msg) {
                debug!(error = %e, "Relay send dropped");
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.close().await;
        }
        if let Some(mut direct) = self.direct.take() {
            direct.shutdown();
        }
        self.outgoing.clear();
        self.link.apply(LinkEvent::Close);
        if self.status != SessionStatus::Failed {
            self.status = SessionStatus::Closed;
        }
        info!(session_id = %self.config.session_id, "Sync session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::Side;
    use crate::game::events::{EventKind, GameEvent};
    use crate::game::Vec2;
    use crate::store::LocalStats;

    fn session(stats: &LocalStats) -> SyncSession {
        SyncSession::new(
            SyncConfig::default(),
            3,
            InputHandle::new(),
            Arc::new(stats.clone()),
        )
    }

    fn matched(role: Role) -> SyncSession {
        let mut s = session(&LocalStats::new());
        s.on_relay_event(RelayEvent::Connected { reconnect: false });
        s.on_server_msg(ServerMsg::MatchFound {
            role,
            code: "0BADF00D".into(),
        });
        s
    }

    fn peers(out: &[Outgoing]) -> Vec<&PeerPayload> {
        out.iter()
            .filter_map(|o| match o {
                Outgoing::Peer(p) => Some(p),
                Outgoing::Relay(_) => None,
            })
            .collect()
    }

    /// Run the host past the pre-round countdown
    fn warm_up(host: &mut SyncSession) {
        for _ in 0..240 {
            host.frame(1.0 / 60.0);
        }
    }

    /// Jump the host straight to a won match
    fn finish(host: &mut SyncSession) {
        let mut snap = host.engine.view();
        snap.game.phase = Phase::MatchOver;
        snap.game.winner = Some(Side::Player);
        snap.game.player_score = 2;
        host.engine.apply_snapshot(&snap).unwrap();
    }

    #[test]
    fn host_starts_match_and_replicates() {
        let mut host = matched(Role::Host);
        assert_eq!(host.status(), SessionStatus::InMatch);
        assert_eq!(host.engine.mode(), Mode::Host);
        assert_eq!(host.engine.match_state().phase, Phase::Playing);

        host.snapshot_tick();
        let out = host.take_outgoing();
        let sent = peers(&out);
        assert!(matches!(sent[0], PeerPayload::Start));
        assert!(matches!(sent[1], PeerPayload::State { .. }));
    }

    #[test]
    fn client_sends_numbered_input_and_never_simulates() {
        let mut client = matched(Role::Client);
        client.take_outgoing();
        client.input.set_joystick(Vec2::new(0.5, 0.0));
        client.input.press_throw();

        client.frame(0.5);
        assert_eq!(client.engine.tick(), 0);

        client.input_tick();
        client.input_tick();
        let out = client.take_outgoing();
        let sent = peers(&out);
        match (sent[0], sent[1]) {
            (PeerPayload::Input { payload: a }, PeerPayload::Input { payload: b }) => {
                assert!(a.is_throwing);
                assert!(!b.is_throwing);
                assert_eq!(b.seq, a.seq + 1);
                assert_eq!(a.joystick, Vec2::new(0.5, 0.0));
            }
            other => panic!("unexpected payloads {other:?}"),
        }
    }

    #[test]
    fn client_applies_inverted_snapshots_once_per_tick() {
        let mut host = matched(Role::Host);
        let mut client = matched(Role::Client);

        warm_up(&mut host);
        let snap = host.engine.view();
        let payload = PeerPayload::State {
            snapshot: Box::new(snap.clone()),
        };

        client.on_peer_payload(payload.clone(), Channel::Direct);
        assert_eq!(client.engine.tick(), snap.tick);
        assert_eq!(client.engine.player().z, -snap.opponent.z);
        assert_eq!(client.engine.opponent().x, -snap.player.x);

        // Same tick from the relay, then an older one: both dropped.
        let mut older = snap.clone();
        older.tick -= 1;
        older.player.x = 0.123;
        client.on_peer_payload(payload, Channel::Relay);
        client.on_peer_payload(
            PeerPayload::State {
                snapshot: Box::new(older),
            },
            Channel::Relay,
        );
        assert_ne!(client.engine.opponent().x, -0.123);
    }

    #[test]
    fn host_drives_opponent_from_remote_input() {
        let mut host = matched(Role::Host);
        warm_up(&mut host);
        let start = host.engine.opponent().x;
        for seq in 1..=60 {
            host.on_peer_payload(
                PeerPayload::Input {
                    payload: InputPayload {
                        seq,
                        joystick: Vec2::new(1.0, 0.0),
                        is_throwing: false,
                        is_dodging: false,
                    },
                },
                Channel::Relay,
            );
            host.frame(1.0 / 60.0);
        }
        // Client steers right in its own view, which is left on the host.
        assert!(host.engine.opponent().x < start);
    }

    #[test]
    fn temporary_drop_keeps_the_match() {
        let mut host = matched(Role::Host);
        host.on_server_msg(ServerMsg::OpponentDisconnectedTemp);
        assert_eq!(host.status(), SessionStatus::OpponentReconnecting);
        assert_eq!(host.role(), Some(Role::Host));

        host.on_server_msg(ServerMsg::OpponentReconnected);
        assert_eq!(host.status(), SessionStatus::InMatch);
    }

    #[test]
    fn opponent_leaving_returns_to_menu() {
        for msg in [ServerMsg::OpponentLeft, ServerMsg::PeerDisconnected] {
            let mut client = matched(Role::Client);
            client.on_server_msg(msg);
            assert_eq!(client.status(), SessionStatus::MatchEnded);
            assert_eq!(client.role(), None);
            assert_eq!(client.code(), None);
            assert_eq!(client.engine.mode(), Mode::Single);
            assert_eq!(client.engine.match_state().phase, Phase::Menu);
        }
    }

    #[test]
    fn restored_match_keeps_host_state() {
        let mut host = matched(Role::Host);
        warm_up(&mut host);
        let tick = host.engine.tick();
        host.on_relay_event(RelayEvent::Disconnected);
        assert!(!host.link.relay_up());
        host.on_relay_event(RelayEvent::Connected { reconnect: true });
        host.on_server_msg(ServerMsg::MatchRestored {
            role: Role::Host,
            code: "0BADF00D".into(),
        });
        assert_eq!(host.status(), SessionStatus::InMatch);
        assert_eq!(host.engine.tick(), tick);
    }

    /// A fresh process picking its match back up with the same session id
    fn restored(role: Role) -> SyncSession {
        let mut s = session(&LocalStats::new());
        s.on_relay_event(RelayEvent::Connected { reconnect: false });
        s.on_server_msg(ServerMsg::MatchRestored {
            role,
            code: "0BADF00D".into(),
        });
        s
    }

    fn deliver(from: &mut SyncSession, to: &mut SyncSession) {
        let out = from.take_outgoing();
        for payload in peers(&out) {
            to.on_peer_payload(payload.clone(), Channel::Relay);
        }
    }

    #[test]
    fn host_follows_a_restarted_client() {
        let mut host = matched(Role::Host);
        warm_up(&mut host);
        for seq in 1..=500 {
            host.on_peer_payload(
                PeerPayload::Input {
                    payload: InputPayload {
                        seq,
                        joystick: Vec2::ZERO,
                        is_throwing: false,
                        is_dodging: false,
                    },
                },
                Channel::Relay,
            );
        }
        host.on_server_msg(ServerMsg::OpponentDisconnectedTemp);
        host.on_server_msg(ServerMsg::OpponentReconnected);
        host.take_outgoing();

        let mut client = restored(Role::Client);
        assert_eq!(client.status(), SessionStatus::InMatch);
        client.take_outgoing();
        client.input.set_joystick(Vec2::new(1.0, 0.0));

        let start = host.engine.opponent().x;
        for _ in 0..60 {
            client.input_tick();
            deliver(&mut client, &mut host);
            host.frame(1.0 / 60.0);
        }
        assert!(host.engine.opponent().x < start);
    }

    #[test]
    fn client_follows_a_restarted_host() {
        let mut client = matched(Role::Client);
        let mut old = matched(Role::Host).engine.view();
        old.tick = 10_000;
        old.events = vec![GameEvent {
            id: 50,
            kind: EventKind::Pickup,
            x: 0.0,
            z: 1.0,
            text: None,
            side: Some(Side::Player),
            time: 0,
        }];
        client.on_peer_payload(
            PeerPayload::State {
                snapshot: Box::new(old),
            },
            Channel::Relay,
        );
        assert_eq!(client.engine.tick(), 10_000);

        let mut host = restored(Role::Host);
        assert_eq!(host.engine.mode(), Mode::Host);
        client.on_server_msg(ServerMsg::OpponentReconnected);
        deliver(&mut host, &mut client);

        warm_up(&mut host);
        let mut snap = host.engine.view();
        snap.events = vec![GameEvent {
            id: 1,
            kind: EventKind::Throw,
            x: 0.0,
            z: 2.0,
            text: None,
            side: Some(Side::Opponent),
            time: 0,
        }];
        host.engine.apply_snapshot(&snap).unwrap();
        host.snapshot_tick();
        deliver(&mut host, &mut client);

        assert_eq!(client.engine.tick(), host.engine.tick());
        assert!(client.engine.events().iter().any(|e| e.kind == EventKind::Throw));
    }

    #[test]
    fn rematch_restarts_once_and_only_from_the_host() {
        let mut host = matched(Role::Host);
        finish(&mut host);
        assert_eq!(host.engine.match_state().phase, Phase::MatchOver);
        host.take_outgoing();

        host.on_peer_payload(PeerPayload::RematchRequest, Channel::Relay);
        assert!(host.take_outgoing().is_empty());

        host.request_rematch();
        let out = host.take_outgoing();
        let sent = peers(&out);
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], PeerPayload::RematchRequest));
        assert!(matches!(sent[1], PeerPayload::Restart));
        assert_eq!(host.engine.match_state().phase, Phase::Playing);

        // A duplicate request arriving over the second transport does nothing.
        host.on_peer_payload(PeerPayload::RematchRequest, Channel::Direct);
        assert!(host.take_outgoing().is_empty());
        assert_eq!(host.engine.match_state().round, 1);
    }

    #[test]
    fn match_result_is_recorded_once() {
        let stats = LocalStats::new();
        let mut host = session(&stats);
        host.on_server_msg(ServerMsg::MatchFound {
            role: Role::Host,
            code: "CAFE0001".into(),
        });
        finish(&mut host);
        for _ in 0..10 {
            host.frame(1.0 / 60.0);
        }
        assert_eq!(stats.summary().wins, 1);
    }

    #[test]
    fn leaving_outside_a_match_leaves_the_queue() {
        let mut s = session(&LocalStats::new());
        s.on_relay_event(RelayEvent::Connected { reconnect: false });
        s.leave_match();
        assert_eq!(s.take_outgoing(), vec![Outgoing::Relay(ClientMsg::LeaveQueue)]);
    }

    #[test]
    fn relay_failure_stops_the_session() {
        let mut s = matched(Role::Client);
        assert_eq!(
            s.on_relay_event(RelayEvent::Failed { attempts: 6 }),
            Flow::Stop
        );
        assert_eq!(s.status(), SessionStatus::Failed);
        assert_eq!(s.role(), None);
    }

    #[tokio::test]
    async fn run_ends_on_shutdown_command() {
        let config = SyncConfig {
            relay_url: "ws://127.0.0.1:9/ws".into(),
            ..SyncConfig::default()
        };
        let s = SyncSession::new(config, 1, InputHandle::new(), Arc::new(LocalStats::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (view_tx, view_rx) = watch::channel(s.view());

        let handle = tokio::spawn(s.run(cmd_rx, view_tx));
        cmd_tx.send(SessionCommand::Shutdown).await.unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        tokio_test::assert_ok!(result);
        assert_eq!(view_rx.borrow().status, SessionStatus::Closed);
        assert_eq!(view_rx.borrow().link, LinkState::Closed);
    }
}
