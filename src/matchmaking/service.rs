//! Relay hub - pairing, session restore and RELAY forwarding

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ws::protocol::{Role, ServerMsg};

use super::queue::{PairingQueue, QueuedSession};

/// Ephemeral transport id, one per WebSocket connection
pub type ConnId = Uuid;

/// Outbound half of a connection's writer task
pub type Outbox = mpsc::Sender<ServerMsg>;

/// Timing knobs for the hub
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// How long a matched session may stay away before the match is abandoned
    pub reconnect_grace: Duration,
    /// Queue entries silent for longer than this are dropped
    pub queue_idle_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            reconnect_grace: Duration::from_secs(30),
            queue_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Server-side record of one client, keyed by its durable session id
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub username: String,
    /// Current transport, None while disconnected
    pub conn: Option<ConnId>,
    pub role: Option<Role>,
    pub code: Option<String>,
    pub opponent: Option<String>,
    pub disconnected_at: Option<Instant>,
}

impl Session {
    fn new(id: &str, username: &str, conn: ConnId) -> Self {
        Self {
            id: id.to_string(),
            username: username.to_string(),
            conn: Some(conn),
            role: None,
            code: None,
            opponent: None,
            disconnected_at: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.opponent.is_some()
    }

    fn release(&mut self) {
        self.role = None;
        self.code = None;
        self.opponent = None;
    }
}

#[derive(Default)]
struct HubState {
    sessions: HashMap<String, Session>,
    /// Which session each live transport belongs to
    bindings: HashMap<ConnId, String>,
    queue: PairingQueue,
}

/// Hub shared by every connection handler and the sweeper
#[derive(Clone)]
pub struct RelayHub {
    state: Arc<Mutex<HubState>>,
    transports: Arc<DashMap<ConnId, Outbox>>,
    config: HubConfig,
}

impl RelayHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            transports: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Register a fresh transport. It belongs to no session until it sends JOIN_SESSION.
    pub fn attach(&self, conn: ConnId, outbox: Outbox) {
        self.transports.insert(conn, outbox);
        debug!(conn_id = %conn, "Transport attached");
    }

    /// Handle JOIN_SESSION: restore a running match, pair with a waiting session, or queue
    pub fn join(&self, conn: ConnId, session_id: &str, username: &str, is_reconnecting: bool, now: Instant) {
        let mut state = self.state.lock();

        // Bind the new transport, retiring any older one of the same session.
        if let Some(old) = state.sessions.get(session_id).and_then(|s| s.conn) {
            if old != conn {
                state.bindings.remove(&old);
                self.transports.remove(&old);
                debug!(session_id, old_conn = %old, "Retired stale transport");
            }
        }
        state.bindings.insert(conn, session_id.to_string());

        let restorable = state
            .sessions
            .get(session_id)
            .map(|s| s.is_matched())
            .unwrap_or(false);

        if restorable {
            self.restore(&mut state, conn, session_id, is_reconnecting);
            return;
        }

        let session = state
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id, username, conn));
        session.conn = Some(conn);
        session.disconnected_at = None;
        if !username.is_empty() {
            session.username = username.to_string();
        }

        state.queue.remove(session_id);
        self.pair_or_enqueue(&mut state, session_id, now);
    }

    fn restore(&self, state: &mut HubState, conn: ConnId, session_id: &str, is_reconnecting: bool) {
        let Some(session) = state.sessions.get_mut(session_id) else {
            return;
        };
        // A crashed process can rejoin before its old transport is seen closing.
        let was_away = session.disconnected_at.take().is_some() || session.conn != Some(conn);
        session.conn = Some(conn);

        let (Some(role), Some(code)) = (session.role, session.code.clone()) else {
            return;
        };
        let opponent = session.opponent.clone();

        info!(session_id, code = %code, role = %role, is_reconnecting, "Match restored");
        self.send(conn, ServerMsg::MatchRestored { role, code });

        if was_away {
            if let Some(opp_conn) = opponent.and_then(|o| state.sessions.get(&o)).and_then(|o| o.conn) {
                self.send(opp_conn, ServerMsg::OpponentReconnected);
            }
        }
    }

    fn pair_or_enqueue(&self, state: &mut HubState, session_id: &str, now: Instant) {
        let dropped = {
            let HubState { sessions, queue, .. } = &mut *state;
            queue.prune(now, self.config.queue_idle_timeout, |id| {
                self.session_is_live(sessions, id)
            })
        };
        for entry in dropped {
            debug!(session_id = %entry.session_id, "Pruned stale queue entry");
            self.forget_if_unbound(state, &entry.session_id);
        }

        let Some(joiner_conn) = state.sessions.get(session_id).and_then(|s| s.conn) else {
            return;
        };

        // Live partners that could not take MATCH_FOUND right now, in queue order
        let mut deferred = Vec::new();

        loop {
            let partner = {
                let HubState { sessions, queue, .. } = &mut *state;
                queue.pop_partner(session_id, |id| self.session_is_live(sessions, id))
            };

            let Some(partner) = partner else {
                let username = state
                    .sessions
                    .get(session_id)
                    .map(|s| s.username.clone())
                    .unwrap_or_default();
                state
                    .queue
                    .enqueue(QueuedSession::new(session_id, username, now));
                info!(session_id, queue_size = state.queue.len(), "Session queued");
                self.send(joiner_conn, ServerMsg::Queued);
                break;
            };

            let Some(host_conn) = state.sessions.get(&partner.session_id).and_then(|s| s.conn) else {
                continue;
            };

            let code = match_code();

            // The longest-waiting side hosts.
            if !self.send(host_conn, ServerMsg::MatchFound { role: Role::Host, code: code.clone() }) {
                if self.session_is_live(&state.sessions, &partner.session_id) {
                    warn!(session_id = %partner.session_id, "Partner busy, keeping its place in line");
                    deferred.push(partner);
                } else {
                    warn!(session_id = %partner.session_id, "Partner transport closed before pairing");
                    self.forget_if_unbound(state, &partner.session_id);
                }
                continue;
            }

            if !self.send(joiner_conn, ServerMsg::MatchFound { role: Role::Client, code: code.clone() }) {
                warn!(session_id, "Joiner transport closed during pairing, requeueing partner");
                deferred.push(partner);
                break;
            }

            if let Some(host) = state.sessions.get_mut(&partner.session_id) {
                host.role = Some(Role::Host);
                host.code = Some(code.clone());
                host.opponent = Some(session_id.to_string());
            }
            if let Some(client) = state.sessions.get_mut(session_id) {
                client.role = Some(Role::Client);
                client.code = Some(code.clone());
                client.opponent = Some(partner.session_id.clone());
            }

            info!(
                code = %code,
                host = %partner.session_id,
                client = session_id,
                waited_ms = partner.wait_time(now).as_millis() as u64,
                "Match found"
            );
            break;
        }

        for entry in deferred.into_iter().rev() {
            state.queue.requeue_front(entry);
        }
    }

    /// Explicit and idempotent
    pub fn leave_queue(&self, conn: ConnId) {
        let mut state = self.state.lock();
        let Some(session_id) = state.bindings.get(&conn).cloned() else {
            return;
        };
        if state.queue.remove(&session_id).is_some() {
            info!(session_id = %session_id, "Left queue");
        }
    }

    /// Quit the match for good; the opponent is told and both return to neutral
    pub fn leave_match(&self, conn: ConnId) {
        let mut state = self.state.lock();
        let Some(session_id) = state.bindings.get(&conn).cloned() else {
            return;
        };
        let Some(opponent_id) = state.sessions.get_mut(&session_id).and_then(|s| {
            let opponent = s.opponent.clone();
            s.release();
            opponent
        }) else {
            return;
        };

        if let Some(opponent) = state.sessions.get_mut(&opponent_id) {
            opponent.release();
            if let Some(opp_conn) = opponent.conn {
                self.send(opp_conn, ServerMsg::OpponentLeft);
            }
            if opponent.conn.is_none() {
                state.sessions.remove(&opponent_id);
            }
        }
        info!(session_id = %session_id, opponent = %opponent_id, "Left match");
    }

    /// Forward an envelope to the sender's opponent. Dropped while the opponent is away.
    pub fn relay(&self, conn: ConnId, payload: serde_json::Value) {
        let state = self.state.lock();
        let target = state
            .bindings
            .get(&conn)
            .and_then(|id| state.sessions.get(id))
            .and_then(|s| s.opponent.as_ref())
            .and_then(|o| state.sessions.get(o))
            .and_then(|o| o.conn);

        match target {
            Some(target) => {
                self.send(target, ServerMsg::Relay { payload });
            }
            None => debug!(conn_id = %conn, "Relay dropped, no reachable opponent"),
        }
    }

    pub fn ping(&self, conn: ConnId, now: Instant) {
        {
            let mut state = self.state.lock();
            if let Some(session_id) = state.bindings.get(&conn).cloned() {
                state.queue.touch(&session_id, now);
            }
        }
        self.send(conn, ServerMsg::Pong);
    }

    /// Transport closed. Queued sessions vanish; matched ones get a grace window.
    pub fn disconnect(&self, conn: ConnId, now: Instant) {
        self.transports.remove(&conn);

        let mut state = self.state.lock();
        let Some(session_id) = state.bindings.remove(&conn) else {
            // Never joined, or already replaced by a newer connection.
            debug!(conn_id = %conn, "Stale transport closed");
            return;
        };

        state.queue.remove(&session_id);

        let Some(session) = state.sessions.get_mut(&session_id) else {
            return;
        };
        if session.conn != Some(conn) {
            return;
        }
        session.conn = None;

        if !session.is_matched() {
            state.sessions.remove(&session_id);
            info!(session_id = %session_id, "Session closed");
            return;
        }

        session.disconnected_at = Some(now);
        let opponent = session.opponent.clone();
        info!(session_id = %session_id, "Matched session dropped, grace window started");

        if let Some(opp_conn) = opponent.and_then(|o| state.sessions.get(&o)).and_then(|o| o.conn) {
            self.send(opp_conn, ServerMsg::OpponentDisconnectedTemp);
        }
    }

    /// Expire grace windows and prune the queue
    pub fn sweep(&self, now: Instant) {
        let mut state = self.state.lock();

        let expired: Vec<String> = state
            .sessions
            .values()
            .filter(|s| {
                s.disconnected_at
                    .map(|t| now.saturating_duration_since(t) >= self.config.reconnect_grace)
                    .unwrap_or(false)
            })
            .map(|s| s.id.clone())
            .collect();

        for session_id in expired {
            let Some(session) = state.sessions.remove(&session_id) else {
                continue;
            };
            info!(session_id = %session_id, code = ?session.code, "Grace window expired, match abandoned");

            let Some(opponent_id) = session.opponent else {
                continue;
            };
            if let Some(opponent) = state.sessions.get_mut(&opponent_id) {
                opponent.release();
                if let Some(opp_conn) = opponent.conn {
                    self.send(opp_conn, ServerMsg::PeerDisconnected);
                } else {
                    state.sessions.remove(&opponent_id);
                }
            }
        }

        let dropped = {
            let HubState { sessions, queue, .. } = &mut *state;
            queue.prune(now, self.config.queue_idle_timeout, |id| {
                self.session_is_live(sessions, id)
            })
        };
        for entry in dropped {
            debug!(session_id = %entry.session_id, "Pruned stale queue entry");
            self.forget_if_unbound(&mut state, &entry.session_id);
        }
    }

    /// Run the periodic sweeper
    pub async fn run(self, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            self.sweep(Instant::now());
        }
    }

    fn session_is_live(&self, sessions: &HashMap<String, Session>, session_id: &str) -> bool {
        sessions
            .get(session_id)
            .and_then(|s| s.conn)
            .and_then(|c| self.transports.get(&c).map(|t| !t.is_closed()))
            .unwrap_or(false)
    }

    /// Delete an unmatched session that no longer has a usable transport
    fn forget_if_unbound(&self, state: &mut HubState, session_id: &str) {
        let Some(session) = state.sessions.get(session_id) else {
            return;
        };
        if session.is_matched() || self.session_is_live(&state.sessions, session_id) {
            return;
        }
        if let Some(conn) = session.conn {
            state.bindings.remove(&conn);
            self.transports.remove(&conn);
        }
        state.sessions.remove(session_id);
    }

    /// Non-blocking send; false if the transport is gone or saturated
    fn send(&self, conn: ConnId, msg: ServerMsg) -> bool {
        let Some(outbox) = self.transports.get(&conn) else {
            return false;
        };
        match outbox.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                warn!(conn_id = %conn, error = %e, "Failed to queue message for transport");
                false
            }
        }
    }

    pub fn queue_size(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn active_matches(&self) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .filter(|s| s.role == Some(Role::Host) && s.is_matched())
            .count()
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.state.lock().sessions.get(session_id).cloned()
    }
}

/// Opaque code shared by both sides of a match
fn match_code() -> String {
    format!("{:08X}", rand::random::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> RelayHub {
        RelayHub::new(HubConfig {
            reconnect_grace: Duration::from_secs(30),
            queue_idle_timeout: Duration::from_secs(30),
        })
    }

    fn connect(hub: &RelayHub) -> (ConnId, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = Uuid::new_v4();
        hub.attach(conn, tx);
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn found(msgs: &[ServerMsg]) -> Option<(Role, String)> {
        msgs.iter().find_map(|m| match m {
            ServerMsg::MatchFound { role, code } => Some((*role, code.clone())),
            _ => None,
        })
    }

    fn paired(hub: &RelayHub, now: Instant) -> (ConnId, mpsc::Receiver<ServerMsg>, ConnId, mpsc::Receiver<ServerMsg>) {
        let (a, mut rx_a) = connect(hub);
        let (b, mut rx_b) = connect(hub);
        hub.join(a, "A", "alice", false, now);
        hub.join(b, "B", "bob", false, now);
        drain(&mut rx_a);
        drain(&mut rx_b);
        (a, rx_a, b, rx_b)
    }

    #[test]
    fn first_in_line_hosts_and_codes_match() {
        let hub = hub();
        let now = Instant::now();
        let (a, mut rx_a) = connect(&hub);
        let (b, mut rx_b) = connect(&hub);

        hub.join(a, "A", "alice", false, now);
        assert_eq!(drain(&mut rx_a), vec![ServerMsg::Queued]);
        assert_eq!(hub.queue_size(), 1);

        hub.join(b, "B", "bob", false, now);
        let (role_a, code_a) = found(&drain(&mut rx_a)).unwrap();
        let (role_b, code_b) = found(&drain(&mut rx_b)).unwrap();

        assert_eq!(role_a, Role::Host);
        assert_eq!(role_b, Role::Client);
        assert_eq!(code_a, code_b);
        assert_eq!(code_a.len(), 8);
        assert!(code_a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_eq!(hub.queue_size(), 0);
        assert_eq!(hub.active_matches(), 1);
    }

    #[test]
    fn relay_reaches_only_the_opponent() {
        let hub = hub();
        let (a, mut rx_a, _b, mut rx_b) = paired(&hub, Instant::now());

        hub.relay(a, serde_json::json!({ "type": "start" }));
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMsg::Relay { payload: serde_json::json!({ "type": "start" }) }]
        );
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn rejoin_within_grace_restores_role_and_code() {
        let hub = hub();
        let t0 = Instant::now();
        let (_a, mut rx_a, b, _rx_b) = paired(&hub, t0);
        let code = hub.session("B").and_then(|s| s.code).unwrap();

        hub.disconnect(b, t0);
        assert_eq!(drain(&mut rx_a), vec![ServerMsg::OpponentDisconnectedTemp]);

        let (b2, mut rx_b2) = connect(&hub);
        hub.sweep(t0 + Duration::from_secs(10));
        hub.join(b2, "B", "bob", true, t0 + Duration::from_secs(10));

        assert_eq!(
            drain(&mut rx_b2),
            vec![ServerMsg::MatchRestored { role: Role::Client, code }]
        );
        assert_eq!(drain(&mut rx_a), vec![ServerMsg::OpponentReconnected]);
    }

    #[test]
    fn grace_expiry_releases_both_sides() {
        let hub = hub();
        let t0 = Instant::now();
        let (a, mut rx_a, b, _rx_b) = paired(&hub, t0);

        hub.disconnect(b, t0);
        drain(&mut rx_a);
        hub.sweep(t0 + Duration::from_secs(31));

        assert_eq!(drain(&mut rx_a), vec![ServerMsg::PeerDisconnected]);
        assert!(hub.session("B").is_none());
        let a_session = hub.session("A").unwrap();
        assert!(!a_session.is_matched());
        assert!(a_session.role.is_none());
        assert_eq!(hub.active_matches(), 0);

        // A is neutral again and can be paired anew.
        let (c, mut rx_c) = connect(&hub);
        hub.join(a, "A", "alice", false, t0 + Duration::from_secs(32));
        hub.join(c, "C", "carol", false, t0 + Duration::from_secs(32));
        assert_eq!(found(&drain(&mut rx_c)).map(|f| f.0), Some(Role::Client));
    }

    #[test]
    fn returning_after_grace_starts_fresh() {
        let hub = hub();
        let t0 = Instant::now();
        let (_a, _rx_a, b, _rx_b) = paired(&hub, t0);
        hub.disconnect(b, t0);
        hub.sweep(t0 + Duration::from_secs(31));

        let (b2, mut rx_b2) = connect(&hub);
        hub.join(b2, "B", "bob", true, t0 + Duration::from_secs(31));
        assert_eq!(drain(&mut rx_b2), vec![ServerMsg::Queued]);
    }

    #[test]
    fn leaving_is_idempotent() {
        let hub = hub();
        let now = Instant::now();
        let (a, _rx_a) = connect(&hub);
        hub.join(a, "A", "alice", false, now);
        hub.leave_queue(a);
        hub.leave_queue(a);
        assert_eq!(hub.queue_size(), 0);

        let (a, _rx_a, b, mut rx_b) = paired(&hub, now);
        hub.leave_match(a);
        hub.leave_match(a);
        assert_eq!(drain(&mut rx_b), vec![ServerMsg::OpponentLeft]);
        assert!(!hub.session("B").unwrap().is_matched());
        let _ = b;
    }

    #[test]
    fn stale_queue_entry_is_never_paired() {
        let hub = hub();
        let now = Instant::now();
        let (a, rx_a) = connect(&hub);
        hub.join(a, "A", "alice", false, now);
        drop(rx_a);

        let (b, mut rx_b) = connect(&hub);
        hub.join(b, "B", "bob", false, now);
        assert_eq!(drain(&mut rx_b), vec![ServerMsg::Queued]);
        assert!(hub.session("A").is_none());
    }

    #[test]
    fn old_transport_closing_after_reconnect_is_ignored() {
        let hub = hub();
        let now = Instant::now();
        let (a, mut rx_a, b, _rx_b) = paired(&hub, now);

        let (b2, _rx_b2) = connect(&hub);
        hub.join(b2, "B", "bob", true, now);
        drain(&mut rx_a);

        hub.disconnect(b, now);
        assert!(drain(&mut rx_a).is_empty());
        assert!(hub.session("B").unwrap().disconnected_at.is_none());
        let _ = a;
    }

    #[test]
    fn busy_partner_keeps_its_place_in_line() {
        let hub = hub();
        let now = Instant::now();
        let (tx, mut rx_a) = mpsc::channel(1);
        let a = Uuid::new_v4();
        hub.attach(a, tx);
        // QUEUED fills A's outbox, so MATCH_FOUND cannot be queued behind it.
        hub.join(a, "A", "alice", false, now);

        let (b, mut rx_b) = connect(&hub);
        hub.join(b, "B", "bob", false, now);
        assert_eq!(drain(&mut rx_b), vec![ServerMsg::Queued]);
        assert!(!hub.session("A").unwrap().is_matched());
        assert_eq!(hub.queue_size(), 2);

        drain(&mut rx_a);
        let (c, mut rx_c) = connect(&hub);
        hub.join(c, "C", "carol", false, now);
        assert_eq!(found(&drain(&mut rx_a)).map(|(role, _)| role), Some(Role::Host));
        assert_eq!(found(&drain(&mut rx_c)).map(|(role, _)| role), Some(Role::Client));
        assert_eq!(hub.session("A").unwrap().opponent.as_deref(), Some("C"));
        assert_eq!(hub.queue_size(), 1);
        assert!(!hub.session("B").unwrap().is_matched());
    }

    #[test]
    fn rejoin_from_a_new_process_notifies_the_opponent() {
        let hub = hub();
        let now = Instant::now();
        let (_a, mut rx_a, _b, _rx_b) = paired(&hub, now);

        // B's old transport never reported closing.
        let (b2, mut rx_b2) = connect(&hub);
        hub.join(b2, "B", "bob", false, now);
        assert!(matches!(drain(&mut rx_b2)[..], [ServerMsg::MatchRestored { role: Role::Client, .. }]));
        assert_eq!(drain(&mut rx_a), vec![ServerMsg::OpponentReconnected]);
    }

    #[test]
    fn queued_session_disconnect_removes_it() {
        let hub = hub();
        let now = Instant::now();
        let (a, _rx_a) = connect(&hub);
        hub.join(a, "A", "alice", false, now);
        hub.disconnect(a, now);
        assert_eq!(hub.queue_size(), 0);
        assert_eq!(hub.session_count(), 0);
    }
}
