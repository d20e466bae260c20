//! FIFO pairing queue

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Session waiting for an opponent
#[derive(Debug, Clone)]
pub struct QueuedSession {
    pub session_id: String,
    pub username: String,
    pub queued_at: Instant,
    /// Last sign of life (join or heartbeat)
    pub last_seen: Instant,
}

impl QueuedSession {
    pub fn new(session_id: impl Into<String>, username: impl Into<String>, now: Instant) -> Self {
        Self {
            session_id: session_id.into(),
            username: username.into(),
            queued_at: now,
            last_seen: now,
        }
    }

    /// How long this session has been waiting
    pub fn wait_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.queued_at)
    }
}

/// Longest-waiting session first
#[derive(Debug, Default)]
pub struct PairingQueue {
    queue: VecDeque<QueuedSession>,
}

impl PairingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to the back of the queue
    pub fn enqueue(&mut self, entry: QueuedSession) {
        // Remove if already in queue (rejoin)
        self.queue.retain(|q| q.session_id != entry.session_id);
        self.queue.push_back(entry);
    }

    /// Put a session back at the head, keeping its place in line
    pub fn requeue_front(&mut self, entry: QueuedSession) {
        self.queue.retain(|q| q.session_id != entry.session_id);
        self.queue.push_front(entry);
    }

    /// Remove a session. Removing one that is not queued is a no-op.
    pub fn remove(&mut self, session_id: &str) -> Option<QueuedSession> {
        let pos = self.queue.iter().position(|q| q.session_id == session_id)?;
        self.queue.remove(pos)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.queue.iter().any(|q| q.session_id == session_id)
    }

    /// Record a sign of life
    pub fn touch(&mut self, session_id: &str, now: Instant) {
        if let Some(entry) = self.queue.iter_mut().find(|q| q.session_id == session_id) {
            entry.last_seen = now;
        }
    }

    /// Drop entries that went quiet for longer than `idle_timeout` or whose transport is
    /// gone. Returns what was dropped.
    pub fn prune(
        &mut self,
        now: Instant,
        idle_timeout: Duration,
        is_live: impl Fn(&str) -> bool,
    ) -> Vec<QueuedSession> {
        let (keep, dropped): (Vec<_>, Vec<_>) = self.queue.drain(..).partition(|q| {
            now.saturating_duration_since(q.last_seen) <= idle_timeout && is_live(&q.session_id)
        });
        self.queue = keep.into();
        dropped
    }

    /// Pop the longest-waiting live session other than `exclude`. Dead entries met on
    /// the way are discarded.
    pub fn pop_partner(
        &mut self,
        exclude: &str,
        is_live: impl Fn(&str) -> bool,
    ) -> Option<QueuedSession> {
        let mut skipped = VecDeque::new();
        let mut found = None;

        while let Some(entry) = self.queue.pop_front() {
            if entry.session_id == exclude {
                skipped.push_back(entry);
            } else if is_live(&entry.session_id) {
                found = Some(entry);
                break;
            }
        }

        while let Some(entry) = skipped.pop_back() {
            self.queue.push_front(entry);
        }
        found
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedSession> {
        self.queue.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(_: &str) -> bool {
        true
    }

    #[test]
    fn partners_come_out_in_arrival_order() {
        let now = Instant::now();
        let mut queue = PairingQueue::new();
        queue.enqueue(QueuedSession::new("a", "A", now));
        queue.enqueue(QueuedSession::new("b", "B", now));

        let partner = queue.pop_partner("c", live).unwrap();
        assert_eq!(partner.session_id, "a");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn never_pairs_a_session_with_itself() {
        let now = Instant::now();
        let mut queue = PairingQueue::new();
        queue.enqueue(QueuedSession::new("a", "A", now));
        assert!(queue.pop_partner("a", live).is_none());
        assert!(queue.contains("a"));
    }

    #[test]
    fn dead_entries_are_skipped_and_discarded() {
        let now = Instant::now();
        let mut queue = PairingQueue::new();
        queue.enqueue(QueuedSession::new("dead", "D", now));
        queue.enqueue(QueuedSession::new("b", "B", now));

        let partner = queue.pop_partner("c", |id| id != "dead").unwrap();
        assert_eq!(partner.session_id, "b");
        assert!(queue.is_empty());
    }

    #[test]
    fn rejoin_dedupes_and_remove_is_idempotent() {
        let now = Instant::now();
        let mut queue = PairingQueue::new();
        queue.enqueue(QueuedSession::new("a", "A", now));
        queue.enqueue(QueuedSession::new("a", "A", now));
        assert_eq!(queue.len(), 1);

        assert!(queue.remove("a").is_some());
        assert!(queue.remove("a").is_none());
    }

    #[test]
    fn prune_drops_idle_entries_but_touch_keeps_them() {
        let start = Instant::now();
        let mut queue = PairingQueue::new();
        queue.enqueue(QueuedSession::new("idle", "I", start));
        queue.enqueue(QueuedSession::new("busy", "B", start));

        let later = start + Duration::from_secs(40);
        queue.touch("busy", later);
        let dropped = queue.prune(later, Duration::from_secs(30), live);

        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].session_id, "idle");
        assert!(queue.contains("busy"));
    }

    #[test]
    fn prune_drops_dead_transports_and_keeps_order() {
        let now = Instant::now();
        let mut queue = PairingQueue::new();
        queue.enqueue(QueuedSession::new("a", "A", now));
        queue.enqueue(QueuedSession::new("gone", "G", now));
        queue.enqueue(QueuedSession::new("b", "B", now));

        let dropped = queue.prune(now, Duration::from_secs(30), |id| id != "gone");

        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].session_id, "gone");
        let order: Vec<_> = queue.iter().map(|q| q.session_id.as_str()).collect();
        assert_eq!(order, ["a", "b"]);
    }
}
