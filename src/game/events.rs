//! Transient presentation events

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::util::time::unix_millis;

use super::entity::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Hit,
    Catch,
    Throw,
    Pickup,
}

/// Something the presentation layer may want to flash, play or shake for.
/// Never read back by the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    pub id: u64,
    pub kind: EventKind,
    pub x: f32,
    pub z: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Who the event happened to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    pub time: u64,
}

/// Bounded ring buffer of recent events, oldest dropped first
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<GameEvent>,
    capacity: usize,
    next_id: u64,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    pub fn push(&mut self, kind: EventKind, x: f32, z: f32, side: Option<Side>, text: Option<&str>) {
        let event = GameEvent {
            id: self.next_id,
            kind,
            x,
            z,
            text: text.map(str::to_string),
            side,
            time: unix_millis(),
        };
        self.next_id += 1;
        self.insert(event);
    }

    /// Merge events produced elsewhere, skipping ids already seen
    pub fn merge(&mut self, incoming: &[GameEvent]) {
        for event in incoming {
            if event.id >= self.next_id {
                self.next_id = event.id + 1;
                self.insert(event.clone());
            }
        }
    }

    fn insert(&mut self, event: GameEvent) {
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// The newest `n` events, oldest first
    pub fn latest(&self, n: usize) -> Vec<GameEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GameEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Forget buffered events. Ids keep increasing so mirrors never re-accept old ones.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Full reset, including the id counter
    pub fn reset(&mut self) {
        self.events.clear();
        self.next_id = 1;
    }
}
