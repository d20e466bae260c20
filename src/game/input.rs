//! Input snapshot written by input collaborators and consumed once per step

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Planar vector. As a joystick, `y` points toward the local player's own back line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Clamp both axes into [-1, 1]; non-finite components become 0
    pub fn clamped(self) -> Self {
        let clamp = |v: f32| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
        Self::new(clamp(self.x), clamp(self.y))
    }

    pub fn negated(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Momentary actions, true for exactly one consumption
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Actions {
    pub throw: bool,
    pub dodge: bool,
}

/// Latest local input state
#[derive(Debug, Clone, Default)]
pub struct InputSnapshot {
    pub joystick: Vec2,
    pub is_throwing: bool,
    pub is_dodging: bool,
}

impl InputSnapshot {
    /// Read and clear the momentary flags
    pub fn take_actions(&mut self) -> Actions {
        let actions = Actions {
            throw: self.is_throwing,
            dodge: self.is_dodging,
        };
        self.is_throwing = false;
        self.is_dodging = false;
        actions
    }
}

/// Shared handle that input collaborators write into
#[derive(Debug, Clone, Default)]
pub struct InputHandle {
    inner: Arc<Mutex<InputSnapshot>>,
}

impl InputHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_joystick(&self, joystick: Vec2) {
        self.inner.lock().joystick = joystick.clamped();
    }

    pub fn press_throw(&self) {
        self.inner.lock().is_throwing = true;
    }

    pub fn press_dodge(&self) {
        self.inner.lock().is_dodging = true;
    }

    /// Current steering plus the pending actions, which are cleared
    pub fn take(&self) -> (Vec2, Actions) {
        let mut guard = self.inner.lock();
        let actions = guard.take_actions();
        (guard.joystick, actions)
    }

    pub fn joystick(&self) -> Vec2 {
        self.inner.lock().joystick
    }

    pub fn clear(&self) {
        *self.inner.lock() = InputSnapshot::default();
    }
}

/// Input received from the remote client, kept in host world frame
#[derive(Debug, Clone, Default)]
pub struct RemoteInput {
    last_seq: u32,
    steer: Vec2,
    pending: Actions,
}

impl RemoteInput {
    /// Accept a packet in the sender's own frame. Returns false for duplicates and
    /// out-of-order packets, which are dropped.
    pub fn accept(&mut self, seq: u32, joystick: Vec2, throw: bool, dodge: bool) -> bool {
        if seq != 0 && seq <= self.last_seq {
            return false;
        }
        self.last_seq = seq;
        // The remote player looks at the court from the opposite end.
        self.steer = joystick.clamped().negated();
        self.pending.throw |= throw;
        self.pending.dodge |= dodge;
        true
    }

    pub fn steer(&self) -> Vec2 {
        self.steer
    }

    /// Consume the latched actions for one step
    pub fn take_actions(&mut self) -> Actions {
        std::mem::take(&mut self.pending)
    }

    /// Stop the remote entity without forgetting the sequence position
    pub fn release(&mut self) {
        self.steer = Vec2::ZERO;
        self.pending = Actions::default();
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
