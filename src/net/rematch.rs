//! Post-match rematch handshake

use tracing::debug;

use crate::ws::protocol::Role;

/// What the session should do after a rematch flag changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RematchAction {
    None,
    /// Host only: both flags set, reset and broadcast `restart`
    Restart,
}

/// Local and remote rematch flags of one finished match
#[derive(Debug, Clone, Default)]
pub struct Rematch {
    local: bool,
    remote: bool,
    restarted: bool,
}

impl Rematch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_requested(&self) -> bool {
        self.local
    }

    pub fn remote_requested(&self) -> bool {
        self.remote
    }

    /// Raise our own flag. Returns false if it was already raised.
    pub fn request_local(&mut self, role: Role) -> (bool, RematchAction) {
        let first = !self.local;
        self.local = true;
        (first, self.evaluate(role))
    }

    pub fn on_remote_request(&mut self, role: Role) -> RematchAction {
        self.remote = true;
        self.evaluate(role)
    }

    /// Clear both flags once the new match has started
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn evaluate(&mut self, role: Role) -> RematchAction {
        if role != Role::Host || !(self.local && self.remote) || self.restarted {
            return RematchAction::None;
        }
        self.restarted = true;
        debug!("Both sides asked for a rematch");
        RematchAction::Restart
    }
}
