//! Transport availability of one peer link

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Neither transport up yet
    Connecting,
    DirectOnly,
    RelayOnly,
    Dual,
    /// Torn down. No event leaves this state.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    RelayUp,
    RelayDown,
    DirectUp,
    DirectDown,
    Close,
}

#[derive(Debug, Clone)]
pub struct Link {
    relay: bool,
    direct: bool,
    state: LinkState,
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

impl Link {
    pub fn new() -> Self {
        Self {
            relay: false,
            direct: false,
            state: LinkState::Connecting,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn relay_up(&self) -> bool {
        self.relay && !self.is_closed()
    }

    pub fn direct_up(&self) -> bool {
        self.direct && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.state == LinkState::Closed
    }

    /// Feed a transport event, returning the resulting state
    pub fn apply(&mut self, event: LinkEvent) -> LinkState {
        if self.is_closed() {
            return self.state;
        }

        match event {
            LinkEvent::RelayUp => self.relay = true,
            LinkEvent::RelayDown => self.relay = false,
            LinkEvent::DirectUp => self.direct = true,
            LinkEvent::DirectDown => self.direct = false,
            LinkEvent::Close => {
                self.relay = false;
                self.direct = false;
            }
        }

        let next = match (event, self.relay, self.direct) {
            (LinkEvent::Close, _, _) => LinkState::Closed,
            (_, true, true) => LinkState::Dual,
            (_, true, false) => LinkState::RelayOnly,
            (_, false, true) => LinkState::DirectOnly,
            (_, false, false) => LinkState::Connecting,
        };

        if next != self.state {
            info!(from = ?self.state, to = ?next, ?event, "Link state changed");
            self.state = next;
        }
        self.state
    }
}
