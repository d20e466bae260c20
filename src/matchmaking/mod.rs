//! Matchmaking: FIFO pairing queue and the relay hub built around it

pub mod queue;
pub mod service;

pub use queue::{PairingQueue, QueuedSession};
pub use service::{ConnId, HubConfig, RelayHub, Session};
