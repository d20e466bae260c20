//! Host-authoritative synchronization over a relay and an optional direct channel

pub mod direct;
pub mod link;
pub mod perspective;
pub mod rematch;
pub mod relay;
pub mod session;

pub use link::{Link, LinkEvent, LinkState};
pub use perspective::invert;
pub use session::{SessionCommand, SessionStatus, SessionView, SyncSession};
