//! WebSocket protocol message definitions
//! Relay wire types plus the peer payloads carried inside `RELAY` and over the direct channel

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::input::Vec2;
use crate::game::snapshot::{Snapshot, SnapshotError};

/// Assigned once per match by the pairing service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Runs the authoritative simulation
    Host,
    /// Sends input, renders snapshots
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// Messages sent from client to relay server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMsg {
    /// Sent on every connection open, including reconnects
    #[serde(rename_all = "camelCase")]
    JoinSession {
        /// Durable id chosen by the client, not the transport id
        session_id: String,
        #[serde(default)]
        username: String,
        #[serde(default)]
        is_reconnecting: bool,
    },

    /// Stop waiting for an opponent
    LeaveQueue,

    /// Quit the current match for good
    LeaveMatch,

    /// Opaque envelope forwarded to the opponent
    Relay { payload: serde_json::Value },

    /// Heartbeat
    Ping,
}

/// Messages sent from relay server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMsg {
    /// Paired with an opponent
    MatchFound { role: Role, code: String },

    /// Returned to a match after reconnecting within the grace window
    MatchRestored { role: Role, code: String },

    /// Waiting in the pairing queue
    Queued,

    OpponentReconnected,

    /// Opponent transport dropped; they may still come back
    OpponentDisconnectedTemp,

    /// Opponent quit the match explicitly
    OpponentLeft,

    /// Opponent never came back within the grace window
    PeerDisconnected,

    /// Envelope from the opponent
    Relay { payload: serde_json::Value },

    Pong,

    Error { code: String, message: String },
}

/// Client steering packet, in the sender's own view of the court
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPayload {
    /// Increases per packet so duplicates from the second transport can be dropped
    #[serde(default)]
    pub seq: u32,
    pub joystick: Vec2,
    #[serde(default)]
    pub is_throwing: bool,
    #[serde(default)]
    pub is_dodging: bool,
}

/// Peer-to-peer payloads. Wrapped in `RELAY` on the relay, sent bare on the direct channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerPayload {
    /// Host to client
    State { snapshot: Box<Snapshot> },
    /// Client to host
    Input { payload: InputPayload },
    Start,
    Restart,
    RematchRequest,
    /// Where the sender listens for direct datagrams. Only ever sent over the relay.
    DirectOffer { addr: String },
}

impl PeerPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerPayload::State { .. } => "state",
            PeerPayload::Input { .. } => "input",
            PeerPayload::Start => "start",
            PeerPayload::Restart => "restart",
            PeerPayload::RematchRequest => "rematch_request",
            PeerPayload::DirectOffer { .. } => "direct_offer",
        }
    }

    /// Parse and validate a payload taken out of a `RELAY` envelope
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProtocolError> {
        let payload: PeerPayload = serde_json::from_value(value)?;
        payload.validate()?;
        Ok(payload)
    }

    /// Parse and validate a bare direct-channel datagram
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let payload: PeerPayload = serde_json::from_slice(bytes)?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, ProtocolError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            PeerPayload::State { snapshot } => snapshot.validate()?,
            PeerPayload::Input { payload } => {
                if !payload.joystick.x.is_finite() || !payload.joystick.y.is_finite() {
                    return Err(ProtocolError::InvalidInput);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Malformed or unexpected wire data. Logged and dropped, never fatal.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("non-finite joystick")]
    InvalidInput,

    #[error("binary frames are not supported")]
    Binary,
}
