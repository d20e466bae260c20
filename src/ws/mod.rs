//! Relay WebSocket endpoint and its wire protocol

pub mod handler;
pub mod protocol;
