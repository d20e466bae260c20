//! Dodgeball arena: deterministic simulation, host-authoritative sync and the
//! pairing/relay server that connects two players.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod matchmaking;
pub mod net;
pub mod store;
pub mod util;
pub mod ws;
