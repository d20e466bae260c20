//! Time utilities for the simulation and its network timers

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Rate configuration
pub const SIMULATION_TPS: u32 = 60; // fixed physics steps per second
pub const SNAPSHOT_TPS: u32 = 20; // host -> client snapshots per second
pub const INPUT_TPS: u32 = 30; // client -> host input packets per second

/// Fixed simulation step in seconds
pub const FIXED_STEP: f32 = 1.0 / SIMULATION_TPS as f32;

/// Period of a timer firing `per_second` times a second
pub fn period(per_second: u32) -> Duration {
    Duration::from_micros(1_000_000 / per_second.max(1) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periods_match_rates() {
        assert_eq!(period(SNAPSHOT_TPS), Duration::from_millis(50));
        assert_eq!(period(INPUT_TPS), Duration::from_micros(33_333));
        assert_eq!(period(0), Duration::from_secs(1));
    }
}
