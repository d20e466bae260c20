//! Match result recording

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::game::{MatchState, Phase, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
}

/// One completed match, from the local player's point of view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub outcome: Outcome,
    pub player_score: u8,
    pub opponent_score: u8,
    pub finished_at: DateTime<Utc>,
}

/// Profile/stats collaborator
pub trait StatsRecorder: Send + Sync {
    fn record(&self, result: MatchResult);
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSummary {
    pub wins: u32,
    pub losses: u32,
    pub last_result: Option<MatchResult>,
}

/// In-memory recorder
#[derive(Clone, Default)]
pub struct LocalStats {
    inner: Arc<Mutex<StatsSummary>>,
}

impl LocalStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> StatsSummary {
        self.inner.lock().clone()
    }
}

impl StatsRecorder for LocalStats {
    fn record(&self, result: MatchResult) {
        let mut summary = self.inner.lock();
        match result.outcome {
            Outcome::Win => summary.wins += 1,
            Outcome::Loss => summary.losses += 1,
        }
        info!(
            outcome = ?result.outcome,
            wins = summary.wins,
            losses = summary.losses,
            "Match recorded"
        );
        summary.last_result = Some(result);
    }
}

/// Reports each finished match exactly once, however often it is polled
#[derive(Debug, Default)]
pub struct MatchReporter {
    reported: bool,
}

impl MatchReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call after every frame or applied snapshot
    pub fn observe(&mut self, state: &MatchState, recorder: &dyn StatsRecorder) -> Option<Outcome> {
        if state.phase != Phase::MatchOver {
            self.reported = false;
            return None;
        }
        if self.reported {
            return None;
        }
        let winner = state.winner?;
        self.reported = true;

        let outcome = match winner {
            Side::Player => Outcome::Win,
            Side::Opponent => Outcome::Loss,
        };
        recorder.record(MatchResult {
            outcome,
            player_score: state.player_score,
            opponent_score: state.opponent_score,
            finished_at: Utc::now(),
        });
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(winner: Side) -> MatchState {
        let mut state = MatchState::default();
        state.start_match();
        state.win_round(winner);
        state.win_round(winner);
        state
    }

    #[test]
    fn reports_once_per_completed_match() {
        let stats = LocalStats::new();
        let mut reporter = MatchReporter::new();
        let state = finished(Side::Player);

        assert_eq!(reporter.observe(&state, &stats), Some(Outcome::Win));
        for _ in 0..10 {
            assert_eq!(reporter.observe(&state, &stats), None);
        }
        assert_eq!(stats.summary().wins, 1);
    }

    #[test]
    fn rematch_rearms_the_reporter() {
        let stats = LocalStats::new();
        let mut reporter = MatchReporter::new();

        reporter.observe(&finished(Side::Opponent), &stats);
        let mut state = MatchState::default();
        state.start_match();
        reporter.observe(&state, &stats);
        reporter.observe(&finished(Side::Opponent), &stats);

        let summary = stats.summary();
        assert_eq!(summary.losses, 2);
        assert_eq!(summary.last_result.map(|r| r.opponent_score), Some(2));
    }

    #[test]
    fn unfinished_matches_are_not_reported() {
        let stats = LocalStats::new();
        let mut reporter = MatchReporter::new();
        let mut state = MatchState::default();
        state.start_match();
        assert_eq!(reporter.observe(&state, &stats), None);
        assert_eq!(stats.summary().wins + stats.summary().losses, 0);
    }
}
