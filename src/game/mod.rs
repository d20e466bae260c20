//! Game simulation modules

pub mod ai;
pub mod clock;
pub mod combat;
pub mod engine;
pub mod entity;
pub mod events;
pub mod input;
pub mod r#match;
pub mod physics;
pub mod snapshot;
pub mod tuning;

pub use engine::{Engine, Mode};
pub use entity::Side;
pub use input::{InputHandle, Vec2};
pub use r#match::{MatchState, Phase};
pub use snapshot::{Snapshot, SnapshotError};
