//! Attendance scoring for a member club: sign-in rows are normalized,
//! cleansed, linked to identities, scored, aggregated per member and ranked
//! into tiers.

pub mod aggregate;
pub mod badges;
pub mod cleanse;
pub mod config;
pub mod error;
pub mod history;
pub mod identity;
pub mod leaderboard;
pub mod models;
pub mod normalize;
pub mod overrides;
pub mod paid;
pub mod report;
pub mod score;
pub mod source;
pub mod tier;

pub use config::{ScoringConfig, Settings};
pub use error::{EngineError, EngineResult};
pub use leaderboard::{DataSources, LeaderboardBuilder, PipelineInput};
pub use models::{Leaderboard, RankedMember, Tier};
