//! Scoring rules and runtime settings.
//!
//! `ScoringConfig` is built once and handed by reference to every pipeline
//! stage. `Settings` describes where data comes from and is read from
//! `BATTLE_PASS_*` environment variables.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::EventCategory;
use crate::source::RetryPolicy;

/// How upstream failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Surface the failure as an `EngineError`.
    Strict,
    /// Fall back (cache, snapshot, empty) and log a warning.
    #[default]
    Permissive,
}

/// What to do with a record whose timestamp cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTimestampPolicy {
    #[default]
    Exclude,
    /// Score it at the wall-clock time of the run. Results stop being
    /// reproducible across runs.
    UseNow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierMode {
    #[default]
    Percentile,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileCutoffs {
    pub gold: f64,
    pub silver: f64,
    pub bronze: f64,
}

impl Default for PercentileCutoffs {
    fn default() -> Self {
        Self {
            gold: 0.25,
            silver: 0.50,
            bronze: 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedThresholds {
    pub gold: i64,
    pub silver: i64,
    pub bronze: i64,
}

impl Default for FixedThresholds {
    fn default() -> Self {
        Self {
            gold: 75,
            silver: 50,
            bronze: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub base_points: BTreeMap<EventCategory, u32>,
    /// Community service is worth this regardless of the table.
    pub community_service_points: u32,
    pub volunteering_multiplier: f64,
    /// Number of non-volunteering events after a volunteering event that
    /// receive the multiplier.
    pub volunteering_window: usize,
    pub friend_first_points: u32,
    pub friend_additional_points: u32,
    pub unpaid_cap: f64,
    pub tier_mode: TierMode,
    pub percentile_cutoffs: PercentileCutoffs,
    pub fixed_thresholds: FixedThresholds,
    pub failure_policy: FailurePolicy,
    pub missing_timestamp: MissingTimestampPolicy,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let base_points = BTreeMap::from([
            (EventCategory::Gbm, 7),
            (EventCategory::ProfessionalDevelopment, 10),
            (EventCategory::PZone, 5),
            (EventCategory::MentorshipEvents, 7),
            (EventCategory::EBoardMeeting, 7),
            (EventCategory::JebEvents, 7),
            (EventCategory::CommunityService, 5),
            (EventCategory::ConventionAttendance, 15),
            (EventCategory::SocialEvents, 7),
            (EventCategory::MentorshipProgramParticipation, 10),
            (EventCategory::Unknown, 0),
        ]);

        Self {
            base_points,
            community_service_points: 5,
            volunteering_multiplier: 1.5,
            volunteering_window: 2,
            friend_first_points: 3,
            friend_additional_points: 1,
            unpaid_cap: 5.0,
            tier_mode: TierMode::Percentile,
            percentile_cutoffs: PercentileCutoffs::default(),
            fixed_thresholds: FixedThresholds::default(),
            failure_policy: FailurePolicy::Permissive,
            missing_timestamp: MissingTimestampPolicy::Exclude,
        }
    }
}

impl ScoringConfig {
    pub fn from_json_file(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: ScoringConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn points_for(&self, category: EventCategory) -> u32 {
        self.base_points.get(&category).copied().unwrap_or(0)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let cutoffs = self.percentile_cutoffs;
        let ordered = 0.0 <= cutoffs.gold
            && cutoffs.gold <= cutoffs.silver
            && cutoffs.silver <= cutoffs.bronze
            && cutoffs.bronze <= 1.0;
        if !ordered {
            return Err(EngineError::Config(format!(
                "percentile cutoffs must satisfy 0 <= gold <= silver <= bronze <= 1, got {:?}",
                cutoffs
            )));
        }

        let fixed = self.fixed_thresholds;
        if !(fixed.gold >= fixed.silver && fixed.silver >= fixed.bronze) {
            return Err(EngineError::Config(format!(
                "fixed thresholds must be descending, got {:?}",
                fixed
            )));
        }

        let usable = |value: f64| value.is_finite() && value >= 0.0;
        if !usable(self.volunteering_multiplier) || !usable(self.unpaid_cap) {
            return Err(EngineError::Config(
                "multiplier and unpaid cap must be finite and non-negative".to_string(),
            ));
        }

        Ok(())
    }
}

/// Where a tabular feed is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    None,
    File(PathBuf),
    Urls(Vec<String>),
}

impl SourceLocation {
    fn from_env(file_var: &str, url_var: &str) -> Self {
        if let Some(path) = env_string(file_var) {
            return SourceLocation::File(PathBuf::from(path));
        }
        match env_string(url_var) {
            Some(urls) => SourceLocation::Urls(
                urls.split(',')
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
                    .collect(),
            ),
            None => SourceLocation::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub sign_ins: SourceLocation,
    pub roster: SourceLocation,
    pub snapshot: Option<PathBuf>,
    pub overrides: Option<PathBuf>,
    pub scoring: Option<PathBuf>,
    pub sign_in_ttl: Duration,
    pub roster_ttl: Duration,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sign_ins: SourceLocation::None,
            roster: SourceLocation::None,
            snapshot: None,
            overrides: None,
            scoring: None,
            sign_in_ttl: Duration::from_secs(120),
            roster_ttl: Duration::from_secs(300),
            http_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> EngineResult<Self> {
        let defaults = Settings::default();

        let retry = RetryPolicy {
            max_retries: env_parse("BATTLE_PASS_RETRIES")?.unwrap_or(defaults.retry.max_retries),
            initial_delay: env_parse("BATTLE_PASS_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.initial_delay),
            max_delay: env_parse("BATTLE_PASS_BACKOFF_CAP_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_delay),
            ..defaults.retry
        };

        Ok(Self {
            sign_ins: SourceLocation::from_env("BATTLE_PASS_SIGNINS_CSV", "BATTLE_PASS_SIGNINS_URLS"),
            roster: SourceLocation::from_env("BATTLE_PASS_ROSTER_CSV", "BATTLE_PASS_ROSTER_URLS"),
            snapshot: env_string("BATTLE_PASS_SNAPSHOT_CSV").map(PathBuf::from),
            overrides: env_string("BATTLE_PASS_OVERRIDES").map(PathBuf::from),
            scoring: env_string("BATTLE_PASS_SCORING_CONFIG").map(PathBuf::from),
            sign_in_ttl: env_parse("BATTLE_PASS_SIGNIN_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sign_in_ttl),
            roster_ttl: env_parse("BATTLE_PASS_ROSTER_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.roster_ttl),
            http_timeout: env_parse("BATTLE_PASS_HTTP_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            retry,
        })
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> EngineResult<Option<T>> {
    match env_string(name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| EngineError::Config(format!("{name} has an invalid value: {value}"))),
        None => Ok(None),
    }
}
