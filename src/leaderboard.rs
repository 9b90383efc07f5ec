//! End-to-end leaderboard computation.
//!
//! `compute` is a pure function of its inputs and the supplied clock, so
//! repeated calls over the same snapshot agree. `refresh` gathers the inputs
//! from the configured sources first, concurrently, and applies the failure
//! policy to whatever could not be read.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{NaiveDateTime, Utc};
use tracing::{debug, info, warn};

use crate::aggregate::aggregate_members;
use crate::cleanse::cleanse;
use crate::config::{FailurePolicy, ScoringConfig};
use crate::error::{EngineError, EngineResult};
use crate::identity::IdentityLinks;
use crate::models::{EventCategory, Leaderboard, RawRecord, RecordOrigin};
use crate::normalize::normalize_batch;
use crate::overrides::{load_overrides, ManualOverrides};
use crate::paid::{PaidStatusResolver, RosterState};
use crate::source::RecordSource;
use crate::tier::rank_members;

/// Everything one computation reads.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub live: Vec<RawRecord>,
    /// Historical export, always merged with live rows.
    pub snapshot: Vec<RawRecord>,
    pub roster: RosterState,
    pub overrides: ManualOverrides,
}

pub struct DataSources {
    pub sign_ins: Box<dyn RecordSource>,
    pub snapshot: Box<dyn RecordSource>,
    pub roster: Box<dyn RecordSource>,
    pub overrides: Option<PathBuf>,
}

pub struct LeaderboardBuilder {
    config: ScoringConfig,
}

impl LeaderboardBuilder {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn compute(&self, input: &PipelineInput, now: NaiveDateTime) -> EngineResult<Leaderboard> {
        let snapshot = normalize_batch(&input.snapshot, RecordOrigin::Snapshot);
        let live = normalize_batch(&input.live, RecordOrigin::Live);
        let dropped_records = snapshot.dropped + live.dropped;

        let resolver =
            PaidStatusResolver::new(&input.roster, &snapshot.records, self.config.failure_policy);

        let mut records = snapshot.records;
        records.extend(live.records);
        let cleansed = cleanse(records);

        let links = IdentityLinks::build(&cleansed.records);
        debug!(
            linked_emails = links.len(),
            conflicts = links.conflicts(),
            roster = resolver.roster_size(),
            roster_failed = resolver.roster_failed(),
            "identity and paid status ready"
        );
        let aggregated = aggregate_members(
            &cleansed.records,
            &resolver,
            &links,
            &input.overrides,
            &self.config,
            now,
        )?;

        let unknown_labels: Vec<String> = cleansed
            .records
            .iter()
            .filter(|record| record.category == EventCategory::Unknown)
            .map(|record| record.event_type_raw.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !unknown_labels.is_empty() {
            warn!(labels = ?unknown_labels, "event labels scored as Unknown");
        }

        let (entries, tier_thresholds) = rank_members(aggregated.members, &self.config);
        info!(
            members = entries.len(),
            dropped = dropped_records,
            excluded_undated = aggregated.excluded_undated,
            "leaderboard computed"
        );

        Ok(Leaderboard {
            total_members: entries.len(),
            entries,
            tier_thresholds,
            cleanse: cleansed.report,
            dropped_records,
            unknown_labels,
            degradations: Vec::new(),
        })
    }

    pub async fn refresh(&self, sources: &DataSources) -> EngineResult<Leaderboard> {
        let (live, snapshot, roster) = tokio::join!(
            sources.sign_ins.fetch(),
            sources.snapshot.fetch(),
            sources.roster.fetch()
        );

        let mut degradations = Vec::new();
        let live = self.recover(sources.sign_ins.name(), live, &mut degradations)?;
        let snapshot = self.recover(sources.snapshot.name(), snapshot, &mut degradations)?;
        let roster = match roster {
            Ok(rows) => RosterState::Loaded(rows),
            Err(err) => {
                degradations.push(format!("{}: {err}", sources.roster.name()));
                RosterState::Unavailable(err.to_string())
            }
        };

        let overrides = match &sources.overrides {
            Some(path) => match load_overrides(path) {
                Ok(overrides) => overrides,
                Err(err) if self.config.failure_policy == FailurePolicy::Permissive => {
                    warn!(path = %path.display(), error = %err, "ignoring unreadable overrides");
                    degradations.push(format!("overrides: {err}"));
                    ManualOverrides::new()
                }
                Err(err) => return Err(err),
            },
            None => ManualOverrides::new(),
        };

        let input = PipelineInput {
            live,
            snapshot,
            roster,
            overrides,
        };
        let mut leaderboard = self.compute(&input, Utc::now().naive_utc())?;
        leaderboard.degradations = degradations;
        Ok(leaderboard)
    }

    fn recover(
        &self,
        name: &str,
        fetched: EngineResult<Vec<RawRecord>>,
        degradations: &mut Vec<String>,
    ) -> EngineResult<Vec<RawRecord>> {
        match fetched {
            Ok(rows) => Ok(rows),
            Err(err) => match self.config.failure_policy {
                FailurePolicy::Permissive => {
                    warn!(source = name, error = %err, "source unavailable, continuing without it");
                    degradations.push(format!("{name}: {err}"));
                    Ok(Vec::new())
                }
                FailurePolicy::Strict => Err(match err {
                    EngineError::SourceUnavailable { .. } => err,
                    other => EngineError::unavailable(name, other.to_string()),
                }),
            },
        }
    }
}
