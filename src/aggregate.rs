//! Per-member replay of the score calculator.
//!
//! Volunteering bonuses depend on what came before, so each member's events
//! are folded in timestamp order with the already-scored history as the
//! accumulator.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::config::{MissingTimestampPolicy, ScoringConfig};
use crate::error::EngineResult;
use crate::identity::IdentityLinks;
use crate::models::{MemberAggregate, ScoreBreakdown, SignInRecord};
use crate::overrides::ManualOverrides;
use crate::paid::PaidStatusResolver;
use crate::score::score_event;

#[derive(Debug, Clone, Default)]
pub struct AggregateOutcome {
    /// Members in order of first appearance in the input.
    pub members: Vec<MemberAggregate>,
    pub excluded_undated: usize,
}

pub fn aggregate_members(
    records: &[SignInRecord],
    resolver: &PaidStatusResolver,
    links: &IdentityLinks,
    overrides: &ManualOverrides,
    config: &ScoringConfig,
    now: NaiveDateTime,
) -> EngineResult<AggregateOutcome> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&SignInRecord>> = HashMap::new();
    for record in records {
        let handle = record.handle.as_str();
        groups
            .entry(handle)
            .or_insert_with(|| {
                order.push(handle);
                Vec::new()
            })
            .push(record);
    }

    let mut outcome = AggregateOutcome::default();
    for handle in order {
        let member_records = &groups[handle];

        let mut timed: Vec<(NaiveDateTime, &SignInRecord)> =
            Vec::with_capacity(member_records.len());
        for &record in member_records {
            match (record.timestamp, config.missing_timestamp) {
                (Some(ts), _) => timed.push((ts, record)),
                (None, MissingTimestampPolicy::UseNow) => timed.push((now, record)),
                (None, MissingTimestampPolicy::Exclude) => outcome.excluded_undated += 1,
            }
        }
        if timed.is_empty() {
            debug!(handle, "member has no scorable sign-ins");
            continue;
        }
        timed.sort_by_key(|(ts, _)| *ts);

        let mut known_emails: Vec<String> = Vec::new();
        for record in member_records {
            if !record.email.is_empty() && !known_emails.contains(&record.email) {
                known_emails.push(record.email.clone());
            }
        }

        let is_paid = resolver.is_paid(handle, &known_emails, links)?;

        let event_history = timed.iter().fold(
            Vec::with_capacity(timed.len()),
            |mut history: Vec<ScoreBreakdown>, (ts, record)| {
                let scored = score_event(record, *ts, &history, is_paid, config);
                history.push(scored);
                history
            },
        );

        let earned_points: i64 = event_history.iter().map(|event| event.total).sum();
        let manual_override = known_emails
            .iter()
            .find_map(|email| overrides.get(email.as_str()))
            .cloned();
        let adjustment = manual_override.as_ref().map_or(0, |o| o.adjustment);
        if let Some(applied) = &manual_override {
            info!(handle, adjustment = applied.adjustment, reason = %applied.reason, "applied manual override");
        }

        let first = member_records[0];
        outcome.members.push(MemberAggregate {
            handle: handle.to_string(),
            email: first.email.clone(),
            known_emails,
            display_name: first.display_name.clone(),
            event_count: event_history.len(),
            event_history,
            earned_points,
            total_points: earned_points + adjustment,
            is_paid,
            manual_override,
        });
    }

    debug!(
        members = outcome.members.len(),
        excluded_undated = outcome.excluded_undated,
        "aggregated members"
    );
    Ok(outcome)
}
