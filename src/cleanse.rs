//! Batch cleansing: one event type per calendar date by majority vote, then
//! one sign-in per member per date.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::models::{EventCategory, SignInRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateConsensus {
    pub date: NaiveDate,
    pub label: String,
    pub votes: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanseReport {
    pub total_processed: usize,
    pub event_types_fixed: usize,
    pub duplicates_removed: usize,
    pub final_entries: usize,
    pub consensus: Vec<DateConsensus>,
}

#[derive(Debug, Clone)]
pub struct CleanseOutcome {
    pub records: Vec<SignInRecord>,
    pub report: CleanseReport,
}

pub fn cleanse(records: Vec<SignInRecord>) -> CleanseOutcome {
    let total_processed = records.len();
    let consensus = majority_labels(&records);
    let (records, event_types_fixed) = apply_consensus(records, &consensus);
    let (records, duplicates_removed) = remove_duplicates(records);

    let report = CleanseReport {
        total_processed,
        event_types_fixed,
        duplicates_removed,
        final_entries: records.len(),
        consensus: consensus.into_values().collect(),
    };

    info!(
        processed = report.total_processed,
        fixed = report.event_types_fixed,
        removed = report.duplicates_removed,
        "cleansing complete"
    );
    CleanseOutcome { records, report }
}

/// Plurality label per date. Ties go to the label seen first.
pub fn majority_labels(records: &[SignInRecord]) -> BTreeMap<NaiveDate, DateConsensus> {
    let mut tallies: BTreeMap<NaiveDate, Vec<(String, usize)>> = BTreeMap::new();

    for record in records {
        let Some(date) = record.date else {
            continue;
        };
        let tally = tallies.entry(date).or_default();
        match tally.iter_mut().find(|(label, _)| *label == record.event_type_raw) {
            Some((_, count)) => *count += 1,
            None => tally.push((record.event_type_raw.clone(), 1)),
        }
    }

    tallies
        .into_iter()
        .filter_map(|(date, tally)| {
            let total: usize = tally.iter().map(|(_, count)| count).sum();
            let mut winner: Option<&(String, usize)> = None;
            for entry in &tally {
                if winner.map_or(true, |best| entry.1 > best.1) {
                    winner = Some(entry);
                }
            }
            winner.map(|(label, votes)| {
                debug!(%date, label = %label, votes, total, "event type consensus");
                (
                    date,
                    DateConsensus {
                        date,
                        label: label.clone(),
                        votes: *votes,
                        total,
                    },
                )
            })
        })
        .collect()
}

fn apply_consensus(
    records: Vec<SignInRecord>,
    consensus: &BTreeMap<NaiveDate, DateConsensus>,
) -> (Vec<SignInRecord>, usize) {
    let mut fixed = 0;
    let records = records
        .into_iter()
        .map(|mut record| {
            let canonical = record.date.and_then(|date| consensus.get(&date));
            if let Some(canonical) = canonical {
                if record.event_type_raw != canonical.label {
                    debug!(
                        handle = %record.handle,
                        from = %record.event_type_raw,
                        to = %canonical.label,
                        "rewrote event type to date consensus"
                    );
                    record.relabel(&canonical.label);
                    fixed += 1;
                }
            }
            record
        })
        .collect();
    (records, fixed)
}

/// Keeps the first sign-in per `(handle, date)`. Undated records are never
/// treated as duplicates of each other.
pub fn remove_duplicates(records: Vec<SignInRecord>) -> (Vec<SignInRecord>, usize) {
    let mut seen: HashSet<(String, NaiveDate)> = HashSet::new();
    let mut kept = Vec::with_capacity(records.len());
    let mut removed = 0;

    for record in records {
        if let Some(date) = record.date {
            if !seen.insert((record.handle.to_lowercase(), date)) {
                debug!(handle = %record.handle, %date, "dropped duplicate sign-in");
                removed += 1;
                continue;
            }
        }
        kept.push(record);
    }

    (kept, removed)
}

/// Data-entry issues worth fixing upstream. Not errors.
pub fn validate(records: &[SignInRecord]) -> Vec<String> {
    let mut issues = Vec::new();
    let mut seen: HashSet<(String, NaiveDate)> = HashSet::new();

    for (index, record) in records.iter().enumerate() {
        let row = index + 1;
        if record.handle.is_empty() {
            issues.push(format!("Entry {row}: missing handle"));
        }
        match record.date {
            None => issues.push(format!("Entry {row}: missing or unreadable timestamp")),
            Some(date) => {
                if !seen.insert((record.handle.to_lowercase(), date)) {
                    issues.push(format!("Potential duplicate: {} on {}", record.handle, date));
                }
            }
        }
        if record.category == EventCategory::Unknown {
            issues.push(format!(
                "Entry {row}: unrecognized event type \"{}\"",
                record.event_type_raw
            ));
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordOrigin;

    fn sign_in(handle: &str, date: Option<(i32, u32, u32)>, event: &str) -> SignInRecord {
        let date = date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d));
        SignInRecord {
            handle: handle.to_string(),
            email: format!("{handle}@umich.edu"),
            display_name: handle.to_string(),
            event_type_raw: event.to_string(),
            category: EventCategory::classify(event),
            date,
            timestamp: date.and_then(|d| d.and_hms_opt(18, 0, 0)),
            brought_friend: false,
            friend_count: 0,
            origin: RecordOrigin::Live,
        }
    }

    const JAN_10: Option<(i32, u32, u32)> = Some((2025, 1, 10));

    #[test]
    fn majority_label_rewrites_minority() {
        let records = vec![
            sign_in("a", JAN_10, "GBM"),
            sign_in("b", JAN_10, "GBM"),
            sign_in("c", JAN_10, "GBM"),
            sign_in("d", JAN_10, "P-Zone"),
        ];
        let outcome = cleanse(records);
        assert!(outcome.records.iter().all(|r| r.event_type_raw == "GBM"));
        assert!(outcome.records.iter().all(|r| r.category == EventCategory::Gbm));
        assert_eq!(outcome.report.event_types_fixed, 1);
        assert_eq!(outcome.report.consensus[0].votes, 3);
        assert_eq!(outcome.report.consensus[0].total, 4);
    }

    #[test]
    fn tie_goes_to_first_seen_label() {
        let records = vec![
            sign_in("a", JAN_10, "P-Zone"),
            sign_in("b", JAN_10, "GBM"),
            sign_in("c", JAN_10, "GBM"),
            sign_in("d", JAN_10, "P-Zone"),
        ];
        let outcome = cleanse(records);
        assert!(outcome.records.iter().all(|r| r.event_type_raw == "P-Zone"));
        assert_eq!(outcome.report.event_types_fixed, 2);
    }

    #[test]
    fn second_pass_removes_nothing() {
        let records = vec![
            sign_in("abc", JAN_10, "GBM"),
            sign_in("ABC", JAN_10, "GBM"),
            sign_in("xyz", JAN_10, "GBM"),
            sign_in("xyz", Some((2025, 1, 17)), "Social"),
        ];
        let first = cleanse(records);
        assert_eq!(first.report.duplicates_removed, 1);

        let second = cleanse(first.records.clone());
        assert_eq!(second.report.duplicates_removed, 0);
        assert_eq!(second.report.event_types_fixed, 0);
        assert_eq!(second.records, first.records);
    }

    #[test]
    fn duplicate_keeps_one_record_labelled_by_whole_day_vote() {
        let records = vec![
            sign_in("abc", JAN_10, "GBM"),
            sign_in("abc", JAN_10, "P-Zone"),
            sign_in("def", JAN_10, "P-Zone"),
            sign_in("ghi", JAN_10, "P-Zone"),
        ];
        let outcome = cleanse(records);
        let abc: Vec<_> = outcome.records.iter().filter(|r| r.handle == "abc").collect();
        assert_eq!(abc.len(), 1);
        assert_eq!(abc[0].event_type_raw, "P-Zone");
        assert_eq!(outcome.report.final_entries, 3);
    }

    #[test]
    fn undated_records_skip_vote_and_dedup() {
        let records = vec![
            sign_in("abc", None, "Social"),
            sign_in("abc", None, "Social"),
            sign_in("abc", JAN_10, "GBM"),
        ];
        let outcome = cleanse(records);
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.report.consensus.len(), 1);
        assert_eq!(outcome.records[0].event_type_raw, "Social");
    }

    #[test]
    fn validate_flags_upstream_issues() {
        let records = vec![
            sign_in("abc", None, "GBM"),
            sign_in("def", JAN_10, "bake sale"),
            sign_in("def", JAN_10, "GBM"),
        ];
        let issues = validate(&records);
        assert_eq!(issues.len(), 3);
        assert!(issues[0].contains("timestamp"));
        assert!(issues[1].contains("bake sale"));
        assert!(issues[2].starts_with("Potential duplicate"));
    }
}
