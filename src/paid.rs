//! Dues-paid status.
//!
//! The roster sheet has no stable header for its email column, so every
//! field of every row is scanned for an `@`-bearing value. When the roster
//! is empty or unreachable, members present in the historical snapshot count
//! as paid; the snapshot only holds members who were verified in earlier
//! semesters. Only when both are missing does the permissive policy assume
//! everyone paid.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::FailurePolicy;
use crate::error::{EngineError, EngineResult};
use crate::identity::IdentityLinks;
use crate::models::{RawRecord, SignInRecord};

/// Result of fetching the paid roster.
#[derive(Debug, Clone)]
pub enum RosterState {
    /// Fetched successfully; an empty roster means "unknown", not "nobody".
    Loaded(Vec<RawRecord>),
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RosterStatus {
    Live,
    Empty,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PaidStatusResolver {
    roster_emails: HashSet<String>,
    snapshot_emails: HashSet<String>,
    status: RosterStatus,
    policy: FailurePolicy,
}

impl PaidStatusResolver {
    pub fn new(roster: &RosterState, snapshot: &[SignInRecord], policy: FailurePolicy) -> Self {
        let (roster_emails, status) = match roster {
            RosterState::Loaded(rows) => {
                let emails = roster_emails(rows);
                let status = if emails.is_empty() {
                    RosterStatus::Empty
                } else {
                    RosterStatus::Live
                };
                (emails, status)
            }
            RosterState::Unavailable(reason) => {
                (HashSet::new(), RosterStatus::Failed(reason.clone()))
            }
        };

        let snapshot_emails: HashSet<String> = snapshot
            .iter()
            .map(|record| normalize_email(&record.email))
            .filter(|email| !email.is_empty())
            .collect();

        if let RosterStatus::Failed(reason) = &status {
            if policy == FailurePolicy::Permissive {
                if snapshot_emails.is_empty() {
                    warn!(%reason, "paid roster and snapshot both unavailable, assuming every member paid");
                } else {
                    warn!(%reason, "paid roster unavailable, resolving from snapshot");
                }
            }
        }

        Self {
            roster_emails,
            snapshot_emails,
            status,
            policy,
        }
    }

    /// Checks every email known for the member plus the email the identity
    /// links associate with `handle`.
    pub fn is_paid(
        &self,
        handle: &str,
        emails: &[String],
        links: &IdentityLinks,
    ) -> EngineResult<bool> {
        let mut candidates: Vec<String> = emails.iter().map(|e| normalize_email(e)).collect();
        if let Some(linked) = links.email_for(handle) {
            let linked = normalize_email(linked);
            if !candidates.contains(&linked) {
                candidates.push(linked);
            }
        }
        candidates.retain(|email| !email.is_empty());

        let paid = match &self.status {
            RosterStatus::Live => candidates.iter().any(|e| self.roster_emails.contains(e)),
            RosterStatus::Empty => candidates.iter().any(|e| self.snapshot_emails.contains(e)),
            RosterStatus::Failed(reason) => match self.policy {
                FailurePolicy::Strict => return Err(EngineError::RosterUnavailable(reason.clone())),
                FailurePolicy::Permissive if self.snapshot_emails.is_empty() => true,
                FailurePolicy::Permissive => {
                    candidates.iter().any(|e| self.snapshot_emails.contains(e))
                }
            },
        };

        debug!(handle, paid, "resolved paid status");
        Ok(paid)
    }

    pub fn roster_size(&self) -> usize {
        self.roster_emails.len()
    }

    pub fn roster_failed(&self) -> bool {
        matches!(self.status, RosterStatus::Failed(_))
    }
}

/// True when any field of any roster row equals `email`, ignoring case.
pub fn roster_contains(roster: &[RawRecord], email: &str) -> bool {
    let email = normalize_email(email);
    !email.is_empty() && roster_emails(roster).contains(&email)
}

fn roster_emails(rows: &[RawRecord]) -> HashSet<String> {
    rows.iter()
        .flat_map(|row| row.values())
        .filter(|value| value.contains('@'))
        .map(normalize_email)
        .collect()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventCategory, RecordOrigin};

    fn roster_row(column: &str, email: &str) -> RawRecord {
        RawRecord::from_pairs([("Name", "Someone"), (column, email), ("Chapter", "UM")])
    }

    fn snapshot_record(email: &str) -> SignInRecord {
        SignInRecord {
            handle: "hist".to_string(),
            email: email.to_string(),
            display_name: "hist".to_string(),
            event_type_raw: "GBM".to_string(),
            category: EventCategory::Gbm,
            date: None,
            timestamp: None,
            brought_friend: false,
            friend_count: 0,
            origin: RecordOrigin::Snapshot,
        }
    }

    fn emails(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn matches_email_in_any_column() {
        let roster = vec![
            roster_row("E-mail (school)", " Avery@UMich.edu"),
            roster_row("Contact", "jules@umich.edu"),
        ];
        assert!(roster_contains(&roster, "avery@umich.edu"));
        assert!(roster_contains(&roster, "JULES@umich.edu"));
        assert!(!roster_contains(&roster, "kiara@umich.edu"));
    }

    #[test]
    fn live_roster_ignores_snapshot() {
        let state = RosterState::Loaded(vec![roster_row("Email", "paid@umich.edu")]);
        let resolver = PaidStatusResolver::new(
            &state,
            &[snapshot_record("old@umich.edu")],
            FailurePolicy::Permissive,
        );
        let links = IdentityLinks::default();
        assert!(resolver.is_paid("p", &emails(&["paid@umich.edu"]), &links).unwrap());
        assert!(!resolver.is_paid("o", &emails(&["old@umich.edu"]), &links).unwrap());
    }

    #[test]
    fn empty_roster_falls_back_to_snapshot() {
        let resolver = PaidStatusResolver::new(
            &RosterState::Loaded(Vec::new()),
            &[snapshot_record("old@umich.edu")],
            FailurePolicy::Strict,
        );
        let links = IdentityLinks::default();
        assert!(resolver.is_paid("o", &emails(&["Old@umich.edu"]), &links).unwrap());
        assert!(!resolver.is_paid("n", &emails(&["new@umich.edu"]), &links).unwrap());
    }

    #[test]
    fn linked_email_is_checked_for_handle() {
        let state = RosterState::Loaded(vec![roster_row("Email", "primary@umich.edu")]);
        let resolver = PaidStatusResolver::new(&state, &[], FailurePolicy::Permissive);
        let mut record = snapshot_record("primary@umich.edu");
        record.handle = "kpatel".to_string();
        let links = IdentityLinks::build(&[record]);
        assert!(resolver
            .is_paid("kpatel", &emails(&["alias@gmail.com"]), &links)
            .unwrap());
    }

    #[test]
    fn unavailable_roster_depends_on_policy() {
        let state = RosterState::Unavailable("HTTP 503".to_string());
        let links = IdentityLinks::default();

        let strict = PaidStatusResolver::new(&state, &[], FailurePolicy::Strict);
        assert!(matches!(
            strict.is_paid("x", &emails(&["x@umich.edu"]), &links),
            Err(EngineError::RosterUnavailable(_))
        ));

        let permissive = PaidStatusResolver::new(&state, &[], FailurePolicy::Permissive);
        assert!(permissive.roster_failed());
        assert!(permissive.is_paid("x", &emails(&["x@umich.edu"]), &links).unwrap());
    }

    #[test]
    fn unreachable_roster_falls_back_to_snapshot() {
        let resolver = PaidStatusResolver::new(
            &RosterState::Unavailable("HTTP 503".to_string()),
            &[snapshot_record("old@umich.edu")],
            FailurePolicy::Permissive,
        );
        let links = IdentityLinks::default();
        assert!(resolver.roster_failed());
        assert!(resolver.is_paid("o", &emails(&["old@umich.edu"]), &links).unwrap());
        assert!(!resolver.is_paid("n", &emails(&["new@umich.edu"]), &links).unwrap());
    }
}
