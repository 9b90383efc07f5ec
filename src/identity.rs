//! Email <-> handle cross-reference built from sign-in records.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use tracing::info;

use crate::models::SignInRecord;

#[derive(Debug, Clone, Default)]
pub struct IdentityLinks {
    email_to_handle: HashMap<String, (String, Option<NaiveDateTime>)>,
    handle_to_email: HashMap<String, (String, Option<NaiveDateTime>)>,
    conflicts: usize,
}

impl IdentityLinks {
    /// Scans all records once. On conflicting mappings the record with the
    /// latest timestamp wins; undated records lose to dated ones.
    pub fn build(records: &[SignInRecord]) -> Self {
        let mut links = IdentityLinks::default();

        for record in records {
            if record.email.is_empty() || record.handle.is_empty() {
                continue;
            }
            if link(
                &mut links.email_to_handle,
                &record.email,
                &record.handle,
                record.timestamp,
            ) {
                links.conflicts += 1;
                info!(email = %record.email, handle = %record.handle, "email seen under several handles");
            }
            if link(
                &mut links.handle_to_email,
                &record.handle,
                &record.email,
                record.timestamp,
            ) {
                info!(handle = %record.handle, email = %record.email, "handle seen under several emails");
            }
        }

        links
    }

    pub fn handle_for(&self, email: &str) -> Option<&str> {
        self.email_to_handle
            .get(&email.trim().to_lowercase())
            .map(|(handle, _)| handle.as_str())
    }

    pub fn email_for(&self, handle: &str) -> Option<&str> {
        self.handle_to_email
            .get(&handle.trim().to_lowercase())
            .map(|(email, _)| email.as_str())
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    pub fn len(&self) -> usize {
        self.email_to_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.email_to_handle.is_empty()
    }
}

/// Returns true when an existing, different mapping was seen.
fn link(
    map: &mut HashMap<String, (String, Option<NaiveDateTime>)>,
    key: &str,
    value: &str,
    seen_at: Option<NaiveDateTime>,
) -> bool {
    match map.get_mut(key) {
        Some((current, current_at)) => {
            if current.as_str() == value {
                if seen_at > *current_at {
                    *current_at = seen_at;
                }
                return false;
            }
            if seen_at >= *current_at {
                *current = value.to_string();
                *current_at = seen_at;
            }
            true
        }
        None => {
            map.insert(key.to_string(), (value.to_string(), seen_at));
            false
        }
    }
}
