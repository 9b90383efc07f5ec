//! Turns loosely-shaped sheet rows into typed `SignInRecord`s.
//!
//! Header text differs between form revisions (numbering, embedded line
//! breaks, trailing spaces), so fields are located by phrase rather than by
//! exact name. Nothing downstream of this module sees raw header text.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::debug;

use crate::models::{EventCategory, RawRecord, RecordOrigin, SignInRecord};

const DATE_TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const TIME_FORMATS: [&str; 4] = ["%H:%M:%S", "%H:%M", "%I:%M:%S %p", "%I:%M %p"];

#[derive(Debug, Clone, Default)]
pub struct NormalizeOutcome {
    pub records: Vec<SignInRecord>,
    pub dropped: usize,
    pub missing_timestamp: usize,
}

pub fn normalize_batch(rows: &[RawRecord], origin: RecordOrigin) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome::default();

    for row in rows {
        match normalize_record(row, origin) {
            Some(record) => {
                if record.timestamp.is_none() {
                    outcome.missing_timestamp += 1;
                }
                outcome.records.push(record);
            }
            None => outcome.dropped += 1,
        }
    }

    debug!(
        kept = outcome.records.len(),
        dropped = outcome.dropped,
        missing_timestamp = outcome.missing_timestamp,
        ?origin,
        "normalized sign-in rows"
    );
    outcome
}

/// Returns `None` when the row has no email or no event type.
pub fn normalize_record(raw: &RawRecord, origin: RecordOrigin) -> Option<SignInRecord> {
    let email = find_field(raw, |key| key.contains("email"))?.to_lowercase();
    let event_type_raw = find_field(raw, |key| {
        key.contains("event") && !key.contains("friend") && !key.contains("how many")
    })?
    .to_string();

    let local_part = email.split('@').next().unwrap_or_default().to_string();
    let handle = find_field(raw, |key| {
        key.contains("uniqname") || key.contains("handle") || key.contains("username")
    })
    .map(str::to_lowercase)
    .unwrap_or_else(|| local_part.clone());

    let display_name = find_field(raw, |key| key.contains("full name") || key == "name")
        .map(str::to_string)
        .unwrap_or_else(|| {
            if handle.is_empty() {
                local_part.clone()
            } else {
                handle.clone()
            }
        });

    let timestamp = find_field(raw, |key| key.contains("timestamp")).and_then(parse_timestamp);

    let brought_friend = find_field(raw, |key| {
        key.contains("bring a friend") || key.contains("brought friend") || key.contains("bring friends")
    })
    .map(parse_yes)
    .unwrap_or(false);
    let friend_count = find_field(raw, |key| key.contains("how many") || key.contains("friend count"))
        .map(parse_count)
        .unwrap_or(0);

    Some(SignInRecord {
        handle,
        email,
        display_name,
        category: EventCategory::classify(&event_type_raw),
        event_type_raw,
        date: timestamp.map(|ts| ts.date()),
        timestamp,
        brought_friend,
        friend_count,
        origin,
    })
}

/// First field whose normalized header satisfies `matches` and whose value is
/// non-blank.
fn find_field<'a>(raw: &'a RawRecord, matches: impl Fn(&str) -> bool) -> Option<&'a str> {
    raw.fields()
        .filter(|(key, _)| matches(&normalize_header(key)))
        .map(|(_, value)| value.trim())
        .find(|value| !value.is_empty())
}

fn normalize_header(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Accepts RFC 3339, ISO-like `YYYY-MM-DD[ HH:MM[:SS]]`, and the sheet's
/// `MM/DD/YYYY[, time]` shape.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }
    for format in DATE_TIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN));
    }

    parse_month_first(value)
}

fn parse_month_first(value: &str) -> Option<NaiveDateTime> {
    let (date_part, rest) = match value.find([' ', ',']) {
        Some(idx) => value.split_at(idx),
        None => (value, ""),
    };
    let date = NaiveDate::parse_from_str(date_part, "%m/%d/%Y").ok()?;

    let rest = rest.trim_start_matches([',', ' ']).trim();
    let time = TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(rest, format).ok())
        .unwrap_or(NaiveTime::MIN);

    Some(date.and_time(time))
}

fn parse_yes(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "yes" | "y" | "true")
}

fn parse_count(value: &str) -> u32 {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}
