//! Member lookup and per-member attendance history.

use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    EventCategory, Leaderboard, ManualOverride, RankedMember, ScoreBreakdown, Tier,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySummary {
    pub total_events: usize,
    pub total_points: i64,
    /// Total points per event, one decimal place.
    pub average_points: f64,
    pub capped_events: usize,
    /// Events where at least one friend was brought along.
    pub friend_referrals: usize,
    pub volunteering_bonuses: usize,
    pub unknown_events: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceHistory {
    pub handle: String,
    pub display_name: String,
    pub email: String,
    pub rank: usize,
    pub tier: Tier,
    pub is_paid: bool,
    pub manual_override: Option<ManualOverride>,
    /// Chronological.
    pub events: Vec<ScoreBreakdown>,
    pub summary: HistorySummary,
}

/// Exact match on handle, email or display name first, then the first
/// member whose handle, email or display name contains the identifier.
pub fn find_member<'a>(leaderboard: &'a Leaderboard, identifier: &str) -> Option<&'a RankedMember> {
    let needle = identifier.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    let fields = |entry: &RankedMember| {
        let member = &entry.member;
        [
            member.handle.to_lowercase(),
            member.email.to_lowercase(),
            member.display_name.to_lowercase(),
        ]
    };

    leaderboard
        .entries
        .iter()
        .find(|entry| {
            fields(entry).iter().any(|value| *value == needle)
                || entry.member.known_emails.iter().any(|email| *email == needle)
        })
        .or_else(|| {
            leaderboard
                .entries
                .iter()
                .find(|entry| fields(entry).iter().any(|value| value.contains(&needle)))
        })
}

pub fn member_history(leaderboard: &Leaderboard, identifier: &str) -> EngineResult<AttendanceHistory> {
    find_member(leaderboard, identifier)
        .map(attendance_history)
        .ok_or_else(|| EngineError::MemberNotFound(identifier.to_string()))
}

pub fn attendance_history(entry: &RankedMember) -> AttendanceHistory {
    let member = &entry.member;
    let events = member.event_history.clone();
    let count_where = |pred: fn(&ScoreBreakdown) -> bool| events.iter().filter(|e| pred(e)).count();

    let average_points = if events.is_empty() {
        0.0
    } else {
        (member.total_points as f64 / events.len() as f64 * 10.0).round() / 10.0
    };

    let summary = HistorySummary {
        total_events: events.len(),
        total_points: member.total_points,
        average_points,
        capped_events: count_where(|e| e.capped),
        friend_referrals: count_where(|e| e.friend_count > 0),
        volunteering_bonuses: count_where(|e| e.volunteering_bonus),
        unknown_events: count_where(|e| e.category == EventCategory::Unknown),
    };

    AttendanceHistory {
        handle: member.handle.clone(),
        display_name: member.display_name.clone(),
        email: member.email.clone(),
        rank: entry.rank,
        tier: entry.tier,
        is_paid: member.is_paid,
        manual_override: member.manual_override.clone(),
        events,
        summary,
    }
}
