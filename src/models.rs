use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::cleanse::CleanseReport;

/// A flat row as it arrives from a sheet export, with header order preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: Vec<(String, String)>,
}

impl RawRecord {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(_, v)| v.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    #[serde(rename = "GBM")]
    Gbm,
    #[serde(rename = "Professional Development")]
    ProfessionalDevelopment,
    #[serde(rename = "P-Zone")]
    PZone,
    #[serde(rename = "Mentorship Events")]
    MentorshipEvents,
    #[serde(rename = "E-Board Meeting")]
    EBoardMeeting,
    #[serde(rename = "JEB Events")]
    JebEvents,
    #[serde(rename = "Community Service")]
    CommunityService,
    #[serde(rename = "Convention Attendance")]
    ConventionAttendance,
    #[serde(rename = "Social Events")]
    SocialEvents,
    #[serde(rename = "Mentorship Program Participation")]
    MentorshipProgramParticipation,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl EventCategory {
    pub const ALL: [EventCategory; 11] = [
        EventCategory::Gbm,
        EventCategory::ProfessionalDevelopment,
        EventCategory::PZone,
        EventCategory::MentorshipEvents,
        EventCategory::EBoardMeeting,
        EventCategory::JebEvents,
        EventCategory::CommunityService,
        EventCategory::ConventionAttendance,
        EventCategory::SocialEvents,
        EventCategory::MentorshipProgramParticipation,
        EventCategory::Unknown,
    ];

    pub fn label(self) -> &'static str {
        match self {
            EventCategory::Gbm => "GBM",
            EventCategory::ProfessionalDevelopment => "Professional Development",
            EventCategory::PZone => "P-Zone",
            EventCategory::MentorshipEvents => "Mentorship Events",
            EventCategory::EBoardMeeting => "E-Board Meeting",
            EventCategory::JebEvents => "JEB Events",
            EventCategory::CommunityService => "Community Service",
            EventCategory::ConventionAttendance => "Convention Attendance",
            EventCategory::SocialEvents => "Social Events",
            EventCategory::MentorshipProgramParticipation => "Mentorship Program Participation",
            EventCategory::Unknown => "Unknown",
        }
    }

    /// Sign-in forms number their options `1.`..`9.`; a leading code wins
    /// over keywords.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(EventCategory::Gbm),
            2 => Some(EventCategory::ProfessionalDevelopment),
            3 => Some(EventCategory::PZone),
            4 => Some(EventCategory::MentorshipEvents),
            5 => Some(EventCategory::EBoardMeeting),
            6 => Some(EventCategory::JebEvents),
            7 => Some(EventCategory::CommunityService),
            8 => Some(EventCategory::ConventionAttendance),
            9 => Some(EventCategory::SocialEvents),
            _ => None,
        }
    }

    pub fn classify(raw: &str) -> Self {
        let trimmed = raw.trim();
        let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Some(category) = digits.parse::<u32>().ok().and_then(Self::from_code) {
            return category;
        }

        let lower = trimmed.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));

        if has(&["gbm", "general body"]) {
            EventCategory::Gbm
        } else if has(&["professional"]) {
            EventCategory::ProfessionalDevelopment
        } else if has(&["p-zone", "pzone", "p zone", "m-zone"]) {
            EventCategory::PZone
        } else if has(&["mentorship program"]) {
            EventCategory::MentorshipProgramParticipation
        } else if has(&["mentorship", "mentor"]) {
            EventCategory::MentorshipEvents
        } else if has(&["e-board", "eboard", "executive board"]) {
            EventCategory::EBoardMeeting
        } else if has(&["jeb"]) {
            EventCategory::JebEvents
        } else if has(&["community", "service", "volunteer"]) {
            EventCategory::CommunityService
        } else if has(&["convention", "conference"]) {
            EventCategory::ConventionAttendance
        } else if has(&["social"]) {
            EventCategory::SocialEvents
        } else {
            EventCategory::Unknown
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    Live,
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignInRecord {
    pub handle: String,
    pub email: String,
    pub display_name: String,
    pub event_type_raw: String,
    pub category: EventCategory,
    pub date: Option<NaiveDate>,
    pub timestamp: Option<NaiveDateTime>,
    pub brought_friend: bool,
    pub friend_count: u32,
    pub origin: RecordOrigin,
}

impl SignInRecord {
    /// Rewrites the captured event label, re-deriving the category from it.
    pub fn relabel(&mut self, label: &str) {
        self.event_type_raw = label.to_string();
        self.category = EventCategory::classify(label);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub category: EventCategory,
    pub event_label: String,
    pub timestamp: NaiveDateTime,
    pub date: NaiveDate,
    pub table_points: u32,
    pub base_points: f64,
    pub awarded_base: i64,
    pub friend_count: u32,
    pub friend_points: i64,
    pub total: i64,
    pub volunteering_bonus: bool,
    pub capped: bool,
    pub pre_cap_points: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub adjustment: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberAggregate {
    pub handle: String,
    pub email: String,
    pub known_emails: Vec<String>,
    pub display_name: String,
    pub event_history: Vec<ScoreBreakdown>,
    pub event_count: usize,
    pub earned_points: i64,
    pub total_points: i64,
    pub is_paid: bool,
    pub manual_override: Option<ManualOverride>,
}

impl MemberAggregate {
    pub fn count_in(&self, category: EventCategory) -> usize {
        self.event_history
            .iter()
            .filter(|event| event.category == category)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Gold,
    Silver,
    Bronze,
    Participant,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Tier::Gold => "Gold",
            Tier::Silver => "Silver",
            Tier::Bronze => "Bronze",
            Tier::Participant => "Participant",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMember {
    pub rank: usize,
    pub tier: Tier,
    #[serde(flatten)]
    pub member: MemberAggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TierThresholds {
    /// Rank cutoffs (inclusive, 1-based) plus the lowest total inside each
    /// tier, when that tier is populated.
    Percentile {
        gold_rank: usize,
        silver_rank: usize,
        bronze_rank: usize,
        gold_min_points: Option<i64>,
        silver_min_points: Option<i64>,
        bronze_min_points: Option<i64>,
    },
    Fixed {
        gold: i64,
        silver: i64,
        bronze: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Leaderboard {
    pub entries: Vec<RankedMember>,
    pub tier_thresholds: TierThresholds,
    pub total_members: usize,
    pub cleanse: CleanseReport,
    pub dropped_records: usize,
    pub unknown_labels: Vec<String>,
    pub degradations: Vec<String>,
}
