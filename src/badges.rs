//! Achievement badges derived from a member's scored history.
//!
//! Badges are informational. Their XP is reported next to the member's
//! points and never feeds back into leaderboard totals or tiers.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::{EventCategory, MemberAggregate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BadgeRequirement {
    PaidStatus,
    CategoryCount { category: EventCategory, count: usize },
    TotalEvents { count: usize },
    TotalPoints { points: i64 },
    /// Distinct recognized categories attended.
    CategoryVariety { categories: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub xp: u32,
    pub requirement: BadgeRequirement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BadgeProgress {
    pub id: String,
    pub name: String,
    pub xp: u32,
    pub earned: bool,
    pub current: i64,
    pub target: i64,
    /// Fraction of the target reached, clamped to `0.0..=1.0`.
    pub progress: f64,
}

fn badge(id: &str, name: &str, description: &str, xp: u32, requirement: BadgeRequirement) -> BadgeDefinition {
    BadgeDefinition {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        xp,
        requirement,
    }
}

fn attend(category: EventCategory, count: usize) -> BadgeRequirement {
    BadgeRequirement::CategoryCount { category, count }
}

pub fn default_badges() -> Vec<BadgeDefinition> {
    use EventCategory::*;

    vec![
        badge("paid-member", "Paid Member", "Pay chapter dues", 50, BadgeRequirement::PaidStatus),
        badge("gbm-starter", "GBM Starter", "Attend your first GBM", 15, attend(Gbm, 1)),
        badge("gbm-regular", "GBM Regular", "Attend 3 GBMs", 25, attend(Gbm, 3)),
        badge("gbm-champion", "GBM Champion", "Attend 5+ GBMs", 50, attend(Gbm, 5)),
        badge(
            "pd-explorer",
            "PD Explorer",
            "Attend 3 Professional Development events",
            35,
            attend(ProfessionalDevelopment, 3),
        ),
        badge(
            "pd-master",
            "PD Master",
            "Attend 5+ Professional Development events",
            60,
            attend(ProfessionalDevelopment, 5),
        ),
        badge(
            "conference-attendee",
            "Conference Attendee",
            "Attend a regional or national convention",
            75,
            attend(ConventionAttendance, 1),
        ),
        badge(
            "community-helper",
            "Community Helper",
            "Complete 2 Community Service events",
            25,
            attend(CommunityService, 2),
        ),
        badge("social-connector", "Social Connector", "Attend 3 Social events", 20, attend(SocialEvents, 3)),
        badge("study-warrior", "Study Warrior", "Attend 5 P-Zone study sessions", 25, attend(PZone, 5)),
        badge(
            "mentorship-seeker",
            "Mentorship Seeker",
            "Attend 2 Mentorship events",
            30,
            attend(MentorshipEvents, 2),
        ),
        badge(
            "consistent-member",
            "Consistent Member",
            "Attend 4 different event types",
            35,
            BadgeRequirement::CategoryVariety { categories: 4 },
        ),
        badge(
            "super-member",
            "Super Member",
            "Attend 15+ events in total",
            75,
            BadgeRequirement::TotalEvents { count: 15 },
        ),
    ]
}

/// Reads a replacement catalogue: a JSON array of badge definitions.
pub fn load_badges(path: &Path) -> EngineResult<Vec<BadgeDefinition>> {
    let text = std::fs::read_to_string(path)?;
    parse_badges(&text)
}

pub fn parse_badges(text: &str) -> EngineResult<Vec<BadgeDefinition>> {
    let catalogue: Vec<BadgeDefinition> = serde_json::from_str(text)?;
    let mut ids = BTreeSet::new();
    for definition in &catalogue {
        if !ids.insert(definition.id.as_str()) {
            return Err(EngineError::Config(format!(
                "badge id {} is defined twice",
                definition.id
            )));
        }
    }
    Ok(catalogue)
}

pub fn evaluate_badges(member: &MemberAggregate, catalogue: &[BadgeDefinition]) -> Vec<BadgeProgress> {
    catalogue
        .iter()
        .map(|definition| {
            let (current, target) = measure(member, definition.requirement);
            let progress = if target <= 0 {
                1.0
            } else {
                (current as f64 / target as f64).clamp(0.0, 1.0)
            };
            BadgeProgress {
                id: definition.id.clone(),
                name: definition.name.clone(),
                xp: definition.xp,
                earned: current >= target,
                current,
                target,
                progress,
            }
        })
        .collect()
}

pub fn earned_xp(progress: &[BadgeProgress]) -> u32 {
    progress.iter().filter(|badge| badge.earned).map(|badge| badge.xp).sum()
}

fn measure(member: &MemberAggregate, requirement: BadgeRequirement) -> (i64, i64) {
    match requirement {
        BadgeRequirement::PaidStatus => (i64::from(member.is_paid), 1),
        BadgeRequirement::CategoryCount { category, count } => {
            (member.count_in(category) as i64, count as i64)
        }
        BadgeRequirement::TotalEvents { count } => (member.event_count as i64, count as i64),
        BadgeRequirement::TotalPoints { points } => (member.total_points, points),
        BadgeRequirement::CategoryVariety { categories } => {
            let distinct: BTreeSet<EventCategory> = member
                .event_history
                .iter()
                .map(|event| event.category)
                .filter(|category| *category != EventCategory::Unknown)
                .collect();
            (distinct.len() as i64, categories as i64)
        }
    }
}
