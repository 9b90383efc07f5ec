use std::fmt::Write;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::badges::{earned_xp, BadgeProgress};
use crate::cleanse::CleanseReport;
use crate::history::AttendanceHistory;
use crate::models::{Leaderboard, RankedMember, Tier, TierThresholds};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierSummary {
    pub tier: Tier,
    pub members: usize,
    pub avg_points: f64,
}

pub fn summarize_by_tier(entries: &[RankedMember]) -> Vec<TierSummary> {
    let mut map: std::collections::BTreeMap<Tier, (usize, i64)> =
        std::collections::BTreeMap::new();

    for entry in entries {
        let slot = map.entry(entry.tier).or_insert((0, 0));
        slot.0 += 1;
        slot.1 += entry.member.total_points;
    }

    map.into_iter()
        .map(|(tier, (members, total_points))| TierSummary {
            tier,
            members,
            avg_points: if members == 0 {
                0.0
            } else {
                total_points as f64 / members as f64
            },
        })
        .collect()
}

pub fn format_entry(entry: &RankedMember) -> String {
    let member = &entry.member;
    let mut line = format!(
        "#{} {} ({}) {} pts, {} events, {}",
        entry.rank,
        member.display_name,
        member.handle,
        member.total_points,
        member.event_count,
        entry.tier
    );
    if !member.is_paid {
        line.push_str(", unpaid");
    }
    line
}

pub fn describe_thresholds(thresholds: &TierThresholds) -> String {
    match thresholds {
        TierThresholds::Percentile {
            gold_rank,
            silver_rank,
            bronze_rank,
            gold_min_points,
            silver_min_points,
            bronze_min_points,
        } => {
            let floor = |points: &Option<i64>| match points {
                Some(points) => format!("{points}+ pts"),
                None => "empty".to_string(),
            };
            format!(
                "Gold ranks 1-{gold_rank} ({}), Silver to {silver_rank} ({}), Bronze to {bronze_rank} ({})",
                floor(gold_min_points),
                floor(silver_min_points),
                floor(bronze_min_points)
            )
        }
        TierThresholds::Fixed {
            gold,
            silver,
            bronze,
        } => format!("Gold {gold}+ pts, Silver {silver}+ pts, Bronze {bronze}+ pts"),
    }
}

pub fn render_cleanse_report(report: &CleanseReport, issues: &[String]) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "## Data Cleansing");
    let _ = writeln!(output, "- Records processed: {}", report.total_processed);
    let _ = writeln!(output, "- Event types fixed: {}", report.event_types_fixed);
    let _ = writeln!(output, "- Duplicates removed: {}", report.duplicates_removed);
    let _ = writeln!(output, "- Final entries: {}", report.final_entries);

    if !report.consensus.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "### Event Type by Date");
        for day in &report.consensus {
            let _ = writeln!(
                output,
                "- {}: {} ({}/{} sign-ins)",
                day.date, day.label, day.votes, day.total
            );
        }
    }

    let _ = writeln!(output);
    if issues.is_empty() {
        let _ = writeln!(output, "Validation passed.");
    } else {
        let _ = writeln!(output, "### Validation Issues");
        for issue in issues {
            let _ = writeln!(output, "- {issue}");
        }
    }

    output
}

pub fn build_report(leaderboard: &Leaderboard, generated_at: NaiveDateTime, limit: usize) -> String {
    let summaries = summarize_by_tier(&leaderboard.entries);

    let mut output = String::new();

    let _ = writeln!(output, "# Battle Pass Leaderboard Report");
    let _ = writeln!(
        output,
        "Generated {} for {} members",
        generated_at.format("%Y-%m-%d %H:%M"),
        leaderboard.total_members
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Tier Mix");
    let _ = writeln!(output, "{}", describe_thresholds(&leaderboard.tier_thresholds));

    if summaries.is_empty() {
        let _ = writeln!(output, "No members ranked.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} members (avg {:.1} pts)",
                summary.tier, summary.members, summary.avg_points
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Standings");

    if leaderboard.entries.is_empty() {
        let _ = writeln!(output, "No sign-ins recorded yet.");
    } else {
        for entry in leaderboard.entries.iter().take(limit) {
            let _ = writeln!(output, "- {}", format_entry(entry));
        }
    }

    let adjusted: Vec<&RankedMember> = leaderboard
        .entries
        .iter()
        .filter(|entry| entry.member.manual_override.is_some())
        .collect();
    if !adjusted.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Manual Adjustments");
        for entry in adjusted {
            if let Some(applied) = &entry.member.manual_override {
                let _ = writeln!(
                    output,
                    "- {}: {:+} ({})",
                    entry.member.handle,
                    applied.adjustment,
                    if applied.reason.is_empty() {
                        "no reason given"
                    } else {
                        applied.reason.as_str()
                    }
                );
            }
        }
    }

    let _ = writeln!(output);
    output.push_str(&render_cleanse_report(&leaderboard.cleanse, &[]));
    if leaderboard.dropped_records > 0 {
        let _ = writeln!(
            output,
            "{} rows dropped for missing email or event.",
            leaderboard.dropped_records
        );
    }

    if !leaderboard.unknown_labels.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Unrecognized Event Labels");
        for label in &leaderboard.unknown_labels {
            let _ = writeln!(output, "- {label}");
        }
    }

    if !leaderboard.degradations.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Degraded Sources");
        for note in &leaderboard.degradations {
            let _ = writeln!(output, "- {note}");
        }
    }

    output
}

pub fn render_history(history: &AttendanceHistory) -> String {
    let mut output = String::new();
    let summary = &history.summary;

    let _ = writeln!(
        output,
        "{} ({}) rank #{} {}{}",
        history.display_name,
        history.handle,
        history.rank,
        history.tier,
        if history.is_paid { "" } else { ", unpaid" }
    );
    let _ = writeln!(
        output,
        "{} events, {} pts (avg {:.1}), {} capped, {} with friends, {} volunteering bonuses",
        summary.total_events,
        summary.total_points,
        summary.average_points,
        summary.capped_events,
        summary.friend_referrals,
        summary.volunteering_bonuses
    );
    if let Some(applied) = &history.manual_override {
        let _ = writeln!(output, "Manual adjustment {:+}: {}", applied.adjustment, applied.reason);
    }

    for event in &history.events {
        let mut flags = Vec::new();
        if event.volunteering_bonus {
            flags.push("volunteering x1.5".to_string());
        }
        if event.friend_points > 0 {
            flags.push(format!("+{} friends", event.friend_points));
        }
        if let Some(pre_cap) = event.pre_cap_points {
            flags.push(format!("capped from {pre_cap}"));
        }
        let _ = write!(
            output,
            "- {} {} ({}): {} pts",
            event.date, event.event_label, event.category, event.total
        );
        if !flags.is_empty() {
            let _ = write!(output, " [{}]", flags.join(", "));
        }
        let _ = writeln!(output);
    }

    output
}

pub fn render_badges(handle: &str, progress: &[BadgeProgress]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Badges for {handle}: {} XP earned", earned_xp(progress));
    for badge in progress {
        let _ = writeln!(
            output,
            "- [{}] {} ({} XP) {}/{}",
            if badge.earned { "x" } else { " " },
            badge.name,
            badge.xp,
            badge.current.min(badge.target),
            badge.target
        );
    }
    output
}
