//! Ranking and tier assignment.
//!
//! Percentile mode compares members against each other: the first
//! `ceil(n * cutoff)` ranks fall in each tier. Fixed mode compares a total
//! against point thresholds and needs no population, so it suits scoring a
//! single member in isolation.

use tracing::debug;

use crate::config::{FixedThresholds, PercentileCutoffs, ScoringConfig, TierMode};
use crate::models::{MemberAggregate, RankedMember, Tier, TierThresholds};

/// Sorts by total, highest first. Equal totals keep their input order.
pub fn rank_members(
    mut members: Vec<MemberAggregate>,
    config: &ScoringConfig,
) -> (Vec<RankedMember>, TierThresholds) {
    members.sort_by(|a, b| b.total_points.cmp(&a.total_points));

    match config.tier_mode {
        TierMode::Percentile => rank_by_percentile(members, config.percentile_cutoffs),
        TierMode::Fixed => rank_by_points(members, config.fixed_thresholds),
    }
}

pub fn percentile_boundaries(total: usize, cutoffs: PercentileCutoffs) -> (usize, usize, usize) {
    let boundary = |cutoff: f64| ((total as f64) * cutoff).ceil() as usize;
    (
        boundary(cutoffs.gold),
        boundary(cutoffs.silver),
        boundary(cutoffs.bronze),
    )
}

pub fn percentile_tier(index: usize, boundaries: (usize, usize, usize)) -> Tier {
    let (gold, silver, bronze) = boundaries;
    if index < gold {
        Tier::Gold
    } else if index < silver {
        Tier::Silver
    } else if index < bronze {
        Tier::Bronze
    } else {
        Tier::Participant
    }
}

pub fn fixed_tier(points: i64, thresholds: FixedThresholds) -> Tier {
    if points >= thresholds.gold {
        Tier::Gold
    } else if points >= thresholds.silver {
        Tier::Silver
    } else if points >= thresholds.bronze {
        Tier::Bronze
    } else {
        Tier::Participant
    }
}

fn rank_by_percentile(
    members: Vec<MemberAggregate>,
    cutoffs: PercentileCutoffs,
) -> (Vec<RankedMember>, TierThresholds) {
    let boundaries = percentile_boundaries(members.len(), cutoffs);
    let (gold, silver, bronze) = boundaries;
    debug!(total = members.len(), gold, silver, bronze, "percentile tier boundaries");

    let ranked: Vec<RankedMember> = members
        .into_iter()
        .enumerate()
        .map(|(index, member)| RankedMember {
            rank: index + 1,
            tier: percentile_tier(index, boundaries),
            member,
        })
        .collect();

    let lowest_in = |start: usize, end: usize| {
        if end > start {
            ranked.get(end - 1).map(|entry| entry.member.total_points)
        } else {
            None
        }
    };
    let thresholds = TierThresholds::Percentile {
        gold_rank: gold,
        silver_rank: silver,
        bronze_rank: bronze,
        gold_min_points: lowest_in(0, gold),
        silver_min_points: lowest_in(gold, silver),
        bronze_min_points: lowest_in(silver, bronze),
    };

    (ranked, thresholds)
}

fn rank_by_points(
    members: Vec<MemberAggregate>,
    thresholds: FixedThresholds,
) -> (Vec<RankedMember>, TierThresholds) {
    let ranked = members
        .into_iter()
        .enumerate()
        .map(|(index, member)| RankedMember {
            rank: index + 1,
            tier: fixed_tier(member.total_points, thresholds),
            member,
        })
        .collect();

    (
        ranked,
        TierThresholds::Fixed {
            gold: thresholds.gold,
            silver: thresholds.silver,
            bronze: thresholds.bronze,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(handle: &str, total_points: i64) -> MemberAggregate {
        MemberAggregate {
            handle: handle.to_string(),
            email: format!("{handle}@umich.edu"),
            known_emails: vec![format!("{handle}@umich.edu")],
            display_name: handle.to_string(),
            event_history: Vec::new(),
            event_count: 0,
            earned_points: total_points,
            total_points,
            is_paid: true,
            manual_override: None,
        }
    }

    fn tiers_for(count: usize) -> Vec<Tier> {
        let members = (0..count)
            .map(|i| member(&format!("m{i}"), (count - i) as i64))
            .collect();
        let (ranked, _) = rank_members(members, &ScoringConfig::default());
        ranked.into_iter().map(|entry| entry.tier).collect()
    }

    #[test]
    fn hundred_members_split_into_quartiles() {
        let tiers = tiers_for(100);
        assert!(tiers[..25].iter().all(|t| *t == Tier::Gold));
        assert!(tiers[25..50].iter().all(|t| *t == Tier::Silver));
        assert!(tiers[50..75].iter().all(|t| *t == Tier::Bronze));
        assert!(tiers[75..].iter().all(|t| *t == Tier::Participant));
    }

    #[test]
    fn four_members_get_one_tier_each() {
        assert_eq!(
            tiers_for(4),
            vec![Tier::Gold, Tier::Silver, Tier::Bronze, Tier::Participant]
        );
    }

    #[test]
    fn boundaries_round_up() {
        let cutoffs = PercentileCutoffs::default();
        assert_eq!(percentile_boundaries(10, cutoffs), (3, 5, 8));
        assert_eq!(percentile_boundaries(1, cutoffs), (1, 1, 1));
        assert_eq!(percentile_boundaries(0, cutoffs), (0, 0, 0));
    }

    #[test]
    fn equal_totals_keep_input_order() {
        let members = vec![member("first", 10), member("top", 20), member("second", 10)];
        let (ranked, _) = rank_members(members, &ScoringConfig::default());
        let handles: Vec<&str> = ranked.iter().map(|e| e.member.handle.as_str()).collect();
        assert_eq!(handles, vec!["top", "first", "second"]);
        assert_eq!(ranked[2].rank, 3);
    }

    #[test]
    fn thresholds_report_lowest_total_in_each_tier() {
        let members = (1..=8).map(|i| member(&format!("m{i}"), i * 10)).collect();
        let (_, thresholds) = rank_members(members, &ScoringConfig::default());
        assert_eq!(
            thresholds,
            TierThresholds::Percentile {
                gold_rank: 2,
                silver_rank: 4,
                bronze_rank: 6,
                gold_min_points: Some(70),
                silver_min_points: Some(50),
                bronze_min_points: Some(30),
            }
        );
    }

    #[test]
    fn fixed_mode_uses_point_thresholds() {
        let config = ScoringConfig {
            tier_mode: TierMode::Fixed,
            ..ScoringConfig::default()
        };
        let members = vec![member("a", 80), member("b", 50), member("c", 24)];
        let (ranked, thresholds) = rank_members(members, &config);
        let tiers: Vec<Tier> = ranked.iter().map(|e| e.tier).collect();
        assert_eq!(tiers, vec![Tier::Gold, Tier::Silver, Tier::Participant]);
        assert!(matches!(thresholds, TierThresholds::Fixed { gold: 75, .. }));
        assert_eq!(fixed_tier(25, FixedThresholds::default()), Tier::Bronze);
    }
}
