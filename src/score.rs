use chrono::NaiveDateTime;

use crate::config::ScoringConfig;
use crate::models::{EventCategory, ScoreBreakdown, SignInRecord};

/// Scores one sign-in given the member's already-scored, chronologically
/// ordered earlier events.
///
/// `timestamp` is the instant the event is ordered by; callers pass the
/// record's own timestamp, or a substitute under the use-now policy.
pub fn score_event(
    record: &SignInRecord,
    timestamp: NaiveDateTime,
    prior: &[ScoreBreakdown],
    is_paid: bool,
    config: &ScoringConfig,
) -> ScoreBreakdown {
    let category = record.category;
    let table_points = config.points_for(category);

    let mut base = if category == EventCategory::CommunityService {
        config.community_service_points as f64
    } else {
        table_points as f64
    };

    let friend_points = friend_points(record.brought_friend, record.friend_count, config);

    let volunteering_bonus = volunteering_bonus_applies(category, prior, config);
    if volunteering_bonus {
        base *= config.volunteering_multiplier;
    }

    let pre_cap = base;
    let capped =
        !is_paid && category != EventCategory::CommunityService && base > config.unpaid_cap;
    if capped {
        base = config.unpaid_cap;
    }

    let awarded_base = base.round() as i64;

    ScoreBreakdown {
        category,
        event_label: record.event_type_raw.clone(),
        timestamp,
        date: timestamp.date(),
        table_points,
        base_points: pre_cap,
        awarded_base,
        friend_count: record.friend_count,
        friend_points,
        total: awarded_base + friend_points,
        volunteering_bonus,
        capped,
        pre_cap_points: capped.then_some(pre_cap),
    }
}

/// First friend earns the full bonus, each additional friend the smaller one.
pub fn friend_points(brought_friend: bool, friend_count: u32, config: &ScoringConfig) -> i64 {
    if !brought_friend || friend_count == 0 {
        return 0;
    }
    config.friend_first_points as i64
        + (friend_count as i64 - 1) * config.friend_additional_points as i64
}

/// The multiplier covers the first `volunteering_window` non-volunteering
/// events after the member's most recent volunteering event.
pub fn volunteering_bonus_applies(
    category: EventCategory,
    prior: &[ScoreBreakdown],
    config: &ScoringConfig,
) -> bool {
    if category == EventCategory::CommunityService {
        return false;
    }

    match prior
        .iter()
        .rposition(|event| event.category == EventCategory::CommunityService)
    {
        Some(idx) => {
            let since = prior[idx + 1..]
                .iter()
                .filter(|event| event.category != EventCategory::CommunityService)
                .count();
            since < config.volunteering_window
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordOrigin;
    use chrono::{Duration, NaiveDate};

    fn base_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 9, 5)
            .and_then(|d| d.and_hms_opt(18, 0, 0))
            .unwrap()
    }

    fn sample_record(event: &str, friends: u32) -> SignInRecord {
        SignInRecord {
            handle: "averyl".to_string(),
            email: "averyl@umich.edu".to_string(),
            display_name: "Avery Lee".to_string(),
            event_type_raw: event.to_string(),
            category: EventCategory::classify(event),
            date: Some(base_time().date()),
            timestamp: Some(base_time()),
            brought_friend: friends > 0,
            friend_count: friends,
            origin: RecordOrigin::Live,
        }
    }

    fn replay(events: &[&str], is_paid: bool) -> Vec<ScoreBreakdown> {
        let config = ScoringConfig::default();
        let mut history: Vec<ScoreBreakdown> = Vec::new();
        for (day, event) in events.iter().enumerate() {
            let at = base_time() + Duration::days(day as i64 * 7);
            let scored = score_event(&sample_record(event, 0), at, &history, is_paid, &config);
            history.push(scored);
        }
        history
    }

    #[test]
    fn paid_member_earns_table_points() {
        let config = ScoringConfig::default();
        let scored = score_event(&sample_record("Convention", 0), base_time(), &[], true, &config);
        assert_eq!(scored.total, 15);
        assert!(!scored.capped);
        assert!(!scored.volunteering_bonus);
    }

    #[test]
    fn volunteering_bonus_covers_next_two_events() {
        let history = replay(&["Community Service", "GBM", "GBM", "GBM"], true);
        let bonuses: Vec<bool> = history.iter().map(|e| e.volunteering_bonus).collect();
        assert_eq!(bonuses, vec![false, true, true, false]);
        // 7 * 1.5 = 10.5 rounds half away from zero
        assert_eq!(history[1].total, 11);
        assert_eq!(history[3].total, 7);
    }

    #[test]
    fn new_volunteering_event_restarts_window() {
        let history = replay(
            &["Community Service", "GBM", "Community Service", "GBM", "GBM", "GBM"],
            true,
        );
        let bonuses: Vec<bool> = history.iter().map(|e| e.volunteering_bonus).collect();
        assert_eq!(bonuses, vec![false, true, false, true, true, false]);
    }

    #[test]
    fn unpaid_cap_spares_community_service() {
        let config = ScoringConfig::default();
        let pd = score_event(
            &sample_record("Professional Development", 0),
            base_time(),
            &[],
            false,
            &config,
        );
        assert_eq!(pd.total, 5);
        assert!(pd.capped);
        assert_eq!(pd.pre_cap_points, Some(10.0));
        assert_eq!(pd.table_points, 10);

        let service = score_event(
            &sample_record("Community Service", 0),
            base_time(),
            &[],
            false,
            &config,
        );
        assert_eq!(service.total, 5);
        assert!(!service.capped);
    }

    #[test]
    fn friend_points_are_added_after_cap() {
        let config = ScoringConfig::default();
        let scored = score_event(
            &sample_record("Professional Development", 3),
            base_time(),
            &[],
            false,
            &config,
        );
        assert_eq!(scored.awarded_base, 5);
        assert_eq!(scored.friend_points, 5);
        assert_eq!(scored.total, 10);
    }

    #[test]
    fn friend_points_require_flag_and_count() {
        let config = ScoringConfig::default();
        assert_eq!(friend_points(true, 1, &config), 3);
        assert_eq!(friend_points(true, 4, &config), 6);
        assert_eq!(friend_points(true, 0, &config), 0);
        assert_eq!(friend_points(false, 2, &config), 0);
    }

    #[test]
    fn unknown_event_scores_zero_base() {
        let config = ScoringConfig::default();
        let scored = score_event(&sample_record("bake sale", 1), base_time(), &[], true, &config);
        assert_eq!(scored.category, EventCategory::Unknown);
        assert_eq!(scored.awarded_base, 0);
        assert_eq!(scored.total, 3);
    }

    #[test]
    fn community_service_flat_points_override_table() {
        let mut config = ScoringConfig::default();
        config
            .base_points
            .insert(EventCategory::CommunityService, 12);
        let scored = score_event(
            &sample_record("Community Service", 0),
            base_time(),
            &[],
            true,
            &config,
        );
        assert_eq!(scored.table_points, 12);
        assert_eq!(scored.total, 5);
    }
}
