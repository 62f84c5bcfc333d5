//! Threshold tables and the pure parts of rule evaluation. Everything here
//! is deterministic over a counter value; the engine owns the counters and
//! the unlock persistence.

/// Total kills.
pub const KILL_TIERS: &[(i64, &str)] = &[
    (100, "killer_bronze"),
    (500, "killer_silver"),
    (1_000, "killer_gold"),
    (5_000, "killer_platinum"),
    (10_000, "killer_diamond"),
];

/// Kills with a head or helmet hit location.
pub const HEADSHOT_TIERS: &[(i64, &str)] = &[
    (100, "headshot_bronze"),
    (500, "headshot_silver"),
    (1_000, "headshot_gold"),
    (5_000, "headshot_platinum"),
    (10_000, "headshot_diamond"),
];

/// Kills where the inflictor was a vehicle.
pub const VEHICLE_KILL_TIERS: &[(i64, &str)] = &[
    (5, "tank_destroyer_bronze"),
    (25, "tank_destroyer_silver"),
    (50, "tank_destroyer_gold"),
    (100, "tank_destroyer_platinum"),
    (250, "tank_destroyer_diamond"),
];

/// Health pickups.
pub const HEALTH_TIERS: &[(i64, &str)] = &[
    (10, "health_hoarder_bronze"),
    (50, "health_hoarder_silver"),
    (100, "health_hoarder_gold"),
    (250, "health_hoarder_platinum"),
    (500, "health_hoarder_diamond"),
];

/// Objective updates and captures.
pub const OBJECTIVE_TIERS: &[(i64, &str)] = &[
    (5, "objective_hero_bronze"),
    (25, "objective_hero_silver"),
    (100, "objective_hero_gold"),
    (250, "objective_hero_platinum"),
    (500, "objective_hero_diamond"),
];

/// Team wins and winning match outcomes.
pub const VICTOR_TIERS: &[(i64, &str)] = &[
    (10, "victor_bronze"),
    (25, "victor_silver"),
    (50, "victor_gold"),
    (100, "victor_platinum"),
    (250, "victor_diamond"),
];

/// Total distance moved, in kilometers.
pub const MARATHON_TIERS_KM: &[(f64, &str)] = &[
    (10.0, "marathon_bronze"),
    (50.0, "marathon_silver"),
    (100.0, "marathon_gold"),
];

/// A marathon tier fires only inside this window past the threshold, so an
/// already-passed tier doesn't re-fire on every later distance report.
pub const MARATHON_WINDOW_KM: f64 = 0.1;

/// Consecutive kills without dying. Matched exactly, since the counter
/// passes through each value once per run.
pub const STREAK_TIERS: &[(i64, &str)] = &[
    (5, "killing_spree"),
    (10, "unstoppable"),
    (20, "legendary"),
];

/// Per-weapon kill mastery: (weapon, kill count, slug).
pub const WEAPON_MASTERY: &[(&str, i64, &str)] = &[("kar98k", 500, "kar98k_elite")];

/// Every tier at or below `value`. Unlock persistence dedups, so emitting
/// already-held tiers is fine.
pub fn tiers_reached<'a>(
    tiers: &'a [(i64, &'a str)],
    value: i64,
) -> impl Iterator<Item = &'a str> {
    tiers
        .iter()
        .filter(move |(threshold, _)| value >= *threshold)
        .map(|&(_, slug)| slug)
}

pub fn marathon_tiers_crossed(km: f64) -> Vec<&'static str> {
    MARATHON_TIERS_KM
        .iter()
        .filter(|(threshold, _)| km >= *threshold && km < *threshold + MARATHON_WINDOW_KM)
        .map(|&(_, slug)| slug)
        .collect()
}

pub fn streak_tier_reached(streak: i64) -> Option<&'static str> {
    STREAK_TIERS
        .iter()
        .find(|(threshold, _)| *threshold == streak)
        .map(|&(_, slug)| slug)
}

pub fn weapon_mastery_tier(weapon: &str, kills: i64) -> Option<&'static str> {
    WEAPON_MASTERY
        .iter()
        .find(|(w, threshold, _)| *w == weapon && kills >= *threshold)
        .map(|&(_, _, slug)| slug)
}

pub fn is_headshot(hitloc: &str) -> bool {
    matches!(hitloc, "head" | "helmet")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_reached_includes_everything_at_or_below() {
        let reached: Vec<_> = tiers_reached(KILL_TIERS, 1_000).collect();
        assert_eq!(reached, vec!["killer_bronze", "killer_silver", "killer_gold"]);
    }

    #[test]
    fn tiers_reached_below_the_first_threshold_is_empty() {
        assert_eq!(tiers_reached(KILL_TIERS, 99).count(), 0);
    }

    #[test]
    fn marathon_fires_only_in_the_crossing_window() {
        assert_eq!(marathon_tiers_crossed(9.99), Vec::<&str>::new());
        assert_eq!(marathon_tiers_crossed(10.05), vec!["marathon_bronze"]);
        assert_eq!(marathon_tiers_crossed(10.2), Vec::<&str>::new());
        assert_eq!(marathon_tiers_crossed(50.0), vec!["marathon_silver"]);
    }

    #[test]
    fn streaks_match_exactly() {
        assert_eq!(streak_tier_reached(4), None);
        assert_eq!(streak_tier_reached(5), Some("killing_spree"));
        assert_eq!(streak_tier_reached(6), None);
        assert_eq!(streak_tier_reached(20), Some("legendary"));
    }

    #[test]
    fn weapon_mastery_applies_to_the_named_weapon_only() {
        assert_eq!(weapon_mastery_tier("kar98k", 499), None);
        assert_eq!(weapon_mastery_tier("kar98k", 500), Some("kar98k_elite"));
        assert_eq!(weapon_mastery_tier("thompson", 500), None);
    }

    #[test]
    fn helmet_counts_as_a_headshot() {
        assert!(is_headshot("head"));
        assert!(is_headshot("helmet"));
        assert!(!is_headshot("torso"));
        assert!(!is_headshot(""));
    }
}
