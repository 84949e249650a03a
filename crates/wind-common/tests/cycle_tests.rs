//! Tests for cycle arithmetic across whole days and date rollovers.

use chrono::{Duration, TimeZone, Timelike, Utc};
use wind_common::{cycle_label_for, start_of_day, Cycle, ForecastOffset, ValidTime};

#[test]
fn test_cycle_hour_is_aligned_and_not_after_instant() {
    let day = Utc.with_ymd_and_hms(2024, 2, 28, 0, 0, 0).unwrap();

    // Every 7 minutes over two days, crossing the leap day.
    let mut t = day;
    while t < day + Duration::days(2) {
        let cycle = Cycle::containing(&t);
        assert!([0, 6, 12, 18].contains(&cycle.hour()), "bad hour for {}", t);
        assert!(cycle.hour() <= t.hour());
        assert!(cycle.start() <= t);
        assert!(t - cycle.start() < Duration::hours(6));
        assert_eq!(cycle_label_for(&t), cycle.label());
        t += Duration::minutes(7);
    }
}

#[test]
fn test_label_round_trips_through_parse() {
    let mut cycle = Cycle::parse_label("2023123100").unwrap();
    for _ in 0..12 {
        let parsed = Cycle::parse_label(&cycle.label()).unwrap();
        assert_eq!(parsed, cycle);
        cycle = cycle.next().unwrap();
    }
    assert_eq!(cycle.label(), "2024010300");
}

#[test]
fn test_forecast_horizon_valid_times() {
    let cycle = Cycle::parse_label("2024011512").unwrap();
    let labels: Vec<String> = (6..=240)
        .step_by(6)
        .map(|h| ValidTime::new(cycle, ForecastOffset::new(h)).label())
        .collect();

    assert_eq!(labels.len(), 40);
    assert_eq!(labels.first().map(String::as_str), Some("2024011518"));
    assert_eq!(labels.last().map(String::as_str), Some("2024012512"));
}

#[test]
fn test_distance_is_symmetric() {
    let cycle = Cycle::parse_label("2024010106").unwrap();
    let before = Utc.with_ymd_and_hms(2024, 1, 1, 4, 0, 0).unwrap();
    let after = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
    assert_eq!(cycle.distance_from(&before), Duration::hours(2));
    assert_eq!(cycle.distance_from(&after), Duration::hours(2));
}

#[test]
fn test_first_cycle_of_day_starts_at_midnight() {
    let t = Utc.with_ymd_and_hms(2024, 7, 4, 3, 0, 0).unwrap();
    assert_eq!(Cycle::containing(&t).start(), start_of_day(&t));
}
