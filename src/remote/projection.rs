use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::{
    model::{DataPoint, LogEntry},
    settings::GoalConfig,
    utils::time::utc_time_of_seconds,
};

/// Turns raw log entries into the per-day data points a goal expects. An
/// entry counts toward the goal when any of its tags matches the goal's tag
/// list, each matching ping is worth the configured gap, and pings are
/// grouped by UTC calendar day so the result doesn't depend on the machine's
/// timezone. The point's timestamp is the day's first matching ping.
pub fn project_entries(
    entries: &[LogEntry],
    goal: &GoalConfig,
    gap_minutes: u32,
) -> Vec<DataPoint> {
    let mut days: BTreeMap<NaiveDate, (i64, u32)> = BTreeMap::new();

    for entry in entries {
        if !matches_tags(&entry.tags, &goal.tags) {
            continue;
        }
        let day = utc_time_of_seconds(entry.timestamp).date_naive();
        let slot = days.entry(day).or_insert((entry.timestamp, 0));
        slot.0 = slot.0.min(entry.timestamp);
        slot.1 += 1;
    }

    days.into_values()
        .map(|(timestamp, count)| {
            let hours = f64::from(count) * f64::from(gap_minutes) / 60.0;
            DataPoint::new(timestamp, hours, format!("{count} pings"))
        })
        .collect()
}

fn matches_tags(entry_tags: &str, goal_tags: &[String]) -> bool {
    entry_tags
        .split_whitespace()
        .any(|tag| goal_tags.iter().any(|goal_tag| goal_tag.eq_ignore_ascii_case(tag)))
}
