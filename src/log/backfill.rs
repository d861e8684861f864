use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use fs4::tokio::AsyncFileExt;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};
use tracing::info;

use crate::utils::time::utc_time_of_seconds;

use super::store::PingLog;

/// Tag every backfilled entry starts with.
pub const AFK_TAG: &str = "afk";

/// Source of ping fire times. The real schedule lives outside this crate's
/// core; tests and the CLI plug in their own.
#[cfg_attr(test, mockall::automock)]
pub trait PingSchedule {
    /// The next fire time at `after` or later. With `inclusive` false,
    /// strictly later.
    fn fire_time_after(&self, after: DateTime<Utc>, inclusive: bool) -> DateTime<Utc>;
}

/// Deterministic schedule firing every `gap` from the unix epoch. Stands in
/// for the randomized ping schedule when replaying time the tracker slept
/// through.
pub struct FixedIntervalSchedule {
    gap: Duration,
}

impl FixedIntervalSchedule {
    pub fn from_minutes(minutes: i64) -> Self {
        Self {
            gap: Duration::minutes(minutes.max(1)),
        }
    }
}

impl PingSchedule for FixedIntervalSchedule {
    fn fire_time_after(&self, after: DateTime<Utc>, inclusive: bool) -> DateTime<Utc> {
        let gap = self.gap.num_seconds();
        let after_seconds = after.timestamp();
        let remainder = after_seconds.rem_euclid(gap);
        let next = if remainder == 0 {
            if inclusive {
                after_seconds
            } else {
                after_seconds + gap
            }
        } else {
            after_seconds - remainder + gap
        };
        utc_time_of_seconds(next)
    }
}

/// Logs a retro entry for every ping that fired between the last recorded
/// entry and `until`, tagging them `"afk"` plus any extra tags. Does nothing
/// when the log is empty, there is no gap to reconstruct before the very
/// first sample.
pub async fn fill_missed<F>(
    log: &mut PingLog<F>,
    schedule: &dyn PingSchedule,
    extra_tags: &str,
    until: DateTime<Utc>,
) -> Result<()>
where
    F: AsyncSeek + AsyncRead + AsyncWrite + AsyncFileExt + Unpin,
{
    let Some(last) = log.last_timestamp() else {
        return Ok(());
    };

    let mut tags = String::from(AFK_TAG);
    let extra_tags = extra_tags.trim();
    if !extra_tags.is_empty() {
        tags.push(' ');
        tags.push_str(extra_tags);
    }

    // The stored timestamp was rounded down to seconds, so starting exactly
    // there would almost always repeat the last ping.
    let mut cursor = utc_time_of_seconds(last + 1);
    let mut filled = 0u32;

    loop {
        let ping = schedule.fire_time_after(cursor, true);
        if ping >= until {
            break;
        }
        log.log_retro(ping.timestamp_millis(), &tags).await?;
        filled += 1;
        cursor = ping + Duration::seconds(1);
    }

    if filled > 0 {
        info!("Backfilled {filled} missed pings up to {until}");
    }
    Ok(())
}
