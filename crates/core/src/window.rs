//! Fixed-width time windows used to correlate the jobs of one pipeline run.

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default bucket width in hours.
pub const DEFAULT_WINDOW_HOURS: u32 = 2;

/// Default offset (+09:00) in hours.
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 9;

/// A window bucket: `id` is `start..end` in ISO-8601 with explicit offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub id: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

/// Computes window buckets in a fixed timezone offset.
#[derive(Debug, Clone, Copy)]
pub struct WindowClock {
    offset: FixedOffset,
    width_hours: u32,
}

impl Default for WindowClock {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_HOURS * 3600)
                .unwrap_or_else(|| Utc.fix()),
            width_hours: DEFAULT_WINDOW_HOURS,
        }
    }
}

impl WindowClock {
    /// Creates a clock with the given offset and bucket width.
    ///
    /// The width must divide 24 so buckets align with local midnight.
    pub fn new(utc_offset_hours: i32, width_hours: u32) -> Result<Self> {
        let offset = utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| Error::config(format!("invalid UTC offset: {utc_offset_hours}h")))?;

        if width_hours == 0 || 24 % width_hours != 0 {
            return Err(Error::config(format!(
                "window width must divide 24 hours, got {width_hours}"
            )));
        }

        Ok(Self {
            offset,
            width_hours,
        })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Window containing `now` (wall clock when `None`).
    pub fn current_window(&self, now: Option<DateTime<Utc>>) -> Window {
        self.window_at(now.unwrap_or_else(Utc::now))
    }

    /// Window containing the given instant.
    pub fn window_at(&self, now: DateTime<Utc>) -> Window {
        let local = now.with_timezone(&self.offset);
        let width = i64::from(self.width_hours) * 3600;

        // Seconds since the local epoch: local midnights are multiples of 86400,
        // so flooring here lands on a bucket boundary of the local day.
        let local_secs = local.timestamp() + i64::from(self.offset.local_minus_utc());
        let into_bucket = local_secs.rem_euclid(width);

        let start = local
            - Duration::seconds(into_bucket)
            - Duration::nanoseconds(i64::from(local.timestamp_subsec_nanos()));
        let end = start + Duration::seconds(width);

        Window {
            id: format!("{}..{}", format_minutes(&start), format_minutes(&end)),
            start,
            end,
        }
    }
}

fn format_minutes(dt: &DateTime<FixedOffset>) -> String {
    dt.format("%Y-%m-%dT%H:%M%:z").to_string()
}
