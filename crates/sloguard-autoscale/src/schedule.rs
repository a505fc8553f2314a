//! Five-field cron schedules for scheduled scaling.
//!
//! Supports `*`, `*/n`, `a`, `a-b`, `a-b/n` and comma lists in each of
//! minute, hour, day-of-month, month and day-of-week (0 or 7 = Sunday).
//! All times are UTC.

use chrono::{DateTime, Datelike, Timelike, Utc};

use sloguard_core::Timestamp;

use crate::error::{ScalingError, ScalingResult};

/// Upper bound on how far back a window is searched.
const MAX_WINDOW_SECS: u64 = 31 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> ScalingResult<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScalingError::Cron {
                expr: expr.to_string(),
                reason: format!("expected 5 fields, got {}", fields.len()),
            });
        }
        let err = |reason: String| ScalingError::Cron {
            expr: expr.to_string(),
            reason,
        };

        let mut days_of_week = parse_field(fields[4], 0, 7).map_err(err)?;
        // 7 is Sunday too.
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            expr: expr.to_string(),
            minutes: parse_field(fields[0], 0, 59).map_err(err)?,
            hours: parse_field(fields[1], 0, 23).map_err(err)?,
            days_of_month: parse_field(fields[2], 1, 31).map_err(err)?,
            months: parse_field(fields[3], 1, 12).map_err(err)?,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Whether the minute containing `at` is a scheduled minute.
    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        let bit = |mask: u64, v: u32| mask & (1 << v) != 0;
        if !bit(self.minutes, at.minute())
            || !bit(self.hours, at.hour())
            || !bit(self.months, at.month())
        {
            return false;
        }
        let dom = bit(self.days_of_month, at.day());
        let dow = bit(self.days_of_week, at.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            _ => dom && dow,
        }
    }

    /// Whether a window of `window_secs` opened by a scheduled minute is
    /// still open at `now`, i.e. some match lies in `(now - window, now]`.
    pub fn active_at(&self, now: Timestamp, window_secs: u64) -> bool {
        let window = window_secs.clamp(1, MAX_WINDOW_SECS);
        let earliest = now.saturating_sub(window - 1);
        let mut minute = now - now % 60;
        loop {
            if minute < earliest {
                return false;
            }
            if let Some(at) = DateTime::<Utc>::from_timestamp(minute as i64, 0)
                && self.matches(&at)
            {
                return true;
            }
            if minute < 60 {
                return false;
            }
            minute -= 60;
        }
    }
}

/// Parse one field into a bitmask of allowed values.
fn parse_field(field: &str, min: u32, max: u32) -> Result<u64, String> {
    let mut mask = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s.parse().map_err(|_| format!("invalid step {s:?}"))?;
                if step == 0 {
                    return Err("step must be positive".to_string());
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, min, max)?, parse_value(b, min, max)?)
        } else {
            let v = parse_value(range, min, max)?;
            // `5/15` means from 5 to the end in steps of 15.
            if part.contains('/') { (v, max) } else { (v, v) }
        };
        if lo > hi {
            return Err(format!("range {range:?} is inverted"));
        }

        let mut v = lo;
        while v <= hi {
            mask |= 1 << v;
            v += step;
        }
    }
    Ok(mask)
}

fn parse_value(text: &str, min: u32, max: u32) -> Result<u32, String> {
    let v: u32 = text.parse().map_err(|_| format!("invalid value {text:?}"))?;
    if v < min || v > max {
        return Err(format!("{v} outside {min}-{max}"));
    }
    Ok(v)
}
