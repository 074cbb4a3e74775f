//! Temporal analysis over recent `ibstat` history.
//!
//! Each detector is a pure function of the current cycle and the events read
//! for it. They share nothing and each yields its own optional reason.

mod port_drop;
mod port_flap;
mod switch_fault;

pub use port_drop::{evaluate_port_drop, REASON_PORT_DROP_PREFIX};
pub use port_flap::{evaluate_port_flap, REASON_PORT_FLAP_PREFIX};
pub use switch_fault::{evaluate_switch_fault, REASON_SWITCH_FAULT};

use chrono::{DateTime, Duration, Utc};

/// How far back history is read for drop and flap detection.
pub fn lookback() -> Duration {
    Duration::minutes(10)
}

/// A port must stay down at least this long to count as dropped.
pub fn drop_threshold() -> Duration {
    Duration::minutes(4)
}

/// Only transitions within this window count towards a flap.
pub fn flap_window() -> Duration {
    Duration::minutes(4)
}

/// Transitions kept per device when reporting a flap.
pub const MAX_FLAP_TRANSITIONS: usize = 4;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 12 * MONTH;
const LONG_TIME: i64 = 37 * YEAR;

/// Human readable distance between `then` and `now`, e.g. "7 minutes ago"
/// or "2 hours from now".
pub fn rel_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let (secs, label) = if then <= now {
        ((now - then).num_seconds(), "ago")
    } else {
        ((then - now).num_seconds(), "from now")
    };

    let text = match secs {
        s if s < 1 => return "now".to_string(),
        s if s < 2 => "1 second".to_string(),
        s if s < MINUTE => format!("{s} seconds"),
        s if s < 2 * MINUTE => "1 minute".to_string(),
        s if s < HOUR => format!("{} minutes", s / MINUTE),
        s if s < 2 * HOUR => "1 hour".to_string(),
        s if s < DAY => format!("{} hours", s / HOUR),
        s if s < 2 * DAY => "1 day".to_string(),
        s if s < WEEK => format!("{} days", s / DAY),
        s if s < 2 * WEEK => "1 week".to_string(),
        s if s < MONTH => format!("{} weeks", s / WEEK),
        s if s < 2 * MONTH => "1 month".to_string(),
        s if s < YEAR => format!("{} months", s / MONTH),
        s if s < 18 * MONTH => "1 year".to_string(),
        s if s < 2 * YEAR => "2 years".to_string(),
        s if s < LONG_TIME => format!("{} years", s / YEAR),
        _ => "a long while".to_string(),
    };
    format!("{text} {label}")
}
