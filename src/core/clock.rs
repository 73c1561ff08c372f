//! Time Source
//!
//! "Now" is an injected capability so codecs and the endpoint can be driven
//! from a fixed instant in tests.

use chrono::{DateTime, TimeZone, Utc};

/// Maximum distance from "now" a lenient timestamp may have.
pub const TIMESTAMP_TOLERANCE_MS: i64 = 60 * 60 * 1000;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(DateTime<Utc>);

impl FixedClock {
    /// Freeze the clock at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(now)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Epoch milliseconds to an instant, if representable.
pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Parse a millisecond timestamp, substituting `now` when it is unusable.
///
/// Some listing sites omit the timestamp or send garbage. Rather than
/// rejecting the vote, anything that does not parse, or that lies an hour
/// or more away from `now`, becomes `now`.
pub fn parse_timestamp_lenient(text: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let parsed = text.trim().parse::<i64>().ok().and_then(from_millis);
    match parsed {
        Some(ts) if (now - ts).num_milliseconds().abs() < TIMESTAMP_TOLERANCE_MS => ts,
        _ => now,
    }
}
