//! Trailing query windows.

use super::EngineError;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt;
use std::str::FromStr;

/// A supported trailing window, resolved against an injected `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Window {
    Hour,
    Day,
    Week,
    Month,
}

impl Window {
    /// All supported windows, narrowest first.
    pub const ALL: [Window; 4] = [Window::Hour, Window::Day, Window::Week, Window::Month];

    pub fn as_str(&self) -> &'static str {
        match self {
            Window::Hour => "1h",
            Window::Day => "24h",
            Window::Week => "7d",
            Window::Month => "30d",
        }
    }

    pub fn duration(&self) -> ChronoDuration {
        match self {
            Window::Hour => ChronoDuration::hours(1),
            Window::Day => ChronoDuration::hours(24),
            Window::Week => ChronoDuration::days(7),
            Window::Month => ChronoDuration::days(30),
        }
    }

    /// The half-open range `[now - window, now)`.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - self.duration(), now)
    }

    pub fn contains(&self, now: DateTime<Utc>, ts: DateTime<Utc>) -> bool {
        let (start, end) = self.bounds(now);
        ts >= start && ts < end
    }
}

impl FromStr for Window {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Window::ALL
            .into_iter()
            .find(|w| w.as_str() == s)
            .ok_or_else(|| EngineError::UnsupportedWindow(s.to_string()))
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
