//! Timer utilities
//!
//! Provides wall-clock timing of test invocations and checks.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::{Duration, Instant};

/// Stopwatch bracketing a single operation.
///
/// Captures both the monotonic clock, for the duration, and the wall clock,
/// for the reported start and end timestamps.
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    start_time: DateTime<Utc>,
}

/// Finished measurement produced by [`Stopwatch::stop`]
#[derive(Clone, Debug)]
pub struct Timing {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: Duration,
}

impl Stopwatch {
    /// Create and start a new stopwatch
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            start_time: Utc::now(),
        }
    }

    /// Wall-clock time the stopwatch was started at
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Stop the stopwatch
    pub fn stop(self) -> Timing {
        let duration = self.start.elapsed();
        Timing {
            start_time: self.start_time,
            end_time: Utc::now(),
            duration,
        }
    }
}

impl Timing {
    pub fn formatted_start(&self) -> String {
        format_timestamp(&self.start_time)
    }

    pub fn formatted_end(&self) -> String {
        format_timestamp(&self.end_time)
    }

    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration)
    }
}

/// Format a timestamp as RFC 3339 with microsecond precision
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Format a duration as `HH:MM:SS`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Parse a `HH:MM:SS` duration back into seconds
pub fn parse_formatted_duration(value: &str) -> Option<u64> {
    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_stopwatch() {
        let stopwatch = Stopwatch::start();
        sleep(Duration::from_millis(10));
        let timing = stopwatch.stop();

        assert!(timing.duration >= Duration::from_millis(10));
        assert!(timing.end_time >= timing.start_time);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_duration(Duration::from_millis(59_999)), "00:00:59");
    }

    #[test]
    fn test_parse_formatted_duration() {
        assert_eq!(parse_formatted_duration("01:02:05"), Some(3725));
        assert_eq!(parse_formatted_duration("1:2"), None);
        assert_eq!(parse_formatted_duration("aa:00:00"), None);
    }
}
