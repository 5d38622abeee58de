//! Shared utilities

mod logger;
pub mod signals;
mod timer;
mod wait;

pub use logger::{init_logger, LogLevel};
pub use signals::{CallbackToken, InterruptRegistry};
pub use timer::{format_duration, format_timestamp, parse_formatted_duration, Stopwatch, Timing};
pub use wait::Waiting;

/// Replace characters unsafe in file names with a dash
pub fn safe_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
