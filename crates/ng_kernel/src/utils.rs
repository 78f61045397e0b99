//! # Utility Functions
//!
//! Timestamp helpers and panic capture shared by the event bus, the logger
//! and the kernel lifecycle.

use std::any::Any;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in milliseconds.
///
/// A clock set before the Unix epoch yields `0` rather than panicking.
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Formats a millisecond Unix timestamp as a UTC wall-clock `HH:MM:SS`.
///
/// # Examples
///
/// ```rust
/// use ng_kernel::utils::clock_time;
///
/// assert_eq!(clock_time(0), "00:00:00");
/// assert_eq!(clock_time(3_723_000), "01:02:03");
/// ```
pub fn clock_time(timestamp_millis: u64) -> String {
    let secs_of_day = (timestamp_millis / 1000) % 86_400;
    format!(
        "{:02}:{:02}:{:02}",
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60
    )
}

/// Extracts a readable message from a caught panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_time_wraps_at_midnight() {
        assert_eq!(clock_time(86_400_000), "00:00:00");
        assert_eq!(clock_time(86_399_000), "23:59:59");
    }

    #[test]
    fn test_panic_message_variants() {
        let caught = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(caught), "static");

        let caught = std::panic::catch_unwind(|| panic!("{}", String::from("owned"))).unwrap_err();
        assert_eq!(panic_message(caught), "owned");
    }
}
