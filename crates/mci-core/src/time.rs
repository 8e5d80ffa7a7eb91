//! Time utilities

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds.
///
/// A clock set before the epoch reads as 0 rather than panicking.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_millis_is_positive() {
        assert!(current_time_millis() > 0);
    }

    #[test]
    fn test_current_time_millis_advances() {
        let before = current_time_millis();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(current_time_millis() >= before + 5);
    }
}
