//! Store configuration.

use std::time::Duration;

/// Segment size cap used when none is given or the given one is unparsable.
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Default total time spent waiting for a segment lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(2);

/// Default interval between lock attempts.
pub const DEFAULT_LOCK_POLL: Duration = Duration::from_millis(200);

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the storage directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Size in bytes at which a segment stops accepting writes.
    pub max_segment_size: u64,

    /// Total time a write or read waits for a segment lock.
    pub lock_wait: Duration,

    /// Pause between two lock attempts.
    pub lock_poll: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            lock_wait: DEFAULT_LOCK_WAIT,
            lock_poll: DEFAULT_LOCK_POLL,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the storage directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the segment size cap in bytes.
    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets the segment size cap from a human-readable string such as `"36m"`.
    ///
    /// Falls back to [`DEFAULT_MAX_SEGMENT_SIZE`] with a warning if the string
    /// cannot be parsed.
    #[must_use]
    pub fn max_segment_size_str(mut self, size: &str) -> Self {
        self.max_segment_size = parse_size(size).unwrap_or_else(|| {
            tracing::warn!(
                input = size,
                fallback = DEFAULT_MAX_SEGMENT_SIZE,
                "invalid max segment size, using default"
            );
            DEFAULT_MAX_SEGMENT_SIZE
        });
        self
    }

    /// Sets the total lock wait budget.
    #[must_use]
    pub const fn lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Sets the pause between lock attempts.
    #[must_use]
    pub const fn lock_poll(mut self, poll: Duration) -> Self {
        self.lock_poll = poll;
        self
    }
}

/// Parses a size like `"36m"`, `"2G"`, `"1.5 t"` or `"512KiB"` into bytes.
///
/// Units are K, M, G and T (case-insensitive, powers of 1024), optionally
/// followed by `B` or `iB`. A unit is required.
#[must_use]
pub fn parse_size(input: &str) -> Option<u64> {
    let s = input.trim();
    let number_end = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, rest) = s.split_at(number_end);
    if number.is_empty() || number.starts_with('.') || number.matches('.').count() > 1 {
        return None;
    }

    let rest = rest.trim_start();
    let mut chars = rest.chars();
    let multiplier: u64 = match chars.next()?.to_ascii_uppercase() {
        'K' => 1 << 10,
        'M' => 1 << 20,
        'G' => 1 << 30,
        'T' => 1 << 40,
        _ => return None,
    };
    if !matches!(chars.as_str(), "" | "b" | "B" | "ib" | "iB") {
        return None;
    }

    let bytes = number.parse::<f64>().ok()? * multiplier as f64;
    (bytes.is_finite() && bytes < u64::MAX as f64).then_some(bytes as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert_eq!(config.max_segment_size, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.lock_wait, Duration::from_secs(2));
        assert_eq!(config.lock_poll, Duration::from_millis(200));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .max_segment_size(1024)
            .lock_wait(Duration::from_millis(50))
            .lock_poll(Duration::from_millis(5));

        assert!(!config.create_if_missing);
        assert_eq!(config.max_segment_size, 1024);
        assert_eq!(config.lock_wait, Duration::from_millis(50));
        assert_eq!(config.lock_poll, Duration::from_millis(5));
    }

    #[test]
    fn parse_units() {
        assert_eq!(parse_size("36m"), Some(36 * 1024 * 1024));
        assert_eq!(parse_size("2g"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("1K"), Some(1024));
        assert_eq!(parse_size("3T"), Some(3 << 40));
        assert_eq!(parse_size("1.5 k"), Some(1536));
        assert_eq!(parse_size(" 512KiB "), Some(512 * 1024));
        assert_eq!(parse_size("10MB"), Some(10 * 1024 * 1024));
    }

    #[test]
    fn parse_rejects_garbage() {
        for input in ["", "m", "12", "12x", "1..5m", ".5m", "12mm", "-1k", "k12"] {
            assert_eq!(parse_size(input), None, "{input:?}");
        }
    }

    #[test]
    fn unparsable_string_falls_back_to_default() {
        let config = Config::new().max_segment_size(1).max_segment_size_str("lots");
        assert_eq!(config.max_segment_size, DEFAULT_MAX_SEGMENT_SIZE);

        let config = Config::new().max_segment_size_str("36m");
        assert_eq!(config.max_segment_size, 36 * 1024 * 1024);
    }
}
