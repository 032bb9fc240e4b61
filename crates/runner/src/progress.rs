//! Progress extraction from the upscaler's diagnostic output.
//!
//! The upscaler prints lines such as `23.45%` on stderr. Any line holding a
//! percentage token is treated as a progress report; everything else is
//! ignored.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::LazyLock;

use regex::Regex;

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("valid regex"));

/// Parse the first percentage token in `line`, e.g. `"23.45%"` -> `23.45`.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let caps = PERCENT_RE.captures(line)?;
    caps.get(1)?.as_str().parse::<f64>().ok()
}

/// Monotonic progress filter.
///
/// Converts raw percentages to whole numbers in `0..=100` and only lets
/// strictly increasing values through, so callers never see progress go
/// backwards (tiled runs restart their counter per tile).
#[derive(Debug, Default)]
pub struct ProgressTracker {
    current: AtomicU8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw percentage; returns the new value if it increased.
    pub fn observe(&self, percent: f64) -> Option<u8> {
        if !percent.is_finite() {
            return None;
        }
        let value = percent.clamp(0.0, 100.0) as u8;
        let previous = self.current.fetch_max(value, Ordering::AcqRel);
        (value > previous).then_some(value)
    }

    /// Highest value observed so far.
    pub fn current(&self) -> u8 {
        self.current.load(Ordering::Acquire)
    }
}
