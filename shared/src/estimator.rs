//! Closure Estimator
//!
//! Holds the latest confidence reading from the sensor and decides, when the
//! link drops, whether the car was closed.

use crate::now_ms;

/// Confidence before any reading arrived
pub const UNKNOWN_CONFIDENCE: i32 = -1;

/// Boost applied on a closed verdict, by silence before the disconnect.
/// Each entry is `(elapsed below this many ms, boost)`.
pub const BOOST_TIERS: [(u64, i32); 3] = [(15_000, 35), (30_000, 25), (45_000, 15)];

/// Boost once the silence reaches the last tier
pub const FLOOR_BOOST: i32 = 5;

/// Boost for a given silence before the disconnect.
///
/// Shrinks as the silence grows: a long quiet spell before the link dropped
/// is weaker evidence that the driver walked away from a closed car.
pub fn boost_for_elapsed(elapsed_ms: u64) -> i32 {
    BOOST_TIERS
        .iter()
        .find(|(below, _)| elapsed_ms < *below)
        .map_or(FLOOR_BOOST, |&(_, boost)| boost)
}

/// Outcome of evaluating a finished session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Car probably closed; carries the boosted confidence
    Closed { confidence: i32 },
    /// Car probably left open; carries the confidence as it stood
    NotClosed { confidence: i32 },
}

impl Verdict {
    /// Confidence reported alongside the verdict
    pub fn confidence(&self) -> i32 {
        match self {
            Verdict::Closed { confidence } | Verdict::NotClosed { confidence } => *confidence,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Verdict::Closed { .. })
    }
}

/// Running belief that the car is closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Estimator {
    confidence: i32,
    /// Wall clock of the last accepted reading, `None` until one arrives
    last_update_ms: Option<u64>,
}

impl Default for Estimator {
    fn default() -> Self {
        Self::new()
    }
}

impl Estimator {
    /// Create an estimator holding the unknown sentinel
    pub fn new() -> Self {
        Self {
            confidence: UNKNOWN_CONFIDENCE,
            last_update_ms: None,
        }
    }

    /// Current confidence
    pub fn confidence(&self) -> i32 {
        self.confidence
    }

    /// Wall clock (ms) of the last accepted reading
    pub fn last_update_ms(&self) -> Option<u64> {
        self.last_update_ms
    }

    /// Feed a raw reading received now
    pub fn on_telemetry(&mut self, raw: &str) -> Option<i32> {
        self.on_telemetry_at(raw, now_ms())
    }

    /// Feed a raw reading received at `at_ms`.
    ///
    /// Returns the new confidence, or `None` if the reading was not an
    /// integer, in which case nothing changes.
    pub fn on_telemetry_at(&mut self, raw: &str, at_ms: u64) -> Option<i32> {
        let value = raw.parse::<i32>().ok()?;
        self.confidence = value;
        self.last_update_ms = Some(at_ms);
        Some(value)
    }

    /// Evaluate the session that just ended
    pub fn on_disconnect(&mut self, minimum_threshold: i32) -> Verdict {
        self.on_disconnect_at(minimum_threshold, now_ms())
    }

    /// Evaluate the session that just ended, as seen at `now_ms`.
    ///
    /// At or below the threshold the car is reported open with the confidence
    /// untouched. Above it the confidence is boosted (and kept) according to
    /// how long the sensor had been silent. The result is not capped at 100.
    pub fn on_disconnect_at(&mut self, minimum_threshold: i32, now_ms: u64) -> Verdict {
        if self.confidence <= minimum_threshold {
            return Verdict::NotClosed {
                confidence: self.confidence,
            };
        }

        // Never updated counts as an arbitrarily long silence
        let elapsed_ms = self
            .last_update_ms
            .map_or(u64::MAX, |last| now_ms.saturating_sub(last));

        self.confidence = self.confidence.saturating_add(boost_for_elapsed(elapsed_ms));
        Verdict::Closed {
            confidence: self.confidence,
        }
    }
}
