use serde::{Deserialize, Serialize};

/// Inclusive range of accepted prediction confidence scores.
///
/// Defaults to [0.0, 1.0], the conventional fractional confidence range.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

impl Default for ScoreRange {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

impl ScoreRange {
    /// Both bounds are inclusive.
    pub fn contains(&self, score: f64) -> bool {
        score.is_finite() && score >= self.min && score <= self.max
    }
}

/// Optional image-coordinate bounds for bounding-box checks.
///
/// When configured, every bbox must fall inside `[0, width] x [0, height]`.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct ImageBounds {
    pub width: f64,
    pub height: f64,
}
