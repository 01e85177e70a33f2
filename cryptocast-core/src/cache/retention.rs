//! Retention policy: bounds per-asset memory.

use crate::config::PipelineConfig;
use crate::domain::PricePoint;

/// Which points survive a merge.
///
/// Points older than `max_age` (measured from the newest point) and points
/// beyond the `max_points` most recent are trimmed, but never below
/// `floor_points`: the history the longest supported forecast needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionPolicy {
    pub max_age: chrono::Duration,
    pub max_points: usize,
    pub floor_points: usize,
}

impl RetentionPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_age: chrono::Duration::days(i64::from(config.retention_days)),
            max_points: config.max_points,
            floor_points: 0,
        }
    }

    /// Raise the floor to at least `points`.
    pub fn with_floor(mut self, points: usize) -> Self {
        self.floor_points = self.floor_points.max(points);
        self
    }

    /// Trim a sorted point vector in place. Returns the number removed.
    pub fn apply(&self, points: &mut Vec<PricePoint>) -> usize {
        let Some(newest) = points.last().map(|p| p.timestamp) else {
            return 0;
        };
        // An age limit reaching past the representable range cuts nothing.
        let within_age = match newest.checked_sub_signed(self.max_age) {
            Some(cutoff) => points.len() - points.partition_point(|p| p.timestamp < cutoff),
            None => points.len(),
        };
        let keep = within_age
            .min(self.max_points)
            .max(self.floor_points)
            .min(points.len());
        let removed = points.len() - keep;
        if removed > 0 {
            points.drain(..removed);
        }
        removed
    }
}
