//! Criticality scoring.
//!
//! ```text
//! base  = mean(severity_hints)            (50 when there are none)
//! crowd = min(40, 5 * log2(confirmations + 1))
//! score = clamp(round(base * weight(category) + crowd), 1, 100)
//! ```
//!
//! The score is a pure function of its arguments. Callers recompute it from
//! the full hint history on every merge rather than adjusting the previous
//! value.

use serde::Serialize;

use crate::category::IssueCategory;
use crate::classification::FALLBACK_SEVERITY_HINT;

/// Lowest possible criticality.
pub const MIN_CRITICALITY: i32 = 1;

/// Highest possible criticality.
pub const MAX_CRITICALITY: i32 = 100;

/// Upper bound on the bonus earned from crowd confirmations.
pub const CROWD_BONUS_CAP: f64 = 40.0;

/// Bonus points per doubling of confirmations.
pub const CROWD_BONUS_PER_DOUBLING: f64 = 5.0;

/// Scores below this are `low`.
pub const MEDIUM_THRESHOLD: i32 = 40;

/// Scores at or above this are `high`.
pub const HIGH_THRESHOLD: i32 = 70;

/// Compute the criticality score of an issue.
pub fn criticality_score(
    category: IssueCategory,
    confirmation_count: usize,
    severity_hints: &[f64],
) -> i32 {
    let base = mean_severity(severity_hints) * category.weight();
    let raw = base + crowd_bonus(confirmation_count);
    (raw.round() as i32).clamp(MIN_CRITICALITY, MAX_CRITICALITY)
}

/// Saturating bonus for the number of distinct reporters.
pub fn crowd_bonus(confirmation_count: usize) -> f64 {
    let doublings = ((confirmation_count as f64) + 1.0).log2();
    (CROWD_BONUS_PER_DOUBLING * doublings).min(CROWD_BONUS_CAP)
}

/// Arithmetic mean of the finite hints, clamped to `[0, 100]`.
fn mean_severity(severity_hints: &[f64]) -> f64 {
    let (sum, n) = severity_hints
        .iter()
        .filter(|h| h.is_finite())
        .fold((0.0, 0usize), |(sum, n), h| (sum + h.clamp(0.0, 100.0), n + 1));
    if n == 0 {
        FALLBACK_SEVERITY_HINT
    } else {
        sum / n as f64
    }
}

/// Coarse bucket used by the reports summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalityLevel {
    Low,
    Medium,
    High,
}

impl CriticalityLevel {
    pub fn of(score: i32) -> Self {
        if score < MEDIUM_THRESHOLD {
            Self::Low
        } else if score < HIGH_THRESHOLD {
            Self::Medium
        } else {
            Self::High
        }
    }
}
