//! Read-time classification: relevance score → priority band, detection
//! timestamp → timeline window. Both are recomputed on every read and
//! never persisted.

use chrono::{DateTime, Utc};

use crate::signal::{Priority, TimelineWindow};

/// Map a continuous relevance score to a priority band. Thresholds are
/// inclusive at the lower bound of each band; a missing score means "no
/// evidence of urgency" and maps to `Low`. Scores outside `[0,1]` degrade
/// gracefully through the same comparisons (below 0 → `Low`, above 1 →
/// `Critical`), so no explicit clamping is needed.
pub fn derive_priority(score: Option<f64>) -> Priority {
    match score {
        Some(s) if s >= 0.85 => Priority::Critical,
        Some(s) if s >= 0.70 => Priority::High,
        Some(s) if s >= 0.50 => Priority::Medium,
        _ => Priority::Low,
    }
}

/// Numeric `[min, max)` relevance range for a priority band, used by the
/// read-side query builder to expand a band filter back into a score
/// clause.
pub fn score_band(priority: Priority) -> (f64, f64) {
    match priority {
        Priority::Critical => (0.85, f64::INFINITY),
        Priority::High => (0.70, 0.85),
        Priority::Medium => (0.50, 0.70),
        Priority::Low => (f64::NEG_INFINITY, 0.50),
    }
}

/// Whole-day age of a detection timestamp plus the smallest timeline
/// window containing it. Future-dated signals clamp to zero days.
pub fn timeline_bucket(detected_at: DateTime<Utc>, now: DateTime<Utc>) -> (TimelineWindow, i64) {
    let days_ago = (now - detected_at).num_days().max(0);
    let bucket = if days_ago <= 30 {
        TimelineWindow::ThirtyDay
    } else if days_ago <= 60 {
        TimelineWindow::SixtyDay
    } else if days_ago <= 90 {
        TimelineWindow::NinetyDay
    } else {
        TimelineWindow::All
    };
    (bucket, days_ago)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn thresholds_inclusive_at_lower_bound() {
        assert_eq!(derive_priority(Some(0.85)), Priority::Critical);
        assert_eq!(derive_priority(Some(0.84999)), Priority::High);
        assert_eq!(derive_priority(Some(0.70)), Priority::High);
        assert_eq!(derive_priority(Some(0.50)), Priority::Medium);
        assert_eq!(derive_priority(Some(0.49999)), Priority::Low);
        assert_eq!(derive_priority(Some(0.0)), Priority::Low);
    }

    #[test]
    fn missing_score_is_low() {
        assert_eq!(derive_priority(None), Priority::Low);
    }

    #[test]
    fn out_of_range_scores_degrade_gracefully() {
        assert_eq!(derive_priority(Some(-3.0)), Priority::Low);
        assert_eq!(derive_priority(Some(7.0)), Priority::Critical);
    }

    #[test]
    fn priority_is_monotone_in_score() {
        let grid: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();
        for pair in grid.windows(2) {
            assert!(derive_priority(Some(pair[0])) <= derive_priority(Some(pair[1])));
        }
    }

    #[test]
    fn score_bands_tile_the_unit_interval() {
        for s in [0.0, 0.25, 0.4999, 0.5, 0.69, 0.7, 0.84, 0.85, 0.99, 1.0] {
            let p = derive_priority(Some(s));
            let (min, max) = score_band(p);
            assert!(s >= min && s < max, "score {s} outside band of {p:?}");
        }
    }

    #[test]
    fn timeline_boundaries() {
        let now = Utc::now();
        let cases = [
            (0, TimelineWindow::ThirtyDay),
            (30, TimelineWindow::ThirtyDay),
            (31, TimelineWindow::SixtyDay),
            (60, TimelineWindow::SixtyDay),
            (61, TimelineWindow::NinetyDay),
            (90, TimelineWindow::NinetyDay),
            (91, TimelineWindow::All),
        ];
        for (days, expected) in cases {
            let (bucket, days_ago) = timeline_bucket(now - Duration::days(days), now);
            assert_eq!(bucket, expected, "{days} days ago");
            assert_eq!(days_ago, days);
        }
    }

    #[test]
    fn future_detection_clamps_to_zero() {
        let now = Utc::now();
        let (bucket, days_ago) = timeline_bucket(now + Duration::days(14), now);
        assert_eq!(bucket, TimelineWindow::ThirtyDay);
        assert_eq!(days_ago, 0);
    }
}
