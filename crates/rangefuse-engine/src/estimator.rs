//! Stability History & Outlier-Robust Error Estimator.
//!
//! The [`StabilityHistory`] keeps the last `H` accepted points regardless of
//! tick boundaries.  Once it is full, [`estimate_error`] reduces it to a
//! single dispersion figure:
//!
//! 1. `r_i = |p_i|` for every point.
//! 2. `R̄ = mean(r_i)`.
//! 3. Drop the one point with the largest `|r_i − R̄|` (earliest wins ties).
//! 4. `R̄' = mean` of the remaining `H − 1` radii.
//! 5. Return `mean(|r_i − R̄'|)` over the remaining radii, rounded to two
//!    decimals.
//!
//! Exactly one point is discarded per evaluation; this is not a trimmed mean.
//! Sums are taken over sorted values so the statistic does not depend on the
//! order in which equal sets of points were pushed.

use std::collections::VecDeque;

use rangefuse_types::{Coordinate, round2};

// ────────────────────────────────────────────────────────────────────────────
// StabilityHistory
// ────────────────────────────────────────────────────────────────────────────

/// Bounded FIFO of recent valid coordinates.
#[derive(Debug, Clone)]
pub struct StabilityHistory {
    capacity: usize,
    points: VecDeque<Coordinate>,
}

impl StabilityHistory {
    /// Create an empty history holding at most `capacity` points (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    /// Append `point`, evicting and returning the oldest entry when full.
    pub fn push(&mut self, point: Coordinate) -> Option<Coordinate> {
        let evicted = if self.points.len() == self.capacity {
            self.points.pop_front()
        } else {
            None
        };
        self.points.push_back(point);
        evicted
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `true` once enough points exist for [`StabilityHistory::estimate_error`].
    pub fn is_full(&self) -> bool {
        self.points.len() == self.capacity
    }

    /// Oldest-first iterator over the stored points.
    pub fn iter(&self) -> impl Iterator<Item = &Coordinate> {
        self.points.iter()
    }

    /// Outlier-robust error over the current window, or `None` while the
    /// window is not yet full.
    pub fn estimate_error(&self) -> Option<f64> {
        let points: Vec<Coordinate> = self.points.iter().copied().collect();
        estimate_error(&points, self.capacity)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Estimator
// ────────────────────────────────────────────────────────────────────────────

/// Single-outlier-rejection mean absolute deviation of the point radii.
///
/// Returns `None` when fewer than `window` points are supplied, or when
/// nothing remains after the outlier is dropped (`window == 1`).
pub fn estimate_error(points: &[Coordinate], window: usize) -> Option<f64> {
    if points.is_empty() || points.len() < window {
        return None;
    }

    let radii: Vec<f64> = points.iter().map(Coordinate::radius).collect();
    let centre = mean(&radii)?;

    let mut outlier = 0;
    let mut max_deviation = f64::NEG_INFINITY;
    for (i, r) in radii.iter().enumerate() {
        let deviation = (r - centre).abs();
        if deviation > max_deviation {
            max_deviation = deviation;
            outlier = i;
        }
    }

    let kept: Vec<f64> = radii
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != outlier)
        .map(|(_, r)| *r)
        .collect();
    let recentred = mean(&kept)?;

    let deviations: Vec<f64> = kept.iter().map(|r| (r - recentred).abs()).collect();
    mean(&deviations).map(round2)
}

/// Arithmetic mean summed in ascending order.
pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(sorted.iter().sum::<f64>() / sorted.len() as f64)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// A point whose radius is exactly `r`.
    fn at_radius(r: f64) -> Coordinate {
        Coordinate::new(r, 0.0, 0.0)
    }

    fn history_of(radii: &[f64]) -> StabilityHistory {
        let mut history = StabilityHistory::new(radii.len());
        for r in radii {
            history.push(at_radius(*r));
        }
        history
    }

    #[test]
    fn undefined_until_window_is_full() {
        let mut history = StabilityHistory::new(3);
        history.push(at_radius(10.0));
        history.push(at_radius(11.0));
        assert_eq!(history.estimate_error(), None);
        history.push(at_radius(12.0));
        assert!(history.estimate_error().is_some());
    }

    #[test]
    fn single_severe_outlier_is_discarded() {
        // Mean 14.4, so 30 is the outlier.  Remaining mean 10.5, deviations
        // 0.5, 1.5, 1.5, 0.5.
        let history = history_of(&[10.0, 12.0, 9.0, 11.0, 30.0]);
        assert_eq!(history.estimate_error(), Some(1.0));
    }

    #[test]
    fn reference_window_rounds_mean_deviation() {
        // Mean ≈ 11.02, drop 15, re-centre on ≈ 10.025.  The mean absolute
        // deviation is 0.125 analytically and a hair below it in f64.
        let history = history_of(&[10.0, 10.2, 9.8, 10.1, 15.0]);
        assert_eq!(history.estimate_error(), Some(0.12));
    }

    #[test]
    fn only_one_point_is_dropped() {
        // Mean 16: 30 is dropped, 20 stays.  Remaining mean 12.5,
        // deviations 2.5 × 3 + 7.5 = 15, over 4 points.
        let history = history_of(&[10.0, 10.0, 10.0, 20.0, 30.0]);
        assert_eq!(history.estimate_error(), Some(3.75));
    }

    #[test]
    fn equidistant_tie_is_resolved_deterministically() {
        // 8 and 12 are equidistant from the mean 10; the earlier one is
        // dropped, leaving [12, 10] → mean 11 → deviation 1.0.
        assert_eq!(estimate_error(&[at_radius(8.0), at_radius(12.0), at_radius(10.0)], 3), Some(1.0));
        // Swapping the order drops 12 instead, leaving [8, 10] → same spread.
        assert_eq!(estimate_error(&[at_radius(12.0), at_radius(8.0), at_radius(10.0)], 3), Some(1.0));
    }

    #[test]
    fn window_of_one_has_nothing_left_after_rejection() {
        let history = history_of(&[10.0]);
        assert_eq!(history.estimate_error(), None);
    }

    #[test]
    fn uses_euclidean_radius() {
        // 3-4-0 triangle → radius 5 for every point: zero spread.
        let points = vec![Coordinate::new(3.0, 4.0, 0.0); 4];
        assert_eq!(estimate_error(&points, 4), Some(0.0));
    }

    #[test]
    fn permutation_does_not_change_estimate() {
        let forward = [10.3, 9.7, 10.9, 11.4, 10.1, 9.95];
        let mut backward = forward;
        backward.reverse();
        assert_eq!(history_of(&forward).estimate_error(), history_of(&backward).estimate_error());
    }

    #[test]
    fn history_never_exceeds_capacity_and_evicts_oldest() {
        let mut history = StabilityHistory::new(3);
        for r in 1..=5 {
            history.push(at_radius(r as f64));
            assert!(history.len() <= 3);
        }
        let kept: Vec<f64> = history.iter().map(|p| p.x).collect();
        assert_eq!(kept, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn push_reports_evicted_point() {
        let mut history = StabilityHistory::new(2);
        assert_eq!(history.push(at_radius(1.0)), None);
        assert_eq!(history.push(at_radius(2.0)), None);
        assert_eq!(history.push(at_radius(3.0)), Some(at_radius(1.0)));
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let history = StabilityHistory::new(0);
        assert_eq!(history.capacity(), 1);
    }
}
