use log::warn;
use nalgebra::{Rotation3, Vector3};
use std::collections::VecDeque;
use vloc_core::{FramePose, MapToTracker};

/// The lifecycle phase of a [`PoseFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPhase {
    /// No samples accepted yet; the next sample is adopted as-is.
    Empty,
    /// At least one sample accepted; new samples blend into the estimate.
    Tracking,
    /// Device tracking was lost, so every held sample's capture pose no
    /// longer corresponds to physical reality. The next sample resets the
    /// filter instead of blending.
    Invalidated,
}

/// Temporal smoothing for one map's alignment transform.
///
/// Each successful localization yields an independent, noisy sample of the
/// alignment. The filter keeps a bounded FIFO history of recent samples,
/// averages them with a variance trim that discards implausible members, and
/// moves its estimate a bounded step toward that average. A wrong
/// localization (a false-positive map match) therefore cannot cause a
/// visible jump; a genuine relocation converges over a few samples instead.
#[derive(Debug, Clone)]
pub struct PoseFilter {
    phase: FilterPhase,
    history: VecDeque<MapToTracker>,
    capacity: usize,
    blend_alpha: f64,
    estimate: Option<MapToTracker>,
}

impl PoseFilter {
    /// Creates a filter averaging over at most `capacity` samples and moving
    /// at most `blend_alpha` of the way to the filtered target per sample.
    pub fn new(capacity: usize, blend_alpha: f64) -> Self {
        Self {
            phase: FilterPhase::Empty,
            history: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            blend_alpha: blend_alpha.clamp(0.0, 1.0),
            estimate: None,
        }
    }

    pub fn phase(&self) -> FilterPhase {
        self.phase
    }

    /// Number of samples currently held.
    pub fn sample_count(&self) -> usize {
        self.history.len()
    }

    /// The current smoothed alignment, or `None` before any sample has been
    /// accepted. After the first sample this always remains the last good
    /// estimate, even through tracking loss, so displays degrade gracefully.
    pub fn pose(&self) -> Option<MapToTracker> {
        self.estimate
    }

    /// Ingests one alignment sample.
    ///
    /// On a cold or invalidated filter the sample is adopted exactly, with
    /// no blending; anything else would make recovery from a genuine
    /// relocation crawl. While tracking, the sample joins the history and
    /// the estimate takes one damped step toward the trimmed average.
    ///
    /// Non-finite candidates are rejected without mutating any state.
    pub fn refine_pose(&mut self, candidate: MapToTracker) {
        if !candidate.is_finite() {
            warn!("discarding non-finite alignment sample");
            return;
        }
        match self.phase {
            FilterPhase::Empty | FilterPhase::Invalidated => {
                self.history.clear();
                self.history.push_back(candidate);
                self.estimate = Some(candidate);
                self.phase = FilterPhase::Tracking;
            }
            FilterPhase::Tracking => {
                if self.history.len() == self.capacity {
                    self.history.pop_front();
                }
                self.history.push_back(candidate);
                let target = self.filtered_target();
                let previous = self.estimate.unwrap_or(target);
                self.estimate = Some(Self::step_toward(previous, target, self.blend_alpha));
            }
        }
    }

    /// Marks every held sample as stale. Called when the device's own
    /// tracking reports a discontinuity; the estimate is retained for
    /// display but the next sample starts over.
    pub fn invalidate_history(&mut self) {
        if self.phase == FilterPhase::Tracking {
            self.phase = FilterPhase::Invalidated;
        }
    }

    /// Unconditionally clears the filter back to [`FilterPhase::Empty`],
    /// discarding the estimate. Used on explicit map switches.
    pub fn reset(&mut self) {
        self.phase = FilterPhase::Empty;
        self.history.clear();
        self.estimate = None;
    }

    /// Overwrites the estimate without any smoothing. This is the
    /// filtering-disabled path; the sample still seeds the history so that
    /// re-enabling filtering later behaves sensibly.
    pub fn overwrite(&mut self, candidate: MapToTracker) {
        if !candidate.is_finite() {
            warn!("discarding non-finite alignment sample");
            return;
        }
        self.history.clear();
        self.history.push_back(candidate);
        self.estimate = Some(candidate);
        self.phase = FilterPhase::Tracking;
    }

    /// Averages the history with a variance trim: members farther from the
    /// mean than the average squared distance are dropped, then the
    /// survivors are re-averaged. Rotations are averaged through their
    /// basis axes and re-orthonormalized.
    fn filtered_target(&self) -> MapToTracker {
        let positions: Vec<Vector3<f64>> = self
            .history
            .iter()
            .map(|s| s.isometry().translation.vector)
            .collect();
        let x_axes: Vec<Vector3<f64>> = self
            .history
            .iter()
            .map(|s| s.rotation().matrix().column(0).into_owned())
            .collect();
        let z_axes: Vec<Vector3<f64>> = self
            .history
            .iter()
            .map(|s| s.rotation().matrix().column(2).into_owned())
            .collect();

        let position = trimmed_mean(&positions);
        let x = trimmed_mean(&x_axes).normalize();
        let z = trimmed_mean(&z_axes).normalize();
        let up = z.cross(&x);
        let rotation = if up.norm() > 1e-9 {
            Rotation3::face_towards(&z, &up.normalize())
        } else {
            // Degenerate axis average; keep the newest sample's rotation.
            self.history
                .back()
                .map(|s| s.rotation())
                .unwrap_or_else(Rotation3::identity)
        };
        MapToTracker::from_parts(position, rotation)
    }

    fn step_toward(previous: MapToTracker, target: MapToTracker, alpha: f64) -> MapToTracker {
        let p = previous.isometry().translation.vector;
        let t = target.isometry().translation.vector;
        let position = p + (t - p) * alpha;
        let rotation = previous.rotation().slerp(&target.rotation(), alpha);
        MapToTracker::from_parts(position, rotation)
    }
}

/// Mean with a variance trim: compute the mean and average squared
/// deviation, then re-average only the members within that deviation. Falls
/// back to the plain mean when the sample is too small to judge or
/// everything is an outlier.
fn trimmed_mean(values: &[Vector3<f64>]) -> Vector3<f64> {
    let n = values.len();
    let mean = values.iter().sum::<Vector3<f64>>() / n as f64;
    if n <= 2 {
        return mean;
    }
    let variance = values.iter().map(|v| (v - mean).norm_squared()).sum::<f64>() / n as f64;
    let inliers: Vec<&Vector3<f64>> = values
        .iter()
        .filter(|v| (*v - mean).norm_squared() <= variance)
        .collect();
    if inliers.is_empty() {
        mean
    } else {
        inliers.iter().copied().sum::<Vector3<f64>>() / inliers.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn sample(x: f64, y: f64, z: f64) -> MapToTracker {
        MapToTracker::from_parts(Vector3::new(x, y, z), Rotation3::identity())
    }

    #[test]
    fn first_sample_is_adopted_exactly() {
        let mut filter = PoseFilter::new(8, 0.25);
        assert!(filter.pose().is_none());
        let candidate = MapToTracker::from_parts(
            Vector3::new(1.5, -0.5, 3.0),
            Rotation3::from_euler_angles(0.2, 0.1, -0.3),
        );
        filter.refine_pose(candidate);
        let pose = filter.pose().unwrap();
        assert_relative_eq!(
            pose.isometry().translation.vector,
            candidate.isometry().translation.vector,
            epsilon = 1e-12
        );
        assert!(pose.rotation().angle_to(&candidate.rotation()) < 1e-12);
        assert_eq!(filter.phase(), FilterPhase::Tracking);
    }

    #[test]
    fn outlier_moves_estimate_by_bounded_step() {
        let alpha = 0.25;
        let mut filter = PoseFilter::new(8, alpha);
        for _ in 0..6 {
            filter.refine_pose(sample(0.0, 0.0, 0.0));
        }
        let before = filter.pose().unwrap().isometry().translation.vector;
        assert!(before.norm() < 1e-9);

        // A 100 m jump; far beyond any plausible localization noise.
        filter.refine_pose(sample(100.0, 0.0, 0.0));
        let after = filter.pose().unwrap().isometry().translation.vector;
        let moved = (after - before).norm();
        assert!(
            moved <= alpha * 100.0 + 1e-9,
            "moved {moved} which exceeds the damping bound"
        );
        // The variance trim should in fact reject the outlier entirely.
        assert!(moved < 1.0, "moved {moved}, outlier was not trimmed");
    }

    #[test]
    fn invalidate_then_refine_behaves_like_cold_start() {
        let mut filter = PoseFilter::new(8, 0.25);
        for i in 0..5 {
            filter.refine_pose(sample(i as f64 * 0.01, 0.0, 0.0));
        }
        filter.invalidate_history();
        assert_eq!(filter.phase(), FilterPhase::Invalidated);
        // Estimate survives invalidation for display purposes.
        assert!(filter.pose().is_some());

        let relocated = sample(50.0, 1.0, -2.0);
        filter.refine_pose(relocated);
        let pose = filter.pose().unwrap();
        assert_relative_eq!(
            pose.isometry().translation.vector,
            relocated.isometry().translation.vector,
            epsilon = 1e-12
        );
        assert_eq!(filter.sample_count(), 1);
    }

    #[test]
    fn reset_discards_estimate() {
        let mut filter = PoseFilter::new(8, 0.25);
        filter.refine_pose(sample(1.0, 2.0, 3.0));
        filter.reset();
        assert_eq!(filter.phase(), FilterPhase::Empty);
        assert!(filter.pose().is_none());
        assert_eq!(filter.sample_count(), 0);
    }

    #[test]
    fn non_finite_sample_leaves_state_untouched() {
        let mut filter = PoseFilter::new(8, 0.25);
        filter.refine_pose(sample(1.0, 1.0, 1.0));
        let before = filter.pose().unwrap();
        filter.refine_pose(sample(f64::NAN, 0.0, 0.0));
        assert_eq!(filter.sample_count(), 1);
        assert_relative_eq!(
            filter.pose().unwrap().isometry().translation.vector,
            before.isometry().translation.vector,
            epsilon = 1e-12
        );
    }

    #[test]
    fn history_is_bounded_fifo() {
        let mut filter = PoseFilter::new(4, 0.5);
        for i in 0..10 {
            filter.refine_pose(sample(i as f64, 0.0, 0.0));
        }
        assert_eq!(filter.sample_count(), 4);
    }

    #[test]
    fn converges_toward_consistent_samples() {
        let mut filter = PoseFilter::new(8, 0.25);
        let truth = Vector3::new(3.0, -1.0, 7.5);
        for _ in 0..64 {
            filter.refine_pose(MapToTracker::from_parts(truth, Rotation3::identity()));
        }
        let estimate = filter.pose().unwrap().isometry().translation.vector;
        assert!((estimate - truth).norm() < 1e-6);
    }
}
