use crate::LocalizationEvent;
use std::collections::VecDeque;

/// Coarse 0..3 tracking-quality score with pose-found/pose-lost hysteresis.
///
/// The score rises with each new successful localization (capped at 3) and
/// decays one step after a window with no new successes. It is clamped by
/// the device's own native tracking quality, and the combined value drives
/// the pose-found/pose-lost transition events: "found" requires confidence
/// above the threshold, "lost" requires the score to reach zero while the
/// native tracking also reports nothing. Requiring both keeps momentary weak
/// frames from flickering the UI.
#[derive(Debug, Clone)]
pub struct TrackingQuality {
    previous_successes: i64,
    score: i32,
    latest_success_time: f64,
    decay_window: f64,
    has_pose: bool,
}

impl TrackingQuality {
    pub fn new(decay_window: f64) -> Self {
        Self {
            previous_successes: 0,
            score: 0,
            latest_success_time: 0.0,
            decay_window,
            has_pose: false,
        }
    }

    /// Whether the session currently holds a pose per the hysteresis.
    pub fn has_pose(&self) -> bool {
        self.has_pose
    }

    /// The score at the last update, already clamped by native quality.
    pub fn score(&self) -> i32 {
        self.score
    }

    /// Re-evaluates the score from the cumulative success count and the
    /// native tracking quality, pushing at most one transition event.
    /// `now` is in seconds on any monotonic clock the caller chooses.
    pub fn update(
        &mut self,
        success_count: u64,
        native_quality: i32,
        now: f64,
        events: &mut VecDeque<LocalizationEvent>,
    ) -> i32 {
        let new_successes = success_count as i64 - self.previous_successes;
        self.previous_successes = success_count as i64;

        if new_successes > 0 {
            self.latest_success_time = now;
            self.score = (self.score + new_successes.min(3) as i32).min(3);
        } else if now - self.latest_success_time > self.decay_window {
            self.latest_success_time = now;
            if self.score > 0 {
                self.score -= 1;
            }
        }

        let quality = self.score.min(native_quality);

        if !self.has_pose && quality > 1 {
            self.has_pose = true;
            events.push_back(LocalizationEvent::PoseFound);
        }
        if self.has_pose && quality < 1 && native_quality == 0 {
            self.has_pose = false;
            events.push_back(LocalizationEvent::PoseLost);
        }

        quality
    }

    /// Forgets everything, as on an explicit restart of localization.
    pub fn reset(&mut self) {
        self.previous_successes = 0;
        self.score = 0;
        self.latest_success_time = 0.0;
        self.has_pose = false;
    }
}
