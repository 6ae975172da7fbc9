#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The settings for the alignment pipeline.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone)]
pub struct AlignerSettings {
    /// The number of recent accepted samples each pose filter averages over.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_filter_history"))]
    pub filter_history: usize,
    /// Whether localization results are filtered at all. When disabled, each
    /// successful result overwrites the alignment directly.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_use_filtering"))]
    pub use_filtering: bool,
    /// Whether the previous map's filter is reset when a result arrives for
    /// a different map than the last localized one.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_reset_on_map_change")
    )]
    pub reset_on_map_change: bool,
    /// The maximum fraction of the distance between the current estimate and
    /// the filtered target that one accepted sample may move the estimate.
    /// This bounds the damage a single wrong localization can do.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_blend_alpha"))]
    pub blend_alpha: f64,
    /// Positional distance between the placed pose and the filter estimate
    /// above which the placement snaps instead of smoothing toward it.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_warp_threshold_distance")
    )]
    pub warp_threshold_distance: f64,
    /// Rotation agreement (quaternion dot product) below which the placement
    /// snaps instead of smoothing.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_warp_threshold_cos_angle")
    )]
    pub warp_threshold_cos_angle: f64,
    /// Per-frame smoothing factor of the placement interpolation, expressed
    /// for a 60 Hz step.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_placement_smoothing")
    )]
    pub placement_smoothing: f64,
    /// Seconds without a new successful localization before the tracking
    /// quality score decays one step.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_pose_decay_seconds")
    )]
    pub pose_decay_seconds: f64,
    /// Seconds between localization attempts during normal operation.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_localization_interval_seconds")
    )]
    pub localization_interval_seconds: f64,
    /// Whether to localize at maximum speed at startup and after a resume
    /// until the alignment has converged.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_burst_mode"))]
    pub burst_mode: bool,
    /// Successful localizations after which burst mode ends.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_burst_success_target")
    )]
    pub burst_success_target: u32,
    /// Seconds after which burst mode ends regardless of success count.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_burst_window_seconds")
    )]
    pub burst_window_seconds: f64,
}

impl Default for AlignerSettings {
    fn default() -> Self {
        Self {
            filter_history: default_filter_history(),
            use_filtering: default_use_filtering(),
            reset_on_map_change: default_reset_on_map_change(),
            blend_alpha: default_blend_alpha(),
            warp_threshold_distance: default_warp_threshold_distance(),
            warp_threshold_cos_angle: default_warp_threshold_cos_angle(),
            placement_smoothing: default_placement_smoothing(),
            pose_decay_seconds: default_pose_decay_seconds(),
            localization_interval_seconds: default_localization_interval_seconds(),
            burst_mode: default_burst_mode(),
            burst_success_target: default_burst_success_target(),
            burst_window_seconds: default_burst_window_seconds(),
        }
    }
}

fn default_filter_history() -> usize {
    8
}

fn default_use_filtering() -> bool {
    true
}

fn default_reset_on_map_change() -> bool {
    false
}

fn default_blend_alpha() -> f64 {
    0.25
}

fn default_warp_threshold_distance() -> f64 {
    5.0
}

fn default_warp_threshold_cos_angle() -> f64 {
    0.939_692_620_785_908_4 // cos 20 degrees
}

fn default_placement_smoothing() -> f64 {
    0.025
}

fn default_pose_decay_seconds() -> f64 {
    10.0
}

fn default_localization_interval_seconds() -> f64 {
    2.0
}

fn default_burst_mode() -> bool {
    true
}

fn default_burst_success_target() -> u32 {
    10
}

fn default_burst_window_seconds() -> f64 {
    15.0
}
