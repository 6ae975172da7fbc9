use crate::{CapturePose, FramePose, MapToTracker};
use derive_more::{From, Into};
use nalgebra::{IsometryMatrix3, Matrix3, Rotation3, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Identifier of a loaded map, assigned by the localization engine when the
/// map's data is loaded and stable for the map's lifetime.
///
/// The on-device engine reports a negative handle to signal that an image
/// could not be localized against any loaded map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct MapId(pub i32);

impl MapId {
    /// Whether this handle refers to a map at all. Negative handles are the
    /// engine's failure sentinel.
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

/// One successful localization attempt, normalized from either the on-device
/// or the on-server result shape.
///
/// A result is an independent, noisy sample of "where was the camera in this
/// map's frame". It is consumed immediately by the pose filter and never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct RawLocalizationResult {
    /// The map the engine matched the image against.
    pub map: MapId,
    /// Pose of the camera in the map's local frame at capture time.
    pub map_pose: IsometryMatrix3<f64>,
    /// The device tracking-frame pose at the moment the image was captured.
    pub capture: CapturePose,
}

impl RawLocalizationResult {
    pub fn new(map: MapId, map_pose: IsometryMatrix3<f64>, capture: CapturePose) -> Self {
        Self {
            map,
            map_pose,
            capture,
        }
    }

    /// Normalizes the on-server result shape, which carries the map-frame
    /// camera pose as a 3x3 rotation matrix and a translation vector.
    ///
    /// Returns `None` when the rotation entries do not form a sensible
    /// rotation (non-finite input); such results are dropped at the boundary
    /// rather than propagated.
    pub fn from_rotation_matrix(
        map: MapId,
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
        capture: CapturePose,
    ) -> Option<Self> {
        if rotation.iter().chain(translation.iter()).any(|n| !n.is_finite()) {
            return None;
        }
        let rotation = Rotation3::from_matrix(&rotation);
        Some(Self {
            map,
            map_pose: IsometryMatrix3::from_parts(translation.into(), rotation),
            capture,
        })
    }

    /// Composes the alignment sample this result implies, before any map
    /// offset is applied: the rigid transform that carries the reported
    /// map-frame camera pose onto the known tracker-frame capture pose.
    pub fn alignment(&self) -> MapToTracker {
        MapToTracker::from_capture(self.capture.isometry(), self.map_pose)
    }
}
