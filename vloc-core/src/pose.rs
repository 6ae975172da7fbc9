use crate::{MapPoint, TrackerPoint};
use derive_more::{AsMut, AsRef, From, Into};
use nalgebra::{IsometryMatrix3, Matrix4, Point3, Rotation3, UnitQuaternion, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This trait is implemented by the frame-to-frame poses in this library:
///
/// * [`MapToTracker`] - places a map's local frame in the device tracking frame
/// * [`TrackerToMap`] - maps tracking-frame coordinates back into a map's frame
pub trait FramePose: From<IsometryMatrix3<f64>> + Clone + Copy {
    type Inverse: FramePose;

    /// Retrieve the isometry.
    fn isometry(self) -> IsometryMatrix3<f64>;

    /// Creates a pose with no change in position or orientation.
    fn identity() -> Self {
        IsometryMatrix3::identity().into()
    }

    /// Takes the inverse of the pose.
    fn inverse(self) -> Self::Inverse {
        self.isometry().inverse().into()
    }

    /// Create the pose from rotation and translation.
    fn from_parts(translation: Vector3<f64>, rotation: Rotation3<f64>) -> Self {
        IsometryMatrix3::from_parts(translation.into(), rotation).into()
    }

    /// Retrieve the homogeneous matrix.
    fn homogeneous(self) -> Matrix4<f64> {
        self.isometry().to_homogeneous()
    }

    /// Retrieve the translation component as a point.
    fn position(self) -> Point3<f64> {
        self.isometry().translation.vector.into()
    }

    /// Retrieve the rotation component.
    fn rotation(self) -> Rotation3<f64> {
        self.isometry().rotation
    }

    /// Returns `false` if any component of the pose is NaN or infinite.
    ///
    /// Localization engines occasionally emit corrupt results, and a corrupt
    /// pose must never be allowed to propagate into a displayed alignment.
    fn is_finite(self) -> bool {
        self.homogeneous().iter().all(|n| n.is_finite())
    }
}

/// The alignment transform: places a map's local frame into the device's
/// live tracking frame. This is the output of the whole pose-fusion
/// pipeline; applying it to map content makes that content appear at the
/// physically correct place in the user's session.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct MapToTracker(pub IsometryMatrix3<f64>);

impl FramePose for MapToTracker {
    type Inverse = TrackerToMap;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

impl MapToTracker {
    /// Derives the alignment from two poses of the same physical camera at
    /// the same instant: its pose in the device tracking frame and its pose
    /// in the map's local frame. The transform returned is the one that
    /// carries the map-frame pose exactly onto the tracker-frame pose.
    pub fn from_capture(
        tracker_pose: IsometryMatrix3<f64>,
        map_pose: IsometryMatrix3<f64>,
    ) -> Self {
        (tracker_pose * map_pose.inverse()).into()
    }

    /// Transform a map-frame point into the tracking frame.
    pub fn transform(self, point: MapPoint) -> TrackerPoint {
        TrackerPoint(self.0 * point.0)
    }
}

/// The inverse alignment: maps live tracking-frame coordinates into a map's
/// local frame. Used for geodetic queries about the user's position, since
/// geo-referencing is defined relative to the map frame.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct TrackerToMap(pub IsometryMatrix3<f64>);

impl FramePose for TrackerToMap {
    type Inverse = MapToTracker;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

impl TrackerToMap {
    /// Transform a tracking-frame point into the map's local frame.
    pub fn transform(self, point: TrackerPoint) -> MapPoint {
        MapPoint(self.0 * point.0)
    }
}

/// The device's tracking-frame pose at the moment an image was captured.
///
/// Localization runs asynchronously, so by the time a result arrives the
/// device has moved on; the alignment must be composed against the pose at
/// capture time, not the current pose.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CapturePose {
    pub position: Point3<f64>,
    pub rotation: UnitQuaternion<f64>,
}

impl CapturePose {
    pub fn new(position: Point3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { position, rotation }
    }

    /// Retrieve the capture pose as an isometry in the tracking frame.
    pub fn isometry(&self) -> IsometryMatrix3<f64> {
        IsometryMatrix3::from_parts(self.position.coords.into(), self.rotation.to_rotation_matrix())
    }
}
