use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::Point3;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A 3d point in the local coordinate frame of a loaded map.
///
/// This is the frame in which a map's point cloud and all localization
/// results for that map are expressed. Its unit of distance is meters,
/// and its placement in the live session is unknown until an alignment
/// has been estimated.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct MapPoint(pub Point3<f64>);

impl MapPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self(Point3::new(x, y, z))
    }
}

/// A 3d point in the device's live tracking frame.
///
/// The tracking frame is the world space of the device's own SLAM system.
/// It is continuous while tracking is maintained but is reset arbitrarily
/// whenever tracking is lost, so nothing in this frame should be persisted.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct TrackerPoint(pub Point3<f64>);

impl TrackerPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self(Point3::new(x, y, z))
    }
}

/// A 3d point in Earth-Centered-Earth-Fixed coordinates, in meters.
///
/// The origin is the Earth's center of mass, the Z axis points at the north
/// pole, and the X axis pierces the equator at the prime meridian.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct EcefPoint(pub Point3<f64>);

impl EcefPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self(Point3::new(x, y, z))
    }
}
