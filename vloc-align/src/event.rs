use nalgebra::{Point3, UnitQuaternion};
use vloc_core::{MapId, TrackerToMap};
use vloc_geodesy::{MapToEcef, Wgs84};

/// The fully resolved pose a successful localization produced, handed to
/// consumers with every [`LocalizationEvent::Localized`] notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalizerPose {
    pub map: MapId,
    /// Camera position in the map's local frame at capture time.
    pub position: Point3<f64>,
    /// Camera orientation in the map's local frame at capture time.
    pub rotation: UnitQuaternion<f64>,
    /// The inverse alignment, for carrying live tracking-frame poses into
    /// the map frame (geodetic queries, navigation).
    pub tracker_to_map: TrackerToMap,
    /// The user's geodetic position, when this map is geo-referenced.
    pub wgs84: Option<Wgs84>,
    /// The map's geo-reference, when known, so consumers can run further
    /// conversions without another fetch.
    pub map_to_ecef: Option<MapToEcef>,
}

/// Notifications emitted by the orchestrator and drained with
/// [`crate::Localizer::poll_event`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalizationEvent {
    /// A successful result arrived for a different map than the previous
    /// one. Fired before the result itself is processed.
    MapChanged(MapId),
    /// A localization attempt succeeded and the alignment was updated.
    Localized(LocalizerPose),
    /// Tracking quality rose above the confidence threshold: the session
    /// has a pose. Fired once per transition, not per result.
    PoseFound,
    /// Tracking quality decayed to zero while device tracking was also
    /// lost: the session no longer has a pose. Fired once per transition.
    PoseLost,
}
