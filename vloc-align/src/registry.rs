use crate::{AlignerSettings, PoseFilter};
use nalgebra::{IsometryMatrix3, Point3, UnitQuaternion, Vector3};
use std::collections::HashMap;
use vloc_core::MapId;
use vloc_geodesy::MapToEcef;

/// Where, within the application's scene, a map's root is placed. Authored
/// at load time and never changed by localization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapOffset {
    pub position: Point3<f64>,
    pub rotation: UnitQuaternion<f64>,
    pub scale: Vector3<f64>,
}

impl Default for MapOffset {
    fn default() -> Self {
        Self {
            position: Point3::origin(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

impl MapOffset {
    /// The offset as an isometry, ignoring scale. Scale is applied to the
    /// map-frame position separately when composing the cloud space.
    pub fn isometry_no_scale(&self) -> IsometryMatrix3<f64> {
        IsometryMatrix3::from_parts(
            self.position.coords.into(),
            self.rotation.to_rotation_matrix(),
        )
    }
}

/// One loaded map's placement state in the live session.
///
/// Created when a map finishes loading and destroyed when it is unloaded;
/// exactly one exists per loaded map. The pose filter inside is this map's
/// own and is never shared with another map.
#[derive(Debug, Clone)]
pub struct MapSpace {
    pub id: MapId,
    pub offset: MapOffset,
    /// The map's geo-reference, when the map has one. Fetched once from the
    /// service alongside map metadata; immutable thereafter.
    pub map_to_ecef: Option<MapToEcef>,
    pub filter: PoseFilter,
    /// The placement interpolation state: the pose most recently handed to
    /// the scene, which eases toward the filter estimate each tick.
    pub target: Option<(Point3<f64>, UnitQuaternion<f64>)>,
}

/// Owns every currently loaded [`MapSpace`], keyed by map id.
#[derive(Debug, Default)]
pub struct SpaceRegistry {
    spaces: HashMap<MapId, MapSpace>,
}

impl SpaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly loaded map. A re-registration of the same id
    /// replaces the previous space wholesale (fresh filter included).
    pub fn register(
        &mut self,
        id: MapId,
        offset: MapOffset,
        map_to_ecef: Option<MapToEcef>,
        settings: &AlignerSettings,
    ) {
        self.spaces.insert(
            id,
            MapSpace {
                id,
                offset,
                map_to_ecef,
                filter: PoseFilter::new(settings.filter_history, settings.blend_alpha),
                target: None,
            },
        );
    }

    /// Removes an unloaded map. Results that later arrive for this id are
    /// discarded by the orchestrator as unknown.
    pub fn unregister(&mut self, id: MapId) -> Option<MapSpace> {
        self.spaces.remove(&id)
    }

    pub fn contains(&self, id: MapId) -> bool {
        self.spaces.contains_key(&id)
    }

    pub fn get(&self, id: MapId) -> Option<&MapSpace> {
        self.spaces.get(&id)
    }

    pub fn get_mut(&mut self, id: MapId) -> Option<&mut MapSpace> {
        self.spaces.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MapSpace> {
        self.spaces.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut MapSpace> {
        self.spaces.values_mut()
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}
