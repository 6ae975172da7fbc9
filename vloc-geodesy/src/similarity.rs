use crate::GeodesyError;
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use vloc_core::{EcefPoint, MapPoint};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Scales below this cannot be meaningfully inverted.
const MIN_SCALE: f64 = 1e-9;

/// The similarity transform that places a map's local frame on the Earth:
/// a rotation, a uniform scale and an ECEF translation.
///
/// Each map carries one of these, produced by the mapping service when the
/// map was geo-referenced and fetched once as 13 parameters alongside the
/// map metadata. It is immutable for the lifetime of the map.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct MapToEcef {
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
    scale: f64,
}

impl MapToEcef {
    /// Creates the transform from its parts, rejecting degenerate scales.
    pub fn from_parts(
        rotation: Rotation3<f64>,
        translation: Vector3<f64>,
        scale: f64,
    ) -> Result<Self, GeodesyError> {
        if !scale.is_finite() || translation.iter().any(|n| !n.is_finite()) {
            return Err(GeodesyError::NonFinite);
        }
        if scale.abs() < MIN_SCALE {
            return Err(GeodesyError::DegenerateScale);
        }
        Ok(Self {
            rotation,
            translation,
            scale,
        })
    }

    /// Parses the 13-parameter wire layout: the nine entries of the rotation
    /// matrix in row-major order, the ECEF translation, then the scale.
    pub fn from_params(params: &[f64; 13]) -> Result<Self, GeodesyError> {
        if params.iter().any(|n| !n.is_finite()) {
            return Err(GeodesyError::NonFinite);
        }
        let rotation = Rotation3::from_matrix(&Matrix3::new(
            params[0], params[1], params[2], params[3], params[4], params[5], params[6], params[7],
            params[8],
        ));
        let translation = Vector3::new(params[9], params[10], params[11]);
        Self::from_parts(rotation, translation, params[12])
    }

    /// Serializes back into the 13-parameter wire layout.
    pub fn params(&self) -> [f64; 13] {
        let r = self.rotation.matrix();
        [
            r[(0, 0)],
            r[(0, 1)],
            r[(0, 2)],
            r[(1, 0)],
            r[(1, 1)],
            r[(1, 2)],
            r[(2, 0)],
            r[(2, 1)],
            r[(2, 2)],
            self.translation.x,
            self.translation.y,
            self.translation.z,
            self.scale,
        ]
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        self.rotation
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Applies the similarity to a map-frame point, producing ECEF
    /// coordinates in meters.
    pub fn map_to_ecef(&self, point: MapPoint) -> EcefPoint {
        EcefPoint(((self.rotation * (point.0.coords * self.scale)) + self.translation).into())
    }

    /// Inverts the similarity for an ECEF point, producing map-frame
    /// coordinates.
    pub fn ecef_to_map(&self, point: EcefPoint) -> MapPoint {
        MapPoint(
            ((self.rotation.inverse() * (point.0.coords - self.translation)) / self.scale).into(),
        )
    }

    /// Carries a map-frame orientation into the ECEF frame.
    pub fn rotation_map_to_ecef(&self, rotation: UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        UnitQuaternion::from_rotation_matrix(&self.rotation) * rotation
    }

    /// Carries an ECEF orientation into the map frame. Inverse of
    /// [`MapToEcef::rotation_map_to_ecef`].
    pub fn rotation_ecef_to_map(&self, rotation: UnitQuaternion<f64>) -> UnitQuaternion<f64> {
        UnitQuaternion::from_rotation_matrix(&self.rotation).inverse() * rotation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn helsinki_like() -> MapToEcef {
        MapToEcef::from_parts(
            Rotation3::from_euler_angles(0.4, -1.1, 2.3),
            Vector3::new(2_884_135.8, 1_341_290.2, 5_509_791.7),
            1.02,
        )
        .unwrap()
    }

    #[test]
    fn round_trips_map_point() {
        let transform = helsinki_like();
        let point = MapPoint::new(12.5, -3.25, 40.0);
        let back = transform.ecef_to_map(transform.map_to_ecef(point));
        assert_relative_eq!(point.0, back.0, epsilon = 1e-9);
    }

    #[test]
    fn round_trips_params() {
        let transform = helsinki_like();
        let reparsed = MapToEcef::from_params(&transform.params()).unwrap();
        let point = MapPoint::new(-7.0, 2.0, 1.5);
        assert_relative_eq!(
            transform.map_to_ecef(point).0,
            reparsed.map_to_ecef(point).0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn rejects_degenerate_scale() {
        assert_eq!(
            MapToEcef::from_parts(Rotation3::identity(), Vector3::zeros(), 0.0),
            Err(GeodesyError::DegenerateScale)
        );
    }

    #[test]
    fn rejects_non_finite_params() {
        let mut params = helsinki_like().params();
        params[10] = f64::INFINITY;
        assert_eq!(
            MapToEcef::from_params(&params),
            Err(GeodesyError::NonFinite)
        );
    }

    #[test]
    fn rotation_conversion_round_trips() {
        let transform = helsinki_like();
        let orientation = UnitQuaternion::from_euler_angles(0.1, 0.7, -0.3);
        let back = transform.rotation_ecef_to_map(transform.rotation_map_to_ecef(orientation));
        assert!(orientation.angle_to(&back) < 1e-12);
    }
}
