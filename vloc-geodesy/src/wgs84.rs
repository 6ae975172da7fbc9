use crate::{GeodesyError, MapToEcef};
use nalgebra::UnitQuaternion;
use vloc_core::{EcefPoint, MapPoint};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// WGS84 ellipsoid semi-major axis in meters.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 ellipsoid flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS84 ellipsoid semi-minor axis in meters.
pub const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);
/// First eccentricity squared.
pub const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);

/// A geodetic position on the WGS84 ellipsoid.
///
/// Latitude and longitude are in degrees; altitude is the height above the
/// ellipsoid in meters (not above mean sea level).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Wgs84 {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl Wgs84 {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Result<Self, GeodesyError> {
        if !latitude.is_finite() || !longitude.is_finite() || !altitude.is_finite() {
            return Err(GeodesyError::NonFinite);
        }
        if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
            return Err(GeodesyError::OutOfRange);
        }
        Ok(Self {
            latitude,
            longitude,
            altitude,
        })
    }

    /// Converts to ECEF coordinates with the closed-form ellipsoid formula.
    pub fn to_ecef(&self) -> EcefPoint {
        let lat = self.latitude.to_radians();
        let lon = self.longitude.to_radians();
        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        // Prime vertical radius of curvature at this latitude.
        let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        EcefPoint::new(
            (n + self.altitude) * cos_lat * lon.cos(),
            (n + self.altitude) * cos_lat * lon.sin(),
            (n * (1.0 - WGS84_E2) + self.altitude) * sin_lat,
        )
    }

    /// Converts an ECEF point to geodetic coordinates by fixed-point
    /// iteration on the latitude. Converges to well under a millimeter in a
    /// handful of iterations for any point near the Earth's surface.
    pub fn from_ecef(ecef: EcefPoint) -> Result<Self, GeodesyError> {
        let (x, y, z) = (ecef.0.x, ecef.0.y, ecef.0.z);
        if !x.is_finite() || !y.is_finite() || !z.is_finite() {
            return Err(GeodesyError::NonFinite);
        }
        let p = x.hypot(y);
        let longitude = y.atan2(x).to_degrees();

        // On the polar axis the longitude is arbitrary and the latitude is
        // exactly ±90; the iteration below would divide by cos(lat) = 0.
        if p < 1e-9 {
            return Self::new(90f64.copysign(z), longitude, z.abs() - WGS84_B);
        }

        let mut lat = (z / (p * (1.0 - WGS84_E2))).atan();
        let mut n = WGS84_A;
        for _ in 0..8 {
            let sin_lat = lat.sin();
            n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
            lat = ((z + WGS84_E2 * n * sin_lat) / p).atan();
        }
        let altitude = p / lat.cos() - n;
        Self::new(lat.to_degrees().clamp(-90.0, 90.0), longitude, altitude)
    }
}

/// Converts a map-frame point to geodetic coordinates via the map's ECEF
/// placement. This is what user-facing geolocation displays consume.
pub fn map_to_wgs84(point: MapPoint, map_to_ecef: &MapToEcef) -> Result<Wgs84, GeodesyError> {
    Wgs84::from_ecef(map_to_ecef.map_to_ecef(point))
}

/// Converts a geodetic position into a map's local frame. Together with
/// [`geo_rotation_to_map`] this is the ingestion pipeline for GeoPose
/// localization results, which arrive as absolute geodetic poses rather than
/// map-relative ones.
pub fn wgs84_to_map(geo: Wgs84, map_to_ecef: &MapToEcef) -> MapPoint {
    map_to_ecef.ecef_to_map(geo.to_ecef())
}

/// Converts an ECEF-frame orientation (the rotation part of a GeoPose
/// result) into the map's local frame.
pub fn geo_rotation_to_map(
    rotation: UnitQuaternion<f64>,
    map_to_ecef: &MapToEcef,
) -> UnitQuaternion<f64> {
    map_to_ecef.rotation_ecef_to_map(rotation)
}
