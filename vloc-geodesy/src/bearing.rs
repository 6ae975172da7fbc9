use crate::{map_to_wgs84, GeodesyError, MapToEcef};
use nalgebra::{Rotation3, Vector3};
use vloc_core::{FramePose, TrackerPoint, TrackerToMap};

/// Rotation from the ECEF frame into the local East-North-Up frame at the
/// given geodetic latitude and longitude (degrees).
///
/// After applying this rotation, the X axis points east, the Y axis north
/// and the Z axis up along the ellipsoid normal.
pub fn enu_rotation(latitude: f64, longitude: f64) -> Rotation3<f64> {
    let about_z = Rotation3::from_axis_angle(&Vector3::z_axis(), -(90.0 + longitude).to_radians());
    let about_x = Rotation3::from_axis_angle(&Vector3::x_axis(), -(90.0 - latitude).to_radians());
    about_x * about_z
}

/// Computes the compass heading, in degrees clockwise from north in
/// `0..360`, of the camera's forward direction.
///
/// The camera position and forward vector are given in the tracking frame;
/// they are carried into the map frame with the inverse alignment, then into
/// ECEF with the map's placement, and finally the displacement between the
/// camera and a point one unit ahead of it is expressed in the local
/// East-North-Up frame. Display-only; the alignment pipeline never consumes
/// headings.
pub fn compass_bearing(
    camera_position: TrackerPoint,
    camera_forward: Vector3<f64>,
    tracker_to_map: TrackerToMap,
    map_to_ecef: &MapToEcef,
) -> Result<f64, GeodesyError> {
    if camera_forward.iter().any(|n| !n.is_finite()) || camera_forward.norm() < 1e-12 {
        return Err(GeodesyError::NonFinite);
    }
    let eye = tracker_to_map.transform(camera_position);
    let ahead = tracker_to_map.transform(TrackerPoint(camera_position.0 + camera_forward));

    let eye_ecef = map_to_ecef.map_to_ecef(eye);
    let ahead_ecef = map_to_ecef.map_to_ecef(ahead);
    let geo = map_to_wgs84(eye, map_to_ecef)?;

    let enu = enu_rotation(geo.latitude, geo.longitude);
    let direction = enu * (ahead_ecef.0.coords - eye_ecef.0.coords).normalize();

    // ENU x is east and y is north, so the clockwise-from-north heading is
    // atan2(east, north), wrapped into 0..360.
    Ok(direction.x.atan2(direction.y).to_degrees().rem_euclid(360.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    #[test]
    fn enu_up_axis_points_away_from_earth() {
        // At the equator/prime meridian, ECEF +X is straight up.
        let enu = enu_rotation(0.0, 0.0);
        let up = enu * Vector3::x();
        assert_relative_eq!(up.z, 1.0, epsilon = 1e-9);

        // At the north pole, ECEF +Z is straight up.
        let enu = enu_rotation(90.0, 0.0);
        let up = enu * Vector3::z();
        assert_relative_eq!(up.z, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn enu_east_axis_at_equator() {
        // At lat 0, lon 0, east on the ground is ECEF +Y.
        let enu = enu_rotation(0.0, 0.0);
        let east = enu * Vector3::y();
        assert_relative_eq!(east.x, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn bearing_of_northward_view_is_zero() {
        // Identity map placement centered at the equator so that the map
        // frame is already the ENU frame's inverse image: pick a map->ecef
        // whose rotation carries map +Y to ECEF north (+Z at the equator).
        let rotation = enu_rotation(0.0, 0.0).inverse();
        let translation = crate::Wgs84::new(0.0, 0.0, 0.0).unwrap().to_ecef().0.coords;
        let map_to_ecef = MapToEcef::from_parts(rotation, translation, 1.0).unwrap();

        // Camera in the map frame looking along +Y (north).
        let bearing = compass_bearing(
            TrackerPoint(Point3::origin()),
            Vector3::y(),
            TrackerToMap::identity(),
            &map_to_ecef,
        )
        .unwrap();
        assert_relative_eq!(bearing.min(360.0 - bearing), 0.0, epsilon = 1e-6);
    }
}
