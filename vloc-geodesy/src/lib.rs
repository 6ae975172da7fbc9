//! This crate contains the stateless coordinate conversions used to
//! geo-reference visually localized maps.
//!
//! Each scanned map carries a similarity transform ([`MapToEcef`]) that
//! places its local Cartesian frame on the Earth in ECEF coordinates. On top
//! of that sit the standard WGS84 ellipsoid conversions ([`Wgs84`]) and a
//! local East-North-Up rotation used for compass headings. The composition
//! goes both ways:
//!
//! * map-local → ECEF → WGS84, to display the user's geolocation;
//! * WGS84 → ECEF → map-local, to ingest GeoPose localization results
//!   (absolute geodetic poses) into the map-relative alignment pipeline.
//!
//! All functions here are deterministic and side-effect free. Failures are
//! reported through [`GeodesyError`] and never panic; a caller displaying
//! geolocation text is expected to keep its previous value on error.

mod bearing;
mod similarity;
mod wgs84;

pub use bearing::*;
pub use similarity::*;
pub use wgs84::*;

use thiserror::Error;

/// Errors produced by coordinate conversions.
///
/// These are all local input errors; no conversion has global failure state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeodesyError {
    /// A map-to-ECEF similarity was supplied with a scale too close to zero
    /// to invert.
    #[error("degenerate similarity scale")]
    DegenerateScale,
    /// An input coordinate contained NaN or infinity.
    #[error("non-finite input coordinate")]
    NonFinite,
    /// A geodetic coordinate was outside its valid range
    /// (latitude beyond ±90° or longitude beyond ±180°).
    #[error("geodetic coordinate out of range")]
    OutOfRange,
}
