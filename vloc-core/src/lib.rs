//! # vloc-core
//!
//! This library provides the common types shared by the visual-localization
//! alignment crates. A cloud visual-positioning service reports where the
//! device camera was, expressed in the local coordinate frame of a previously
//! scanned map. The device simultaneously knows where that camera was in its
//! own live tracking frame (the SLAM/odometry world). Composing the two poses
//! of the same physical instant yields the transform that places the map in
//! the live session, and everything above this crate is concerned with
//! estimating and stabilizing that transform.
//!
//! The crate deliberately stays small: frame-tagged points, frame-tagged
//! poses, and the normalized localization-result model. Coordinate system
//! conversions live in `vloc-geodesy` and all stateful machinery lives in
//! `vloc-align`.
//!
//! Three coordinate frames appear throughout:
//!
//! * **Map frame**: the local Cartesian frame a map's point cloud and
//!   localization results are expressed in.
//! * **Tracker frame**: the device's live AR/SLAM world space.
//! * **ECEF**: Earth-Centered-Earth-Fixed, used to geo-reference maps.

mod point;
mod pose;
mod result;

pub use nalgebra;
pub use point::*;
pub use pose::*;
pub use result::*;
