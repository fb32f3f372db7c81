//! Geometry utilities: poses, frames, homographies, planar PnP, geodesy.

pub mod camera;
pub mod frames;
pub mod geodesy;
pub mod homography;
pub mod pnp;
pub mod polygon;
pub mod pose;
pub mod so3;

pub use camera::CameraIntrinsics;
pub use geodesy::{Crs, GeoPoint, GeoPosition, LocalTangentPlane};
pub use pnp::{solve_planar_pnp_ransac, PnPResult};
pub use pose::Pose;
