//! Core types and utilities for camera calibration.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete corner detector or image decoding library.

mod camera;
mod corner;
mod homography;
mod image;
mod logger;

pub use camera::{
    BrownConrady, CameraIntrinsics, CameraModel, CameraModelError, DEFAULT_UNDISTORT_ITERS,
};
pub use corner::{Corner, GridCoords, LabeledCorner, TargetDetection, TargetKind};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView, ImageBufferError};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_env, init_with_level, LOG_ENV_VAR};
