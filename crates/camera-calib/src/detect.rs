//! End-to-end detection from `image::GrayImage`: ChESS corners, then the
//! checkerboard grid.

use crate::{chessboard, core};
use chess_corners::{find_chess_corners_image, ChessConfig, ChessError, CornerDescriptor};
use nalgebra::Point2;
use std::f32::consts::PI;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum DetectError {
    #[error("invalid grayscale image buffer length (expected {expected} bytes, got {got})")]
    InvalidGrayBuffer { expected: usize, got: usize },

    #[error("invalid grayscale image dimensions (width={width}, height={height})")]
    InvalidGrayDimensions { width: u32, height: u32 },

    #[error("corner detection failed: {0}")]
    Chess(#[from] ChessError),
}

/// ChESS settings that work for printed boards under reasonable lighting.
pub fn default_chess_config() -> ChessConfig {
    crate::config::ChessCornerSettings::default().to_chess_config()
}

/// Borrow an `image::GrayImage` as a core view.
pub fn gray_view(img: &::image::GrayImage) -> core::GrayImageView<'_> {
    core::GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Copy a core image into an `image::GrayImage` (for encoding).
pub fn to_image(img: &core::GrayImage) -> Result<::image::GrayImage, DetectError> {
    let width = u32::try_from(img.width).unwrap_or(u32::MAX);
    let height = u32::try_from(img.height).unwrap_or(u32::MAX);
    gray_image_from_slice(width, height, &img.data)
}

#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(img, cfg), fields(width = img.width(), height = img.height()))
)]
pub fn detect_chess_corners_raw(
    img: &::image::GrayImage,
    cfg: &ChessConfig,
) -> Result<Vec<CornerDescriptor>, DetectError> {
    Ok(find_chess_corners_image(img, cfg)?)
}

pub fn detect_corners(
    img: &::image::GrayImage,
    cfg: &ChessConfig,
) -> Result<Vec<core::Corner>, DetectError> {
    Ok(detect_chess_corners_raw(img, cfg)?
        .iter()
        .map(adapt_chess_corner)
        .collect())
}

pub fn detect_corners_default(img: &::image::GrayImage) -> Result<Vec<core::Corner>, DetectError> {
    detect_corners(img, &default_chess_config())
}

/// ChESS corners, then the checkerboard detector.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(img, chess_cfg, params),
        fields(width = img.width(), height = img.height())
    )
)]
pub fn detect_chessboard(
    img: &::image::GrayImage,
    chess_cfg: &ChessConfig,
    params: chessboard::ChessboardParams,
) -> Result<Option<chessboard::ChessboardDetectionResult>, DetectError> {
    let corners = detect_corners(img, chess_cfg)?;
    log::debug!("{} ChESS corners", corners.len());
    Ok(chessboard::ChessboardDetector::new(params).detect_from_corners(&corners))
}

pub fn gray_image_from_slice(
    width: u32,
    height: u32,
    pixels: &[u8],
) -> Result<::image::GrayImage, DetectError> {
    let w = usize::try_from(width).ok();
    let h = usize::try_from(height).ok();
    let Some((w, h)) = w.zip(h) else {
        return Err(DetectError::InvalidGrayDimensions { width, height });
    };
    let Some(expected) = w.checked_mul(h) else {
        return Err(DetectError::InvalidGrayDimensions { width, height });
    };
    if pixels.len() != expected {
        return Err(DetectError::InvalidGrayBuffer {
            expected,
            got: pixels.len(),
        });
    }
    ::image::GrayImage::from_raw(width, height, pixels.to_vec())
        .ok_or(DetectError::InvalidGrayDimensions { width, height })
}

pub fn detect_chessboard_from_gray_u8(
    width: u32,
    height: u32,
    pixels: &[u8],
    chess_cfg: &ChessConfig,
    params: chessboard::ChessboardParams,
) -> Result<Option<chessboard::ChessboardDetectionResult>, DetectError> {
    let img = gray_image_from_slice(width, height, pixels)?;
    detect_chessboard(&img, chess_cfg, params)
}

/// Direction bisecting the dark sector between the two grid axes, mod pi.
///
/// The two axes come ordered so that sweeping from the first to the second
/// crosses a dark sector; the bisector therefore flips by a quarter turn
/// between neighbouring corners, which the grid graph relies on.
fn diagonal_orientation(axis0: f32, axis1: f32) -> f32 {
    ((axis0 + axis1) * 0.5).rem_euclid(PI)
}

fn adapt_chess_corner(c: &CornerDescriptor) -> core::Corner {
    core::Corner {
        position: Point2::new(c.x, c.y),
        orientation: diagonal_orientation(c.axes[0].angle, c.axes[1].angle),
        strength: c.response,
    }
}
