//! Image rectification for a calibrated camera.
//!
//! A [`Rectifier`] is built once per camera (and pose, for the plane-based
//! modes) and precomputes a [`RectifyMap`]. Applying it to a frame is a
//! bilinear remap.
//!
//! ```no_run
//! use camera_calib_core::{CameraModel, GrayImage};
//! use camera_calib_rectify::{RectificationMode, Rectifier, RectifyOptions};
//! # fn load() -> (CameraModel, GrayImage) { unimplemented!() }
//!
//! let (camera, frame) = load();
//! let rectifier = Rectifier::new(
//!     camera,
//!     RectificationMode::Undistort,
//!     None,
//!     &RectifyOptions::default(),
//! )?;
//! let out = rectifier.apply(&frame.view());
//! assert_eq!([out.width as u32, out.height as u32], rectifier.output_size());
//! # Ok::<(), camera_calib_rectify::RectifyError>(())
//! ```

mod map;
mod params;
mod rectifier;

pub use map::RectifyMap;
pub use params::{RectificationMode, RectifyOptions, WorldRect};
pub use rectifier::{Rectifier, RectifyError};
