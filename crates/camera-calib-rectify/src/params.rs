use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RectificationMode {
    /// Remove lens distortion; keep size and intrinsics.
    Undistort,
    /// Top-down view of the world plane covering the camera's field of view.
    Untilt,
    /// Fixed world rectangle resampled with world-aligned axes.
    Align,
}

impl RectificationMode {
    pub fn needs_pose(self) -> bool {
        !matches!(self, RectificationMode::Undistort)
    }
}

impl std::str::FromStr for RectificationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "undistort" => Ok(Self::Undistort),
            "untilt" => Ok(Self::Untilt),
            "align" => Ok(Self::Align),
            other => Err(format!("unknown rectification mode '{other}'")),
        }
    }
}

/// Axis-aligned rectangle on the world plane `Z = 0`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl WorldRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectifyOptions {
    /// World rectangle for [`RectificationMode::Align`].
    pub rect: Option<WorldRect>,
    /// World units per output pixel for Untilt/Align. Derived from the
    /// camera resolution at the image centre when unset.
    pub scale: Option<f64>,
    /// Upper bound on either output dimension.
    pub max_output_size: u32,
    /// Value written to output pixels without a source.
    pub fill: u8,
    /// Samples per image edge when tracing the visible plane region.
    pub border_samples: usize,
}

impl Default for RectifyOptions {
    fn default() -> Self {
        Self {
            rect: None,
            scale: None,
            max_output_size: 8192,
            fill: 0,
            border_samples: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_and_serializes_lowercase() {
        assert_eq!("Untilt".parse::<RectificationMode>(), Ok(RectificationMode::Untilt));
        assert!("tilt".parse::<RectificationMode>().is_err());
        let json = serde_json::to_string(&RectificationMode::Align).expect("serialize");
        assert_eq!(json, "\"align\"");
    }

    #[test]
    fn rect_validity() {
        assert!(WorldRect::new(0.0, 0.0, 10.0, 5.0).is_valid());
        assert!(!WorldRect::new(0.0, 0.0, 0.0, 5.0).is_valid());
        assert!(!WorldRect::new(f64::NAN, 0.0, 1.0, 5.0).is_valid());
    }

    #[test]
    fn options_default_from_empty_json() {
        let opts: RectifyOptions = serde_json::from_str("{}").expect("parse");
        assert_eq!(opts, RectifyOptions::default());
    }
}
