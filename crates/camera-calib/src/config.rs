//! JSON configuration shared by the `camera-calib` commands.

use std::path::Path;

use camera_calib_chessboard::ChessboardParams;
use camera_calib_feedback::CoverageParams;
use camera_calib_rectify::RectifyOptions;
use camera_calib_solver::{CalibrationOptions, CheckerboardSpec, PoseOptions};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid board: {0}")]
    InvalidBoard(&'static str),
}

/// Settings for the ChESS corner detector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChessCornerSettings {
    /// Response threshold relative to the strongest corner.
    pub threshold_rel: f32,
    pub nms_radius: u32,
}

impl Default for ChessCornerSettings {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            nms_radius: 2,
        }
    }
}

#[cfg(feature = "image")]
impl ChessCornerSettings {
    pub fn to_chess_config(&self) -> chess_corners::ChessConfig {
        let mut cfg = chess_corners::ChessConfig::single_scale();
        cfg.threshold_mode = chess_corners::ThresholdMode::Relative;
        cfg.threshold_value = self.threshold_rel;
        cfg.nms_radius = self.nms_radius;
        cfg
    }
}

/// Largest accepted inner-corner count along one board side.
pub const MAX_BOARD_SIDE: u32 = 1000;

/// Everything a capture run needs apart from the images.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibConfig {
    pub board: CheckerboardSpec,
    #[serde(default)]
    pub chess: ChessCornerSettings,
    /// Detector parameters; derived from the board when absent.
    #[serde(default)]
    pub chessboard: Option<ChessboardParams>,
    #[serde(default)]
    pub calibration: CalibrationOptions,
    #[serde(default)]
    pub pose: PoseOptions,
    #[serde(default)]
    pub rectify: RectifyOptions,
    #[serde(default)]
    pub coverage: CoverageParams,
}

impl CalibConfig {
    pub fn new(board: CheckerboardSpec) -> Self {
        Self {
            board,
            chess: ChessCornerSettings::default(),
            chessboard: None,
            calibration: CalibrationOptions::default(),
            pose: PoseOptions::default(),
            rectify: RectifyOptions::default(),
            coverage: CoverageParams::default(),
        }
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let cfg = Self::from_json(&text).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.board;
        if b.rows < 2 || b.cols < 2 {
            return Err(ConfigError::InvalidBoard("need at least 2x2 inner corners"));
        }
        if b.rows > MAX_BOARD_SIDE || b.cols > MAX_BOARD_SIDE {
            return Err(ConfigError::InvalidBoard("at most 1000 inner corners per side"));
        }
        if !(b.square_size.is_finite() && b.square_size > 0.0) {
            return Err(ConfigError::InvalidBoard("square size must be positive"));
        }
        Ok(())
    }

    pub fn chessboard_params(&self) -> ChessboardParams {
        self.chessboard
            .clone()
            .unwrap_or_else(|| ChessboardParams::for_board(self.board.rows, self.board.cols))
    }
}
