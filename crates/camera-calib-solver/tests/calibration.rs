//! End-to-end calibration on synthetic checkerboard views.

use camera_calib_chessboard::{ChessboardDetector, ChessboardParams};
use camera_calib_core::{
    BrownConrady, CameraIntrinsics, CameraModel, Corner, GridCoords, LabeledCorner,
    TargetDetection, TargetKind,
};
use camera_calib_solver::{CalibrationOptions, CalibrationSession, CheckerboardSpec, PoseEstimator};
use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector3};

const ROWS: u32 = 6;
const COLS: u32 = 9;
const SQUARE: f64 = 30.0;

fn board() -> CheckerboardSpec {
    CheckerboardSpec::new(ROWS, COLS, SQUARE)
}

fn truth() -> CameraModel {
    CameraModel::new(
        CameraIntrinsics::new(1000.0, 995.0, 640.0, 360.0),
        BrownConrady {
            k1: -0.2,
            k2: 0.08,
            p1: 0.001,
            p2: -0.0005,
            k3: 0.0,
        },
        [1280, 720],
    )
}

/// Board centred on the optical axis at `distance`, rotated by `axisangle`.
fn facing_pose(axisangle: Vector3<f64>, distance: f64) -> Isometry3<f64> {
    let rot = UnitQuaternion::from_scaled_axis(axisangle);
    let [w, h] = board().extent();
    let centre = rot * Vector3::new(w * 0.5, h * 0.5, 0.0);
    Isometry3::from_parts(
        Translation3::from(Vector3::new(0.0, 0.0, distance) - centre),
        rot,
    )
}

fn poses() -> Vec<Isometry3<f64>> {
    [
        (0.3, 0.0, 0.0),
        (-0.3, 0.1, 0.0),
        (0.0, 0.35, 0.1),
        (0.1, -0.35, -0.1),
        (0.25, 0.25, 0.3),
        (-0.2, -0.2, -0.2),
    ]
    .into_iter()
    .enumerate()
    .map(|(k, (x, y, z))| facing_pose(Vector3::new(x, y, z), 550.0 + 25.0 * k as f64))
    .collect()
}

/// Small deterministic generator for pixel noise in `[-1, 1)`.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }
}

fn detection(
    cam: &CameraModel,
    pose: &Isometry3<f64>,
    noise: f64,
    rng: &mut Lcg,
) -> TargetDetection {
    let b = board();
    let mut corners = Vec::new();
    for j in 0..ROWS as i32 {
        for i in 0..COLS as i32 {
            let g = GridCoords { i, j };
            let p = cam.project_from(pose, &b.board_point3(g)).expect("visible");
            corners.push(LabeledCorner {
                position: Point2::new(
                    (p.x + noise * rng.next()) as f32,
                    (p.y + noise * rng.next()) as f32,
                ),
                grid: Some(g),
                id: Some(j as u32 * COLS + i as u32),
                confidence: 1.0,
            });
        }
    }
    TargetDetection {
        kind: TargetKind::Chessboard,
        corners,
    }
}

fn session_with(noise: f64) -> CalibrationSession {
    let cam = truth();
    let mut rng = Lcg(7);
    let mut session =
        CalibrationSession::new(board(), cam.image_size, CalibrationOptions::default());
    for pose in poses() {
        session
            .add_view(&detection(&cam, &pose, noise, &mut rng))
            .expect("view accepted");
    }
    session
}

#[test]
fn recovers_camera_from_noiseless_views() {
    let mut session = session_with(0.0);
    let result = session.calibrate().expect("calibration");
    let k = result.camera.intrinsics;
    let d = result.camera.distortion;

    // Corner positions are stored as f32, which bounds the attainable RMS.
    assert!(result.rms < 1e-3, "rms {}", result.rms);
    assert!((k.fx - 1000.0).abs() < 0.1, "fx {}", k.fx);
    assert!((k.fy - 995.0).abs() < 0.1, "fy {}", k.fy);
    assert!((k.cx - 640.0).abs() < 0.1, "cx {}", k.cx);
    assert!((k.cy - 360.0).abs() < 0.1, "cy {}", k.cy);
    assert_eq!(k.skew, 0.0);
    assert!((d.k1 + 0.2).abs() < 1e-3, "k1 {}", d.k1);
    assert!((d.k2 - 0.08).abs() < 5e-3, "k2 {}", d.k2);
    assert!((d.p1 - 0.001).abs() < 1e-4, "p1 {}", d.p1);
    assert_eq!(d.k3, 0.0);

    assert_eq!(result.poses.len(), 6);
    assert_eq!(result.per_view_rms.len(), 6);
    assert!(result.max_error < 1e-2);
    for (est, gt) in result.poses.iter().zip(poses()) {
        assert!((est.translation.vector - gt.translation.vector).norm() < 0.1);
        assert!(est.rotation.angle_to(&gt.rotation) < 1e-3);
    }
}

#[test]
fn noisy_views_stay_close_to_truth() {
    let mut session = session_with(0.3);
    let result = session.calibrate().expect("calibration");
    let k = result.camera.intrinsics;
    assert!(result.rms > 0.05 && result.rms < 0.5, "rms {}", result.rms);
    assert!((k.fx - 1000.0).abs() < 10.0, "fx {}", k.fx);
    assert!((k.cx - 640.0).abs() < 10.0, "cx {}", k.cx);
    assert!((k.cy - 360.0).abs() < 10.0, "cy {}", k.cy);
    assert!(result.max_error >= result.rms);
}

#[test]
fn prunes_the_corrupted_view() {
    let cam = truth();
    let mut rng = Lcg(11);
    let mut session =
        CalibrationSession::new(board(), cam.image_size, CalibrationOptions::default());
    let all = poses();
    let mut bad_id = None;
    for (k, pose) in all.iter().enumerate() {
        let noise = if k == 2 { 4.0 } else { 0.05 };
        let id = session
            .add_view(&detection(&cam, pose, noise, &mut rng))
            .expect("view accepted");
        if k == 2 {
            bad_id = Some(id);
        }
    }

    let first = session.calibrate().expect("calibration");
    let worst = first
        .per_view_rms
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .expect("views");
    assert_eq!(Some(first.view_ids[worst.0]), bad_id);

    let removed = session.prune_views(1.0);
    assert_eq!(removed, vec![bad_id.expect("bad view")]);
    assert_eq!(session.view_count(), 5);

    let second = session.calibrate().expect("recalibration");
    assert!(second.rms < first.rms);
    assert!(second.rms < 0.2, "rms {}", second.rms);
}

/// ChESS-like corners: pixel positions plus diagonal orientations pushed
/// through the projection.
fn chess_corners(cam: &CameraModel, pose: &Isometry3<f64>) -> Vec<Corner> {
    let b = board();
    let mut out = Vec::new();
    for j in 0..ROWS as i32 {
        for i in 0..COLS as i32 {
            let g = GridCoords { i, j };
            let bp = b.board_point3(g);
            let p = cam.project_from(pose, &bp).expect("visible");
            let diag = if (i + j) % 2 == 0 {
                Vector3::new(1.0, 1.0, 0.0)
            } else {
                Vector3::new(-1.0, 1.0, 0.0)
            };
            let q = cam
                .project_from(pose, &(bp + diag * 0.5))
                .expect("visible");
            let orientation = (q.y - p.y).atan2(q.x - p.x).rem_euclid(std::f64::consts::PI);
            out.push(Corner {
                position: Point2::new(p.x as f32, p.y as f32),
                orientation: orientation as f32,
                strength: 1.0,
            });
        }
    }
    out
}

#[test]
fn calibrates_from_detector_output() {
    let cam = truth();
    let detector = ChessboardDetector::new(ChessboardParams::for_board(ROWS, COLS));
    let mut session =
        CalibrationSession::new(board(), cam.image_size, CalibrationOptions::default());

    for pose in poses() {
        let det = detector
            .detect_from_corners(&chess_corners(&cam, &pose))
            .expect("board detected");
        assert_eq!(det.detection.corners.len(), (ROWS * COLS) as usize);
        session.add_view(&det.detection).expect("view accepted");
    }

    let result = session.calibrate().expect("calibration");
    assert!(result.rms < 1e-3, "rms {}", result.rms);
    assert!((result.camera.intrinsics.fx - 1000.0).abs() < 0.1);
}

#[test]
fn pose_of_calibrated_camera() {
    let mut session = session_with(0.0);
    let result = session.calibrate().expect("calibration");
    let estimator = PoseEstimator::new(result.camera).expect("camera");

    let gt = facing_pose(Vector3::new(0.4, -0.1, 0.05), 700.0);
    let det = detection(&truth(), &gt, 0.0, &mut Lcg(3));
    let pose = estimator
        .estimate_from_detection(&det, &board())
        .expect("pose");

    assert!((pose.world_to_camera.translation.vector - gt.translation.vector).norm() < 0.1);
    let expected_tilt = (gt.rotation * Vector3::z()).z.abs().acos().to_degrees();
    assert!((pose.tilt_deg - expected_tilt).abs() < 0.01);

    // The board centre sits on the optical axis at 700 mm.
    let [w, h] = board().extent();
    let centre_px = estimator
        .world_to_pixel(&pose, &Point3::new(w * 0.5, h * 0.5, 0.0))
        .expect("visible");
    let back = estimator.pixel_to_world(&pose, centre_px).expect("on plane");
    assert!((back - Point2::new(w * 0.5, h * 0.5)).norm() < 1e-3);
    let cam_centre = pose.camera_position_world;
    let to_centre = Point3::new(w * 0.5, h * 0.5, 0.0) - cam_centre;
    assert!((to_centre.norm() - 700.0).abs() < 0.1);
}
