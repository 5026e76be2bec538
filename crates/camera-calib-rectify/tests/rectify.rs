//! Rectification of rendered checkerboard scenes.

use camera_calib_core::{BrownConrady, CameraIntrinsics, CameraModel, GrayImage};
use camera_calib_rectify::{RectificationMode, Rectifier, RectifyOptions, WorldRect};
use nalgebra::{Isometry3, Point2, Point3, Vector3};

const SQUARE: f64 = 20.0;
const SQUARES: i64 = 8;

fn camera() -> CameraModel {
    CameraModel::new(
        CameraIntrinsics::new(500.0, 500.0, 319.5, 239.5),
        BrownConrady {
            k1: -0.15,
            k2: 0.02,
            ..BrownConrady::default()
        },
        [640, 480],
    )
}

/// Board centred under the camera, tilted about X.
fn tilted_pose() -> Isometry3<f64> {
    let rot = Vector3::new(0.45, 0.0, 0.0);
    let half = SQUARE * SQUARES as f64 * 0.5;
    let iso = Isometry3::new(Vector3::zeros(), rot);
    let centre = iso * Point3::new(half, half, 0.0);
    Isometry3::new(Vector3::new(0.0, 0.0, 400.0) - centre.coords, rot)
}

fn board_value(w: Point2<f64>) -> u8 {
    let (i, j) = ((w.x / SQUARE).floor() as i64, (w.y / SQUARE).floor() as i64);
    if !(0..SQUARES).contains(&i) || !(0..SQUARES).contains(&j) {
        return 128;
    }
    if (i + j) % 2 == 0 {
        230
    } else {
        20
    }
}

/// Ray-traced image of the board seen through the distorted camera.
fn render(cam: &CameraModel, pose: &Isometry3<f64>) -> GrayImage {
    let (w, h) = (cam.width() as usize, cam.height() as usize);
    let mut img = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let p = Point2::new(x as f64, y as f64);
            img.data[y * w + x] = cam.pixel_to_plane(pose, p).map_or(128, board_value);
        }
    }
    img
}

fn square_centres() -> impl Iterator<Item = (Point2<f64>, u8)> {
    (0..SQUARES).flat_map(|j| {
        (0..SQUARES).map(move |i| {
            let c = Point2::new((i as f64 + 0.5) * SQUARE, (j as f64 + 0.5) * SQUARE);
            (c, board_value(c))
        })
    })
}

#[test]
fn untilt_recovers_square_board() {
    let cam = camera();
    let pose = tilted_pose();
    let frame = render(&cam, &pose);

    let r = Rectifier::new(cam, RectificationMode::Untilt, Some(pose), &RectifyOptions::default())
        .expect("rectifier");
    let out = r.apply(&frame.view());
    assert_eq!([out.width as u32, out.height as u32], r.output_size());

    for (centre, expected) in square_centres() {
        let p = r.world_to_rect(centre).expect("plane mode");
        let (x, y) = (p.x.round() as usize, p.y.round() as usize);
        assert!(x < out.width && y < out.height, "square {centre} outside output");
        let got = out.data[y * out.width + x];
        assert!(
            (got as i32 - expected as i32).abs() < 40,
            "square at {centre}: got {got}, expected {expected}"
        );
    }

    // Squares come out square: both board axes span the same pixel length.
    let o = r.world_to_rect(Point2::origin()).expect("rect");
    let side = SQUARE * SQUARES as f64;
    let ex = r.world_to_rect(Point2::new(side, 0.0)).expect("rect") - o;
    let ey = r.world_to_rect(Point2::new(0.0, side)).expect("rect") - o;
    assert!((ex.norm() - ey.norm()).abs() < 1e-9);
    assert!(ex.y.abs() < 1e-9 && ey.x.abs() < 1e-9);
}

#[test]
fn align_resamples_the_requested_rectangle() {
    let cam = camera();
    let pose = tilted_pose();
    let frame = render(&cam, &pose);
    let opts = RectifyOptions {
        rect: Some(WorldRect::new(0.0, 0.0, SQUARE * 8.0, SQUARE * 8.0)),
        scale: Some(0.5),
        ..RectifyOptions::default()
    };
    let r = Rectifier::new(cam, RectificationMode::Align, Some(pose), &opts).expect("rectifier");
    assert_eq!(r.output_size(), [320, 320]);

    let out = r.apply(&frame.view());
    for (centre, expected) in square_centres() {
        let p = r.world_to_rect(centre).expect("rect");
        let got = out.data[p.y as usize * out.width + p.x as usize];
        assert!((got as i32 - expected as i32).abs() < 40, "square at {centre}");
    }
}

#[test]
fn undistort_straightens_projected_lines() {
    let cam = camera();
    let pose = tilted_pose();
    let r = Rectifier::new(cam, RectificationMode::Undistort, None, &RectifyOptions::default())
        .expect("rectifier");
    let pinhole = CameraModel::new(cam.intrinsics, BrownConrady::default(), cam.image_size);

    // Distorted observations land on the ideal pinhole projection.
    for k in 0..=8 {
        let w = Point3::new(k as f64 * SQUARE, 0.0, 0.0);
        let observed = cam.project_from(&pose, &w).expect("visible");
        let ideal = pinhole.project_from(&pose, &w).expect("visible");
        let rect = r.img_to_rect(observed).expect("undistort");
        assert!((rect - ideal).norm() < 1e-4, "point {k}: {rect} vs {ideal}");
        let src = r.rect_to_img(ideal).expect("source");
        assert!((src - observed).norm() < 1e-9);
    }
}
