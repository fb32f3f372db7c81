//! Out-of-process estimation against the real `visnav worker` binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::GrayImage;
use nalgebra::Vector3;

use visnav::error::NavError;
use visnav::estimation::worker::HandleState;
use visnav::estimation::{EstimationTask, EstimatorSpec, ExecutionStrategy, ImagePair, ProcessExecutor};
use visnav::geometry::frames::{camera_attitude, pose_from_attitude, rotation_body_downward_cam};
use visnav::geometry::{CameraIntrinsics, GeoPoint};
use visnav::map::{GeoBBox, GeoRaster, MapRequest};
use visnav::telemetry::CameraFrame;
use visnav::output::{ChannelSink, Estimate};
use visnav::sim::{SimFlight, SyntheticMapService, SyntheticWorld};
use visnav::system::{ExecutionKind, FrameDisposition, NavConfig, NavSystem};

fn worker_program() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_visnav"))
}

fn world() -> Arc<SyntheticWorld> {
    Arc::new(SyntheticWorld::new(GeoPoint::new(61.5, 23.8), 110.0, 42))
}

fn wait(strategy_name: &str, handle: &visnav::estimation::worker::EstimationHandle) -> HandleState {
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        match handle.try_take() {
            HandleState::Pending => {
                assert!(Instant::now() < deadline, "worker '{}' never answered", strategy_name);
                std::thread::sleep(Duration::from_millis(5));
            }
            other => return other,
        }
    }
}

#[test]
fn test_child_process_estimates_pose() {
    let world = world();
    let flight = SimFlight::new(Arc::clone(&world));
    let truth = flight.position_at(1.0);
    let r_ned_cam = camera_attitude(&flight.vehicle_attitude(), &rotation_body_downward_cam());
    let frame = flight.frame_at(1.0, &r_ned_cam);

    let request = MapRequest {
        bbox: GeoBBox::around(&truth.point, 180.0),
        width_px: 512,
        height_px: 512,
        resolution_m: 360.0 / 512.0,
        timestamp: 0.0,
    };
    let raster = Arc::new(world.render_raster(&request).unwrap());
    let gsd = raster.gsd();
    let px = raster.geo_to_pixel(&truth.point);
    let center = Vector3::new(px.x, px.y, -truth.altitude_agl / gsd);
    let prior = pose_from_attitude(&r_ned_cam, &(center + Vector3::new(3.0 / gsd, 0.0, 0.0)));

    let mut executor = ProcessExecutor::spawn(&worker_program(), &EstimatorSpec::new("patch_keypoint")).unwrap();
    assert_eq!(executor.backend(), "patch_keypoint");

    let pair = ImagePair::new(frame, Arc::clone(&raster));
    let handle = executor
        .submit(EstimationTask {
            id: 7,
            pair: pair.clone(),
            prior: Some(prior),
        })
        .unwrap();
    let HandleState::Ready(result) = wait("patch_keypoint", &handle) else {
        panic!("worker lost the task");
    };
    assert_eq!(result.task_id, 7);
    assert_eq!(result.timestamp, 1.0);
    let pose = result.pose.expect("no pose for textured imagery");
    let error_m = (pose.camera_center() - center).xy().norm() * gsd;
    assert!(error_m < 3.0, "horizontal error {:.2} m", error_m);

    executor.shutdown();
    assert!(matches!(
        executor.submit(EstimationTask {
            id: 8,
            pair,
            prior: None,
        }),
        Err(NavError::Worker(_))
    ));
}

#[test]
fn test_child_process_rejects_unknown_backend() {
    let err = ProcessExecutor::spawn(&worker_program(), &EstimatorSpec::new("no_such_backend"));
    assert!(matches!(err, Err(NavError::EstimatorConstruction { .. })));
}

#[test]
fn test_navigation_with_out_of_process_estimator() {
    let world = world();
    let flight = SimFlight::new(Arc::clone(&world));
    let r_ned_cam = camera_attitude(&flight.vehicle_attitude(), &rotation_body_downward_cam());

    let mut config = NavConfig::default();
    config.estimation.execution = ExecutionKind::OutOfProcess;
    config.estimation.worker_program = Some(worker_program());
    let (tx, rx) = crossbeam_channel::bounded(1024);
    let mut nav = NavSystem::new(
        config,
        Arc::new(SyntheticMapService::new(Arc::clone(&world))),
        Box::new(ChannelSink::new(tx)),
    )
    .unwrap();
    assert_eq!(nav.backend(), "patch_keypoint");

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut t = 0.0;
    let record = loop {
        assert!(Instant::now() < deadline, "no confident estimate");
        nav.on_telemetry(&flight.telemetry_at(t));
        if let FrameDisposition::Skipped(reason) = nav.on_frame(flight.frame_at(t, &r_ned_cam)) {
            assert!(t < 5.0, "frames still skipped at {}: {:?}", t, reason);
        }
        std::thread::sleep(Duration::from_millis(20));
        if let Estimate::Confident(record) = nav.tick(t) {
            break record;
        }
        t += 0.1;
    };

    let truth = flight.position_at(t);
    let plane = world.plane();
    let error = plane.to_enu(&GeoPoint::new(record.lat, record.lon), 0.0) - plane.to_enu(&truth.point, 0.0);
    assert!(error.xy().norm() < 10.0, "horizontal error {:?}", error);
    assert!((record.altitude_agl - 120.0).abs() < 10.0);
    assert!(rx.try_iter().any(|e| e.is_confident()));

    // Swap to another out-of-process backend while running.
    nav.request_swap(EstimatorSpec::new("correlation"), ExecutionKind::OutOfProcess)
        .unwrap();
    assert_eq!(nav.backend(), "correlation");
    nav.shutdown();
}

#[test]
fn test_worker_program_must_exist() {
    let mut config = NavConfig::default();
    config.estimation.execution = ExecutionKind::OutOfProcess;
    config.estimation.worker_program = Some(Path::new("/nonexistent/visnav").to_path_buf());
    let result = NavSystem::new(
        config,
        Arc::new(SyntheticMapService::new(world())),
        Box::new(visnav::output::LoggingSink::default()),
    );
    assert!(matches!(result, Err(NavError::Worker(_))));
}

fn blank_task(id: u64, width: u32, height: u32) -> EstimationTask {
    let bbox = GeoBBox::around(&GeoPoint::new(61.5, 23.8), 50.0);
    let raster = GeoRaster::new(GrayImage::new(64, 64), bbox, 0.0).unwrap();
    let query = CameraFrame {
        image: GrayImage::new(width, height),
        intrinsics: CameraIntrinsics::from_hfov(1.0, width, height),
        timestamp: id as f64,
    };
    EstimationTask {
        id,
        pair: ImagePair::new(query, Arc::new(raster)),
        prior: None,
    }
}

#[test]
fn test_oversized_task_keeps_worker_running() {
    let mut executor = ProcessExecutor::spawn(&worker_program(), &EstimatorSpec::new("correlation")).unwrap();

    // 4200 x 4200 pixels do not fit in one frame.
    let handle = executor.submit(blank_task(1, 4200, 4200)).unwrap();
    let HandleState::Ready(result) = wait("correlation", &handle) else {
        panic!("oversized task was lost");
    };
    assert_eq!(result.task_id, 1);
    assert!(result.pose.is_none());
    assert!(executor.is_alive());

    let handle = executor.submit(blank_task(2, 64, 48)).unwrap();
    let HandleState::Ready(result) = wait("correlation", &handle) else {
        panic!("worker died after an oversized task");
    };
    assert_eq!(result.task_id, 2);
    assert_eq!(result.timestamp, 2.0);
    executor.shutdown();
    assert!(!executor.is_alive());
}
