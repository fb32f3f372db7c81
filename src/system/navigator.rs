//! Navigation system: the control path.
//!
//! `NavSystem` is the top-level struct that users interact with. The caller's
//! thread feeds it telemetry and camera frames and calls [`NavSystem::tick`]
//! at the configured cadence. Map fetches and pose estimation run elsewhere;
//! the control path never blocks on them.
//!
//! Per tick:
//! 1. Evaluate the map refresh policy (install a finished fetch, maybe start one)
//! 2. Collect finished estimation tasks and convert poses to filter measurements
//! 3. Run one filter tick
//! 4. Assemble and publish the estimate

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::estimation::fix::CameraFix;
use crate::estimation::{
    spawn_strategy, Completed, EstimationPool, EstimatorRegistry, EstimatorSpec, ImagePair, SubmitOutcome,
};
use crate::filter::{FilterPhase, NavFilter, PoseMeasurement};
use crate::geometry::frames::pose_from_attitude;
use crate::geometry::{LocalTangentPlane, Pose};
use crate::map::{GeoRaster, GeoRasterCache, MapRefreshPolicy, MapService, RefreshOutcome};
use crate::output::{ClockSync, Estimate, OutputAssembler, PublicationSink};
use crate::telemetry::{CameraFrame, Telemetry, TelemetryTracker, VehicleState};

use super::config::{ExecutionKind, NavConfig};
use super::shared_state::SharedState;

/// Why a frame was not submitted for estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    NoVehicleState,
    NoMap,
    OffNadir { deg: f64 },
    LowAltitude { agl: f64 },
    WorkerUnavailable,
}

/// What happened to a camera frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameDisposition {
    Submitted(u64),
    /// The estimator was busy.
    Dropped,
    Skipped(SkipReason),
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavStats {
    pub frames_submitted: u64,
    pub frames_dropped: u64,
    pub frames_skipped: u64,
    pub hypotheses: u64,
    pub no_match: u64,
    pub ticks: u64,
    pub confident_ticks: u64,
    /// Dead estimators replaced by a fresh instance of the same backend.
    pub estimator_restarts: u64,
}

/// Vehicle state and reference raster at submission time.
struct FrameContext {
    vehicle: VehicleState,
    reference: Arc<GeoRaster>,
}

/// Map-matching navigation pipeline.
pub struct NavSystem {
    config: NavConfig,
    shared: Arc<SharedState>,
    registry: EstimatorRegistry,
    tracker: TelemetryTracker,
    cache: Arc<GeoRasterCache>,
    refresh: MapRefreshPolicy,
    pool: EstimationPool<FrameContext>,
    filter: NavFilter,
    assembler: OutputAssembler,
    clock: ClockSync,
    /// Tangent plane of the filter state, fixed at the first hypothesis.
    origin: Option<LocalTangentPlane>,
    ground_elevation: Option<f64>,
    sink: Box<dyn PublicationSink>,
    last_tick: Option<f64>,
    stats: NavStats,
}

impl NavSystem {
    /// Create the system with the built-in estimator backends.
    pub fn new(config: NavConfig, map_service: Arc<dyn MapService>, sink: Box<dyn PublicationSink>) -> Result<Self> {
        Self::with_registry(config, EstimatorRegistry::builtin(), map_service, sink)
    }

    /// Create the system with a custom estimator registry.
    ///
    /// Fails if the configuration is invalid or the initial estimator
    /// cannot be constructed.
    pub fn with_registry(
        config: NavConfig,
        registry: EstimatorRegistry,
        map_service: Arc<dyn MapService>,
        sink: Box<dyn PublicationSink>,
    ) -> Result<Self> {
        config.validate_with(&registry)?;
        let crs = config.crs()?;
        let shared = SharedState::new(config.map_update.overlap_threshold);
        let cache = GeoRasterCache::new();
        let refresh = MapRefreshPolicy::new(
            config.map_update.clone(),
            map_service,
            Arc::clone(&cache),
            Arc::clone(&shared),
        );
        let strategy = spawn_strategy(
            config.estimation.execution,
            &config.estimation.estimator,
            &registry,
            config.estimation.worker_program.as_deref(),
        )?;
        info!(
            "Navigation system ready: estimator '{}' ({:?}), cadence {:.1} Hz, output {}",
            strategy.backend(),
            config.estimation.execution,
            config.cadence_hz,
            crs
        );

        Ok(Self {
            filter: NavFilter::new(config.filter.clone()),
            assembler: OutputAssembler::new(crs),
            config,
            shared,
            registry,
            tracker: TelemetryTracker::default(),
            cache,
            refresh,
            pool: EstimationPool::new(strategy),
            clock: ClockSync::default(),
            origin: None,
            ground_elevation: None,
            sink,
            last_tick: None,
            stats: NavStats::default(),
        })
    }

    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn cache(&self) -> &Arc<GeoRasterCache> {
        &self.cache
    }

    pub fn vehicle_state(&self) -> Option<&VehicleState> {
        self.tracker.state()
    }

    pub fn filter_phase(&self) -> FilterPhase {
        self.filter.phase()
    }

    /// Backend of the active estimator.
    pub fn backend(&self) -> &str {
        self.pool.backend()
    }

    pub fn map_requests(&self) -> u64 {
        self.refresh.requests_issued()
    }

    pub fn stats(&self) -> NavStats {
        self.stats
    }

    /// Adjust the overlap threshold at runtime. Values outside `(0, 1]` are
    /// rejected.
    pub fn set_overlap_threshold(&self, value: f64) -> bool {
        self.shared.set_overlap_threshold(value)
    }

    /// Ingest a telemetry update.
    pub fn on_telemetry(&mut self, telemetry: &Telemetry) {
        if let Some(reference) = telemetry.reference_time {
            self.clock.observe(telemetry.timestamp, reference);
        }
        if let Some(state) = self.tracker.update(telemetry) {
            self.ground_elevation = Some(state.position.ground_elevation());
        }
    }

    /// Offer a camera frame for estimation against the current raster.
    pub fn on_frame(&mut self, frame: CameraFrame) -> FrameDisposition {
        match self.prepare(&frame) {
            Ok((vehicle, reference, prior)) => {
                if !self.pool.is_alive() && !self.shared.is_shutdown_requested() {
                    self.restart_estimator();
                }
                let pair = ImagePair::new(frame, Arc::clone(&reference));
                match self.pool.try_submit(pair, Some(prior), FrameContext { vehicle, reference }) {
                    Ok(SubmitOutcome::Submitted(id)) => {
                        self.stats.frames_submitted += 1;
                        FrameDisposition::Submitted(id)
                    }
                    Ok(SubmitOutcome::Dropped) => {
                        self.stats.frames_dropped += 1;
                        FrameDisposition::Dropped
                    }
                    Err(e) => {
                        warn!("Estimation submit failed: {}", e);
                        self.stats.frames_skipped += 1;
                        FrameDisposition::Skipped(SkipReason::WorkerUnavailable)
                    }
                }
            }
            Err(reason) => {
                debug!("Skipping frame at {:.3}: {:?}", frame.timestamp, reason);
                self.stats.frames_skipped += 1;
                FrameDisposition::Skipped(reason)
            }
        }
    }

    /// Gate a frame and build its prior pose in the raster frame.
    fn prepare(&self, frame: &CameraFrame) -> std::result::Result<(VehicleState, Arc<GeoRaster>, Pose), SkipReason> {
        let vehicle = self.tracker.state().ok_or(SkipReason::NoVehicleState)?;
        let reference = self.cache.get().ok_or(SkipReason::NoMap)?;

        let off_nadir = vehicle.off_nadir_deg();
        if off_nadir > self.config.estimation.max_off_nadir_deg {
            return Err(SkipReason::OffNadir { deg: off_nadir });
        }
        let agl = vehicle.position.altitude_agl;
        if agl < self.config.estimation.min_match_altitude_m {
            return Err(SkipReason::LowAltitude { agl });
        }

        let px = reference.geo_to_pixel(&vehicle.position.point);
        let center = nalgebra::Vector3::new(px.x, px.y, -agl / reference.gsd());
        let prior = pose_from_attitude(&vehicle.camera_attitude, &center);
        debug!(
            "Frame {:.3}: prior camera centre ({:.1}, {:.1}, {:.1}) px",
            frame.timestamp, center.x, center.y, center.z
        );
        Ok((vehicle.clone(), reference, prior))
    }

    /// One cadence tick at local time `now`. Publishes and returns the
    /// estimate.
    pub fn tick(&mut self, now: f64) -> Estimate {
        let now = match self.last_tick {
            Some(last) if now < last => {
                warn!("Tick time went backwards ({:.3} < {:.3}), holding", now, last);
                last
            }
            _ => now,
        };
        self.last_tick = Some(now);
        self.stats.ticks += 1;

        match self.refresh.evaluate(self.tracker.state(), now) {
            RefreshOutcome::Installed { generation } => debug!("Map generation {} in use", generation),
            RefreshOutcome::FetchFailed => debug!("Keeping previous map after failed fetch"),
            _ => {}
        }

        let measurements: Vec<PoseMeasurement> = self
            .pool
            .poll()
            .into_iter()
            .filter_map(|completed| self.to_measurement(completed))
            .collect();

        let outcome = self.filter.tick(now, &measurements);
        if outcome.diverged {
            warn!("Filter diverged, publishing no confident estimate until reseeded");
        }

        let estimate = match (outcome.snapshot, self.origin.as_ref()) {
            (Some(snapshot), Some(origin)) => {
                let ground = self.ground_elevation.unwrap_or_else(|| origin.origin_alt());
                self.stats.confident_ticks += 1;
                Estimate::Confident(self.assembler.assemble(&snapshot, origin, ground, &self.clock))
            }
            _ => Estimate::NoConfidentEstimate,
        };
        self.sink.publish(&estimate);
        estimate
    }

    fn to_measurement(&mut self, completed: Completed<FrameContext>) -> Option<PoseMeasurement> {
        let Completed { result, context } = completed;
        let Some(pose) = result.pose else {
            self.stats.no_match += 1;
            debug!("No match for frame {:.3} ({})", result.timestamp, result.backend);
            return None;
        };
        self.stats.hypotheses += 1;

        let ground = context.vehicle.position.ground_elevation();
        let fix = CameraFix::from_pose(&pose, &context.reference, ground, result.timestamp)?;
        let origin = *self.origin.get_or_insert_with(|| {
            info!("Local frame origin at {:.7}, {:.7}", fix.position.lat, fix.position.lon);
            LocalTangentPlane::new(fix.position, ground)
        });
        debug!(
            "Hypothesis {} from '{}': {:.7}, {:.7}, agl {:.1} m",
            result.task_id, result.backend, fix.position.lat, fix.position.lon, fix.altitude_agl
        );
        Some(PoseMeasurement {
            timestamp: fix.timestamp,
            position_enu: origin.to_enu(&fix.position, fix.altitude_amsl),
            attitude: fix.attitude,
        })
    }

    /// Rebuild the active estimator from its spec after its thread or
    /// process died. On failure the dead one stays and the next frame
    /// tries again.
    fn restart_estimator(&mut self) {
        let estimation = &self.config.estimation;
        warn!("Estimator '{}' died, restarting", estimation.estimator.backend);
        match spawn_strategy(
            estimation.execution,
            &estimation.estimator,
            &self.registry,
            estimation.worker_program.as_deref(),
        ) {
            Ok(strategy) => {
                self.pool.swap(strategy);
                self.stats.estimator_restarts += 1;
            }
            Err(e) => warn!("Estimator restart failed: {}", e),
        }
    }

    /// Replace the active estimator.
    ///
    /// The new estimator is constructed first; on failure the error is
    /// returned and the current estimator keeps running. A task in flight
    /// on the old estimator still completes and is fused.
    pub fn request_swap(&mut self, spec: EstimatorSpec, kind: ExecutionKind) -> Result<()> {
        let strategy = spawn_strategy(kind, &spec, &self.registry, self.config.estimation.worker_program.as_deref())
            .map_err(|e| {
                warn!("Estimator swap to '{}' rejected: {}", spec.backend, e);
                e
            })?;
        self.pool.swap(strategy);
        self.config.estimation.estimator = spec;
        self.config.estimation.execution = kind;
        self.filter.reinitialize();
        Ok(())
    }

    /// Stop estimation workers. Tasks in flight are discarded.
    pub fn shutdown(&mut self) {
        if self.shared.is_shutdown_requested() {
            return;
        }
        self.shared.request_shutdown();
        self.pool.shutdown();
        info!(
            "Navigation system stopped after {} ticks ({} confident)",
            self.stats.ticks, self.stats.confident_ticks
        );
    }
}

impl Drop for NavSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NavError;
    use crate::estimation::PoseEstimator;
    use crate::geometry::{CameraIntrinsics, GeoPoint, GeoPosition};
    use crate::map::{GeoBBox, MapRequest};
    use crate::output::ChannelSink;
    use crossbeam_channel::{bounded, Receiver};
    use image::GrayImage;
    use nalgebra::{UnitQuaternion, Vector3};
    use parking_lot::{Condvar, Mutex};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    const ORIGIN: GeoPoint = GeoPoint { lat: 47.0, lon: 8.0 };

    struct BlankService;

    impl MapService for BlankService {
        fn fetch(&self, request: &MapRequest) -> Result<GeoRaster> {
            GeoRaster::new(
                GrayImage::new(request.width_px, request.height_px),
                request.bbox,
                request.timestamp,
            )
        }
    }

    static GATE: Mutex<bool> = parking_lot::const_mutex(false);
    static GATE_COND: Condvar = Condvar::new();

    /// Returns the prior unchanged, after waiting for [`GATE`].
    struct GatedPrior;

    impl PoseEstimator for GatedPrior {
        fn name(&self) -> &str {
            "gated_prior"
        }

        fn estimate(&mut self, _pair: &ImagePair, prior: Option<&Pose>) -> Option<Pose> {
            let mut open = GATE.lock();
            while !*open {
                GATE_COND.wait(&mut open);
            }
            prior.cloned()
        }
    }

    /// Returns the prior shifted 10 reference pixels east.
    struct ShiftedPrior;

    impl PoseEstimator for ShiftedPrior {
        fn name(&self) -> &str {
            "shifted_prior"
        }

        fn estimate(&mut self, _pair: &ImagePair, prior: Option<&Pose>) -> Option<Pose> {
            let prior = prior?;
            Some(Pose::from_camera_center(
                prior.rotation,
                &(prior.camera_center() + Vector3::new(10.0, 0.0, 0.0)),
            ))
        }
    }

    static CRASHED: AtomicBool = AtomicBool::new(false);

    /// Panics on its first task across all instances, then returns the prior.
    struct CrashOnce;

    impl PoseEstimator for CrashOnce {
        fn name(&self) -> &str {
            "crash_once"
        }

        fn estimate(&mut self, _pair: &ImagePair, prior: Option<&Pose>) -> Option<Pose> {
            if !CRASHED.swap(true, Ordering::SeqCst) {
                panic!("estimator crashed");
            }
            prior.cloned()
        }
    }

    fn registry() -> EstimatorRegistry {
        fn gated(_: &EstimatorSpec) -> Result<Box<dyn PoseEstimator>> {
            Ok(Box::new(GatedPrior))
        }
        fn shifted(_: &EstimatorSpec) -> Result<Box<dyn PoseEstimator>> {
            Ok(Box::new(ShiftedPrior))
        }
        fn crash_once(_: &EstimatorSpec) -> Result<Box<dyn PoseEstimator>> {
            Ok(Box::new(CrashOnce))
        }
        let mut registry = EstimatorRegistry::builtin();
        registry.register("gated_prior", gated);
        registry.register("shifted_prior", shifted);
        registry.register("crash_once", crash_once);
        registry
    }

    fn system(backend: &str) -> (NavSystem, Receiver<Estimate>) {
        let mut config = NavConfig::default();
        config.estimation.estimator = EstimatorSpec::new(backend);
        let (tx, rx) = bounded(64);
        let nav = NavSystem::with_registry(config, registry(), Arc::new(BlankService), Box::new(ChannelSink::new(tx)))
            .unwrap();
        (nav, rx)
    }

    fn telemetry(t: f64) -> Telemetry {
        Telemetry {
            timestamp: t,
            position: Some(GeoPosition {
                point: ORIGIN,
                altitude_amsl: 600.0,
                altitude_agl: 150.0,
            }),
            vehicle_attitude: Some(UnitQuaternion::identity()),
            camera_attitude: None,
            camera: Some(CameraIntrinsics::from_hfov(1.0, 64, 48)),
            reference_time: Some(1_700_000_000.0 + t),
        }
    }

    fn frame(t: f64) -> CameraFrame {
        CameraFrame {
            image: GrayImage::new(64, 48),
            intrinsics: CameraIntrinsics::from_hfov(1.0, 64, 48),
            timestamp: t,
        }
    }

    /// Tick until the map from the cold-start fetch is installed.
    fn warm_up(nav: &mut NavSystem) -> f64 {
        nav.on_telemetry(&telemetry(0.0));
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut t = 0.0;
        while nav.cache().is_empty() {
            assert!(Instant::now() < deadline, "map never installed");
            t += 0.1;
            nav.tick(t);
            std::thread::sleep(Duration::from_millis(2));
        }
        t
    }

    fn tick_until_confident(nav: &mut NavSystem, mut t: f64) -> (f64, crate::output::OutputRecord) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            assert!(Instant::now() < deadline, "no confident estimate");
            t += 0.1;
            if let Estimate::Confident(record) = nav.tick(t) {
                return (t, record);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_frames_skipped_without_inputs() {
        let (mut nav, _rx) = system("shifted_prior");
        assert_eq!(nav.on_frame(frame(0.0)), FrameDisposition::Skipped(SkipReason::NoVehicleState));

        nav.on_telemetry(&telemetry(0.0));
        assert_eq!(nav.on_frame(frame(0.0)), FrameDisposition::Skipped(SkipReason::NoMap));
        assert_eq!(nav.tick(0.1), Estimate::NoConfidentEstimate);
    }

    #[test]
    fn test_gating_off_nadir_and_low_altitude() {
        let (mut nav, _rx) = system("shifted_prior");
        let t = warm_up(&mut nav);

        let mut tilted = telemetry(t);
        tilted.vehicle_attitude = Some(UnitQuaternion::from_euler_angles(0.3, 0.0, 0.0));
        nav.on_telemetry(&tilted);
        assert!(matches!(
            nav.on_frame(frame(t)),
            FrameDisposition::Skipped(SkipReason::OffNadir { .. })
        ));

        let mut low = telemetry(t + 0.1);
        if let Some(p) = low.position.as_mut() {
            p.altitude_agl = 5.0;
        }
        nav.on_telemetry(&low);
        assert!(matches!(
            nav.on_frame(frame(t + 0.1)),
            FrameDisposition::Skipped(SkipReason::LowAltitude { .. })
        ));
    }

    #[test]
    fn test_pipeline_publishes_hypothesis() {
        let (mut nav, rx) = system("shifted_prior");
        let t = warm_up(&mut nav);
        assert_eq!(nav.map_requests(), 1);

        assert!(matches!(nav.on_frame(frame(t)), FrameDisposition::Submitted(_)));
        let (_, record) = tick_until_confident(&mut nav, t);

        // 10 reference pixels east of the vehicle.
        let raster = nav.cache().get().unwrap();
        let mut px = raster.geo_to_pixel(&ORIGIN);
        px.x += 10.0;
        let expected = raster.pixel_to_geo(&px);
        assert!((record.lon - expected.lon).abs() < 1e-9);
        assert!((record.lat - expected.lat).abs() < 1e-9);
        assert!(record.lon > ORIGIN.lon);
        assert!((record.altitude_agl - 150.0).abs() < 0.5);
        assert!(record.timestamp > 1_700_000_000.0);
        assert_eq!(nav.filter_phase(), FilterPhase::Initialized);
        assert!(rx.try_iter().any(|e| e.is_confident()));
    }

    #[test]
    fn test_swap_while_in_flight() {
        let (mut nav, _rx) = system("gated_prior");
        let t = warm_up(&mut nav);

        let first = nav.on_frame(frame(t));
        assert!(matches!(first, FrameDisposition::Submitted(_)));
        assert_eq!(nav.on_frame(frame(t + 0.05)), FrameDisposition::Dropped);

        nav.request_swap(EstimatorSpec::new("shifted_prior"), ExecutionKind::InProcess)
            .unwrap();
        assert_eq!(nav.backend(), "shifted_prior");

        // The old task is still pending; release it and it must be fused.
        *GATE.lock() = true;
        GATE_COND.notify_all();
        let (t, record) = tick_until_confident(&mut nav, t);
        assert!((record.lon - ORIGIN.lon).abs() < 1e-9, "old estimator result");
        assert_eq!(nav.stats().hypotheses, 1);

        // New submissions go to the new estimator.
        assert!(matches!(nav.on_frame(frame(t)), FrameDisposition::Submitted(_)));
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut t = t;
        while nav.stats().hypotheses < 2 {
            assert!(Instant::now() < deadline);
            t += 0.1;
            nav.tick(t);
            std::thread::sleep(Duration::from_millis(2));
        }
        let record = nav.tick(t + 0.1).record().cloned().unwrap();
        assert!(record.lon > ORIGIN.lon);
    }

    #[test]
    fn test_failed_swap_keeps_estimator() {
        let (mut nav, _rx) = system("shifted_prior");
        let err = nav.request_swap(EstimatorSpec::new("no_such_backend"), ExecutionKind::InProcess);
        assert!(matches!(err, Err(NavError::EstimatorConstruction { .. })));
        assert_eq!(nav.backend(), "shifted_prior");
    }

    #[test]
    fn test_overlap_threshold_runtime_update() {
        let (nav, _rx) = system("shifted_prior");
        assert!(nav.set_overlap_threshold(0.8));
        assert!(!nav.set_overlap_threshold(1.5));
        assert_eq!(nav.shared_state().overlap_threshold(), 0.8);
    }

    #[test]
    fn test_unknown_initial_backend_fails() {
        let mut config = NavConfig::default();
        config.estimation.estimator = EstimatorSpec::new("missing");
        let result = NavSystem::new(
            config,
            Arc::new(BlankService),
            Box::new(crate::output::LoggingSink::default()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_cold_start_map_matches_altitude() {
        let (mut nav, _rx) = system("shifted_prior");
        warm_up(&mut nav);
        let raster = nav.cache().get().unwrap();
        let bbox: GeoBBox = raster.bbox;
        assert!(bbox.contains(&ORIGIN));

        // radius = 1.5 · hfov · agl, 512 px across.
        let expected = 2.0 * 1.5 * 1.0 * 150.0 / 512.0;
        assert!((raster.gsd() - expected).abs() / expected < 0.01, "{} vs {}", raster.gsd(), expected);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut broken = Vec::new();
        let mut config = NavConfig::default();
        config.map_update.overlap_threshold = 1.5;
        broken.push(config);
        let mut config = NavConfig::default();
        config.cadence_hz = 0.0;
        broken.push(config);
        let mut config = NavConfig::default();
        config.filter.divergence_std_m = -1.0;
        broken.push(config);

        for config in broken {
            let result = NavSystem::with_registry(
                config,
                registry(),
                Arc::new(BlankService),
                Box::new(crate::output::LoggingSink::default()),
            );
            assert!(matches!(result, Err(NavError::Config(_))));
        }
    }

    #[test]
    fn test_custom_backend_passes_validation() {
        let (nav, _rx) = system("gated_prior");
        assert_eq!(nav.backend(), "gated_prior");
    }

    #[test]
    fn test_dead_estimator_is_restarted() {
        let (mut nav, _rx) = system("crash_once");
        let mut t = warm_up(&mut nav);
        assert!(matches!(nav.on_frame(frame(t)), FrameDisposition::Submitted(_)));

        let deadline = Instant::now() + Duration::from_secs(5);
        while nav.pool.is_busy() || nav.pool.is_alive() {
            assert!(Instant::now() < deadline, "crash never observed");
            t += 0.1;
            nav.tick(t);
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(nav.stats().hypotheses, 0);

        assert!(matches!(nav.on_frame(frame(t)), FrameDisposition::Submitted(_)));
        assert_eq!(nav.stats().estimator_restarts, 1);
        assert_eq!(nav.backend(), "crash_once");
        let (_, record) = tick_until_confident(&mut nav, t);
        assert!((record.lon - ORIGIN.lon).abs() < 1e-9);
    }

    /// Drive the full pipeline on a fixed schedule. Frames are waited for
    /// at a frozen tick time so thread timing never changes the inputs.
    fn replay() -> Vec<Estimate> {
        let (mut nav, _rx) = system("shifted_prior");
        nav.on_telemetry(&telemetry(0.0));
        let deadline = Instant::now() + Duration::from_secs(5);
        while nav.cache().is_empty() {
            assert!(Instant::now() < deadline, "map never installed");
            nav.tick(0.0);
            std::thread::sleep(Duration::from_millis(2));
        }

        let mut published = Vec::new();
        for i in 1..=30 {
            let t = i as f64 * 0.1;
            nav.on_telemetry(&telemetry(t));
            if i % 3 != 1 {
                published.push(nav.tick(t));
                continue;
            }
            let fused = nav.stats().hypotheses;
            assert!(matches!(nav.on_frame(frame(t)), FrameDisposition::Submitted(_)));
            let deadline = Instant::now() + Duration::from_secs(5);
            let estimate = loop {
                let estimate = nav.tick(t);
                if nav.stats().hypotheses > fused {
                    break estimate;
                }
                assert!(Instant::now() < deadline, "no hypothesis at {}", t);
                std::thread::sleep(Duration::from_millis(1));
            };
            published.push(estimate);
        }
        published
    }

    #[test]
    fn test_replay_publishes_identical_records() {
        let first = replay();
        assert!(first.iter().filter(|e| e.is_confident()).count() >= 25);
        assert_eq!(first, replay());
    }
}
