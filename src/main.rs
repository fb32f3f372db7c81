use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use visnav::estimation::process::run_worker;
use visnav::estimation::EstimatorRegistry;
use visnav::geometry::frames::{camera_attitude, rotation_body_downward_cam};
use visnav::geometry::GeoPoint;
use visnav::io::TelemetryLog;
use visnav::output::{Estimate, LoggingSink};
use visnav::sim::{SimFlight, SyntheticMapService, SyntheticWorld};
use visnav::system::{FrameDisposition, NavConfig, NavSystem};
use visnav::telemetry::Telemetry;

const USAGE: &str = "usage: visnav [CONFIG.toml] [--telemetry LOG.csv] [--duration SECONDS]\n       visnav worker";

struct Args {
    config: Option<String>,
    telemetry: Option<String>,
    duration_s: f64,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args {
        config: None,
        telemetry: None,
        duration_s: 30.0,
    };
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--telemetry" => parsed.telemetry = Some(it.next().context(USAGE)?.clone()),
            "--duration" => {
                let value = it.next().context(USAGE)?;
                parsed.duration_s = value
                    .parse()
                    .with_context(|| format!("Invalid duration '{}'", value))?;
            }
            "-h" | "--help" => bail!(USAGE),
            other if !other.starts_with("--") && parsed.config.is_none() => parsed.config = Some(other.to_string()),
            other => bail!("Unexpected argument '{}'\n{}", other, USAGE),
        }
    }
    Ok(parsed)
}

fn main() -> Result<()> {
    // stdout carries the worker protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("visnav=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("worker") {
        let mut reader = BufReader::new(std::io::stdin().lock());
        let mut writer = BufWriter::new(std::io::stdout().lock());
        run_worker(&mut reader, &mut writer, &EstimatorRegistry::builtin())?;
        return Ok(());
    }

    let args = parse_args(&args)?;
    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path);
            NavConfig::load(Path::new(path)).with_context(|| format!("Failed to load {}", path))?
        }
        None => NavConfig::default(),
    };
    let log = args.telemetry.as_ref().map(TelemetryLog::load).transpose()?;
    run_flight(config, log.as_ref(), args.duration_s)
}

/// Fly over a synthetic world, either straight and level or along a
/// recorded telemetry log, and publish the navigation estimate every tick.
fn run_flight(config: NavConfig, log: Option<&TelemetryLog>, duration_s: f64) -> Result<()> {
    let (origin, ground_elevation) = match log.and_then(|l| l.records.first()) {
        Some(first) => (GeoPoint::new(first.lat, first.lon), first.altitude_amsl - first.altitude_agl),
        None => (GeoPoint::new(61.5, 23.8), 110.0),
    };
    let world = Arc::new(SyntheticWorld::new(origin, ground_elevation, 7));
    let flight = SimFlight::new(Arc::clone(&world));
    let service = Arc::new(SyntheticMapService::new(Arc::clone(&world)).with_latency(Duration::from_millis(50)));

    let interval = config.tick_interval();
    let sink = Box::new(LoggingSink::new(config.output.publish_gps));
    let mut system = NavSystem::new(config, service.clone(), sink)?;

    let (start, end) = match log.and_then(TelemetryLog::span) {
        Some((first, last)) => (first, last.min(first + duration_s)),
        None => (0.0, duration_s),
    };
    info!("Simulating {:.1} s of flight", end - start);

    let mut t = start;
    let mut confident = 0u64;
    let mut ticks = 0u64;
    while t <= end {
        let telemetry = match log {
            Some(log) => match log.at(t) {
                Some(record) => record.to_telemetry(&flight.camera),
                None => break,
            },
            None => flight.telemetry_at(t),
        };
        system.on_telemetry(&telemetry);
        if let Some(frame) = render(&world, &telemetry) {
            if let FrameDisposition::Skipped(reason) = system.on_frame(frame) {
                info!("Frame at {:.2} skipped: {:?}", t, reason);
            }
        }

        // Let the estimator and the map fetch make progress in real time.
        std::thread::sleep(Duration::from_secs_f64(interval));
        if let Estimate::Confident(_) = system.tick(t) {
            confident += 1;
        }
        ticks += 1;
        t += interval;
    }

    let stats = system.stats();
    system.shutdown();
    info!(
        "Done: {}/{} confident ticks, {} frames submitted, {} dropped, {} skipped, {} map fetches",
        confident,
        ticks,
        stats.frames_submitted,
        stats.frames_dropped,
        stats.frames_skipped,
        service.requests()
    );
    if confident == 0 {
        warn!("No confident estimate was produced");
    }
    Ok(())
}

fn render(world: &SyntheticWorld, telemetry: &Telemetry) -> Option<visnav::telemetry::CameraFrame> {
    let position = telemetry.position?;
    let camera = telemetry.camera?;
    let r_ned_cam = telemetry
        .camera_attitude
        .or_else(|| telemetry.vehicle_attitude.map(|v| camera_attitude(&v, &rotation_body_downward_cam())))?;
    Some(world.render_view(&position, &r_ned_cam, &camera, telemetry.timestamp))
}
