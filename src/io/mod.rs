pub mod telemetry_log;

pub use telemetry_log::{TelemetryLog, TelemetryRecord};
