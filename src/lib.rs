pub mod error;
pub mod estimation;
pub mod filter;
pub mod geometry;
pub mod io;
pub mod map;
pub mod output;
pub mod sim;
pub mod system;
pub mod telemetry;
