//! Navigation system orchestration.
//!
//! This module contains the top-level `NavSystem` that drives the control
//! path and coordinates the map fetch and estimation workers, along with its
//! configuration and the shared runtime-adjustable state.

pub mod config;
mod navigator;
pub mod shared_state;

pub use config::{ExecutionKind, NavConfig};
pub use navigator::{FrameDisposition, NavStats, NavSystem, SkipReason};
pub use shared_state::SharedState;
