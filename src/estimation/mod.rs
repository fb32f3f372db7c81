//! Pose estimation: estimator backends, their registry and the worker pool
//! that runs them off the control path.

pub mod correlation;
pub mod estimator;
pub mod fix;
pub mod matching;
pub mod process;
pub mod registry;
pub mod wire;
pub mod worker;

pub use estimator::{ImagePair, KeypointMatcher, KeypointPoseEstimator, PoseEstimator};
pub use fix::CameraFix;
pub use registry::{EstimatorRegistry, EstimatorSpec};
pub use worker::{
    spawn_strategy, Completed, EstimationPool, EstimationResult, EstimationTask, ExecutionStrategy, SubmitOutcome,
    ThreadExecutor,
};
pub use process::ProcessExecutor;
