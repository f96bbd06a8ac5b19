pub mod multiple_shooting;
pub mod step;
pub mod types;

pub use multiple_shooting::MultipleShootingContinuation;
pub use step::{PreparedStep, StepWorkspace};
pub use types::{ContinuationSettings, Dimensions};
