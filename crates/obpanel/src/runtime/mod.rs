//! Runtime components for process supervision

pub mod dependency;
pub mod doctor;
pub mod health;
pub mod log_stream;
pub mod process;
pub mod state;
pub mod supervisor;

pub use dependency::*;
pub use doctor::{check_requirements, CheckResult};
pub use health::{HealthOutcome, HealthProbe};
pub use log_stream::*;
pub use process::*;
pub use state::*;
pub use supervisor::*;
