//! Monte Carlo harness for `sim-core`.
//!
//! [`scenario`] wires a small melee rotation onto a clock, [`trials`] runs it
//! many times in parallel and folds the reports into a [`TrialSummary`].
pub mod config;
pub mod logging;
pub mod scenario;
pub mod trials;

pub use config::{Cli, RunnerConfig};
pub use logging::setup_logging;
pub use scenario::Scenario;
pub use trials::{Distribution, TrialFailure, TrialSummary, run_trials, run_trials_with};
