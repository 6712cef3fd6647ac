//! Runner configuration: environment first, command-line flags on top.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use sim_core::SimConfig;

/// Settings of one batch of trials.
#[derive(Clone, Debug, PartialEq)]
pub struct RunnerConfig {
    pub trials: usize,
    pub duration: Duration,
    pub seed: u64,
    pub targets: usize,
    pub log_dir: Option<PathBuf>,
    pub file_logging: bool,
}

impl RunnerConfig {
    pub const DEFAULT_TRIALS: usize = 1_000;
    pub const DEFAULT_DURATION: Duration = Duration::from_secs(300);
    pub const DEFAULT_SEED: u64 = 0x5eed;
    pub const DEFAULT_TARGETS: usize = 3;

    /// Construct configuration from process environment variables.
    ///
    /// Environment variables:
    /// - `SIM_TRIALS` - Number of independent runs (default: 1000)
    /// - `SIM_DURATION_SECS` - Simulated time per run (default: 300)
    /// - `SIM_SEED` - Base seed; trial seeds derive from it (default: 0x5eed)
    /// - `SIM_TARGETS` - Hostile targets in the scenario (default: 3)
    /// - `SIM_LOG_DIR` - Directory for the log file (default: platform cache dir)
    /// - `SIM_FILE_LOG` - Write a log file at all (default: true)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(trials) = read_env::<usize>("SIM_TRIALS") {
            config.trials = trials;
        }
        if let Some(secs) = read_env::<u64>("SIM_DURATION_SECS") {
            config.duration = Duration::from_secs(secs);
        }
        if let Some(seed) = read_env::<u64>("SIM_SEED") {
            config.seed = seed;
        }
        if let Some(targets) = read_env::<usize>("SIM_TARGETS") {
            config.targets = targets;
        }
        config.log_dir = env::var("SIM_LOG_DIR").ok().map(PathBuf::from);
        if let Some(enable) = read_env::<bool>("SIM_FILE_LOG") {
            config.file_logging = enable;
        }

        config.clamped()
    }

    /// Keeps the target count within what one cast can resolve against.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.targets = self.targets.clamp(1, SimConfig::MAX_TARGETS);
        self
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            trials: Self::DEFAULT_TRIALS,
            duration: Self::DEFAULT_DURATION,
            seed: Self::DEFAULT_SEED,
            targets: Self::DEFAULT_TARGETS,
            log_dir: None,
            file_logging: true,
        }
    }
}

/// Runs the demonstration scenario many times and prints a JSON summary.
#[derive(Debug, Parser)]
#[command(name = "sim-runner")]
#[command(about = "Monte Carlo runner for the combat effect engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Number of independent trials
    #[arg(long)]
    pub trials: Option<usize>,

    /// Simulated seconds per trial
    #[arg(long)]
    pub duration_secs: Option<u64>,

    /// Base seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Hostile targets in the scenario
    #[arg(long)]
    pub targets: Option<usize>,

    /// Directory for the log file
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Only log to stderr
    #[arg(long)]
    pub no_file_log: bool,
}

impl Cli {
    /// Overrides `config` with every flag that was given.
    pub fn apply(self, mut config: RunnerConfig) -> RunnerConfig {
        if let Some(trials) = self.trials {
            config.trials = trials;
        }
        if let Some(secs) = self.duration_secs {
            config.duration = Duration::from_secs(secs);
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(targets) = self.targets {
            config.targets = targets;
        }
        if self.log_dir.is_some() {
            config.log_dir = self.log_dir;
        }
        if self.no_file_log {
            config.file_logging = false;
        }
        config.clamped()
    }
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_only_what_they_name() {
        let cli = Cli::try_parse_from(["sim-runner", "--trials", "12", "--no-file-log"]).unwrap();
        let base = RunnerConfig {
            seed: 99,
            ..RunnerConfig::default()
        };
        let config = cli.apply(base);
        assert_eq!(config.trials, 12);
        assert_eq!(config.seed, 99);
        assert_eq!(config.duration, RunnerConfig::DEFAULT_DURATION);
        assert!(!config.file_logging);
    }

    #[test]
    fn target_count_is_clamped() {
        let cli = Cli::try_parse_from(["sim-runner", "--targets", "500"]).unwrap();
        assert_eq!(cli.apply(RunnerConfig::default()).targets, SimConfig::MAX_TARGETS);
        let cli = Cli::try_parse_from(["sim-runner", "--targets", "0"]).unwrap();
        assert_eq!(cli.apply(RunnerConfig::default()).targets, 1);
    }
}
