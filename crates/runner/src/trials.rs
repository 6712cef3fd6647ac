//! Parallel trial fan-out and aggregation.
//!
//! Trials share nothing: every rayon worker builds its own clock once and
//! resets it per trial. Trial `i` always runs with `trial_seed(base, i)`, and
//! results are folded in index order, so a summary depends only on the
//! configuration, never on the thread count.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use rayon::prelude::*;
use serde::Serialize;
use sim_core::{RunReport, SimError, SimulationClock, UnitId, trial_seed};
use tracing::{info, warn};

use crate::config::RunnerConfig;
use crate::scenario;

/// Failures kept verbatim in the summary; the rest are only counted.
const MAX_REPORTED_FAILURES: usize = 8;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Distribution {
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
}

impl Distribution {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let count = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / count;
        let variance = samples
            .iter()
            .map(|sample| (sample - mean).powi(2))
            .sum::<f64>()
            / count;
        Self {
            mean,
            stddev: variance.sqrt(),
            min: samples.iter().copied().fold(f64::INFINITY, f64::min),
            max: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrialFailure {
    pub index: u64,
    pub seed: u64,
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrialSummary {
    pub trials: usize,
    pub completed: usize,
    pub failed: usize,
    pub base_seed: u64,
    pub duration_secs: f64,
    pub dps: Distribution,
    /// Mean fraction of the run each aura label was up, across units.
    pub aura_uptime: BTreeMap<String, f64>,
    /// Mean procs per run, per watcher label.
    pub procs: BTreeMap<String, f64>,
    pub failures: Vec<TrialFailure>,
}

/// Runs the demonstration scenario.
pub fn run_trials(config: &RunnerConfig) -> Result<TrialSummary> {
    let targets = config.targets;
    run_trials_with(config, move |clock| {
        scenario::build(clock, targets).map(|scenario| scenario.player)
    })
}

/// Runs `config.trials` independent trials of whatever `build` registers.
///
/// `build` is called once per worker on a fresh clock and returns the unit
/// whose damage is measured. A failing trial is recorded and the others
/// carry on.
pub fn run_trials_with<B>(config: &RunnerConfig, build: B) -> Result<TrialSummary>
where
    B: Fn(&mut SimulationClock) -> Result<UnitId, SimError> + Sync + Send,
{
    if config.trials == 0 {
        bail!("at least one trial is required");
    }
    info!(
        trials = config.trials,
        duration = ?config.duration,
        seed = config.seed,
        "running trials"
    );

    let outcomes: Vec<Result<(UnitId, RunReport), SimError>> = (0..config.trials as u64)
        .into_par_iter()
        .map_init(
            || {
                let mut clock = SimulationClock::new(config.seed);
                let measured = build(&mut clock);
                (clock, measured)
            },
            |(clock, measured), index| {
                let unit = measured.clone()?;
                let report = run_trial(clock, trial_seed(config.seed, index), config)?;
                Ok((unit, report))
            },
        )
        .collect();

    Ok(summarize(config, outcomes))
}

fn run_trial(
    clock: &mut SimulationClock,
    seed: u64,
    config: &RunnerConfig,
) -> Result<RunReport, SimError> {
    clock.reset(seed)?;
    clock.run_until(config.duration)?;
    clock.finish()
}

fn summarize(
    config: &RunnerConfig,
    outcomes: Vec<Result<(UnitId, RunReport), SimError>>,
) -> TrialSummary {
    let duration_secs = config.duration.as_secs_f64();
    let mut dps = Vec::with_capacity(outcomes.len());
    let mut uptime: BTreeMap<String, (f64, u32)> = BTreeMap::new();
    let mut procs: BTreeMap<String, f64> = BTreeMap::new();
    let mut failures = Vec::new();
    let mut failed = 0;

    for (index, outcome) in outcomes.into_iter().enumerate() {
        let index = index as u64;
        let (unit, report) = match outcome {
            Ok(done) => done,
            Err(err) => {
                failed += 1;
                warn!(index, error = %err, "trial failed");
                if failures.len() < MAX_REPORTED_FAILURES {
                    failures.push(TrialFailure {
                        index,
                        seed: trial_seed(config.seed, index),
                        error: err.to_string(),
                    });
                }
                continue;
            }
        };

        dps.push(report.dps(unit));
        for aura in &report.auras {
            let fraction = if duration_secs > 0.0 {
                aura.uptime.as_secs_f64() / duration_secs
            } else {
                0.0
            };
            let entry = uptime.entry(aura.label.clone()).or_default();
            entry.0 += fraction;
            entry.1 += 1;
        }
        for watcher in &report.watchers {
            *procs.entry(watcher.label.clone()).or_default() += watcher.metrics.procs as f64;
        }
    }

    let completed = dps.len();
    let runs = completed.max(1) as f64;
    TrialSummary {
        trials: config.trials,
        completed,
        failed,
        base_seed: config.seed,
        duration_secs,
        dps: Distribution::from_samples(&dps),
        aura_uptime: uptime
            .into_iter()
            .map(|(label, (sum, count))| (label, sum / f64::from(count.max(1))))
            .collect(),
        procs: procs
            .into_iter()
            .map(|(label, total)| (label, total / runs))
            .collect(),
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_of_known_samples() {
        let dist = Distribution::from_samples(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(dist.mean, 5.0);
        assert_eq!(dist.stddev, 2.0);
        assert_eq!(dist.min, 2.0);
        assert_eq!(dist.max, 9.0);
    }

    #[test]
    fn empty_distribution_is_zero() {
        assert_eq!(Distribution::from_samples(&[]), Distribution::default());
    }
}
