use std::time::Duration;

use sim_core::{SimError, SimulationClock, UnitId, UnitSpec, trial_seed};
use sim_runner::{RunnerConfig, run_trials, run_trials_with};

fn quick(trials: usize) -> RunnerConfig {
    RunnerConfig {
        trials,
        duration: Duration::from_secs(60),
        seed: 4242,
        targets: 2,
        log_dir: None,
        file_logging: false,
    }
}

#[test]
fn same_configuration_gives_the_same_summary() {
    let first = run_trials(&quick(8)).unwrap();
    let second = run_trials(&quick(8)).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.completed, 8);
    assert_eq!(first.failed, 0);
    assert!(first.dps.mean > 0.0);
    assert!(first.dps.min <= first.dps.mean && first.dps.mean <= first.dps.max);
    assert!(first.aura_uptime.contains_key("Flurry"));
}

#[test]
fn zero_trials_is_rejected() {
    assert!(run_trials(&quick(0)).is_err());
}

#[test]
fn a_failing_trial_does_not_stop_the_others() {
    let config = quick(6);
    let doomed = trial_seed(config.seed, 3);

    let summary = run_trials_with(&config, move |clock: &mut SimulationClock| {
        let unit: UnitId = clock.add_unit(UnitSpec::new("idler"));
        clock.on_reset_listener("trap", move |clock| {
            if clock.seed() == doomed {
                clock.schedule(Duration::from_secs(5), |_| -> Result<(), SimError> {
                    panic!("trap sprung")
                })?;
            }
            Ok(())
        });
        Ok(unit)
    })
    .unwrap();

    assert_eq!(summary.completed, 5);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].index, 3);
    assert_eq!(summary.failures[0].seed, doomed);
    assert!(summary.failures[0].error.contains("trap sprung"));
}
