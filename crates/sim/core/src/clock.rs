//! The simulation clock: current time, the action queue and the run lifecycle.
//!
//! One clock holds every piece of mutable state of one simulation run. It is
//! `reset` between runs rather than rebuilt, which keeps allocations alive
//! across thousands of trials.
//!
//! # Run loop
//!
//! [`run_until`](SimulationClock::run_until) pops actions in
//! `(fire_at, sequence)` order and advances time to each one before running
//! it. Actions may schedule more work at or after the current time; anything
//! due before the horizon is picked up by the same call.
//!
//! # Failure
//!
//! A panicking or failing hook aborts the run. The first fatal error is kept
//! and every later `run_until` returns [`SimError::RunAborted`] until the
//! next `reset`.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, error, trace};

use crate::ability::AbilityRegistry;
use crate::aura::{AuraHandle, AuraRegistry, HookKind};
use crate::config::SimConfig;
use crate::error::{SimError, panic_message};
use crate::event::SimEvent;
use crate::proc::ProcRegistry;
use crate::queue::ActionQueue;
use crate::rng::RngRegistry;
use crate::timer::{Cooldown, Timer, TimerId, TimerRegistry};
use crate::unit::{Stat, Unit, UnitId, UnitRegistry, UnitSpec};

/// Clock-level lifecycle listener, run at init or reset.
pub type ListenerFn = Rc<dyn Fn(&mut SimulationClock) -> Result<(), SimError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Init,
    Reset,
}

#[derive(Clone)]
enum LifecycleEntry {
    Aura(AuraHandle),
    Listener {
        label: Rc<str>,
        phase: Phase,
        hook: ListenerFn,
    },
}

/// Aura hooks and ad hoc listeners in one shared registration order.
#[derive(Clone, Default)]
pub(crate) struct Lifecycle {
    order: Vec<LifecycleEntry>,
    /// Entries before this index have already run their init phase.
    initialized: usize,
}

impl Lifecycle {
    pub(crate) fn push_aura(&mut self, handle: AuraHandle) {
        self.order.push(LifecycleEntry::Aura(handle));
    }

    fn push_listener(&mut self, label: &str, phase: Phase, hook: ListenerFn) {
        self.order.push(LifecycleEntry::Listener {
            label: label.into(),
            phase,
            hook,
        });
    }
}

/// `now + delay`, failing instead of overflowing `Duration`.
pub(crate) fn deadline(now: Duration, delay: Duration) -> Result<Duration, SimError> {
    now.checked_add(delay)
        .ok_or(SimError::TimeOverflow { now, delay })
}

pub struct SimulationClock {
    pub(crate) config: SimConfig,
    pub(crate) now: Duration,
    pub(crate) queue: ActionQueue,
    pub(crate) rng: RngRegistry,
    pub(crate) timers: TimerRegistry,
    pub(crate) units: UnitRegistry,
    pub(crate) auras: AuraRegistry,
    pub(crate) procs: ProcRegistry,
    pub(crate) abilities: AbilityRegistry,
    pub(crate) lifecycle: Lifecycle,
    failure: Option<SimError>,
    hook_depth: usize,
}

impl SimulationClock {
    pub fn new(seed: u64) -> Self {
        Self::with_config(SimConfig::default(), seed)
    }

    pub fn with_config(config: SimConfig, seed: u64) -> Self {
        Self {
            config,
            now: Duration::ZERO,
            queue: ActionQueue::new(),
            rng: RngRegistry::new(seed),
            timers: TimerRegistry::new(),
            units: UnitRegistry::new(),
            auras: AuraRegistry::new(),
            procs: ProcRegistry::new(),
            abilities: AbilityRegistry::new(),
            lifecycle: Lifecycle::default(),
            failure: None,
            hook_depth: 0,
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.rng.run_seed()
    }

    /// First fatal error of the current run, if any.
    pub fn failure(&self) -> Option<&SimError> {
        self.failure.as_ref()
    }

    pub fn pending_actions(&self) -> usize {
        self.queue.len()
    }

    // ===== units and targets =====

    /// Adds a combat entity with its own global cooldown timer. Hostile
    /// units join the end of the target list.
    pub fn add_unit(&mut self, spec: UnitSpec) -> UnitId {
        let gcd = self.timers.create();
        self.units.add(spec, gcd)
    }

    pub fn unit(&self, id: UnitId) -> Result<&Unit, SimError> {
        self.units.get(id)
    }

    pub fn unit_mut(&mut self, id: UnitId) -> Result<&mut Unit, SimError> {
        self.units.get_mut(id)
    }

    pub fn units(&self) -> &UnitRegistry {
        &self.units
    }

    pub fn stat(&self, unit: UnitId, stat: Stat) -> Result<f64, SimError> {
        Ok(self.units.get(unit)?.stats.get(stat))
    }

    /// Adds `delta` to a unit's stat. Pair every positive delta with an
    /// equal negative one, typically in `on_gain` and `on_expire`.
    pub fn add_stat(&mut self, unit: UnitId, stat: Stat, delta: f64) -> Result<(), SimError> {
        self.units.get_mut(unit)?.stats.add(stat, delta);
        Ok(())
    }

    pub fn targets(&self) -> &[UnitId] {
        self.units.targets()
    }

    pub fn set_targets(&mut self, targets: Vec<UnitId>) -> Result<(), SimError> {
        self.units.set_targets(targets)
    }

    pub fn next_target(&self, current: UnitId) -> Option<UnitId> {
        self.units.next_target(current)
    }

    // ===== timers and cooldowns =====

    pub fn new_timer(&mut self) -> TimerId {
        self.timers.create()
    }

    pub fn new_cooldown(&mut self, duration: Duration) -> Cooldown {
        Cooldown::new(self.timers.create(), duration)
    }

    pub fn timer(&self, id: TimerId) -> Result<&Timer, SimError> {
        self.timers.get(id)
    }

    /// Forces a timer's ready time, for durations that vary at runtime.
    pub fn set_timer(&mut self, id: TimerId, ready_at: Duration) -> Result<(), SimError> {
        self.timers.get_mut(id)?.set(ready_at);
        Ok(())
    }

    pub fn cooldown_ready(&self, cooldown: &Cooldown) -> Result<bool, SimError> {
        cooldown.is_ready(&self.timers, self.now)
    }

    pub fn use_cooldown(&mut self, cooldown: &Cooldown) -> Result<(), SimError> {
        cooldown.use_at(&mut self.timers, self.now)
    }

    // ===== randomness =====

    pub fn register_rng_stream(&mut self, key: &str) -> Result<(), SimError> {
        self.rng.register(key)
    }

    pub fn uniform(&mut self, key: &str) -> Result<f64, SimError> {
        self.rng.uniform(key)
    }

    pub fn roll(&mut self, key: &str, chance: f64) -> Result<bool, SimError> {
        self.rng.roll(key, chance)
    }

    // ===== scheduling =====

    /// Schedules `action` to run at absolute time `at`.
    ///
    /// Scheduling before the current time is a programming error and fails
    /// with [`SimError::InvalidSchedule`].
    pub fn schedule<F>(&mut self, at: Duration, action: F) -> Result<(), SimError>
    where
        F: FnOnce(&mut SimulationClock) -> Result<(), SimError> + 'static,
    {
        if at < self.now {
            return Err(SimError::InvalidSchedule { at, now: self.now });
        }
        let sequence = self.queue.push(at, Box::new(action));
        trace!(?at, sequence, "action scheduled");
        Ok(())
    }

    pub fn schedule_in<F>(&mut self, delay: Duration, action: F) -> Result<(), SimError>
    where
        F: FnOnce(&mut SimulationClock) -> Result<(), SimError> + 'static,
    {
        self.schedule(deadline(self.now, delay)?, action)
    }

    /// Schedules `action` one batch window from now, after every zero-delay
    /// reaction to the current instant has resolved.
    pub fn schedule_batched<F>(&mut self, action: F) -> Result<(), SimError>
    where
        F: FnOnce(&mut SimulationClock) -> Result<(), SimError> + 'static,
    {
        self.schedule(deadline(self.now, self.config.batch_window)?, action)
    }

    /// Drains every action due at or before `end`, then advances time to
    /// `end` (time never moves backwards).
    pub fn run_until(&mut self, end: Duration) -> Result<(), SimError> {
        if let Some(cause) = &self.failure {
            return Err(SimError::RunAborted {
                cause: Box::new(cause.clone()),
            });
        }

        let mut instant = self.now;
        let mut fired = 0usize;
        while let Some(action) = self.queue.pop_due(end) {
            if action.fire_at > instant {
                instant = action.fire_at;
                fired = 0;
            }
            fired += 1;
            if fired > self.config.max_actions_per_instant {
                return Err(self.fail(SimError::StalledClock {
                    at: instant,
                    actions: fired,
                }));
            }

            self.now = action.fire_at;
            let callback = action.callback;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(self)));
            let err = match outcome {
                // A hook failure the callback swallowed still ends the run.
                Ok(Ok(())) => match &self.failure {
                    None => continue,
                    Some(cause) => {
                        return Err(SimError::RunAborted {
                            cause: Box::new(cause.clone()),
                        });
                    }
                },
                Ok(Err(err)) => err,
                Err(payload) => SimError::HookPanic {
                    origin: format!("action #{}", action.sequence),
                    hook: HookKind::Action,
                    message: panic_message(payload.as_ref()),
                },
            };
            return Err(self.fail(err));
        }
        self.now = self.now.max(end);
        Ok(())
    }

    /// Runs `hook` with panic isolation and a bound on nesting depth.
    ///
    /// Errors are attributed to `origin` unless they already carry hook
    /// attribution. Any failure is fatal to the run.
    pub(crate) fn invoke_hook<F>(
        &mut self,
        origin: &str,
        hook: HookKind,
        f: F,
    ) -> Result<(), SimError>
    where
        F: FnOnce(&mut SimulationClock) -> Result<(), SimError>,
    {
        if self.hook_depth >= self.config.max_hook_depth {
            return Err(self.fail(SimError::HookChainTooDeep {
                origin: origin.to_owned(),
                depth: self.hook_depth,
            }));
        }

        self.hook_depth += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(self)));
        self.hook_depth -= 1;

        let err = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) if err.is_hook_failure() => err,
            Ok(Err(err)) => SimError::HookFailed {
                origin: origin.to_owned(),
                hook,
                cause: Box::new(err),
            },
            Err(payload) => SimError::HookPanic {
                origin: origin.to_owned(),
                hook,
                message: panic_message(payload.as_ref()),
            },
        };
        Err(self.fail(err))
    }

    /// Records the first fatal error of the run and hands `err` back.
    fn fail(&mut self, err: SimError) -> SimError {
        if self.failure.is_none() {
            error!(at = ?self.now, error = %err, "simulation run aborted");
            self.failure = Some(err.clone());
        }
        err
    }

    // ===== events =====

    /// Delivers an event synchronously: aura event hooks of the source unit
    /// first, then the watchers of that unit and event kind.
    pub fn emit(&mut self, event: SimEvent) -> Result<(), SimError> {
        trace!(kind = %event.kind(), source = %event.source(), at = ?self.now, "event");
        self.dispatch_to_auras(&event)?;
        self.evaluate_watchers(&event)
    }

    /// Queues an event at the current instant, behind every action already
    /// scheduled for it. Hooks emitting follow-up events use this instead of
    /// [`emit`](Self::emit) to keep FIFO order and a flat call stack.
    pub fn emit_deferred(&mut self, event: SimEvent) -> Result<(), SimError> {
        self.schedule(self.now, move |clock| clock.emit(event))
    }

    // ===== lifecycle =====

    /// Registers a listener run once per clock, before the first run.
    pub fn on_init_listener<F>(&mut self, label: &str, listener: F)
    where
        F: Fn(&mut SimulationClock) -> Result<(), SimError> + 'static,
    {
        self.lifecycle
            .push_listener(label, Phase::Init, Rc::new(listener));
    }

    /// Registers a listener run at the start of every run.
    pub fn on_reset_listener<F>(&mut self, label: &str, listener: F)
    where
        F: Fn(&mut SimulationClock) -> Result<(), SimError> + 'static,
    {
        self.lifecycle
            .push_listener(label, Phase::Reset, Rc::new(listener));
    }

    /// Runs the init phase of every entry that has not run it yet.
    ///
    /// [`reset`](Self::reset) calls this, so harnesses rarely need to.
    pub fn init(&mut self) -> Result<(), SimError> {
        while self.lifecycle.initialized < self.lifecycle.order.len() {
            let entry = self.lifecycle.order[self.lifecycle.initialized].clone();
            self.lifecycle.initialized += 1;
            match entry {
                LifecycleEntry::Aura(handle) => self.init_aura(handle)?,
                LifecycleEntry::Listener {
                    label,
                    phase: Phase::Init,
                    hook,
                } => self.invoke_hook(&label, HookKind::Init, |clock| hook(clock))?,
                LifecycleEntry::Listener { .. } => {}
            }
        }
        Ok(())
    }

    /// Prepares the clock for a new run seeded with `seed`.
    ///
    /// Clears the queue, rewinds time to zero, re-seeds every RNG stream and
    /// restores timers, units, auras, watchers and abilities. Then it runs
    /// pending init hooks and every reset hook in registration order;
    /// permanent auras are activated after their own reset hook.
    pub fn reset(&mut self, seed: u64) -> Result<(), SimError> {
        self.queue.clear();
        self.now = Duration::ZERO;
        self.failure = None;
        self.hook_depth = 0;
        self.rng.reseed(seed);
        self.timers.reset();
        self.units.reset();
        self.auras.reset();
        self.procs.reset();
        self.abilities.reset();
        debug!(seed, "clock reset");

        self.init()?;
        let mut index = 0;
        while index < self.lifecycle.order.len() {
            let entry = self.lifecycle.order[index].clone();
            index += 1;
            match entry {
                LifecycleEntry::Aura(handle) => self.reset_aura(handle)?,
                LifecycleEntry::Listener {
                    label,
                    phase: Phase::Reset,
                    hook,
                } => self.invoke_hook(&label, HookKind::Reset, |clock| hook(clock))?,
                LifecycleEntry::Listener { .. } => {}
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SimulationClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationClock")
            .field("now", &self.now)
            .field("seed", &self.rng.run_seed())
            .field("pending_actions", &self.queue.len())
            .field("units", &self.units.len())
            .field("auras", &self.auras.len())
            .field("watchers", &self.procs.len())
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn scheduling_in_the_past_is_rejected() {
        let mut clock = SimulationClock::new(0);
        clock.run_until(secs(5)).unwrap();
        let err = clock.schedule(secs(4), |_| Ok(())).unwrap_err();
        assert!(matches!(err, SimError::InvalidSchedule { .. }));
        assert!(clock.schedule(secs(5), |_| Ok(())).is_ok());
    }

    #[test]
    fn run_until_advances_to_horizon_and_leaves_later_actions() {
        let mut clock = SimulationClock::new(0);
        let fired = Rc::new(RefCell::new(Vec::new()));
        for at in [3, 1, 7] {
            let fired = fired.clone();
            clock
                .schedule(secs(at), move |clock| {
                    fired.borrow_mut().push(clock.now());
                    Ok(())
                })
                .unwrap();
        }
        clock.run_until(secs(5)).unwrap();
        assert_eq!(*fired.borrow(), vec![secs(1), secs(3)]);
        assert_eq!(clock.now(), secs(5));
        assert_eq!(clock.pending_actions(), 1);
    }

    #[test]
    fn runaway_same_instant_loop_is_reported_as_stalled() {
        fn respawn(clock: &mut SimulationClock) -> Result<(), SimError> {
            clock.schedule(clock.now(), respawn)
        }
        let config = SimConfig::default().with_max_actions_per_instant(50);
        let mut clock = SimulationClock::with_config(config, 0);
        clock.schedule(secs(1), respawn).unwrap();
        let err = clock.run_until(secs(2)).unwrap_err();
        assert!(matches!(err, SimError::StalledClock { actions: 51, .. }));
    }

    #[test]
    fn recursive_hooks_hit_the_depth_limit() {
        fn recurse(clock: &mut SimulationClock) -> Result<(), SimError> {
            clock.invoke_hook("recurse", HookKind::Listener, recurse)
        }
        let config = SimConfig::default().with_max_hook_depth(8);
        let mut clock = SimulationClock::with_config(config, 0);
        let err = recurse(&mut clock).unwrap_err();
        assert!(matches!(err, SimError::HookChainTooDeep { depth: 8, .. }));
        assert!(clock.failure().is_some());
    }

    #[test]
    fn init_listeners_run_once_and_reset_listeners_every_reset() {
        let mut clock = SimulationClock::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let (init, reset) = (log.clone(), log.clone());
        clock.on_init_listener("cache", move |_| {
            init.borrow_mut().push("init");
            Ok(())
        });
        clock.on_reset_listener("rotation", move |_| {
            reset.borrow_mut().push("reset");
            Ok(())
        });
        clock.reset(1).unwrap();
        clock.reset(2).unwrap();
        assert_eq!(*log.borrow(), vec!["init", "reset", "reset"]);
    }

    #[test]
    fn failing_action_keeps_its_error() {
        let mut clock = SimulationClock::new(0);
        clock
            .schedule(secs(1), |clock| clock.schedule(Duration::ZERO, |_| Ok(())))
            .unwrap();
        let err = clock.run_until(secs(2)).unwrap_err();
        assert!(matches!(err, SimError::InvalidSchedule { .. }));
        assert!(matches!(
            clock.run_until(secs(3)),
            Err(SimError::RunAborted { .. })
        ));
    }
}
