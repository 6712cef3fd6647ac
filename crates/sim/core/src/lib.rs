//! Discrete-event engine for timed combat effects.
//!
//! `sim-core` drives one simulation run: a [`SimulationClock`] owns time,
//! the delayed action queue, named RNG streams, timers, units, auras, proc
//! watchers and abilities. Every mutation happens inside callbacks the
//! clock runs on a single thread, in `(fire_at, sequence)` order, so a run
//! is fully determined by its seed. Independent runs use independent clocks
//! and can be spread across threads freely.
pub mod ability;
pub mod aura;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod proc;
pub mod queue;
pub mod report;
pub mod rng;
pub mod timer;
pub mod unit;

pub use ability::{
    Ability, AbilityDescriptor, AbilityFlags, AbilityId, AbilityMetrics, AbilitySelector,
    CastError, CastTicket, CostModifier, PeriodicConfig,
};
pub use aura::{
    Aura, AuraDescriptor, AuraHandle, AuraHooks, AuraMetrics, AuraRegistry, HookKind,
    RefreshPolicy,
};
pub use clock::SimulationClock;
pub use config::SimConfig;
pub use error::{EngineError, ErrorSeverity, SimError};
pub use event::{CastEvent, EventKind, HitEvent, HitOutcome, ProcMask, SimEvent, TickEvent};
pub use proc::{
    ChancePolicy, Normalizer, WatcherId, WatcherMetrics, WatcherSpec, effective_chance,
};
pub use queue::{ActionQueue, ScheduledAction};
pub use report::{AbilityReport, AuraReport, RunReport, UnitReport, WatcherReport};
pub use rng::{RngRegistry, derive_seed, trial_seed};
pub use timer::{Cooldown, Timer, TimerId, TimerRegistry};
pub use unit::{ResourceMeter, Stat, StatBag, Unit, UnitId, UnitRegistry, UnitSpec};
