//! Probabilistic triggers ("procs").
//!
//! A watcher observes one event kind on one unit and decides, per event,
//! whether its callback fires:
//!
//! 1. gating: owning aura active, proc mask, predicate
//! 2. the event counts as eligible (PPM interval bookkeeping)
//! 3. internal cooldown check, before any random number is consumed
//! 4. chance roll on the watcher's own RNG stream
//! 5. on success: start the ICD, run `on_proc`

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use crate::aura::{AuraHandle, HookKind};
use crate::clock::SimulationClock;
use crate::error::SimError;
use crate::event::{EventKind, ProcMask, SimEvent};
use crate::timer::{Cooldown, TimerRegistry};
use crate::unit::UnitId;

/// Pure normalization of a per-minute rate to a per-event chance.
///
/// `min(1, rate / 60 × interval)`. Non-positive or NaN rates never proc.
pub fn effective_chance(rate_per_minute: f64, interval: Duration) -> f64 {
    if rate_per_minute.is_nan() || rate_per_minute <= 0.0 {
        return 0.0;
    }
    (rate_per_minute / 60.0 * interval.as_secs_f64()).min(1.0)
}

/// Interval a per-minute rate is normalized against.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Normalizer {
    /// A fixed interval, such as a weapon's swing time.
    Fixed(Duration),
    /// Time since the watcher's previous eligible event; `initial` is used
    /// for the first one.
    SinceLastEvent { initial: Duration },
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChancePolicy {
    Flat(f64),
    PerMinuteRate { rate: f64, normalizer: Normalizer },
}

impl ChancePolicy {
    pub fn ppm(rate: f64, normalizer: Normalizer) -> Self {
        Self::PerMinuteRate { rate, normalizer }
    }
}

pub type ProcPredicate = Rc<dyn Fn(&SimEvent) -> bool>;
pub type ProcCallback = Rc<dyn Fn(&mut SimulationClock, &SimEvent) -> Result<(), SimError>>;

/// Handle to a registered watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WatcherId(pub u32);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher#{}", self.0)
    }
}

/// Registration request for a watcher.
#[derive(Clone)]
pub struct WatcherSpec {
    pub label: String,
    pub unit: UnitId,
    pub kind: EventKind,
    pub chance: ChancePolicy,
    /// Stream key; defaults to the label.
    pub rng_key: Option<String>,
    /// Events must intersect this mask. Empty accepts everything.
    pub proc_mask: ProcMask,
    pub predicate: Option<ProcPredicate>,
    pub icd: Option<Duration>,
    pub require_active: Option<AuraHandle>,
    pub on_proc: ProcCallback,
}

impl WatcherSpec {
    pub fn new<F>(
        label: impl Into<String>,
        unit: UnitId,
        kind: EventKind,
        chance: ChancePolicy,
        on_proc: F,
    ) -> Self
    where
        F: Fn(&mut SimulationClock, &SimEvent) -> Result<(), SimError> + 'static,
    {
        Self {
            label: label.into(),
            unit,
            kind,
            chance,
            rng_key: None,
            proc_mask: ProcMask::empty(),
            predicate: None,
            icd: None,
            require_active: None,
            on_proc: Rc::new(on_proc),
        }
    }

    #[must_use]
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&SimEvent) -> bool + 'static,
    {
        self.predicate = Some(Rc::new(predicate));
        self
    }

    #[must_use]
    pub fn with_proc_mask(mut self, mask: ProcMask) -> Self {
        self.proc_mask = mask;
        self
    }

    #[must_use]
    pub fn with_icd(mut self, icd: Duration) -> Self {
        self.icd = Some(icd);
        self
    }

    #[must_use]
    pub fn with_rng_key(mut self, key: impl Into<String>) -> Self {
        self.rng_key = Some(key.into());
        self
    }

    /// Only evaluate while `aura` is active.
    #[must_use]
    pub fn while_active(mut self, aura: AuraHandle) -> Self {
        self.require_active = Some(aura);
        self
    }
}

impl fmt::Debug for WatcherSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherSpec")
            .field("label", &self.label)
            .field("unit", &self.unit)
            .field("kind", &self.kind)
            .field("chance", &self.chance)
            .field("proc_mask", &self.proc_mask)
            .field("icd", &self.icd)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WatcherMetrics {
    pub eligible: u64,
    pub procs: u64,
}

pub(crate) struct Watcher {
    label: Rc<str>,
    rng_key: Rc<str>,
    proc_mask: ProcMask,
    chance: ChancePolicy,
    predicate: Option<ProcPredicate>,
    icd: Option<Cooldown>,
    require_active: Option<AuraHandle>,
    on_proc: ProcCallback,
    last_eligible_at: Option<Duration>,
    metrics: WatcherMetrics,
}

/// Watchers indexed by the unit and event kind they observe.
#[derive(Default)]
pub struct ProcRegistry {
    watchers: Vec<Watcher>,
    index: HashMap<(UnitId, EventKind), Vec<WatcherId>>,
}

impl ProcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn watching(&self, unit: UnitId, kind: EventKind) -> &[WatcherId] {
        self.index
            .get(&(unit, kind))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn get(&self, id: WatcherId) -> Result<&Watcher, SimError> {
        self.watchers
            .get(id.0 as usize)
            .ok_or(SimError::UnknownWatcher(id))
    }

    fn get_mut(&mut self, id: WatcherId) -> Result<&mut Watcher, SimError> {
        self.watchers
            .get_mut(id.0 as usize)
            .ok_or(SimError::UnknownWatcher(id))
    }

    pub fn label(&self, id: WatcherId) -> Result<&str, SimError> {
        Ok(&self.get(id)?.label)
    }

    pub fn metrics(&self, id: WatcherId) -> Result<WatcherMetrics, SimError> {
        Ok(self.get(id)?.metrics)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, WatcherMetrics)> {
        self.watchers
            .iter()
            .map(|watcher| (&*watcher.label, watcher.metrics))
    }

    pub(crate) fn reset(&mut self) {
        for watcher in &mut self.watchers {
            watcher.last_eligible_at = None;
            watcher.metrics = WatcherMetrics::default();
        }
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }
}

impl fmt::Debug for ProcRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcRegistry")
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

/// Outcome of the deterministic part of a watcher evaluation.
enum Gate {
    Skip,
    Roll { key: Rc<str>, chance: f64 },
}

impl SimulationClock {
    /// Registers a watcher and its RNG stream.
    pub fn register_watcher(&mut self, spec: WatcherSpec) -> Result<WatcherId, SimError> {
        self.units.get(spec.unit)?;
        if let Some(aura) = spec.require_active {
            self.auras.get(aura)?;
        }
        let rng_key: Rc<str> = spec.rng_key.unwrap_or_else(|| spec.label.clone()).into();
        self.rng.register(&rng_key)?;

        let icd = spec
            .icd
            .map(|duration| Cooldown::new(self.timers.create(), duration));
        let id = WatcherId(self.procs.watchers.len() as u32);
        self.procs.watchers.push(Watcher {
            label: spec.label.into(),
            rng_key,
            proc_mask: spec.proc_mask,
            chance: spec.chance,
            predicate: spec.predicate,
            icd,
            require_active: spec.require_active,
            on_proc: spec.on_proc,
            last_eligible_at: None,
            metrics: WatcherMetrics::default(),
        });
        self.procs
            .index
            .entry((spec.unit, spec.kind))
            .or_default()
            .push(id);
        Ok(id)
    }

    pub fn watcher_metrics(&self, id: WatcherId) -> Result<WatcherMetrics, SimError> {
        self.procs.metrics(id)
    }

    /// Evaluates every watcher of the event's source unit and kind, in
    /// registration order.
    pub(crate) fn evaluate_watchers(&mut self, event: &SimEvent) -> Result<(), SimError> {
        let ids = self.procs.watching(event.source(), event.kind()).to_vec();
        for id in ids {
            self.evaluate_watcher(id, event)?;
        }
        Ok(())
    }

    fn evaluate_watcher(&mut self, id: WatcherId, event: &SimEvent) -> Result<(), SimError> {
        let now = self.now;
        let gate = {
            let watcher = self.procs.get(id)?;
            if let Some(aura) = watcher.require_active {
                if !self.auras.get(aura)?.is_active() {
                    return Ok(());
                }
            }
            if !watcher.proc_mask.is_empty() && !watcher.proc_mask.intersects(event.proc_mask()) {
                return Ok(());
            }
            if let Some(predicate) = &watcher.predicate {
                if !predicate(event) {
                    return Ok(());
                }
            }
            let watcher = self.procs.get_mut(id)?;
            let gate = eligible(watcher, &self.timers, now)?;
            watcher.last_eligible_at = Some(now);
            watcher.metrics.eligible += 1;
            gate
        };

        let Gate::Roll { key, chance } = gate else {
            return Ok(());
        };
        if !self.rng.roll(&key, chance)? {
            return Ok(());
        }

        let watcher = self.procs.get_mut(id)?;
        watcher.metrics.procs += 1;
        let icd = watcher.icd;
        let label = watcher.label.clone();
        let on_proc = watcher.on_proc.clone();
        if let Some(icd) = icd {
            icd.use_at(&mut self.timers, now)?;
        }
        debug!(watcher = %label, chance, at = ?now, "proc");
        self.invoke_hook(&label, HookKind::Proc, |clock| on_proc(clock, event))
    }
}

/// ICD check and chance computation for an eligible event.
fn eligible(watcher: &Watcher, timers: &TimerRegistry, now: Duration) -> Result<Gate, SimError> {
    if let Some(icd) = watcher.icd {
        if !icd.is_ready(timers, now)? {
            return Ok(Gate::Skip);
        }
    }
    let chance = match watcher.chance {
        ChancePolicy::Flat(chance) => chance,
        ChancePolicy::PerMinuteRate { rate, normalizer } => {
            let interval = match normalizer {
                Normalizer::Fixed(interval) => interval,
                Normalizer::SinceLastEvent { initial } => watcher
                    .last_eligible_at
                    .map_or(initial, |last| now.saturating_sub(last)),
            };
            effective_chance(rate, interval)
        }
    };
    Ok(Gate::Roll {
        key: watcher.rng_key.clone(),
        chance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppm_matches_linear_formula_below_saturation() {
        let chance = effective_chance(6.0, Duration::from_millis(2600));
        assert!((chance - 0.26).abs() < 1e-12);
        let tiny = effective_chance(1.0, Duration::from_millis(10));
        assert!((tiny - 1.0 / 6000.0).abs() < 1e-12);
    }

    #[test]
    fn ppm_is_monotonic_and_saturates() {
        let mut previous = 0.0;
        for millis in (0..120_000).step_by(250) {
            let chance = effective_chance(3.5, Duration::from_millis(millis));
            assert!(chance >= previous);
            assert!(chance <= 1.0);
            previous = chance;
        }
        assert_eq!(effective_chance(3.5, Duration::from_secs(60)), 1.0);
    }

    #[test]
    fn degenerate_rates_never_proc() {
        assert_eq!(effective_chance(0.0, Duration::from_secs(3)), 0.0);
        assert_eq!(effective_chance(-2.0, Duration::from_secs(3)), 0.0);
        assert_eq!(effective_chance(f64::NAN, Duration::from_secs(3)), 0.0);
    }
}
