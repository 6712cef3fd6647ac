//! Timed, possibly stacking effects bound to one unit.
//!
//! # State machine
//!
//! ```text
//!   non-stacking:  Inactive ──activate──▶ Active ──expire/deactivate──▶ Inactive
//!                                 ▲  │
//!                                 └──┘ activate while active = refresh
//!
//!   stacking:      Inactive ──▶ Active(n = 1..=max) ──stacks reach 0──▶ Inactive
//! ```
//!
//! `active == (stacks > 0)` holds at every observation point. Expiry is a
//! scheduled action that re-checks `active && expires_at <= now` when it
//! fires, so refreshes and explicit removals turn earlier expiry actions into
//! no-ops instead of removing them from the queue.

mod hooks;
mod lifecycle;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

pub use hooks::{AuraHooks, EventHook, HookKind, LifecycleHook, StackChangeHook};

use crate::ability::CostModifier;
use crate::clock::SimulationClock;
use crate::error::SimError;
use crate::event::{CastEvent, HitEvent, TickEvent};
use crate::unit::UnitId;

/// Handle to an aura registered on a clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AuraHandle(pub u32);

impl fmt::Display for AuraHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aura#{}", self.0)
    }
}

/// What happens to the stack count when an active aura is re-activated.
///
/// Effects disagree on this, so every aura names its policy explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum RefreshPolicy {
    KeepStacks,
    ResetToOne,
    ResetToMax,
}

/// Everything needed to register an aura.
#[derive(Clone, Debug)]
pub struct AuraDescriptor {
    pub label: String,
    pub unit: UnitId,
    /// `None` never expires.
    pub duration: Option<Duration>,
    /// 0 or 1 means non-stacking.
    pub max_stacks: u32,
    pub refresh: RefreshPolicy,
    /// Activated automatically on every reset.
    pub permanent: bool,
    pub cost_modifier: Option<CostModifier>,
    pub hooks: AuraHooks,
}

impl AuraDescriptor {
    pub fn new(unit: UnitId, label: impl Into<String>, refresh: RefreshPolicy) -> Self {
        Self {
            label: label.into(),
            unit,
            duration: None,
            max_stacks: 0,
            refresh,
            permanent: false,
            cost_modifier: None,
            hooks: AuraHooks::default(),
        }
    }

    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn max_stacks(mut self, max_stacks: u32) -> Self {
        self.max_stacks = max_stacks;
        self
    }

    /// Never expires and is activated on every reset.
    #[must_use]
    pub fn permanent(mut self) -> Self {
        self.duration = None;
        self.permanent = true;
        self
    }

    #[must_use]
    pub fn cost_modifier(mut self, modifier: CostModifier) -> Self {
        self.cost_modifier = Some(modifier);
        self
    }

    #[must_use]
    pub fn on_gain<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut SimulationClock, AuraHandle) -> Result<(), SimError> + 'static,
    {
        self.hooks.on_gain = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn on_expire<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut SimulationClock, AuraHandle) -> Result<(), SimError> + 'static,
    {
        self.hooks.on_expire = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn on_stack_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut SimulationClock, AuraHandle, u32, u32) -> Result<(), SimError> + 'static,
    {
        self.hooks.on_stack_change = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn on_cast_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut SimulationClock, AuraHandle, &CastEvent) -> Result<(), SimError> + 'static,
    {
        self.hooks.on_cast_complete = Some(hooks::cast_hook(hook));
        self
    }

    #[must_use]
    pub fn on_hit_dealt<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut SimulationClock, AuraHandle, &HitEvent) -> Result<(), SimError> + 'static,
    {
        self.hooks.on_hit_dealt = Some(hooks::hit_hook(hook));
        self
    }

    #[must_use]
    pub fn on_periodic_tick<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut SimulationClock, AuraHandle, &TickEvent) -> Result<(), SimError> + 'static,
    {
        self.hooks.on_periodic_tick = Some(hooks::tick_hook(hook));
        self
    }

    #[must_use]
    pub fn on_reset<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut SimulationClock, AuraHandle) -> Result<(), SimError> + 'static,
    {
        self.hooks.on_reset = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn on_init<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut SimulationClock, AuraHandle) -> Result<(), SimError> + 'static,
    {
        self.hooks.on_init = Some(Rc::new(hook));
        self
    }
}

/// Per-run counters of one aura.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AuraMetrics {
    pub activations: u32,
    pub refreshes: u32,
    /// Uptime of completed activations; the open one is added on report.
    pub uptime: Duration,
}

/// Runtime state of a registered aura.
#[derive(Clone, Debug)]
pub struct Aura {
    pub(crate) handle: AuraHandle,
    pub(crate) label: Rc<str>,
    pub(crate) unit: UnitId,
    pub(crate) duration: Option<Duration>,
    pub(crate) max_stacks: u32,
    pub(crate) refresh: RefreshPolicy,
    pub(crate) permanent: bool,
    pub(crate) cost_modifier: Option<CostModifier>,
    pub(crate) hooks: AuraHooks,
    pub(crate) active: bool,
    pub(crate) stacks: u32,
    pub(crate) expires_at: Option<Duration>,
    pub(crate) gained_at: Duration,
    /// Stack count last handed to `on_stack_change` as `new`.
    pub(crate) reported_stacks: u32,
    /// `on_gain` fired and its matching `on_expire` has not yet.
    pub(crate) expire_owed: bool,
    pub(crate) metrics: AuraMetrics,
}

impl Aura {
    fn new(handle: AuraHandle, descriptor: AuraDescriptor) -> Self {
        Self {
            handle,
            label: descriptor.label.into(),
            unit: descriptor.unit,
            duration: descriptor.duration,
            max_stacks: descriptor.max_stacks,
            refresh: descriptor.refresh,
            permanent: descriptor.permanent,
            cost_modifier: descriptor.cost_modifier,
            hooks: descriptor.hooks,
            active: false,
            stacks: 0,
            expires_at: None,
            gained_at: Duration::ZERO,
            reported_stacks: 0,
            expire_owed: false,
            metrics: AuraMetrics::default(),
        }
    }

    pub fn handle(&self) -> AuraHandle {
        self.handle
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn stacks(&self) -> u32 {
        self.stacks
    }

    pub fn expires_at(&self) -> Option<Duration> {
        self.expires_at
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        self.refresh
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    pub fn metrics(&self) -> AuraMetrics {
        self.metrics
    }

    /// Upper bound of the stack count; non-stacking auras hold one stack.
    pub fn stack_limit(&self) -> u32 {
        self.max_stacks.max(1)
    }

    pub fn is_stacking(&self) -> bool {
        self.max_stacks > 1
    }

    /// Time until expiry. `None` when inactive or never expiring.
    pub fn remaining(&self, now: Duration) -> Option<Duration> {
        if !self.active {
            return None;
        }
        self.expires_at.map(|at| at.saturating_sub(now))
    }

    /// Uptime including the activation still in progress at `now`.
    pub fn uptime(&self, now: Duration) -> Duration {
        if self.active {
            self.metrics.uptime + now.saturating_sub(self.gained_at)
        } else {
            self.metrics.uptime
        }
    }

    fn reset(&mut self) {
        self.active = false;
        self.stacks = 0;
        self.expires_at = None;
        self.gained_at = Duration::ZERO;
        self.reported_stacks = 0;
        self.expire_owed = false;
        self.metrics = AuraMetrics::default();
    }
}

/// Auras of every unit, in registration order.
#[derive(Clone, Debug, Default)]
pub struct AuraRegistry {
    auras: Vec<Aura>,
    by_unit: HashMap<UnitId, UnitAuras>,
}

#[derive(Clone, Debug, Default)]
struct UnitAuras {
    order: Vec<AuraHandle>,
    by_label: HashMap<Rc<str>, AuraHandle>,
}

impl AuraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, descriptor: AuraDescriptor) -> Result<AuraHandle, SimError> {
        let unit = descriptor.unit;
        if self.find(unit, &descriptor.label).is_some() {
            return Err(SimError::DuplicateAura {
                unit,
                label: descriptor.label,
            });
        }
        let handle = AuraHandle(self.auras.len() as u32);
        let aura = Aura::new(handle, descriptor);
        let entry = self.by_unit.entry(unit).or_default();
        entry.order.push(handle);
        entry.by_label.insert(Rc::clone(&aura.label), handle);
        self.auras.push(aura);
        Ok(handle)
    }

    pub fn find(&self, unit: UnitId, label: &str) -> Option<AuraHandle> {
        self.by_unit.get(&unit)?.by_label.get(label).copied()
    }

    pub fn get(&self, handle: AuraHandle) -> Result<&Aura, SimError> {
        self.auras
            .get(handle.0 as usize)
            .ok_or(SimError::UnknownAura(handle))
    }

    pub(crate) fn get_mut(&mut self, handle: AuraHandle) -> Result<&mut Aura, SimError> {
        self.auras
            .get_mut(handle.0 as usize)
            .ok_or(SimError::UnknownAura(handle))
    }

    /// Auras of one unit in registration order.
    pub fn on_unit(&self, unit: UnitId) -> &[AuraHandle] {
        self.by_unit
            .get(&unit)
            .map(|entry| entry.order.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Aura> {
        self.auras.iter()
    }

    pub(crate) fn reset(&mut self) {
        for aura in &mut self.auras {
            aura.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.auras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.auras.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_labels_are_rejected_per_unit() {
        let mut registry = AuraRegistry::new();
        let first = registry
            .register(AuraDescriptor::new(UnitId(0), "Flurry", RefreshPolicy::KeepStacks))
            .unwrap();
        let err = registry
            .register(AuraDescriptor::new(UnitId(0), "Flurry", RefreshPolicy::ResetToMax))
            .unwrap_err();
        assert!(matches!(err, SimError::DuplicateAura { .. }));

        let other = registry
            .register(AuraDescriptor::new(UnitId(1), "Flurry", RefreshPolicy::KeepStacks))
            .unwrap();
        assert_ne!(first, other);
        assert_eq!(registry.find(UnitId(1), "Flurry"), Some(other));
        assert_eq!(registry.on_unit(UnitId(0)), &[first]);
    }

    #[test]
    fn stack_limit_treats_zero_and_one_as_non_stacking() {
        let mut registry = AuraRegistry::new();
        let plain = registry
            .register(AuraDescriptor::new(UnitId(0), "a", RefreshPolicy::KeepStacks))
            .unwrap();
        let stacking = registry
            .register(AuraDescriptor::new(UnitId(0), "b", RefreshPolicy::KeepStacks).max_stacks(3))
            .unwrap();
        assert_eq!(registry.get(plain).unwrap().stack_limit(), 1);
        assert!(!registry.get(plain).unwrap().is_stacking());
        assert_eq!(registry.get(stacking).unwrap().stack_limit(), 3);
    }
}
