//! Ability descriptors and their runtime registry.
//!
//! Ability content is defined outside the engine. The pipeline only reads
//! the descriptor: cost, cast time, cooldown, flags and the amounts it
//! resolves. Auras refer to abilities through [`AbilitySelector`], a lookup
//! by name or mask, never by ownership.

mod error;
mod pipeline;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use bitflags::bitflags;

pub use error::CastError;
pub use pipeline::CastTicket;

use crate::clock::SimulationClock;
use crate::error::SimError;
use crate::event::{HitEvent, ProcMask};
use crate::timer::Cooldown;
use crate::unit::UnitId;

/// Handle to a registered ability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AbilityId(pub u32);

impl fmt::Display for AbilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ability#{}", self.0)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct AbilityFlags: u32 {
        /// Neither checks nor starts the caster's global cooldown.
        const OFF_GCD       = 1 << 0;
        /// Skips the outcome table's miss row.
        const CANNOT_MISS   = 1 << 1;
        /// Completes without emitting a cast-complete event.
        const NO_CAST_EVENT = 1 << 2;
    }
}

/// Damage over time applied to every target the ability lands on.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeriodicConfig {
    pub ticks: u32,
    pub interval: Duration,
    pub amount_per_tick: f64,
}

pub type LandedFn = Rc<dyn Fn(&mut SimulationClock, &HitEvent) -> Result<(), SimError>>;

/// Which abilities a cost modifier applies to.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AbilitySelector {
    All,
    Named(String),
    /// Abilities whose proc mask intersects this one.
    Mask(ProcMask),
}

/// Additive cost delta contributed by an active aura.
///
/// Resolved cost is `base × max(0, 1 + Σ delta)`, so `-1.0` makes the
/// selected abilities free.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CostModifier {
    pub abilities: AbilitySelector,
    pub delta: f64,
}

impl CostModifier {
    pub fn new(abilities: AbilitySelector, delta: f64) -> Self {
        Self { abilities, delta }
    }

    pub fn applies_to(&self, ability: &Ability) -> bool {
        match &self.abilities {
            AbilitySelector::All => true,
            AbilitySelector::Named(name) => **name == *ability.name,
            AbilitySelector::Mask(mask) => mask.intersects(ability.proc_mask),
        }
    }
}

/// Registration request for an ability.
#[derive(Clone)]
pub struct AbilityDescriptor {
    pub name: String,
    pub caster: UnitId,
    pub cost: f64,
    pub cast_time: Duration,
    pub cooldown: Option<Duration>,
    pub flags: AbilityFlags,
    pub proc_mask: ProcMask,
    pub base_amount: f64,
    pub crit_multiplier: f64,
    pub max_targets: usize,
    pub periodic: Option<PeriodicConfig>,
    pub on_landed: Option<LandedFn>,
}

impl AbilityDescriptor {
    pub fn new(caster: UnitId, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            caster,
            cost: 0.0,
            cast_time: Duration::ZERO,
            cooldown: None,
            flags: AbilityFlags::empty(),
            proc_mask: ProcMask::empty(),
            base_amount: 0.0,
            crit_multiplier: 2.0,
            max_targets: 1,
            periodic: None,
            on_landed: None,
        }
    }

    #[must_use]
    pub fn cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    #[must_use]
    pub fn cast_time(mut self, cast_time: Duration) -> Self {
        self.cast_time = cast_time;
        self
    }

    #[must_use]
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    #[must_use]
    pub fn flags(mut self, flags: AbilityFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn proc_mask(mut self, proc_mask: ProcMask) -> Self {
        self.proc_mask = proc_mask;
        self
    }

    #[must_use]
    pub fn base_amount(mut self, amount: f64) -> Self {
        self.base_amount = amount;
        self
    }

    #[must_use]
    pub fn crit_multiplier(mut self, multiplier: f64) -> Self {
        self.crit_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn max_targets(mut self, max_targets: usize) -> Self {
        self.max_targets = max_targets;
        self
    }

    #[must_use]
    pub fn periodic(mut self, periodic: PeriodicConfig) -> Self {
        self.periodic = Some(periodic);
        self
    }

    /// Runs for every target the ability lands on, before the hit event.
    #[must_use]
    pub fn on_landed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut SimulationClock, &HitEvent) -> Result<(), SimError> + 'static,
    {
        self.on_landed = Some(Rc::new(callback));
        self
    }
}

impl fmt::Debug for AbilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbilityDescriptor")
            .field("name", &self.name)
            .field("caster", &self.caster)
            .field("cost", &self.cost)
            .field("cast_time", &self.cast_time)
            .field("cooldown", &self.cooldown)
            .field("flags", &self.flags)
            .field("proc_mask", &self.proc_mask)
            .field("max_targets", &self.max_targets)
            .field("periodic", &self.periodic)
            .finish_non_exhaustive()
    }
}

/// Per-run counters of one ability.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AbilityMetrics {
    pub casts: u32,
    pub hits: u32,
    pub crits: u32,
    pub misses: u32,
    pub ticks: u32,
    pub fizzles: u32,
    pub damage: f64,
}

pub struct Ability {
    pub(crate) id: AbilityId,
    pub(crate) name: Rc<str>,
    pub(crate) caster: UnitId,
    pub(crate) cost: f64,
    pub(crate) cast_time: Duration,
    pub(crate) cooldown: Option<Cooldown>,
    pub(crate) flags: AbilityFlags,
    pub(crate) proc_mask: ProcMask,
    pub(crate) base_amount: f64,
    pub(crate) crit_multiplier: f64,
    pub(crate) max_targets: usize,
    pub(crate) periodic: Option<PeriodicConfig>,
    pub(crate) on_landed: Option<LandedFn>,
    /// Stream the outcome table rolls on.
    pub(crate) outcome_key: Rc<str>,
    pub(crate) metrics: AbilityMetrics,
}

impl Ability {
    pub fn id(&self) -> AbilityId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn caster(&self) -> UnitId {
        self.caster
    }

    pub fn base_cost(&self) -> f64 {
        self.cost
    }

    pub fn cooldown(&self) -> Option<Cooldown> {
        self.cooldown
    }

    pub fn flags(&self) -> AbilityFlags {
        self.flags
    }

    pub fn proc_mask(&self) -> ProcMask {
        self.proc_mask
    }

    pub fn metrics(&self) -> AbilityMetrics {
        self.metrics
    }
}

impl fmt::Debug for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ability")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("caster", &self.caster)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Tick chain of one periodic ability on one target.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PeriodicState {
    /// Bumped on every application and cancellation; ticks carrying an
    /// older generation are stale.
    pub(crate) generation: u64,
    pub(crate) active: bool,
}

#[derive(Debug, Default)]
pub struct AbilityRegistry {
    abilities: Vec<Ability>,
    pub(crate) periodic: HashMap<(AbilityId, UnitId), PeriodicState>,
}

impl AbilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: AbilityId) -> Result<&Ability, SimError> {
        self.abilities
            .get(id.0 as usize)
            .ok_or(SimError::UnknownAbility(id))
    }

    pub(crate) fn get_mut(&mut self, id: AbilityId) -> Result<&mut Ability, SimError> {
        self.abilities
            .get_mut(id.0 as usize)
            .ok_or(SimError::UnknownAbility(id))
    }

    /// Looks an ability up by caster and name.
    pub fn find(&self, caster: UnitId, name: &str) -> Option<AbilityId> {
        self.abilities
            .iter()
            .find(|ability| ability.caster == caster && &*ability.name == name)
            .map(|ability| ability.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ability> {
        self.abilities.iter()
    }

    pub(crate) fn push(&mut self, build: impl FnOnce(AbilityId) -> Ability) -> AbilityId {
        let id = AbilityId(self.abilities.len() as u32);
        self.abilities.push(build(id));
        id
    }

    pub(crate) fn reset(&mut self) {
        self.periodic.clear();
        for ability in &mut self.abilities {
            ability.metrics = AbilityMetrics::default();
        }
    }

    pub fn len(&self) -> usize {
        self.abilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abilities.is_empty()
    }
}
