//! Combat entities as the engine sees them.
//!
//! Character building lives outside the engine. A [`Unit`] is only what the
//! core needs to read and modify: a stat bag, one resource pool, a global
//! cooldown timer and a stable identity for target selection.

use std::fmt;
use std::time::Duration;

use arrayvec::ArrayVec;
use strum::{EnumCount, IntoEnumIterator};

use crate::config::SimConfig;
use crate::error::SimError;
use crate::timer::TimerId;

/// Stable identity of a combat entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnitId(pub u32);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stats the engine reads during cast resolution.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumCount,
    strum::EnumIter,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Stat {
    /// Subtracted from the base miss chance.
    HitChance,
    /// Probability that a landed hit is a critical hit.
    CritChance,
    /// Divides cast times and swing intervals. Baseline 1.0.
    CastSpeed,
    /// Additive damage multiplier bonus. Baseline 0.0.
    DamageDone,
    /// Generic power rating for content formulas.
    Power,
}

impl Stat {
    /// Value of the stat on a fresh bag.
    pub const fn baseline(self) -> f64 {
        match self {
            Stat::CastSpeed => 1.0,
            _ => 0.0,
        }
    }
}

/// Mutable bag of stat values.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatBag {
    values: [f64; Stat::COUNT],
}

impl StatBag {
    pub fn new() -> Self {
        let mut values = [0.0; Stat::COUNT];
        for stat in Stat::iter() {
            values[stat as usize] = stat.baseline();
        }
        Self { values }
    }

    #[must_use]
    pub fn with(mut self, stat: Stat, value: f64) -> Self {
        self.set(stat, value);
        self
    }

    pub fn get(&self, stat: Stat) -> f64 {
        self.values[stat as usize]
    }

    pub fn set(&mut self, stat: Stat, value: f64) {
        self.values[stat as usize] = value;
    }

    /// Adds a (possibly negative) modifier.
    pub fn add(&mut self, stat: Stat, delta: f64) {
        self.values[stat as usize] += delta;
    }
}

impl Default for StatBag {
    fn default() -> Self {
        Self::new()
    }
}

/// Current and maximum value of a resource pool.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResourceMeter {
    pub current: f64,
    pub maximum: f64,
}

impl ResourceMeter {
    pub fn new(current: f64, maximum: f64) -> Self {
        Self { current, maximum }
    }

    pub fn full(maximum: f64) -> Self {
        Self::new(maximum, maximum)
    }

    pub fn can_afford(&self, cost: f64) -> bool {
        self.current >= cost
    }

    pub fn spend(&mut self, cost: f64) {
        self.current = (self.current - cost).max(0.0);
    }

    pub fn restore(&mut self, amount: f64) {
        self.current = (self.current + amount).min(self.maximum);
    }
}

/// Description of a unit supplied by the surrounding character builder.
#[derive(Clone, Debug)]
pub struct UnitSpec {
    pub name: String,
    pub stats: StatBag,
    pub resource_max: f64,
    /// Hostile units form the target list, in registration order.
    pub hostile: bool,
}

impl UnitSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stats: StatBag::new(),
            resource_max: 0.0,
            hostile: false,
        }
    }

    pub fn hostile(name: impl Into<String>) -> Self {
        Self {
            hostile: true,
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn with_stats(mut self, stats: StatBag) -> Self {
        self.stats = stats;
        self
    }

    #[must_use]
    pub fn with_resource(mut self, maximum: f64) -> Self {
        self.resource_max = maximum;
        self
    }
}

/// Runtime state of a combat entity.
#[derive(Clone, Debug)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub hostile: bool,
    base_stats: StatBag,
    pub stats: StatBag,
    pub resource: ResourceMeter,
    /// Global cooldown timer shared by every on-GCD ability of this unit.
    pub gcd: TimerId,
    /// Completion time of the cast in progress, if any.
    pub casting_until: Option<Duration>,
    pub damage_dealt: f64,
    pub resource_spent: f64,
}

impl Unit {
    fn new(id: UnitId, spec: UnitSpec, gcd: TimerId) -> Self {
        Self {
            id,
            name: spec.name,
            hostile: spec.hostile,
            base_stats: spec.stats,
            stats: spec.stats,
            resource: ResourceMeter::full(spec.resource_max),
            gcd,
            casting_until: None,
            damage_dealt: 0.0,
            resource_spent: 0.0,
        }
    }

    pub fn base_stats(&self) -> &StatBag {
        &self.base_stats
    }

    pub fn is_casting(&self, now: Duration) -> bool {
        self.casting_until.is_some_and(|until| until > now)
    }

    fn reset(&mut self) {
        self.stats = self.base_stats;
        self.resource.current = self.resource.maximum;
        self.casting_until = None;
        self.damage_dealt = 0.0;
        self.resource_spent = 0.0;
    }
}

/// Units of one simulation plus the ordered target list.
#[derive(Clone, Debug, Default)]
pub struct UnitRegistry {
    units: Vec<Unit>,
    targets: Vec<UnitId>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, spec: UnitSpec, gcd: TimerId) -> UnitId {
        let id = UnitId(self.units.len() as u32);
        if spec.hostile {
            self.targets.push(id);
        }
        self.units.push(Unit::new(id, spec, gcd));
        id
    }

    pub fn get(&self, id: UnitId) -> Result<&Unit, SimError> {
        self.units.get(id.0 as usize).ok_or(SimError::UnknownUnit(id))
    }

    pub fn get_mut(&mut self, id: UnitId) -> Result<&mut Unit, SimError> {
        self.units
            .get_mut(id.0 as usize)
            .ok_or(SimError::UnknownUnit(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter()
    }

    /// Ordered list of valid targets.
    pub fn targets(&self) -> &[UnitId] {
        &self.targets
    }

    /// Replaces the target list. Every id must name a registered unit, at
    /// most once.
    pub fn set_targets(&mut self, targets: Vec<UnitId>) -> Result<(), SimError> {
        for (index, &id) in targets.iter().enumerate() {
            self.get(id)?;
            if targets[..index].contains(&id) {
                return Err(SimError::DuplicateTarget(id));
            }
        }
        self.targets = targets;
        Ok(())
    }

    /// Target after `current` in round-robin order.
    ///
    /// Returns the first target when `current` is not in the list.
    pub fn next_target(&self, current: UnitId) -> Option<UnitId> {
        let first = *self.targets.first()?;
        let Some(index) = self.targets.iter().position(|&id| id == current) else {
            return Some(first);
        };
        Some(self.targets[(index + 1) % self.targets.len()])
    }

    /// Up to `max` distinct targets, starting at `primary` and walking the
    /// target list round-robin. A primary outside the list resolves alone.
    pub fn select_targets(
        &self,
        primary: UnitId,
        max: usize,
    ) -> ArrayVec<UnitId, { SimConfig::MAX_TARGETS }> {
        let mut selected = ArrayVec::new();
        let max = max.clamp(1, SimConfig::MAX_TARGETS);
        selected.push(primary);
        if !self.targets.contains(&primary) {
            return selected;
        }
        let mut current = primary;
        while selected.len() < max {
            match self.next_target(current) {
                Some(next) if next != primary => {
                    selected.push(next);
                    current = next;
                }
                _ => break,
            }
        }
        selected
    }

    pub(crate) fn reset(&mut self) {
        for unit in &mut self.units {
            unit.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_targets(count: u32) -> UnitRegistry {
        let mut units = UnitRegistry::new();
        units.add(UnitSpec::new("player"), TimerId(0));
        for i in 0..count {
            units.add(UnitSpec::hostile(format!("dummy {i}")), TimerId(i + 1));
        }
        units
    }

    #[test]
    fn stat_bag_starts_at_baselines() {
        let bag = StatBag::new();
        assert_eq!(bag.get(Stat::CastSpeed), 1.0);
        assert_eq!(bag.get(Stat::CritChance), 0.0);
    }

    #[test]
    fn next_target_wraps_around() {
        let units = registry_with_targets(3);
        assert_eq!(units.next_target(UnitId(1)), Some(UnitId(2)));
        assert_eq!(units.next_target(UnitId(3)), Some(UnitId(1)));
        assert_eq!(units.next_target(UnitId(0)), Some(UnitId(1)));
    }

    #[test]
    fn select_targets_is_round_robin_from_primary() {
        let units = registry_with_targets(4);
        let selected = units.select_targets(UnitId(3), 3);
        assert_eq!(selected.as_slice(), &[UnitId(3), UnitId(4), UnitId(1)]);

        let all = units.select_targets(UnitId(2), 10);
        assert_eq!(all.as_slice(), &[UnitId(2), UnitId(3), UnitId(4), UnitId(1)]);
    }

    #[test]
    fn duplicate_targets_are_rejected() {
        let mut units = registry_with_targets(3);
        let err = units
            .set_targets(vec![UnitId(1), UnitId(2), UnitId(2), UnitId(3)])
            .unwrap_err();
        assert!(matches!(err, SimError::DuplicateTarget(UnitId(2))));
        assert_eq!(units.targets(), &[UnitId(1), UnitId(2), UnitId(3)]);

        units.set_targets(vec![UnitId(3), UnitId(1)]).unwrap();
        let selected = units.select_targets(UnitId(1), 5);
        assert_eq!(selected.as_slice(), &[UnitId(1), UnitId(3)]);
    }

    #[test]
    fn primary_outside_target_list_resolves_alone() {
        let units = registry_with_targets(2);
        let selected = units.select_targets(UnitId(0), 5);
        assert_eq!(selected.as_slice(), &[UnitId(0)]);
    }

    #[test]
    fn resource_spend_never_goes_negative() {
        let mut meter = ResourceMeter::full(10.0);
        meter.spend(25.0);
        assert_eq!(meter.current, 0.0);
        meter.restore(40.0);
        assert_eq!(meter.current, 10.0);
    }
}
