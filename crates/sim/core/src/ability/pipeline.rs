//! Cast sequencing.
//!
//! ```text
//! cast()          validate → start GCD/cooldown → schedule completion
//! complete_cast() resolve cost → per target: outcome, on_landed, HitDealt,
//!                 periodic → CastComplete
//! ```
//!
//! Targets resolve round-robin from the primary target, so chain effects
//! always hit in the same order for the same seed.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::aura::HookKind;
use crate::clock::{SimulationClock, deadline};
use crate::error::SimError;
use crate::event::{CastEvent, HitEvent, HitOutcome, ProcMask, SimEvent, TickEvent};
use crate::unit::{Stat, UnitId};

use super::{
    Ability, AbilityDescriptor, AbilityFlags, AbilityId, AbilityMetrics, CastError,
    PeriodicState,
};

/// Cast speed below this is treated as this.
const MIN_CAST_SPEED: f64 = 0.01;

/// An accepted cast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CastTicket {
    pub ability: AbilityId,
    pub caster: UnitId,
    pub target: UnitId,
    pub started_at: Duration,
    pub completes_at: Duration,
}

impl SimulationClock {
    /// Registers an ability, its outcome stream and its cooldown timer.
    pub fn register_ability(
        &mut self,
        descriptor: AbilityDescriptor,
    ) -> Result<AbilityId, SimError> {
        self.units.get(descriptor.caster)?;
        let outcome_key = format!("{}/outcome", descriptor.name);
        self.rng.register(&outcome_key)?;
        let cooldown = descriptor
            .cooldown
            .map(|duration| self.new_cooldown(duration));

        Ok(self.abilities.push(|id| Ability {
            id,
            name: descriptor.name.into(),
            caster: descriptor.caster,
            cost: descriptor.cost,
            cast_time: descriptor.cast_time,
            cooldown,
            flags: descriptor.flags,
            proc_mask: descriptor.proc_mask,
            base_amount: descriptor.base_amount,
            crit_multiplier: descriptor.crit_multiplier,
            max_targets: descriptor.max_targets,
            periodic: descriptor.periodic,
            on_landed: descriptor.on_landed,
            outcome_key: outcome_key.into(),
            metrics: AbilityMetrics::default(),
        }))
    }

    pub fn ability(&self, id: AbilityId) -> Result<&Ability, SimError> {
        self.abilities.get(id)
    }

    pub fn ability_by_name(&self, caster: UnitId, name: &str) -> Option<AbilityId> {
        self.abilities.find(caster, name)
    }

    /// True when [`cast`](Self::cast) would pass its readiness checks now.
    pub fn ability_ready(&self, id: AbilityId) -> Result<bool, SimError> {
        let ability = self.abilities.get(id)?;
        let caster = self.units.get(ability.caster)?;
        if caster.is_casting(self.now) {
            return Ok(false);
        }
        if !ability.flags.contains(AbilityFlags::OFF_GCD)
            && !self.timers.get(caster.gcd)?.is_ready(self.now)
        {
            return Ok(false);
        }
        match ability.cooldown {
            Some(cooldown) => cooldown.is_ready(&self.timers, self.now),
            None => Ok(true),
        }
    }

    /// Cost the ability would have right now: the base cost scaled by the
    /// modifiers of every active aura on the caster that selects it.
    pub fn resolve_cost(&self, id: AbilityId) -> Result<f64, SimError> {
        let ability = self.abilities.get(id)?;
        let mut scale = 1.0;
        for &handle in self.auras.on_unit(ability.caster) {
            let aura = self.auras.get(handle)?;
            if !aura.active {
                continue;
            }
            if let Some(modifier) = aura.cost_modifier.as_ref() {
                if modifier.applies_to(ability) {
                    scale += modifier.delta;
                }
            }
        }
        Ok(ability.cost * f64::max(0.0, scale))
    }

    /// Starts a cast on `target`.
    ///
    /// Validation failures change nothing. On success the global and
    /// ability cooldowns start immediately and completion is scheduled after
    /// the cast time, scaled by the caster's cast speed. Zero cast times
    /// still complete through the queue, behind anything already due now.
    pub fn cast(&mut self, id: AbilityId, target: UnitId) -> Result<CastTicket, CastError> {
        let now = self.now;
        let ability = self
            .abilities
            .get(id)
            .map_err(|_| CastError::UnknownAbility(id))?;
        self.units
            .get(target)
            .map_err(|_| CastError::UnknownUnit(target))?;
        let caster = self
            .units
            .get(ability.caster)
            .map_err(|_| CastError::UnknownUnit(ability.caster))?;

        if let Some(until) = caster.casting_until.filter(|&until| until > now) {
            return Err(CastError::CasterBusy { until });
        }
        let on_gcd = !ability.flags.contains(AbilityFlags::OFF_GCD);
        if on_gcd {
            let gcd = self.timers.get(caster.gcd)?;
            if !gcd.is_ready(now) {
                return Err(CastError::OnGlobalCooldown {
                    ready_at: gcd.ready_at(),
                });
            }
        }
        if let Some(cooldown) = ability.cooldown {
            if !cooldown.is_ready(&self.timers, now)? {
                return Err(CastError::OnCooldown {
                    ready_at: cooldown.ready_at(&self.timers)?,
                });
            }
        }
        let required = self.resolve_cost(id)?;
        if !caster.resource.can_afford(required) {
            return Err(CastError::InsufficientResource {
                required,
                available: caster.resource.current,
            });
        }

        let caster_id = ability.caster;
        let gcd = caster.gcd;
        let cooldown = ability.cooldown;
        let speed = caster.stats.get(Stat::CastSpeed).max(MIN_CAST_SPEED);
        let cast_time = Duration::try_from_secs_f64(ability.cast_time.as_secs_f64() / speed)
            .map_err(|_| SimError::TimeOverflow {
                now,
                delay: ability.cast_time,
            })?;
        let completes_at = deadline(now, cast_time)?;

        if on_gcd {
            let global_cooldown = self.config.global_cooldown;
            self.timers.get_mut(gcd)?.use_for(now, global_cooldown);
        }
        if let Some(cooldown) = cooldown {
            cooldown.use_at(&mut self.timers, now)?;
        }
        if !cast_time.is_zero() {
            self.units.get_mut(caster_id)?.casting_until = Some(completes_at);
        }
        self.schedule(completes_at, move |clock| clock.complete_cast(id, target))?;
        trace!(ability = %id, caster = %caster_id, %target, ?completes_at, "cast started");

        Ok(CastTicket {
            ability: id,
            caster: caster_id,
            target,
            started_at: now,
            completes_at,
        })
    }

    fn complete_cast(&mut self, id: AbilityId, target: UnitId) -> Result<(), SimError> {
        let now = self.now;
        let cost = self.resolve_cost(id)?;
        let ability = self.abilities.get(id)?;
        let caster_id = ability.caster;
        let name = ability.name.clone();
        let proc_mask = ability.proc_mask;
        let max_targets = ability.max_targets;
        let emit_cast = !ability.flags.contains(AbilityFlags::NO_CAST_EVENT);

        let caster = self.units.get_mut(caster_id)?;
        if caster.casting_until.is_some_and(|until| until <= now) {
            caster.casting_until = None;
        }
        if !caster.resource.can_afford(cost) {
            warn!(ability = %name, cost, available = caster.resource.current, "cast fizzled");
            self.abilities.get_mut(id)?.metrics.fizzles += 1;
            return Ok(());
        }
        caster.resource.spend(cost);
        caster.resource_spent += cost;
        self.abilities.get_mut(id)?.metrics.casts += 1;

        let targets = self.units.select_targets(target, max_targets);
        for target in targets {
            self.resolve_hit(id, target)?;
        }
        debug!(ability = %name, caster = %caster_id, %target, cost, "cast complete");

        if emit_cast {
            self.emit(SimEvent::CastComplete(CastEvent {
                at: now,
                caster: caster_id,
                ability: id,
                target,
                proc_mask,
            }))?;
        }
        Ok(())
    }

    fn resolve_hit(&mut self, id: AbilityId, target: UnitId) -> Result<(), SimError> {
        let outcome = self.roll_outcome(id)?;
        let ability = self.abilities.get(id)?;
        let caster_id = ability.caster;
        let name = ability.name.clone();
        let on_landed = ability.on_landed.clone();
        let has_periodic = ability.periodic.is_some();
        let damage_done = self.units.get(caster_id)?.stats.get(Stat::DamageDone);
        let amount = match outcome {
            HitOutcome::Miss => 0.0,
            HitOutcome::Hit => ability.base_amount * (1.0 + damage_done),
            HitOutcome::Crit => ability.base_amount * ability.crit_multiplier * (1.0 + damage_done),
        };
        let hit = HitEvent {
            at: self.now,
            caster: caster_id,
            target,
            ability: id,
            outcome,
            amount,
            proc_mask: ability.proc_mask,
        };

        self.units.get_mut(caster_id)?.damage_dealt += amount;
        let metrics = &mut self.abilities.get_mut(id)?.metrics;
        metrics.damage += amount;
        match outcome {
            HitOutcome::Miss => metrics.misses += 1,
            HitOutcome::Hit => metrics.hits += 1,
            HitOutcome::Crit => metrics.crits += 1,
        }

        if outcome.landed() {
            if let Some(on_landed) = on_landed {
                self.invoke_hook(&name, HookKind::Ability, |clock| on_landed(clock, &hit))?;
            }
        }
        self.emit(SimEvent::HitDealt(hit))?;
        if outcome.landed() && has_periodic {
            self.apply_periodic(id, target)?;
        }
        Ok(())
    }

    /// One uniform draw from the ability's own stream: miss below the miss
    /// chance, crit below miss + crit, hit otherwise.
    fn roll_outcome(&mut self, id: AbilityId) -> Result<HitOutcome, SimError> {
        let ability = self.abilities.get(id)?;
        let stats = &self.units.get(ability.caster)?.stats;
        let miss = if ability.flags.contains(AbilityFlags::CANNOT_MISS) {
            0.0
        } else {
            (self.config.base_miss_chance - stats.get(Stat::HitChance)).clamp(0.0, 1.0)
        };
        let crit = stats.get(Stat::CritChance).clamp(0.0, 1.0);
        let key = ability.outcome_key.clone();

        let roll = self.rng.uniform(&key)?;
        Ok(if roll < miss {
            HitOutcome::Miss
        } else if roll < miss + crit {
            HitOutcome::Crit
        } else {
            HitOutcome::Hit
        })
    }

    /// (Re)starts the tick chain of a periodic ability on `target`.
    fn apply_periodic(&mut self, id: AbilityId, target: UnitId) -> Result<(), SimError> {
        let Some(periodic) = self.abilities.get(id)?.periodic else {
            return Ok(());
        };
        let state = self.abilities.periodic.entry((id, target)).or_default();
        state.generation += 1;
        state.active = true;
        let generation = state.generation;
        self.schedule_in(periodic.interval, move |clock| {
            clock.periodic_tick(id, target, generation, 1)
        })
    }

    fn periodic_tick(
        &mut self,
        id: AbilityId,
        target: UnitId,
        generation: u64,
        tick: u32,
    ) -> Result<(), SimError> {
        if !self.periodic_current(id, target, generation) {
            return Ok(());
        }
        let ability = self.abilities.get(id)?;
        let Some(periodic) = ability.periodic else {
            return Ok(());
        };
        let caster_id = ability.caster;
        let proc_mask = ability.proc_mask | ProcMask::PERIODIC;
        let damage_done = self.units.get(caster_id)?.stats.get(Stat::DamageDone);
        let amount = periodic.amount_per_tick * (1.0 + damage_done);

        self.units.get_mut(caster_id)?.damage_dealt += amount;
        let metrics = &mut self.abilities.get_mut(id)?.metrics;
        metrics.ticks += 1;
        metrics.damage += amount;

        self.emit(SimEvent::PeriodicTick(TickEvent {
            at: self.now,
            caster: caster_id,
            target,
            ability: id,
            tick,
            amount,
            proc_mask,
        }))?;

        // A hook may have re-applied or cancelled the chain.
        if !self.periodic_current(id, target, generation) {
            return Ok(());
        }
        if tick < periodic.ticks {
            self.schedule_in(periodic.interval, move |clock| {
                clock.periodic_tick(id, target, generation, tick + 1)
            })
        } else {
            if let Some(state) = self.abilities.periodic.get_mut(&(id, target)) {
                state.active = false;
            }
            Ok(())
        }
    }

    fn periodic_current(&self, id: AbilityId, target: UnitId, generation: u64) -> bool {
        self.abilities
            .periodic
            .get(&(id, target))
            .is_some_and(|state| state.active && state.generation == generation)
    }

    /// Stops the tick chain of `id` on `target`. Returns whether one was
    /// running.
    pub fn cancel_periodic(&mut self, id: AbilityId, target: UnitId) -> Result<bool, SimError> {
        self.abilities.get(id)?;
        let Some(state) = self.abilities.periodic.get_mut(&(id, target)) else {
            return Ok(false);
        };
        let was_active = state.active;
        *state = PeriodicState {
            generation: state.generation + 1,
            active: false,
        };
        Ok(was_active)
    }

    pub fn is_periodic_active(&self, id: AbilityId, target: UnitId) -> bool {
        self.abilities
            .periodic
            .get(&(id, target))
            .is_some_and(|state| state.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::unit::{StatBag, UnitSpec};

    fn setup() -> (SimulationClock, UnitId, UnitId) {
        let config = SimConfig::default().with_base_miss_chance(0.0);
        let mut clock = SimulationClock::with_config(config, 3);
        let player = clock.add_unit(UnitSpec::new("player").with_resource(100.0));
        let dummy = clock.add_unit(UnitSpec::hostile("dummy"));
        (clock, player, dummy)
    }

    #[test]
    fn validation_failures_leave_no_trace() {
        let (mut clock, player, dummy) = setup();
        let expensive = clock
            .register_ability(AbilityDescriptor::new(player, "Nuke").cost(500.0))
            .unwrap();
        let err = clock.cast(expensive, dummy).unwrap_err();
        assert!(matches!(err, CastError::InsufficientResource { .. }));
        assert_eq!(clock.pending_actions(), 0);
        assert!(clock.ability_ready(expensive).unwrap());
    }

    #[test]
    fn global_cooldown_blocks_on_gcd_abilities_only() {
        let (mut clock, player, dummy) = setup();
        let strike = clock
            .register_ability(AbilityDescriptor::new(player, "Strike"))
            .unwrap();
        let kick = clock
            .register_ability(AbilityDescriptor::new(player, "Kick").flags(AbilityFlags::OFF_GCD))
            .unwrap();
        clock.cast(strike, dummy).unwrap();
        assert!(matches!(
            clock.cast(strike, dummy),
            Err(CastError::OnGlobalCooldown { .. })
        ));
        assert!(clock.cast(kick, dummy).is_ok());
    }

    #[test]
    fn cast_speed_shortens_cast_time() {
        let (mut clock, player, dummy) = setup();
        clock.add_stat(player, Stat::CastSpeed, 1.0).unwrap();
        let bolt = clock
            .register_ability(
                AbilityDescriptor::new(player, "Bolt").cast_time(Duration::from_secs(2)),
            )
            .unwrap();
        let ticket = clock.cast(bolt, dummy).unwrap();
        assert_eq!(ticket.completes_at, Duration::from_secs(1));
        assert!(matches!(
            clock.cast(bolt, dummy),
            Err(CastError::CasterBusy { .. })
        ));
    }

    #[test]
    fn guaranteed_crits_apply_the_multiplier() {
        let (mut clock, player, dummy) = setup();
        clock
            .unit_mut(player)
            .unwrap()
            .stats
            .set(Stat::CritChance, 1.0);
        let smash = clock
            .register_ability(
                AbilityDescriptor::new(player, "Smash")
                    .base_amount(100.0)
                    .crit_multiplier(1.5),
            )
            .unwrap();
        clock.cast(smash, dummy).unwrap();
        clock.run_until(Duration::from_secs(1)).unwrap();
        let metrics = clock.ability(smash).unwrap().metrics();
        assert_eq!(metrics.crits, 1);
        assert_eq!(metrics.damage, 150.0);
        assert_eq!(clock.unit(player).unwrap().damage_dealt, 150.0);
    }

    #[test]
    fn base_stats_are_kept_for_reset() {
        let (mut clock, player, _) = setup();
        clock.add_stat(player, Stat::DamageDone, 0.5).unwrap();
        clock.reset(1).unwrap();
        assert_eq!(clock.stat(player, Stat::DamageDone).unwrap(), 0.0);
        assert_eq!(
            clock.unit(player).unwrap().base_stats(),
            &StatBag::default()
        );
    }
}
