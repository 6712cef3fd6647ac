//! Demonstration content: one attacker against a pack of dummies.
//!
//! Small on purpose. It exists to drive every engine feature from a real
//! rotation: an auto-attack loop, a cooldown-gated strike, a cast-time chain
//! spell, a periodic bleed, a stacking haste buff consumed by swings, a PPM
//! weapon proc that debuffs its target, and a flat-chance clearcasting proc
//! consumed after a batch window.

use std::rc::Rc;
use std::time::Duration;

use sim_core::{
    AbilityDescriptor, AbilityFlags, AbilityId, AbilitySelector, AuraDescriptor, AuraHandle,
    CastError, ChancePolicy, CostModifier, EngineError, EventKind, HitEvent, HitOutcome,
    Normalizer, PeriodicConfig, ProcMask, RefreshPolicy, SimError, SimEvent, SimulationClock,
    Stat, StatBag, UnitId, UnitSpec, WatcherSpec,
};

const SWING_INTERVAL: Duration = Duration::from_millis(2600);
const DECISION_RETRY: Duration = Duration::from_millis(100);
const REGEN_INTERVAL: Duration = Duration::from_secs(2);
const REGEN_AMOUNT: f64 = 8.0;

const FLURRY_HASTE: f64 = 0.3;
const FLURRY_STACKS: u32 = 3;
const FLURRY_CONSUME_ICD: Duration = Duration::from_millis(500);
const THUNDER_PPM: f64 = 6.0;
const THUNDER_DAMAGE: f64 = 45.0;
const CLEARCASTING_CHANCE: f64 = 0.10;

pub const THUNDERSTRUCK: &str = "Thunderstruck";

/// Handles of everything the scenario registered.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub player: UnitId,
    pub targets: Vec<UnitId>,
    pub auto_attack: AbilityId,
    pub strike: AbilityId,
    pub chain_bolt: AbilityId,
    pub rend: AbilityId,
    pub flurry: AuraHandle,
    pub clearcasting: AuraHandle,
}

impl Scenario {
    fn primary(&self) -> UnitId {
        self.targets[0]
    }
}

/// Registers the scenario's units, abilities, auras and watchers on a
/// fresh clock, plus the reset listeners that start its loops.
pub fn build(clock: &mut SimulationClock, target_count: usize) -> Result<Scenario, SimError> {
    let player = clock.add_unit(
        UnitSpec::new("player")
            .with_stats(
                StatBag::new()
                    .with(Stat::HitChance, 0.02)
                    .with(Stat::CritChance, 0.25),
            )
            .with_resource(100.0),
    );
    let targets: Vec<UnitId> = (1..=target_count.max(1))
        .map(|index| clock.add_unit(UnitSpec::hostile(format!("dummy {index}"))))
        .collect();

    let auto_attack = clock.register_ability(
        AbilityDescriptor::new(player, "Auto Attack")
            .flags(AbilityFlags::OFF_GCD | AbilityFlags::NO_CAST_EVENT)
            .proc_mask(ProcMask::MELEE_AUTO)
            .base_amount(40.0),
    )?;
    let strike = clock.register_ability(
        AbilityDescriptor::new(player, "Strike")
            .cost(20.0)
            .cooldown(Duration::from_secs(6))
            .proc_mask(ProcMask::MELEE_SPECIAL)
            .base_amount(90.0),
    )?;
    let chain_bolt = clock.register_ability(
        AbilityDescriptor::new(player, "Chain Bolt")
            .cost(35.0)
            .cast_time(Duration::from_secs(2))
            .proc_mask(ProcMask::SPELL)
            .base_amount(60.0)
            .max_targets(3),
    )?;
    let rend = clock.register_ability(
        AbilityDescriptor::new(player, "Rend")
            .cost(10.0)
            .proc_mask(ProcMask::MELEE_SPECIAL)
            .base_amount(15.0)
            .periodic(PeriodicConfig {
                ticks: 5,
                interval: Duration::from_secs(3),
                amount_per_tick: 12.0,
            }),
    )?;

    let flurry = register_flurry(clock, player)?;
    let clearcasting = register_clearcasting(clock, player)?;
    register_thunder(clock, player, &targets)?;

    let scenario = Rc::new(Scenario {
        player,
        targets,
        auto_attack,
        strike,
        chain_bolt,
        rend,
        flurry,
        clearcasting,
    });

    clock.on_reset_listener("resource regen", move |clock| {
        clock.schedule_in(REGEN_INTERVAL, move |clock| regen(clock, player))
    });
    let swings = Rc::clone(&scenario);
    clock.on_reset_listener("auto attack", move |clock| {
        let scenario = Rc::clone(&swings);
        clock.schedule(clock.now(), move |clock| swing(clock, scenario))
    });
    let rotation = Rc::clone(&scenario);
    clock.on_reset_listener("rotation", move |clock| {
        let scenario = Rc::clone(&rotation);
        clock.schedule(clock.now(), move |clock| decide(clock, scenario))
    });

    Ok(Scenario::clone(&scenario))
}

/// Melee crits grant three stacks of haste; each swing spends one, at most
/// one per consumption window.
fn register_flurry(clock: &mut SimulationClock, player: UnitId) -> Result<AuraHandle, SimError> {
    let consume = clock.new_cooldown(FLURRY_CONSUME_ICD);
    let flurry = clock.register_aura(
        AuraDescriptor::new(player, "Flurry", RefreshPolicy::ResetToMax)
            .duration(Duration::from_secs(15))
            .max_stacks(FLURRY_STACKS)
            .on_gain(move |clock, _| clock.add_stat(player, Stat::CastSpeed, FLURRY_HASTE))
            .on_expire(move |clock, _| clock.add_stat(player, Stat::CastSpeed, -FLURRY_HASTE))
            .on_hit_dealt(move |clock, aura, hit| {
                if !hit.proc_mask.contains(ProcMask::MELEE_AUTO)
                    || !clock.is_active(aura)?
                    || !clock.cooldown_ready(&consume)?
                {
                    return Ok(());
                }
                clock.use_cooldown(&consume)?;
                clock.remove_stack(aura)
            }),
    )?;

    clock.register_watcher(
        WatcherSpec::new(
            "Flurry",
            player,
            EventKind::HitDealt,
            ChancePolicy::Flat(1.0),
            move |clock, _| {
                clock.activate(flurry)?;
                clock.set_stacks(flurry, FLURRY_STACKS)
            },
        )
        .with_proc_mask(ProcMask::MELEE)
        .with_predicate(|event| event.outcome().is_some_and(HitOutcome::is_crit)),
    )?;
    Ok(flurry)
}

/// Spells may make the next spell free. The free spell's own completion
/// schedules the removal one batch window later, unless a new proc landed
/// in the meantime.
fn register_clearcasting(
    clock: &mut SimulationClock,
    player: UnitId,
) -> Result<AuraHandle, SimError> {
    let clearcasting = clock.register_aura(
        AuraDescriptor::new(player, "Clearcasting", RefreshPolicy::KeepStacks)
            .duration(Duration::from_secs(15))
            .cost_modifier(CostModifier::new(
                AbilitySelector::Mask(ProcMask::SPELL),
                -1.0,
            ))
            .on_cast_complete(|clock, aura, cast| {
                if !cast.proc_mask.contains(ProcMask::SPELL) || !clock.is_active(aura)? {
                    return Ok(());
                }
                let consumed = clock.expires_at(aura)?;
                clock.schedule_batched(move |clock| {
                    if clock.expires_at(aura)? == consumed {
                        clock.deactivate(aura)?;
                    }
                    Ok(())
                })
            }),
    )?;

    clock.register_watcher(
        WatcherSpec::new(
            "Clearcasting",
            player,
            EventKind::CastComplete,
            ChancePolicy::Flat(CLEARCASTING_CHANCE),
            move |clock, _| clock.activate(clearcasting),
        )
        .with_proc_mask(ProcMask::SPELL),
    )?;
    Ok(clearcasting)
}

/// Weapon proc: extra damage plus a debuff on whoever was hit.
fn register_thunder(
    clock: &mut SimulationClock,
    player: UnitId,
    targets: &[UnitId],
) -> Result<(), SimError> {
    for &target in targets {
        clock.register_aura(
            AuraDescriptor::new(target, THUNDERSTRUCK, RefreshPolicy::KeepStacks)
                .duration(Duration::from_secs(10)),
        )?;
    }

    clock.register_watcher(
        WatcherSpec::new(
            "Thunder",
            player,
            EventKind::HitDealt,
            ChancePolicy::ppm(THUNDER_PPM, Normalizer::Fixed(SWING_INTERVAL)),
            move |clock, event| {
                let target = event.target();
                if let Some(debuff) = clock.aura_by_label(target, THUNDERSTRUCK) {
                    clock.activate(debuff)?;
                }
                clock.unit_mut(player)?.damage_dealt += THUNDER_DAMAGE;
                let hit = HitEvent {
                    at: clock.now(),
                    caster: player,
                    target,
                    ability: event.ability(),
                    outcome: HitOutcome::Hit,
                    amount: THUNDER_DAMAGE,
                    proc_mask: ProcMask::PROC,
                };
                clock.emit_deferred(SimEvent::HitDealt(hit))
            },
        )
        .with_proc_mask(ProcMask::MELEE)
        .with_predicate(|event| event.outcome().is_some_and(HitOutcome::landed)),
    )?;
    Ok(())
}

fn regen(clock: &mut SimulationClock, player: UnitId) -> Result<(), SimError> {
    clock.unit_mut(player)?.resource.restore(REGEN_AMOUNT);
    clock.schedule_in(REGEN_INTERVAL, move |clock| regen(clock, player))
}

/// Swings at the primary target unless a cast is in progress. Haste
/// shortens the time to the next swing.
fn swing(clock: &mut SimulationClock, scenario: Rc<Scenario>) -> Result<(), SimError> {
    match clock.cast(scenario.auto_attack, scenario.primary()) {
        Ok(_) | Err(CastError::CasterBusy { .. }) => {}
        Err(err) => return Err(err.into()),
    }
    let speed = clock.stat(scenario.player, Stat::CastSpeed)?.max(0.1);
    clock.schedule_in(SWING_INTERVAL.div_f64(speed), move |clock| {
        swing(clock, scenario)
    })
}

/// Priority list: keep the bleed up, strike on cooldown, fill with bolts.
fn decide(clock: &mut SimulationClock, scenario: Rc<Scenario>) -> Result<(), SimError> {
    let primary = scenario.primary();
    let bleed_up = clock.is_periodic_active(scenario.rend, primary);
    let _cast = (!bleed_up && try_cast(clock, scenario.rend, primary)?)
        || try_cast(clock, scenario.strike, primary)?
        || try_cast(clock, scenario.chain_bolt, primary)?;

    let unit = clock.unit(scenario.player)?;
    let gcd_ready = clock.timer(unit.gcd)?.ready_at();
    let cast_done = unit.casting_until.unwrap_or_default();
    let next = gcd_ready
        .max(cast_done)
        .max(clock.now() + DECISION_RETRY);
    clock.schedule(next, move |clock| decide(clock, scenario))
}

/// Ok(false) when the cast was refused for a reason that clears with time.
fn try_cast(
    clock: &mut SimulationClock,
    ability: AbilityId,
    target: UnitId,
) -> Result<bool, SimError> {
    match clock.cast(ability, target) {
        Ok(_) => Ok(true),
        Err(err) if err.severity().is_recoverable() => Ok(false),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_runs_and_exercises_its_effects() {
        let mut clock = SimulationClock::new(7);
        let scenario = build(&mut clock, 3).unwrap();
        clock.reset(7).unwrap();
        clock.run_until(Duration::from_secs(300)).unwrap();
        let report = clock.finish().unwrap();

        assert!(report.dps(scenario.player) > 0.0);
        let flurry = report.aura(scenario.player, "Flurry").unwrap();
        assert!(flurry.activations > 0);
        let rend = clock.ability(scenario.rend).unwrap().metrics();
        assert!(rend.ticks > 0);
        let bolt = clock.ability(scenario.chain_bolt).unwrap().metrics();
        assert!(bolt.casts > 0);
        assert!(report.watcher("Thunder").unwrap().metrics.procs > 0);
        assert!(!clock.is_active(scenario.clearcasting).unwrap());
    }

    #[test]
    fn melee_crit_grants_full_flurry() {
        let mut clock = SimulationClock::new(3);
        let scenario = build(&mut clock, 1).unwrap();
        clock.reset(3).unwrap();

        let crit = SimEvent::HitDealt(HitEvent {
            at: clock.now(),
            caster: scenario.player,
            target: scenario.primary(),
            ability: scenario.strike,
            outcome: HitOutcome::Crit,
            amount: 100.0,
            proc_mask: ProcMask::MELEE_SPECIAL,
        });
        clock.emit(crit).unwrap();

        assert!(clock.is_active(scenario.flurry).unwrap());
        assert_eq!(clock.stacks(scenario.flurry).unwrap(), FLURRY_STACKS);
    }

    #[test]
    fn haste_is_removed_when_flurry_ends() {
        let mut clock = SimulationClock::new(9);
        let scenario = build(&mut clock, 1).unwrap();
        clock.reset(9).unwrap();
        clock.run_until(Duration::from_secs(120)).unwrap();
        clock.finish().unwrap();
        let speed = clock.stat(scenario.player, Stat::CastSpeed).unwrap();
        assert!((speed - 1.0).abs() < 1e-9);
    }
}
