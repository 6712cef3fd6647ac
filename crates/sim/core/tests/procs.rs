use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use sim_core::{
    AbilityId, AuraDescriptor, ChancePolicy, EventKind, HitEvent, HitOutcome, Normalizer,
    ProcMask, RefreshPolicy, SimEvent, SimulationClock, UnitId, UnitSpec, WatcherSpec,
};

fn setup(seed: u64) -> (SimulationClock, UnitId, UnitId) {
    let mut clock = SimulationClock::new(seed);
    let player = clock.add_unit(UnitSpec::new("player"));
    let dummy = clock.add_unit(UnitSpec::hostile("dummy"));
    (clock, player, dummy)
}

fn hit(clock: &SimulationClock, caster: UnitId, target: UnitId, mask: ProcMask) -> SimEvent {
    SimEvent::HitDealt(HitEvent {
        at: clock.now(),
        caster,
        target,
        ability: AbilityId(0),
        outcome: HitOutcome::Hit,
        amount: 10.0,
        proc_mask: mask,
    })
}

fn counting(
    clock: &mut SimulationClock,
    spec: impl FnOnce(Rc<Cell<u32>>) -> WatcherSpec,
) -> Rc<Cell<u32>> {
    let count = Rc::new(Cell::new(0));
    clock.register_watcher(spec(count.clone())).unwrap();
    count
}

fn bump(
    count: Rc<Cell<u32>>,
) -> impl Fn(&mut SimulationClock, &SimEvent) -> Result<(), sim_core::SimError> {
    move |_, _| {
        count.set(count.get() + 1);
        Ok(())
    }
}

#[test]
fn flat_chance_edges_are_exact() {
    let (mut clock, player, dummy) = setup(5);
    let never = counting(&mut clock, |count| {
        WatcherSpec::new("never", player, EventKind::HitDealt, ChancePolicy::Flat(0.0), bump(count))
    });
    let always = counting(&mut clock, |count| {
        WatcherSpec::new(
            "always",
            player,
            EventKind::HitDealt,
            ChancePolicy::Flat(1.0),
            bump(count),
        )
    });

    for _ in 0..10_000 {
        let event = hit(&clock, player, dummy, ProcMask::MELEE_AUTO);
        clock.emit(event).unwrap();
    }
    assert_eq!(never.get(), 0);
    assert_eq!(always.get(), 10_000);
}

#[test]
fn flat_chance_is_roughly_honoured() {
    let (mut clock, player, dummy) = setup(17);
    let procs = counting(&mut clock, |count| {
        WatcherSpec::new("coin", player, EventKind::HitDealt, ChancePolicy::Flat(0.25), bump(count))
    });
    for _ in 0..20_000 {
        let event = hit(&clock, player, dummy, ProcMask::SPELL);
        clock.emit(event).unwrap();
    }
    let rate = f64::from(procs.get()) / 20_000.0;
    assert!((0.22..0.28).contains(&rate), "rate {rate}");
}

#[test]
fn watchers_only_see_their_unit_and_kind() {
    let (mut clock, player, dummy) = setup(1);
    let procs = counting(&mut clock, |count| {
        WatcherSpec::new("mine", player, EventKind::HitDealt, ChancePolicy::Flat(1.0), bump(count))
    });
    let event = hit(&clock, dummy, player, ProcMask::MELEE_AUTO);
    clock.emit(event).unwrap();
    let tick = SimEvent::PeriodicTick(sim_core::TickEvent {
        at: clock.now(),
        caster: player,
        target: dummy,
        ability: AbilityId(0),
        tick: 1,
        amount: 1.0,
        proc_mask: ProcMask::PERIODIC,
    });
    clock.emit(tick).unwrap();
    assert_eq!(procs.get(), 0);
}

#[test]
fn proc_mask_and_predicate_filter_before_rolling() {
    let (mut clock, player, dummy) = setup(2);
    let melee_only = counting(&mut clock, |count| {
        WatcherSpec::new("melee", player, EventKind::HitDealt, ChancePolicy::Flat(1.0), bump(count))
            .with_proc_mask(ProcMask::MELEE)
            .with_predicate(|event| event.outcome().is_some_and(HitOutcome::landed))
    });

    for mask in [ProcMask::SPELL, ProcMask::MELEE_SPECIAL, ProcMask::PROC, ProcMask::MELEE_AUTO] {
        let event = hit(&clock, player, dummy, mask);
        clock.emit(event).unwrap();
    }
    let mut missed = hit(&clock, player, dummy, ProcMask::MELEE_AUTO);
    if let SimEvent::HitDealt(event) = &mut missed {
        event.outcome = HitOutcome::Miss;
    }
    clock.emit(missed).unwrap();

    assert_eq!(melee_only.get(), 2);
}

#[test]
fn internal_cooldown_blocks_without_consuming_rolls() {
    let (mut clock, player, dummy) = setup(8);
    let procs = counting(&mut clock, |count| {
        WatcherSpec::new("icd", player, EventKind::HitDealt, ChancePolicy::Flat(1.0), bump(count))
            .with_icd(Duration::from_secs(10))
    });

    for second in 0..25 {
        clock.run_until(Duration::from_secs(second)).unwrap();
        let event = hit(&clock, player, dummy, ProcMask::MELEE_AUTO);
        clock.emit(event).unwrap();
    }
    // t=0, t=10, t=20.
    assert_eq!(procs.get(), 3);
}

#[test]
fn gated_watchers_are_silent_while_their_aura_is_down() {
    let (mut clock, player, dummy) = setup(3);
    let aura = clock
        .register_aura(
            AuraDescriptor::new(player, "Enrage", RefreshPolicy::KeepStacks)
                .duration(Duration::from_secs(5)),
        )
        .unwrap();
    let count = Rc::new(Cell::new(0));
    let id = clock
        .register_watcher(
            WatcherSpec::new(
                "enraged strikes",
                player,
                EventKind::HitDealt,
                ChancePolicy::Flat(1.0),
                bump(count.clone()),
            )
            .while_active(aura),
        )
        .unwrap();

    let event = hit(&clock, player, dummy, ProcMask::MELEE_AUTO);
    clock.emit(event).unwrap();
    clock.activate(aura).unwrap();
    let event = hit(&clock, player, dummy, ProcMask::MELEE_AUTO);
    clock.emit(event).unwrap();

    assert_eq!(count.get(), 1);
    let metrics = clock.watcher_metrics(id).unwrap();
    assert_eq!(metrics.eligible, 1);
    assert_eq!(metrics.procs, 1);
}

#[test]
fn ppm_since_last_event_follows_the_interval() {
    // 60 PPM normalised against a 1s gap is a guaranteed proc; a 0s gap never procs.
    let (mut clock, player, dummy) = setup(4);
    let procs = counting(&mut clock, |count| {
        WatcherSpec::new(
            "ppm",
            player,
            EventKind::HitDealt,
            ChancePolicy::ppm(60.0, Normalizer::SinceLastEvent {
                initial: Duration::from_secs(1),
            }),
            bump(count),
        )
    });

    for second in 1..=10 {
        clock.run_until(Duration::from_secs(second)).unwrap();
        let event = hit(&clock, player, dummy, ProcMask::MELEE_AUTO);
        clock.emit(event.clone()).unwrap();
        clock.emit(event).unwrap();
    }
    assert_eq!(procs.get(), 10);
}

#[test]
fn proc_streams_ignore_unrelated_watchers() {
    fn outcomes(extra: bool) -> Vec<bool> {
        let (mut clock, player, dummy) = setup(1234);
        if extra {
            clock
                .register_watcher(WatcherSpec::new(
                    "unrelated",
                    player,
                    EventKind::HitDealt,
                    ChancePolicy::Flat(0.5),
                    |_, _| Ok(()),
                ))
                .unwrap();
        }
        let log = Rc::new(std::cell::RefCell::new(Vec::new()));
        let first = log.clone();
        clock
            .register_watcher(WatcherSpec::new(
                "tracked",
                player,
                EventKind::HitDealt,
                ChancePolicy::Flat(0.3),
                move |clock, _| {
                    first.borrow_mut().push(clock.now());
                    Ok(())
                },
            ))
            .unwrap();
        let mut procced = Vec::new();
        for step in 0..200 {
            clock.run_until(Duration::from_millis(step * 100)).unwrap();
            let before = log.borrow().len();
            let event = hit(&clock, player, dummy, ProcMask::MELEE_AUTO);
            clock.emit(event).unwrap();
            procced.push(log.borrow().len() > before);
        }
        procced
    }

    assert_eq!(outcomes(false), outcomes(true));
}

#[test]
fn inactive_aura_event_hook_acts_as_standing_watcher() {
    let (mut clock, player, dummy) = setup(6);
    let buff = clock
        .register_aura(
            AuraDescriptor::new(player, "Momentum", RefreshPolicy::ResetToOne)
                .duration(Duration::from_secs(4)),
        )
        .unwrap();
    clock
        .register_aura(
            AuraDescriptor::new(player, "Momentum trigger", RefreshPolicy::KeepStacks)
                .on_hit_dealt(move |clock, _, hit| {
                    if hit.outcome.is_crit() {
                        clock.activate(buff)?;
                    }
                    Ok(())
                }),
        )
        .unwrap();

    let event = hit(&clock, player, dummy, ProcMask::SPELL);
    clock.emit(event).unwrap();
    assert!(!clock.is_active(buff).unwrap());

    let mut crit = hit(&clock, player, dummy, ProcMask::SPELL);
    if let SimEvent::HitDealt(event) = &mut crit {
        event.outcome = HitOutcome::Crit;
    }
    clock.emit(crit).unwrap();
    assert!(clock.is_active(buff).unwrap());
}
