//! Per-aura lifecycle and event hooks.
//!
//! Every hook is an optional closure selected per aura instance at
//! construction. Hooks receive the clock so they can mutate any state,
//! schedule follow-ups or touch other auras. They must report problems by
//! returning `Err` (or panicking), never by leaving partial state behind:
//! the engine treats any hook failure as fatal to the run.

use std::rc::Rc;

use crate::clock::SimulationClock;
use crate::error::SimError;
use crate::event::{CastEvent, HitEvent, SimEvent, TickEvent};

use super::AuraHandle;

/// Hook fired on gain, expire, reset and init.
pub type LifecycleHook = Rc<dyn Fn(&mut SimulationClock, AuraHandle) -> Result<(), SimError>>;

/// Hook fired on every net stack change with `(old, new)`.
pub type StackChangeHook =
    Rc<dyn Fn(&mut SimulationClock, AuraHandle, u32, u32) -> Result<(), SimError>>;

/// Hook fired for an entity-visible event.
pub type EventHook =
    Rc<dyn Fn(&mut SimulationClock, AuraHandle, &SimEvent) -> Result<(), SimError>>;

/// Identifies which hook ran, for error attribution and logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum HookKind {
    Gain,
    Expire,
    StackChange,
    CastComplete,
    HitDealt,
    PeriodicTick,
    Reset,
    Init,
    /// A proc watcher's callback.
    Proc,
    /// A listener registered directly on the clock.
    Listener,
    /// A scheduled action.
    Action,
    /// An ability's on-landed callback.
    Ability,
}

/// The hook set of one aura.
#[derive(Clone, Default)]
pub struct AuraHooks {
    pub on_gain: Option<LifecycleHook>,
    pub on_expire: Option<LifecycleHook>,
    pub on_stack_change: Option<StackChangeHook>,
    pub on_cast_complete: Option<EventHook>,
    pub on_hit_dealt: Option<EventHook>,
    pub on_periodic_tick: Option<EventHook>,
    pub on_reset: Option<LifecycleHook>,
    pub on_init: Option<LifecycleHook>,
}

impl AuraHooks {
    pub(crate) fn lifecycle(&self, kind: HookKind) -> Option<LifecycleHook> {
        match kind {
            HookKind::Gain => self.on_gain.clone(),
            HookKind::Expire => self.on_expire.clone(),
            HookKind::Reset => self.on_reset.clone(),
            HookKind::Init => self.on_init.clone(),
            _ => None,
        }
    }

    pub(crate) fn for_event(&self, event: &SimEvent) -> Option<(HookKind, EventHook)> {
        match event {
            SimEvent::CastComplete(_) => self
                .on_cast_complete
                .clone()
                .map(|hook| (HookKind::CastComplete, hook)),
            SimEvent::HitDealt(_) => self
                .on_hit_dealt
                .clone()
                .map(|hook| (HookKind::HitDealt, hook)),
            SimEvent::PeriodicTick(_) => self
                .on_periodic_tick
                .clone()
                .map(|hook| (HookKind::PeriodicTick, hook)),
        }
    }
}

impl std::fmt::Debug for AuraHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuraHooks")
            .field("on_gain", &self.on_gain.is_some())
            .field("on_expire", &self.on_expire.is_some())
            .field("on_stack_change", &self.on_stack_change.is_some())
            .field("on_cast_complete", &self.on_cast_complete.is_some())
            .field("on_hit_dealt", &self.on_hit_dealt.is_some())
            .field("on_periodic_tick", &self.on_periodic_tick.is_some())
            .field("on_reset", &self.on_reset.is_some())
            .field("on_init", &self.on_init.is_some())
            .finish()
    }
}

pub(crate) fn cast_hook<F>(hook: F) -> EventHook
where
    F: Fn(&mut SimulationClock, AuraHandle, &CastEvent) -> Result<(), SimError> + 'static,
{
    Rc::new(move |clock, aura, event| match event {
        SimEvent::CastComplete(cast) => hook(clock, aura, cast),
        _ => Ok(()),
    })
}

pub(crate) fn hit_hook<F>(hook: F) -> EventHook
where
    F: Fn(&mut SimulationClock, AuraHandle, &HitEvent) -> Result<(), SimError> + 'static,
{
    Rc::new(move |clock, aura, event| match event {
        SimEvent::HitDealt(hit) => hook(clock, aura, hit),
        _ => Ok(()),
    })
}

pub(crate) fn tick_hook<F>(hook: F) -> EventHook
where
    F: Fn(&mut SimulationClock, AuraHandle, &TickEvent) -> Result<(), SimError> + 'static,
{
    Rc::new(move |clock, aura, event| match event {
        SimEvent::PeriodicTick(tick) => hook(clock, aura, tick),
        _ => Ok(()),
    })
}
