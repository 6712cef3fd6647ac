//! Entity-visible simulation events.
//!
//! The ability pipeline emits these. Aura event hooks and proc watchers
//! observe them.

use std::time::Duration;

use bitflags::bitflags;

use crate::ability::AbilityId;
use crate::unit::UnitId;

bitflags! {
    /// Classifies what produced an event, for proc filtering.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ProcMask: u32 {
        const MELEE_AUTO    = 1 << 0;
        const MELEE_SPECIAL = 1 << 1;
        const RANGED        = 1 << 2;
        const SPELL         = 1 << 3;
        const PERIODIC      = 1 << 4;
        /// Produced by a proc; watchers usually exclude it to avoid proc chains.
        const PROC          = 1 << 5;

        const MELEE = Self::MELEE_AUTO.bits() | Self::MELEE_SPECIAL.bits();
    }
}

/// Discriminant of [`SimEvent`], used to index watchers.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, strum::EnumIter,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    CastComplete,
    HitDealt,
    PeriodicTick,
}

/// Result of a single hit roll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
pub enum HitOutcome {
    Miss,
    Hit,
    Crit,
}

impl HitOutcome {
    pub const fn landed(self) -> bool {
        !matches!(self, HitOutcome::Miss)
    }

    pub const fn is_crit(self) -> bool {
        matches!(self, HitOutcome::Crit)
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CastEvent {
    pub at: Duration,
    pub caster: UnitId,
    pub ability: AbilityId,
    pub target: UnitId,
    pub proc_mask: ProcMask,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HitEvent {
    pub at: Duration,
    pub caster: UnitId,
    pub target: UnitId,
    pub ability: AbilityId,
    pub outcome: HitOutcome,
    pub amount: f64,
    pub proc_mask: ProcMask,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TickEvent {
    pub at: Duration,
    pub caster: UnitId,
    pub target: UnitId,
    pub ability: AbilityId,
    /// 1-based index of the tick within its application.
    pub tick: u32,
    pub amount: f64,
    pub proc_mask: ProcMask,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SimEvent {
    CastComplete(CastEvent),
    HitDealt(HitEvent),
    PeriodicTick(TickEvent),
}

impl SimEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SimEvent::CastComplete(_) => EventKind::CastComplete,
            SimEvent::HitDealt(_) => EventKind::HitDealt,
            SimEvent::PeriodicTick(_) => EventKind::PeriodicTick,
        }
    }

    /// Unit whose auras and watchers observe the event.
    pub fn source(&self) -> UnitId {
        match self {
            SimEvent::CastComplete(e) => e.caster,
            SimEvent::HitDealt(e) => e.caster,
            SimEvent::PeriodicTick(e) => e.caster,
        }
    }

    pub fn target(&self) -> UnitId {
        match self {
            SimEvent::CastComplete(e) => e.target,
            SimEvent::HitDealt(e) => e.target,
            SimEvent::PeriodicTick(e) => e.target,
        }
    }

    pub fn ability(&self) -> AbilityId {
        match self {
            SimEvent::CastComplete(e) => e.ability,
            SimEvent::HitDealt(e) => e.ability,
            SimEvent::PeriodicTick(e) => e.ability,
        }
    }

    pub fn proc_mask(&self) -> ProcMask {
        match self {
            SimEvent::CastComplete(e) => e.proc_mask,
            SimEvent::HitDealt(e) => e.proc_mask,
            SimEvent::PeriodicTick(e) => e.proc_mask,
        }
    }

    /// Hit outcome for hit events; periodic ticks always land.
    pub fn outcome(&self) -> Option<HitOutcome> {
        match self {
            SimEvent::CastComplete(_) => None,
            SimEvent::HitDealt(e) => Some(e.outcome),
            SimEvent::PeriodicTick(_) => Some(HitOutcome::Hit),
        }
    }
}
