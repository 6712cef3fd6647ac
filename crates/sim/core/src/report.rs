//! End-of-run summary.

use std::time::Duration;

use crate::ability::AbilityMetrics;
use crate::clock::SimulationClock;
use crate::error::SimError;
use crate::proc::WatcherMetrics;
use crate::unit::UnitId;

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnitReport {
    pub id: UnitId,
    pub name: String,
    pub damage_dealt: f64,
    pub resource_spent: f64,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AuraReport {
    pub unit: UnitId,
    pub label: String,
    pub activations: u32,
    pub refreshes: u32,
    pub uptime: Duration,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WatcherReport {
    pub label: String,
    pub metrics: WatcherMetrics,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AbilityReport {
    pub caster: UnitId,
    pub name: String,
    pub metrics: AbilityMetrics,
}

/// Counters of one finished run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunReport {
    pub seed: u64,
    pub end_time: Duration,
    pub units: Vec<UnitReport>,
    pub auras: Vec<AuraReport>,
    pub watchers: Vec<WatcherReport>,
    pub abilities: Vec<AbilityReport>,
}

impl RunReport {
    pub fn unit(&self, id: UnitId) -> Option<&UnitReport> {
        self.units.iter().find(|unit| unit.id == id)
    }

    pub fn aura(&self, unit: UnitId, label: &str) -> Option<&AuraReport> {
        self.auras
            .iter()
            .find(|aura| aura.unit == unit && aura.label == label)
    }

    pub fn watcher(&self, label: &str) -> Option<&WatcherReport> {
        self.watchers.iter().find(|watcher| watcher.label == label)
    }

    /// Damage per second of `unit` over the whole run.
    pub fn dps(&self, unit: UnitId) -> f64 {
        let secs = self.end_time.as_secs_f64();
        match self.unit(unit) {
            Some(report) if secs > 0.0 => report.damage_dealt / secs,
            _ => 0.0,
        }
    }
}

impl SimulationClock {
    /// Snapshot of the run so far. Open activations count toward uptime up
    /// to the current time.
    pub fn report(&self) -> RunReport {
        let now = self.now;
        RunReport {
            seed: self.rng.run_seed(),
            end_time: now,
            units: self
                .units
                .iter()
                .map(|unit| UnitReport {
                    id: unit.id,
                    name: unit.name.clone(),
                    damage_dealt: unit.damage_dealt,
                    resource_spent: unit.resource_spent,
                })
                .collect(),
            auras: self
                .auras
                .iter()
                .map(|aura| AuraReport {
                    unit: aura.unit(),
                    label: aura.label().to_owned(),
                    activations: aura.metrics().activations,
                    refreshes: aura.metrics().refreshes,
                    uptime: aura.uptime(now),
                })
                .collect(),
            watchers: self
                .procs
                .iter()
                .map(|(label, metrics)| WatcherReport {
                    label: label.to_owned(),
                    metrics,
                })
                .collect(),
            abilities: self
                .abilities
                .iter()
                .map(|ability| AbilityReport {
                    caster: ability.caster(),
                    name: ability.name().to_owned(),
                    metrics: ability.metrics(),
                })
                .collect(),
        }
    }

    /// Ends the run: every aura still active expires (firing `on_expire`),
    /// then the report is taken.
    pub fn finish(&mut self) -> Result<RunReport, SimError> {
        if let Some(cause) = self.failure() {
            return Err(SimError::RunAborted {
                cause: Box::new(cause.clone()),
            });
        }
        self.expire_all()?;
        Ok(self.report())
    }
}
