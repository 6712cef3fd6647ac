use std::time::Duration;

use crate::error::{EngineError, ErrorSeverity, SimError};
use crate::unit::UnitId;

use super::AbilityId;

/// Reasons a cast request is refused.
///
/// Every variant except [`CastError::Engine`] is raised before any state
/// changes, so the caller may simply try again later.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CastError {
    #[error("unknown ability {0}")]
    UnknownAbility(AbilityId),

    #[error("unknown unit {0}")]
    UnknownUnit(UnitId),

    #[error("caster is busy casting until {until:?}")]
    CasterBusy { until: Duration },

    #[error("global cooldown ready at {ready_at:?}")]
    OnGlobalCooldown { ready_at: Duration },

    #[error("ability on cooldown until {ready_at:?}")]
    OnCooldown { ready_at: Duration },

    #[error("insufficient resource: need {required}, have {available}")]
    InsufficientResource { required: f64, available: f64 },

    #[error(transparent)]
    Engine(#[from] SimError),
}

impl EngineError for CastError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::UnknownAbility(_) | Self::UnknownUnit(_) => ErrorSeverity::Validation,
            Self::CasterBusy { .. }
            | Self::OnGlobalCooldown { .. }
            | Self::OnCooldown { .. }
            | Self::InsufficientResource { .. } => ErrorSeverity::Recoverable,
            Self::Engine(inner) => inner.severity(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownAbility(_) => "UNKNOWN_ABILITY",
            Self::UnknownUnit(_) => "UNKNOWN_UNIT",
            Self::CasterBusy { .. } => "CASTER_BUSY",
            Self::OnGlobalCooldown { .. } => "ON_GLOBAL_COOLDOWN",
            Self::OnCooldown { .. } => "ON_COOLDOWN",
            Self::InsufficientResource { .. } => "INSUFFICIENT_RESOURCE",
            Self::Engine(inner) => inner.error_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_failures_are_recoverable() {
        let err = CastError::OnCooldown {
            ready_at: Duration::from_secs(6),
        };
        assert!(err.severity().is_recoverable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn engine_failures_keep_their_severity() {
        let err = CastError::from(SimError::InvalidSchedule {
            at: Duration::ZERO,
            now: Duration::from_secs(1),
        });
        assert!(err.is_fatal());
        assert_eq!(err.error_code(), "INVALID_SCHEDULE");
    }
}
