//! Common error infrastructure for sim-core.
//!
//! [`SimError`] covers every condition that can invalidate a simulation run.
//! Pipeline validation failures have their own type, [`CastError`](crate::CastError),
//! because they are expected during normal play and never corrupt state.
//!
//! # Propagation
//!
//! - **Recoverable / Validation** errors are returned to the caller and leave
//!   the clock untouched.
//! - **Fatal** errors abort the current run. The clock remembers the first
//!   fatal error and refuses to advance until the next `reset`.

use std::time::Duration;

use crate::ability::{AbilityId, CastError};
use crate::aura::{AuraHandle, HookKind};
use crate::proc::WatcherId;
use crate::timer::TimerId;
use crate::unit::UnitId;

/// Severity level of an error, used for categorization and recovery strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Temporary condition; the same request may succeed later in the run.
    ///
    /// Examples: ability on cooldown, caster still casting
    Recoverable,

    /// Invalid input, should not retry without changes.
    ///
    /// Examples: unknown aura handle, duplicate aura label
    Validation,

    /// Unexpected state inconsistency inside the engine.
    Internal,

    /// The run is invalid and must be discarded.
    ///
    /// Examples: scheduling in the past, a hook panicked
    Fatal,
}

impl ErrorSeverity {
    /// Returns a human-readable description of this severity level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recoverable => "recoverable",
            Self::Validation => "validation",
            Self::Internal => "internal",
            Self::Fatal => "fatal",
        }
    }

    /// Returns true if this error is potentially recoverable.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable)
    }

    /// Returns true if this error indicates an internal bug or a dead run.
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal | Self::Fatal)
    }
}

/// Common trait for all sim-core errors.
pub trait EngineError: std::fmt::Display + std::fmt::Debug {
    /// Returns the severity level of this error.
    fn severity(&self) -> ErrorSeverity;

    /// Returns a static string identifier for this error variant.
    fn error_code(&self) -> &'static str;

    /// Returns true when the error invalidates the current run.
    fn is_fatal(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Fatal)
    }
}

/// Errors raised by the simulation engine.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SimError {
    #[error("cannot schedule an action at {at:?}: clock is already at {now:?}")]
    InvalidSchedule { at: Duration, now: Duration },

    #[error("{delay:?} after {now:?} is past the end of simulated time")]
    TimeOverflow { now: Duration, delay: Duration },

    #[error("unknown rng stream {0:?}")]
    UnknownRngStream(String),

    #[error("unknown aura {0}")]
    UnknownAura(AuraHandle),

    #[error("unknown unit {0}")]
    UnknownUnit(UnitId),

    #[error("unknown timer {0}")]
    UnknownTimer(TimerId),

    #[error("unknown watcher {0}")]
    UnknownWatcher(WatcherId),

    #[error("unknown ability {0}")]
    UnknownAbility(AbilityId),

    #[error("unit {0} appears more than once in the target list")]
    DuplicateTarget(UnitId),

    #[error("aura '{label}' is already registered on unit {unit}")]
    DuplicateAura { unit: UnitId, label: String },

    #[error("{hook} hook of '{origin}' panicked: {message}")]
    HookPanic {
        origin: String,
        hook: HookKind,
        message: String,
    },

    #[error("{hook} hook of '{origin}' failed: {cause}")]
    HookFailed {
        origin: String,
        hook: HookKind,
        cause: Box<SimError>,
    },

    #[error("hook chain too deep: '{origin}' reached depth {depth}")]
    HookChainTooDeep { origin: String, depth: usize },

    #[error("clock stalled at {at:?}: {actions} actions fired without time advancing")]
    StalledClock { at: Duration, actions: usize },

    #[error("run was aborted and must be reset: {cause}")]
    RunAborted { cause: Box<SimError> },

    #[error("cast rejected: {0}")]
    CastRejected(Box<CastError>),
}

impl SimError {
    /// Returns true for errors that already carry hook attribution.
    pub(crate) fn is_hook_failure(&self) -> bool {
        matches!(
            self,
            Self::HookPanic { .. }
                | Self::HookFailed { .. }
                | Self::HookChainTooDeep { .. }
                | Self::StalledClock { .. }
        )
    }
}

impl EngineError for SimError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::UnknownRngStream(_)
            | Self::UnknownAura(_)
            | Self::UnknownUnit(_)
            | Self::UnknownTimer(_)
            | Self::UnknownWatcher(_)
            | Self::UnknownAbility(_)
            | Self::DuplicateAura { .. }
            | Self::DuplicateTarget(_)
            | Self::CastRejected(_) => ErrorSeverity::Validation,
            Self::InvalidSchedule { .. }
            | Self::TimeOverflow { .. }
            | Self::HookPanic { .. }
            | Self::HookFailed { .. }
            | Self::HookChainTooDeep { .. }
            | Self::StalledClock { .. }
            | Self::RunAborted { .. } => ErrorSeverity::Fatal,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidSchedule { .. } => "INVALID_SCHEDULE",
            Self::TimeOverflow { .. } => "TIME_OVERFLOW",
            Self::UnknownRngStream(_) => "UNKNOWN_RNG_STREAM",
            Self::UnknownAura(_) => "UNKNOWN_AURA",
            Self::UnknownUnit(_) => "UNKNOWN_UNIT",
            Self::UnknownTimer(_) => "UNKNOWN_TIMER",
            Self::UnknownWatcher(_) => "UNKNOWN_WATCHER",
            Self::UnknownAbility(_) => "UNKNOWN_ABILITY",
            Self::DuplicateAura { .. } => "DUPLICATE_AURA",
            Self::DuplicateTarget(_) => "DUPLICATE_TARGET",
            Self::HookPanic { .. } => "HOOK_PANIC",
            Self::HookFailed { .. } => "HOOK_FAILED",
            Self::HookChainTooDeep { .. } => "HOOK_CHAIN_TOO_DEEP",
            Self::StalledClock { .. } => "STALLED_CLOCK",
            Self::RunAborted { .. } => "RUN_ABORTED",
            Self::CastRejected(_) => "CAST_REJECTED",
        }
    }
}

impl From<CastError> for SimError {
    fn from(err: CastError) -> Self {
        match err {
            CastError::Engine(inner) => inner,
            other => Self::CastRejected(Box::new(other)),
        }
    }
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduling_in_the_past_is_fatal() {
        let err = SimError::InvalidSchedule {
            at: Duration::from_secs(1),
            now: Duration::from_secs(2),
        };
        assert!(err.is_fatal());
        assert_eq!(err.error_code(), "INVALID_SCHEDULE");
    }

    #[test]
    fn unknown_stream_is_a_validation_error() {
        let err = SimError::UnknownRngStream(String::new());
        assert_eq!(err.severity(), ErrorSeverity::Validation);
        assert!(!err.severity().is_internal());
    }

    #[test]
    fn engine_cast_errors_unwrap_to_the_engine_error() {
        let inner = SimError::UnknownUnit(UnitId(7));
        let converted = SimError::from(CastError::Engine(inner));
        assert!(matches!(converted, SimError::UnknownUnit(UnitId(7))));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
