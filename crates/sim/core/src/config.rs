use std::time::Duration;

/// Engine configuration constants and tunable parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimConfig {
    /// Small delay used by [`schedule_batched`](crate::SimulationClock::schedule_batched)
    /// so that other reactions to the same instant resolve first.
    pub batch_window: Duration,

    /// Global cooldown started by every on-GCD cast.
    pub global_cooldown: Duration,

    /// Miss chance before the caster's hit chance is subtracted.
    pub base_miss_chance: f64,

    /// Maximum nesting of synchronous hook invocations.
    pub max_hook_depth: usize,

    /// Maximum number of actions that may fire at one instant before the run
    /// is declared stalled.
    pub max_actions_per_instant: usize,
}

impl SimConfig {
    // ===== compile-time constants used as type parameters =====
    /// Maximum number of targets a single cast may resolve against.
    pub const MAX_TARGETS: usize = 16;

    // ===== runtime-tunable defaults =====
    pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(10);
    pub const DEFAULT_GLOBAL_COOLDOWN: Duration = Duration::from_millis(1500);
    pub const DEFAULT_BASE_MISS_CHANCE: f64 = 0.05;
    pub const DEFAULT_MAX_HOOK_DEPTH: usize = 64;
    pub const DEFAULT_MAX_ACTIONS_PER_INSTANT: usize = 100_000;

    pub fn new() -> Self {
        Self {
            batch_window: Self::DEFAULT_BATCH_WINDOW,
            global_cooldown: Self::DEFAULT_GLOBAL_COOLDOWN,
            base_miss_chance: Self::DEFAULT_BASE_MISS_CHANCE,
            max_hook_depth: Self::DEFAULT_MAX_HOOK_DEPTH,
            max_actions_per_instant: Self::DEFAULT_MAX_ACTIONS_PER_INSTANT,
        }
    }

    #[must_use]
    pub fn with_batch_window(mut self, batch_window: Duration) -> Self {
        self.batch_window = batch_window;
        self
    }

    #[must_use]
    pub fn with_global_cooldown(mut self, global_cooldown: Duration) -> Self {
        self.global_cooldown = global_cooldown;
        self
    }

    #[must_use]
    pub fn with_base_miss_chance(mut self, base_miss_chance: f64) -> Self {
        self.base_miss_chance = base_miss_chance;
        self
    }

    #[must_use]
    pub fn with_max_hook_depth(mut self, max_hook_depth: usize) -> Self {
        self.max_hook_depth = max_hook_depth;
        self
    }

    #[must_use]
    pub fn with_max_actions_per_instant(mut self, max_actions_per_instant: usize) -> Self {
        self.max_actions_per_instant = max_actions_per_instant;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new()
    }
}
