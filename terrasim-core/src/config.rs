use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Toggles recognized by the engine at runtime. Part of the saved state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeOptions {
    /// When false, treasury tiers contribute no generation bonus.
    pub treasury_enabled: bool,
    /// When true, the production pass runs serially so an external
    /// calculator can observe it without data races.
    pub external_calculator_active: bool,
    /// Name of an externally installed pathfinder provider, if any.
    pub pathfinder_provider: Option<String>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            treasury_enabled: true,
            external_calculator_active: false,
            pathfinder_provider: None,
        }
    }
}

/// Engine construction parameters. Not part of the saved state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tick queue capacity. Overflowing timer tokens are dropped so the
    /// engine stays in sync with wall time.
    pub tick_queue_capacity: usize,
    /// Target path for the periodic auto-save; `None` disables it.
    pub auto_save_path: Option<PathBuf>,
    /// Attempt to thaw an existing auto-save at boot.
    pub load_auto_save: bool,
    /// Initial ticks per second. Values `<= 0` leave the timer stopped.
    pub tick_rate: f64,
    /// Construct the scheduler halted; `next_tick` still works.
    pub start_halted: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_queue_capacity: 50_000,
            auto_save_path: None,
            load_auto_save: true,
            tick_rate: 1.0,
            start_halted: false,
        }
    }
}
