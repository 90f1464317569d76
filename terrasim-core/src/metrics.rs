use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Accumulated timing metrics for the tick worker.
#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub total_ticks: u64,
    pub total_time: Duration,
    pub transit_time: Duration,
    pub production_time: Duration,
    pub tribute_time: Duration,
    /// Measured ticks per second, refreshed every 100 ticks.
    pub actual_tps: f64,
}

impl EngineMetrics {
    pub fn tick_avg_ms(&self) -> f64 {
        if self.total_ticks == 0 {
            0.0
        } else {
            self.total_time.as_secs_f64() * 1000.0 / self.total_ticks as f64
        }
    }
}
