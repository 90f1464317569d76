//! Simulation systems driven by the tick worker.

pub mod production;
pub mod transit;
pub mod treasury;
pub mod tribute;

pub use production::{run_production_pass, storage_capacity};
pub use transit::run_transit_pass;
pub use treasury::{generation_bonus, tier_for_held_ticks};
pub use tribute::{recompute_tribute_rates, run_tribute_pass};
