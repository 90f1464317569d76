//! # Terrasim Core
//!
//! Deterministic tick-driven economy engine for a territory-control game.
//!
//! A fixed set of named territories, each owned by at most one guild,
//! produces, stores, consumes, and ships five fungible resources. The
//! engine advances this world one simulated second at a time, routes
//! surplus and deficit between each guild's HQ and its members over a
//! shared graph, and applies cross-guild border taxes en route.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  tokens  ┌─────────────┐  write lock  ┌────────────┐
//! │  timer    │─────────▶│ tick worker │─────────────▶│   World    │
//! │  thread   │ (bounded)│  (serial)   │              │ (RwLock)   │
//! └───────────┘          └─────────────┘              └─────┬──────┘
//!                         per tick:                         │ read lock
//!                          transit ▸ tribute ▸ production   ▼
//!                                                     ┌────────────┐
//!                                                     │  queries / │
//!                                                     │  callbacks │
//!                                                     └────────────┘
//! ```
//!
//! ## Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Engine`] | Process-wide handle: queries, mutations, control, persistence |
//! | [`World`] | Complete simulation state (territories, guilds, transits, tributes) |
//! | [`Territory`] | The primary entity: storage, configuration, ownership, routes |
//! | [`CostTable`] | Replaceable upgrade/bonus cost configuration |
//! | [`PathResolver`] | Escape hatch for an externally provided pathfinder |
//!
//! ## Concurrency
//!
//! Single-writer, parallel-readers: every mutation (and the tick itself)
//! holds the global writer lock; queries share the reader side and return
//! defensive copies. The production pass fans out across territories with
//! rayon — territories are independent within a tick — unless an external
//! calculator is attached, in which case it runs serially.

pub mod config;
pub mod costs;
pub mod engine;
pub mod events;
pub mod metrics;
pub mod routing;
pub mod scheduler;
pub mod snapshot;
pub mod state;
pub mod systems;
pub mod testing;
pub mod world;

pub use config::{EngineConfig, RuntimeOptions};
pub use costs::{CostTable, BASE_EMISSION_INTERVAL};
pub use engine::{Engine, EngineError, SystemStats, TerritoryPatch, TieChooser};
pub use events::ChangeEvent;
pub use metrics::EngineMetrics;
pub use routing::PathResolver;
pub use snapshot::{Snapshot, SNAPSHOT_TYPE, SNAPSHOT_VERSION};
pub use state::{
    BonusId, Border, Guild, GuildRef, ResourceKind, Resources, RoutingMode, TaxRates, Territory,
    Tier, Transit, Tribute, UpgradeId, Warnings, World,
};
pub use systems::{run_production_pass, run_transit_pass, run_tribute_pass};
