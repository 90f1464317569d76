//! The engine: one process-wide world behind a global read-write lock, the
//! tick worker that advances it, and the query/mutation/control surface.
//!
//! Locking: queries take shared access and return defensive copies;
//! mutations and the tick worker take the writer role, so mutating APIs
//! implicitly pause production and transit. Change callbacks always fire
//! after the lock is released.

use crate::config::{EngineConfig, RuntimeOptions};
use crate::costs::CostTable;
use crate::events::{ChangeEvent, Notifier};
use crate::metrics::EngineMetrics;
use crate::routing::{self, PathResolver, RoutingDeps};
use crate::scheduler::Scheduler;
use crate::snapshot;
use crate::state::{
    Border, BonusId, Guild, GuildRef, ResourceKind, Resources, RoutingMode, TaxRates, Territory,
    Tier, Transit, Tribute, TributeId, UpgradeId, Warnings, World, TICKS_PER_MINUTE,
};
use crate::systems;
use crate::world;
use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown territory: {0}")]
    UnknownTerritory(String),
    #[error("unknown guild: {0}")]
    UnknownGuild(String),
    #[error("unknown tribute: {0}")]
    UnknownTribute(u64),
    #[error("{kind} level {level} out of range (max {max})")]
    LevelOutOfRange {
        kind: &'static str,
        level: u32,
        max: u32,
    },
    #[error("tax rate {0} outside [0, 1]")]
    TaxOutOfRange(f64),
    #[error("amounts must be non-negative and finite")]
    NegativeAmount,
    #[error("a tribute needs at least one endpoint")]
    EmptyTribute,
    #[error("tribute interval must be at least one minute")]
    BadInterval,
    #[error("cannot mark a territory without a guild as HQ")]
    HqWithoutGuild,
    #[error("state is loading; retry shortly")]
    BlockedDuringLoading,
    #[error("no path from {from} to {to}")]
    NoPath { from: String, to: String },
    #[error("snapshot version {0} is not supported")]
    VersionMismatch(String),
    #[error("snapshot format error: {0}")]
    Format(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Injectable selector for routing ties: receives the running count of
/// equally-good candidates and returns 0 to switch to the newest one.
pub type TieChooser = Box<dyn FnMut(usize) -> usize + Send>;

fn default_chooser() -> TieChooser {
    let mut rng = SmallRng::from_entropy();
    Box::new(move |candidates| rng.gen_range(0..candidates.max(1)))
}

/// Engine-level counters for `system_stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemStats {
    pub tick: u64,
    pub total_territories: usize,
    pub running: bool,
    /// Measured ticks per second (0 until the first 100-tick window closes).
    pub actual_tps: f64,
    /// Configured ticks per second (0 when the timer is stopped).
    pub target_tps: f64,
}

/// Partial territory configuration for `set_options`. `None` fields are
/// left untouched.
#[derive(Debug, Clone, Default)]
pub struct TerritoryPatch {
    pub upgrades: Option<Vec<(UpgradeId, u32)>>,
    pub bonuses: Option<Vec<(BonusId, u32)>>,
    pub tax: Option<TaxRates>,
    pub routing_mode: Option<RoutingMode>,
    pub border: Option<Border>,
    pub hq: Option<bool>,
}

pub(crate) struct EngineShared {
    world: RwLock<World>,
    notifier: Notifier,
    metrics: Mutex<EngineMetrics>,
    /// (window start, tick at window start) for the actual-TPS measurement.
    tps_window: Mutex<(Instant, u64)>,
    chooser: Mutex<TieChooser>,
    resolver: RwLock<Option<Arc<dyn PathResolver>>>,
    scheduler: Scheduler,
    saver_tx: crossbeam_channel::Sender<()>,
    auto_save_path: Option<PathBuf>,
}

/// Cheap clonable handle to the engine. All clones name the same world.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    /// Boot from a world file (and optional cost file), then start the
    /// scheduler. An existing auto-save is thawed unless suppressed.
    pub fn boot(
        world_path: &Path,
        cost_path: Option<&Path>,
        config: EngineConfig,
    ) -> anyhow::Result<Engine> {
        let file = world::load_world_file(world_path)?;
        let costs = match cost_path {
            Some(path) => crate::costs::load_cost_file(path)?,
            None => CostTable::default(),
        };
        let built = world::build_world(file, costs, RuntimeOptions::default())?;
        let engine = Engine::from_world(built, config.clone());

        if config.load_auto_save {
            if let Some(path) = &config.auto_save_path {
                if path.exists() {
                    match engine.load_state(path) {
                        Ok(()) => log::info!("thawed auto-save from {}", path.display()),
                        Err(e) => log::warn!("ignoring unusable auto-save: {e}"),
                    }
                }
            }
        }
        Ok(engine)
    }

    /// Wrap an already-built world and start the scheduler. Used by tests
    /// and embedders that assemble worlds programmatically.
    pub fn from_world(world: World, config: EngineConfig) -> Engine {
        let (saver_tx, saver_rx) = crossbeam_channel::bounded::<()>(1);

        let shared = Arc::new_cyclic(|weak: &Weak<EngineShared>| {
            let tick_handle = weak.clone();
            let scheduler = Scheduler::start(
                config.tick_queue_capacity,
                config.tick_rate,
                config.start_halted,
                move || {
                    if let Some(shared) = tick_handle.upgrade() {
                        run_tick(&shared);
                    }
                },
            );
            EngineShared {
                world: RwLock::new(world),
                notifier: Notifier::default(),
                metrics: Mutex::new(EngineMetrics::default()),
                tps_window: Mutex::new((Instant::now(), 0)),
                chooser: Mutex::new(default_chooser()),
                resolver: RwLock::new(None),
                scheduler,
                saver_tx,
                auto_save_path: config.auto_save_path.clone(),
            }
        });

        if let Some(path) = config.auto_save_path {
            let weak = Arc::downgrade(&shared);
            std::thread::Builder::new()
                .name("terrasim-autosave".into())
                .spawn(move || {
                    while saver_rx.recv().is_ok() {
                        let Some(shared) = weak.upgrade() else { return };
                        let frozen = {
                            let world = shared.world.read();
                            snapshot::capture(&world)
                        };
                        if let Err(e) = snapshot::write_to_path(&frozen, &path) {
                            log::warn!("auto-save to {} failed: {e}", path.display());
                        }
                    }
                })
                .expect("spawn auto-save thread");
        }

        let engine = Engine { shared };
        // Establish a consistent routing state before the first tick.
        {
            let mut world = engine.shared.world.write();
            rebuild_routes_locked(&engine.shared, &mut world);
        }
        engine
    }

    // =========================================================================
    // Queries (shared lock, defensive copies)
    // =========================================================================

    pub fn territory_stats(&self, name: &str) -> Result<Territory, EngineError> {
        let world = self.shared.world.read();
        world
            .territory(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTerritory(name.to_string()))
    }

    pub fn all_territory_stats(&self) -> Vec<Territory> {
        let world = self.shared.world.read();
        let mut all: Vec<Territory> = world.territories.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn system_stats(&self) -> SystemStats {
        let world = self.shared.world.read();
        SystemStats {
            tick: world.tick,
            total_territories: world.territories.len(),
            running: !self.shared.scheduler.is_halted(),
            actual_tps: self.shared.metrics.lock().actual_tps,
            target_tps: self.shared.scheduler.tick_rate(),
        }
    }

    pub fn trading_routes_for(&self, name: &str) -> Result<Vec<Vec<String>>, EngineError> {
        let world = self.shared.world.read();
        world
            .territory(name)
            .map(|t| t.trading_routes.clone())
            .ok_or_else(|| EngineError::UnknownTerritory(name.to_string()))
    }

    /// Transits currently sitting at the given territory.
    pub fn transits_at(&self, name: &str) -> Result<Vec<Transit>, EngineError> {
        let world = self.shared.world.read();
        let territory = world
            .territory(name)
            .ok_or_else(|| EngineError::UnknownTerritory(name.to_string()))?;
        let id = territory.id;
        Ok(world
            .transits
            .values()
            .filter(|t| t.current_hop() == id)
            .cloned()
            .collect())
    }

    pub fn all_transits(&self) -> Vec<Transit> {
        self.shared.world.read().transits.values().cloned().collect()
    }

    pub fn all_guilds(&self) -> Vec<Guild> {
        let world = self.shared.world.read();
        let mut guilds: Vec<Guild> = world.guilds.values().cloned().collect();
        guilds.sort_by(|a, b| a.tag.cmp(&b.tag));
        guilds
    }

    pub fn tributes(&self) -> Vec<Tribute> {
        self.shared.world.read().tributes.values().cloned().collect()
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.shared.metrics.lock().clone()
    }

    // =========================================================================
    // Mutations (writer lock; callbacks fire after release)
    // =========================================================================

    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut World, &EngineShared) -> Result<(T, Vec<ChangeEvent>), EngineError>,
    ) -> Result<T, EngineError> {
        let (value, events) = {
            let mut world = self.shared.world.write();
            if world.state_loading {
                return Err(EngineError::BlockedDuringLoading);
            }
            op(&mut world, &self.shared)?
        };
        self.shared.notifier.emit(&events);
        Ok(value)
    }

    /// Assign a territory to a guild (the sentinel unclaims it). Ownership
    /// change resets the treasury, clears the HQ flag, stamps the capture
    /// tick, and recomputes routing.
    pub fn set_guild(&self, name: &str, guild: GuildRef) -> Result<Territory, EngineError> {
        self.mutate(|world, shared| {
            let territory = world
                .territory(name)
                .ok_or_else(|| EngineError::UnknownTerritory(name.to_string()))?;
            let previous = territory.guild.clone();
            if previous == guild {
                return Ok((territory.clone(), Vec::new()));
            }
            world.ensure_guild(&guild);
            let tick = world.tick;
            let events = vec![
                ChangeEvent::State,
                ChangeEvent::Territory(name.to_string()),
                ChangeEvent::Guilds,
                ChangeEvent::Guild(guild.name.clone()),
            ];
            if let Some(t) = world.territory_mut(name) {
                t.set_owner(guild, tick);
            }
            world.rebuild_lookup_maps();
            rebuild_routes_locked(shared, world);
            let updated = world.territory(name).cloned().expect("territory exists");
            Ok((updated, events))
        })
    }

    /// Batch ownership assignment with one routing recomputation at the
    /// end. Every name is validated before any state changes.
    pub fn set_guild_batch(
        &self,
        assignments: &[(String, GuildRef)],
    ) -> Result<Vec<Territory>, EngineError> {
        self.mutate(|world, shared| {
            for (name, _) in assignments {
                if world.territory(name).is_none() {
                    return Err(EngineError::UnknownTerritory(name.clone()));
                }
            }
            let tick = world.tick;
            let mut events = vec![ChangeEvent::State, ChangeEvent::Guilds];
            for (name, guild) in assignments {
                world.ensure_guild(guild);
                if let Some(t) = world.territory_mut(name) {
                    t.set_owner(guild.clone(), tick);
                }
                events.push(ChangeEvent::Territory(name.clone()));
            }
            world.rebuild_lookup_maps();
            rebuild_routes_locked(shared, world);
            let updated = assignments
                .iter()
                .filter_map(|(name, _)| world.territory(name).cloned())
                .collect();
            Ok((updated, events))
        })
    }

    /// Apply a configuration patch. Levels and tax rates are validated
    /// before anything changes; routing recomputes when the patch touches
    /// paths (tax, mode, border, HQ).
    pub fn set_options(&self, name: &str, patch: &TerritoryPatch) -> Result<Territory, EngineError> {
        self.mutate(|world, shared| {
            let territory = world
                .territory(name)
                .ok_or_else(|| EngineError::UnknownTerritory(name.to_string()))?;

            if let Some(upgrades) = &patch.upgrades {
                for &(id, level) in upgrades {
                    if level > UpgradeId::MAX_LEVEL {
                        return Err(EngineError::LevelOutOfRange {
                            kind: id.key(),
                            level,
                            max: UpgradeId::MAX_LEVEL,
                        });
                    }
                }
            }
            if let Some(bonuses) = &patch.bonuses {
                for &(id, level) in bonuses {
                    let max = world.costs.bonus_max_level(id);
                    if level > max {
                        return Err(EngineError::LevelOutOfRange {
                            kind: id.key(),
                            level,
                            max,
                        });
                    }
                }
            }
            if let Some(tax) = &patch.tax {
                for rate in [tax.tax, tax.ally] {
                    if !(0.0..=1.0).contains(&rate) || !rate.is_finite() {
                        return Err(EngineError::TaxOutOfRange(rate));
                    }
                }
            }
            if patch.hq == Some(true) && territory.guild.is_sentinel() {
                return Err(EngineError::HqWithoutGuild);
            }

            let needs_rebuild = patch.tax.is_some()
                || patch.routing_mode.is_some()
                || patch.border.is_some()
                || patch.hq.is_some();

            let guild_tag = territory.guild.tag.clone();
            if patch.hq == Some(true) {
                demote_current_hq(world, &guild_tag);
            }

            if let Some(t) = world.territory_mut(name) {
                if let Some(upgrades) = &patch.upgrades {
                    for &(id, level) in upgrades {
                        t.upgrades.get_mut(id).set = level;
                    }
                }
                if let Some(bonuses) = &patch.bonuses {
                    for &(id, level) in bonuses {
                        t.bonuses.get_mut(id).set = level;
                    }
                }
                if let Some(tax) = patch.tax {
                    t.tax = tax;
                }
                if let Some(mode) = patch.routing_mode {
                    t.routing_mode = mode;
                }
                if let Some(border) = patch.border {
                    t.border = border;
                }
                if let Some(hq) = patch.hq {
                    t.hq = hq;
                }
            }

            if needs_rebuild {
                world.rebuild_lookup_maps();
                rebuild_routes_locked(shared, world);
            }
            let updated = world.territory(name).cloned().expect("territory exists");
            let events = vec![ChangeEvent::State, ChangeEvent::Territory(name.to_string())];
            Ok((updated, events))
        })
    }

    /// Set or clear the HQ role. Raising a new HQ demotes the guild's
    /// previous one.
    pub fn set_territory_hq(&self, name: &str, hq: bool) -> Result<Territory, EngineError> {
        self.set_options(
            name,
            &TerritoryPatch {
                hq: Some(hq),
                ..Default::default()
            },
        )
    }

    /// Pin (or unpin) the treasury tier regardless of hold time.
    pub fn set_treasury_override(
        &self,
        name: &str,
        level: Option<Tier>,
    ) -> Result<Territory, EngineError> {
        self.mutate(|world, _| {
            let territory = world
                .territory_mut(name)
                .ok_or_else(|| EngineError::UnknownTerritory(name.to_string()))?;
            territory.treasury_override = level;
            let updated = territory.clone();
            Ok((
                updated,
                vec![ChangeEvent::State, ChangeEvent::Territory(name.to_string())],
            ))
        })
    }

    /// Overwrite a territory's stored resources. HQs clamp to capacity;
    /// elsewhere the excess stays with an overflow warning and ships out on
    /// the next minute.
    pub fn set_storage(&self, name: &str, resources: Resources) -> Result<Territory, EngineError> {
        for kind in ResourceKind::ALL {
            let v = resources.get(kind);
            if v < 0.0 || !v.is_finite() {
                return Err(EngineError::NegativeAmount);
            }
        }
        self.mutate(|world, _| {
            let territory = world
                .territory_mut(name)
                .ok_or_else(|| EngineError::UnknownTerritory(name.to_string()))?;
            territory.storage.at = resources;
            for kind in ResourceKind::ALL {
                let cap = territory.storage.capacity.get(kind);
                if territory.storage.at.get(kind) > cap {
                    if territory.hq {
                        territory.storage.at.set(kind, cap);
                    }
                    territory.warning.set(Warnings::overflow_bit(kind));
                }
            }
            let updated = territory.clone();
            Ok((
                updated,
                vec![ChangeEvent::State, ChangeEvent::Territory(name.to_string())],
            ))
        })
    }

    // =========================================================================
    // Control
    // =========================================================================

    pub fn halt(&self) {
        self.shared.scheduler.halt();
    }

    pub fn resume(&self) {
        self.shared.scheduler.resume();
    }

    pub fn is_halted(&self) -> bool {
        self.shared.scheduler.is_halted()
    }

    /// Run exactly one tick synchronously on the calling thread. Works while
    /// halted; serializes with the worker through the world lock.
    pub fn next_tick(&self) {
        run_tick(&self.shared);
    }

    pub fn set_tick_rate(&self, rate: f64) {
        self.shared.scheduler.set_tick_rate(rate);
    }

    /// Halt, wait for the in-flight tick to finish, revert the world to its
    /// boot state with tick 0, then resume.
    pub fn reset(&self) -> Result<(), EngineError> {
        self.shared.scheduler.halt();
        {
            let mut world = self.shared.world.write();
            if world.state_loading {
                self.shared.scheduler.resume();
                return Err(EngineError::BlockedDuringLoading);
            }
            world::reset_world(&mut world);
            rebuild_routes_locked(&self.shared, &mut world);
        }
        self.shared.scheduler.resume();
        self.shared
            .notifier
            .emit(&[ChangeEvent::State, ChangeEvent::Guilds]);
        Ok(())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Freeze the world to an LZ4-framed snapshot at `path`.
    pub fn save_state(&self, path: &Path) -> Result<(), EngineError> {
        let frozen = {
            let world = self.shared.world.read();
            snapshot::capture(&world)
        };
        snapshot::write_to_path(&frozen, path)
    }

    /// Thaw a snapshot from `path`. Mutations are rejected while the load
    /// is in progress; a bad file leaves the world unchanged.
    pub fn load_state(&self, path: &Path) -> Result<(), EngineError> {
        {
            let mut world = self.shared.world.write();
            if world.state_loading {
                return Err(EngineError::BlockedDuringLoading);
            }
            world.state_loading = true;
        }

        // Parse outside the lock; ticks skip while the flag is up.
        let parsed = snapshot::read_from_path(path);

        let mut world = self.shared.world.write();
        world.state_loading = false;
        let frozen = parsed?;
        snapshot::apply(&mut world, frozen);
        systems::recompute_tribute_rates(&mut world);
        rebuild_routes_locked(&self.shared, &mut world);
        drop(world);

        self.shared
            .notifier
            .emit(&[ChangeEvent::State, ChangeEvent::Guilds]);
        Ok(())
    }

    // =========================================================================
    // Tributes
    // =========================================================================

    pub fn create_tribute(
        &self,
        from: Option<String>,
        to: Option<String>,
        hourly: Resources,
        interval_minutes: u64,
    ) -> Result<Tribute, EngineError> {
        if from.is_none() && to.is_none() {
            return Err(EngineError::EmptyTribute);
        }
        if interval_minutes < 1 {
            return Err(EngineError::BadInterval);
        }
        for kind in ResourceKind::ALL {
            let v = hourly.get(kind);
            if v < 0.0 || !v.is_finite() {
                return Err(EngineError::NegativeAmount);
            }
        }
        self.mutate(|world, _| {
            for endpoint in [&from, &to].into_iter().flatten() {
                if world.guild_by_name(endpoint).is_none() {
                    return Err(EngineError::UnknownGuild(endpoint.clone()));
                }
            }
            let id = world.next_tribute_id;
            world.next_tribute_id += 1;
            let tribute = Tribute {
                id,
                from: from.clone(),
                to: to.clone(),
                hourly,
                per_minute: hourly * (1.0 / 60.0),
                interval_minutes,
                active: true,
                created_at: world.tick,
                last_transfer: world.tick,
            };
            world.tributes.insert(id, tribute.clone());
            systems::recompute_tribute_rates(world);
            Ok((tribute, vec![ChangeEvent::State, ChangeEvent::Guilds]))
        })
    }

    pub fn set_tribute_enabled(
        &self,
        id: TributeId,
        enabled: bool,
    ) -> Result<Tribute, EngineError> {
        self.mutate(|world, _| {
            let tribute = world
                .tributes
                .get_mut(&id)
                .ok_or(EngineError::UnknownTribute(id))?;
            tribute.active = enabled;
            let updated = tribute.clone();
            systems::recompute_tribute_rates(world);
            Ok((updated, vec![ChangeEvent::State, ChangeEvent::Guilds]))
        })
    }

    pub fn remove_tribute(&self, id: TributeId) -> Result<(), EngineError> {
        self.mutate(|world, _| {
            world
                .tributes
                .remove(&id)
                .ok_or(EngineError::UnknownTribute(id))?;
            systems::recompute_tribute_rates(world);
            Ok(((), vec![ChangeEvent::State, ChangeEvent::Guilds]))
        })
    }

    pub fn update_tribute(
        &self,
        id: TributeId,
        hourly: Option<Resources>,
        interval_minutes: Option<u64>,
    ) -> Result<Tribute, EngineError> {
        if let Some(interval) = interval_minutes {
            if interval < 1 {
                return Err(EngineError::BadInterval);
            }
        }
        if let Some(amount) = &hourly {
            for kind in ResourceKind::ALL {
                let v = amount.get(kind);
                if v < 0.0 || !v.is_finite() {
                    return Err(EngineError::NegativeAmount);
                }
            }
        }
        self.mutate(|world, _| {
            let tribute = world
                .tributes
                .get_mut(&id)
                .ok_or(EngineError::UnknownTribute(id))?;
            if let Some(amount) = hourly {
                tribute.hourly = amount;
                tribute.per_minute = amount * (1.0 / 60.0);
            }
            if let Some(interval) = interval_minutes {
                tribute.interval_minutes = interval;
            }
            let updated = tribute.clone();
            systems::recompute_tribute_rates(world);
            Ok((updated, vec![ChangeEvent::State, ChangeEvent::Guilds]))
        })
    }

    /// Replace a guild's ally list. Allies are charged the ally tax when
    /// their shipments cross this guild's territory, so routing recomputes.
    pub fn set_guild_allies(
        &self,
        tag: &str,
        allies: Vec<String>,
    ) -> Result<Guild, EngineError> {
        self.mutate(|world, shared| {
            let guild = world
                .guilds
                .get_mut(tag)
                .ok_or_else(|| EngineError::UnknownGuild(tag.to_string()))?;
            guild.allies = allies;
            let updated = guild.clone();
            rebuild_routes_locked(shared, world);
            let events = vec![
                ChangeEvent::State,
                ChangeEvent::Guilds,
                ChangeEvent::Guild(updated.name.clone()),
            ];
            Ok((updated, events))
        })
    }

    // =========================================================================
    // Extension points
    // =========================================================================

    /// Install an external pathfinder; all route selection delegates to it
    /// until cleared. Triggers a routing recomputation.
    pub fn install_path_resolver(
        &self,
        resolver: Arc<dyn PathResolver>,
    ) -> Result<(), EngineError> {
        *self.shared.resolver.write() = Some(resolver);
        self.mutate(|world, shared| {
            rebuild_routes_locked(shared, world);
            Ok(((), vec![ChangeEvent::State]))
        })
    }

    pub fn clear_path_resolver(&self) -> Result<(), EngineError> {
        *self.shared.resolver.write() = None;
        self.mutate(|world, shared| {
            rebuild_routes_locked(shared, world);
            Ok(((), vec![ChangeEvent::State]))
        })
    }

    /// Replace the routing tie selector (tests pin determinism through
    /// this).
    pub fn set_tie_chooser(&self, chooser: TieChooser) {
        *self.shared.chooser.lock() = chooser;
    }

    /// Register a change callback. Callbacks run off-lock after the tick or
    /// mutation that caused them and must not block.
    pub fn on_change(&self, callback: Box<dyn Fn(&ChangeEvent) + Send + Sync>) {
        self.shared.notifier.register(callback);
    }

    /// Flip the external-calculator flag: while set, the production pass
    /// runs serially.
    pub fn set_external_calculator_active(&self, active: bool) -> Result<(), EngineError> {
        self.mutate(|world, _| {
            world.options.external_calculator_active = active;
            Ok(((), vec![ChangeEvent::State]))
        })
    }

    /// Enable or disable treasury generation bonuses.
    pub fn set_treasury_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.mutate(|world, _| {
            world.options.treasury_enabled = enabled;
            Ok(((), vec![ChangeEvent::State]))
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.system_stats();
        f.debug_struct("Engine")
            .field("tick", &stats.tick)
            .field("territories", &stats.total_territories)
            .field("running", &stats.running)
            .finish()
    }
}

fn demote_current_hq(world: &mut World, guild_tag: &str) {
    if let Some(previous) = world.hq_by_guild.get(guild_tag).cloned() {
        if let Some(t) = world.territory_mut(&previous) {
            t.hq = false;
        }
    }
}

fn rebuild_routes_locked(shared: &EngineShared, world: &mut World) {
    let mut chooser = shared.chooser.lock();
    let resolver = shared.resolver.read();
    let resolver_ref: Option<&dyn PathResolver> = resolver.as_ref().map(|r| r.as_ref());
    let mut deps = RoutingDeps {
        chooser: &mut **chooser,
        resolver: resolver_ref,
    };
    routing::rebuild(world, &mut deps);
}

/// One full tick: transit and tribute passes on the minute boundary, then
/// production, then housekeeping. Runs on the worker thread and for
/// `next_tick` on the caller's thread; the world lock serializes both.
pub(crate) fn run_tick(shared: &EngineShared) {
    let tick_start = Instant::now();
    let mut transit_elapsed = Duration::ZERO;
    let mut tribute_elapsed = Duration::ZERO;
    let production_elapsed;
    let tick;
    {
        let mut world = shared.world.write();
        if world.state_loading {
            return;
        }
        world.tick += 1;
        tick = world.tick;

        if tick % TICKS_PER_MINUTE == 0 {
            let mut chooser = shared.chooser.lock();
            let resolver = shared.resolver.read();
            let resolver_ref: Option<&dyn PathResolver> = resolver.as_ref().map(|r| r.as_ref());
            let mut deps = RoutingDeps {
                chooser: &mut **chooser,
                resolver: resolver_ref,
            };
            let start = Instant::now();
            systems::run_transit_pass(&mut world, &mut deps);
            transit_elapsed = start.elapsed();
            let start = Instant::now();
            systems::run_tribute_pass(&mut world, &mut deps);
            tribute_elapsed = start.elapsed();
        }

        let start = Instant::now();
        systems::run_production_pass(&mut world);
        production_elapsed = start.elapsed();

        if tick % 300 == 0 {
            world.compact();
        }
    }

    {
        let mut metrics = shared.metrics.lock();
        metrics.total_ticks += 1;
        metrics.total_time += tick_start.elapsed();
        metrics.transit_time += transit_elapsed;
        metrics.tribute_time += tribute_elapsed;
        metrics.production_time += production_elapsed;
        if tick % 100 == 0 {
            let mut window = shared.tps_window.lock();
            let (started, tick_then) = *window;
            let elapsed = started.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                metrics.actual_tps = (tick - tick_then) as f64 / elapsed;
            }
            *window = (Instant::now(), tick);
        }
    }

    if tick % 60 == 0 && shared.auto_save_path.is_some() {
        // Best-effort: a full saver queue just skips this request.
        let _ = shared.saver_tx.try_send(());
    }
    if tick % 1000 == 0 {
        std::thread::yield_now();
    }

    shared.notifier.emit(&[ChangeEvent::State]);
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
