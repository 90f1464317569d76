//! World construction from the world file, and the full engine reset.

use crate::config::RuntimeOptions;
use crate::costs::CostTable;
use crate::state::{Location, Resources, Territory, World};
use anyhow::{bail, Context};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One world-file entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTerritory {
    pub id: u32,
    /// Base per-hour generation.
    pub resources: Resources,
    pub location: Location,
    #[serde(rename = "tradingRoutes")]
    pub trading_routes: Vec<String>,
}

/// The world file: territory name → entry. `BTreeMap` keeps boot order
/// deterministic.
pub type WorldFile = BTreeMap<String, RawTerritory>;

pub fn load_world_file(path: &Path) -> anyhow::Result<WorldFile> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading world file {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing world file {}", path.display()))
}

/// Construct a fresh world from a parsed world file.
///
/// Neighbor links are symmetrized; a link naming an unknown territory is
/// dropped with a warning. Duplicate ids are a world-file defect and fail
/// the boot.
pub fn build_world(
    file: WorldFile,
    costs: CostTable,
    options: RuntimeOptions,
) -> anyhow::Result<World> {
    let mut territories = FxHashMap::default();
    let mut names_by_id = FxHashMap::default();
    let mut neighbors: FxHashMap<String, Vec<String>> = FxHashMap::default();

    for (name, raw) in &file {
        if let Some(previous) = names_by_id.insert(raw.id, name.clone()) {
            bail!(
                "world file: territories {previous:?} and {name:?} share id {}",
                raw.id
            );
        }
        territories.insert(
            name.clone(),
            Territory::new(name.clone(), raw.id, raw.resources, raw.location),
        );
    }

    for (name, raw) in &file {
        let links = neighbors.entry(name.clone()).or_default();
        for neighbor in &raw.trading_routes {
            if !territories.contains_key(neighbor) {
                log::warn!("world file: {name:?} links to unknown territory {neighbor:?}");
                continue;
            }
            if !links.contains(neighbor) {
                links.push(neighbor.clone());
            }
        }
    }

    // The neighbor relation is symmetric by construction; enforce it in case
    // a hand-edited file only lists one direction.
    let names: Vec<String> = neighbors.keys().cloned().collect();
    for name in names {
        let linked = neighbors[&name].clone();
        for neighbor in linked {
            let back = neighbors.entry(neighbor).or_default();
            if !back.contains(&name) {
                back.push(name.clone());
            }
        }
    }

    let mut world = World {
        tick: 0,
        territories,
        names_by_id,
        neighbors,
        guilds: FxHashMap::default(),
        hq_by_guild: FxHashMap::default(),
        transits: BTreeMap::new(),
        next_transit_id: 1,
        tributes: BTreeMap::new(),
        next_tribute_id: 1,
        options,
        costs,
        state_loading: false,
    };

    for name in world.ordered_names() {
        let capacity = {
            let territory = &world.territories[&name];
            crate::systems::production::storage_capacity(territory, &world.costs)
        };
        if let Some(territory) = world.territory_mut(&name) {
            territory.storage.capacity = capacity;
        }
    }

    Ok(world)
}

/// Revert the world to its boot state, preserving identity and topology.
///
/// Guilds, transits, and tributes are dropped; the tick counter returns to
/// zero. The caller re-runs routing afterwards.
pub fn reset_world(world: &mut World) {
    world.tick = 0;
    for territory in world.territories.values_mut() {
        territory.reset();
    }
    world.guilds.clear();
    world.hq_by_guild.clear();
    world.transits.clear();
    world.next_transit_id = 1;
    world.tributes.clear();
    world.next_tribute_id = 1;
    world.options = RuntimeOptions::default();
    for name in world.ordered_names() {
        let capacity = {
            let territory = &world.territories[&name];
            crate::systems::production::storage_capacity(territory, &world.costs)
        };
        if let Some(territory) = world.territory_mut(&name) {
            territory.storage.capacity = capacity;
        }
    }
}
