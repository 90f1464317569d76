//! Snapshot freeze/thaw.
//!
//! The envelope is a self-describing JSON record compressed into a single
//! LZ4 frame. A version or format mismatch aborts the load and leaves the
//! world unchanged.

use crate::engine::EngineError;
use crate::state::{Guild, Territory, Transit, Tribute, World};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

pub const SNAPSHOT_TYPE: &str = "state_save";
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Everything needed to thaw the engine back to this state. Entity lists
/// are sorted so equal worlds freeze to equal bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    /// Seconds since the Unix epoch at capture time.
    pub timestamp: u64,
    pub tick: u64,
    pub territories: Vec<Territory>,
    pub guilds: Vec<Guild>,
    pub tributes: Vec<Tribute>,
    pub transits: Vec<Transit>,
    pub runtime_options: crate::config::RuntimeOptions,
    pub costs: crate::costs::CostTable,
    pub total_territories: usize,
    pub total_guilds: usize,
}

/// Freeze the world into an envelope. Every entity is a defensive copy.
pub fn capture(world: &World) -> Snapshot {
    let mut territories: Vec<Territory> = world.territories.values().cloned().collect();
    territories.sort_by(|a, b| a.name.cmp(&b.name));
    let mut guilds: Vec<Guild> = world.guilds.values().cloned().collect();
    guilds.sort_by(|a, b| a.tag.cmp(&b.tag));
    let tributes: Vec<Tribute> = world.tributes.values().cloned().collect();
    let transits: Vec<Transit> = world.transits.values().cloned().collect();

    Snapshot {
        kind: SNAPSHOT_TYPE.to_string(),
        version: SNAPSHOT_VERSION.to_string(),
        timestamp: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        tick: world.tick,
        total_territories: territories.len(),
        total_guilds: guilds.len(),
        territories,
        guilds,
        tributes,
        transits,
        runtime_options: world.options.clone(),
        costs: world.costs.clone(),
    }
}

/// Serialize and LZ4-compress the envelope to `path`.
pub fn write_to_path(snapshot: &Snapshot, path: &Path) -> Result<(), EngineError> {
    let body =
        serde_json::to_vec(snapshot).map_err(|e| EngineError::Format(e.to_string()))?;
    let file = std::fs::File::create(path)?;
    let mut encoder = lz4::EncoderBuilder::new().level(4).build(file)?;
    encoder.write_all(&body)?;
    let (_file, result) = encoder.finish();
    result?;
    Ok(())
}

/// Read, decompress, parse, and validate an envelope from `path`.
pub fn read_from_path(path: &Path) -> Result<Snapshot, EngineError> {
    let file = std::fs::File::open(path)?;
    let mut decoder = lz4::Decoder::new(file)?;
    let mut body = Vec::new();
    decoder.read_to_end(&mut body)?;
    let snapshot: Snapshot =
        serde_json::from_slice(&body).map_err(|e| EngineError::Format(e.to_string()))?;
    if snapshot.kind != SNAPSHOT_TYPE {
        return Err(EngineError::Format(format!(
            "unexpected snapshot type {:?}",
            snapshot.kind
        )));
    }
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(EngineError::VersionMismatch(snapshot.version));
    }
    Ok(snapshot)
}

/// Thaw an envelope into the world.
///
/// Guilds merge: new tags append, existing tags update their display name.
/// Territories, tick, options, cost tables, tributes, and in-flight
/// transits are replaced. The caller rebuilds lookup maps, tribute rates,
/// and routing afterwards.
pub fn apply(world: &mut World, snapshot: Snapshot) {
    for guild in snapshot.guilds {
        match world.guilds.get_mut(&guild.tag) {
            Some(existing) => existing.name = guild.name,
            None => {
                world.guilds.insert(guild.tag.clone(), guild);
            }
        }
    }

    world.territories = snapshot
        .territories
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect();
    world.tick = snapshot.tick;
    world.options = snapshot.runtime_options;
    world.costs = snapshot.costs;

    world.tributes = snapshot.tributes.into_iter().map(|t| (t.id, t)).collect();
    world.next_tribute_id = world.tributes.keys().max().map(|id| id + 1).unwrap_or(1);
    world.transits = snapshot.transits.into_iter().map(|t| (t.id, t)).collect();
    world.next_transit_id = world.transits.keys().max().map(|id| id + 1).unwrap_or(1);

    world.rebuild_lookup_maps();
}
