//! Test helpers for assembling small worlds without a world file.

use crate::config::RuntimeOptions;
use crate::costs::CostTable;
use crate::routing::{self, RoutingDeps};
use crate::state::{GuildRef, Location, Resources, Territory, World};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

pub struct WorldBuilder {
    world: World,
    next_id: u32,
}

impl WorldBuilder {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            world: World {
                tick: 0,
                territories: FxHashMap::default(),
                names_by_id: FxHashMap::default(),
                neighbors: FxHashMap::default(),
                guilds: FxHashMap::default(),
                hq_by_guild: FxHashMap::default(),
                transits: BTreeMap::new(),
                next_transit_id: 1,
                tributes: BTreeMap::new(),
                next_tribute_id: 1,
                options: RuntimeOptions::default(),
                costs: CostTable::default(),
                state_loading: false,
            },
            next_id: 1,
        }
    }

    /// Add a territory with the given per-hour base generation.
    pub fn territory(mut self, name: &str, base_generation: Resources) -> Self {
        let id = self.next_id;
        self.next_id += 1;
        self.world.territories.insert(
            name.to_string(),
            Territory::new(name.to_string(), id, base_generation, Location::default()),
        );
        self.world.neighbors.entry(name.to_string()).or_default();
        self
    }

    /// Add a symmetric neighbor link.
    pub fn link(mut self, a: &str, b: &str) -> Self {
        for (from, to) in [(a, b), (b, a)] {
            let links = self.world.neighbors.entry(from.to_string()).or_default();
            if !links.iter().any(|l| l == to) {
                links.push(to.to_string());
            }
        }
        self
    }

    /// Assign a territory to a guild, registering the guild if new.
    pub fn owned(mut self, name: &str, guild_name: &str, tag: &str) -> Self {
        let guild_ref = GuildRef {
            name: guild_name.to_string(),
            tag: tag.to_string(),
        };
        self.world.ensure_guild(&guild_ref);
        if let Some(t) = self.world.territories.get_mut(name) {
            t.guild = guild_ref;
        }
        self
    }

    /// Mark a territory as its guild's HQ.
    pub fn hq(mut self, name: &str) -> Self {
        if let Some(t) = self.world.territories.get_mut(name) {
            t.hq = true;
        }
        self
    }

    /// Finish the world with lookup maps and capacities in place. Routing is
    /// left to the test (see [`WorldBuilder::build_routed`]).
    pub fn build(mut self) -> World {
        self.world.rebuild_lookup_maps();
        for name in self.world.ordered_names() {
            let capacity = {
                let territory = &self.world.territories[&name];
                crate::systems::production::storage_capacity(territory, &self.world.costs)
            };
            if let Some(t) = self.world.territory_mut(&name) {
                t.storage.capacity = capacity;
            }
        }
        self.world
    }

    /// Like [`WorldBuilder::build`] but with trading routes computed using
    /// the deterministic first-found tie-break.
    pub fn build_routed(self) -> World {
        let mut world = self.build();
        let mut chooser = territory_pathfinding::keep_first;
        routing::rebuild(
            &mut world,
            &mut RoutingDeps {
                chooser: &mut chooser,
                resolver: None,
            },
        );
        world
    }
}

/// Resources with only one non-zero component. Reads better in tests.
pub fn only(kind: crate::state::ResourceKind, amount: f64) -> Resources {
    let mut r = Resources::ZERO;
    r.set(kind, amount);
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceKind;

    #[test]
    fn test_builder_wires_lookups() {
        let world = WorldBuilder::new()
            .territory("A", only(ResourceKind::Ores, 600.0))
            .territory("B", Resources::ZERO)
            .link("A", "B")
            .owned("A", "Avos", "AVO")
            .hq("A")
            .build();

        assert_eq!(world.territory_name(1), Some("A"));
        assert_eq!(world.hq_by_guild["AVO"], "A");
        assert_eq!(world.neighbors["B"], vec!["A".to_string()]);
        assert!(world.guilds.contains_key("AVO"));
        assert_eq!(
            world.territory("A").unwrap().base_generation.ores,
            600.0
        );
    }
}
