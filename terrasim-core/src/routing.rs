//! Per-guild trading trees.
//!
//! Rebuilt whenever ownership, HQ placement, borders, routing modes, or tax
//! rates change, and after a snapshot load. Every non-HQ member of a guild
//! selects one path to its guild's HQ; the HQ mirrors one path per member.
//! The cumulative cross-guild tax along the selected path is cached on the
//! territory as `route_tax`.

use crate::state::{RoutingMode, Territory, TerritoryId, World};
use territory_pathfinding::{Dijkstra, Graph};
use tracing::instrument;

/// Cheapest-mode cost packing: tax basis points dominate, then foreign-hop
/// count, then hop count. Each field is wide enough that realistic path
/// sums cannot carry into the next.
const SHIFT_TAX: u64 = 1 << 28;
const SHIFT_FOREIGN: u64 = 1 << 14;

/// External pathfinder escape hatch.
///
/// When installed, every path selection is delegated. An empty or `None`
/// result is treated as `NoPath`. The returned path must start at `from`
/// and end at `to`; anything else is discarded as `NoPath`.
pub trait PathResolver: Send + Sync {
    fn resolve(
        &self,
        world: &World,
        source_guild: &str,
        from: &str,
        to: &str,
    ) -> Option<Vec<String>>;
}

/// Collaborators the routing layer needs but does not own: the tie selector
/// (injectable so tests can pin it) and the optional external resolver.
pub struct RoutingDeps<'a> {
    pub chooser: &'a mut dyn FnMut(usize) -> usize,
    pub resolver: Option<&'a dyn PathResolver>,
}

struct RouteCtx<'a> {
    world: &'a World,
    guild_tag: &'a str,
    mode: RoutingMode,
}

struct TerritoryGraph;

impl<'a> Graph<TerritoryId, RouteCtx<'a>> for TerritoryGraph {
    fn neighbors(&self, node: TerritoryId, ctx: &RouteCtx<'a>) -> Vec<TerritoryId> {
        let Some(name) = ctx.world.territory_name(node) else {
            return Vec::new();
        };
        let Some(links) = ctx.world.neighbors.get(name) else {
            return Vec::new();
        };
        links
            .iter()
            .filter_map(|neighbor| ctx.world.territory(neighbor))
            .filter(|t| {
                // A closed border only admits the owner's own guild.
                t.border == crate::state::Border::Open || t.guild.tag == ctx.guild_tag
            })
            .map(|t| t.id)
            .collect()
    }

    fn cost(&self, _from: TerritoryId, to: TerritoryId, ctx: &RouteCtx<'a>) -> u64 {
        match ctx.mode {
            RoutingMode::Fastest => 1,
            RoutingMode::Cheapest => {
                let Some(name) = ctx.world.territory_name(to) else {
                    return 1;
                };
                let Some(hop) = ctx.world.territory(name) else {
                    return 1;
                };
                let tax = ctx.world.effective_tax(hop, ctx.guild_tag);
                let bp = (tax * 10_000.0).round() as u64;
                let foreign = u64::from(hop.guild.tag != ctx.guild_tag);
                bp * SHIFT_TAX + foreign * SHIFT_FOREIGN + 1
            }
        }
    }
}

/// Find a path of territory names from `from` to `to` for a shipment of
/// `source_guild`, honoring closed borders and the given mode.
pub fn find_route(
    world: &World,
    source_guild: &str,
    mode: RoutingMode,
    from: &str,
    to: &str,
    deps: &mut RoutingDeps<'_>,
) -> Option<Vec<String>> {
    if let Some(resolver) = deps.resolver {
        let path = resolver.resolve(world, source_guild, from, to)?;
        if path.is_empty()
            || path.first().map(String::as_str) != Some(from)
            || path.last().map(String::as_str) != Some(to)
            || path.iter().any(|name| !world.territories.contains_key(name))
        {
            log::debug!("external resolver returned an unusable path {from:?} -> {to:?}");
            return None;
        }
        return Some(path);
    }

    let start = world.territory(from)?.id;
    let goal = world.territory(to)?.id;
    let ctx = RouteCtx {
        world,
        guild_tag: source_guild,
        mode,
    };
    let (path, _cost) = Dijkstra::find_path(&TerritoryGraph, start, goal, &ctx, deps.chooser)?;
    path.into_iter()
        .map(|id| world.territory_name(id).map(str::to_string))
        .collect()
}

/// Total tax fraction a shipment of `guild_tag` pays along `path`:
/// `1 − ∏(1 − taxᵢ)` over hops owned by other guilds. The origin and the
/// destination HQ are the shipment's own territory on member routes and so
/// contribute nothing.
pub fn route_tax(world: &World, guild_tag: &str, path: &[String]) -> f64 {
    let mut kept = 1.0;
    for hop_name in path {
        if let Some(hop) = world.territory(hop_name) {
            kept *= 1.0 - world.effective_tax(hop, guild_tag);
        }
    }
    1.0 - kept
}

#[derive(Debug, Default)]
struct RouteResult {
    routes: Vec<Vec<String>>,
    destination: Option<String>,
    next_territory: Option<String>,
    route_tax: f64,
}

impl RouteResult {
    fn cleared() -> Self {
        RouteResult {
            routes: Vec::new(),
            destination: None,
            next_territory: None,
            route_tax: -1.0,
        }
    }
}

/// Recompute trading trees, link caches, and `route_tax` for every
/// territory.
#[instrument(skip_all, name = "routing_rebuild")]
pub fn rebuild(world: &mut World, deps: &mut RoutingDeps<'_>) {
    recompute_links(world);

    let names = world.ordered_names();
    let mut results: Vec<(String, RouteResult)> = Vec::with_capacity(names.len());
    for name in &names {
        let result = compute_routes_for(world, name, deps);
        results.push((name.clone(), result));
    }

    for (name, result) in results {
        if let Some(territory) = world.territory_mut(&name) {
            territory.trading_routes = result.routes;
            territory.destination = result.destination;
            territory.next_territory = result.next_territory;
            territory.route_tax = result.route_tax;
        }
    }
}

fn compute_routes_for(world: &World, name: &str, deps: &mut RoutingDeps<'_>) -> RouteResult {
    let Some(territory) = world.territory(name) else {
        return RouteResult::cleared();
    };
    if territory.guild.is_sentinel() {
        return RouteResult::cleared();
    }
    let tag = territory.guild.tag.clone();
    let Some(hq_name) = world.hq_by_guild.get(&tag).cloned() else {
        return RouteResult::cleared();
    };

    if territory.hq {
        // One path per member, from the HQ outwards.
        let mut members: Vec<&Territory> = world
            .territories
            .values()
            .filter(|t| t.guild.tag == tag && !t.hq)
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));
        let mut routes = Vec::new();
        for member in members {
            if let Some(path) = find_route(
                world,
                &tag,
                member.routing_mode,
                name,
                &member.name,
                deps,
            ) {
                routes.push(path);
            }
        }
        return RouteResult {
            routes,
            destination: None,
            next_territory: None,
            route_tax: -1.0,
        };
    }

    match find_route(world, &tag, territory.routing_mode, name, &hq_name, deps) {
        Some(path) => {
            let tax = route_tax(world, &tag, &path);
            RouteResult {
                destination: path.last().cloned(),
                next_territory: path.get(1).cloned(),
                route_tax: tax,
                routes: vec![path],
            }
        }
        None => {
            log::debug!("no trading route for {name:?} ({tag}) this cycle");
            RouteResult::cleared()
        }
    }
}

/// Rebuild `links.direct` (same-guild neighbors) and `links.externals`
/// (same-guild territories within graph distance 3) for every territory.
fn recompute_links(world: &mut World) {
    let names = world.ordered_names();
    let mut computed: Vec<(String, Vec<String>, Vec<String>)> = Vec::with_capacity(names.len());

    for name in &names {
        let territory = &world.territories[name];
        if territory.guild.is_sentinel() {
            computed.push((name.clone(), Vec::new(), Vec::new()));
            continue;
        }
        let tag = &territory.guild.tag;

        let mut direct: Vec<String> = world
            .neighbors
            .get(name)
            .into_iter()
            .flatten()
            .filter(|n| {
                world
                    .territory(n)
                    .map(|t| &t.guild.tag == tag)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        direct.sort();

        // Breadth-first sweep to depth 3 over the full graph; collect the
        // same-guild territories encountered.
        let mut externals: Vec<String> = Vec::new();
        let mut visited: std::collections::HashSet<&str> = std::collections::HashSet::new();
        visited.insert(name);
        let mut frontier: Vec<&str> = vec![name];
        for _depth in 0..3 {
            let mut next: Vec<&str> = Vec::new();
            for current in frontier {
                for neighbor in world.neighbors.get(current).into_iter().flatten() {
                    if visited.insert(neighbor) {
                        next.push(neighbor);
                        if world
                            .territory(neighbor)
                            .map(|t| &t.guild.tag == tag)
                            .unwrap_or(false)
                        {
                            externals.push(neighbor.clone());
                        }
                    }
                }
            }
            frontier = next;
        }
        externals.sort();

        computed.push((name.clone(), direct, externals));
    }

    for (name, direct, externals) in computed {
        if let Some(territory) = world.territory_mut(&name) {
            territory.links.direct = direct;
            territory.links.externals = externals;
        }
    }
}
