//! The per-minute transit pass.
//!
//! Three phases, in order: route every member's accumulated surplus toward
//! its HQ, dispatch deficit coverage from HQs, then advance every in-flight
//! transit one hop. Taxes are realized immediately into the taxing guild's
//! HQ as shipments cross foreign territory.

use crate::routing::{self, RoutingDeps};
use crate::state::{
    ResourceKind, Resources, RoutingMode, Territory, Transit, TransitId, Warnings, World,
    SECONDS_PER_HOUR,
};
use tracing::instrument;

/// Seconds of upkeep a deficit shipment covers: one minute plus one tick of
/// slack so the territory never starves between deliveries.
const DEFICIT_COVER_SECONDS: f64 = 61.0;

/// Run all three phases. `deps` is only consulted for re-homing transits
/// whose destination changed hands mid-flight.
#[instrument(skip_all, name = "transit")]
pub fn run_transit_pass(world: &mut World, deps: &mut RoutingDeps<'_>) {
    for transit in world.transits.values_mut() {
        transit.moved = false;
    }
    surplus_phase(world);
    deficit_phase(world);
    movement_phase(world, deps);
}

/// Dispatch a new transit. The shipment starts at the origin end with
/// `moved` already set so the same minute's movement phase skips it.
fn dispatch(world: &mut World, territory_name: &str, route: &[String], resources: Resources) {
    let Some(origin) = world.territory(&route[0]).map(|t| t.id) else {
        return;
    };
    let Some((destination, dest_guild)) = world
        .territory(&route[route.len() - 1])
        .map(|t| (t.id, t.guild.tag.clone()))
    else {
        return;
    };
    let Some(guild) = world.territory(territory_name).map(|t| t.guild.clone()) else {
        return;
    };
    let route_ids: Vec<_> = route
        .iter()
        .filter_map(|name| world.territory(name).map(|t| t.id))
        .collect();
    if route_ids.len() != route.len() {
        return;
    }
    let next_tax = route
        .get(1)
        .and_then(|name| world.territory(name))
        .map(|hop| world.effective_tax(hop, &guild.tag))
        .unwrap_or(0.0);

    let id: TransitId = world.next_transit_id;
    world.next_transit_id += 1;
    world.transits.insert(
        id,
        Transit {
            id,
            resources,
            origin,
            destination,
            guild,
            dest_guild,
            route: route_ids,
            created_at: world.tick,
            route_index: 0,
            next_tax,
            moved: true,
        },
    );
}

/// True when any hop past the origin is sealed against the shipping guild.
fn route_blocked(world: &World, route: &[String], guild_tag: &str) -> bool {
    route.iter().skip(1).any(|name| {
        world
            .territory(name)
            .map(|hop| {
                hop.border == crate::state::Border::Closed && hop.guild.tag != guild_tag
            })
            .unwrap_or(true)
    })
}

fn surplus_phase(world: &mut World) {
    for name in world.ordered_names() {
        let Some(territory) = world.territory(&name) else {
            continue;
        };
        if territory.hq || territory.guild.is_sentinel() {
            continue;
        }
        if !territory.storage.at.any_positive() {
            continue;
        }
        let Some(route) = territory.trading_routes.first().cloned() else {
            continue;
        };
        if route.len() < 2 {
            continue;
        }
        let guild_tag = territory.guild.tag.clone();
        let stock = territory.storage.at;

        if route_blocked(world, &route, &guild_tag) {
            // A closed border on the chosen route voids the shipment at
            // dispatch; the goods are lost, not rerouted.
            log::debug!("{name}: surplus voided at a closed border");
            if let Some(t) = world.territory_mut(&name) {
                t.storage.at = Resources::ZERO;
            }
            continue;
        }

        if let Some(t) = world.territory_mut(&name) {
            t.storage.at = Resources::ZERO;
        }
        dispatch(world, &name, &route, stock);
    }
}

fn deficit_phase(world: &mut World) {
    for name in world.ordered_names() {
        let Some(territory) = world.territory(&name) else {
            continue;
        };
        if territory.hq || territory.guild.is_sentinel() {
            continue;
        }
        if !territory.net.any_negative() {
            continue;
        }
        let guild_tag = territory.guild.tag.clone();
        let Some(hq_name) = world.hq_by_guild.get(&guild_tag).cloned() else {
            continue;
        };
        let Some(hq) = world.territory(&hq_name) else {
            continue;
        };
        // The HQ dispatches along its own tree.
        let Some(route) = hq
            .trading_routes
            .iter()
            .find(|route| route.last() == Some(&name))
            .cloned()
        else {
            continue;
        };

        let total_route_tax = routing::route_tax(world, &guild_tag, &route);
        if total_route_tax >= 1.0 {
            continue;
        }
        let gross_factor = 1.0 / (1.0 - total_route_tax);

        let net = territory.net;
        let stored = territory.storage.at;
        let hq_stock = hq.storage.at;

        // Each resource is an independent affordability check.
        let mut shipped = Resources::ZERO;
        for kind in ResourceKind::ALL {
            let gap = -net.get(kind);
            if gap <= 0.0 {
                continue;
            }
            let need =
                (gap * DEFICIT_COVER_SECONDS / SECONDS_PER_HOUR - stored.get(kind)).max(0.0);
            if need <= 0.0 {
                continue;
            }
            let gross = need * gross_factor;
            if hq_stock.get(kind) >= gross {
                shipped.set(kind, gross);
            }
        }
        if !shipped.any_positive() {
            continue;
        }

        if let Some(hq) = world.territory_mut(&hq_name) {
            hq.storage.at = hq.storage.at.saturating_sub(&shipped);
        }
        dispatch(world, &hq_name, &route, shipped);
    }
}

/// Credit a realized tax share to the taxing guild's HQ. Without an HQ the
/// share is gone.
fn credit_tax(world: &mut World, guild_tag: &str, amount: Resources) {
    let Some(hq_name) = world.hq_by_guild.get(guild_tag).cloned() else {
        log::trace!("tax share for {guild_tag} dropped: guild has no HQ");
        return;
    };
    if let Some(hq) = world.territory_mut(&hq_name) {
        hq.storage.at += amount;
        clamp_hq(hq);
    }
}

fn clamp_hq(hq: &mut Territory) {
    for kind in ResourceKind::ALL {
        let cap = hq.storage.capacity.get(kind);
        if hq.storage.at.get(kind) > cap {
            hq.storage.at.set(kind, cap);
            hq.warning.set(Warnings::overflow_bit(kind));
        }
    }
}

fn movement_phase(world: &mut World, deps: &mut RoutingDeps<'_>) {
    let ids: Vec<TransitId> = world.transits.keys().copied().collect();
    for id in ids {
        let Some(transit) = world.transits.get(&id) else {
            continue;
        };
        if transit.moved {
            continue;
        }
        let mut transit = world.transits.remove(&id).expect("transit present");
        if step_transit(world, &mut transit, deps) {
            world.transits.insert(id, transit);
        }
    }
}

/// Advance one hop. Returns false when the transit ends here (delivered or
/// voided).
fn step_transit(world: &mut World, transit: &mut Transit, deps: &mut RoutingDeps<'_>) -> bool {
    transit.moved = true;
    if transit.route_index + 1 >= transit.route.len() {
        // A one-hop route means origin == destination; treat as arrival.
        return deliver(world, transit, deps);
    }
    transit.route_index += 1;
    let hop_id = transit.route[transit.route_index];
    let Some(hop_name) = world.territory_name(hop_id).map(str::to_string) else {
        log::warn!("transit {} crossed an unknown territory id {hop_id}", transit.id);
        return false;
    };

    let arrived = transit.route_index + 1 == transit.route.len();
    if arrived {
        return deliver(world, transit, deps);
    }

    let Some(hop) = world.territory(&hop_name) else {
        return false;
    };
    if hop.border == crate::state::Border::Closed && hop.guild.tag != transit.guild.tag {
        log::debug!(
            "transit {} voided at {hop_name}: closed border",
            transit.id
        );
        return false;
    }

    // Tax is realized immediately while crossing foreign territory.
    let tax = world.effective_tax(hop, &transit.guild.tag);
    if tax > 0.0 {
        let withheld = transit.resources * tax;
        transit.resources = transit.resources * (1.0 - tax);
        let taxing_guild = hop.guild.tag.clone();
        credit_tax(world, &taxing_guild, withheld);
    }

    transit.next_tax = transit
        .route
        .get(transit.route_index + 1)
        .and_then(|&next_id| world.territory_name(next_id))
        .and_then(|next_name| world.territory(next_name))
        .map(|next_hop| world.effective_tax(next_hop, &transit.guild.tag))
        .unwrap_or(0.0);
    true
}

/// Arrival at the destination: deliver, or re-home when the destination
/// changed hands mid-flight. Returns true only when the transit stays alive
/// on a new route.
fn deliver(world: &mut World, transit: &mut Transit, deps: &mut RoutingDeps<'_>) -> bool {
    let Some(dest_name) = world
        .territory_name(transit.route[transit.route_index])
        .map(str::to_string)
    else {
        return false;
    };
    let Some(dest) = world.territory(&dest_name) else {
        return false;
    };

    if dest.guild.tag != transit.dest_guild {
        return rehome(world, transit, &dest_name, deps);
    }

    let is_hq = dest.hq;
    let Some(dest) = world.territory_mut(&dest_name) else {
        return false;
    };
    dest.storage.at += transit.resources;
    if is_hq {
        clamp_hq(dest);
    } else if dest.storage.at.exceeds(&dest.storage.capacity) {
        for kind in ResourceKind::ALL {
            if dest.storage.at.get(kind) > dest.storage.capacity.get(kind) {
                dest.warning.set(Warnings::overflow_bit(kind));
            }
        }
    }
    log::trace!(
        "transit {} delivered to {dest_name} at tick {}",
        transit.id,
        world.tick
    );
    false
}

/// The destination was captured; try to steer the goods to an HQ of the new
/// owner. Unreachable goods are voided.
fn rehome(
    world: &mut World,
    transit: &mut Transit,
    at_name: &str,
    deps: &mut RoutingDeps<'_>,
) -> bool {
    let Some(new_guild) = world.territory(at_name).map(|t| t.guild.clone()) else {
        return false;
    };
    if new_guild.is_sentinel() {
        log::debug!("transit {} voided: destination lost to no guild", transit.id);
        return false;
    }
    let Some(hq_name) = world.hq_by_guild.get(&new_guild.tag).cloned() else {
        log::debug!(
            "transit {} voided: {} has no HQ to re-home to",
            transit.id,
            new_guild.tag
        );
        return false;
    };
    let Some(path) = routing::find_route(
        world,
        &new_guild.tag,
        RoutingMode::Cheapest,
        at_name,
        &hq_name,
        deps,
    ) else {
        return false;
    };

    let route_ids: Vec<_> = path
        .iter()
        .filter_map(|name| world.territory(name).map(|t| t.id))
        .collect();
    if route_ids.len() != path.len() || route_ids.is_empty() {
        return false;
    }
    transit.dest_guild = new_guild.tag.clone();
    transit.guild = new_guild;
    transit.destination = *route_ids.last().expect("non-empty route");
    transit.route = route_ids;
    transit.route_index = 0;
    transit.next_tax = 0.0;
    transit.moved = true;
    true
}
