//! The per-tick production pass.
//!
//! For every territory: roll up configured costs, decide per-item
//! affordability, compute generation, accumulate and emit into storage,
//! consume upkeep, clamp HQ storage, refresh derived stats. Territories are
//! independent here; cross-territory effects happen only in transit and
//! routing, so the pass fans out across a thread pool unless an external
//! calculator is attached.

use crate::config::RuntimeOptions;
use crate::costs::{CostTable, BASE_EMISSION_INTERVAL};
use crate::state::{
    BonusId, ResourceKind, Resources, Territory, UpgradeId, Warnings, World, SECONDS_PER_HOUR,
};
use crate::systems::treasury;
use rayon::prelude::*;
use tracing::instrument;

/// Derived storage capacity of a territory.
///
/// Bulk resources: `base × larger-resource-storage × (HQ ? 5 : 1)`.
/// Emeralds: the per-level HQ ladder for HQs, the general formula otherwise.
pub fn storage_capacity(territory: &Territory, costs: &CostTable) -> Resources {
    let bulk_mult = costs.bonus_value(
        BonusId::LargerResourceStorage,
        territory.bonuses.get(BonusId::LargerResourceStorage).at,
    );
    let hq_mult = if territory.hq { 5.0 } else { 1.0 };
    let emerald_level = territory.bonuses.get(BonusId::LargerEmeraldStorage).at;

    let mut capacity = Resources::ZERO;
    for kind in ResourceKind::BULK {
        capacity.set(kind, costs.base_resource_capacity * bulk_mult * hq_mult);
    }
    let emeralds = if territory.hq {
        costs.hq_emerald_capacity(emerald_level)
    } else {
        costs.base_emerald_capacity * costs.bonus_value(BonusId::LargerEmeraldStorage, emerald_level)
    };
    capacity.set(ResourceKind::Emeralds, emeralds);
    capacity
}

/// Run the production pass for every territory.
#[instrument(skip_all, name = "production")]
pub fn run_production_pass(world: &mut World) {
    let World {
        territories,
        costs,
        options,
        tick,
        ..
    } = world;
    let tick = *tick;
    let costs: &CostTable = costs;
    let options: &RuntimeOptions = options;

    if options.external_calculator_active {
        // An external calculator observes territories mid-pass; keep the
        // pass serial so it races with nothing.
        for territory in territories.values_mut() {
            update_territory(territory, costs, options, tick);
        }
    } else {
        territories
            .par_iter_mut()
            .for_each(|(_, territory)| update_territory(territory, costs, options, tick));
    }
}

/// Route tax rounded to four decimals, as used for cost and generation
/// adjustment. Capped just below 1 so the gross-up factor stays finite.
fn effective_route_tax(territory: &Territory) -> f64 {
    if territory.hq || territory.route_tax <= 0.0 {
        return 0.0;
    }
    ((territory.route_tax * 10_000.0).round() / 10_000.0).min(0.9999)
}

fn update_territory(
    territory: &mut Territory,
    costs: &CostTable,
    options: &RuntimeOptions,
    tick: u64,
) {
    // Configured hourly cost rollup, pre-tax.
    let mut set_cost = Resources::ZERO;
    for (id, pair) in territory.upgrades.iter() {
        if pair.set > 0 {
            *set_cost.get_mut(costs.upgrade_resource(id)) += costs.upgrade_cost(id, pair.set);
        }
    }
    for (id, pair) in territory.bonuses.iter() {
        if pair.set > 0 {
            *set_cost.get_mut(costs.bonus_resource(id)) += costs.bonus_cost(id, pair.set);
        }
    }

    // What the owner sees is the gross the HQ must ship so the net after
    // route tax still covers the upkeep.
    let route_tax = effective_route_tax(territory);
    let gross_factor = if route_tax > 0.0 {
        1.0 / (1.0 - route_tax)
    } else {
        1.0
    };
    territory.costs = set_cost * gross_factor;

    // Affordability, independent per item: an unaffordable bonus never
    // cascades. The check and the consumption both use the pre-tax
    // per-second cost; the tax itself is paid in transit.
    let mut per_second_cost = Resources::ZERO;
    for id in UpgradeId::ALL {
        let set = territory.upgrades.get(id).set;
        let kind = costs.upgrade_resource(id);
        let per_second = costs.upgrade_cost(id, set) / SECONDS_PER_HOUR;
        let at = if set > 0 && territory.storage.at.get(kind) >= per_second {
            set
        } else {
            0
        };
        territory.upgrades.get_mut(id).at = at;
        if at > 0 {
            *per_second_cost.get_mut(kind) += per_second;
        }
    }
    for id in BonusId::ALL {
        let set = territory.bonuses.get(id).set;
        let kind = costs.bonus_resource(id);
        let per_second = costs.bonus_cost(id, set) / SECONDS_PER_HOUR;
        let at = if set > 0 && territory.storage.at.get(kind) >= per_second {
            set
        } else {
            0
        };
        territory.bonuses.get_mut(id).at = at;
        if at > 0 {
            *per_second_cost.get_mut(kind) += per_second;
        }
    }

    // Hourly generation at the source: efficiency and rate multipliers plus
    // the treasury boost.
    let treasury_mult = 1.0 + territory.generation_bonus / 100.0;
    let efficient_resource = costs.bonus_value(
        BonusId::EfficientResource,
        territory.bonuses.get(BonusId::EfficientResource).at,
    );
    let efficient_emerald = costs.bonus_value(
        BonusId::EfficientEmerald,
        territory.bonuses.get(BonusId::EfficientEmerald).at,
    );
    let resource_interval =
        costs.resource_interval(territory.bonuses.get(BonusId::ResourceRate).at);
    let emerald_interval = costs.emerald_interval(territory.bonuses.get(BonusId::EmeraldRate).at);
    let resource_rate_mult = BASE_EMISSION_INTERVAL / resource_interval;
    let emerald_rate_mult = BASE_EMISSION_INTERVAL / emerald_interval;

    let mut produced = Resources::ZERO;
    for kind in ResourceKind::BULK {
        produced.set(
            kind,
            territory.base_generation.get(kind) * efficient_resource * treasury_mult
                * resource_rate_mult,
        );
    }
    produced.set(
        ResourceKind::Emeralds,
        territory.base_generation.get(ResourceKind::Emeralds) * efficient_emerald * treasury_mult
            * emerald_rate_mult,
    );

    // The displayed rate is what actually reaches the HQ after route tax;
    // the accumulator below fills with the untaxed local output, and the
    // transit pass realizes the tax en route.
    let delivered_factor = 1.0 - route_tax;
    territory.resource_generation = produced * delivered_factor;
    territory.net = territory.resource_generation - set_cost;

    // Capacity depends on affordable storage bonuses and the HQ flag.
    territory.storage.capacity = storage_capacity(territory, costs);

    // Accumulate one second of output, then emit on the rate interval.
    territory.resource_accumulator += produced * (1.0 / SECONDS_PER_HOUR);

    if (tick - territory.last_resource_tick) as f64 >= resource_interval {
        release(territory, &ResourceKind::BULK, Warnings::OVERFLOW_RESOURCES);
        territory.last_resource_tick = tick;
    }
    if (tick - territory.last_emerald_tick) as f64 >= emerald_interval {
        release(
            territory,
            &[ResourceKind::Emeralds],
            Warnings::OVERFLOW_EMERALDS,
        );
        territory.last_emerald_tick = tick;
    }

    // Consumption happens after release.
    territory.storage.at = territory.storage.at.saturating_sub(&per_second_cost);

    // Only HQs have a hard cap; elsewhere the excess stays visible (and
    // ships out next minute).
    if territory.hq {
        for kind in ResourceKind::ALL {
            let cap = territory.storage.capacity.get(kind);
            if territory.storage.at.get(kind) > cap {
                territory.storage.at.set(kind, cap);
                territory.warning.set(Warnings::overflow_bit(kind));
            }
        }
    }

    treasury::refresh_treasury(territory, tick, options.treasury_enabled);
    treasury::refresh_tower_stats(territory, costs);
}

/// Move the accumulator into storage for the given resource class, bounded
/// by remaining capacity. What does not fit is discarded; this is the only
/// path where generated resources are ever lost. The class's overflow bit
/// reflects the post-release state.
fn release(territory: &mut Territory, kinds: &[ResourceKind], warning_bit: u32) {
    let mut overflowed = false;
    for &kind in kinds {
        let amount = territory.resource_accumulator.get(kind);
        let stored = territory.storage.at.get(kind);
        let room = (territory.storage.capacity.get(kind) - stored).max(0.0);
        let fit = amount.min(room);
        territory.storage.at.set(kind, stored + fit);
        if amount > room {
            overflowed = true;
            log::trace!(
                "{}: discarding {:.3} {} over capacity",
                territory.name,
                amount - room,
                kind
            );
        }
        territory.resource_accumulator.set(kind, 0.0);
        // Storage may still sit above capacity after a manual edit or an
        // oversized delivery.
        if territory.storage.at.get(kind) > territory.storage.capacity.get(kind) {
            overflowed = true;
        }
    }
    if overflowed {
        territory.warning.set(warning_bit);
    } else {
        territory.warning.clear(warning_bit);
    }
}
