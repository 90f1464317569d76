//! Treasury tiers, the generation-bonus table, and derived tower stats.

use crate::costs::CostTable;
use crate::state::{BonusId, Territory, Tier, UpgradeId};

/// Tick thresholds of the treasury ladder (ticks are simulated seconds).
const TIER_LOW: u64 = 3_600;
const TIER_MEDIUM: u64 = 86_400;
const TIER_HIGH: u64 = 432_000;
const TIER_VERY_HIGH: u64 = 1_036_800;

/// Percent generation boost by HQ distance class (rows) and treasury tier
/// (columns). Distances 0-2 share a row; everything past 5 uses the last.
const GENERATION_BONUS: [[f64; 5]; 5] = [
    [0.0, 10.0, 20.0, 25.0, 30.0],   // distance 0-2
    [0.0, 8.5, 17.0, 21.25, 25.5],   // distance 3
    [0.0, 7.0, 14.0, 17.5, 21.0],    // distance 4
    [0.0, 5.5, 11.0, 13.75, 16.5],   // distance 5
    [0.0, 4.0, 8.0, 10.0, 12.0],     // distance >= 6
];

/// Treasury tier from ticks since capture.
pub fn tier_for_held_ticks(held: u64) -> Tier {
    if held < TIER_LOW {
        Tier::VeryLow
    } else if held < TIER_MEDIUM {
        Tier::Low
    } else if held < TIER_HIGH {
        Tier::Medium
    } else if held < TIER_VERY_HIGH {
        Tier::High
    } else {
        Tier::VeryHigh
    }
}

/// Percent boost for a territory `distance` hops from its HQ at `tier`.
pub fn generation_bonus(distance: u32, tier: Tier) -> f64 {
    let row = match distance {
        0..=2 => 0,
        3 => 1,
        4 => 2,
        5 => 3,
        _ => 4,
    };
    GENERATION_BONUS[row][tier.index()]
}

/// Refresh `treasury` and `generation_bonus` on a territory.
///
/// The sentinel guild is pinned to the lowest tier. A manual override wins
/// over the held-time derivation. Unroutable non-HQs get no boost: the
/// treasury link runs along the trading route.
pub fn refresh_treasury(territory: &mut Territory, tick: u64, treasury_enabled: bool) {
    territory.treasury = if territory.guild.is_sentinel() {
        Tier::VeryLow
    } else if let Some(level) = territory.treasury_override {
        level
    } else {
        tier_for_held_ticks(tick.saturating_sub(territory.captured_at))
    };

    territory.generation_bonus = if !treasury_enabled {
        0.0
    } else {
        match territory.hq_distance() {
            Some(distance) => generation_bonus(distance, territory.treasury),
            None => 0.0,
        }
    };
}

/// Aura level contribution to the aggregate tower level.
fn aura_levels(level: u32) -> u32 {
    match level {
        0 => 0,
        1 => 5,
        n => 4 + n,
    }
}

/// Volley level contribution to the aggregate tower level.
fn volley_levels(level: u32) -> u32 {
    match level {
        0 => 0,
        1 => 3,
        n => 2 + n,
    }
}

fn tower_tier(level: u32) -> Tier {
    if level >= 49 {
        Tier::VeryHigh
    } else if level >= 31 {
        Tier::High
    } else if level >= 19 {
        Tier::Medium
    } else if level >= 6 {
        Tier::Low
    } else {
        Tier::VeryLow
    }
}

/// Recompute the derived tower statistics from affordable upgrade levels and
/// link topology.
pub fn refresh_tower_stats(territory: &mut Territory, costs: &CostTable) {
    let damage_mult = costs.upgrade_multiplier(UpgradeId::Damage, territory.upgrades.get(UpgradeId::Damage).at);
    let attack_mult = costs.upgrade_multiplier(UpgradeId::Attack, territory.upgrades.get(UpgradeId::Attack).at);
    let health_mult = costs.upgrade_multiplier(UpgradeId::Health, territory.upgrades.get(UpgradeId::Health).at);
    let defence_mult =
        costs.upgrade_multiplier(UpgradeId::Defence, territory.upgrades.get(UpgradeId::Defence).at);

    let link_bonus = 1.0 + 0.3 * territory.links.direct.len() as f64;
    let external_bonus = if territory.hq {
        1.5 + 0.25 * territory.links.externals.len() as f64
    } else {
        1.0
    };
    let defensive = link_bonus * external_bonus;

    let bases = &costs.tower;
    let mut level: u32 = territory.upgrades.iter().map(|(_, pair)| pair.at).sum();
    level += aura_levels(territory.bonuses.get(BonusId::TowerAura).at);
    level += volley_levels(territory.bonuses.get(BonusId::TowerVolley).at);

    let mut tier = tower_tier(level);
    if territory.hq {
        tier = tier.promoted();
    }

    territory.tower = crate::state::TowerStats {
        damage_low: bases.damage_low * damage_mult * defensive,
        damage_high: bases.damage_high * damage_mult * defensive,
        attack: bases.attack * attack_mult,
        health: bases.health * health_mult * defensive,
        defence: bases.defence * defence_mult,
        level,
        tier,
    };
}
