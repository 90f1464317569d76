//! Cost and bonus tables.
//!
//! The engine ships a complete built-in table; a cost file replaces it
//! wholesale at boot or through a snapshot load. Unknown upgrade/bonus keys
//! in a file are ignored so newer tables stay loadable.

use crate::state::{BonusId, ResourceKind, UpgradeId};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Base seconds between storage emissions, before rate bonuses.
pub const BASE_EMISSION_INTERVAL: f64 = 4.0;

/// Cost curve and stat multipliers of one upgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeDef {
    /// Per-hour cost indexed by level.
    pub value: Vec<f64>,
    pub resource_type: ResourceKind,
    /// Stat scaling indexed by level.
    pub multiplier: Vec<f64>,
}

/// Cost curve and effect values of one bonus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusDef {
    /// Per-hour cost indexed by level.
    pub cost: Vec<f64>,
    /// Effect value indexed by level (multiplier, interval seconds, …).
    pub value: Vec<f64>,
    pub resource_type: ResourceKind,
    pub max_level: u32,
}

/// Unupgraded tower statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TowerBases {
    pub damage_low: f64,
    pub damage_high: f64,
    pub attack: f64,
    pub health: f64,
    pub defence: f64,
}

impl Default for TowerBases {
    fn default() -> Self {
        Self {
            damage_low: 1000.0,
            damage_high: 1500.0,
            attack: 0.5,
            health: 300_000.0,
            defence: 0.1,
        }
    }
}

/// The global, replaceable cost configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostTable {
    pub upgrades: FxHashMap<UpgradeId, UpgradeDef>,
    pub bonuses: FxHashMap<BonusId, BonusDef>,
    /// Per-territory base capacity of each bulk resource.
    pub base_resource_capacity: f64,
    /// Per-territory base emerald capacity.
    pub base_emerald_capacity: f64,
    /// HQ emerald capacity by larger-emerald-storage level.
    pub hq_emerald_capacity: [f64; 7],
    pub tower: TowerBases,
}

impl Default for CostTable {
    fn default() -> Self {
        default_table()
    }
}

impl CostTable {
    /// Hourly cost of an upgrade at a level, clamped to the table.
    pub fn upgrade_cost(&self, id: UpgradeId, level: u32) -> f64 {
        self.upgrades
            .get(&id)
            .map(|def| at_level(&def.value, level))
            .unwrap_or(0.0)
    }

    pub fn upgrade_multiplier(&self, id: UpgradeId, level: u32) -> f64 {
        self.upgrades
            .get(&id)
            .map(|def| at_level_or(&def.multiplier, level, 1.0))
            .unwrap_or(1.0)
    }

    pub fn upgrade_resource(&self, id: UpgradeId) -> ResourceKind {
        self.upgrades
            .get(&id)
            .map(|def| def.resource_type)
            .unwrap_or_else(|| upgrade_resource_class(id))
    }

    /// Hourly cost of a bonus at a level, clamped to the table.
    pub fn bonus_cost(&self, id: BonusId, level: u32) -> f64 {
        self.bonuses
            .get(&id)
            .map(|def| at_level(&def.cost, level))
            .unwrap_or(0.0)
    }

    pub fn bonus_value(&self, id: BonusId, level: u32) -> f64 {
        self.bonuses
            .get(&id)
            .map(|def| at_level_or(&def.value, level, 1.0))
            .unwrap_or(1.0)
    }

    pub fn bonus_resource(&self, id: BonusId) -> ResourceKind {
        self.bonuses
            .get(&id)
            .map(|def| def.resource_type)
            .unwrap_or_else(|| bonus_resource_class(id))
    }

    pub fn bonus_max_level(&self, id: BonusId) -> u32 {
        self.bonuses.get(&id).map(|def| def.max_level).unwrap_or(0)
    }

    /// Seconds between bulk-resource emissions at a resource-rate level.
    pub fn resource_interval(&self, level: u32) -> f64 {
        self.bonus_value(BonusId::ResourceRate, level)
            .max(1.0)
            .min(BASE_EMISSION_INTERVAL)
    }

    /// Seconds between emerald emissions at an emerald-rate level.
    pub fn emerald_interval(&self, level: u32) -> f64 {
        self.bonus_value(BonusId::EmeraldRate, level)
            .max(1.0)
            .min(BASE_EMISSION_INTERVAL)
    }

    pub fn hq_emerald_capacity(&self, level: u32) -> f64 {
        let idx = (level as usize).min(self.hq_emerald_capacity.len() - 1);
        self.hq_emerald_capacity[idx]
    }
}

fn at_level(values: &[f64], level: u32) -> f64 {
    at_level_or(values, level, 0.0)
}

fn at_level_or(values: &[f64], level: u32, default: f64) -> f64 {
    if values.is_empty() {
        return default;
    }
    let idx = (level as usize).min(values.len() - 1);
    values[idx]
}

/// The fixed upgrade → resource-class mapping.
pub fn upgrade_resource_class(id: UpgradeId) -> ResourceKind {
    match id {
        UpgradeId::Damage => ResourceKind::Ores,
        UpgradeId::Attack => ResourceKind::Crops,
        UpgradeId::Health => ResourceKind::Wood,
        UpgradeId::Defence => ResourceKind::Fish,
    }
}

/// The fixed bonus → resource-class mapping.
pub fn bonus_resource_class(id: BonusId) -> ResourceKind {
    match id {
        BonusId::StrongerMinions => ResourceKind::Wood,
        BonusId::TowerMultiAttack => ResourceKind::Fish,
        BonusId::TowerAura => ResourceKind::Crops,
        BonusId::TowerVolley => ResourceKind::Ores,
        BonusId::GatheringXp => ResourceKind::Wood,
        BonusId::MobXp => ResourceKind::Fish,
        BonusId::MobDamage => ResourceKind::Ores,
        BonusId::PvpDamage => ResourceKind::Crops,
        BonusId::XpSeeking => ResourceKind::Emeralds,
        BonusId::TomeSeeking => ResourceKind::Fish,
        BonusId::EmeraldSeeking => ResourceKind::Wood,
        BonusId::LargerResourceStorage => ResourceKind::Emeralds,
        BonusId::LargerEmeraldStorage => ResourceKind::Wood,
        BonusId::EfficientResource => ResourceKind::Emeralds,
        BonusId::EfficientEmerald => ResourceKind::Ores,
        BonusId::ResourceRate => ResourceKind::Emeralds,
        BonusId::EmeraldRate => ResourceKind::Crops,
    }
}

/// The built-in table. Balance fidelity to any particular game is a
/// non-goal; a cost file replaces these numbers wholesale.
pub fn default_table() -> CostTable {
    let mut upgrades = FxHashMap::default();
    let upgrade_costs: [f64; 12] = [
        0.0, 100.0, 300.0, 600.0, 1200.0, 2400.0, 4800.0, 8400.0, 12000.0, 15600.0, 19200.0,
        22800.0,
    ];
    let damage_mult: [f64; 12] = [
        1.0, 1.4, 1.8, 2.2, 2.6, 3.0, 3.5, 4.0, 4.5, 5.0, 5.5, 6.0,
    ];
    let attack_mult: [f64; 12] = [
        1.0, 1.3, 1.6, 1.9, 2.2, 2.5, 2.8, 3.1, 3.4, 3.7, 4.0, 4.3,
    ];
    let health_mult: [f64; 12] = [
        1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0, 4.5, 5.0, 5.5, 6.0, 6.5,
    ];
    let defence_mult: [f64; 12] = [
        1.0, 1.2, 1.4, 1.6, 1.8, 2.0, 2.2, 2.4, 2.6, 2.8, 3.0, 3.2,
    ];
    for (id, mult) in [
        (UpgradeId::Damage, damage_mult),
        (UpgradeId::Attack, attack_mult),
        (UpgradeId::Health, health_mult),
        (UpgradeId::Defence, defence_mult),
    ] {
        upgrades.insert(
            id,
            UpgradeDef {
                value: upgrade_costs.to_vec(),
                resource_type: upgrade_resource_class(id),
                multiplier: mult.to_vec(),
            },
        );
    }

    let mut bonuses = FxHashMap::default();
    let mut bonus = |id: BonusId, cost: &[f64], value: &[f64]| {
        bonuses.insert(
            id,
            BonusDef {
                cost: cost.to_vec(),
                value: value.to_vec(),
                resource_type: bonus_resource_class(id),
                max_level: (cost.len().saturating_sub(1)) as u32,
            },
        );
    };

    bonus(
        BonusId::StrongerMinions,
        &[0.0, 1200.0, 2400.0, 4800.0],
        &[1.0, 1.5, 2.0, 2.5],
    );
    bonus(BonusId::TowerMultiAttack, &[0.0, 4800.0], &[1.0, 2.0]);
    bonus(
        BonusId::TowerAura,
        &[0.0, 3000.0, 6000.0, 9000.0],
        &[0.0, 24.0, 18.0, 12.0],
    );
    bonus(
        BonusId::TowerVolley,
        &[0.0, 3000.0, 6000.0, 9000.0],
        &[0.0, 20.0, 15.0, 10.0],
    );
    bonus(
        BonusId::GatheringXp,
        &[0.0, 600.0, 1300.0, 2000.0, 2700.0, 3400.0, 5500.0, 10000.0],
        &[1.0, 1.1, 1.2, 1.3, 1.4, 1.5, 1.8, 2.0],
    );
    bonus(
        BonusId::MobXp,
        &[0.0, 600.0, 1200.0, 1800.0, 2400.0, 3000.0, 5000.0, 8000.0],
        &[1.0, 1.1, 1.2, 1.3, 1.4, 1.5, 1.8, 2.0],
    );
    bonus(
        BonusId::MobDamage,
        &[0.0, 600.0, 1200.0, 1800.0, 2400.0, 3000.0, 5000.0, 8000.0],
        &[1.0, 1.2, 1.4, 1.6, 1.8, 2.0, 2.5, 3.0],
    );
    bonus(
        BonusId::PvpDamage,
        &[0.0, 600.0, 1200.0, 1800.0, 2400.0, 3000.0, 5000.0, 8000.0],
        &[1.0, 1.2, 1.4, 1.6, 1.8, 2.0, 2.5, 3.0],
    );
    bonus(
        BonusId::XpSeeking,
        &[0.0, 3600.0, 9000.0, 15000.0, 22500.0, 30000.0],
        &[0.0, 5.0, 10.0, 15.0, 20.0, 25.0],
    );
    bonus(BonusId::TomeSeeking, &[0.0, 3600.0], &[0.0, 1.0]);
    bonus(BonusId::EmeraldSeeking, &[0.0, 3600.0], &[0.0, 1.0]);
    bonus(
        BonusId::LargerResourceStorage,
        &[0.0, 600.0, 1200.0, 1800.0, 2400.0, 3000.0, 3600.0],
        &[1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0],
    );
    bonus(
        BonusId::LargerEmeraldStorage,
        &[0.0, 600.0, 1200.0, 1800.0, 2400.0, 3000.0, 3600.0],
        &[1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0],
    );
    bonus(
        BonusId::EfficientResource,
        &[0.0, 6000.0, 9000.0, 12000.0, 15000.0, 18000.0, 21000.0],
        &[1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0],
    );
    bonus(
        BonusId::EfficientEmerald,
        &[0.0, 2000.0, 8000.0, 32000.0],
        &[1.0, 1.35, 1.7, 2.0],
    );
    bonus(
        BonusId::ResourceRate,
        &[0.0, 6000.0, 12000.0, 18000.0],
        &[4.0, 3.0, 2.0, 1.0],
    );
    bonus(
        BonusId::EmeraldRate,
        &[0.0, 2000.0, 8000.0, 32000.0],
        &[4.0, 3.0, 2.0, 1.0],
    );

    CostTable {
        upgrades,
        bonuses,
        base_resource_capacity: 300.0,
        base_emerald_capacity: 3000.0,
        hq_emerald_capacity: [
            5000.0, 16000.0, 32000.0, 48000.0, 64000.0, 80000.0, 96000.0,
        ],
        tower: TowerBases::default(),
    }
}

// =============================================================================
// Cost file parsing
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUpgrade {
    value: Vec<f64>,
    resource_type: ResourceKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBonus {
    cost: Vec<f64>,
    value: Vec<f64>,
    resource_type: ResourceKind,
    max_level: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCostFile {
    /// Keyed by upgrade name; unknown names are dropped.
    #[serde(default)]
    upgrades: std::collections::BTreeMap<String, RawUpgrade>,
    /// Keyed by upgrade name.
    #[serde(default)]
    upgrade_multipliers: std::collections::BTreeMap<String, Vec<f64>>,
    /// Keyed by bonus name; unknown names are dropped.
    #[serde(default)]
    bonuses: std::collections::BTreeMap<String, RawBonus>,
    #[serde(default)]
    base_resource_capacity: Option<f64>,
    #[serde(default)]
    base_emerald_capacity: Option<f64>,
    #[serde(default)]
    hq_emerald_capacity: Option<[f64; 7]>,
    #[serde(default)]
    tower: Option<TowerBases>,
}

/// Load a cost file, replacing the built-in table.
///
/// Unknown upgrade/bonus keys are skipped with a debug log; missing known
/// keys fall back to the built-in defaults so a partial file stays usable.
pub fn load_cost_file(path: &Path) -> anyhow::Result<CostTable> {
    let bytes = std::fs::read(path)?;
    let raw: RawCostFile = serde_json::from_slice(&bytes)?;
    Ok(table_from_raw(raw))
}

fn table_from_raw(raw: RawCostFile) -> CostTable {
    let mut table = default_table();

    for (key, entry) in raw.upgrades {
        let Some(id) = UpgradeId::ALL.iter().copied().find(|u| u.key() == key) else {
            log::debug!("cost file: skipping unknown upgrade kind {key:?}");
            continue;
        };
        let multiplier = raw
            .upgrade_multipliers
            .get(&key)
            .cloned()
            .unwrap_or_else(|| vec![1.0]);
        table.upgrades.insert(
            id,
            UpgradeDef {
                value: entry.value,
                resource_type: entry.resource_type,
                multiplier,
            },
        );
    }

    for (key, entry) in raw.bonuses {
        let Some(id) = BonusId::ALL.iter().copied().find(|b| b.key() == key) else {
            log::debug!("cost file: skipping unknown bonus kind {key:?}");
            continue;
        };
        table.bonuses.insert(
            id,
            BonusDef {
                cost: entry.cost,
                value: entry.value,
                resource_type: entry.resource_type,
                max_level: entry.max_level,
            },
        );
    }

    if let Some(v) = raw.base_resource_capacity {
        table.base_resource_capacity = v;
    }
    if let Some(v) = raw.base_emerald_capacity {
        table.base_emerald_capacity = v;
    }
    if let Some(v) = raw.hq_emerald_capacity {
        table.hq_emerald_capacity = v;
    }
    if let Some(v) = raw.tower {
        table.tower = v;
    }
    table
}
