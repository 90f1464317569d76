use crate::config::RuntimeOptions;
use crate::costs::CostTable;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Mul, Sub};

pub type TerritoryId = u32;
pub type TransitId = u64;
pub type TributeId = u64;
pub type GuildTag = String;

/// Seconds in one simulated hour. One tick is one simulated second.
pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// Ticks between transit/tribute passes.
pub const TICKS_PER_MINUTE: u64 = 60;

/// The five fungible resource classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Emeralds,
    Ores,
    Wood,
    Fish,
    Crops,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Emeralds,
        ResourceKind::Ores,
        ResourceKind::Wood,
        ResourceKind::Fish,
        ResourceKind::Crops,
    ];

    /// The four bulk resources (everything except emeralds), which share one
    /// emission clock and one capacity formula.
    pub const BULK: [ResourceKind; 4] = [
        ResourceKind::Ores,
        ResourceKind::Wood,
        ResourceKind::Fish,
        ResourceKind::Crops,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ResourceKind::Emeralds => "emeralds",
            ResourceKind::Ores => "ores",
            ResourceKind::Wood => "wood",
            ResourceKind::Fish => "fish",
            ResourceKind::Crops => "crops",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// A five-resource vector. Component-wise arithmetic, non-negative by
/// convention everywhere except transient intermediate math.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resources {
    pub emeralds: f64,
    pub ores: f64,
    pub wood: f64,
    pub fish: f64,
    pub crops: f64,
}

impl Resources {
    pub const ZERO: Resources = Resources {
        emeralds: 0.0,
        ores: 0.0,
        wood: 0.0,
        fish: 0.0,
        crops: 0.0,
    };

    pub fn get(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Emeralds => self.emeralds,
            ResourceKind::Ores => self.ores,
            ResourceKind::Wood => self.wood,
            ResourceKind::Fish => self.fish,
            ResourceKind::Crops => self.crops,
        }
    }

    pub fn get_mut(&mut self, kind: ResourceKind) -> &mut f64 {
        match kind {
            ResourceKind::Emeralds => &mut self.emeralds,
            ResourceKind::Ores => &mut self.ores,
            ResourceKind::Wood => &mut self.wood,
            ResourceKind::Fish => &mut self.fish,
            ResourceKind::Crops => &mut self.crops,
        }
    }

    pub fn set(&mut self, kind: ResourceKind, value: f64) {
        *self.get_mut(kind) = value;
    }

    /// True when every component is (numerically) zero.
    pub fn is_zero(&self) -> bool {
        ResourceKind::ALL.iter().all(|&k| self.get(k) == 0.0)
    }

    /// True when any component is strictly positive.
    pub fn any_positive(&self) -> bool {
        ResourceKind::ALL.iter().any(|&k| self.get(k) > 0.0)
    }

    /// True when any component is strictly negative.
    pub fn any_negative(&self) -> bool {
        ResourceKind::ALL.iter().any(|&k| self.get(k) < 0.0)
    }

    /// Component-wise subtraction floored at zero.
    pub fn saturating_sub(&self, rhs: &Resources) -> Resources {
        let mut out = *self;
        for kind in ResourceKind::ALL {
            out.set(kind, (self.get(kind) - rhs.get(kind)).max(0.0));
        }
        out
    }

    /// Clamp each component to the matching component of `cap`.
    /// Returns true when anything was cut.
    pub fn clamp_to(&mut self, cap: &Resources) -> bool {
        let mut clamped = false;
        for kind in ResourceKind::ALL {
            if self.get(kind) > cap.get(kind) {
                self.set(kind, cap.get(kind));
                clamped = true;
            }
        }
        clamped
    }

    /// True when any component exceeds the matching component of `cap`.
    pub fn exceeds(&self, cap: &Resources) -> bool {
        ResourceKind::ALL.iter().any(|&k| self.get(k) > cap.get(k))
    }
}

impl Add for Resources {
    type Output = Resources;
    fn add(self, rhs: Resources) -> Resources {
        let mut out = self;
        for kind in ResourceKind::ALL {
            *out.get_mut(kind) += rhs.get(kind);
        }
        out
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, rhs: Resources) {
        for kind in ResourceKind::ALL {
            *self.get_mut(kind) += rhs.get(kind);
        }
    }
}

impl Sub for Resources {
    type Output = Resources;
    fn sub(self, rhs: Resources) -> Resources {
        let mut out = self;
        for kind in ResourceKind::ALL {
            *out.get_mut(kind) -= rhs.get(kind);
        }
        out
    }
}

impl Mul<f64> for Resources {
    type Output = Resources;
    fn mul(self, rhs: f64) -> Resources {
        let mut out = self;
        for kind in ResourceKind::ALL {
            *out.get_mut(kind) *= rhs;
        }
        out
    }
}

/// Warning bits raised by the production and transit passes.
///
/// Bits are sticky within a tick and recomputed as conditions change; they
/// are visibility aids, never control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Warnings(pub u32);

impl Warnings {
    /// Bulk-resource storage exceeded capacity.
    pub const OVERFLOW_RESOURCES: u32 = 1 << 0;
    /// Emerald storage exceeded capacity.
    pub const OVERFLOW_EMERALDS: u32 = 1 << 1;

    pub fn set(&mut self, bit: u32) {
        self.0 |= bit;
    }

    pub fn clear(&mut self, bit: u32) {
        self.0 &= !bit;
    }

    pub fn contains(&self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn overflow_bit(kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::Emeralds => Self::OVERFLOW_EMERALDS,
            _ => Self::OVERFLOW_RESOURCES,
        }
    }
}

/// Border policy of a territory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Border {
    #[default]
    Open,
    Closed,
}

/// Route-selection mode of a territory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    #[default]
    Cheapest,
    Fastest,
}

/// Five-level rating used for both treasury tiers and tower tiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, Hash,
)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    #[default]
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::VeryLow,
        Tier::Low,
        Tier::Medium,
        Tier::High,
        Tier::VeryHigh,
    ];

    pub fn index(self) -> usize {
        match self {
            Tier::VeryLow => 0,
            Tier::Low => 1,
            Tier::Medium => 2,
            Tier::High => 3,
            Tier::VeryHigh => 4,
        }
    }

    /// One tier up, saturating at very-high.
    pub fn promoted(self) -> Tier {
        match self {
            Tier::VeryLow => Tier::Low,
            Tier::Low => Tier::Medium,
            Tier::Medium => Tier::High,
            Tier::High | Tier::VeryHigh => Tier::VeryHigh,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::VeryLow => "very-low",
            Tier::Low => "low",
            Tier::Medium => "medium",
            Tier::High => "high",
            Tier::VeryHigh => "very-high",
        };
        f.write_str(s)
    }
}

/// Owning guild of a territory, stored by value so the territory survives
/// guild-list rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildRef {
    pub name: String,
    pub tag: GuildTag,
}

impl GuildRef {
    pub const SENTINEL_NAME: &'static str = "No Guild";
    pub const SENTINEL_TAG: &'static str = "NONE";

    pub fn sentinel() -> GuildRef {
        GuildRef {
            name: Self::SENTINEL_NAME.to_string(),
            tag: Self::SENTINEL_TAG.to_string(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.tag == Self::SENTINEL_TAG
    }
}

impl Default for GuildRef {
    fn default() -> Self {
        Self::sentinel()
    }
}

impl std::fmt::Display for GuildRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.name, self.tag)
    }
}

/// Tax rates charged to shipments crossing this territory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxRates {
    /// Rate for unrelated guilds.
    pub tax: f64,
    /// Rate for guilds in the owner's ally list.
    pub ally: f64,
}

impl TaxRates {
    pub const DEFAULT_RATE: f64 = 0.05;
}

impl Default for TaxRates {
    fn default() -> Self {
        Self {
            tax: Self::DEFAULT_RATE,
            ally: Self::DEFAULT_RATE,
        }
    }
}

/// A configured level (`set`) and the level that was affordable last tick
/// (`at`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LevelPair {
    pub set: u32,
    pub at: u32,
}

/// The four tower upgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeId {
    Damage,
    Attack,
    Health,
    Defence,
}

impl UpgradeId {
    pub const ALL: [UpgradeId; 4] = [
        UpgradeId::Damage,
        UpgradeId::Attack,
        UpgradeId::Health,
        UpgradeId::Defence,
    ];

    /// Highest configurable level for any upgrade.
    pub const MAX_LEVEL: u32 = 11;

    pub fn key(self) -> &'static str {
        match self {
            UpgradeId::Damage => "damage",
            UpgradeId::Attack => "attack",
            UpgradeId::Health => "health",
            UpgradeId::Defence => "defence",
        }
    }

    fn slot(self) -> usize {
        match self {
            UpgradeId::Damage => 0,
            UpgradeId::Attack => 1,
            UpgradeId::Health => 2,
            UpgradeId::Defence => 3,
        }
    }
}

/// The seventeen territory bonuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BonusId {
    StrongerMinions,
    TowerMultiAttack,
    TowerAura,
    TowerVolley,
    GatheringXp,
    MobXp,
    MobDamage,
    PvpDamage,
    XpSeeking,
    TomeSeeking,
    EmeraldSeeking,
    LargerResourceStorage,
    LargerEmeraldStorage,
    EfficientResource,
    EfficientEmerald,
    ResourceRate,
    EmeraldRate,
}

impl BonusId {
    pub const ALL: [BonusId; 17] = [
        BonusId::StrongerMinions,
        BonusId::TowerMultiAttack,
        BonusId::TowerAura,
        BonusId::TowerVolley,
        BonusId::GatheringXp,
        BonusId::MobXp,
        BonusId::MobDamage,
        BonusId::PvpDamage,
        BonusId::XpSeeking,
        BonusId::TomeSeeking,
        BonusId::EmeraldSeeking,
        BonusId::LargerResourceStorage,
        BonusId::LargerEmeraldStorage,
        BonusId::EfficientResource,
        BonusId::EfficientEmerald,
        BonusId::ResourceRate,
        BonusId::EmeraldRate,
    ];

    pub fn key(self) -> &'static str {
        match self {
            BonusId::StrongerMinions => "stronger-minions",
            BonusId::TowerMultiAttack => "tower-multi-attack",
            BonusId::TowerAura => "tower-aura",
            BonusId::TowerVolley => "tower-volley",
            BonusId::GatheringXp => "gathering-xp",
            BonusId::MobXp => "mob-xp",
            BonusId::MobDamage => "mob-damage",
            BonusId::PvpDamage => "pvp-damage",
            BonusId::XpSeeking => "xp-seeking",
            BonusId::TomeSeeking => "tome-seeking",
            BonusId::EmeraldSeeking => "emerald-seeking",
            BonusId::LargerResourceStorage => "larger-resource-storage",
            BonusId::LargerEmeraldStorage => "larger-emerald-storage",
            BonusId::EfficientResource => "efficient-resource",
            BonusId::EfficientEmerald => "efficient-emerald",
            BonusId::ResourceRate => "resource-rate",
            BonusId::EmeraldRate => "emerald-rate",
        }
    }

    fn slot(self) -> usize {
        Self::ALL.iter().position(|&b| b == self).unwrap_or(0)
    }
}

/// Configured/affordable levels for the four upgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Upgrades([LevelPair; 4]);

impl Upgrades {
    pub fn get(&self, id: UpgradeId) -> LevelPair {
        self.0[id.slot()]
    }

    pub fn get_mut(&mut self, id: UpgradeId) -> &mut LevelPair {
        &mut self.0[id.slot()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (UpgradeId, LevelPair)> + '_ {
        UpgradeId::ALL.iter().map(move |&id| (id, self.get(id)))
    }
}

/// Configured/affordable levels for the seventeen bonuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bonuses([LevelPair; 17]);

impl Bonuses {
    pub fn get(&self, id: BonusId) -> LevelPair {
        self.0[id.slot()]
    }

    pub fn get_mut(&mut self, id: BonusId) -> &mut LevelPair {
        &mut self.0[id.slot()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (BonusId, LevelPair)> + '_ {
        BonusId::ALL.iter().map(move |&id| (id, self.get(id)))
    }
}

/// Current and maximum storage of a territory.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Storage {
    pub at: Resources,
    /// Derived each production tick from capacity bonuses and HQ status.
    pub capacity: Resources,
}

/// Derived combat statistics of a territory's tower.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TowerStats {
    pub damage_low: f64,
    pub damage_high: f64,
    /// Attacks per second.
    pub attack: f64,
    pub health: f64,
    /// Damage reduction fraction.
    pub defence: f64,
    /// Aggregate level (upgrades + aura/volley contributions).
    pub level: u32,
    pub tier: Tier,
}

/// Map rectangle of a territory, from the world file.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub start: [f64; 2],
    pub end: [f64; 2],
}

/// Same-guild topology caches, rebuilt by the routing layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Links {
    /// Adjacent territories owned by the same guild.
    pub direct: Vec<String>,
    /// Same-guild territories within graph distance 3 (includes `direct`).
    pub externals: Vec<String>,
}

/// The primary entity: a named node of the world graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Territory {
    pub name: String,
    pub id: TerritoryId,
    pub guild: GuildRef,
    pub hq: bool,
    pub upgrades: Upgrades,
    pub bonuses: Bonuses,
    pub border: Border,
    pub routing_mode: RoutingMode,
    pub tax: TaxRates,
    pub storage: Storage,
    /// Per-second generation accumulates here between emissions.
    pub resource_accumulator: Resources,
    pub last_resource_tick: u64,
    pub last_emerald_tick: u64,
    /// Immutable per-hour base generation from the world file.
    pub base_generation: Resources,
    /// Last-computed per-hour generation (route-tax adjusted for non-HQs).
    pub resource_generation: Resources,
    /// Per-hour cost rollup at configured levels, route-tax adjusted.
    pub costs: Resources,
    /// Per-hour generation minus pre-tax configured costs.
    pub net: Resources,
    /// Total tax fraction along the outbound route; -1 when HQ or unroutable.
    pub route_tax: f64,
    pub treasury: Tier,
    pub treasury_override: Option<Tier>,
    /// Percent boost applied to generation, from the treasury table.
    pub generation_bonus: f64,
    pub warning: Warnings,
    pub tower: TowerStats,
    pub location: Location,
    pub links: Links,
    /// Non-HQ: singleton path `[self, …, HQ]`. HQ: one path per member.
    pub trading_routes: Vec<Vec<String>>,
    /// Final hop of the selected route (the HQ), for non-HQ members.
    pub destination: Option<String>,
    /// Second hop of the selected route.
    pub next_territory: Option<String>,
    /// Tick at which the current guild took ownership.
    pub captured_at: u64,
}

impl Territory {
    pub fn new(name: String, id: TerritoryId, base_generation: Resources, location: Location) -> Self {
        Territory {
            name,
            id,
            guild: GuildRef::sentinel(),
            hq: false,
            upgrades: Upgrades::default(),
            bonuses: Bonuses::default(),
            border: Border::Open,
            routing_mode: RoutingMode::Cheapest,
            tax: TaxRates::default(),
            storage: Storage::default(),
            resource_accumulator: Resources::ZERO,
            last_resource_tick: 0,
            last_emerald_tick: 0,
            base_generation,
            resource_generation: base_generation,
            costs: Resources::ZERO,
            net: base_generation,
            route_tax: -1.0,
            treasury: Tier::VeryLow,
            treasury_override: None,
            generation_bonus: 0.0,
            warning: Warnings::default(),
            tower: TowerStats::default(),
            location,
            links: Links::default(),
            trading_routes: Vec::new(),
            destination: None,
            next_territory: None,
            captured_at: 0,
        }
    }

    /// Transfer ownership. Treasury drops to the lowest tier, the HQ flag
    /// clears, and the capture tick is stamped.
    pub fn set_owner(&mut self, guild: GuildRef, tick: u64) {
        if self.guild == guild {
            return;
        }
        self.guild = guild;
        self.hq = false;
        self.treasury = Tier::VeryLow;
        self.treasury_override = None;
        self.captured_at = tick;
    }

    /// Revert to the boot configuration, preserving identity and topology.
    pub fn reset(&mut self) {
        self.guild = GuildRef::sentinel();
        self.hq = false;
        self.upgrades = Upgrades::default();
        self.bonuses = Bonuses::default();
        self.border = Border::Open;
        self.routing_mode = RoutingMode::Cheapest;
        self.tax = TaxRates::default();
        self.storage = Storage::default();
        self.resource_accumulator = Resources::ZERO;
        self.last_resource_tick = 0;
        self.last_emerald_tick = 0;
        self.resource_generation = self.base_generation;
        self.costs = Resources::ZERO;
        self.net = self.base_generation;
        self.route_tax = -1.0;
        self.treasury = Tier::VeryLow;
        self.treasury_override = None;
        self.generation_bonus = 0.0;
        self.warning = Warnings::default();
        self.tower = TowerStats::default();
        self.links = Links::default();
        self.trading_routes = Vec::new();
        self.destination = None;
        self.next_territory = None;
        self.captured_at = 0;
    }

    /// Hop count of the selected route to the HQ. 0 for an HQ itself,
    /// `None` when unroutable.
    pub fn hq_distance(&self) -> Option<u32> {
        if self.hq {
            return Some(0);
        }
        self.trading_routes
            .first()
            .map(|route| route.len().saturating_sub(1) as u32)
    }
}

/// A guild: a named team identified by a short tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub name: String,
    pub tag: GuildTag,
    /// Tags of allied guilds (charged the ally tax when crossing).
    pub allies: Vec<GuildTag>,
    /// Hourly tribute inflow, derived from the active tribute set.
    pub tribute_in: Resources,
    /// Hourly tribute outflow, derived from the active tribute set.
    pub tribute_out: Resources,
}

impl Guild {
    pub fn new(name: String, tag: GuildTag) -> Self {
        Guild {
            name,
            tag,
            allies: Vec::new(),
            tribute_in: Resources::ZERO,
            tribute_out: Resources::ZERO,
        }
    }

    pub fn is_ally(&self, tag: &str) -> bool {
        self.allies.iter().any(|a| a == tag)
    }
}

/// An in-flight shipment moving one hop per minute along a fixed route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transit {
    pub id: TransitId,
    pub resources: Resources,
    pub origin: TerritoryId,
    pub destination: TerritoryId,
    /// Guild the shipment belongs to, stamped at dispatch.
    pub guild: GuildRef,
    /// Tag of the guild that owned the destination at dispatch; a mismatch
    /// on arrival means the destination changed hands mid-flight.
    pub dest_guild: GuildTag,
    pub route: Vec<TerritoryId>,
    pub created_at: u64,
    pub route_index: usize,
    /// Effective tax that will apply on the next step.
    pub next_tax: f64,
    /// Set once the transit has advanced this minute cycle.
    pub moved: bool,
}

impl Transit {
    pub fn current_hop(&self) -> TerritoryId {
        self.route[self.route_index]
    }
}

/// A recurring scheduled transfer between two guilds (or a spawn/sink when
/// one endpoint is empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tribute {
    pub id: TributeId,
    /// Source guild name; `None` mints at the destination.
    pub from: Option<String>,
    /// Destination guild name; `None` burns at the source.
    pub to: Option<String>,
    /// Transferred amount expressed per hour.
    pub hourly: Resources,
    /// Derived per-minute amount.
    pub per_minute: Resources,
    pub interval_minutes: u64,
    pub active: bool,
    pub created_at: u64,
    pub last_transfer: u64,
}

/// Complete engine state: entities plus derived lookup maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    pub tick: u64,
    pub territories: FxHashMap<String, Territory>,
    /// Derived: territory id → name.
    pub names_by_id: FxHashMap<TerritoryId, String>,
    /// Immutable after boot; symmetric neighbor relation from the world file.
    pub neighbors: FxHashMap<String, Vec<String>>,
    pub guilds: FxHashMap<GuildTag, Guild>,
    /// Derived: guild tag → HQ territory name.
    pub hq_by_guild: FxHashMap<GuildTag, String>,
    /// Keyed by id so iteration follows creation order.
    pub transits: BTreeMap<TransitId, Transit>,
    pub next_transit_id: TransitId,
    pub tributes: BTreeMap<TributeId, Tribute>,
    pub next_tribute_id: TributeId,
    pub options: RuntimeOptions,
    pub costs: CostTable,
    /// Blocks all mutation paths while a snapshot load is in progress.
    pub state_loading: bool,
}

impl World {
    pub fn territory(&self, name: &str) -> Option<&Territory> {
        self.territories.get(name)
    }

    pub fn territory_mut(&mut self, name: &str) -> Option<&mut Territory> {
        self.territories.get_mut(name)
    }

    pub fn territory_name(&self, id: TerritoryId) -> Option<&str> {
        self.names_by_id.get(&id).map(String::as_str)
    }

    pub fn guild_by_name(&self, name: &str) -> Option<&Guild> {
        self.guilds.values().find(|g| g.name == name)
    }

    /// Insert the guild behind `guild_ref` if it is not known yet.
    pub fn ensure_guild(&mut self, guild_ref: &GuildRef) {
        if guild_ref.is_sentinel() {
            return;
        }
        self.guilds
            .entry(guild_ref.tag.clone())
            .or_insert_with(|| Guild::new(guild_ref.name.clone(), guild_ref.tag.clone()));
    }

    /// Effective tax a hop charges a shipment owned by `guild_tag`.
    /// Zero for the shipment's own territory.
    pub fn effective_tax(&self, hop: &Territory, guild_tag: &str) -> f64 {
        if hop.guild.tag == guild_tag {
            return 0.0;
        }
        let allied = self
            .guilds
            .get(&hop.guild.tag)
            .map(|g| g.is_ally(guild_tag))
            .unwrap_or(false);
        if allied {
            hop.tax.ally
        } else {
            hop.tax.tax
        }
    }

    /// Rebuild `names_by_id` and `hq_by_guild` from a full territory scan.
    ///
    /// # Panics
    ///
    /// Panics when two territories claim the HQ role for one guild tag: that
    /// is an invariant violation and must not be silently repaired.
    pub fn rebuild_lookup_maps(&mut self) {
        self.names_by_id.clear();
        self.hq_by_guild.clear();
        for (name, territory) in &self.territories {
            self.names_by_id.insert(territory.id, name.clone());
            if territory.hq && !territory.guild.is_sentinel() {
                if let Some(previous) = self
                    .hq_by_guild
                    .insert(territory.guild.tag.clone(), name.clone())
                {
                    panic!(
                        "HQ map inconsistency: guild {} has HQs {} and {}",
                        territory.guild.tag, previous, name
                    );
                }
            }
        }
    }

    /// Best-effort memory hint: drop slack capacity in the hot collections.
    pub fn compact(&mut self) {
        for territory in self.territories.values_mut() {
            territory.trading_routes.shrink_to_fit();
            territory.links.direct.shrink_to_fit();
            territory.links.externals.shrink_to_fit();
        }
    }

    /// Territory names in a deterministic total order. Pass workers lock and
    /// iterate in this order so cross-territory effects stay reproducible.
    pub fn ordered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.territories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resources_arithmetic() {
        let mut a = Resources::ZERO;
        a.set(ResourceKind::Ores, 10.0);
        let b = a * 0.5;
        assert_eq!(b.get(ResourceKind::Ores), 5.0);
        assert_eq!((a + b).get(ResourceKind::Ores), 15.0);
        assert!(a.any_positive());
        assert!(!a.any_negative());
    }

    #[test]
    fn test_saturating_sub_floors_at_zero() {
        let mut a = Resources::ZERO;
        a.set(ResourceKind::Wood, 3.0);
        let mut b = Resources::ZERO;
        b.set(ResourceKind::Wood, 5.0);
        b.set(ResourceKind::Fish, 1.0);
        let out = a.saturating_sub(&b);
        assert_eq!(out.get(ResourceKind::Wood), 0.0);
        assert_eq!(out.get(ResourceKind::Fish), 0.0);
    }

    #[test]
    fn test_clamp_to_reports_cut() {
        let mut at = Resources::ZERO;
        at.set(ResourceKind::Emeralds, 500.0);
        let mut cap = Resources::ZERO;
        cap.set(ResourceKind::Emeralds, 100.0);
        assert!(at.clamp_to(&cap));
        assert_eq!(at.get(ResourceKind::Emeralds), 100.0);
        assert!(!at.clamp_to(&cap));
    }

    #[test]
    fn test_tier_promotion_saturates() {
        assert_eq!(Tier::VeryLow.promoted(), Tier::Low);
        assert_eq!(Tier::VeryHigh.promoted(), Tier::VeryHigh);
    }

    #[test]
    fn test_sentinel_guild() {
        let g = GuildRef::sentinel();
        assert!(g.is_sentinel());
        assert_eq!(g.to_string(), "No Guild [NONE]");
    }

    #[test]
    fn test_set_owner_resets_treasury_and_hq() {
        let mut t = Territory::new("Detlas".into(), 1, Resources::ZERO, Location::default());
        t.hq = true;
        t.treasury = Tier::High;
        t.set_owner(
            GuildRef {
                name: "Avos".into(),
                tag: "AVO".into(),
            },
            1234,
        );
        assert!(!t.hq);
        assert_eq!(t.treasury, Tier::VeryLow);
        assert_eq!(t.captured_at, 1234);
    }

    #[test]
    fn test_set_owner_same_guild_is_noop() {
        let mut t = Territory::new("Detlas".into(), 1, Resources::ZERO, Location::default());
        let guild = GuildRef {
            name: "Avos".into(),
            tag: "AVO".into(),
        };
        t.set_owner(guild.clone(), 10);
        t.treasury = Tier::Medium;
        t.set_owner(guild, 999);
        assert_eq!(t.captured_at, 10);
        assert_eq!(t.treasury, Tier::Medium);
    }

    #[test]
    #[should_panic(expected = "HQ map inconsistency")]
    fn test_duplicate_hq_panics() {
        let mut world = crate::testing::WorldBuilder::new()
            .territory("A", Resources::ZERO)
            .territory("B", Resources::ZERO)
            .build();
        let guild = GuildRef {
            name: "Avos".into(),
            tag: "AVO".into(),
        };
        for name in ["A", "B"] {
            let t = world.territories.get_mut(name).unwrap();
            t.guild = guild.clone();
            t.hq = true;
        }
        world.rebuild_lookup_maps();
    }
}
