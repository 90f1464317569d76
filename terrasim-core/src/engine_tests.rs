//! End-to-end scenarios driven through the public engine API.

use super::*;
use crate::testing::{only, WorldBuilder};
use territory_pathfinding::keep_first;

fn test_config() -> EngineConfig {
    EngineConfig {
        tick_queue_capacity: 16,
        auto_save_path: None,
        load_auto_save: false,
        tick_rate: 0.0,
        start_halted: true,
    }
}

/// Engine with the deterministic first-found tie-break, stepped manually.
fn engine_from(world: World) -> Engine {
    let engine = Engine::from_world(world, test_config());
    engine.set_tie_chooser(Box::new(keep_first));
    engine
}

fn guild(name: &str, tag: &str) -> GuildRef {
    GuildRef {
        name: name.to_string(),
        tag: tag.to_string(),
    }
}

fn step(engine: &Engine, ticks: u64) {
    for _ in 0..ticks {
        engine.next_tick();
    }
}

#[test]
fn s1_sovereign_generation() {
    let world = WorldBuilder::new()
        .territory("T", only(ResourceKind::Ores, 600.0))
        .build();
    let engine = engine_from(world);
    engine.set_guild("T", guild("Avos", "AVO")).unwrap();
    engine.set_territory_hq("T", true).unwrap();

    step(&engine, 60);

    let t = engine.territory_stats("T").unwrap();
    assert!((t.storage.at.ores - 10.0).abs() <= 1.0, "got {}", t.storage.at.ores);
    assert_eq!(t.warning, Warnings::default());
    let stats = engine.system_stats();
    assert_eq!(stats.tick, 60);
}

#[test]
fn s2_one_hop_tax_splits_between_hqs() {
    let world = WorldBuilder::new()
        .territory("P", Resources::ZERO)
        .territory("X", Resources::ZERO)
        .territory("H", Resources::ZERO)
        .territory("XH", Resources::ZERO)
        .link("P", "X")
        .link("X", "H")
        .link("X", "XH")
        .build();
    let engine = engine_from(world);
    engine
        .set_guild_batch(&[
            ("P".into(), guild("Avos", "AVO")),
            ("H".into(), guild("Avos", "AVO")),
            ("X".into(), guild("Bandits", "BND")),
            ("XH".into(), guild("Bandits", "BND")),
        ])
        .unwrap();
    engine.set_territory_hq("H", true).unwrap();
    engine.set_territory_hq("XH", true).unwrap();
    engine
        .set_options(
            "X",
            &TerritoryPatch {
                tax: Some(TaxRates {
                    tax: 0.25,
                    ally: 0.05,
                }),
                ..Default::default()
            },
        )
        .unwrap();
    engine
        .set_guild_allies("BND", vec!["AVO".to_string()])
        .unwrap();
    engine
        .set_storage("P", only(ResourceKind::Ores, 100.0))
        .unwrap();

    // Dispatch at minute 1, taxed crossing X at minute 2, delivered at
    // minute 3. Allies pay the ally rate; the intermediate's HQ pockets
    // exactly the withheld share.
    step(&engine, 180);

    let h = engine.territory_stats("H").unwrap();
    let xh = engine.territory_stats("XH").unwrap();
    assert!((h.storage.at.ores - 95.0).abs() < 1e-9);
    assert!((xh.storage.at.ores - 5.0).abs() < 1e-9);
    assert!(engine.all_transits().is_empty());
}

#[test]
fn s3_deficit_supply_keeps_member_funded() {
    let world = WorldBuilder::new()
        .territory("T", Resources::ZERO)
        .territory("H", Resources::ZERO)
        .link("T", "H")
        .build();
    let engine = engine_from(world);
    engine
        .set_guild_batch(&[
            ("T".into(), guild("Avos", "AVO")),
            ("H".into(), guild("Avos", "AVO")),
        ])
        .unwrap();
    engine.set_territory_hq("H", true).unwrap();
    engine
        .set_storage("H", only(ResourceKind::Ores, 1000.0))
        .unwrap();
    engine
        .set_options(
            "T",
            &TerritoryPatch {
                upgrades: Some(vec![(UpgradeId::Damage, 1)]),
                ..Default::default()
            },
        )
        .unwrap();

    // Minute 1 derives the deficit and dispatches; minute 2 delivers.
    step(&engine, 120);
    let t = engine.territory_stats("T").unwrap();
    assert_eq!(t.upgrades.get(UpgradeId::Damage).at, 1);
    assert_eq!(t.warning, Warnings::default());

    // Funding repeats every minute.
    step(&engine, 180);
    let t = engine.territory_stats("T").unwrap();
    assert_eq!(t.upgrades.get(UpgradeId::Damage).at, 1);
    let h = engine.territory_stats("H").unwrap();
    assert!(h.storage.at.ores < 1000.0);
}

#[test]
fn s4_capture_resets_and_reroutes() {
    let world = WorldBuilder::new()
        .territory("T", Resources::ZERO)
        .territory("HA", Resources::ZERO)
        .territory("HB", Resources::ZERO)
        .link("T", "HA")
        .link("T", "HB")
        .build();
    let engine = engine_from(world);
    engine
        .set_guild_batch(&[
            ("T".into(), guild("Avos", "AVO")),
            ("HA".into(), guild("Avos", "AVO")),
            ("HB".into(), guild("Bandits", "BND")),
        ])
        .unwrap();
    engine.set_territory_hq("HA", true).unwrap();
    engine.set_territory_hq("HB", true).unwrap();
    engine.set_territory_hq("T", true).unwrap(); // demotes HA
    let t = engine.territory_stats("T").unwrap();
    assert!(t.hq);
    assert!(!engine.territory_stats("HA").unwrap().hq);

    step(&engine, 10);
    let captured = engine.set_guild("T", guild("Bandits", "BND")).unwrap();
    assert!(!captured.hq);
    assert_eq!(captured.treasury, Tier::VeryLow);
    assert_eq!(captured.captured_at, 10);
    let route = &captured.trading_routes[0];
    assert_eq!(route.first().map(String::as_str), Some("T"));
    assert_eq!(route.last().map(String::as_str), Some("HB"));
}

#[test]
fn s5_manual_overflow_ships_to_hq_which_clamps() {
    let world = WorldBuilder::new()
        .territory("T", Resources::ZERO)
        .territory("H", Resources::ZERO)
        .link("T", "H")
        .build();
    let engine = engine_from(world);
    engine
        .set_guild_batch(&[
            ("T".into(), guild("Avos", "AVO")),
            ("H".into(), guild("Avos", "AVO")),
        ])
        .unwrap();
    engine.set_territory_hq("H", true).unwrap();

    // Non-HQ wood capacity is 300; the excess is retained, not clamped.
    let t = engine
        .set_storage("T", only(ResourceKind::Wood, 10_000.0))
        .unwrap();
    assert_eq!(t.storage.at.wood, 10_000.0);
    assert!(t.warning.contains(Warnings::OVERFLOW_RESOURCES));

    // Next minute everything ships; the HQ clamps to its cap and warns.
    step(&engine, 120);
    let t = engine.territory_stats("T").unwrap();
    let h = engine.territory_stats("H").unwrap();
    assert_eq!(t.storage.at.wood, 0.0);
    assert_eq!(h.storage.at.wood, h.storage.capacity.wood);
    assert!(h.warning.contains(Warnings::OVERFLOW_RESOURCES));
}

#[test]
fn s6_tribute_moves_between_hqs_on_its_interval() {
    let world = WorldBuilder::new()
        .territory("HA", Resources::ZERO)
        .territory("HB", Resources::ZERO)
        .link("HA", "HB")
        .build();
    let engine = engine_from(world);
    engine
        .set_guild_batch(&[
            ("HA".into(), guild("Avos", "AVO")),
            ("HB".into(), guild("Bandits", "BND")),
        ])
        .unwrap();
    engine.set_territory_hq("HA", true).unwrap();
    engine.set_territory_hq("HB", true).unwrap();
    engine
        .set_storage("HA", only(ResourceKind::Emeralds, 100.0))
        .unwrap();
    let tribute = engine
        .create_tribute(
            Some("Avos".into()),
            Some("Bandits".into()),
            only(ResourceKind::Emeralds, 60.0),
            5,
        )
        .unwrap();
    assert!(tribute.active);
    assert_eq!(tribute.per_minute.emeralds, 1.0);

    // Due at minute 5, delivered one hop later.
    step(&engine, 6 * 60);
    let ha = engine.territory_stats("HA").unwrap();
    let hb = engine.territory_stats("HB").unwrap();
    assert!((ha.storage.at.emeralds - 95.0).abs() < 1e-9);
    assert!((hb.storage.at.emeralds - 5.0).abs() < 1e-9);

    let avos = engine
        .all_guilds()
        .into_iter()
        .find(|g| g.tag == "AVO")
        .unwrap();
    assert_eq!(avos.tribute_out.emeralds, 60.0);
}

#[test]
fn reset_restores_boot_state() {
    let world = WorldBuilder::new()
        .territory("T", only(ResourceKind::Ores, 600.0))
        .territory("H", Resources::ZERO)
        .link("T", "H")
        .build();
    let engine = engine_from(world);
    engine
        .set_guild_batch(&[
            ("T".into(), guild("Avos", "AVO")),
            ("H".into(), guild("Avos", "AVO")),
        ])
        .unwrap();
    engine.set_territory_hq("H", true).unwrap();
    engine
        .set_options(
            "T",
            &TerritoryPatch {
                upgrades: Some(vec![(UpgradeId::Damage, 5)]),
                tax: Some(TaxRates { tax: 0.3, ally: 0.2 }),
                border: Some(Border::Closed),
                routing_mode: Some(RoutingMode::Fastest),
                ..Default::default()
            },
        )
        .unwrap();
    step(&engine, 90);

    engine.reset().unwrap();

    let stats = engine.system_stats();
    assert_eq!(stats.tick, 0);
    assert!(stats.running);
    for t in engine.all_territory_stats() {
        assert!(t.guild.is_sentinel());
        assert!(!t.hq);
        assert!(t.storage.at.is_zero());
        assert_eq!(t.tax, TaxRates::default());
        assert_eq!(t.border, Border::Open);
        assert_eq!(t.routing_mode, RoutingMode::Cheapest);
        assert_eq!(t.upgrades.get(UpgradeId::Damage).set, 0);
    }
    assert!(engine.all_guilds().is_empty());
    assert!(engine.all_transits().is_empty());
    assert!(engine.tributes().is_empty());
}

fn snapshot_fixture() -> Engine {
    let world = WorldBuilder::new()
        .territory("P", only(ResourceKind::Ores, 3600.0))
        .territory("H", Resources::ZERO)
        .link("P", "H")
        .build();
    let engine = engine_from(world);
    engine
        .set_guild_batch(&[
            ("P".into(), guild("Avos", "AVO")),
            ("H".into(), guild("Avos", "AVO")),
        ])
        .unwrap();
    engine.set_territory_hq("H", true).unwrap();
    engine
        .create_tribute(Some("Avos".into()), None, only(ResourceKind::Ores, 30.0), 2)
        .unwrap();
    engine
}

#[test]
fn snapshot_round_trip_is_tick_exact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("save.lz4");

    let original = snapshot_fixture();
    step(&original, 90);
    original.save_state(&path).unwrap();

    let restored = snapshot_fixture();
    restored.load_state(&path).unwrap();

    assert_eq!(restored.system_stats().tick, 90);
    assert_eq!(
        restored.all_territory_stats(),
        original.all_territory_stats()
    );
    assert_eq!(restored.tributes(), original.tributes());
    assert_eq!(restored.all_transits(), original.all_transits());

    // The next tick after reload matches the next tick without reloading.
    step(&original, 60);
    step(&restored, 60);
    assert_eq!(
        restored.all_territory_stats(),
        original.all_territory_stats()
    );
}

#[test]
fn determinism_with_pinned_tie_break() {
    let build = || {
        let world = WorldBuilder::new()
            .territory("P", only(ResourceKind::Ores, 1200.0))
            .territory("L", Resources::ZERO)
            .territory("R", Resources::ZERO)
            .territory("H", Resources::ZERO)
            .link("P", "L")
            .link("P", "R")
            .link("L", "H")
            .link("R", "H")
            .build();
        let engine = engine_from(world);
        engine
            .set_guild_batch(&[
                ("P".into(), guild("Avos", "AVO")),
                ("L".into(), guild("Avos", "AVO")),
                ("R".into(), guild("Avos", "AVO")),
                ("H".into(), guild("Avos", "AVO")),
            ])
            .unwrap();
        engine.set_territory_hq("H", true).unwrap();
        engine
    };

    let a = build();
    let b = build();
    step(&a, 150);
    step(&b, 150);
    assert_eq!(a.all_territory_stats(), b.all_territory_stats());
    assert_eq!(a.all_transits(), b.all_transits());
}

#[test]
fn hq_stays_unique_per_guild() {
    let world = WorldBuilder::new()
        .territory("A", Resources::ZERO)
        .territory("B", Resources::ZERO)
        .link("A", "B")
        .build();
    let engine = engine_from(world);
    engine
        .set_guild_batch(&[
            ("A".into(), guild("Avos", "AVO")),
            ("B".into(), guild("Avos", "AVO")),
        ])
        .unwrap();
    engine.set_territory_hq("A", true).unwrap();
    engine.set_territory_hq("B", true).unwrap();

    let hqs: Vec<_> = engine
        .all_territory_stats()
        .into_iter()
        .filter(|t| t.hq)
        .collect();
    assert_eq!(hqs.len(), 1);
    assert_eq!(hqs[0].name, "B");
}

#[test]
fn route_endpoints_hold_for_every_member() {
    let world = WorldBuilder::new()
        .territory("A", Resources::ZERO)
        .territory("B", Resources::ZERO)
        .territory("C", Resources::ZERO)
        .link("A", "B")
        .link("B", "C")
        .build();
    let engine = engine_from(world);
    engine
        .set_guild_batch(&[
            ("A".into(), guild("Avos", "AVO")),
            ("B".into(), guild("Avos", "AVO")),
            ("C".into(), guild("Avos", "AVO")),
        ])
        .unwrap();
    engine.set_territory_hq("A", true).unwrap();

    for t in engine.all_territory_stats() {
        if t.hq {
            continue;
        }
        let routes = engine.trading_routes_for(&t.name).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].first(), Some(&t.name));
        assert_eq!(routes[0].last().map(String::as_str), Some("A"));
    }
}

#[test]
fn bad_arguments_leave_state_unchanged() {
    let world = WorldBuilder::new()
        .territory("T", Resources::ZERO)
        .build();
    let engine = engine_from(world);
    engine.set_guild("T", guild("Avos", "AVO")).unwrap();

    assert!(matches!(
        engine.territory_stats("Nowhere"),
        Err(EngineError::UnknownTerritory(_))
    ));
    assert!(matches!(
        engine.set_guild("Nowhere", guild("Avos", "AVO")),
        Err(EngineError::UnknownTerritory(_))
    ));
    assert!(matches!(
        engine.set_options(
            "T",
            &TerritoryPatch {
                upgrades: Some(vec![(UpgradeId::Damage, 12)]),
                ..Default::default()
            }
        ),
        Err(EngineError::LevelOutOfRange { .. })
    ));
    assert!(matches!(
        engine.set_options(
            "T",
            &TerritoryPatch {
                tax: Some(TaxRates { tax: 1.5, ally: 0.0 }),
                ..Default::default()
            }
        ),
        Err(EngineError::TaxOutOfRange(_))
    ));
    assert!(matches!(
        engine.set_storage("T", only(ResourceKind::Ores, -1.0)),
        Err(EngineError::NegativeAmount)
    ));
    assert!(matches!(
        engine.create_tribute(None, None, Resources::ZERO, 5),
        Err(EngineError::EmptyTribute)
    ));
    assert!(matches!(
        engine.create_tribute(Some("Avos".into()), None, Resources::ZERO, 0),
        Err(EngineError::BadInterval)
    ));
    assert!(matches!(
        engine.create_tribute(Some("Ghosts".into()), None, Resources::ZERO, 1),
        Err(EngineError::UnknownGuild(_))
    ));

    // The failed patches did not half-apply.
    let t = engine.territory_stats("T").unwrap();
    assert_eq!(t.upgrades.get(UpgradeId::Damage).set, 0);
    assert_eq!(t.tax, TaxRates::default());
}

#[test]
fn sentinel_territory_cannot_become_hq() {
    let world = WorldBuilder::new()
        .territory("T", Resources::ZERO)
        .build();
    let engine = engine_from(world);
    assert!(matches!(
        engine.set_territory_hq("T", true),
        Err(EngineError::HqWithoutGuild)
    ));
}

#[test]
fn change_callbacks_fire_off_lock() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let world = WorldBuilder::new()
        .territory("T", Resources::ZERO)
        .build();
    let engine = engine_from(world);

    let territory_events = Arc::new(AtomicUsize::new(0));
    let counter = territory_events.clone();
    // Querying from inside the callback must not deadlock: it runs after
    // the writer lock is released.
    let probe = engine.clone();
    engine.on_change(Box::new(move |event| {
        if let ChangeEvent::Territory(name) = event {
            let _ = probe.territory_stats(name);
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }));

    engine.set_guild("T", guild("Avos", "AVO")).unwrap();
    assert_eq!(territory_events.load(Ordering::SeqCst), 1);
}

#[test]
fn tribute_lifecycle() {
    let world = WorldBuilder::new()
        .territory("H", Resources::ZERO)
        .build();
    let engine = engine_from(world);
    engine.set_guild("H", guild("Avos", "AVO")).unwrap();
    engine.set_territory_hq("H", true).unwrap();

    let t = engine
        .create_tribute(Some("Avos".into()), None, only(ResourceKind::Fish, 120.0), 3)
        .unwrap();
    let updated = engine
        .update_tribute(t.id, Some(only(ResourceKind::Fish, 60.0)), Some(7))
        .unwrap();
    assert_eq!(updated.hourly.fish, 60.0);
    assert_eq!(updated.per_minute.fish, 1.0);
    assert_eq!(updated.interval_minutes, 7);

    let disabled = engine.set_tribute_enabled(t.id, false).unwrap();
    assert!(!disabled.active);

    engine.remove_tribute(t.id).unwrap();
    assert!(engine.tributes().is_empty());
    assert!(matches!(
        engine.remove_tribute(t.id),
        Err(EngineError::UnknownTribute(_))
    ));
}

#[test]
fn transits_at_reports_current_hop() {
    let world = WorldBuilder::new()
        .territory("P", Resources::ZERO)
        .territory("M", Resources::ZERO)
        .territory("H", Resources::ZERO)
        .link("P", "M")
        .link("M", "H")
        .build();
    let engine = engine_from(world);
    engine
        .set_guild_batch(&[
            ("P".into(), guild("Avos", "AVO")),
            ("M".into(), guild("Avos", "AVO")),
            ("H".into(), guild("Avos", "AVO")),
        ])
        .unwrap();
    engine.set_territory_hq("H", true).unwrap();
    engine
        .set_storage("P", only(ResourceKind::Crops, 50.0))
        .unwrap();

    step(&engine, 60); // dispatch: transit sits at P
    assert_eq!(engine.transits_at("P").unwrap().len(), 1);
    assert!(engine.transits_at("M").unwrap().is_empty());

    step(&engine, 60); // one hop: now at M
    assert_eq!(engine.transits_at("M").unwrap().len(), 1);
    assert_eq!(engine.all_transits().len(), 1);

    step(&engine, 60); // delivered
    assert!(engine.all_transits().is_empty());
}

#[test]
fn generation_is_conserved_without_tax() {
    // One guild, one producer one hop from its HQ, no cross-guild hops.
    // Everything the producer emits lands at the HQ one minute later.
    let world = WorldBuilder::new()
        .territory("P", only(ResourceKind::Ores, 3600.0))
        .territory("H", Resources::ZERO)
        .link("P", "H")
        .build();
    let engine = engine_from(world);
    engine
        .set_guild_batch(&[
            ("P".into(), guild("Avos", "AVO")),
            ("H".into(), guild("Avos", "AVO")),
        ])
        .unwrap();
    engine.set_territory_hq("H", true).unwrap();

    step(&engine, 240);

    // Dispatches at minutes 1-3 have delivered by minute 4; the minute-4
    // dispatch and the last partial accumulator are still in flight.
    let h = engine.territory_stats("H").unwrap();
    let p = engine.territory_stats("P").unwrap();
    let in_flight: f64 = engine
        .all_transits()
        .iter()
        .map(|t| t.resources.get(ResourceKind::Ores))
        .sum();
    let accounted = h.storage.at.ores + p.storage.at.ores + in_flight;
    // 240 ticks at 1 ore/s, minus at most one emission interval still in
    // the accumulator.
    assert!((236.0..=240.0).contains(&accounted), "accounted {accounted}");
    assert!((h.storage.at.ores - 176.0).abs() < 1e-6);
}

#[test]
fn route_tax_compensation_funds_through_a_taxed_route() {
    // T sits behind a 50% taxed foreign hop: its displayed costs double and
    // the HQ grosses up every deficit shipment, so T still affords its
    // upgrade net of tax.
    let world = WorldBuilder::new()
        .territory("H", Resources::ZERO)
        .territory("X", Resources::ZERO)
        .territory("T", Resources::ZERO)
        .link("H", "X")
        .link("X", "T")
        .build();
    let engine = engine_from(world);
    engine
        .set_guild_batch(&[
            ("H".into(), guild("Avos", "AVO")),
            ("T".into(), guild("Avos", "AVO")),
            ("X".into(), guild("Bandits", "BND")),
        ])
        .unwrap();
    engine.set_territory_hq("H", true).unwrap();
    engine
        .set_options(
            "X",
            &TerritoryPatch {
                tax: Some(TaxRates { tax: 0.5, ally: 0.5 }),
                ..Default::default()
            },
        )
        .unwrap();
    engine
        .set_storage("H", only(ResourceKind::Ores, 1500.0))
        .unwrap();
    engine
        .set_options(
            "T",
            &TerritoryPatch {
                upgrades: Some(vec![(UpgradeId::Damage, 1)]), // 100 ores/h
                ..Default::default()
            },
        )
        .unwrap();

    step(&engine, 300);

    let t = engine.territory_stats("T").unwrap();
    assert!((t.route_tax - 0.5).abs() < 1e-9);
    assert!((t.costs.ores - 200.0).abs() < 1e-6);
    assert_eq!(t.upgrades.get(UpgradeId::Damage).at, 1);
    assert_eq!(t.warning, Warnings::default());
    // The HQ pays the gross: strictly more than the pre-tax upkeep left it.
    let h = engine.territory_stats("H").unwrap();
    assert!(h.storage.at.ores < 1500.0 - 2.0 * 100.0 / 3600.0 * 60.0);
}

#[test]
fn border_closed_mid_flight_voids_the_funding_transit() {
    let world = WorldBuilder::new()
        .territory("H", Resources::ZERO)
        .territory("X", Resources::ZERO)
        .territory("T", Resources::ZERO)
        .link("H", "X")
        .link("X", "T")
        .build();
    let engine = engine_from(world);
    engine
        .set_guild_batch(&[
            ("H".into(), guild("Avos", "AVO")),
            ("T".into(), guild("Avos", "AVO")),
            ("X".into(), guild("Bandits", "BND")),
        ])
        .unwrap();
    engine.set_territory_hq("H", true).unwrap();
    engine
        .set_storage("H", only(ResourceKind::Ores, 1000.0))
        .unwrap();
    engine
        .set_options(
            "T",
            &TerritoryPatch {
                upgrades: Some(vec![(UpgradeId::Damage, 1)]),
                ..Default::default()
            },
        )
        .unwrap();

    step(&engine, 60);
    assert_eq!(engine.all_transits().len(), 1);
    let h_after_dispatch = engine.territory_stats("H").unwrap().storage.at.ores;
    assert!(h_after_dispatch < 1000.0);

    // The border slams shut while the shipment is in flight: it voids at
    // the closed hop, the withheld resources are gone, T receives nothing.
    engine
        .set_options(
            "X",
            &TerritoryPatch {
                border: Some(Border::Closed),
                ..Default::default()
            },
        )
        .unwrap();

    step(&engine, 60);
    assert!(engine.all_transits().is_empty());
    let t = engine.territory_stats("T").unwrap();
    assert_eq!(t.storage.at.ores, 0.0);
    assert_eq!(t.upgrades.get(UpgradeId::Damage).at, 0);
    // Nothing was refunded or rerouted.
    assert_eq!(
        engine.territory_stats("H").unwrap().storage.at.ores,
        h_after_dispatch
    );
    // With the route gone, T is unroutable until the border reopens.
    assert!(engine.trading_routes_for("T").unwrap().is_empty());
}
