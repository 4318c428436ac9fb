//! Whole-line integration tests for the §8 scenario table. Each test
//! constructs a bare [`Line`] plus the shared `Registry`/`SimRng`/`Scheduler`
//! it needs and drives the scheduler directly, the way `Simulation::step`
//! does internally but scoped to one line so a test can reach into its
//! buffers and assert on them.

use factory_core::command::{self, Command, CommandAction, CommandParams};
use factory_core::fixed::Fixed64;
use factory_core::id::{AgvId, LineId, PathPoint};
use factory_core::kpi::KpiAggregator;
use factory_core::line::Line;
use factory_core::quality::{QualityCheck, QualityOutcome};
use factory_core::registry::Registry;
use factory_core::rng::SimRng;
use factory_core::scheduler::{FaultTarget, Scheduler, WakeReason};

fn setup() -> (Line, Registry, SimRng, Scheduler) {
    (Line::new(LineId::Line1), Registry::default(), SimRng::from_seed(7), Scheduler::new())
}

/// Drains the next scheduled instant (if any) and lets the line react,
/// mirroring `Simulation::step`'s dispatch + `try_dispatch_all` pair for a
/// single line.
fn drive_instant(line: &mut Line, registry: &Registry, rng: &mut SimRng, scheduler: &mut Scheduler) -> bool {
    let reasons = scheduler.drain_next_instant();
    if reasons.is_empty() {
        return false;
    }
    let now = scheduler.now();
    for reason in reasons {
        match reason {
            WakeReason::StationDone(_, station) => line.on_station_done(station, now, registry, rng, scheduler),
            WakeReason::ConveyorArrival(_, conveyor, _) => line.on_conveyor_arrival(conveyor, now, registry, rng, scheduler),
            WakeReason::QualityDone(_) => line.on_quality_done(now, registry, rng, scheduler),
            WakeReason::AgvActionDone(_, agv) => {
                line.on_agv_action_done(agv, now, registry, rng, scheduler);
            }
            WakeReason::FaultCleared(_, target) => line.clear_fault(target, now, registry, rng, scheduler),
            _ => {}
        }
    }
    line.try_dispatch_all(now, registry, scheduler);
    true
}

fn run_until_idle(line: &mut Line, registry: &Registry, rng: &mut SimRng, scheduler: &mut Scheduler, max_instants: usize) {
    for _ in 0..max_instants {
        if !drive_instant(line, registry, rng, scheduler) {
            break;
        }
    }
}

fn submit(line: &mut Line, agv: AgvId, action: CommandAction, target_point: Option<&str>) {
    let command = Command {
        command_id: None,
        action,
        target: Some(agv),
        params: CommandParams {
            target_point: target_point.map(|s| s.to_string()),
            ..CommandParams::default()
        },
    };
    let validated = command::validate(LineId::Line1, &command).expect("well-formed test command");
    line.dispatch_command(validated);
}

fn move_and_settle(line: &mut Line, registry: &Registry, rng: &mut SimRng, scheduler: &mut Scheduler, agv: AgvId, target: &str) {
    submit(line, agv, CommandAction::Move, Some(target));
    line.try_dispatch_all(scheduler.now(), registry, scheduler);
    run_until_idle(line, registry, rng, scheduler, 50);
}

fn load_and_settle(line: &mut Line, registry: &Registry, rng: &mut SimRng, scheduler: &mut Scheduler, agv: AgvId) {
    submit(line, agv, CommandAction::Load, None);
    line.try_dispatch_all(scheduler.now(), registry, scheduler);
    run_until_idle(line, registry, rng, scheduler, 50);
}

fn unload_and_settle(line: &mut Line, registry: &Registry, rng: &mut SimRng, scheduler: &mut Scheduler, agv: AgvId) {
    submit(line, agv, CommandAction::Unload, None);
    line.try_dispatch_all(scheduler.now(), registry, scheduler);
    run_until_idle(line, registry, rng, scheduler, 50);
}

/// Scenario #1/#2 (generic over whichever product type the order generator
/// draws): an agent drives AGV_1 from raw material to Station A, lets the
/// autonomous conveyor cascade carry the product to quality (looping it back
/// through Station B/C via the AGV for a P3's second pass if that's what was
/// drawn), then drives it from quality to finished goods. Every product that
/// enters the line this way must reach finished goods with `attempts` in
/// `{0, 1}` (round-trip law, §8).
#[test]
fn agent_driven_order_reaches_finished_goods() {
    let (mut line, registry, mut rng, mut scheduler) = setup();
    line.on_order_generator_tick(Fixed64::from_num(0), &mut rng);
    let _ = line.events.drain();

    let product_ids: Vec<_> = line.orders.values().next().unwrap().product_ids.clone();
    assert!(!product_ids.is_empty());

    for &product_id in &product_ids {
        // P0 -> P1: raw material pickup, delivered to Station A.
        move_and_settle(&mut line, &registry, &mut rng, &mut scheduler, AgvId::Agv1, "P0");
        let label = line.products[product_id].label.clone();
        // Raw-material loads must name the product by label (§4.8); build the
        // command directly instead of going through `submit`, which only
        // carries a `target_point`.
        let command = Command {
            command_id: None,
            action: CommandAction::Load,
            target: Some(AgvId::Agv1),
            params: CommandParams { product_id: Some(label), ..CommandParams::default() },
        };
        let validated = command::validate(LineId::Line1, &command).unwrap();
        line.dispatch_command(validated);
        line.try_dispatch_all(scheduler.now(), &registry, &mut scheduler);
        run_until_idle(&mut line, &registry, &mut rng, &mut scheduler, 50);

        move_and_settle(&mut line, &registry, &mut rng, &mut scheduler, AgvId::Agv1, "P1");
        unload_and_settle(&mut line, &registry, &mut rng, &mut scheduler, AgvId::Agv1);

        // Let the autonomous cascade run until nothing is left to do or the
        // product needs another AGV hop (CQ holding lane / quality output).
        run_until_idle(&mut line, &registry, &mut rng, &mut scheduler, 2000);

        if line.products[product_id].product_type == factory_core::product::ProductType::P3
            && !line.products[product_id].p3_second_pass
            && line.products[product_id].finished_at.is_none()
        {
            // P3 first pass on line 1: no named CQ lane (that's line 3 only),
            // so the product sits in Station C's own output slot until an
            // AGV carries it back to Station B for its second pass.
            move_and_settle(&mut line, &registry, &mut rng, &mut scheduler, AgvId::Agv1, "P5");
            load_and_settle(&mut line, &registry, &mut rng, &mut scheduler, AgvId::Agv1);
            move_and_settle(&mut line, &registry, &mut rng, &mut scheduler, AgvId::Agv1, "P3");
            unload_and_settle(&mut line, &registry, &mut rng, &mut scheduler, AgvId::Agv1);
            run_until_idle(&mut line, &registry, &mut rng, &mut scheduler, 2000);
        }

        // P8 -> P9: quality output to finished goods, if it hasn't already
        // been scrapped.
        if line.products[product_id].finished_at.is_none() && line.products[product_id].scrapped_at.is_none() {
            move_and_settle(&mut line, &registry, &mut rng, &mut scheduler, AgvId::Agv1, "P8");
            load_and_settle(&mut line, &registry, &mut rng, &mut scheduler, AgvId::Agv1);
            move_and_settle(&mut line, &registry, &mut rng, &mut scheduler, AgvId::Agv1, "P9");
            unload_and_settle(&mut line, &registry, &mut rng, &mut scheduler, AgvId::Agv1);
            run_until_idle(&mut line, &registry, &mut rng, &mut scheduler, 200);
        }

        let product = &line.products[product_id];
        let terminal = product.finished_at.is_some() || product.scrapped_at.is_some();
        assert!(terminal, "product should reach a terminal state");
        if product.finished_at.is_some() {
            assert!(product.attempts == 0 || product.attempts == 1, "finished product must have attempts in {{0,1}}");
        } else {
            assert_eq!(product.attempts, 2, "a scrapped product must have failed quality twice");
        }
    }
}

/// Scenario #3: an AGV with critically low battery is commanded to move;
/// the move is redirected to the charging point instead, it charges to
/// 100%, and the detour is recorded as a passive (not proactive) charge.
#[test]
fn forced_charge_redirects_to_charging_point() {
    let (mut line, registry, mut rng, mut scheduler) = setup();
    line.agvs.get_mut(&AgvId::Agv1).unwrap().battery_pct = Fixed64::from_num(4);

    submit(&mut line, AgvId::Agv1, CommandAction::Move, Some("P9"));
    let responses = line.try_dispatch_all(scheduler.now(), &registry, &mut scheduler);
    assert_eq!(responses.len(), 1, "forced charge is reported immediately at dispatch time");
    assert!(responses[0].response.contains("forced charge"));

    assert_eq!(line.agvs[&AgvId::Agv1].current_point, PathPoint::P0, "hasn't arrived yet, still moving to P10");

    run_until_idle(&mut line, &registry, &mut rng, &mut scheduler, 200);

    let agv = &line.agvs[&AgvId::Agv1];
    assert_eq!(agv.battery_pct, Fixed64::from_num(100));
    assert_eq!(agv.passive_charges, 1);
    assert_eq!(agv.proactive_charges, 0);
}

/// Scenario #4: a station fault injected mid-processing pauses the in-flight
/// item and resumes it for the remaining duration once cleared; a
/// `DeviceFaulted` event is emitted, which the KPI aggregator charges a flat
/// maintenance cost of 8 for (independent of the fault's duration).
#[test]
fn station_fault_pauses_and_resumes_with_flat_maintenance_cost() {
    let (mut line, registry, mut rng, mut scheduler) = setup();
    line.on_order_generator_tick(Fixed64::from_num(0), &mut rng);
    let _ = line.events.drain();

    // Deliver the first spawned product straight into Station A's input,
    // bypassing the AGV hop (irrelevant to this scenario).
    let product_id = line.orders.values().next().unwrap().product_ids[0];
    let product = line.products[product_id].clone();
    line.station_a.try_enqueue(product).unwrap();
    line.pump(Fixed64::from_num(0), &registry, &mut rng, &mut scheduler);
    assert!(line.station_a.is_faulted() == false);

    // Fault mid-processing.
    line.apply_fault(
        FaultTarget::Stationary(factory_core::id::StationaryDeviceId::StationA),
        Fixed64::from_num(30),
        Fixed64::from_num(5),
        &mut scheduler,
    );
    assert!(line.station_a.is_faulted());

    run_until_idle(&mut line, &registry, &mut rng, &mut scheduler, 200);

    let mut kpi = KpiAggregator::new();
    for event in line.events.drain() {
        kpi.record_event(&event);
    }
    assert_eq!(kpi.maintenance_cost, Fixed64::from_num(8));
}

/// Scenario #5: a product that fails quality twice is scrapped at
/// `material_cost * 0.8`. Quality failure is a Bernoulli draw, so this test
/// samples seeds until one produces a second failure (the scenario's own
/// "seed failure" framing), then asserts the resulting cost.
#[test]
fn double_quality_failure_scraps_with_expected_cost() {
    use factory_core::id::{OrderId, ProductId};
    use factory_core::product::{Product, ProductType};
    use slotmap::SlotMap;

    let mut found = false;
    for seed in 0..2000u64 {
        let mut qc = QualityCheck::new(LineId::Line1);
        let mut rng = SimRng::from_seed(seed);

        let mut sm: SlotMap<ProductId, ()> = SlotMap::with_key();
        let pid = sm.insert(());
        let mut osm: SlotMap<OrderId, ()> = SlotMap::with_key();
        let oid = osm.insert(());
        let mut product = Product::new(pid, ProductType::P1, oid, Fixed64::from_num(0));
        product.attempts = 1; // already failed once

        qc.try_enqueue(product).unwrap();
        let duration = qc.maybe_start(Fixed64::from_num(0), &mut rng).unwrap();
        let outcome = qc.finish_processing(duration, &mut rng);
        if let QualityOutcome::Scrapped { scrap_cost, .. } = outcome {
            assert_eq!(scrap_cost, Fixed64::from_num(8));
            found = true;
            break;
        }
    }
    assert!(found, "expected at least one seed in range to draw a second quality failure");
}

/// Scenario #6: requesting results before anything has happened reports
/// every metric as zero.
#[test]
fn get_result_at_t0_is_all_zero() {
    let kpi = KpiAggregator::new();
    let score = kpi.compute(Fixed64::from_num(0), 7, 2);
    assert_eq!(score.total_score, Fixed64::from_num(0));
    assert_eq!(score.order_completion_rate, Fixed64::from_num(0));
    assert_eq!(score.average_production_cycle, Fixed64::from_num(0));
    assert_eq!(score.device_utilization, Fixed64::from_num(0));
    assert_eq!(score.first_pass_rate, Fixed64::from_num(0));
    assert_eq!(score.agv_utilization, Fixed64::from_num(0));
}
