//! Property tests for the §8 invariants, driving a single [`Line`] through
//! randomized command/fault/order sequences and checking the predicates in
//! `validation.rs` hold after every step.

use factory_core::command::{self, Command, CommandAction, CommandParams};
use factory_core::fixed::Fixed64;
use factory_core::id::{AgvId, LineId, PathPoint};
use factory_core::kpi::KpiAggregator;
use factory_core::line::Line;
use factory_core::registry::Registry;
use factory_core::rng::SimRng;
use factory_core::scheduler::{Phase, Scheduler, WakeReason};
use factory_core::validation::{check_battery_bounds, check_buffer_capacities, check_cq_lane_contents};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Step {
    Move { agv: AgvId, point: usize },
    Load { agv: AgvId },
    Unload { agv: AgvId },
    Fault { target_idx: usize, duration_s: u32 },
    OrderTick,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (any::<bool>(), 0usize..PathPoint::ALL.len())
            .prop_map(|(agv_is_1, point)| Step::Move { agv: if agv_is_1 { AgvId::Agv1 } else { AgvId::Agv2 }, point }),
        any::<bool>().prop_map(|agv_is_1| Step::Load { agv: if agv_is_1 { AgvId::Agv1 } else { AgvId::Agv2 } }),
        any::<bool>().prop_map(|agv_is_1| Step::Unload { agv: if agv_is_1 { AgvId::Agv1 } else { AgvId::Agv2 } }),
        (0usize..8, 5u32..60).prop_map(|(target_idx, duration_s)| Step::Fault { target_idx, duration_s }),
        Just(Step::OrderTick),
    ]
}

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

fn run_a_little(line: &mut Line, registry: &Registry, rng: &mut SimRng, scheduler: &mut Scheduler) {
    for _ in 0..20 {
        if !drive_instant(line, registry, rng, scheduler) {
            break;
        }
    }
}

fn submit_move(line: &mut Line, agv: AgvId, point: PathPoint) {
    let command = Command {
        command_id: None,
        action: CommandAction::Move,
        target: Some(agv),
        params: CommandParams { target_point: Some(format!("{point:?}")), ..CommandParams::default() },
    };
    if let Ok(validated) = command::validate(LineId::Line1, &command) {
        line.dispatch_command(validated);
    }
}

fn submit_bare(line: &mut Line, agv: AgvId, action: CommandAction) {
    let command = Command { command_id: None, action, target: Some(agv), params: CommandParams::default() };
    if let Ok(validated) = command::validate(LineId::Line1, &command) {
        line.dispatch_command(validated);
    }
}

/// Products emitted vs. products findable somewhere in the line's buffers,
/// payloads, finished goods, or the scrapped count (invariant 1, restated
/// for a single line rather than a whole plant's `HashMap<LineId, Line>`).
fn conserved(line: &Line, kpi: &KpiAggregator) -> bool {
    let mut accounted = 0u32;
    accounted += line.raw_material.len() as u32;
    accounted += line.station_a.input.len() as u32 + line.station_a.is_ready_out() as u32;
    accounted += line.station_b.input.len() as u32 + line.station_b.is_ready_out() as u32;
    accounted += line.station_c.input.len() as u32 + line.station_c.is_ready_out() as u32;
    accounted += line.conveyor_ab.len() as u32;
    accounted += line.conveyor_bc.len() as u32;
    accounted += line.conveyor_cq.len() as u32;
    for lane in [factory_core::registry::CqLane::Upper, factory_core::registry::CqLane::Lower] {
        if line.conveyor_cq.holding_lane_product(lane).is_some() {
            accounted += 1;
        }
    }
    accounted += line.quality.input_products().count() as u32;
    accounted += line.quality.is_ready_out() as u32;
    for agv in line.agvs.values() {
        accounted += agv.payload.len() as u32;
    }
    accounted += line.finished_goods.count() as u32;
    accounted += kpi.products_scrapped;
    accounted == kpi.products_total
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_after_randomized_traces(steps in prop::collection::vec(arb_step(), 1..60), seed in any::<u64>()) {
        let mut line = Line::new(LineId::Line1);
        let registry = Registry::default();
        let mut rng = SimRng::from_seed(seed);
        let mut scheduler = Scheduler::new();
        let mut kpi = KpiAggregator::new();

        for step in steps {
            match step {
                Step::Move { agv, point } => submit_move(&mut line, agv, PathPoint::ALL[point]),
                Step::Load { agv } => submit_bare(&mut line, agv, CommandAction::Load),
                Step::Unload { agv } => submit_bare(&mut line, agv, CommandAction::Unload),
                Step::Fault { target_idx, duration_s } => {
                    let targets = line.eligible_fault_targets();
                    if !targets.is_empty() {
                        let target = targets[target_idx % targets.len()];
                        let now = scheduler.now();
                        let until = now + Fixed64::from_num(duration_s);
                        line.apply_fault(target, until, now, &mut scheduler);
                    }
                }
                Step::OrderTick => line.on_order_generator_tick(scheduler.now(), &mut rng),
            }

            line.try_dispatch_all(scheduler.now(), &registry, &mut scheduler);
            run_a_little(&mut line, &registry, &mut rng, &mut scheduler);

            for event in line.events.drain() {
                kpi.record_event(&event);
            }

            let violations = check_buffer_capacities(&line);
            prop_assert!(violations.is_empty(), "buffer capacity violated: {:?}", violations);

            for agv in line.agvs.values() {
                prop_assert!(check_battery_bounds(agv), "battery out of [0,100] for {:?}: {}", agv.id, agv.battery_pct);
            }

            let lane_violations = check_cq_lane_contents(&line);
            prop_assert!(lane_violations.is_empty(), "CQ lane invariant violated: {:?}", lane_violations);

            prop_assert!(conserved(&line, &kpi), "product conservation violated");
        }

        // Schedule a no-op event to flush the final batch of events (the
        // line's own scheduled work), then do a last conservation check.
        scheduler.schedule_after(Fixed64::from_num(1), Phase::Publisher, WakeReason::HeartbeatTick);
        run_a_little(&mut line, &registry, &mut rng, &mut scheduler);
        for event in line.events.drain() {
            kpi.record_event(&event);
        }
        prop_assert!(conserved(&line, &kpi), "final product conservation violated");
    }
}
