//! Invariant predicates for the testable properties in §8.
//!
//! These are pure, read-only checks over live state (or, for invariants that
//! are really about a transition rather than a snapshot, over a
//! before/after pair) — unit tests call them directly, and the `proptest`
//! suite under `tests/` drives randomized command/fault/order traces through
//! a [`crate::sim::Simulation`] and asserts these hold after every step.

use crate::agv::Agv;
use crate::id::{AgvId, PathPoint};
use crate::kpi::KpiAggregator;
use crate::line::Line;
use crate::registry::{
    agv_may_access_cq_lane, device_at_point, CqLane, AGV_PAYLOAD_CAPACITY, CONVEYOR_CAPACITY, STATION_BUFFER_CAPACITY,
};
use std::collections::HashMap;

use crate::id::LineId;

/// Invariant 2: no station input buffer, conveyor, or AGV payload exceeds
/// its fixed capacity.
pub fn check_buffer_capacities(line: &Line) -> Vec<String> {
    let mut violations = Vec::new();
    for (name, len, cap) in [
        ("station_a.input", line.station_a.input.len(), STATION_BUFFER_CAPACITY),
        ("station_b.input", line.station_b.input.len(), STATION_BUFFER_CAPACITY),
        ("station_c.input", line.station_c.input.len(), STATION_BUFFER_CAPACITY),
        ("conveyor_ab", line.conveyor_ab.len(), CONVEYOR_CAPACITY),
        ("conveyor_bc", line.conveyor_bc.len(), CONVEYOR_CAPACITY),
        ("conveyor_cq", line.conveyor_cq.len(), CONVEYOR_CAPACITY),
    ] {
        if len > cap {
            violations.push(format!("{name} holds {len} products, exceeding capacity {cap}"));
        }
    }
    for (agv_id, agv) in &line.agvs {
        if agv.payload.len() > AGV_PAYLOAD_CAPACITY {
            violations.push(format!("{agv_id:?} carries {} products, exceeding capacity {AGV_PAYLOAD_CAPACITY}", agv.payload.len()));
        }
    }
    violations
}

/// Invariant 3 (bounds half): every AGV's battery sits in `[0, 100]`.
pub fn check_battery_bounds(agv: &Agv) -> bool {
    agv.battery_pct >= crate::fixed::Fixed64::from_num(0) && agv.battery_pct <= crate::fixed::Fixed64::from_num(100)
}

/// Invariant 3 (monotonicity half): a charge action must not lower the
/// battery, and nothing else may raise it. Callers sample the battery
/// before and after each action and tag whether it was a charge.
pub fn charge_transition_is_valid(before: crate::fixed::Fixed64, after: crate::fixed::Fixed64, was_charge: bool) -> bool {
    if was_charge {
        after >= before
    } else {
        after <= before
    }
}

/// Invariant 5: the only corridor-exclusive action in this model is which
/// AGV may touch line 3's CQ holding lanes (see `registry::agv_may_access_cq_lane`
/// for why this is the concrete reading given to "upper/lower corridor").
/// This is a pre-dispatch predicate, not a state snapshot: call it before
/// honoring a `load`/`unload` that would touch a CQ lane.
pub fn corridor_allows_cq_lane(agv: AgvId, lane: CqLane) -> bool {
    agv_may_access_cq_lane(agv, lane)
}

/// A path point has no corridor restriction of its own; only the CQ lanes
/// do. Kept for symmetry with invariant 5's statement in §8 and to make the
/// "everywhere else is shared" reading explicit at call sites.
pub fn corridor_allows_point(_agv: AgvId, _point: PathPoint) -> bool {
    let _ = device_at_point;
    true
}

/// Invariant 6: `proactive_charges + passive_charges` must equal the number
/// of `AgvChargeStarted` events actually observed for this AGV (there is no
/// separate running total to drift out of sync with — this asserts the two
/// counters are the only place a charge is ever recorded).
pub fn check_charge_counters(agv: &Agv, observed_charge_starts: u32) -> bool {
    agv.proactive_charges + agv.passive_charges == observed_charge_starts
}

/// Invariant 7: the two P3 holding lanes on line 3's CQ conveyor contain
/// only P3 products in their first-pass state.
pub fn check_cq_lane_contents(line: &Line) -> Vec<String> {
    let mut violations = Vec::new();
    for lane in [CqLane::Upper, CqLane::Lower] {
        if let Some(product) = line.conveyor_cq.holding_lane_product(lane) {
            if product.product_type != crate::product::ProductType::P3 {
                violations.push(format!("{lane:?} lane holds a non-P3 product"));
            }
            if product.p3_second_pass {
                violations.push(format!("{lane:?} lane holds a product already in its second pass"));
            }
        }
    }
    violations
}

/// Invariant 1: every product emitted is accounted for exactly once, across
/// raw material, every station/conveyor/quality buffer, every AGV payload,
/// finished goods, and the scrapped count.
pub fn check_conservation(lines: &HashMap<LineId, Line>, kpi: &KpiAggregator) -> Result<(), String> {
    let mut accounted: u32 = 0;
    for line in lines.values() {
        accounted += line.raw_material.len() as u32;
        accounted += line.station_a.input.len() as u32 + line.station_a.is_ready_out() as u32;
        accounted += line.station_b.input.len() as u32 + line.station_b.is_ready_out() as u32;
        accounted += line.station_c.input.len() as u32 + line.station_c.is_ready_out() as u32;
        accounted += line.conveyor_ab.len() as u32;
        accounted += line.conveyor_bc.len() as u32;
        accounted += line.conveyor_cq.len() as u32;
        for lane in [CqLane::Upper, CqLane::Lower] {
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
    }
    accounted += kpi.products_scrapped;

    if accounted != kpi.products_total {
        return Err(format!(
            "conservation violated: accounted {accounted} products but {} were ever emitted",
            kpi.products_total
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::Fixed64;

    #[test]
    fn charge_must_not_decrease_battery() {
        assert!(charge_transition_is_valid(Fixed64::from_num(40), Fixed64::from_num(80), true));
        assert!(!charge_transition_is_valid(Fixed64::from_num(80), Fixed64::from_num(40), true));
    }

    #[test]
    fn non_charge_must_not_increase_battery() {
        assert!(charge_transition_is_valid(Fixed64::from_num(80), Fixed64::from_num(70), false));
        assert!(!charge_transition_is_valid(Fixed64::from_num(70), Fixed64::from_num(80), false));
    }

    #[test]
    fn corridor_only_restricts_cq_lanes() {
        assert!(corridor_allows_cq_lane(AgvId::Agv1, CqLane::Lower));
        assert!(!corridor_allows_cq_lane(AgvId::Agv1, CqLane::Upper));
        assert!(corridor_allows_cq_lane(AgvId::Agv2, CqLane::Upper));
        assert!(!corridor_allows_cq_lane(AgvId::Agv2, CqLane::Lower));
    }

    #[test]
    fn empty_line_has_no_capacity_violations() {
        let line = Line::new(LineId::Line1);
        assert!(check_buffer_capacities(&line).is_empty());
    }

    #[test]
    fn empty_line_has_no_cq_lane_violations() {
        let line = Line::new(LineId::Line3);
        assert!(check_cq_lane_contents(&line).is_empty());
    }

    #[test]
    fn conservation_holds_for_empty_plant() {
        let mut lines = HashMap::new();
        lines.insert(LineId::Line1, Line::new(LineId::Line1));
        let kpi = KpiAggregator::new();
        assert!(check_conservation(&lines, &kpi).is_ok());
    }
}
