//! AGV device (§4.4).
//!
//! The forced-charge policy and corridor gating are dispatch-time decisions
//! that belong to [`crate::command`] (the component that actually knows what
//! a pending command implies); this module owns the AGV's own state machine
//! and the primitive, already-approved actions (move/load/unload/charge) plus
//! their energy and counter bookkeeping.

use crate::device::DeviceStatus;
use crate::fixed::Fixed64;
use crate::id::{AgvId, DeviceId, LineId, PathPoint};
use crate::product::Product;
use crate::registry::{
    AGV_PAYLOAD_CAPACITY, CHARGE_RATE_PCT_PER_SEC, FORCED_CHARGE_THRESHOLD_PCT,
    LOAD_UNLOAD_DURATION_S, LOAD_UNLOAD_ENERGY_PCT, MOVE_ENERGY_PCT_PER_METER, Registry,
};
use crate::registry::straight_line_distance_m;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlightAction {
    Move { target: PathPoint },
    Load,
    Unload,
    Charge { target_pct_millis: i64, proactive: bool },
}

/// Coarse label for whichever action is in flight, so [`crate::line::Line`]
/// can dispatch `AgvActionDone` without reaching into the private enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Move,
    Load,
    Unload,
    Charge,
}

#[derive(Debug, Clone)]
pub struct Agv {
    pub line: LineId,
    pub id: AgvId,
    pub status: DeviceStatus,
    pub current_point: PathPoint,
    pub payload: Vec<Product>,
    pub battery_pct: Fixed64,
    pub fault_until: Option<Fixed64>,
    fault_started_at: Option<Fixed64>,
    pub proactive_charges: u32,
    pub passive_charges: u32,
    pub transport_seconds: Fixed64,
    pub charge_seconds: Fixed64,
    pub fault_seconds: Fixed64,
    pub completed_tasks: u32,
    action: Option<InFlightAction>,
    action_started_at: Option<Fixed64>,
}

impl Agv {
    pub fn new(line: LineId, id: AgvId) -> Self {
        Self {
            line,
            id,
            status: DeviceStatus::Idle,
            current_point: PathPoint::P0,
            payload: Vec::new(),
            battery_pct: Fixed64::from_num(100),
            fault_until: None,
            fault_started_at: None,
            proactive_charges: 0,
            passive_charges: 0,
            transport_seconds: Fixed64::from_num(0),
            charge_seconds: Fixed64::from_num(0),
            fault_seconds: Fixed64::from_num(0),
            completed_tasks: 0,
            action: None,
            action_started_at: None,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        DeviceId::Agv(self.line, self.id)
    }

    pub fn is_faulted(&self) -> bool {
        self.status == DeviceStatus::Fault
    }

    pub fn is_idle(&self) -> bool {
        self.status == DeviceStatus::Idle
    }

    pub fn is_payload_full(&self) -> bool {
        self.payload.len() >= AGV_PAYLOAD_CAPACITY
    }

    pub fn is_payload_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Energy a move to `target` would cost, independent of whether it is
    /// actually taken — used by the command handler's forced-charge estimate.
    pub fn energy_for_move(&self, target: PathPoint, _registry: &Registry) -> Fixed64 {
        let distance = straight_line_distance_m(self.current_point, target, self.id);
        Fixed64::from_num(distance * MOVE_ENERGY_PCT_PER_METER)
    }

    pub fn energy_for_load_unload(&self) -> Fixed64 {
        Fixed64::from_num(LOAD_UNLOAD_ENERGY_PCT)
    }

    /// Whether committing to an action costing `energy_pct` would leave the
    /// AGV at or below the forced-charge threshold (§4.4).
    pub fn would_breach_threshold(&self, energy_pct: Fixed64) -> bool {
        self.battery_pct <= Fixed64::from_num(FORCED_CHARGE_THRESHOLD_PCT)
            || self.battery_pct - energy_pct < Fixed64::from_num(FORCED_CHARGE_THRESHOLD_PCT)
    }

    // -- Move ----------------------------------------------------------

    pub fn start_move(&mut self, target: PathPoint, now: Fixed64, registry: &Registry) -> Fixed64 {
        let distance = straight_line_distance_m(self.current_point, target, self.id);
        let duration = Fixed64::from_num(registry.move_duration_s(distance));
        self.status = DeviceStatus::Moving;
        self.action = Some(InFlightAction::Move { target });
        self.action_started_at = Some(now);
        duration
    }

    pub fn finish_move(&mut self, now: Fixed64) -> PathPoint {
        let Some(InFlightAction::Move { target }) = self.action.take() else {
            panic!("finish_move without an in-flight move");
        };
        let distance = straight_line_distance_m(self.current_point, target, self.id);
        let energy = Fixed64::from_num(distance * MOVE_ENERGY_PCT_PER_METER);
        self.battery_pct = (self.battery_pct - energy).max(Fixed64::from_num(0));
        if let Some(started) = self.action_started_at.take() {
            self.transport_seconds += now - started;
        }
        self.current_point = target;
        self.status = DeviceStatus::Idle;
        target
    }

    // -- Load / unload ---------------------------------------------------

    pub fn start_load(&mut self, now: Fixed64) -> Fixed64 {
        self.status = DeviceStatus::Moving; // "LOADING" collapses to a busy state; no dedicated variant needed
        self.action = Some(InFlightAction::Load);
        self.action_started_at = Some(now);
        Fixed64::from_num(LOAD_UNLOAD_DURATION_S)
    }

    pub fn finish_load(&mut self, product: Product) {
        debug_assert!(matches!(self.action, Some(InFlightAction::Load)));
        self.action = None;
        self.action_started_at = None;
        self.battery_pct =
            (self.battery_pct - Fixed64::from_num(LOAD_UNLOAD_ENERGY_PCT)).max(Fixed64::from_num(0));
        self.payload.push(product);
        self.status = DeviceStatus::Idle;
        self.completed_tasks += 1;
    }

    pub fn start_unload(&mut self, now: Fixed64) -> Fixed64 {
        self.status = DeviceStatus::Moving;
        self.action = Some(InFlightAction::Unload);
        self.action_started_at = Some(now);
        Fixed64::from_num(LOAD_UNLOAD_DURATION_S)
    }

    pub fn finish_unload(&mut self) -> Product {
        debug_assert!(matches!(self.action, Some(InFlightAction::Unload)));
        self.action = None;
        self.action_started_at = None;
        self.battery_pct =
            (self.battery_pct - Fixed64::from_num(LOAD_UNLOAD_ENERGY_PCT)).max(Fixed64::from_num(0));
        let product = self.payload.remove(0);
        self.status = DeviceStatus::Idle;
        self.completed_tasks += 1;
        product
    }

    // -- Charge -----------------------------------------------------------

    pub fn start_charge(&mut self, target_pct: Fixed64, proactive: bool, now: Fixed64) -> Fixed64 {
        let delta = (target_pct - self.battery_pct).max(Fixed64::from_num(0));
        let duration = delta / Fixed64::from_num(CHARGE_RATE_PCT_PER_SEC);
        self.status = DeviceStatus::Charging;
        self.action = Some(InFlightAction::Charge {
            target_pct_millis: (target_pct.to_num::<f64>() * 1000.0) as i64,
            proactive,
        });
        self.action_started_at = Some(now);
        duration
    }

    pub fn finish_charge(&mut self, now: Fixed64) {
        let Some(InFlightAction::Charge { target_pct_millis, proactive }) = self.action.take() else {
            panic!("finish_charge without an in-flight charge");
        };
        let target_pct = Fixed64::from_num(target_pct_millis as f64 / 1000.0);
        if let Some(started) = self.action_started_at.take() {
            self.charge_seconds += now - started;
        }
        self.battery_pct = target_pct;
        if proactive {
            self.proactive_charges += 1;
        } else {
            self.passive_charges += 1;
        }
        self.status = DeviceStatus::Idle;
    }

    pub fn is_charging(&self) -> bool {
        matches!(self.action, Some(InFlightAction::Charge { .. }))
    }

    /// What kind of action is currently in flight, if any (§7 dispatch).
    pub fn in_flight_kind(&self) -> Option<ActionKind> {
        match self.action {
            Some(InFlightAction::Move { .. }) => Some(ActionKind::Move),
            Some(InFlightAction::Load) => Some(ActionKind::Load),
            Some(InFlightAction::Unload) => Some(ActionKind::Unload),
            Some(InFlightAction::Charge { .. }) => Some(ActionKind::Charge),
            None => None,
        }
    }

    pub fn peek_payload(&self) -> Option<&Product> {
        self.payload.first()
    }

    // -- Faults (§7: abort in-flight action, restore IDLE on clear) -------

    pub fn apply_fault(&mut self, until: Fixed64, now: Fixed64) {
        self.fault_until = Some(until);
        self.fault_started_at = Some(now);
        self.action = None;
        self.action_started_at = None;
        self.status = DeviceStatus::Fault;
    }

    pub fn clear_fault(&mut self, now: Fixed64) {
        if let Some(started) = self.fault_started_at.take() {
            self.fault_seconds += now - started;
        }
        self.fault_until = None;
        self.status = DeviceStatus::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn move_consumes_energy_and_time() {
        let registry = Registry::default();
        let mut agv = Agv::new(LineId::Line1, AgvId::Agv1);
        let duration = agv.start_move(PathPoint::P1, Fixed64::from_num(0), &registry);
        assert!(duration > Fixed64::from_num(0));
        let before = agv.battery_pct;
        let target = agv.finish_move(duration);
        assert_eq!(target, PathPoint::P1);
        assert!(agv.battery_pct < before);
        assert_eq!(agv.current_point, PathPoint::P1);
        assert_eq!(agv.transport_seconds, duration);
    }

    #[test]
    fn forced_charge_threshold_detects_low_battery() {
        let mut agv = Agv::new(LineId::Line1, AgvId::Agv1);
        agv.battery_pct = Fixed64::from_num(4);
        assert!(agv.would_breach_threshold(Fixed64::from_num(0)));
    }

    #[test]
    fn fault_aborts_in_flight_action_and_preserves_payload() {
        let registry = Registry::default();
        let mut agv = Agv::new(LineId::Line1, AgvId::Agv1);
        agv.start_move(PathPoint::P1, Fixed64::from_num(0), &registry);
        agv.apply_fault(Fixed64::from_num(30), Fixed64::from_num(1));
        assert!(agv.is_faulted());
        agv.clear_fault(Fixed64::from_num(30));
        assert_eq!(agv.status, DeviceStatus::Idle);
        assert!(agv.payload.is_empty());
    }

    #[test]
    fn charge_sets_counters_by_mode() {
        let mut agv = Agv::new(LineId::Line1, AgvId::Agv1);
        agv.battery_pct = Fixed64::from_num(50);
        let duration = agv.start_charge(Fixed64::from_num(80), true, Fixed64::from_num(0));
        agv.finish_charge(duration);
        assert_eq!(agv.battery_pct, Fixed64::from_num(80));
        assert_eq!(agv.proactive_charges, 1);
        assert_eq!(agv.passive_charges, 0);
    }
}
