//! Plant-wide simulation: owns the shared clock, registry, RNG, KPI
//! aggregator, and publisher surface, and drives every active [`Line`]
//! through the scheduler (§2, §4.1, §5).
//!
//! A [`Line`] only knows about its own devices; everything that is shared
//! across lines — the scheduler, the `Registry`, the `SimRng`, the
//! `KpiAggregator`, and the `Publisher`/`CommandSource` bus — lives here.
//! `Simulation` is generic over its bus so the same drive loop runs against
//! the in-memory reference bus in tests and against a real MQTT adapter in
//! production, both implementing the same two traits (§6.1).

use crate::command::{self, Command, CommandResponse, Intent};
use crate::config::SimConfig;
use crate::device::DeviceStatus;
use crate::event::{Event, FaultReason};
use crate::fault::FaultInjector;
use crate::fixed::Fixed64;
use crate::id::{AgvId, DeviceId, LineId, StationaryDeviceId};
use crate::kpi::KpiAggregator;
use crate::line::Line;
use crate::order_gen::OrderGenerator;
use crate::publisher::{Alert, AlertKind, CommandSource, DeviceSnapshot, DirtyTracker, OrderEvent, Publisher};
use crate::registry::{CqLane, Registry};
use crate::rng::SimRng;
use crate::scheduler::{FaultTarget, Phase, Scheduler, WakeReason};
use std::collections::HashMap;

/// How often every device is force-published regardless of dirty state.
/// The spec leaves this rate unspecified ("a low-rate heartbeat timer");
/// 30s is a nominal choice, see DESIGN.md.
const HEARTBEAT_INTERVAL_S: f64 = 30.0;

/// The whole plant: every active line plus the shared clock/registry/RNG/KPI
/// state and the bus both traits are served through.
pub struct Simulation<B: Publisher + CommandSource> {
    config: SimConfig,
    registry: Registry,
    rng: SimRng,
    scheduler: Scheduler,
    lines: HashMap<LineId, Line>,
    active_lines: Vec<LineId>,
    kpi: KpiAggregator,
    dirty: DirtyTracker,
    bus: B,
}

impl<B: Publisher + CommandSource> Simulation<B> {
    pub fn new(config: SimConfig, bus: B) -> Self {
        let registry = config.to_registry();
        let rng = match config.rng_seed {
            Some(seed) => SimRng::from_seed(seed),
            None => SimRng::from_entropy(),
        };
        let active_lines: Vec<LineId> = LineId::ALL.into_iter().take(config.line_count as usize).collect();
        let mut lines = HashMap::new();
        for &id in &active_lines {
            lines.insert(id, Line::new(id));
        }

        let mut scheduler = Scheduler::new();
        scheduler.schedule_after(Fixed64::from_num(0), Phase::Generator, WakeReason::OrderGeneratorTick);
        scheduler.schedule_after(Fixed64::from_num(0), Phase::Device, WakeReason::FaultInjectorTick);
        scheduler.schedule_after(
            Fixed64::from_num(config.kpi_snapshot_interval_s),
            Phase::Publisher,
            WakeReason::KpiSnapshotTick,
        );
        scheduler.schedule_after(Fixed64::from_num(HEARTBEAT_INTERVAL_S), Phase::Publisher, WakeReason::HeartbeatTick);

        Self {
            config,
            registry,
            rng,
            scheduler,
            lines,
            active_lines,
            kpi: KpiAggregator::new(),
            dirty: DirtyTracker::new(),
            bus,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn now(&self) -> Fixed64 {
        self.scheduler.now()
    }

    /// Stations + conveyors + quality checkers across every active line; the
    /// denominator for `device_utilization` (§4.9).
    pub fn device_count(&self) -> u32 {
        7 * self.active_lines.len() as u32
    }

    /// Two AGVs per active line; the denominator for `agv_utilization`
    /// (§4.9) is this many AGVs' worth of wall-clock time, not one's, since
    /// `agv_transport_seconds` sums transport time across the whole fleet.
    pub fn agv_count(&self) -> u32 {
        2 * self.active_lines.len() as u32
    }

    /// Manually injects a fault, bypassing the random fault injector — used
    /// by the `--menu` interactive console (§4.13).
    pub fn inject_fault(&mut self, line_id: LineId, target: FaultTarget, duration_s: f64) {
        let now = self.scheduler.now();
        if let Some(line) = self.lines.get_mut(&line_id) {
            line.apply_fault(target, now + Fixed64::from_num(duration_s), now, &mut self.scheduler);
        }
    }

    /// One-line-per-line status summary for the `--menu` console's "print
    /// device status" action.
    pub fn status_report(&self) -> String {
        let mut out = String::new();
        for &line_id in &self.active_lines {
            if let Some(line) = self.lines.get(&line_id) {
                out.push_str(&format!(
                    "{line_id:?}: raw_material={} finished_goods={} agv1_battery={:.1} agv2_battery={:.1}\n",
                    line.raw_material.len(),
                    line.finished_goods.count(),
                    line.agvs.get(&AgvId::Agv1).map(|a| a.battery_pct.to_num::<f64>()).unwrap_or(0.0),
                    line.agvs.get(&AgvId::Agv2).map(|a| a.battery_pct.to_num::<f64>()).unwrap_or(0.0),
                ));
            }
        }
        out
    }

    /// Runs until `SimConfig.end_time_s` (if set) or until the scheduler
    /// idles (§7 "scheduler overrun").
    pub fn run(&mut self) {
        loop {
            if let Some(end) = self.config.end_time_s {
                let past_end = match self.scheduler.peek_time() {
                    Some(t) => t > Fixed64::from_num(end),
                    None => true,
                };
                if past_end {
                    break;
                }
            }
            if !self.step() {
                break;
            }
        }
    }

    /// Advances to the next scheduled instant: polls inbound commands,
    /// drains every wake-up due at that instant, lets idle AGVs pick up
    /// their next queued command, then flushes KPI/publisher state. Returns
    /// `false` once the scheduler has nothing left to drain.
    pub fn step(&mut self) -> bool {
        for &line_id in &self.active_lines.clone() {
            for command in self.bus.poll_commands(line_id) {
                self.handle_inbound(line_id, command);
            }
        }

        let reasons = self.scheduler.drain_next_instant();
        if reasons.is_empty() {
            return false;
        }
        let now = self.scheduler.now();
        for reason in reasons {
            self.dispatch(reason, now);
        }

        for line_id in self.active_lines.clone() {
            let responses = match self.lines.get_mut(&line_id) {
                Some(line) => line.try_dispatch_all(now, &self.registry, &mut self.scheduler),
                None => Vec::new(),
            };
            for response in responses {
                self.bus.publish_response(line_id, response);
            }
        }

        self.drain_events(now);
        self.flush_publisher(now);
        true
    }

    fn handle_inbound(&mut self, line_id: LineId, command: Command) {
        let now = self.scheduler.now();
        match command::validate(line_id, &command) {
            Ok(validated) => {
                if matches!(validated.intent, Intent::GetResult) {
                    let snapshot = self.kpi.compute(now, self.device_count(), self.agv_count());
                    self.bus.publish_result(now, snapshot);
                    self.bus
                        .publish_response(line_id, CommandResponse::new(now, validated.command_id, "see ROOT/result/status"));
                } else if let Some(line) = self.lines.get_mut(&line_id) {
                    line.dispatch_command(validated);
                }
            }
            Err(err) => {
                self.bus
                    .publish_response(line_id, CommandResponse::new(now, command.command_id.clone(), format!("rejected: {err}")));
            }
        }
    }

    fn dispatch(&mut self, reason: WakeReason, now: Fixed64) {
        match reason {
            WakeReason::StationDone(line_id, station) => {
                if let Some(line) = self.lines.get_mut(&line_id) {
                    line.on_station_done(station, now, &self.registry, &mut self.rng, &mut self.scheduler);
                }
            }
            WakeReason::ConveyorArrival(line_id, conveyor, _seq) => {
                if let Some(line) = self.lines.get_mut(&line_id) {
                    line.on_conveyor_arrival(conveyor, now, &self.registry, &mut self.rng, &mut self.scheduler);
                }
            }
            WakeReason::QualityDone(line_id) => {
                if let Some(line) = self.lines.get_mut(&line_id) {
                    line.on_quality_done(now, &self.registry, &mut self.rng, &mut self.scheduler);
                }
            }
            WakeReason::AgvActionDone(line_id, agv_id) => {
                let response = self
                    .lines
                    .get_mut(&line_id)
                    .and_then(|line| line.on_agv_action_done(agv_id, now, &self.registry, &mut self.rng, &mut self.scheduler));
                if let Some(response) = response {
                    self.bus.publish_response(line_id, response);
                }
            }
            WakeReason::FaultCleared(line_id, target) => {
                if let Some(line) = self.lines.get_mut(&line_id) {
                    line.clear_fault(target, now, &self.registry, &mut self.rng, &mut self.scheduler);
                }
            }
            WakeReason::FaultInjectorTick => self.on_fault_injector_tick(now),
            WakeReason::OrderGeneratorTick => self.on_order_generator_tick(now),
            WakeReason::KpiSnapshotTick => self.on_kpi_snapshot_tick(now),
            WakeReason::HeartbeatTick => self.on_heartbeat_tick(now),
        }
    }

    /// Every interval, targets one of the active lines uniformly at random
    /// and emits one order on it (§4.7). The spec's `OrderGeneratorTick` is
    /// a single plant-wide timer with no line tag, so this implementation
    /// treats it as one shared generator choosing its target line each time
    /// it fires rather than an independent generator per line; see
    /// DESIGN.md.
    fn on_order_generator_tick(&mut self, now: Fixed64) {
        let count = self.active_lines.len();
        if count > 0 {
            let weights = vec![1.0; count];
            let idx = self.rng.weighted_index(&weights);
            let target = self.active_lines[idx];
            if let Some(line) = self.lines.get_mut(&target) {
                line.on_order_generator_tick(now, &mut self.rng);
            }
        }
        let interval = OrderGenerator::sample_interval(&self.registry, &mut self.rng);
        self.scheduler.schedule_after(interval, Phase::Generator, WakeReason::OrderGeneratorTick);
    }

    /// Every interval, picks uniformly among every eligible target across
    /// every active line (not just one line's own devices), matching the
    /// single shared fault injector implied by §4.6's "periodically selects
    /// an eligible device" (no per-line injector is named).
    fn on_fault_injector_tick(&mut self, now: Fixed64) {
        let mut candidates: Vec<(LineId, FaultTarget)> = Vec::new();
        for &line_id in &self.active_lines {
            if let Some(line) = self.lines.get(&line_id) {
                candidates.extend(line.eligible_fault_targets().into_iter().map(|t| (line_id, t)));
            }
        }
        if !candidates.is_empty() {
            let weights = vec![1.0; candidates.len()];
            let idx = self.rng.weighted_index(&weights);
            let (line_id, target) = candidates[idx];
            let duration = FaultInjector::sample_duration(&self.registry, &mut self.rng);
            if let Some(line) = self.lines.get_mut(&line_id) {
                line.apply_fault(target, now + duration, now, &mut self.scheduler);
            }
        }
        let interval = FaultInjector::sample_interval(&self.registry, &mut self.rng);
        self.scheduler.schedule_after(interval, Phase::Device, WakeReason::FaultInjectorTick);
    }

    fn on_kpi_snapshot_tick(&mut self, now: Fixed64) {
        let snapshot = self.kpi.compute(now, self.device_count(), self.agv_count());
        self.bus.publish_kpi_snapshot(now, snapshot);
        self.scheduler.schedule_after(
            Fixed64::from_num(self.config.kpi_snapshot_interval_s),
            Phase::Publisher,
            WakeReason::KpiSnapshotTick,
        );
    }

    fn on_heartbeat_tick(&mut self, now: Fixed64) {
        let mut all_ids = Vec::new();
        for &line_id in &self.active_lines {
            if let Some(line) = self.lines.get(&line_id) {
                all_ids.extend(line.all_device_ids());
            }
        }
        let due = self.dirty.force_all(&all_ids, now);
        for device in due {
            self.publish_device_snapshot(device, now);
        }
        self.scheduler.schedule_after(Fixed64::from_num(HEARTBEAT_INTERVAL_S), Phase::Publisher, WakeReason::HeartbeatTick);
    }

    fn drain_events(&mut self, now: Fixed64) {
        let active = self.active_lines.clone();
        for line_id in active {
            let events = self.lines.get_mut(&line_id).map(|l| l.events.drain()).unwrap_or_default();
            for event in &events {
                self.kpi.record_event(event);
                self.handle_event_for_publisher(line_id, event, now);
            }
        }
    }

    fn handle_event_for_publisher(&mut self, line_id: LineId, event: &Event, now: Fixed64) {
        match event {
            Event::ProductEnteredDevice { device, .. }
            | Event::ProductLeftDevice { device, .. }
            | Event::DeviceWorking { device, .. } => {
                self.dirty.mark_device(*device);
            }
            Event::DeviceFaulted { device, until, .. } => {
                self.dirty.mark_device(*device);
                self.bus.publish_alert(Alert {
                    line: line_id,
                    kind: AlertKind::Fault,
                    message: format!("{device:?} faulted until {until}"),
                    tick: now,
                });
            }
            Event::DeviceFaultCleared { device, .. } => {
                self.dirty.mark_device(*device);
            }
            Event::AgvMoveStarted { agv, .. }
            | Event::AgvMoveCompleted { agv, .. }
            | Event::AgvChargeStarted { agv, .. }
            | Event::AgvChargeCompleted { agv, .. }
            | Event::AgvTaskCompleted { agv, .. } => {
                self.dirty.mark_device(DeviceId::Agv(line_id, *agv));
            }
            Event::OrderCreated { order, .. } => {
                self.dirty.mark_orders();
                self.bus.publish_order_event(OrderEvent::Created { order: *order, tick: now });
            }
            Event::OrderCompleted { order, on_time, .. } => {
                self.dirty.mark_orders();
                self.bus
                    .publish_order_event(OrderEvent::Completed { order: *order, on_time: *on_time, tick: now });
            }
            _ => {}
        }
    }

    fn flush_publisher(&mut self, now: Fixed64) {
        let debounce = Fixed64::from_num(self.config.snapshot_debounce_ms as f64 / 1000.0);
        let due = self.dirty.take_due(now, debounce);
        for device in due {
            self.publish_device_snapshot(device, now);
        }
    }

    fn publish_device_snapshot(&mut self, device: DeviceId, now: Fixed64) {
        if let Some(snapshot) = self.device_snapshot(device, now) {
            self.bus.publish_device_status(snapshot);
        }
    }

    /// Builds a wire-agnostic snapshot for one device. `detail` deliberately
    /// carries only a handful of JSON fields per kind — the exact shape is
    /// owned by the external schema validator (§1 ambient-stack boundary),
    /// not this crate.
    fn device_snapshot(&self, device: DeviceId, now: Fixed64) -> Option<DeviceSnapshot> {
        let line = self.lines.get(&device.line())?;
        let (status, detail) = match device {
            DeviceId::Stationary(_, StationaryDeviceId::RawMaterial) => {
                (DeviceStatus::Idle, serde_json::json!({ "available": line.raw_material.len() }))
            }
            DeviceId::Stationary(_, StationaryDeviceId::StationA) => (
                line.station_a.status,
                serde_json::json!({
                    "input_len": line.station_a.input.len(),
                    "output_ready": line.station_a.is_ready_out(),
                    "work_seconds": line.station_a.work_seconds.to_num::<f64>(),
                }),
            ),
            DeviceId::Stationary(_, StationaryDeviceId::StationB) => (
                line.station_b.status,
                serde_json::json!({
                    "input_len": line.station_b.input.len(),
                    "output_ready": line.station_b.is_ready_out(),
                    "work_seconds": line.station_b.work_seconds.to_num::<f64>(),
                }),
            ),
            DeviceId::Stationary(_, StationaryDeviceId::StationC) => (
                line.station_c.status,
                serde_json::json!({
                    "input_len": line.station_c.input.len(),
                    "output_ready": line.station_c.is_ready_out(),
                    "work_seconds": line.station_c.work_seconds.to_num::<f64>(),
                }),
            ),
            DeviceId::Stationary(_, StationaryDeviceId::ConveyorAB) => (
                line.conveyor_ab.status,
                serde_json::json!({ "work_seconds": line.conveyor_ab.work_seconds.to_num::<f64>() }),
            ),
            DeviceId::Stationary(_, StationaryDeviceId::ConveyorBC) => (
                line.conveyor_bc.status,
                serde_json::json!({ "work_seconds": line.conveyor_bc.work_seconds.to_num::<f64>() }),
            ),
            DeviceId::Stationary(_, StationaryDeviceId::ConveyorCQ) => (
                line.conveyor_cq.status,
                serde_json::json!({
                    "work_seconds": line.conveyor_cq.work_seconds.to_num::<f64>(),
                    "lower_occupied": line.conveyor_cq.lane_occupied(CqLane::Lower),
                    "upper_occupied": line.conveyor_cq.lane_occupied(CqLane::Upper),
                }),
            ),
            DeviceId::Stationary(_, StationaryDeviceId::QualityCheck) => (
                line.quality.status,
                serde_json::json!({
                    "input_full": line.quality.is_input_full(),
                    "output_ready": line.quality.is_ready_out(),
                    "work_seconds": line.quality.work_seconds.to_num::<f64>(),
                }),
            ),
            DeviceId::Stationary(_, StationaryDeviceId::FinishedGoods) => {
                (DeviceStatus::Idle, serde_json::json!({ "count": line.finished_goods.count() }))
            }
            DeviceId::Agv(_, agv_id) => {
                let agv = line.agvs.get(&agv_id)?;
                (
                    agv.status,
                    serde_json::json!({
                        "current_point": format!("{:?}", agv.current_point),
                        "battery_pct": agv.battery_pct.to_num::<f64>(),
                        "payload_len": agv.payload.len(),
                        "completed_tasks": agv.completed_tasks,
                    }),
                )
            }
        };
        Some(DeviceSnapshot { device, status, tick: now, detail })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandAction, CommandParams};
    use crate::publisher::InMemoryBus;

    fn sim_with_seed(seed: u64) -> Simulation<InMemoryBus> {
        let config = SimConfig { rng_seed: Some(seed), ..SimConfig::default() };
        Simulation::new(config, InMemoryBus::new())
    }

    #[test]
    fn stepping_eventually_spawns_an_order() {
        let mut sim = sim_with_seed(11);
        for _ in 0..5 {
            if !sim.step() {
                break;
            }
        }
        assert!(!sim.bus().order_events.is_empty());
    }

    #[test]
    fn get_result_publishes_immediately() {
        let mut sim = sim_with_seed(5);
        sim.bus_mut().submit_command(
            LineId::Line1,
            Command {
                command_id: Some("r1".to_string()),
                action: CommandAction::GetResult,
                target: None,
                params: CommandParams::default(),
            },
        );
        sim.step();
        assert_eq!(sim.bus().results.len(), 1);
        assert_eq!(sim.bus().responses.len(), 1);
    }

    #[test]
    fn device_count_scales_with_active_lines() {
        let config = SimConfig { line_count: 2, ..SimConfig::default() };
        let sim = Simulation::new(config, InMemoryBus::new());
        assert_eq!(sim.device_count(), 14);
    }
}
