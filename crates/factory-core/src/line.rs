//! A single production line: eight stationary devices plus two AGVs, wired
//! together the way [`crate::scheduler::Scheduler`] drives them (§2, §3).
//!
//! [`Line`] owns every device and the slot maps for the orders/products
//! flowing through it. It does not own the clock, the registry, the RNG, or
//! the KPI aggregator/publisher — those are shared plant-wide and live on
//! [`crate::sim::Simulation`], which calls back into whichever line a
//! scheduled wake-up names.
//!
//! Rather than a precise per-condition wait-list (the idiomatic discrete-event
//! approach: each blocked transition registers exactly the wake-up that would
//! unblock it), [`Line::pump`] is invoked after every mutating event and
//! eagerly retries every possible forward hand-off until a pass makes no
//! progress. This trades a few redundant attempts per event for a much
//! smaller surface of hand-written wake-up bookkeeping; see DESIGN.md.

use crate::agv::{ActionKind, Agv};
use crate::command::{CommandResponse, Intent, ValidatedCommand};
use crate::conveyor::Conveyor;
use crate::error::CommandError;
use crate::event::{EventBus, Event, FaultReason};
use crate::fixed::Fixed64;
use crate::id::{AgvId, DeviceId, LineId, OrderId, PathPoint, ProductId, StationaryDeviceId};
use crate::order_gen::OrderGenerator;
use crate::product::{Order, OrderItem, Product, ProductType, RouteStep};
use crate::quality::{QualityCheck, QualityOutcome};
use crate::registry::{agv_may_access_cq_lane, device_at_point, CqLane, Registry, StationKind};
use crate::rng::SimRng;
use crate::scheduler::{FaultTarget, Phase, Scheduler, WakeReason};
use crate::station::Station;
use crate::warehouse::{FinishedGoodsWarehouse, RawMaterialWarehouse};
use slotmap::SlotMap;
use std::collections::{HashMap, VecDeque};

/// A single production line, fixed topology (§3):
/// `raw_material -> station_a -> conveyor_ab -> station_b -> conveyor_bc ->
/// station_c -> conveyor_cq -> quality -> finished_goods`, serviced by two
/// AGVs that also carry P3 products back from the Station-C first pass to
/// Station B for their second pass.
pub struct Line {
    pub id: LineId,
    pub raw_material: RawMaterialWarehouse,
    pub station_a: Station,
    pub conveyor_ab: Conveyor,
    pub station_b: Station,
    pub conveyor_bc: Conveyor,
    pub station_c: Station,
    pub conveyor_cq: Conveyor,
    pub quality: QualityCheck,
    pub finished_goods: FinishedGoodsWarehouse,
    pub agvs: HashMap<AgvId, Agv>,

    pub orders: SlotMap<OrderId, Order>,
    pub products: SlotMap<ProductId, Product>,
    label_index: HashMap<String, ProductId>,

    command_queues: HashMap<AgvId, VecDeque<ValidatedCommand>>,
    /// The resolved source product of an in-flight `load`, stashed between
    /// dispatch (where it is removed from its source device) and
    /// `AgvActionDone` (where it is added to the AGV's payload).
    pending_load: HashMap<AgvId, Product>,
    /// Whether the move currently in flight for this AGV is the forced
    /// detour to the charging point rather than a requested move.
    forced_charge_pending: HashMap<AgvId, bool>,
    /// `command_id` of the command currently occupying the AGV, so the
    /// response can be emitted once the action completes.
    in_flight_command_id: HashMap<AgvId, Option<String>>,

    pub events: EventBus,
}

impl Line {
    pub fn new(id: LineId) -> Self {
        let conveyor_cq = if id == LineId::Line3 {
            Conveyor::with_cq_lanes(id, StationaryDeviceId::ConveyorCQ)
        } else {
            Conveyor::new(id, StationaryDeviceId::ConveyorCQ)
        };
        let mut agvs = HashMap::new();
        agvs.insert(AgvId::Agv1, Agv::new(id, AgvId::Agv1));
        agvs.insert(AgvId::Agv2, Agv::new(id, AgvId::Agv2));

        Self {
            id,
            raw_material: RawMaterialWarehouse::new(id),
            station_a: Station::new(id, StationaryDeviceId::StationA, StationKind::A),
            conveyor_ab: Conveyor::new(id, StationaryDeviceId::ConveyorAB),
            station_b: Station::new(id, StationaryDeviceId::StationB, StationKind::B),
            conveyor_bc: Conveyor::new(id, StationaryDeviceId::ConveyorBC),
            station_c: Station::new(id, StationaryDeviceId::StationC, StationKind::C),
            conveyor_cq,
            quality: QualityCheck::new(id),
            finished_goods: FinishedGoodsWarehouse::new(id),
            agvs,
            orders: SlotMap::with_key(),
            products: SlotMap::with_key(),
            label_index: HashMap::new(),
            command_queues: {
                let mut m = HashMap::new();
                m.insert(AgvId::Agv1, VecDeque::new());
                m.insert(AgvId::Agv2, VecDeque::new());
                m
            },
            pending_load: HashMap::new(),
            forced_charge_pending: HashMap::new(),
            in_flight_command_id: HashMap::new(),
            events: EventBus::new(),
        }
    }

    pub fn all_device_ids(&self) -> Vec<DeviceId> {
        use StationaryDeviceId::*;
        let mut ids: Vec<DeviceId> = [StationA, ConveyorAB, StationB, ConveyorBC, StationC, ConveyorCQ, QualityCheck]
            .into_iter()
            .map(|d| DeviceId::Stationary(self.id, d))
            .collect();
        ids.push(DeviceId::Agv(self.id, AgvId::Agv1));
        ids.push(DeviceId::Agv(self.id, AgvId::Agv2));
        ids
    }

    // -- Autonomous cascade (§4.2/§4.3) --------------------------------------

    /// Eagerly drives every possible forward hand-off (station output onto
    /// its conveyor, conveyor release into the next station's input, station
    /// start-of-work) until a full pass makes no further progress. Any step
    /// that schedules a timed completion pushes the matching wake-up onto
    /// `scheduler`.
    pub fn pump(&mut self, now: Fixed64, registry: &Registry, rng: &mut SimRng, scheduler: &mut Scheduler) {
        loop {
            let mut progressed = false;
            progressed |= self.try_station_to_conveyor_ab(now, scheduler);
            progressed |= self.try_conveyor_release(StationaryDeviceId::ConveyorAB, now, scheduler);
            progressed |= self.try_station_to_conveyor_bc(now, scheduler);
            progressed |= self.try_conveyor_release(StationaryDeviceId::ConveyorBC, now, scheduler);
            progressed |= self.try_station_c_output(now, scheduler);
            progressed |= self.try_conveyor_release(StationaryDeviceId::ConveyorCQ, now, scheduler);
            progressed |= self.try_station_start(StationKind::A, now, registry, rng, scheduler);
            progressed |= self.try_station_start(StationKind::B, now, registry, rng, scheduler);
            progressed |= self.try_station_start(StationKind::C, now, registry, rng, scheduler);
            progressed |= self.try_quality_start(now, registry, rng, scheduler);
            if !progressed {
                break;
            }
        }
    }

    fn station(&mut self, kind: StationKind) -> &mut Station {
        match kind {
            StationKind::A => &mut self.station_a,
            StationKind::B => &mut self.station_b,
            StationKind::C => &mut self.station_c,
        }
    }

    fn try_station_start(
        &mut self,
        kind: StationKind,
        now: Fixed64,
        registry: &Registry,
        rng: &mut SimRng,
        scheduler: &mut Scheduler,
    ) -> bool {
        let station = self.station(kind);
        let device = station.device_id();
        if let Some(duration) = station.maybe_start(now, registry, rng) {
            scheduler.schedule_after(duration, Phase::Device, WakeReason::StationDone(self.id, device_id_kind(device)));
            true
        } else {
            false
        }
    }

    fn try_quality_start(&mut self, now: Fixed64, _registry: &Registry, rng: &mut SimRng, scheduler: &mut Scheduler) -> bool {
        if let Some(duration) = self.quality.maybe_start(now, rng) {
            scheduler.schedule_after(duration, Phase::Device, WakeReason::QualityDone(self.id));
            true
        } else {
            false
        }
    }

    fn try_station_to_conveyor_ab(&mut self, now: Fixed64, scheduler: &mut Scheduler) -> bool {
        if !self.station_a.is_ready_out() {
            return false;
        }
        if self.conveyor_ab.is_full() || self.conveyor_ab.is_faulted() {
            return false;
        }
        let product = self.station_a.take_output().expect("checked is_ready_out");
        self.events.emit(Event::ProductLeftDevice {
            product: product.id,
            device: station_id_device(self.id, StationaryDeviceId::StationA),
            tick: now,
        });
        self.push_onto_conveyor(StationaryDeviceId::ConveyorAB, product, now, scheduler);
        true
    }

    fn try_station_to_conveyor_bc(&mut self, now: Fixed64, scheduler: &mut Scheduler) -> bool {
        if !self.station_b.is_ready_out() {
            return false;
        }
        if self.conveyor_bc.is_full() || self.conveyor_bc.is_faulted() {
            return false;
        }
        let product = self.station_b.take_output().expect("checked is_ready_out");
        self.events.emit(Event::ProductLeftDevice {
            product: product.id,
            device: station_id_device(self.id, StationaryDeviceId::StationB),
            tick: now,
        });
        self.push_onto_conveyor(StationaryDeviceId::ConveyorBC, product, now, scheduler);
        true
    }

    /// Station C's output is a routing fork (§3): a P3 product on its first
    /// pass is held for an AGV ride back to Station B instead of moving on
    /// toward quality. Line 3 has a dedicated holding lane for this; lines 1
    /// and 2 simply leave the product parked in Station C's own output slot
    /// (which blocks the station) until an AGV collects it directly.
    fn try_station_c_output(&mut self, now: Fixed64, scheduler: &mut Scheduler) -> bool {
        let is_first_pass_p3 = match self.station_c.peek_output() {
            Some(product) => product.product_type == ProductType::P3 && !product.p3_second_pass,
            None => return false,
        };

        if is_first_pass_p3 {
            if self.id != LineId::Line3 {
                return false;
            }
            let lane = if !self.conveyor_cq.lane_occupied(CqLane::Lower) {
                Some(CqLane::Lower)
            } else if !self.conveyor_cq.lane_occupied(CqLane::Upper) {
                Some(CqLane::Upper)
            } else {
                None
            };
            let Some(lane) = lane else { return false };
            let mut product = self.station_c.take_output().expect("checked above");
            product.route_step = RouteStep::ConveyorCqHolding;
            let pid = product.id;
            self.events.emit(Event::ProductLeftDevice {
                product: pid,
                device: station_id_device(self.id, StationaryDeviceId::StationC),
                tick: now,
            });
            self.conveyor_cq
                .push_holding_lane(lane, product)
                .expect("checked lane_occupied");
            self.events.emit(Event::CqLaneOccupied { line: self.id, lane, product: pid, tick: now });
            true
        } else {
            if self.conveyor_cq.is_full() || self.conveyor_cq.is_faulted() {
                return false;
            }
            let product = self.station_c.take_output().expect("checked is_ready_out");
            self.events.emit(Event::ProductLeftDevice {
                product: product.id,
                device: station_id_device(self.id, StationaryDeviceId::StationC),
                tick: now,
            });
            self.push_onto_conveyor(StationaryDeviceId::ConveyorCQ, product, now, scheduler);
            true
        }
    }

    fn conveyor_mut(&mut self, id: StationaryDeviceId) -> &mut Conveyor {
        match id {
            StationaryDeviceId::ConveyorAB => &mut self.conveyor_ab,
            StationaryDeviceId::ConveyorBC => &mut self.conveyor_bc,
            StationaryDeviceId::ConveyorCQ => &mut self.conveyor_cq,
            other => panic!("{other:?} is not a conveyor"),
        }
    }

    fn push_onto_conveyor(&mut self, id: StationaryDeviceId, product: Product, now: Fixed64, scheduler: &mut Scheduler) {
        let line = self.id;
        let conveyor = self.conveyor_mut(id);
        match conveyor.try_push(product, now) {
            Ok(arrives_at) => {
                scheduler.schedule_at(arrives_at, Phase::Device, WakeReason::ConveyorArrival(line, id, 0));
            }
            Err(_product) => unreachable!("capacity was checked by the caller"),
        }
    }

    fn try_conveyor_release(&mut self, conveyor_id: StationaryDeviceId, now: Fixed64, scheduler: &mut Scheduler) -> bool {
        let downstream_kind = downstream_station_kind(conveyor_id);
        let downstream_has_room = match downstream_kind {
            Some(StationKind::A) => !self.station_a.is_input_full() && !self.station_a.is_faulted(),
            Some(StationKind::B) => !self.station_b.is_input_full() && !self.station_b.is_faulted(),
            Some(StationKind::C) => !self.station_c.is_input_full() && !self.station_c.is_faulted(),
            None => !self.quality.is_input_full() && !self.quality.is_faulted(),
        };
        if !self.conveyor_mut(conveyor_id).head_ready(now) {
            return false;
        }
        let before = self.conveyor_mut(conveyor_id).work_seconds;
        let product = self.conveyor_mut(conveyor_id).try_release_head(now, downstream_has_room);
        let Some(mut product) = product else { return false };
        let device = station_id_device(self.id, conveyor_id);
        // The belt only closes out a busy session (and folds it into
        // `work_seconds`) once it drains to empty, so this is often zero —
        // mirrors `Station`/`QualityCheck`, which likewise only emit
        // `DeviceWorking` when a processing session actually completes.
        let worked_s = self.conveyor_mut(conveyor_id).work_seconds - before;
        if worked_s > Fixed64::from_num(0) {
            self.events.emit(Event::DeviceWorking { device, seconds: worked_s, tick: now });
        }
        self.events.emit(Event::ProductLeftDevice { product: product.id, device, tick: now });
        match downstream_kind {
            Some(StationKind::A) => unreachable!("no conveyor feeds station A"),
            Some(StationKind::B) => {
                if product.product_type == ProductType::P3 && product.route_step == RouteStep::ConveyorCqHolding {
                    product.p3_second_pass = true;
                }
                product.route_step = RouteStep::StationB;
                self.enter_station(StationKind::B, product, now);
            }
            Some(StationKind::C) => {
                product.route_step = if product.p3_second_pass {
                    RouteStep::StationCSecondPass
                } else {
                    RouteStep::StationCFirstPass
                };
                self.enter_station(StationKind::C, product, now);
            }
            None => {
                product.route_step = RouteStep::QualityCheck;
                product.mark_stage("entered_quality", now);
                self.events.emit(Event::ProductEnteredDevice {
                    product: product.id,
                    device: self.quality.device_id(),
                    tick: now,
                });
                self.quality
                    .try_enqueue(product)
                    .expect("capacity checked by downstream_has_room");
            }
        }
        true
    }

    fn enter_station(&mut self, kind: StationKind, product: Product, now: Fixed64) {
        let device = self.station(kind).device_id();
        self.events.emit(Event::ProductEnteredDevice { product: product.id, device, tick: now });
        self.station(kind)
            .try_enqueue(product)
            .expect("capacity checked by downstream_has_room");
    }

    // -- Scheduled completions -----------------------------------------------

    pub fn on_station_done(&mut self, station_id: StationaryDeviceId, now: Fixed64, registry: &Registry, rng: &mut SimRng, scheduler: &mut Scheduler) {
        let kind = match station_id {
            StationaryDeviceId::StationA => StationKind::A,
            StationaryDeviceId::StationB => StationKind::B,
            StationaryDeviceId::StationC => StationKind::C,
            other => panic!("{other:?} is not a station"),
        };
        // A `StationDone` wake-up scheduled before a fault pause is never
        // cancelled (the scheduler has no cancellation); it is superseded by
        // the one `clear_fault` reschedules for the resumed remaining
        // duration. Ignore it here rather than double-completing the item.
        if !self.station(kind).is_completion_due(now) {
            return;
        }
        let (product, device, worked_s) = {
            let station = self.station(kind);
            let before = station.work_seconds;
            let product = station.finish_processing(now);
            let worked = station.work_seconds - before;
            (product.id, station.device_id(), worked)
        };
        self.events.emit(Event::DeviceWorking { device, seconds: worked_s, tick: now });
        let _ = product;
        self.pump(now, registry, rng, scheduler);
    }

    pub fn on_conveyor_arrival(&mut self, conveyor_id: StationaryDeviceId, now: Fixed64, registry: &Registry, rng: &mut SimRng, scheduler: &mut Scheduler) {
        self.pump(now, registry, rng, scheduler);
        let _ = conveyor_id;
    }

    pub fn on_quality_done(&mut self, now: Fixed64, registry: &Registry, rng: &mut SimRng, scheduler: &mut Scheduler) {
        if !self.quality.is_completion_due(now) {
            return;
        }
        let before = self.quality.work_seconds;
        let outcome = self.quality.finish_processing(now, rng);
        let worked = self.quality.work_seconds - before;
        self.events.emit(Event::DeviceWorking { device: self.quality.device_id(), seconds: worked, tick: now });
        match &outcome {
            QualityOutcome::Passed(product) => {
                self.events.emit(Event::QualityPassed { product: product.id, tick: now });
            }
            QualityOutcome::Rework(product) => {
                self.events.emit(Event::QualityFailed { product: product.id, attempts: product.attempts, tick: now });
            }
            QualityOutcome::Scrapped { product, scrap_cost } => {
                self.events.emit(Event::QualityFailed { product: product.id, attempts: product.attempts, tick: now });
                self.events.emit(Event::ProductScrapped { product: product.id, scrap_cost: *scrap_cost, tick: now });
                self.finalize_product(product.id, now, false);
            }
        }
        self.pump(now, registry, rng, scheduler);
    }

    fn finalize_product(&mut self, product_id: ProductId, now: Fixed64, finished: bool) {
        let order_id = self.products.get(product_id).map(|p| p.order_id);
        if let Some(product) = self.products.get_mut(product_id) {
            if finished {
                product.finished_at = Some(now);
            } else {
                product.scrapped_at = Some(now);
                product.route_step = RouteStep::Scrapped;
            }
        }
        if let Some(order_id) = order_id {
            self.check_order_completion(order_id, now);
        }
    }

    fn check_order_completion(&mut self, order_id: OrderId, now: Fixed64) {
        let Some(order) = self.orders.get(order_id) else { return };
        let product_ids = order.product_ids.clone();
        let deadline = order.deadline;
        let all_terminal = product_ids
            .iter()
            .all(|pid| self.products.get(*pid).is_some_and(|p| !p.is_in_flight()));
        if !all_terminal {
            return;
        }
        let on_time = product_ids.iter().all(|pid| {
            self.products
                .get(*pid)
                .is_some_and(|p| p.finished_at.is_some_and(|t| t <= deadline))
        });
        self.events.emit(Event::OrderCompleted { order: order_id, on_time, tick: now });
    }

    // -- Faults (§4.6) --------------------------------------------------------

    pub fn eligible_fault_targets(&self) -> Vec<FaultTarget> {
        let mut targets = Vec::new();
        if !self.station_a.is_faulted() {
            targets.push(FaultTarget::Stationary(StationaryDeviceId::StationA));
        }
        if !self.station_b.is_faulted() {
            targets.push(FaultTarget::Stationary(StationaryDeviceId::StationB));
        }
        if !self.station_c.is_faulted() {
            targets.push(FaultTarget::Stationary(StationaryDeviceId::StationC));
        }
        if !self.conveyor_ab.is_faulted() {
            targets.push(FaultTarget::Stationary(StationaryDeviceId::ConveyorAB));
        }
        if !self.conveyor_bc.is_faulted() {
            targets.push(FaultTarget::Stationary(StationaryDeviceId::ConveyorBC));
        }
        if !self.conveyor_cq.is_faulted() {
            targets.push(FaultTarget::Stationary(StationaryDeviceId::ConveyorCQ));
        }
        for (id, agv) in self.agvs.iter() {
            if !agv.is_faulted() {
                targets.push(FaultTarget::Agv(*id));
            }
        }
        targets
    }

    pub fn apply_fault(&mut self, target: FaultTarget, until: Fixed64, now: Fixed64, scheduler: &mut Scheduler) {
        let device = match target {
            FaultTarget::Stationary(id) => station_id_device(self.id, id),
            FaultTarget::Agv(agv) => DeviceId::Agv(self.id, agv),
        };
        match target {
            FaultTarget::Stationary(StationaryDeviceId::StationA) => {
                self.station_a.apply_fault(until, now);
            }
            FaultTarget::Stationary(StationaryDeviceId::StationB) => {
                self.station_b.apply_fault(until, now);
            }
            FaultTarget::Stationary(StationaryDeviceId::StationC) => {
                self.station_c.apply_fault(until, now);
            }
            FaultTarget::Stationary(StationaryDeviceId::ConveyorAB) => self.conveyor_ab.apply_fault(until, now),
            FaultTarget::Stationary(StationaryDeviceId::ConveyorBC) => self.conveyor_bc.apply_fault(until, now),
            FaultTarget::Stationary(StationaryDeviceId::ConveyorCQ) => self.conveyor_cq.apply_fault(until, now),
            FaultTarget::Agv(agv) => {
                self.agvs.get_mut(&agv).expect("known AGV").apply_fault(until, now);
                // §7: a fault aborts whatever the AGV was doing in flight.
                self.pending_load.remove(&agv);
                self.forced_charge_pending.remove(&agv);
                self.in_flight_command_id.remove(&agv);
            }
            FaultTarget::Stationary(other) => panic!("{other:?} is not fault-eligible"),
        }
        self.events.emit(Event::DeviceFaulted { device, reason: FaultReason::InjectedFault, until, tick: now });
        scheduler.schedule_at(until, Phase::Device, WakeReason::FaultCleared(self.id, target));
    }

    pub fn clear_fault(&mut self, target: FaultTarget, now: Fixed64, registry: &Registry, rng: &mut SimRng, scheduler: &mut Scheduler) {
        let device = match target {
            FaultTarget::Stationary(id) => station_id_device(self.id, id),
            FaultTarget::Agv(agv) => DeviceId::Agv(self.id, agv),
        };
        match target {
            FaultTarget::Stationary(StationaryDeviceId::StationA) => {
                if let Some(remaining) = self.station_a.clear_fault(now) {
                    scheduler.schedule_after(remaining, Phase::Device, WakeReason::StationDone(self.id, StationaryDeviceId::StationA));
                }
            }
            FaultTarget::Stationary(StationaryDeviceId::StationB) => {
                if let Some(remaining) = self.station_b.clear_fault(now) {
                    scheduler.schedule_after(remaining, Phase::Device, WakeReason::StationDone(self.id, StationaryDeviceId::StationB));
                }
            }
            FaultTarget::Stationary(StationaryDeviceId::StationC) => {
                if let Some(remaining) = self.station_c.clear_fault(now) {
                    scheduler.schedule_after(remaining, Phase::Device, WakeReason::StationDone(self.id, StationaryDeviceId::StationC));
                }
            }
            FaultTarget::Stationary(StationaryDeviceId::ConveyorAB) => self.conveyor_ab.clear_fault(now),
            FaultTarget::Stationary(StationaryDeviceId::ConveyorBC) => self.conveyor_bc.clear_fault(now),
            FaultTarget::Stationary(StationaryDeviceId::ConveyorCQ) => self.conveyor_cq.clear_fault(now),
            FaultTarget::Agv(agv) => {
                self.agvs.get_mut(&agv).expect("known AGV").clear_fault(now);
            }
            FaultTarget::Stationary(other) => panic!("{other:?} is not fault-eligible"),
        }
        self.events.emit(Event::DeviceFaultCleared { device, tick: now });
        self.pump(now, registry, rng, scheduler);
    }

    // -- Order generation (§4.7) ----------------------------------------------

    pub fn on_order_generator_tick(&mut self, now: Fixed64, rng: &mut SimRng) {
        let draft = OrderGenerator::generate(now, rng);
        let order_id = self.orders.insert(Order {
            id: OrderId::default(),
            created_at: now,
            deadline: draft.deadline,
            priority: draft.priority,
            items: summarize(&draft.product_types),
            product_ids: Vec::new(),
        });
        self.orders[order_id].id = order_id;

        let mut product_ids = Vec::new();
        for product_type in draft.product_types {
            let product_id = self.products.insert(Product::new(ProductId::default(), product_type, order_id, now));
            self.products[product_id].id = product_id;
            let label = self.products[product_id].label.clone();
            self.label_index.insert(label, product_id);
            self.raw_material.spawn(self.products[product_id].clone());
            self.events.emit(Event::ProductCreated { product: product_id, product_type, line: self.id, tick: now });
            product_ids.push(product_id);
        }
        self.orders[order_id].product_ids = product_ids;
        self.events.emit(Event::OrderCreated { order: order_id, tick: now });
    }

    // -- Command dispatch (§4.8, §6.3, §6.4) ----------------------------------

    /// Routes a structurally-valid command to its AGV's queue (device-state
    /// validation and the resulting response happen once it reaches the head
    /// of the queue and the AGV is idle; see [`Self::try_dispatch_next`]).
    pub fn dispatch_command(&mut self, command: ValidatedCommand) {
        let Some(agv) = command.agv else { return };
        self.command_queues.entry(agv).or_default().push_back(command);
    }

    /// Attempts to start the next queued command for every idle AGV on this
    /// line. Called once per processed instant.
    pub fn try_dispatch_all(&mut self, now: Fixed64, registry: &Registry, scheduler: &mut Scheduler) -> Vec<CommandResponse> {
        let mut responses = Vec::new();
        for agv_id in [AgvId::Agv1, AgvId::Agv2] {
            if let Some(response) = self.try_dispatch_one(agv_id, now, registry, scheduler) {
                responses.push(response);
            }
        }
        responses
    }

    fn try_dispatch_one(&mut self, agv_id: AgvId, now: Fixed64, registry: &Registry, scheduler: &mut Scheduler) -> Option<CommandResponse> {
        if !self.agvs.get(&agv_id)?.is_idle() {
            return None;
        }
        let command = self.command_queues.get_mut(&agv_id)?.pop_front()?;
        let command_id = command.command_id.clone();
        let result = self.execute_intent(agv_id, command.intent, now, registry, scheduler);
        match result {
            Ok(Some(message)) => Some(CommandResponse::new(now, command_id, message)),
            Ok(None) => {
                self.in_flight_command_id.insert(agv_id, command_id);
                None
            }
            Err(err) => {
                self.events.emit(Event::CommandRejected { line: self.id, reason: err.to_string(), tick: now });
                Some(CommandResponse::new(now, command_id, format!("rejected: {err}")))
            }
        }
    }

    /// Executes an approved intent. Returns `Ok(Some(message))` for an
    /// immediate response (forced-charge detour, rejection handled
    /// elsewhere), or `Ok(None)` when the response is deferred to
    /// `AgvActionDone`.
    fn execute_intent(&mut self, agv_id: AgvId, intent: Intent, now: Fixed64, registry: &Registry, scheduler: &mut Scheduler) -> Result<Option<String>, CommandError> {
        if self.agvs[&agv_id].is_faulted() {
            return Err(CommandError::AgvFaulted { line: self.id, agv: agv_id });
        }
        match intent {
            Intent::Move { target } => self.dispatch_move(agv_id, target, now, registry, scheduler),
            Intent::Charge { target_level } => self.dispatch_charge(agv_id, target_level, now, scheduler),
            Intent::Load { product_id } => self.dispatch_load(agv_id, product_id, now, scheduler),
            Intent::Unload => self.dispatch_unload(agv_id, now, scheduler),
            Intent::GetResult => Ok(Some("see ROOT/result".to_string())),
        }
    }

    fn dispatch_move(&mut self, agv_id: AgvId, target: PathPoint, now: Fixed64, registry: &Registry, scheduler: &mut Scheduler) -> Result<Option<String>, CommandError> {
        let agv = self.agvs.get_mut(&agv_id).expect("known AGV");
        let energy = agv.energy_for_move(target, registry);
        if agv.would_breach_threshold(energy) {
            let duration = agv.start_move(PathPoint::P10, now, registry);
            self.forced_charge_pending.insert(agv_id, true);
            scheduler.schedule_after(duration, Phase::Agv, WakeReason::AgvActionDone(self.id, agv_id));
            self.events.emit(Event::AgvMoveStarted { line: self.id, agv: agv_id, tick: now });
            Ok(Some(
                "forced charge: battery too low for the requested move, detouring to P10 to charge to 100%".to_string(),
            ))
        } else {
            let duration = agv.start_move(target, now, registry);
            self.forced_charge_pending.insert(agv_id, false);
            scheduler.schedule_after(duration, Phase::Agv, WakeReason::AgvActionDone(self.id, agv_id));
            self.events.emit(Event::AgvMoveStarted { line: self.id, agv: agv_id, tick: now });
            Ok(None)
        }
    }

    fn dispatch_charge(&mut self, agv_id: AgvId, target_level: Fixed64, now: Fixed64, scheduler: &mut Scheduler) -> Result<Option<String>, CommandError> {
        let agv = self.agvs.get_mut(&agv_id).expect("known AGV");
        if target_level <= agv.battery_pct {
            return Err(CommandError::InvalidChargeTarget);
        }
        let proactive = agv.battery_pct > Fixed64::from_num(crate::registry::FORCED_CHARGE_THRESHOLD_PCT);
        let duration = agv.start_charge(target_level, proactive, now);
        self.events.emit(Event::AgvChargeStarted { line: self.id, agv: agv_id, proactive, tick: now });
        scheduler.schedule_after(duration, Phase::Agv, WakeReason::AgvActionDone(self.id, agv_id));
        Ok(None)
    }

    fn dispatch_load(&mut self, agv_id: AgvId, product_id: Option<String>, now: Fixed64, scheduler: &mut Scheduler) -> Result<Option<String>, CommandError> {
        if self.agvs[&agv_id].is_payload_full() {
            return Err(CommandError::PayloadFull);
        }
        let product = self.resolve_load_source(agv_id, product_id)?;
        let agv = self.agvs.get_mut(&agv_id).expect("known AGV");
        let duration = agv.start_load(now);
        self.pending_load.insert(agv_id, product);
        scheduler.schedule_after(duration, Phase::Agv, WakeReason::AgvActionDone(self.id, agv_id));
        Ok(None)
    }

    fn dispatch_unload(&mut self, agv_id: AgvId, now: Fixed64, scheduler: &mut Scheduler) -> Result<Option<String>, CommandError> {
        let agv = self.agvs.get(&agv_id).expect("known AGV");
        if agv.is_payload_empty() {
            return Err(CommandError::PayloadEmpty);
        }
        let product = agv.peek_payload().expect("checked non-empty").clone();
        self.validate_unload_destination(agv_id, &product)?;
        let agv = self.agvs.get_mut(&agv_id).expect("known AGV");
        let duration = agv.start_unload(now);
        scheduler.schedule_after(duration, Phase::Agv, WakeReason::AgvActionDone(self.id, agv_id));
        Ok(None)
    }

    /// Resolves and *removes* the requested product from its source device,
    /// without mutating the AGV yet (§4.8: the buffer effect happens at
    /// dispatch; the scheduled duration is a cosmetic busy period before the
    /// AGV can accept its next command — see DESIGN.md).
    fn resolve_load_source(&mut self, agv_id: AgvId, product_id: Option<String>) -> Result<Product, CommandError> {
        let point = self.agvs[&agv_id].current_point;
        let device = device_at_point(point).ok_or(CommandError::NothingToLoad)?;
        match device {
            StationaryDeviceId::RawMaterial => {
                let label = product_id.ok_or(CommandError::MissingProductId)?;
                let pid = self
                    .label_index
                    .get(&label)
                    .copied()
                    .ok_or_else(|| CommandError::UnknownRawProduct(label.clone()))?;
                let product = self
                    .raw_material
                    .take(pid)
                    .ok_or_else(|| CommandError::UnknownRawProduct(label.clone()))?;
                Ok(product)
            }
            StationaryDeviceId::StationA => self.station_a.take_output().ok_or(CommandError::NothingToLoad),
            StationaryDeviceId::StationB => self.station_b.take_output().ok_or(CommandError::NothingToLoad),
            StationaryDeviceId::StationC => self.station_c.take_output().ok_or(CommandError::NothingToLoad),
            StationaryDeviceId::ConveyorCQ => {
                let lane = lane_for_agv(agv_id);
                if !agv_may_access_cq_lane(agv_id, lane) {
                    return Err(CommandError::WrongCorridor { agv: agv_id });
                }
                self.conveyor_cq.take_holding_lane(lane).ok_or(CommandError::NothingToLoad)
            }
            StationaryDeviceId::QualityCheck => match self.quality.take_output() {
                Some(QualityOutcome::Passed(p)) | Some(QualityOutcome::Rework(p)) => Ok(p),
                _ => Err(CommandError::NothingToLoad),
            },
            StationaryDeviceId::ConveyorAB | StationaryDeviceId::ConveyorBC | StationaryDeviceId::FinishedGoods => {
                Err(CommandError::NothingToLoad)
            }
        }
    }

    fn validate_unload_destination(&self, agv_id: AgvId, product: &Product) -> Result<(), CommandError> {
        let point = self.agvs[&agv_id].current_point;
        let device = device_at_point(point).ok_or(CommandError::DestinationUnavailable)?;
        match device {
            StationaryDeviceId::StationA => {
                if self.station_a.is_input_full() || self.station_a.is_faulted() {
                    Err(CommandError::DestinationUnavailable)
                } else {
                    Ok(())
                }
            }
            StationaryDeviceId::StationB => {
                if self.station_b.is_input_full() || self.station_b.is_faulted() {
                    Err(CommandError::DestinationUnavailable)
                } else {
                    Ok(())
                }
            }
            StationaryDeviceId::StationC => {
                if self.station_c.is_input_full() || self.station_c.is_faulted() {
                    Err(CommandError::DestinationUnavailable)
                } else {
                    Ok(())
                }
            }
            StationaryDeviceId::QualityCheck => {
                if self.quality.is_input_full() || self.quality.is_faulted() {
                    Err(CommandError::DestinationUnavailable)
                } else {
                    Ok(())
                }
            }
            StationaryDeviceId::FinishedGoods => Ok(()),
            StationaryDeviceId::RawMaterial
            | StationaryDeviceId::ConveyorAB
            | StationaryDeviceId::ConveyorBC
            | StationaryDeviceId::ConveyorCQ => {
                let _ = product;
                Err(CommandError::DestinationUnavailable)
            }
        }
    }

    fn deliver_unloaded_product(&mut self, agv_id: AgvId, mut product: Product, now: Fixed64) {
        let point = self.agvs[&agv_id].current_point;
        let device = device_at_point(point).expect("validated at dispatch");
        match device {
            StationaryDeviceId::StationA => {
                product.route_step = RouteStep::StationA;
                self.enter_station(StationKind::A, product, now);
            }
            StationaryDeviceId::StationB => {
                // An AGV only ever delivers to P3 for a P3 product's second
                // pass (its first visit to Station B is always the
                // autonomous conveyor hand-off), whether it picked the
                // product up from the Conveyor-CQ holding lane (line 3) or
                // directly from Station C's output slot (lines 1-2).
                if product.product_type == ProductType::P3 {
                    product.p3_second_pass = true;
                }
                product.route_step = RouteStep::StationB;
                self.enter_station(StationKind::B, product, now);
            }
            StationaryDeviceId::StationC => {
                product.route_step = RouteStep::ReworkAtStationC;
                self.enter_station(StationKind::C, product, now);
            }
            StationaryDeviceId::QualityCheck => {
                product.route_step = RouteStep::QualityCheck;
                self.events.emit(Event::ProductEnteredDevice { product: product.id, device: self.quality.device_id(), tick: now });
                let _ = self.quality.try_enqueue(product);
            }
            StationaryDeviceId::FinishedGoods => {
                let pid = product.id;
                let deposited = self.finished_goods.deposit(product, now);
                if let Some(stored) = self.products.get_mut(pid) {
                    *stored = deposited;
                }
                let theoretical = self.products[pid].product_type.theoretical_time_s();
                let cycle_ratio = self.products[pid]
                    .actual_cycle_time()
                    .map(|t| t / theoretical)
                    .unwrap_or(Fixed64::from_num(0));
                self.events.emit(Event::ProductFinished { product: pid, cycle_ratio, tick: now });
                self.finalize_product(pid, now, true);
            }
            _ => unreachable!("validated at dispatch"),
        }
    }

    // -- AGV action completion -------------------------------------------------

    pub fn on_agv_action_done(&mut self, agv_id: AgvId, now: Fixed64, registry: &Registry, rng: &mut SimRng, scheduler: &mut Scheduler) -> Option<CommandResponse> {
        let kind = self.agvs[&agv_id].in_flight_kind();
        let command_id = self.in_flight_command_id.remove(&agv_id).flatten();
        let response_text = match kind {
            Some(ActionKind::Move) => {
                let agv = self.agvs.get_mut(&agv_id).expect("known AGV");
                let before_transport = agv.transport_seconds;
                let target = agv.finish_move(now);
                let seconds = self.agvs[&agv_id].transport_seconds - before_transport;
                self.events.emit(Event::AgvMoveCompleted { line: self.id, agv: agv_id, seconds, tick: now });
                if self.forced_charge_pending.remove(&agv_id) == Some(true) {
                    let agv = self.agvs.get_mut(&agv_id).expect("known AGV");
                    let duration = agv.start_charge(Fixed64::from_num(100), false, now);
                    self.events.emit(Event::AgvChargeStarted { line: self.id, agv: agv_id, proactive: false, tick: now });
                    scheduler.schedule_after(duration, Phase::Agv, WakeReason::AgvActionDone(self.id, agv_id));
                    None
                } else {
                    Some(format!("arrived at {target:?}"))
                }
            }
            Some(ActionKind::Load) => {
                let product = self.pending_load.remove(&agv_id).expect("load was dispatched");
                let label = product.label.clone();
                self.agvs.get_mut(&agv_id).expect("known AGV").finish_load(product);
                self.events.emit(Event::AgvTaskCompleted { line: self.id, agv: agv_id, tick: now });
                Some(format!("loaded {label}"))
            }
            Some(ActionKind::Unload) => {
                let product = self.agvs.get_mut(&agv_id).expect("known AGV").finish_unload();
                let label = product.label.clone();
                self.deliver_unloaded_product(agv_id, product, now);
                self.events.emit(Event::AgvTaskCompleted { line: self.id, agv: agv_id, tick: now });
                Some(format!("unloaded {label}"))
            }
            Some(ActionKind::Charge) => {
                let agv = self.agvs.get_mut(&agv_id).expect("known AGV");
                let before = agv.charge_seconds;
                agv.finish_charge(now);
                let seconds = self.agvs[&agv_id].charge_seconds - before;
                self.events.emit(Event::AgvChargeCompleted { line: self.id, agv: agv_id, seconds, tick: now });
                Some("charge complete".to_string())
            }
            None => None,
        };
        self.pump(now, registry, rng, scheduler);
        response_text.map(|message| CommandResponse::new(now, command_id, message))
    }
}

fn lane_for_agv(agv: AgvId) -> CqLane {
    match agv {
        AgvId::Agv1 => CqLane::Lower,
        AgvId::Agv2 => CqLane::Upper,
    }
}

fn downstream_station_kind(conveyor_id: StationaryDeviceId) -> Option<StationKind> {
    match conveyor_id {
        StationaryDeviceId::ConveyorAB => Some(StationKind::B),
        StationaryDeviceId::ConveyorBC => Some(StationKind::C),
        StationaryDeviceId::ConveyorCQ => None, // feeds quality, not a station
        other => panic!("{other:?} is not a conveyor"),
    }
}

fn station_id_device(line: LineId, id: StationaryDeviceId) -> DeviceId {
    DeviceId::Stationary(line, id)
}

fn device_id_kind(device: DeviceId) -> StationaryDeviceId {
    match device {
        DeviceId::Stationary(_, id) => id,
        DeviceId::Agv(..) => panic!("expected a stationary device"),
    }
}

fn summarize(product_types: &[ProductType]) -> Vec<OrderItem> {
    let mut items: Vec<OrderItem> = Vec::new();
    for &product_type in product_types {
        if let Some(item) = items.iter_mut().find(|i: &&mut OrderItem| i.product_type == product_type) {
            item.quantity += 1;
        } else {
            items.push(OrderItem { product_type, quantity: 1 });
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn setup() -> (Line, Registry, SimRng, Scheduler) {
        (Line::new(LineId::Line1), Registry::default(), SimRng::from_seed(7), Scheduler::new())
    }

    #[test]
    fn order_tick_spawns_products_into_raw_material() {
        let (mut line, _registry, mut rng, _scheduler) = setup();
        line.on_order_generator_tick(Fixed64::from_num(0), &mut rng);
        assert!(!line.raw_material.is_empty());
        assert_eq!(line.orders.len(), 1);
        let _ = line.events.drain();
    }

    #[test]
    fn load_from_raw_material_removes_it_and_fills_payload() {
        let (mut line, registry, mut rng, mut scheduler) = setup();
        line.on_order_generator_tick(Fixed64::from_num(0), &mut rng);
        let product_id = line.raw_material.available_ids()[0];
        let label = line.products[product_id].label.clone();

        let intent = Intent::Load { product_id: Some(label) };
        let result = line.execute_intent(AgvId::Agv1, intent, Fixed64::from_num(0), &registry, &mut scheduler);
        assert!(result.is_ok());
        assert!(line.pending_load.contains_key(&AgvId::Agv1));
        assert!(!scheduler.is_empty());
    }

    #[test]
    fn fault_on_agv_clears_pending_command_state() {
        let (mut line, _registry, _rng, mut scheduler) = setup();
        line.forced_charge_pending.insert(AgvId::Agv1, true);
        line.apply_fault(FaultTarget::Agv(AgvId::Agv1), Fixed64::from_num(10), Fixed64::from_num(0), &mut scheduler);
        assert!(!line.forced_charge_pending.contains_key(&AgvId::Agv1));
        assert!(line.agvs[&AgvId::Agv1].is_faulted());
    }
}
