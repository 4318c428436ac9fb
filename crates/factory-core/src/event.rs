//! Simulation events, published by every subsystem and consumed by the KPI
//! aggregator and the publisher surface.
//!
//! Unlike a UI-facing event bus with per-type ring buffers, the KPI
//! aggregator and publisher here are the only two consumers and both need
//! every event, so a single `Vec<Event>` drained once per scheduler phase is
//! sufficient — no subscription registry is needed.

use crate::fixed::Fixed64;
use crate::id::{AgvId, DeviceId, LineId, OrderId, ProductId};
use crate::product::ProductType;
use crate::registry::CqLane;

/// Why a device is stalled/faulted, surfaced in alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultReason {
    InjectedFault,
}

/// A single simulation event. All events carry the tick (sim time) at which
/// they occurred.
#[derive(Debug, Clone)]
pub enum Event {
    OrderCreated {
        order: OrderId,
        tick: Fixed64,
    },
    OrderCompleted {
        order: OrderId,
        on_time: bool,
        tick: Fixed64,
    },
    ProductCreated {
        product: ProductId,
        product_type: ProductType,
        line: LineId,
        tick: Fixed64,
    },
    ProductEnteredDevice {
        product: ProductId,
        device: DeviceId,
        tick: Fixed64,
    },
    ProductLeftDevice {
        product: ProductId,
        device: DeviceId,
        tick: Fixed64,
    },
    QualityPassed {
        product: ProductId,
        tick: Fixed64,
    },
    QualityFailed {
        product: ProductId,
        attempts: u8,
        tick: Fixed64,
    },
    ProductScrapped {
        product: ProductId,
        scrap_cost: Fixed64,
        tick: Fixed64,
    },
    ProductFinished {
        product: ProductId,
        /// `actual_cycle_time / theoretical_time`, for the KPI cycle metric.
        cycle_ratio: Fixed64,
        tick: Fixed64,
    },
    MaterialPickedUp {
        product: ProductId,
        cost: Fixed64,
        tick: Fixed64,
    },
    DeviceFaulted {
        device: DeviceId,
        reason: FaultReason,
        until: Fixed64,
        tick: Fixed64,
    },
    DeviceFaultCleared {
        device: DeviceId,
        tick: Fixed64,
    },
    DeviceWorking {
        device: DeviceId,
        seconds: Fixed64,
        tick: Fixed64,
    },
    AgvMoveStarted {
        line: LineId,
        agv: AgvId,
        tick: Fixed64,
    },
    AgvMoveCompleted {
        line: LineId,
        agv: AgvId,
        seconds: Fixed64,
        tick: Fixed64,
    },
    AgvChargeStarted {
        line: LineId,
        agv: AgvId,
        proactive: bool,
        tick: Fixed64,
    },
    AgvChargeCompleted {
        line: LineId,
        agv: AgvId,
        seconds: Fixed64,
        tick: Fixed64,
    },
    AgvTaskCompleted {
        line: LineId,
        agv: AgvId,
        tick: Fixed64,
    },
    CqLaneOccupied {
        line: LineId,
        lane: CqLane,
        product: ProductId,
        tick: Fixed64,
    },
    CommandRejected {
        line: LineId,
        reason: String,
        tick: Fixed64,
    },
}

/// Accumulates events emitted during a scheduler phase. Drained by the
/// publisher and KPI aggregator at the end of each processed instant.
#[derive(Debug, Default)]
pub struct EventBus {
    buffered: Vec<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: Event) {
        self.buffered.push(event);
    }

    /// Drain and return every event buffered since the last drain.
    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.buffered)
    }

    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty()
    }
}
