//! Station device (§4.2).
//!
//! A station is route-agnostic: it pops the head of its input buffer,
//! processes for a (station-kind, product-type) sampled duration, and stages
//! the result in a single output slot. Routing decisions (where the output
//! goes next, including the Station-C first/second-pass split) are made by
//! [`crate::line::Line`], which sets [`crate::product::RouteStep`] before
//! handing a product to a station and reads it back after processing
//! completes.

use crate::device::DeviceStatus;
use crate::fixed::Fixed64;
use crate::id::{DeviceId, LineId, StationaryDeviceId};
use crate::product::Product;
use crate::registry::{Registry, StationKind, STATION_BUFFER_CAPACITY};
use crate::rng::SimRng;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct Station {
    pub line: LineId,
    pub id: StationaryDeviceId,
    pub kind: StationKind,
    pub status: DeviceStatus,
    pub input: VecDeque<Product>,
    pub output: Option<Product>,
    pub fault_until: Option<Fixed64>,
    pub work_seconds: Fixed64,
    in_progress_started_at: Option<Fixed64>,
    /// Total duration sampled for the item currently (or formerly, while
    /// faulted) in progress; needed to resume correctly after a fault clears.
    processing_total_s: Option<Fixed64>,
    /// Set while faulted mid-processing: seconds still owed when it clears.
    paused_remaining_s: Option<Fixed64>,
    /// The absolute time the currently scheduled `StationDone` wake-up is
    /// for, if any. A fault pause clears this without cancelling the
    /// already-scheduled wake-up (the scheduler has no cancellation), so
    /// `on_station_done` compares its `now` against this to tell a live
    /// completion from a stale one left over from before the fault.
    expected_completion_at: Option<Fixed64>,
}

impl Station {
    pub fn new(line: LineId, id: StationaryDeviceId, kind: StationKind) -> Self {
        Self {
            line,
            id,
            kind,
            status: DeviceStatus::Idle,
            input: VecDeque::new(),
            output: None,
            fault_until: None,
            work_seconds: Fixed64::from_num(0),
            in_progress_started_at: None,
            processing_total_s: None,
            paused_remaining_s: None,
            expected_completion_at: None,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        DeviceId::Stationary(self.line, self.id)
    }

    pub fn is_faulted(&self) -> bool {
        self.status == DeviceStatus::Fault
    }

    /// Admits `product` to the input buffer (§4.2 `try_enqueue`).
    pub fn try_enqueue(&mut self, product: Product) -> Result<(), Product> {
        if self.is_faulted() || self.input.len() >= STATION_BUFFER_CAPACITY {
            return Err(product);
        }
        self.input.push_back(product);
        Ok(())
    }

    pub fn is_ready_out(&self) -> bool {
        self.output.is_some()
    }

    pub fn peek_output(&self) -> Option<&Product> {
        self.output.as_ref()
    }

    pub fn take_output(&mut self) -> Option<Product> {
        self.output.take()
    }

    pub fn is_input_full(&self) -> bool {
        self.input.len() >= STATION_BUFFER_CAPACITY
    }

    /// Starts processing the head item if idle, output is clear, and there is
    /// work to do. Returns the sampled duration so the caller schedules the
    /// matching `StationDone` wake-up.
    pub fn maybe_start(&mut self, now: Fixed64, registry: &Registry, rng: &mut SimRng) -> Option<Fixed64> {
        if self.status != DeviceStatus::Idle || self.output.is_some() || self.input.is_empty() {
            return None;
        }
        let product_type = self.input.front().unwrap().product_type;
        let range = registry.processing_range(self.kind, product_type);
        let duration = rng.uniform_range_s(range.min_s, range.max_s);
        self.status = DeviceStatus::Processing;
        self.in_progress_started_at = Some(now);
        self.processing_total_s = Some(duration);
        self.expected_completion_at = Some(now + duration);
        Some(duration)
    }

    /// Whether a `StationDone` wake-up firing at `now` is the one currently
    /// expected, as opposed to a stale duplicate left over from before a
    /// fault pause (see `expected_completion_at`).
    pub fn is_completion_due(&self, now: Fixed64) -> bool {
        self.expected_completion_at == Some(now)
    }

    /// Completes processing of the head item on `StationDone`; moves it to
    /// the output slot and returns it so the caller can record the stage
    /// timestamp and decide the next route step.
    pub fn finish_processing(&mut self, now: Fixed64) -> Product {
        let mut product = self
            .input
            .pop_front()
            .expect("finish_processing with nothing in flight");
        if let Some(started) = self.in_progress_started_at.take() {
            self.work_seconds += now - started;
        }
        self.processing_total_s = None;
        self.expected_completion_at = None;
        self.status = DeviceStatus::Idle;
        product.mark_stage("left_station", now);
        self.output = Some(product.clone());
        product
    }

    /// Applies a fault (§4.6). If a process was in flight its remaining
    /// duration is frozen; returns that remainder so the caller can cancel
    /// the pending `StationDone` wake-up (it will be rescheduled on clear).
    pub fn apply_fault(&mut self, until: Fixed64, now: Fixed64) -> Option<Fixed64> {
        self.fault_until = Some(until);
        let remaining = if let Some(started) = self.in_progress_started_at.take() {
            self.work_seconds += now - started;
            let total = self.processing_total_s.unwrap_or(Fixed64::from_num(0));
            let remaining = total - (now - started);
            self.paused_remaining_s = Some(remaining);
            self.expected_completion_at = None;
            Some(remaining)
        } else {
            None
        };
        self.status = DeviceStatus::Fault;
        remaining
    }

    /// Clears a fault. Returns `Some(remaining_s)` if processing should
    /// resume for that many more seconds (caller reschedules `StationDone`),
    /// or `None` if the station was idle/empty (caller should call
    /// `maybe_start`).
    pub fn clear_fault(&mut self, now: Fixed64) -> Option<Fixed64> {
        self.fault_until = None;
        if let Some(remaining) = self.paused_remaining_s.take() {
            self.status = DeviceStatus::Processing;
            self.in_progress_started_at = Some(now);
            self.expected_completion_at = Some(now + remaining);
            Some(remaining)
        } else {
            self.status = DeviceStatus::Idle;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::OrderId;
    use crate::product::ProductType;
    use slotmap::SlotMap;

    fn make_product() -> Product {
        let mut sm: SlotMap<crate::id::ProductId, ()> = SlotMap::with_key();
        let id = sm.insert(());
        let mut osm: SlotMap<OrderId, ()> = SlotMap::with_key();
        let order = osm.insert(());
        Product::new(id, ProductType::P1, order, Fixed64::from_num(0))
    }

    #[test]
    fn enqueue_rejects_when_full() {
        let mut s = Station::new(LineId::Line1, StationaryDeviceId::StationA, StationKind::A);
        for _ in 0..STATION_BUFFER_CAPACITY {
            assert!(s.try_enqueue(make_product()).is_ok());
        }
        assert!(s.try_enqueue(make_product()).is_err());
    }

    #[test]
    fn fault_freezes_and_clear_resumes_remaining() {
        let registry = Registry::default();
        let mut rng = SimRng::from_seed(1);
        let mut s = Station::new(LineId::Line1, StationaryDeviceId::StationA, StationKind::A);
        s.try_enqueue(make_product()).unwrap();
        let duration = s.maybe_start(Fixed64::from_num(0), &registry, &mut rng).unwrap();

        let fault_at = duration / Fixed64::from_num(2);
        let remaining = s.apply_fault(fault_at + Fixed64::from_num(30), fault_at).unwrap();
        assert!(remaining > Fixed64::from_num(0));
        assert!(s.is_faulted());

        let resumed = s.clear_fault(fault_at + Fixed64::from_num(30));
        assert_eq!(resumed, Some(remaining));
        assert_eq!(s.status, DeviceStatus::Processing);
    }

    #[test]
    fn stale_completion_before_fault_pause_is_not_due() {
        let registry = Registry::default();
        let mut rng = SimRng::from_seed(1);
        let mut s = Station::new(LineId::Line1, StationaryDeviceId::StationA, StationKind::A);
        s.try_enqueue(make_product()).unwrap();
        let duration = s.maybe_start(Fixed64::from_num(0), &registry, &mut rng).unwrap();
        let original_completion = Fixed64::from_num(0) + duration;
        assert!(s.is_completion_due(original_completion));

        let fault_at = duration / Fixed64::from_num(2);
        s.apply_fault(fault_at + Fixed64::from_num(30), fault_at).unwrap();
        // The wake-up already scheduled for `original_completion` is now
        // stale: the caller must not finish the item if it fires.
        assert!(!s.is_completion_due(original_completion));

        let remaining = s.clear_fault(fault_at + Fixed64::from_num(30)).unwrap();
        let resumed_completion = fault_at + Fixed64::from_num(30) + remaining;
        assert!(s.is_completion_due(resumed_completion));
        assert!(!s.is_completion_due(original_completion));
    }
}
