//! Conveyor device (§4.3).
//!
//! FIFO, fixed transfer delay, capacity-bounded. Line 3's Station-C→Quality
//! conveyor additionally carries two named sub-buffers (`upper`/`lower`) used
//! to stage P3 products awaiting their second pass through Stations B and C
//! (§3) — every other conveyor instance leaves `cq_lanes` as `None`.

use crate::device::DeviceStatus;
use crate::fixed::Fixed64;
use crate::id::{DeviceId, LineId, StationaryDeviceId};
use crate::product::Product;
use crate::registry::{CqLane, CONVEYOR_CAPACITY, CONVEYOR_TRANSFER_DELAY_S};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
struct ConveyorItem {
    product: Product,
    arrives_at: Fixed64,
}

#[derive(Debug, Clone, Default)]
struct CqLanes {
    upper: Option<Product>,
    lower: Option<Product>,
}

#[derive(Debug, Clone)]
pub struct Conveyor {
    pub line: LineId,
    pub id: StationaryDeviceId,
    pub status: DeviceStatus,
    in_transit: VecDeque<ConveyorItem>,
    pub fault_until: Option<Fixed64>,
    fault_started_at: Option<Fixed64>,
    pub work_seconds: Fixed64,
    /// When the belt last went from empty to carrying at least one item; a
    /// conveyor has no single in-flight slot like a station, so "busy" means
    /// "non-empty" and `work_seconds` accumulates per busy session the same
    /// way `Station::work_seconds` does per processing session.
    busy_started_at: Option<Fixed64>,
    cq_lanes: Option<CqLanes>,
}

impl Conveyor {
    pub fn new(line: LineId, id: StationaryDeviceId) -> Self {
        Self {
            line,
            id,
            status: DeviceStatus::Idle,
            in_transit: VecDeque::new(),
            fault_until: None,
            fault_started_at: None,
            work_seconds: Fixed64::from_num(0),
            busy_started_at: None,
            cq_lanes: None,
        }
    }

    /// Line 3's `ConveyorCQ` instance carries the P3 holding sub-buffers.
    pub fn with_cq_lanes(line: LineId, id: StationaryDeviceId) -> Self {
        Self {
            cq_lanes: Some(CqLanes::default()),
            ..Self::new(line, id)
        }
    }

    pub fn device_id(&self) -> DeviceId {
        DeviceId::Stationary(self.line, self.id)
    }

    pub fn is_faulted(&self) -> bool {
        self.status == DeviceStatus::Fault
    }

    pub fn is_full(&self) -> bool {
        self.in_transit.len() >= CONVEYOR_CAPACITY
    }

    /// Admits `product`, returning its scheduled arrival time on success.
    pub fn try_push(&mut self, product: Product, now: Fixed64) -> Result<Fixed64, Product> {
        if self.is_faulted() || self.is_full() {
            return Err(product);
        }
        if self.in_transit.is_empty() {
            self.busy_started_at = Some(now);
        }
        let arrives_at = now + Fixed64::from_num(CONVEYOR_TRANSFER_DELAY_S);
        self.in_transit.push_back(ConveyorItem { product, arrives_at });
        self.status = DeviceStatus::Processing;
        Ok(arrives_at)
    }

    pub fn head_ready(&self, now: Fixed64) -> bool {
        !self.is_faulted()
            && self
                .in_transit
                .front()
                .is_some_and(|item| item.arrives_at <= now)
    }

    /// Attempts to hand the head item to the downstream buffer. The caller
    /// supplies whether downstream has room; on backpressure the conveyor
    /// goes `BLOCKED` and the item stays put (§4.3).
    pub fn try_release_head(&mut self, now: Fixed64, downstream_has_room: bool) -> Option<Product> {
        if !self.head_ready(now) {
            return None;
        }
        if !downstream_has_room {
            self.status = DeviceStatus::Blocked;
            return None;
        }
        let item = self.in_transit.pop_front().expect("head_ready implies non-empty");
        self.status = if self.in_transit.is_empty() {
            if let Some(started) = self.busy_started_at.take() {
                self.work_seconds += now - started;
            }
            DeviceStatus::Idle
        } else {
            DeviceStatus::Processing
        };
        Some(item.product)
    }

    pub fn apply_fault(&mut self, until: Fixed64, now: Fixed64) {
        self.fault_until = Some(until);
        self.fault_started_at = Some(now);
        if let Some(started) = self.busy_started_at.take() {
            self.work_seconds += now - started;
        }
        self.status = DeviceStatus::Fault;
    }

    /// Clears a fault, shifting every in-flight item's arrival by the fault's
    /// duration so motion resumes exactly where it was frozen (§4.3/§4.6).
    pub fn clear_fault(&mut self, now: Fixed64) {
        if let Some(started) = self.fault_started_at.take() {
            let elapsed = now - started;
            for item in self.in_transit.iter_mut() {
                item.arrives_at += elapsed;
            }
        }
        self.fault_until = None;
        self.status = if self.in_transit.is_empty() {
            DeviceStatus::Idle
        } else {
            self.busy_started_at = Some(now);
            DeviceStatus::Processing
        };
    }

    // -- Line-3 CQ P3 holding lanes (§3, §8 invariant 7) --------------------

    pub fn lane_occupied(&self, lane: CqLane) -> bool {
        self.cq_lanes
            .as_ref()
            .is_some_and(|lanes| match lane {
                CqLane::Upper => lanes.upper.is_some(),
                CqLane::Lower => lanes.lower.is_some(),
            })
    }

    pub fn push_holding_lane(&mut self, lane: CqLane, product: Product) -> Result<(), Product> {
        let Some(lanes) = self.cq_lanes.as_mut() else {
            return Err(product);
        };
        let slot = match lane {
            CqLane::Upper => &mut lanes.upper,
            CqLane::Lower => &mut lanes.lower,
        };
        if slot.is_some() {
            return Err(product);
        }
        *slot = Some(product);
        Ok(())
    }

    pub fn take_holding_lane(&mut self, lane: CqLane) -> Option<Product> {
        self.cq_lanes.as_mut().and_then(|lanes| match lane {
            CqLane::Upper => lanes.upper.take(),
            CqLane::Lower => lanes.lower.take(),
        })
    }

    // -- Introspection for invariant checks (§8) --------------------------

    pub fn len(&self) -> usize {
        self.in_transit.len()
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> + '_ {
        self.in_transit.iter().map(|item| &item.product)
    }

    pub fn holding_lane_product(&self, lane: CqLane) -> Option<&Product> {
        self.cq_lanes.as_ref().and_then(|lanes| match lane {
            CqLane::Upper => lanes.upper.as_ref(),
            CqLane::Lower => lanes.lower.as_ref(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{OrderId, ProductId};
    use crate::product::ProductType;
    use slotmap::SlotMap;

    fn make_product() -> Product {
        let mut sm: SlotMap<ProductId, ()> = SlotMap::with_key();
        let id = sm.insert(());
        let mut osm: SlotMap<OrderId, ()> = SlotMap::with_key();
        let order = osm.insert(());
        Product::new(id, ProductType::P1, order, Fixed64::from_num(0))
    }

    #[test]
    fn push_rejects_when_full() {
        let mut c = Conveyor::new(LineId::Line1, StationaryDeviceId::ConveyorAB);
        for _ in 0..CONVEYOR_CAPACITY {
            assert!(c.try_push(make_product(), Fixed64::from_num(0)).is_ok());
        }
        assert!(c.try_push(make_product(), Fixed64::from_num(0)).is_err());
    }

    #[test]
    fn blocks_when_downstream_full() {
        let mut c = Conveyor::new(LineId::Line1, StationaryDeviceId::ConveyorAB);
        let arrives = c.try_push(make_product(), Fixed64::from_num(0)).unwrap();
        assert!(c.try_release_head(arrives, false).is_none());
        assert_eq!(c.status, DeviceStatus::Blocked);
        let product = c.try_release_head(arrives, true);
        assert!(product.is_some());
    }

    #[test]
    fn work_seconds_accumulate_per_busy_session() {
        let mut c = Conveyor::new(LineId::Line1, StationaryDeviceId::ConveyorAB);
        let arrives = c.try_push(make_product(), Fixed64::from_num(0)).unwrap();
        assert_eq!(c.work_seconds, Fixed64::from_num(0));
        assert!(c.try_release_head(arrives, true).is_some());
        assert_eq!(c.work_seconds, arrives);
        assert_eq!(c.status, DeviceStatus::Idle);
    }

    #[test]
    fn fault_mid_transit_excludes_fault_time_from_work_seconds() {
        let mut c = Conveyor::new(LineId::Line1, StationaryDeviceId::ConveyorAB);
        let arrives = c.try_push(make_product(), Fixed64::from_num(0)).unwrap();
        let fault_at = arrives / Fixed64::from_num(2);
        c.apply_fault(fault_at + Fixed64::from_num(10), fault_at);
        assert_eq!(c.work_seconds, fault_at);
        c.clear_fault(fault_at + Fixed64::from_num(10));
        let resumed_arrival = arrives + Fixed64::from_num(10);
        assert!(c.try_release_head(resumed_arrival, true).is_some());
        assert_eq!(c.work_seconds, fault_at + (resumed_arrival - (fault_at + Fixed64::from_num(10))));
    }

    #[test]
    fn fault_shifts_pending_arrival() {
        let mut c = Conveyor::new(LineId::Line1, StationaryDeviceId::ConveyorAB);
        let arrives = c.try_push(make_product(), Fixed64::from_num(0)).unwrap();
        c.apply_fault(Fixed64::from_num(5), Fixed64::from_num(1));
        c.clear_fault(Fixed64::from_num(31));
        assert!(!c.head_ready(arrives));
        assert!(c.head_ready(arrives + Fixed64::from_num(30)));
    }

    #[test]
    fn cq_lanes_only_on_dedicated_instance() {
        let mut plain = Conveyor::new(LineId::Line3, StationaryDeviceId::ConveyorCQ);
        assert!(plain.push_holding_lane(CqLane::Upper, make_product()).is_err());

        let mut cq = Conveyor::with_cq_lanes(LineId::Line3, StationaryDeviceId::ConveyorCQ);
        assert!(cq.push_holding_lane(CqLane::Upper, make_product()).is_ok());
        assert!(cq.lane_occupied(CqLane::Upper));
        assert!(cq.push_holding_lane(CqLane::Upper, make_product()).is_err());
        assert!(cq.take_holding_lane(CqLane::Upper).is_some());
        assert!(!cq.lane_occupied(CqLane::Upper));
    }
}
