//! Immutable timing/energy/geometry tables, frozen at startup.
//!
//! Mirrors the role of a building/recipe registry in a tick-based factory
//! engine: every number a device needs to run is looked up here rather than
//! hard-coded at the call site, so `SimConfig` can override defaults in one
//! place.

use crate::fixed::Fixed64;
use crate::id::{AgvId, PathPoint, StationaryDeviceId};
use crate::product::ProductType;
use serde::{Deserialize, Serialize};

/// An inclusive uniform sampling range, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeRange {
    pub min_s: f64,
    pub max_s: f64,
}

impl TimeRange {
    pub const fn new(min_s: f64, max_s: f64) -> Self {
        Self { min_s, max_s }
    }

    pub fn midpoint(self) -> Fixed64 {
        Fixed64::from_num((self.min_s + self.max_s) / 2.0)
    }
}

/// Which station in the fixed A→B→C topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StationKind {
    A,
    B,
    C,
}

/// Processing-time ranges per (station, product type), §4.2/§6.
fn base_processing_range(station: StationKind, product_type: ProductType) -> TimeRange {
    use ProductType::*;
    use StationKind::*;
    match (station, product_type) {
        (A, P1) => TimeRange::new(25.0, 35.0),
        (A, P2) => TimeRange::new(30.0, 40.0),
        (A, P3) => TimeRange::new(35.0, 45.0),
        (B, P1) => TimeRange::new(20.0, 30.0),
        (B, P2) => TimeRange::new(25.0, 35.0),
        (B, P3) => TimeRange::new(30.0, 40.0),
        (C, P1) => TimeRange::new(15.0, 25.0),
        (C, P2) => TimeRange::new(20.0, 30.0),
        (C, P3) => TimeRange::new(25.0, 35.0),
    }
}

/// Quality-check processing-time range, independent of product type.
pub const QUALITY_CHECK_RANGE: TimeRange = TimeRange::new(10.0, 20.0);

/// Nominal conveyor transfer delay, §3/§4.3.
pub const CONVEYOR_TRANSFER_DELAY_S: f64 = 20.0;

/// Capacity shared by every station input buffer and every conveyor, §3.
pub const STATION_BUFFER_CAPACITY: usize = 3;
pub const CONVEYOR_CAPACITY: usize = 3;
pub const AGV_PAYLOAD_CAPACITY: usize = 2;
pub const QUALITY_BUFFER_CAPACITY: usize = 2;

/// Per-meter/flat energy costs and charge rate, §4.4.
pub const MOVE_ENERGY_PCT_PER_METER: f64 = 0.1;
pub const LOAD_UNLOAD_ENERGY_PCT: f64 = 0.5;
/// Nominal duration of a load/unload action; the spec gives no range for
/// this (only an energy cost), so a short flat duration is used uniformly.
pub const LOAD_UNLOAD_DURATION_S: f64 = 5.0;
pub const CHARGE_RATE_PCT_PER_SEC: f64 = 3.33;
pub const FORCED_CHARGE_THRESHOLD_PCT: f64 = 5.0;
pub const DEFAULT_CHARGE_TARGET_PCT: f64 = 80.0;

/// Scrap / rework cost factor (§4.5).
pub const SCRAP_COST_FACTOR: f64 = 0.8;
/// Maintenance cost charged per fault (§4.6).
pub const MAINTENANCE_COST_PER_FAULT: f64 = 8.0;
/// Energy cost rate charged against running stations/conveyors (§4.9).
pub const DEVICE_ENERGY_COST_PER_SEC: f64 = 0.1;

/// A registry of all tunable timing/energy/geometry facts, constructible
/// from defaults and overridable field-by-field from `SimConfig` (§4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    pub agv_speed_mps: f64,
    pub fault_duration_range_s: TimeRange,
    /// How often the fault injector re-rolls whether to strike a device.
    pub fault_interval_range_s: TimeRange,
    pub order_interval_range_s: TimeRange,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            agv_speed_mps: 2.0,
            fault_duration_range_s: TimeRange::new(10.0, 30.0),
            fault_interval_range_s: TimeRange::new(45.0, 90.0),
            order_interval_range_s: TimeRange::new(30.0, 60.0),
        }
    }
}

impl Registry {
    pub fn processing_range(&self, station: StationKind, product_type: ProductType) -> TimeRange {
        base_processing_range(station, product_type)
    }

    pub fn move_duration_s(&self, distance_m: f64) -> f64 {
        distance_m / self.agv_speed_mps
    }
}

/// Nominal (x, y) coordinates for a path point, per AGV corridor (§6.2).
pub fn path_point_coords(point: PathPoint, agv: AgvId) -> (f64, f64) {
    let lower = agv == AgvId::Agv1;
    match point {
        PathPoint::P0 => (5.0, if lower { 15.0 } else { 25.0 }),
        PathPoint::P1 => (12.0, if lower { 15.0 } else { 25.0 }),
        PathPoint::P2 => (25.0, if lower { 15.0 } else { 25.0 }),
        PathPoint::P3 => (32.0, if lower { 15.0 } else { 25.0 }),
        PathPoint::P4 => (45.0, if lower { 15.0 } else { 25.0 }),
        PathPoint::P5 => (52.0, if lower { 15.0 } else { 25.0 }),
        PathPoint::P6 => (65.0, if lower { 10.0 } else { 25.0 }),
        PathPoint::P7 => (72.0, if lower { 15.0 } else { 25.0 }),
        PathPoint::P8 => (80.0, if lower { 15.0 } else { 25.0 }),
        PathPoint::P9 => (95.0, if lower { 15.0 } else { 25.0 }),
        PathPoint::P10 => (10.0, if lower { 10.0 } else { 30.0 }),
    }
}

pub fn straight_line_distance_m(a: PathPoint, b: PathPoint, agv: AgvId) -> f64 {
    let (ax, ay) = path_point_coords(a, agv);
    let (bx, by) = path_point_coords(b, agv);
    ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt()
}

/// Which stationary device, if any, sits at a given path point.
pub fn device_at_point(point: PathPoint) -> Option<StationaryDeviceId> {
    use StationaryDeviceId::*;
    Some(match point {
        PathPoint::P0 => RawMaterial,
        PathPoint::P1 => StationA,
        PathPoint::P2 => ConveyorAB,
        PathPoint::P3 => StationB,
        PathPoint::P4 => ConveyorBC,
        PathPoint::P5 => StationC,
        PathPoint::P6 => ConveyorCQ,
        PathPoint::P7 => QualityCheck,
        PathPoint::P8 => QualityCheck, // quality output, same device
        PathPoint::P9 => FinishedGoods,
        PathPoint::P10 => return None, // charging point, not a production device
    })
}

/// Corridor compatibility, §4.4/§8 invariant 5.
///
/// Both AGVs may travel to and dock at any path point (§6.2 gives each AGV
/// its own coordinate row, i.e. a parallel lane to every point) and may
/// `load`/`unload` at any ordinary device. The one place corridor exclusivity
/// is physically real is line 3's conveyor CQ, which has two genuinely
/// separate named sub-buffers: only AGV_1 may touch the `lower` sub-buffer,
/// only AGV_2 the `upper` one. That is the concrete meaning this
/// implementation gives to "AGV_1 services the lower side, AGV_2 the upper
/// side" (the source PRD's two conflicting responsibility tables are not
/// otherwise reconcilable; see DESIGN.md).
pub fn agv_may_access_cq_lane(agv: AgvId, lane: CqLane) -> bool {
    matches!(
        (agv, lane),
        (AgvId::Agv1, CqLane::Lower) | (AgvId::Agv2, CqLane::Upper)
    )
}

/// Which sub-buffer of line 3's conveyor CQ, §3/§8 invariant 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CqLane {
    Upper,
    Lower,
}
