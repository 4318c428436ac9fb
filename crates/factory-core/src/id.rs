use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a product flowing through a line. Products are created and
    /// destroyed over the course of a run, so they live in a slot map.
    pub struct ProductId;

    /// Identifies an order emitted by the order generator.
    pub struct OrderId;
}

/// Identifies one of the three concurrent production lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LineId {
    Line1,
    Line2,
    Line3,
}

impl LineId {
    pub const ALL: [LineId; 3] = [LineId::Line1, LineId::Line2, LineId::Line3];

    /// Topic-namespace spelling, e.g. `line1`.
    pub fn topic_name(self) -> &'static str {
        match self {
            LineId::Line1 => "line1",
            LineId::Line2 => "line2",
            LineId::Line3 => "line3",
        }
    }
}

/// Which AGV on a line: AGV_1 services the lower corridor, AGV_2 the upper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgvId {
    Agv1,
    Agv2,
}

impl AgvId {
    pub fn topic_name(self) -> &'static str {
        match self {
            AgvId::Agv1 => "agv_1",
            AgvId::Agv2 => "agv_2",
        }
    }
}

/// The fixed set of non-AGV devices every line instantiates. The topology is
/// identical across lines, so this is a closed enum rather than a graph of
/// user-editable nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StationaryDeviceId {
    RawMaterial,
    StationA,
    ConveyorAB,
    StationB,
    ConveyorBC,
    StationC,
    ConveyorCQ,
    QualityCheck,
    FinishedGoods,
}

impl StationaryDeviceId {
    pub fn topic_name(self) -> &'static str {
        match self {
            StationaryDeviceId::RawMaterial => "raw_material",
            StationaryDeviceId::StationA => "station_a",
            StationaryDeviceId::ConveyorAB => "conveyor_ab",
            StationaryDeviceId::StationB => "station_b",
            StationaryDeviceId::ConveyorBC => "conveyor_bc",
            StationaryDeviceId::StationC => "station_c",
            StationaryDeviceId::ConveyorCQ => "conveyor_cq",
            StationaryDeviceId::QualityCheck => "quality_check",
            StationaryDeviceId::FinishedGoods => "finished_goods",
        }
    }
}

/// A device identifier spanning every kind a line owns. Used by the
/// publisher surface, the KPI aggregator, and fault injection to refer to
/// "some device on some line" without caring which kind it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceId {
    Stationary(LineId, StationaryDeviceId),
    Agv(LineId, AgvId),
}

impl DeviceId {
    pub fn line(self) -> LineId {
        match self {
            DeviceId::Stationary(line, _) => line,
            DeviceId::Agv(line, _) => line,
        }
    }
}

/// Fixed path points an AGV can stop at, per §6.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathPoint {
    P0,
    P1,
    P2,
    P3,
    P4,
    P5,
    P6,
    P7,
    P8,
    P9,
    P10,
}

impl PathPoint {
    pub const ALL: [PathPoint; 11] = [
        PathPoint::P0,
        PathPoint::P1,
        PathPoint::P2,
        PathPoint::P3,
        PathPoint::P4,
        PathPoint::P5,
        PathPoint::P6,
        PathPoint::P7,
        PathPoint::P8,
        PathPoint::P9,
        PathPoint::P10,
    ];

    pub fn parse(s: &str) -> Option<PathPoint> {
        Some(match s {
            "P0" => PathPoint::P0,
            "P1" => PathPoint::P1,
            "P2" => PathPoint::P2,
            "P3" => PathPoint::P3,
            "P4" => PathPoint::P4,
            "P5" => PathPoint::P5,
            "P6" => PathPoint::P6,
            "P7" => PathPoint::P7,
            "P8" => PathPoint::P8,
            "P9" => PathPoint::P9,
            "P10" => PathPoint::P10,
            _ => return None,
        })
    }
}
