//! Status shared by every device kind (§3).
//!
//! A line is a tagged variant of station/conveyor/warehouse/AGV/quality-check
//! (§9 "heterogeneous device collection") rather than a trait-object
//! hierarchy; this is the common field every variant carries.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Idle,
    Processing,
    Moving,
    Charging,
    Fault,
    Blocked,
}
