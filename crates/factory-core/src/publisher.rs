//! Publisher/CommandSource trait boundary and dirty-tracked debouncing
//! (§4.10, §6.1, §9 "dirty tracking").
//!
//! The real MQTT client is an external collaborator; this module owns the
//! trait contract plus an in-memory reference implementation used by tests
//! and `--no-mqtt` runs.

use crate::command::{Command, CommandResponse};
use crate::device::DeviceStatus;
use crate::fixed::Fixed64;
use crate::id::{AgvId, DeviceId, LineId, OrderId};
use crate::kpi::ScoreBreakdown;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// A serialized device snapshot (§6.1 `.../status` rows). `detail` carries
/// the kind-specific fields (buffer contents, battery, ...) as JSON, since
/// the wire payload is owned by the external schema validator, not this
/// crate (§1 ambient-stack boundary).
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub device: DeviceId,
    pub status: DeviceStatus,
    pub tick: Fixed64,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertKind {
    Fault,
    LowBattery,
    BufferFull,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub line: LineId,
    pub kind: AlertKind,
    pub message: String,
    pub tick: Fixed64,
}

#[derive(Debug, Clone, Serialize)]
pub enum OrderEvent {
    Created { order: OrderId, tick: Fixed64 },
    Completed { order: OrderId, on_time: bool, tick: Fixed64 },
}

/// One method per outbound topic row in §6.1.
pub trait Publisher {
    fn publish_device_status(&mut self, snapshot: DeviceSnapshot);
    fn publish_alert(&mut self, alert: Alert);
    fn publish_order_event(&mut self, event: OrderEvent);
    fn publish_kpi_snapshot(&mut self, tick: Fixed64, snapshot: ScoreBreakdown);
    fn publish_result(&mut self, tick: Fixed64, snapshot: ScoreBreakdown);
    fn publish_response(&mut self, line: LineId, response: CommandResponse);
}

/// One method per inbound row in §6.1 (only `ROOT/command/{L}`).
pub trait CommandSource {
    fn poll_commands(&mut self, line: LineId) -> Vec<Command>;
}

/// Per-device dirty bookkeeping plus the last-published timestamp needed to
/// enforce the ≥ `snapshot_debounce_ms` rule (§4.10), generalizing the
/// teacher engine's per-node/per-edge [`crate::device`] dirty partitions to
/// this crate's three stationary device kinds plus AGVs.
#[derive(Debug, Clone, Default)]
pub struct DirtyTracker {
    dirty: BTreeSet<DeviceId>,
    last_published: HashMap<DeviceId, Fixed64>,
    orders_dirty: bool,
    kpi_due_at: Option<Fixed64>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_device(&mut self, device: DeviceId) {
        self.dirty.insert(device);
    }

    pub fn mark_orders(&mut self) {
        self.orders_dirty = true;
    }

    pub fn take_orders_dirty(&mut self) -> bool {
        std::mem::take(&mut self.orders_dirty)
    }

    /// Drains devices that are both dirty and outside their debounce window,
    /// marking them as just-published.
    pub fn take_due(&mut self, now: Fixed64, debounce: Fixed64) -> Vec<DeviceId> {
        let candidates: Vec<DeviceId> = self.dirty.iter().copied().collect();
        let mut due = Vec::new();
        for device in candidates {
            let ready = match self.last_published.get(&device) {
                Some(last) => now - *last >= debounce,
                None => true,
            };
            if ready {
                self.dirty.remove(&device);
                self.last_published.insert(device, now);
                due.push(device);
            }
        }
        due
    }

    /// Forces every device in `all` to be treated as just-published,
    /// regardless of dirty state (heartbeat, §4.10).
    pub fn force_all(&mut self, all: &[DeviceId], now: Fixed64) -> Vec<DeviceId> {
        for device in all {
            self.dirty.remove(device);
            self.last_published.insert(*device, now);
        }
        all.to_vec()
    }
}

/// In-memory, non-blocking reference implementation of both traits. Used by
/// `--no-mqtt` runs and the test suite; a real MQTT client is wired in
/// externally against the same two traits.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    pub device_snapshots: Vec<DeviceSnapshot>,
    pub alerts: Vec<Alert>,
    pub order_events: Vec<OrderEvent>,
    pub kpi_snapshots: Vec<(Fixed64, ScoreBreakdown)>,
    pub results: Vec<(Fixed64, ScoreBreakdown)>,
    pub responses: Vec<(LineId, CommandResponse)>,
    pending_commands: HashMap<LineId, VecDeque<Command>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/console helper: enqueues a command as if it arrived over the bus.
    pub fn submit_command(&mut self, line: LineId, command: Command) {
        self.pending_commands.entry(line).or_default().push_back(command);
    }

    pub fn submit_for_agv(&mut self, line: LineId, _agv: AgvId, command: Command) {
        self.submit_command(line, command);
    }
}

impl Publisher for InMemoryBus {
    fn publish_device_status(&mut self, snapshot: DeviceSnapshot) {
        self.device_snapshots.push(snapshot);
    }

    fn publish_alert(&mut self, alert: Alert) {
        self.alerts.push(alert);
    }

    fn publish_order_event(&mut self, event: OrderEvent) {
        self.order_events.push(event);
    }

    fn publish_kpi_snapshot(&mut self, tick: Fixed64, snapshot: ScoreBreakdown) {
        self.kpi_snapshots.push((tick, snapshot));
    }

    fn publish_result(&mut self, tick: Fixed64, snapshot: ScoreBreakdown) {
        self.results.push((tick, snapshot));
    }

    fn publish_response(&mut self, line: LineId, response: CommandResponse) {
        self.responses.push((line, response));
    }
}

impl CommandSource for InMemoryBus {
    fn poll_commands(&mut self, line: LineId) -> Vec<Command> {
        self.pending_commands
            .get_mut(&line)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::StationaryDeviceId;

    #[test]
    fn debounce_suppresses_rapid_repeat() {
        let mut tracker = DirtyTracker::new();
        let device = DeviceId::Stationary(LineId::Line1, StationaryDeviceId::StationA);
        tracker.mark_device(device);
        let due = tracker.take_due(Fixed64::from_num(0), Fixed64::from_num(0.5));
        assert_eq!(due, vec![device]);

        tracker.mark_device(device);
        let due_again = tracker.take_due(Fixed64::from_num(0.1), Fixed64::from_num(0.5));
        assert!(due_again.is_empty());

        tracker.mark_device(device);
        let due_later = tracker.take_due(Fixed64::from_num(0.6), Fixed64::from_num(0.5));
        assert_eq!(due_later, vec![device]);
    }

    #[test]
    fn in_memory_bus_round_trips_commands() {
        use crate::command::{Command, CommandAction, CommandParams};
        let mut bus = InMemoryBus::new();
        bus.submit_command(
            LineId::Line1,
            Command {
                command_id: Some("x".to_string()),
                action: CommandAction::GetResult,
                target: None,
                params: CommandParams::default(),
            },
        );
        let drained = bus.poll_commands(LineId::Line1);
        assert_eq!(drained.len(), 1);
        assert!(bus.poll_commands(LineId::Line1).is_empty());
    }
}
