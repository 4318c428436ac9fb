//! KPI aggregator (§4.9).
//!
//! Consumes the event stream only — per the ownership rule in §3, it never
//! holds a direct handle to a device or product, only derived counters and
//! the minimal per-product bookkeeping (which products have ever failed
//! quality) needed to classify later events.

use crate::event::Event;
use crate::fixed::Fixed64;
use crate::id::ProductId;
use crate::registry::{DEVICE_ENERGY_COST_PER_SEC, MAINTENANCE_COST_PER_FAULT};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct KpiAggregator {
    pub orders_total: u32,
    pub orders_completed: u32,
    pub orders_on_time: u32,

    pub products_total: u32,
    pub products_completed: u32,
    pub products_in_flight: u32,
    pub products_scrapped: u32,
    pub quality_checks_total: u32,
    pub first_pass_count: u32,
    cycle_ratio_sum: Fixed64,

    pub device_work_seconds: Fixed64,
    pub device_total_seconds: Fixed64,

    pub agv_transport_seconds: Fixed64,
    pub agv_charge_seconds: Fixed64,
    pub agv_fault_seconds: Fixed64,
    pub agv_proactive_charges: u32,
    pub agv_passive_charges: u32,
    pub agv_completed_tasks: u32,

    pub material_cost: Fixed64,
    pub energy_cost: Fixed64,
    pub maintenance_cost: Fixed64,
    pub scrap_cost: Fixed64,

    ever_failed_quality: HashSet<ProductId>,
}

/// The eight scored sub-metrics plus the final weighted total (§4.9).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub order_completion_rate: Fixed64,
    pub average_production_cycle: Fixed64,
    pub device_utilization: Fixed64,
    pub first_pass_rate: Fixed64,
    pub cost_efficiency: Fixed64,
    pub charge_strategy_efficiency: Fixed64,
    pub agv_energy_efficiency: Fixed64,
    pub agv_utilization: Fixed64,
    pub total_score: Fixed64,
}

impl KpiAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in every event drained from a line's [`crate::event::EventBus`]
    /// this phase.
    pub fn record_event(&mut self, event: &Event) {
        match event {
            Event::OrderCreated { .. } => self.orders_total += 1,
            Event::OrderCompleted { on_time, .. } => {
                self.orders_completed += 1;
                if *on_time {
                    self.orders_on_time += 1;
                }
            }
            Event::ProductCreated { .. } => {
                self.products_total += 1;
                self.products_in_flight += 1;
            }
            Event::ProductFinished { product, cycle_ratio, .. } => {
                self.products_completed += 1;
                self.products_in_flight = self.products_in_flight.saturating_sub(1);
                self.cycle_ratio_sum += *cycle_ratio;
                let _ = product;
            }
            Event::ProductScrapped { product, scrap_cost, .. } => {
                self.products_scrapped += 1;
                self.products_in_flight = self.products_in_flight.saturating_sub(1);
                self.scrap_cost += *scrap_cost;
                self.ever_failed_quality.remove(product);
            }
            Event::QualityPassed { product, .. } => {
                self.quality_checks_total += 1;
                if !self.ever_failed_quality.contains(product) {
                    self.first_pass_count += 1;
                }
            }
            Event::QualityFailed { product, .. } => {
                self.quality_checks_total += 1;
                self.ever_failed_quality.insert(*product);
            }
            Event::MaterialPickedUp { cost, .. } => self.material_cost += *cost,
            Event::DeviceWorking { seconds, .. } => {
                self.device_work_seconds += *seconds;
                self.energy_cost += *seconds * Fixed64::from_num(DEVICE_ENERGY_COST_PER_SEC);
            }
            Event::DeviceFaulted { .. } => self.maintenance_cost += Fixed64::from_num(MAINTENANCE_COST_PER_FAULT),
            Event::AgvMoveCompleted { seconds, .. } => self.agv_transport_seconds += *seconds,
            Event::AgvChargeCompleted {
                seconds, ..
            } => {
                self.agv_charge_seconds += *seconds;
            }
            Event::AgvChargeStarted { proactive, .. } => {
                if *proactive {
                    self.agv_proactive_charges += 1;
                } else {
                    self.agv_passive_charges += 1;
                }
            }
            Event::AgvTaskCompleted { .. } => self.agv_completed_tasks += 1,
            _ => {}
        }
    }

    /// Computes every derived metric and the final score as of `now`.
    /// `device_count` is the number of stations+conveyors+quality checkers
    /// across all running lines and `agv_count` is the number of AGVs across
    /// all running lines (KPI totals are plant-wide, not per-line): both
    /// `device_work_seconds` and `agv_transport_seconds` are sums across
    /// every device/AGV in the plant, so their utilization denominators must
    /// scale by the same count or the ratio saturates past 100% the moment
    /// more than one device/AGV is busy at once.
    pub fn compute(&self, now: Fixed64, device_count: u32, agv_count: u32) -> ScoreBreakdown {
        let zero = Fixed64::from_num(0);
        let hundred = Fixed64::from_num(100);

        let order_completion_rate = if self.orders_total == 0 {
            zero
        } else {
            Fixed64::from_num(self.orders_on_time) / Fixed64::from_num(self.orders_total) * hundred
        };

        let average_production_cycle = if self.products_completed == 0 {
            zero
        } else {
            let base = self.cycle_ratio_sum / Fixed64::from_num(self.products_completed);
            let denom = self.products_completed + self.products_in_flight;
            let completion_share = Fixed64::from_num(self.products_completed) / Fixed64::from_num(denom);
            base / completion_share
        };

        let device_total_seconds = now * Fixed64::from_num(device_count);
        let device_utilization = if device_total_seconds == zero {
            zero
        } else {
            self.device_work_seconds / device_total_seconds * hundred
        };

        let first_pass_rate = if self.quality_checks_total == 0 {
            zero
        } else {
            Fixed64::from_num(self.first_pass_count) / Fixed64::from_num(self.quality_checks_total) * hundred
        };

        let total_cost = self.material_cost + self.energy_cost + self.maintenance_cost + self.scrap_cost;
        let cost_efficiency = if total_cost == zero {
            hundred
        } else {
            let baseline = Fixed64::from_num(self.products_completed) * Fixed64::from_num(15);
            (baseline / total_cost * hundred).min(hundred)
        };

        let total_charges = self.agv_proactive_charges + self.agv_passive_charges;
        let charge_strategy_efficiency = if total_charges == 0 {
            zero
        } else {
            Fixed64::from_num(self.agv_proactive_charges) / Fixed64::from_num(total_charges) * hundred
        };

        let agv_energy_efficiency = if self.agv_charge_seconds == zero {
            zero
        } else {
            let rate = Fixed64::from_num(self.agv_completed_tasks) / self.agv_charge_seconds;
            (rate / Fixed64::from_num(0.1) * hundred).min(hundred)
        };

        let agv_total_seconds = now * Fixed64::from_num(agv_count);
        let denom = agv_total_seconds - self.agv_fault_seconds - self.agv_charge_seconds;
        let agv_utilization = if denom <= zero {
            zero
        } else {
            (self.agv_transport_seconds / denom * hundred).min(hundred)
        };

        let production_efficiency = ratio_points(order_completion_rate, hundred, Fixed64::from_num(16))
            + cycle_points(average_production_cycle)
            + ratio_points(device_utilization, hundred, Fixed64::from_num(8));
        let quality_and_cost = ratio_points(first_pass_rate, hundred, Fixed64::from_num(12))
            + ratio_points(cost_efficiency, hundred, Fixed64::from_num(18));
        let agv_efficiency = ratio_points(charge_strategy_efficiency, hundred, Fixed64::from_num(9))
            + ratio_points(agv_energy_efficiency, hundred, Fixed64::from_num(12))
            + ratio_points(agv_utilization, hundred, Fixed64::from_num(9));

        ScoreBreakdown {
            order_completion_rate,
            average_production_cycle,
            device_utilization,
            first_pass_rate,
            cost_efficiency,
            charge_strategy_efficiency,
            agv_energy_efficiency,
            agv_utilization,
            total_score: production_efficiency + quality_and_cost + agv_efficiency,
        }
    }
}

/// Linear proportional scoring: `value` out of `out_of` scaled to `weight`.
fn ratio_points(value: Fixed64, out_of: Fixed64, weight: Fixed64) -> Fixed64 {
    if out_of == Fixed64::from_num(0) {
        return Fixed64::from_num(0);
    }
    (value / out_of * weight).min(weight)
}

/// Cycle sub-metric (§4.9): 16 points at ratio 1.0, 8 at ratio 2.0, linear
/// in between and beyond (floored at 0).
fn cycle_points(ratio: Fixed64) -> Fixed64 {
    let zero = Fixed64::from_num(0);
    if ratio <= Fixed64::from_num(0) {
        return zero;
    }
    let sixteen = Fixed64::from_num(16);
    if ratio <= Fixed64::from_num(1) {
        return sixteen;
    }
    // Linear from (1.0, 16) to (2.0, 8), continuing the same slope beyond.
    let slope = Fixed64::from_num(-8);
    (sixteen + slope * (ratio - Fixed64::from_num(1))).max(zero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{OrderId, ProductId};
    use slotmap::SlotMap;

    fn pid() -> ProductId {
        let mut sm: SlotMap<ProductId, ()> = SlotMap::with_key();
        sm.insert(())
    }

    fn oid() -> OrderId {
        let mut sm: SlotMap<OrderId, ()> = SlotMap::with_key();
        sm.insert(())
    }

    #[test]
    fn all_zero_at_t0() {
        let kpi = KpiAggregator::new();
        let score = kpi.compute(Fixed64::from_num(0), 18, 6);
        assert_eq!(score.total_score, Fixed64::from_num(0));
        assert_eq!(score.order_completion_rate, Fixed64::from_num(0));
        assert_eq!(score.average_production_cycle, Fixed64::from_num(0));
    }

    #[test]
    fn first_pass_rate_tracks_attempts() {
        let mut kpi = KpiAggregator::new();
        let p1 = pid();
        let p2 = pid();
        kpi.record_event(&Event::QualityFailed { product: p1, attempts: 1, tick: Fixed64::from_num(1) });
        kpi.record_event(&Event::QualityPassed { product: p1, tick: Fixed64::from_num(2) });
        kpi.record_event(&Event::QualityPassed { product: p2, tick: Fixed64::from_num(3) });
        assert_eq!(kpi.quality_checks_total, 3);
        assert_eq!(kpi.first_pass_count, 1);
    }

    #[test]
    fn order_completion_rate_basic() {
        let mut kpi = KpiAggregator::new();
        kpi.record_event(&Event::OrderCreated { order: oid(), tick: Fixed64::from_num(0) });
        kpi.record_event(&Event::OrderCompleted { order: oid(), on_time: true, tick: Fixed64::from_num(5) });
        let score = kpi.compute(Fixed64::from_num(10), 18, 6);
        assert_eq!(score.order_completion_rate, Fixed64::from_num(100));
    }
}
