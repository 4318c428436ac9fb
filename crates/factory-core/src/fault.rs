//! Fault injector (§4.6).
//!
//! Stateless with respect to device ownership — it only samples *which*
//! eligible device gets struck and for how long; [`crate::line::Line`]
//! applies the fault to the chosen device and schedules its clearing.

use crate::fixed::Fixed64;
use crate::registry::Registry;
use crate::rng::SimRng;
use crate::scheduler::FaultTarget;

pub struct FaultInjector;

impl FaultInjector {
    /// Picks uniformly among `eligible` (already filtered to non-faulted
    /// devices by the caller). `None` if nothing is eligible right now.
    pub fn pick_target(eligible: &[FaultTarget], rng: &mut SimRng) -> Option<FaultTarget> {
        if eligible.is_empty() {
            return None;
        }
        let weights = vec![1.0; eligible.len()];
        let idx = rng.weighted_index(&weights);
        Some(eligible[idx])
    }

    pub fn sample_duration(registry: &Registry, rng: &mut SimRng) -> Fixed64 {
        rng.uniform_range_s(
            registry.fault_duration_range_s.min_s,
            registry.fault_duration_range_s.max_s,
        )
    }

    pub fn sample_interval(registry: &Registry, rng: &mut SimRng) -> Fixed64 {
        rng.uniform_range_s(
            registry.fault_interval_range_s.min_s,
            registry.fault_interval_range_s.max_s,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{AgvId, LineId};

    #[test]
    fn empty_eligible_list_picks_nothing() {
        let mut rng = SimRng::from_seed(1);
        assert!(FaultInjector::pick_target(&[], &mut rng).is_none());
    }

    #[test]
    fn picks_one_of_the_eligible_targets() {
        let mut rng = SimRng::from_seed(1);
        let eligible = vec![FaultTarget::Agv(AgvId::Agv1), FaultTarget::Agv(AgvId::Agv2)];
        let picked = FaultInjector::pick_target(&eligible, &mut rng).unwrap();
        assert!(eligible.contains(&picked));
        let _ = LineId::Line1;
    }
}
