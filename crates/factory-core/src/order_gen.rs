//! Order generator (§4.7).
//!
//! Produces plain data drafts; [`crate::line::Line`] is responsible for
//! minting real [`crate::id::OrderId`]/[`crate::id::ProductId`] keys from its
//! slot maps and spawning the drafted products into the raw-material
//! warehouse.

use crate::fixed::Fixed64;
use crate::product::{Priority, ProductType};
use crate::registry::Registry;
use crate::rng::SimRng;

const QUANTITY_WEIGHTS: [f64; 5] = [0.40, 0.30, 0.20, 0.07, 0.03];
const PRODUCT_TYPE_WEIGHTS: [f64; 3] = [0.60, 0.30, 0.10];
const PRIORITY_WEIGHTS: [f64; 3] = [0.70, 0.25, 0.05];

#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub priority: Priority,
    pub product_types: Vec<ProductType>,
    pub deadline: Fixed64,
}

pub struct OrderGenerator;

impl OrderGenerator {
    pub fn sample_interval(registry: &Registry, rng: &mut SimRng) -> Fixed64 {
        rng.uniform_range_s(
            registry.order_interval_range_s.min_s,
            registry.order_interval_range_s.max_s,
        )
    }

    /// Draws one order per §4.7's weighted distributions.
    pub fn generate(now: Fixed64, rng: &mut SimRng) -> OrderDraft {
        let quantity = rng.weighted_index(&QUANTITY_WEIGHTS) as u32 + 1;
        let product_types: Vec<ProductType> = (0..quantity)
            .map(|_| ProductType::ALL[rng.weighted_index(&PRODUCT_TYPE_WEIGHTS)])
            .collect();
        let priority = match rng.weighted_index(&PRIORITY_WEIGHTS) {
            0 => Priority::Low,
            1 => Priority::Medium,
            _ => Priority::High,
        };
        let theoretical_time: Fixed64 = product_types
            .iter()
            .map(|t| t.theoretical_time_s())
            .fold(Fixed64::from_num(0), |a, b| a + b);
        let deadline = now + theoretical_time * priority.deadline_multiplier();
        OrderDraft {
            priority,
            product_types,
            deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_is_within_one_to_five() {
        let mut rng = SimRng::from_seed(3);
        for _ in 0..100 {
            let draft = OrderGenerator::generate(Fixed64::from_num(0), &mut rng);
            assert!(draft.product_types.len() >= 1 && draft.product_types.len() <= 5);
        }
    }

    #[test]
    fn deadline_scales_with_priority() {
        let mut rng = SimRng::from_seed(3);
        let draft = OrderGenerator::generate(Fixed64::from_num(0), &mut rng);
        assert!(draft.deadline > Fixed64::from_num(0));
    }
}
