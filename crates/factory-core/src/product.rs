//! Product and order model (§3).

use crate::fixed::Fixed64;
use crate::id::{OrderId, ProductId};
use serde::{Deserialize, Serialize};

/// The three product types the line can manufacture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductType {
    P1,
    P2,
    P3,
}

impl ProductType {
    pub const ALL: [ProductType; 3] = [ProductType::P1, ProductType::P2, ProductType::P3];

    /// Material cost charged at raw-material pickup (§3).
    pub fn material_cost(self) -> Fixed64 {
        Fixed64::from_num(match self {
            ProductType::P1 => 10,
            ProductType::P2 => 15,
            ProductType::P3 => 20,
        })
    }

    /// Nominal theoretical cycle time used only for KPI normalization (§4.7).
    pub fn theoretical_time_s(self) -> Fixed64 {
        Fixed64::from_num(match self {
            ProductType::P1 => 160,
            ProductType::P2 => 200,
            ProductType::P3 => 250,
        })
    }

    /// Type-specific quality-check failure probability (§4.5).
    pub fn quality_fail_probability(self) -> f64 {
        match self {
            ProductType::P1 => 0.06,
            ProductType::P2 => 0.08,
            ProductType::P3 => 0.12,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProductType::P1 => "P1",
            ProductType::P2 => "P2",
            ProductType::P3 => "P3",
        }
    }
}

/// The routing step a product is currently at, used to drive the autonomous
/// conveyor/station hand-off and to detect the Station-C second-visit rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteStep {
    RawMaterial,
    StationA,
    ConveyorAB,
    StationB,
    ConveyorBC,
    StationCFirstPass,
    ConveyorCqHolding,
    StationCSecondPass,
    QualityCheck,
    ReworkAtStationC,
    FinishedGoods,
    Scrapped,
}

/// A single unit of product flowing through a line (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    /// Human-readable identifier, `prod_{type}_{uuid}`.
    pub label: String,
    pub product_type: ProductType,
    pub order_id: OrderId,
    pub created_at: Fixed64,
    /// How many prior quality-check failures this product has: 0, 1, or 2.
    pub attempts: u8,
    pub route_step: RouteStep,
    /// Set once a P3 product has been carried back from the Conveyor-CQ
    /// holding lane (or, on lines without named lanes, Station C's output
    /// slot) to Station B for its second pass (§3, §4.2).
    pub p3_second_pass: bool,
    /// Timestamps recorded at each stage boundary, in arrival order.
    pub stage_timestamps: Vec<(&'static str, Fixed64)>,
    pub finished_at: Option<Fixed64>,
    pub scrapped_at: Option<Fixed64>,
}

impl Product {
    pub fn new(id: ProductId, product_type: ProductType, order_id: OrderId, now: Fixed64) -> Self {
        let label = format!("prod_{}_{}", product_type.label(), uuid::Uuid::new_v4());
        Self {
            id,
            label,
            product_type,
            order_id,
            created_at: now,
            attempts: 0,
            route_step: RouteStep::RawMaterial,
            p3_second_pass: false,
            stage_timestamps: vec![("created", now)],
            finished_at: None,
            scrapped_at: None,
        }
    }

    pub fn mark_stage(&mut self, stage: &'static str, now: Fixed64) {
        self.stage_timestamps.push((stage, now));
    }

    pub fn is_in_flight(&self) -> bool {
        self.finished_at.is_none() && self.scrapped_at.is_none()
    }

    /// Actual elapsed time from creation to finished-goods arrival.
    pub fn actual_cycle_time(&self) -> Option<Fixed64> {
        self.finished_at.map(|t| t - self.created_at)
    }
}

/// Priority an order was generated with (§4.7); scales its deadline multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Deadline multiplier applied to theoretical cycle time.
    pub fn deadline_multiplier(self) -> Fixed64 {
        match self {
            Priority::Low => Fixed64::from_num(3),
            Priority::Medium => Fixed64::from_num(2),
            Priority::High => Fixed64::from_num(1.5),
        }
    }
}

/// A single (product-type, quantity) line item within an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_type: ProductType,
    pub quantity: u32,
}

/// An order emitted by the order generator (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub created_at: Fixed64,
    pub deadline: Fixed64,
    pub priority: Priority,
    pub items: Vec<OrderItem>,
    /// Every product this order spawned, so completion can be derived.
    pub product_ids: Vec<ProductId>,
}

impl Order {
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }
}
