//! Raw-material and finished-goods warehouses (§3).
//!
//! Both have unbounded capacity and are not eligible for fault injection
//! (§4.6 only targets stations, conveyors, and AGVs).

use crate::fixed::Fixed64;
use crate::id::{LineId, ProductId};
use crate::product::Product;

#[derive(Debug, Clone, Default)]
pub struct RawMaterialWarehouse {
    pub line: Option<LineId>,
    available: Vec<Product>,
}

impl RawMaterialWarehouse {
    pub fn new(line: LineId) -> Self {
        Self {
            line: Some(line),
            available: Vec::new(),
        }
    }

    /// Makes a newly created product available for AGV pickup.
    pub fn spawn(&mut self, product: Product) {
        self.available.push(product);
    }

    /// Removes and returns the named product, if present (§4.8 `load`).
    pub fn take(&mut self, product_id: ProductId) -> Option<Product> {
        let idx = self.available.iter().position(|p| p.id == product_id)?;
        Some(self.available.remove(idx))
    }

    pub fn contains(&self, product_id: ProductId) -> bool {
        self.available.iter().any(|p| p.id == product_id)
    }

    pub fn available_ids(&self) -> Vec<ProductId> {
        self.available.iter().map(|p| p.id).collect()
    }

    pub fn len(&self) -> usize {
        self.available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FinishedGoodsWarehouse {
    pub line: Option<LineId>,
    received: Vec<Product>,
}

impl FinishedGoodsWarehouse {
    pub fn new(line: LineId) -> Self {
        Self {
            line: Some(line),
            received: Vec::new(),
        }
    }

    /// Deposits a finished product, stamping its completion time.
    pub fn deposit(&mut self, mut product: Product, now: Fixed64) -> Product {
        product.finished_at = Some(now);
        product.mark_stage("finished", now);
        self.received.push(product.clone());
        product
    }

    pub fn count(&self) -> usize {
        self.received.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::OrderId;
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
    fn raw_material_take_removes_only_named_product() {
        let mut wh = RawMaterialWarehouse::new(LineId::Line1);
        let a = make_product();
        let a_id = a.id;
        wh.spawn(a);
        wh.spawn(make_product());
        assert_eq!(wh.len(), 2);
        let taken = wh.take(a_id).unwrap();
        assert_eq!(taken.id, a_id);
        assert_eq!(wh.len(), 1);
        assert!(!wh.contains(a_id));
    }

    #[test]
    fn finished_goods_stamps_completion() {
        let mut wh = FinishedGoodsWarehouse::new(LineId::Line1);
        let product = make_product();
        let deposited = wh.deposit(product, Fixed64::from_num(160));
        assert_eq!(deposited.finished_at, Some(Fixed64::from_num(160)));
        assert_eq!(wh.count(), 1);
    }
}
