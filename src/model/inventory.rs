//! Spare parts and their consumption records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::quantity::{canonical, Quantity};

/// A stocked spare part. Stock only moves through the inventory ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryPart {
    pub id: Uuid,
    pub name: String,
    pub part_number: Option<String>,
    pub quantity_in_stock: Decimal,
    pub min_quantity: Decimal,
    pub unit_price: Decimal,
    pub unit_of_measure: String,
    pub compatible_equipment: BTreeSet<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryPart {
    pub fn new(
        name: impl Into<String>,
        quantity_in_stock: Decimal,
        unit_price: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            part_number: None,
            quantity_in_stock: canonical(quantity_in_stock.max(Decimal::ZERO)),
            min_quantity: canonical(Decimal::ZERO),
            unit_price: canonical(unit_price),
            unit_of_measure: "pcs".to_string(),
            compatible_equipment: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_min_quantity(mut self, min: Decimal) -> Self {
        self.min_quantity = canonical(min);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit_of_measure = unit.into();
        self
    }

    pub fn compatible_with(mut self, equipment_id: Uuid) -> Self {
        self.compatible_equipment.insert(equipment_id);
        self
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity_in_stock <= self.min_quantity
    }

    /// Parts without a compatibility list fit anything.
    pub fn is_compatible_with(&self, equipment_id: Uuid) -> bool {
        self.compatible_equipment.is_empty() || self.compatible_equipment.contains(&equipment_id)
    }
}

/// Parts offered for selection on a work order against `equipment_id`.
///
/// This is a picker convenience only; commits accept any part.
pub fn compatible_parts<'a, I>(parts: I, equipment_id: Uuid) -> Vec<&'a InventoryPart>
where
    I: IntoIterator<Item = &'a InventoryPart>,
{
    parts
        .into_iter()
        .filter(|p| p.is_compatible_with(equipment_id))
        .collect()
}

/// One consumption of a part by a work order, with its cost frozen at use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartsUsageRecord {
    pub id: Uuid,
    pub part_id: Uuid,
    pub work_order_id: Uuid,
    pub quantity_used: Quantity,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub used_by: Uuid,
    pub used_at: DateTime<Utc>,
}

impl PartsUsageRecord {
    /// Snapshot the part's current price.
    pub fn snapshot(
        part: &InventoryPart,
        work_order_id: Uuid,
        quantity: Quantity,
        used_by: Uuid,
        used_at: DateTime<Utc>,
    ) -> Self {
        let unit_cost = canonical(part.unit_price);
        Self {
            id: Uuid::new_v4(),
            part_id: part.id,
            work_order_id,
            quantity_used: quantity,
            unit_cost,
            total_cost: canonical(quantity.value() * unit_cost),
            used_by,
            used_at,
        }
    }
}
