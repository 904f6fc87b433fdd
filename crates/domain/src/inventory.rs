//! Stock records and the decrement rule shared by every ledger backend.

use std::collections::BTreeMap;

use common::ProductId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cart::ProductType;

fn size_suffix(size: &Option<String>) -> String {
    size.as_deref()
        .map(|s| format!(" (size {s})"))
        .unwrap_or_default()
}

/// Reasons a stock decrement cannot be applied.
///
/// All of them are domain failures: retrying the same job cannot succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("unknown product {product_id}")]
    UnknownProduct { product_id: ProductId },

    #[error("product {product_id} is sold by size but no size was selected")]
    SizeRequired { product_id: ProductId },

    #[error("product {product_id} has no size {size}")]
    UnknownSize { product_id: ProductId, size: String },

    #[error(
        "insufficient stock for {product_id}{}: requested {requested}, available {available}",
        size_suffix(.size)
    )]
    InsufficientStock {
        product_id: ProductId,
        size: Option<String>,
        requested: u32,
        available: u32,
    },
}

/// How a product's stock is counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StockLevel {
    /// A single counter for the product.
    Flat { quantity: u32 },
    /// One counter per size variant.
    Sized { sizes: BTreeMap<String, u32> },
    /// No limit (digital products without a sales cap).
    Unlimited,
}

/// Stock for one catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRecord {
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub stock: StockLevel,
}

impl InventoryRecord {
    /// Physical product with a single quantity counter.
    pub fn physical(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            product_type: ProductType::Physical,
            stock: StockLevel::Flat { quantity },
        }
    }

    /// Physical product with per-size counters.
    pub fn physical_sized<S: Into<String>>(
        product_id: impl Into<ProductId>,
        sizes: impl IntoIterator<Item = (S, u32)>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_type: ProductType::Physical,
            stock: StockLevel::Sized {
                sizes: sizes.into_iter().map(|(s, q)| (s.into(), q)).collect(),
            },
        }
    }

    /// Digital product with a sales limit.
    pub fn digital_limited(product_id: impl Into<ProductId>, limit: u32) -> Self {
        Self {
            product_id: product_id.into(),
            product_type: ProductType::Digital,
            stock: StockLevel::Flat { quantity: limit },
        }
    }

    /// Digital product that can be sold without limit.
    pub fn digital_unlimited(product_id: impl Into<ProductId>) -> Self {
        Self {
            product_id: product_id.into(),
            product_type: ProductType::Digital,
            stock: StockLevel::Unlimited,
        }
    }

    /// Returns the units available for the given size, `None` when unlimited.
    pub fn available(&self, size: Option<&str>) -> Result<Option<u32>, InventoryError> {
        match &self.stock {
            StockLevel::Unlimited => Ok(None),
            StockLevel::Flat { quantity } => Ok(Some(*quantity)),
            StockLevel::Sized { sizes } => {
                let size = size.ok_or_else(|| InventoryError::SizeRequired {
                    product_id: self.product_id.clone(),
                })?;
                sizes
                    .get(size)
                    .copied()
                    .map(Some)
                    .ok_or_else(|| InventoryError::UnknownSize {
                        product_id: self.product_id.clone(),
                        size: size.to_string(),
                    })
            }
        }
    }

    /// Removes `quantity` units, refusing rather than going below zero.
    ///
    /// A flat-stock product ignores any selected size.
    pub fn decrement(&mut self, size: Option<&str>, quantity: u32) -> Result<(), InventoryError> {
        let insufficient = |available: u32| InventoryError::InsufficientStock {
            product_id: self.product_id.clone(),
            size: size.map(str::to_string),
            requested: quantity,
            available,
        };

        match &mut self.stock {
            StockLevel::Unlimited => Ok(()),
            StockLevel::Flat { quantity: current } => {
                if *current < quantity {
                    return Err(insufficient(*current));
                }
                *current -= quantity;
                Ok(())
            }
            StockLevel::Sized { sizes } => {
                let size = size.ok_or_else(|| InventoryError::SizeRequired {
                    product_id: self.product_id.clone(),
                })?;
                let current = sizes
                    .get_mut(size)
                    .ok_or_else(|| InventoryError::UnknownSize {
                        product_id: self.product_id.clone(),
                        size: size.to_string(),
                    })?;
                if *current < quantity {
                    return Err(insufficient(*current));
                }
                *current -= quantity;
                Ok(())
            }
        }
    }
}

/// One stock movement requested by an order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockDecrement {
    /// Position of the line in the cart snapshot.
    pub line_no: u32,
    pub product_id: ProductId,
    pub size: Option<String>,
    pub quantity: u32,
}

/// Sorts decrements by product and size.
///
/// Applying lines in one global order keeps concurrent orders from locking
/// the same rows in opposite orders.
pub fn lock_order(decrements: &mut [StockDecrement]) {
    decrements.sort_by(|a, b| {
        a.product_id
            .cmp(&b.product_id)
            .then_with(|| a.size.cmp(&b.size))
            .then(a.line_no.cmp(&b.line_no))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_decrement_reduces_quantity() {
        let mut record = InventoryRecord::physical("p1", 5);
        record.decrement(None, 2).unwrap();
        assert_eq!(record.available(None).unwrap(), Some(3));
    }

    #[test]
    fn test_flat_decrement_refuses_to_go_negative() {
        let mut record = InventoryRecord::physical("p1", 1);
        let err = record.decrement(None, 2).unwrap_err();
        assert_eq!(
            err,
            InventoryError::InsufficientStock {
                product_id: ProductId::new("p1"),
                size: None,
                requested: 2,
                available: 1,
            }
        );
        assert_eq!(record.available(None).unwrap(), Some(1));
    }

    #[test]
    fn test_sized_decrement_targets_variant() {
        let mut record = InventoryRecord::physical_sized("shirt", [("M", 2), ("L", 1)]);
        record.decrement(Some("L"), 1).unwrap();
        assert_eq!(record.available(Some("L")).unwrap(), Some(0));
        assert_eq!(record.available(Some("M")).unwrap(), Some(2));
    }

    #[test]
    fn test_sized_product_requires_known_size() {
        let mut record = InventoryRecord::physical_sized("shirt", [("M", 2)]);
        assert!(matches!(
            record.decrement(None, 1),
            Err(InventoryError::SizeRequired { .. })
        ));
        assert!(matches!(
            record.decrement(Some("XL"), 1),
            Err(InventoryError::UnknownSize { .. })
        ));
    }

    #[test]
    fn test_unlimited_digital_never_runs_out() {
        let mut record = InventoryRecord::digital_unlimited("ebook");
        record.decrement(None, 10_000).unwrap();
        assert_eq!(record.available(None).unwrap(), None);
    }

    #[test]
    fn test_limited_digital_counts_down() {
        let mut record = InventoryRecord::digital_limited("course", 1);
        record.decrement(None, 1).unwrap();
        assert!(record.decrement(None, 1).is_err());
    }

    #[test]
    fn test_insufficient_stock_message_mentions_size() {
        let err = InventoryError::InsufficientStock {
            product_id: ProductId::new("shirt"),
            size: Some("M".into()),
            requested: 3,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            "insufficient stock for shirt (size M): requested 3, available 1"
        );
    }

    #[test]
    fn test_lock_order_sorts_by_product_then_size() {
        let mut decrements = vec![
            StockDecrement {
                line_no: 0,
                product_id: ProductId::new("b"),
                size: None,
                quantity: 1,
            },
            StockDecrement {
                line_no: 1,
                product_id: ProductId::new("a"),
                size: Some("M".into()),
                quantity: 1,
            },
        ];
        lock_order(&mut decrements);
        assert_eq!(decrements[0].product_id, ProductId::new("a"));
    }
}
