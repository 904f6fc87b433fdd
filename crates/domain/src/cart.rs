//! Frozen cart snapshot and shipping selection carried by a checkout job.

use common::{DealId, ProductId, StoreId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Whether a product ships physically or is delivered digitally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Physical,
    Digital,
}

impl ProductType {
    /// Returns the type name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Physical => "physical",
            ProductType::Digital => "digital",
        }
    }
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProductType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "physical" => Ok(ProductType::Physical),
            "digital" => Ok(ProductType::Digital),
            other => Err(format!("unknown product type: {other}")),
        }
    }
}

/// Deal applied to a cart line when it was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealInfo {
    pub deal_id: DealId,
    #[serde(default)]
    pub is_flash_sale: bool,
}

/// One line of the cart as captured at payment time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: ProductId,
    pub product_type: ProductType,
    pub store_id: StoreId,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_size: Option<String>,
    /// Unit price the buyer pays.
    pub price_at_add: Money,
    /// Unit list price before any deal.
    pub original_price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_info: Option<DealInfo>,
}

impl CartLine {
    /// Creates a physical line without size or deal.
    pub fn physical(
        product_id: impl Into<ProductId>,
        store_id: impl Into<StoreId>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_type: ProductType::Physical,
            store_id: store_id.into(),
            quantity,
            selected_size: None,
            price_at_add: unit_price,
            original_price: unit_price,
            deal_info: None,
        }
    }

    /// Creates a digital line.
    pub fn digital(
        product_id: impl Into<ProductId>,
        store_id: impl Into<StoreId>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_type: ProductType::Digital,
            ..Self::physical(product_id, store_id, quantity, unit_price)
        }
    }

    /// Sets the selected size variant.
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.selected_size = Some(size.into());
        self
    }

    /// Attaches a deal, recording the list price the discount applies to.
    pub fn with_deal(mut self, deal: DealInfo, original_price: Money) -> Self {
        self.deal_info = Some(deal);
        self.original_price = original_price;
        self
    }

    /// Returns `quantity * price_at_add`.
    pub fn line_total(&self) -> Money {
        self.price_at_add.multiply(self.quantity)
    }

    /// Returns the discount granted on this line, never negative.
    pub fn discount(&self) -> Money {
        self.original_price
            .saturating_sub(self.price_at_add)
            .multiply(self.quantity)
    }
}

/// Ordered, immutable sequence of cart lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartSnapshot {
    lines: Vec<CartLine>,
}

impl CartSnapshot {
    /// Freezes the given lines into a snapshot.
    pub fn new(lines: Vec<CartLine>) -> Self {
        Self { lines }
    }

    /// Returns the lines in cart order.
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns the lines of this cart that `purchased` does not cover.
    ///
    /// A line is covered when the purchase holds the same product and size
    /// from the same store.
    pub fn without_lines_of(&self, purchased: &CartSnapshot) -> CartSnapshot {
        self.lines
            .iter()
            .filter(|line| {
                !purchased.lines.iter().any(|p| {
                    p.product_id == line.product_id
                        && p.store_id == line.store_id
                        && p.selected_size == line.selected_size
                })
            })
            .cloned()
            .collect()
    }

    /// Groups lines by store, keeping stores in first-seen order.
    ///
    /// Each entry pairs the line number (index in the snapshot) with the line.
    pub fn group_by_store(&self) -> Vec<(StoreId, Vec<(u32, &CartLine)>)> {
        let mut groups: Vec<(StoreId, Vec<(u32, &CartLine)>)> = Vec::new();
        for (line_no, line) in (0u32..).zip(self.lines.iter()) {
            match groups.iter_mut().find(|(store, _)| *store == line.store_id) {
                Some((_, lines)) => lines.push((line_no, line)),
                None => groups.push((line.store_id.clone(), vec![(line_no, line)])),
            }
        }
        groups
    }
}

impl FromIterator<CartLine> for CartSnapshot {
    fn from_iter<T: IntoIterator<Item = CartLine>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Shipping method and cost chosen for one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreShipping {
    pub store_id: StoreId,
    pub method: String,
    pub cost: Money,
}

/// Per-store shipping choices made at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShippingSelection {
    stores: Vec<StoreShipping>,
}

impl ShippingSelection {
    pub fn new(stores: Vec<StoreShipping>) -> Self {
        Self { stores }
    }

    /// Adds a store's shipping choice.
    pub fn with_store(
        mut self,
        store_id: impl Into<StoreId>,
        method: impl Into<String>,
        cost: Money,
    ) -> Self {
        self.stores.push(StoreShipping {
            store_id: store_id.into(),
            method: method.into(),
            cost,
        });
        self
    }

    /// Returns the shipping choice for a store, if any.
    pub fn for_store(&self, store_id: &StoreId) -> Option<&StoreShipping> {
        self.stores.iter().find(|s| &s.store_id == store_id)
    }

    /// Returns the shipping cost for a store; zero when none was selected.
    pub fn cost_for(&self, store_id: &StoreId) -> Money {
        self.for_store(store_id)
            .map(|s| s.cost)
            .unwrap_or_default()
    }

    pub fn stores(&self) -> &[StoreShipping] {
        &self.stores
    }
}
