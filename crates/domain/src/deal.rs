//! Deal usage accounting.

use chrono::{DateTime, Utc};
use common::{DealId, UserId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Redemption analytics kept on a deal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealAnalytics {
    pub redemption_count: u64,
    pub total_discount_amount: Money,
    pub unique_users_used: Vec<UserId>,
    pub first_redemption_date: Option<DateTime<Utc>>,
    pub last_redemption_date: Option<DateTime<Utc>>,
}

/// Usage state of a promotional deal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub deal_id: DealId,
    pub usage_count: u64,
    /// Units still sellable under a flash sale; `None` for ordinary deals.
    pub flash_sale_remaining: Option<u32>,
    /// Maximum redemptions per user; `None` means uncapped.
    pub per_user_limit: Option<u32>,
    pub analytics: DealAnalytics,
}

/// A deal applied to one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealRedemption {
    pub deal_id: DealId,
    pub line_no: u32,
    pub quantity: u32,
    pub discount: Money,
    pub is_flash_sale: bool,
}

/// Anomalies observed while recording a redemption.
///
/// The buyer has already paid the discounted price, so none of these fail
/// the order; they are logged for reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedemptionNotes {
    /// The flash sale had fewer units left than were sold.
    pub flash_sale_oversold: bool,
    /// The user went past the per-user cap.
    pub user_limit_exceeded: bool,
}

impl RedemptionNotes {
    pub fn is_clean(&self) -> bool {
        !self.flash_sale_oversold && !self.user_limit_exceeded
    }
}

impl Deal {
    /// Creates an ordinary deal with no usage yet.
    pub fn new(deal_id: impl Into<DealId>) -> Self {
        Self {
            deal_id: deal_id.into(),
            usage_count: 0,
            flash_sale_remaining: None,
            per_user_limit: None,
            analytics: DealAnalytics::default(),
        }
    }

    /// Creates a flash-sale deal with `remaining` discounted units.
    pub fn flash_sale(deal_id: impl Into<DealId>, remaining: u32) -> Self {
        Self {
            flash_sale_remaining: Some(remaining),
            ..Self::new(deal_id)
        }
    }

    /// Caps how many times one user may redeem the deal.
    pub fn with_per_user_limit(mut self, limit: u32) -> Self {
        self.per_user_limit = Some(limit);
        self
    }

    /// Applies one line's redemption to the usage counters.
    ///
    /// `prior_user_redemptions` is how many times `user` redeemed this deal
    /// before. Callers guarantee each (order, line) is recorded at most once;
    /// this method only keeps `unique_users_used` free of duplicates.
    pub fn record_redemption(
        &mut self,
        user: &UserId,
        redemption: &DealRedemption,
        prior_user_redemptions: u32,
        at: DateTime<Utc>,
    ) -> RedemptionNotes {
        let mut notes = RedemptionNotes::default();

        self.usage_count += 1;

        if redemption.is_flash_sale
            && let Some(remaining) = self.flash_sale_remaining.as_mut()
        {
            if *remaining < redemption.quantity {
                notes.flash_sale_oversold = true;
            }
            *remaining = remaining.saturating_sub(redemption.quantity);
        }

        if let Some(limit) = self.per_user_limit
            && prior_user_redemptions >= limit
        {
            notes.user_limit_exceeded = true;
        }

        let analytics = &mut self.analytics;
        analytics.redemption_count += 1;
        analytics.total_discount_amount += redemption.discount;
        if !analytics.unique_users_used.contains(user) {
            analytics.unique_users_used.push(user.clone());
        }
        if analytics.first_redemption_date.is_none() {
            analytics.first_redemption_date = Some(at);
        }
        analytics.last_redemption_date = Some(at);

        notes
    }
}
