//! The checkout job: the message that asks the pipeline to fulfil a paid cart.

use common::{JobId, PaymentReference, StoreId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cart::{CartSnapshot, ShippingSelection};
use crate::money::Money;

/// How the buyer paid (e.g. "card", "paypal"). Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentMethod(String);

impl PaymentMethod {
    pub fn new(method: impl Into<String>) -> Self {
        Self(method.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PaymentMethod {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Reasons a checkout job can never be fulfilled as published.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobValidationError {
    #[error("cart snapshot is empty")]
    EmptyCart,

    #[error("user id is blank")]
    BlankUserId,

    #[error("payment reference is blank")]
    BlankPaymentReference,

    #[error("job id {actual} does not match payment reference (expected {expected})")]
    JobIdMismatch { expected: JobId, actual: JobId },

    #[error("line {line_no}: quantity must be greater than 0")]
    InvalidQuantity { line_no: u32 },

    #[error("line {line_no}: price must not be negative")]
    NegativePrice { line_no: u32 },

    #[error("line {line_no}: product id is blank")]
    BlankProductId { line_no: u32 },

    #[error("line {line_no}: store id is blank")]
    BlankStoreId { line_no: u32 },

    #[error("shipping cost for store {store_id} must not be negative")]
    NegativeShippingCost { store_id: StoreId },

    #[error("order amount exceeds the representable range")]
    AmountOverflow,
}

/// A paid checkout waiting to be turned into an order.
///
/// Jobs are immutable once published: a retry produces a new value via
/// [`CheckoutJob::next_attempt`] instead of mutating the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutJob {
    job_id: JobId,
    user_id: UserId,
    payment_reference: PaymentReference,
    payment_method: PaymentMethod,
    cart_snapshot: CartSnapshot,
    #[serde(default)]
    shipping_selection: ShippingSelection,
    #[serde(default)]
    attempt: u32,
}

impl CheckoutJob {
    /// Creates the first attempt of a job, deriving its id from the payment reference.
    pub fn new(
        user_id: impl Into<UserId>,
        payment_reference: impl Into<PaymentReference>,
        payment_method: impl Into<PaymentMethod>,
        cart_snapshot: CartSnapshot,
        shipping_selection: ShippingSelection,
    ) -> Self {
        let payment_reference = payment_reference.into();
        Self {
            job_id: JobId::for_payment(&payment_reference),
            user_id: user_id.into(),
            payment_reference,
            payment_method: payment_method.into(),
            cart_snapshot,
            shipping_selection,
            attempt: 0,
        }
    }

    /// Returns a copy of this job with the attempt counter incremented.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn payment_reference(&self) -> &PaymentReference {
        &self.payment_reference
    }

    pub fn payment_method(&self) -> &PaymentMethod {
        &self.payment_method
    }

    pub fn cart_snapshot(&self) -> &CartSnapshot {
        &self.cart_snapshot
    }

    pub fn shipping_selection(&self) -> &ShippingSelection {
        &self.shipping_selection
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Checks the structural rules a job must satisfy before any side effect.
    pub fn validate(&self) -> Result<(), JobValidationError> {
        if self.user_id.is_blank() {
            return Err(JobValidationError::BlankUserId);
        }
        if self.payment_reference.is_blank() {
            return Err(JobValidationError::BlankPaymentReference);
        }

        let expected = JobId::for_payment(&self.payment_reference);
        if self.job_id != expected {
            return Err(JobValidationError::JobIdMismatch {
                expected,
                actual: self.job_id,
            });
        }

        if self.cart_snapshot.is_empty() {
            return Err(JobValidationError::EmptyCart);
        }

        for (line_no, line) in (0u32..).zip(self.cart_snapshot.lines()) {
            if line.quantity == 0 {
                return Err(JobValidationError::InvalidQuantity { line_no });
            }
            if line.price_at_add.is_negative() || line.original_price.is_negative() {
                return Err(JobValidationError::NegativePrice { line_no });
            }
            if line.product_id.is_blank() {
                return Err(JobValidationError::BlankProductId { line_no });
            }
            if line.store_id.is_blank() {
                return Err(JobValidationError::BlankStoreId { line_no });
            }
        }

        for choice in self.shipping_selection.stores() {
            if choice.cost.is_negative() {
                return Err(JobValidationError::NegativeShippingCost {
                    store_id: choice.store_id.clone(),
                });
            }
        }

        self.checked_total()
            .ok_or(JobValidationError::AmountOverflow)?;

        Ok(())
    }

    /// Sum of every line at list and paid price plus all shipping, or `None`
    /// on overflow. Bounds every amount the order builder derives.
    fn checked_total(&self) -> Option<Money> {
        let mut total = Money::zero();
        for line in self.cart_snapshot.lines() {
            total = total
                .checked_add(line.price_at_add.checked_multiply(line.quantity)?)?
                .checked_add(line.original_price.checked_multiply(line.quantity)?)?;
        }
        for choice in self.shipping_selection.stores() {
            total = total.checked_add(choice.cost)?;
        }
        Some(total)
    }
}
