use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for identifiers derived from a payment reference.
///
/// Changing this value changes every derived `JobId` and `OrderId`, which
/// breaks idempotency for jobs already in flight.
const PAYMENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1e_2c3a_9b4d_4e8f_a1c2_7d5e_3f60_b9a4);

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the identifier is empty or whitespace.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an order.
    ///
    /// Orders created by the pipeline derive their id from the payment
    /// reference, so two workers building the same order agree on it.
    OrderId
);

uuid_id!(
    /// Unique identifier for a per-store sub-order.
    SubOrderId
);

uuid_id!(
    /// Identifier of a checkout job, derived from its payment reference.
    JobId
);

string_id!(
    /// Identifier of the buyer.
    UserId
);

string_id!(
    /// Catalog product identifier.
    ProductId
);

string_id!(
    /// Identifier of the store (seller) a product belongs to.
    StoreId
);

string_id!(
    /// Identifier of a promotional deal.
    DealId
);

string_id!(
    /// Reference issued by the payment gateway for a confirmed payment.
    ///
    /// Unique per checkout; the idempotency key of the whole pipeline.
    PaymentReference
);

impl JobId {
    /// Derives the job id for a payment reference (UUIDv5).
    pub fn for_payment(reference: &PaymentReference) -> Self {
        let name = format!("job:{}", reference.as_str());
        Self(Uuid::new_v5(&PAYMENT_NAMESPACE, name.as_bytes()))
    }
}

impl OrderId {
    /// Derives the order id for a payment reference (UUIDv5).
    pub fn for_payment(reference: &PaymentReference) -> Self {
        let name = format!("order:{}", reference.as_str());
        Self(Uuid::new_v5(&PAYMENT_NAMESPACE, name.as_bytes()))
    }
}

impl SubOrderId {
    /// Derives the sub-order id for a store within an order.
    pub fn for_store(order_id: OrderId, store_id: &StoreId) -> Self {
        Self(Uuid::new_v5(&order_id.as_uuid(), store_id.as_str().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_new_creates_unique_ids() {
        let id1 = OrderId::new();
        let id2 = OrderId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_order_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = OrderId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn test_job_id_is_deterministic_per_payment() {
        let reference = PaymentReference::new("pi_3Nf9x2");
        assert_eq!(JobId::for_payment(&reference), JobId::for_payment(&reference));
        assert_ne!(
            JobId::for_payment(&reference),
            JobId::for_payment(&PaymentReference::new("pi_other"))
        );
    }

    #[test]
    fn test_job_and_order_ids_differ_for_same_payment() {
        let reference = PaymentReference::new("pi_3Nf9x2");
        assert_ne!(
            JobId::for_payment(&reference).as_uuid(),
            OrderId::for_payment(&reference).as_uuid()
        );
    }

    #[test]
    fn test_sub_order_id_depends_on_store() {
        let order_id = OrderId::for_payment(&PaymentReference::new("pi_1"));
        let a = SubOrderId::for_store(order_id, &StoreId::new("store-a"));
        let b = SubOrderId::for_store(order_id, &StoreId::new("store-b"));
        assert_ne!(a, b);
        assert_eq!(a, SubOrderId::for_store(order_id, &StoreId::new("store-a")));
    }

    #[test]
    fn test_string_ids_are_transparent_in_json() {
        let id = ProductId::new("SKU-001");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"SKU-001\"");
        assert!(UserId::new("  ").is_blank());
    }
}
