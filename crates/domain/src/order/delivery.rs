//! Per-store delivery state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Delivery progress of one sub-order.
///
/// State transitions:
/// ```text
/// Order Placed ──► Processing ──► Shipped ──► Out for Delivery ──► Delivered
///      │               │             │               │
///      └───────────────┴─────────────┴───────────────┴──► Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeliveryStatus {
    #[default]
    #[serde(rename = "Order Placed")]
    OrderPlaced,

    Processing,

    Shipped,

    #[serde(rename = "Out for Delivery")]
    OutForDelivery,

    /// Terminal state.
    Delivered,

    /// Terminal state.
    Canceled,
}

/// Rejected delivery status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("cannot move a sub-order from {from} to {to}")]
    InvalidTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("sub-order is already {0} and can no longer change")]
    Terminal(DeliveryStatus),
}

impl DeliveryStatus {
    /// Returns true if no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Canceled)
    }

    /// Returns the next state in the forward chain, if any.
    pub fn next(&self) -> Option<DeliveryStatus> {
        match self {
            DeliveryStatus::OrderPlaced => Some(DeliveryStatus::Processing),
            DeliveryStatus::Processing => Some(DeliveryStatus::Shipped),
            DeliveryStatus::Shipped => Some(DeliveryStatus::OutForDelivery),
            DeliveryStatus::OutForDelivery => Some(DeliveryStatus::Delivered),
            DeliveryStatus::Delivered | DeliveryStatus::Canceled => None,
        }
    }

    /// Returns true if a seller may move the sub-order to `to`.
    pub fn can_transition_to(&self, to: DeliveryStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == DeliveryStatus::Canceled || self.next() == Some(to)
    }

    /// Validates a transition, returning the new status.
    pub fn transition_to(&self, to: DeliveryStatus) -> Result<DeliveryStatus, DeliveryError> {
        if self.is_terminal() {
            return Err(DeliveryError::Terminal(*self));
        }
        if !self.can_transition_to(to) {
            return Err(DeliveryError::InvalidTransition { from: *self, to });
        }
        Ok(to)
    }

    /// Returns the display name, which is also the wire and storage value.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::OrderPlaced => "Order Placed",
            DeliveryStatus::Processing => "Processing",
            DeliveryStatus::Shipped => "Shipped",
            DeliveryStatus::OutForDelivery => "Out for Delivery",
            DeliveryStatus::Delivered => "Delivered",
            DeliveryStatus::Canceled => "Canceled",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Order Placed" => Ok(DeliveryStatus::OrderPlaced),
            "Processing" => Ok(DeliveryStatus::Processing),
            "Shipped" => Ok(DeliveryStatus::Shipped),
            "Out for Delivery" => Ok(DeliveryStatus::OutForDelivery),
            "Delivered" => Ok(DeliveryStatus::Delivered),
            "Canceled" => Ok(DeliveryStatus::Canceled),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// Derives an order's overall status from its sub-orders.
///
/// Priority: all canceled, all delivered, any out for delivery, any shipped,
/// otherwise processing. An order without sub-orders reads as processing.
pub fn overall_status(statuses: &[DeliveryStatus]) -> DeliveryStatus {
    if statuses.is_empty() {
        return DeliveryStatus::Processing;
    }
    if statuses.iter().all(|s| *s == DeliveryStatus::Canceled) {
        DeliveryStatus::Canceled
    } else if statuses.iter().all(|s| *s == DeliveryStatus::Delivered) {
        DeliveryStatus::Delivered
    } else if statuses.contains(&DeliveryStatus::OutForDelivery) {
        DeliveryStatus::OutForDelivery
    } else if statuses.contains(&DeliveryStatus::Shipped) {
        DeliveryStatus::Shipped
    } else {
        DeliveryStatus::Processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeliveryStatus::*;

    #[test]
    fn test_forward_chain() {
        assert!(OrderPlaced.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(OutForDelivery));
        assert!(OutForDelivery.can_transition_to(Delivered));
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        assert!(!OrderPlaced.can_transition_to(Shipped));
        assert!(!Shipped.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Processing));
    }

    #[test]
    fn test_cancel_from_any_open_state() {
        for status in [OrderPlaced, Processing, Shipped, OutForDelivery] {
            assert!(status.can_transition_to(Canceled), "{status} should cancel");
        }
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        assert_eq!(Delivered.transition_to(Canceled), Err(DeliveryError::Terminal(Delivered)));
        assert_eq!(Canceled.transition_to(Processing), Err(DeliveryError::Terminal(Canceled)));
    }

    #[test]
    fn test_invalid_transition_error() {
        assert_eq!(
            OrderPlaced.transition_to(Delivered),
            Err(DeliveryError::InvalidTransition {
                from: OrderPlaced,
                to: Delivered
            })
        );
    }

    #[test]
    fn test_overall_status_priority() {
        assert_eq!(overall_status(&[Canceled, Canceled]), Canceled);
        assert_eq!(overall_status(&[Delivered, Delivered]), Delivered);
        assert_eq!(overall_status(&[Shipped, OutForDelivery]), OutForDelivery);
        assert_eq!(overall_status(&[OrderPlaced, Shipped]), Shipped);
        assert_eq!(overall_status(&[OrderPlaced, Processing]), Processing);
        assert_eq!(overall_status(&[Delivered, Canceled]), Processing);
        assert_eq!(overall_status(&[]), Processing);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&OrderPlaced).unwrap(), "\"Order Placed\"");
        assert_eq!(
            serde_json::from_str::<DeliveryStatus>("\"Out for Delivery\"").unwrap(),
            OutForDelivery
        );
        assert_eq!("Out for Delivery".parse::<DeliveryStatus>(), Ok(OutForDelivery));
    }
}
