//! Fulfillment status of an order inside the pipeline.

use serde::{Deserialize, Serialize};

/// Where an order stands in the fulfillment pipeline.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Confirmed
///           └──► OnHold
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FulfillmentStatus {
    /// Order persisted; inventory, deals or cart clearing not yet all committed.
    #[default]
    Pending,

    /// Every side effect committed (terminal state).
    Confirmed,

    /// Fulfillment refused for a domain reason, awaiting an operator (terminal state).
    OnHold,
}

impl FulfillmentStatus {
    /// Returns true if the pipeline may still advance the order.
    pub fn is_resumable(&self) -> bool {
        matches!(self, FulfillmentStatus::Pending)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FulfillmentStatus::Confirmed | FulfillmentStatus::OnHold)
    }

    /// Returns true if the order may move to `next`.
    pub fn can_transition_to(&self, next: FulfillmentStatus) -> bool {
        matches!(
            (self, next),
            (FulfillmentStatus::Pending, FulfillmentStatus::Confirmed)
                | (FulfillmentStatus::Pending, FulfillmentStatus::OnHold)
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Pending => "Pending",
            FulfillmentStatus::Confirmed => "Confirmed",
            FulfillmentStatus::OnHold => "OnHold",
        }
    }
}

impl std::fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FulfillmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(FulfillmentStatus::Pending),
            "Confirmed" => Ok(FulfillmentStatus::Confirmed),
            "OnHold" => Ok(FulfillmentStatus::OnHold),
            other => Err(format!("unknown fulfillment status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(FulfillmentStatus::default(), FulfillmentStatus::Pending);
    }

    #[test]
    fn test_only_pending_moves() {
        assert!(FulfillmentStatus::Pending.can_transition_to(FulfillmentStatus::Confirmed));
        assert!(FulfillmentStatus::Pending.can_transition_to(FulfillmentStatus::OnHold));
        assert!(!FulfillmentStatus::Confirmed.can_transition_to(FulfillmentStatus::OnHold));
        assert!(!FulfillmentStatus::OnHold.can_transition_to(FulfillmentStatus::Confirmed));
        assert!(!FulfillmentStatus::Pending.can_transition_to(FulfillmentStatus::Pending));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!FulfillmentStatus::Pending.is_terminal());
        assert!(FulfillmentStatus::Confirmed.is_terminal());
        assert!(FulfillmentStatus::OnHold.is_terminal());
    }

    #[test]
    fn test_round_trips_through_str() {
        for status in [
            FulfillmentStatus::Pending,
            FulfillmentStatus::Confirmed,
            FulfillmentStatus::OnHold,
        ] {
            assert_eq!(status.as_str().parse::<FulfillmentStatus>(), Ok(status));
        }
        assert!("Shipped".parse::<FulfillmentStatus>().is_err());
    }
}
