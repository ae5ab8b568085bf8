//! Strongly typed identifiers
//! Every entity id is a UUID string wrapped in its own type so ids of
//! different entities can never be mixed up.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Wrap an id coming from storage or a caller without validation
            pub fn from_raw(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn from_string(s: &str) -> Result<Self, String> {
                uuid::Uuid::parse_str(s)
                    .map(|_| Self(s.to_string()))
                    .map_err(|e| format!("Invalid {} format: {}", $label, e))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(UserId, "UserId");
entity_id!(CampaignId, "CampaignId");
entity_id!(PostId, "PostId");
entity_id!(ProductId, "ProductId");
entity_id!(SaleId, "SaleId");
entity_id!(
    /// Id of a purchase request or an order request
    PurchaseRequestId,
    "PurchaseRequestId"
);
entity_id!(ExpenseId, "ExpenseId");
entity_id!(IncentiveId, "IncentiveId");
