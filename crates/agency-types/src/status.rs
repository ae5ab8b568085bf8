//! Canonical status enums and the label translation table
//!
//! The dashboard has stored several generations of status labels for the same
//! state (for example "대기" and "주제 승인 대기" both mean a pending topic).
//! Every label is translated into one canonical variant here, at the boundary.
//! Deserialization goes through the same table, so stored legacy labels load
//! as canonical states and are always written back as canonical codes.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Raised when a label matches no known state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} label: '{label}'")]
pub struct LabelError {
    pub kind: &'static str,
    pub label: String,
}

fn lookup<T: Copy>(
    table: &HashMap<&'static str, T>,
    kind: &'static str,
    label: &str,
) -> Result<T, LabelError> {
    let key = label.trim();
    table
        .get(key)
        .or_else(|| table.get(key.to_ascii_lowercase().as_str()))
        .copied()
        .ok_or_else(|| LabelError {
            kind,
            label: label.to_string(),
        })
}

macro_rules! label_conversions {
    ($ty:ident, $table:ident, $kind:literal) => {
        impl $ty {
            /// Translate any known label (canonical code or legacy display label)
            pub fn from_label(label: &str) -> Result<Self, LabelError> {
                lookup(&$table, $kind, label)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = LabelError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::from_label(&value)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = LabelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_label(s)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.code())
            }
        }
    };
}

/// User role tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    AgencyAdmin,
    Employee,
    Client,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::SuperAdmin, Role::AgencyAdmin, Role::Employee, Role::Client];

    pub fn code(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::AgencyAdmin => "agency_admin",
            Self::Employee => "employee",
            Self::Client => "client",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "슈퍼 관리자",
            Self::AgencyAdmin => "대행사 관리자",
            Self::Employee => "직원",
            Self::Client => "클라이언트",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::SuperAdmin | Self::AgencyAdmin)
    }
}

static ROLE_LABELS: Lazy<HashMap<&'static str, Role>> = Lazy::new(|| {
    HashMap::from([
        ("super_admin", Role::SuperAdmin),
        ("superadmin", Role::SuperAdmin),
        ("슈퍼 관리자", Role::SuperAdmin),
        ("agency_admin", Role::AgencyAdmin),
        ("agencyadmin", Role::AgencyAdmin),
        ("대행사 관리자", Role::AgencyAdmin),
        ("employee", Role::Employee),
        ("staff", Role::Employee),
        ("직원", Role::Employee),
        ("client", Role::Client),
        ("클라이언트", Role::Client),
    ])
});

label_conversions!(Role, ROLE_LABELS, "role");

/// Approval state shared by the topic and outline sub-machines of a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "대기",
            Self::Approved => "승인",
            Self::Rejected => "거절",
        }
    }
}

static REVIEW_LABELS: Lazy<HashMap<&'static str, ReviewStatus>> = Lazy::new(|| {
    HashMap::from([
        ("pending", ReviewStatus::Pending),
        ("대기", ReviewStatus::Pending),
        ("주제 승인 대기", ReviewStatus::Pending),
        ("목차 승인 대기", ReviewStatus::Pending),
        ("approved", ReviewStatus::Approved),
        ("승인", ReviewStatus::Approved),
        ("주제 승인", ReviewStatus::Approved),
        ("목차 승인", ReviewStatus::Approved),
        ("rejected", ReviewStatus::Rejected),
        ("거절", ReviewStatus::Rejected),
        ("반려", ReviewStatus::Rejected),
        ("주제 반려", ReviewStatus::Rejected),
        ("목차 반려", ReviewStatus::Rejected),
    ])
});

label_conversions!(ReviewStatus, REVIEW_LABELS, "review status");

/// Order-request status mirrored onto a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "snake_case")]
pub enum OrderRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl OrderRequestStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "발주 대기",
            Self::Approved => "승인완료",
            Self::Rejected => "거절됨",
        }
    }
}

static ORDER_REQUEST_LABELS: Lazy<HashMap<&'static str, OrderRequestStatus>> = Lazy::new(|| {
    HashMap::from([
        ("pending", OrderRequestStatus::Pending),
        ("발주 대기", OrderRequestStatus::Pending),
        ("approved", OrderRequestStatus::Approved),
        ("승인완료", OrderRequestStatus::Approved),
        ("rejected", OrderRequestStatus::Rejected),
        ("거절됨", OrderRequestStatus::Rejected),
    ])
});

label_conversions!(OrderRequestStatus, ORDER_REQUEST_LABELS, "order request status");

/// Status of a purchase request; `OrderPending` only occurs on order requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "snake_case")]
pub enum PurchaseStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    OnHold,
    Purchased,
    Settled,
    OrderPending,
}

impl PurchaseStatus {
    pub const ALL: [PurchaseStatus; 8] = [
        PurchaseStatus::Pending,
        PurchaseStatus::UnderReview,
        PurchaseStatus::Approved,
        PurchaseStatus::Rejected,
        PurchaseStatus::OnHold,
        PurchaseStatus::Purchased,
        PurchaseStatus::Settled,
        PurchaseStatus::OrderPending,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::OnHold => "on_hold",
            Self::Purchased => "purchased",
            Self::Settled => "settled",
            Self::OrderPending => "order_pending",
        }
    }

    /// Display label; order requests use their own vocabulary for approval
    pub fn label(&self, is_order_request: bool) -> &'static str {
        match self {
            Self::Pending => "승인 대기",
            Self::UnderReview => "검토 중",
            Self::Approved if is_order_request => "승인완료",
            Self::Approved => "승인됨",
            Self::Rejected => "거절됨",
            Self::OnHold => "보류",
            Self::Purchased => "구매 완료",
            Self::Settled => "정산 완료",
            Self::OrderPending => "발주 대기",
        }
    }
}

static PURCHASE_LABELS: Lazy<HashMap<&'static str, PurchaseStatus>> = Lazy::new(|| {
    HashMap::from([
        ("pending", PurchaseStatus::Pending),
        ("승인 대기", PurchaseStatus::Pending),
        ("under_review", PurchaseStatus::UnderReview),
        ("검토 중", PurchaseStatus::UnderReview),
        ("approved", PurchaseStatus::Approved),
        ("승인됨", PurchaseStatus::Approved),
        ("승인완료", PurchaseStatus::Approved),
        ("rejected", PurchaseStatus::Rejected),
        ("거절됨", PurchaseStatus::Rejected),
        ("on_hold", PurchaseStatus::OnHold),
        ("보류", PurchaseStatus::OnHold),
        ("purchased", PurchaseStatus::Purchased),
        ("구매 완료", PurchaseStatus::Purchased),
        ("settled", PurchaseStatus::Settled),
        ("정산 완료", PurchaseStatus::Settled),
        ("order_pending", PurchaseStatus::OrderPending),
        ("발주 대기", PurchaseStatus::OrderPending),
    ])
});

label_conversions!(PurchaseStatus, PURCHASE_LABELS, "purchase status");

/// Request priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

static PRIORITY_LABELS: Lazy<HashMap<&'static str, Priority>> = Lazy::new(|| {
    HashMap::from([
        ("low", Priority::Low),
        ("낮음", Priority::Low),
        ("normal", Priority::Normal),
        ("보통", Priority::Normal),
        ("high", Priority::High),
        ("높음", Priority::High),
        ("urgent", Priority::Urgent),
        ("긴급", Priority::Urgent),
    ])
});

label_conversions!(Priority, PRIORITY_LABELS, "priority");

/// Monthly incentive lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "snake_case")]
pub enum IncentiveStatus {
    Calculating,
    PendingReview,
    Approved,
    Paid,
    OnHold,
    Cancelled,
}

impl IncentiveStatus {
    pub const ALL: [IncentiveStatus; 6] = [
        IncentiveStatus::Calculating,
        IncentiveStatus::PendingReview,
        IncentiveStatus::Approved,
        IncentiveStatus::Paid,
        IncentiveStatus::OnHold,
        IncentiveStatus::Cancelled,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Calculating => "calculating",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Paid => "paid",
            Self::OnHold => "on_hold",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Calculating => "계산중",
            Self::PendingReview => "검토대기",
            Self::Approved => "승인완료",
            Self::Paid => "지급완료",
            Self::OnHold => "보류",
            Self::Cancelled => "취소",
        }
    }
}

static INCENTIVE_LABELS: Lazy<HashMap<&'static str, IncentiveStatus>> = Lazy::new(|| {
    HashMap::from([
        ("calculating", IncentiveStatus::Calculating),
        ("계산중", IncentiveStatus::Calculating),
        ("pending_review", IncentiveStatus::PendingReview),
        ("검토대기", IncentiveStatus::PendingReview),
        ("approved", IncentiveStatus::Approved),
        ("승인완료", IncentiveStatus::Approved),
        ("paid", IncentiveStatus::Paid),
        ("지급완료", IncentiveStatus::Paid),
        ("on_hold", IncentiveStatus::OnHold),
        ("보류", IncentiveStatus::OnHold),
        ("cancelled", IncentiveStatus::Cancelled),
        ("취소", IncentiveStatus::Cancelled),
    ])
});

label_conversions!(IncentiveStatus, INCENTIVE_LABELS, "incentive status");

/// Campaign lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    InProgress,
    Completed,
    Approved,
    Cancelled,
}

impl CampaignStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Approved => "approved",
            Self::Cancelled => "cancelled",
        }
    }
}

static CAMPAIGN_LABELS: Lazy<HashMap<&'static str, CampaignStatus>> = Lazy::new(|| {
    HashMap::from([
        ("draft", CampaignStatus::Draft),
        ("준비", CampaignStatus::Draft),
        ("in_progress", CampaignStatus::InProgress),
        ("진행중", CampaignStatus::InProgress),
        ("completed", CampaignStatus::Completed),
        ("완료", CampaignStatus::Completed),
        ("approved", CampaignStatus::Approved),
        ("승인", CampaignStatus::Approved),
        ("cancelled", CampaignStatus::Cancelled),
        ("취소", CampaignStatus::Cancelled),
    ])
});

label_conversions!(CampaignStatus, CAMPAIGN_LABELS, "campaign status");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_topic_and_outline_labels_map_to_same_states() {
        for label in ["대기", "주제 승인 대기", "목차 승인 대기", "pending"] {
            assert_eq!(ReviewStatus::from_label(label).unwrap(), ReviewStatus::Pending);
        }
        for label in ["승인", "주제 승인", "목차 승인"] {
            assert_eq!(ReviewStatus::from_label(label).unwrap(), ReviewStatus::Approved);
        }
        for label in ["거절", "주제 반려", "목차 반려"] {
            assert_eq!(ReviewStatus::from_label(label).unwrap(), ReviewStatus::Rejected);
        }
    }

    #[test]
    fn test_unknown_label_is_an_error() {
        let err = ReviewStatus::from_label("보류중").unwrap_err();
        assert_eq!(err.kind, "review status");
        assert!(Role::from_label("owner").is_err());
    }

    #[test]
    fn test_codes_are_case_insensitive() {
        assert_eq!(Role::from_label("SuperAdmin").unwrap(), Role::SuperAdmin);
        assert_eq!(Role::from_label(" EMPLOYEE ").unwrap(), Role::Employee);
    }

    #[test]
    fn test_deserialize_legacy_label_serializes_canonical_code() {
        let status: ReviewStatus = serde_json::from_str("\"주제 승인 대기\"").unwrap();
        assert_eq!(status, ReviewStatus::Pending);
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"pending\"");

        let status: PurchaseStatus = serde_json::from_str("\"승인완료\"").unwrap();
        assert_eq!(status, PurchaseStatus::Approved);
        assert_eq!(serde_json::to_string(&PurchaseStatus::UnderReview).unwrap(), "\"under_review\"");
    }

    #[test]
    fn test_order_request_approval_label_differs() {
        assert_eq!(PurchaseStatus::Approved.label(true), "승인완료");
        assert_eq!(PurchaseStatus::Approved.label(false), "승인됨");
    }

    #[test]
    fn test_every_canonical_code_round_trips_through_table() {
        for status in PurchaseStatus::ALL {
            assert_eq!(PurchaseStatus::from_label(status.code()).unwrap(), status);
        }
        for status in IncentiveStatus::ALL {
            assert_eq!(IncentiveStatus::from_label(status.code()).unwrap(), status);
            assert_eq!(IncentiveStatus::from_label(status.label()).unwrap(), status);
        }
    }
}
