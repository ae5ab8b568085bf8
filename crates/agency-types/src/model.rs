//! Entities of the agency dashboard

use crate::ids::*;
use crate::status::*;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Dashboard account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub company: Option<String>,
    /// Incentive rate in percent; only meaningful for employees and agency admins
    #[serde(default)]
    pub incentive_rate: f64,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl User {
    pub fn new(name: &str, email: &str, role: Role, company: Option<&str>) -> Self {
        Self {
            id: UserId::new(),
            name: name.to_string(),
            email: email.to_string(),
            role,
            company: company.map(str::to_string),
            incentive_rate: 0.0,
            active: true,
        }
    }

    pub fn with_incentive_rate(mut self, rate: f64) -> Self {
        self.incentive_rate = rate;
        self
    }

    /// Company affiliation, treating blank strings as no affiliation
    pub fn company_name(&self) -> Option<&str> {
        self.company.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    /// True when both users carry the same non-empty company
    pub fn same_company(&self, other: &User) -> bool {
        match (self.company_name(), other.company_name()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// Campaign managed by an employee for a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub client_id: UserId,
    pub manager_id: UserId,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub budget: i64,
    pub status: CampaignStatus,
    #[serde(default)]
    pub invoice_issued: bool,
    #[serde(default)]
    pub payment_completed: bool,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub reminders: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Campaign {
    pub fn new(name: &str, client_id: UserId, manager_id: UserId, company: Option<&str>) -> Self {
        Self {
            id: CampaignId::new(),
            name: name.to_string(),
            client_id,
            manager_id,
            company: company.map(str::to_string),
            budget: 0,
            status: CampaignStatus::Draft,
            invoice_issued: false,
            payment_completed: false,
            notes: None,
            reminders: None,
            start_date: None,
            end_date: None,
            created_at: Utc::now(),
            active: true,
        }
    }

    /// The (year, month) a campaign's revenue is attributed to
    pub fn period(&self) -> (i32, u32) {
        let date = self
            .end_date
            .or(self.start_date)
            .unwrap_or_else(|| self.created_at.date_naive());
        (date.year(), date.month())
    }
}

/// Image attached to an outline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostImage {
    pub url: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl PostImage {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            file_name: None,
        }
    }
}

/// Content work item of a campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub campaign_id: CampaignId,
    pub work_type: String,
    pub title: String,
    pub topic_status: ReviewStatus,
    #[serde(default)]
    pub outline: Option<String>,
    #[serde(default)]
    pub outline_status: Option<ReviewStatus>,
    #[serde(default)]
    pub images: Vec<PostImage>,
    #[serde(default)]
    pub published_url: Option<String>,
    #[serde(default)]
    pub order_request_status: Option<OrderRequestStatus>,
    #[serde(default)]
    pub order_request_id: Option<PurchaseRequestId>,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub company: Option<String>,
    /// Price charged to the client
    pub unit_price: i64,
    /// Price the agency pays for the work
    pub cost_price: i64,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Product {
    pub fn new(name: &str, unit_price: i64, cost_price: i64) -> Self {
        Self {
            id: ProductId::new(),
            name: name.to_string(),
            company: None,
            unit_price,
            cost_price,
            active: true,
        }
    }
}

/// Recorded sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub id: SaleId,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
    pub employee_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Revenue of the sale
    pub amount: i64,
    /// Cost the agency owes for the sale; the amount of a linked order request
    pub cost_amount: i64,
    pub sold_at: DateTime<Utc>,
}

/// Purchase request, or an order request when `is_order_request` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub id: PurchaseRequestId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub amount: i64,
    pub resource_type: String,
    #[serde(default)]
    pub priority: Priority,
    pub status: PurchaseStatus,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub requester_id: UserId,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
    #[serde(default)]
    pub post_id: Option<PostId>,
    #[serde(default)]
    pub approver_comment: Option<String>,
    #[serde(default)]
    pub reject_reason: Option<String>,
    #[serde(default)]
    pub is_order_request: bool,
    #[serde(default)]
    pub linked_sale_id: Option<SaleId>,
    #[serde(default)]
    pub agency_admin_id: Option<UserId>,
    /// Amount derived from a source ledger; requesters may not edit it
    #[serde(default)]
    pub amount_locked: bool,
    #[serde(default)]
    pub decided_by: Option<UserId>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseRequest {
    /// A request is urgent when it is due on the day it was created
    pub fn is_urgent(&self) -> bool {
        self.due_date == Some(self.created_at.date_naive())
    }
}

/// Headquarters expenditure ledger entry ("본사 지출")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub id: ExpenseId,
    pub purchase_request_id: PurchaseRequestId,
    #[serde(default)]
    pub company: Option<String>,
    pub amount: i64,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
    pub recorded_by: UserId,
    pub recorded_at: DateTime<Utc>,
}

/// System-wide display switches for incentive amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSettings {
    #[serde(default = "default_true")]
    pub show_incentive_to_staff: bool,
    #[serde(default = "default_true")]
    pub show_incentive_to_agency_admin: bool,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            show_incentive_to_staff: true,
            show_incentive_to_agency_admin: true,
        }
    }
}
