//! Persistence boundary of the workflow engine
//!
//! Stores hand out owned copies; the engine mutates copies and writes them back
//! through [`WorkflowStore::commit`], which applies a whole [`ChangeSet`] or
//! nothing. Incentive records are created through an atomic insert-if-absent.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::InMemoryStore;

use crate::error::{AgencyError, Result};
use crate::paths;
use agency_types::*;
use serde::{Deserialize, Serialize};

/// Writes applied together by [`WorkflowStore::commit`]
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub users: Vec<User>,
    pub campaigns: Vec<Campaign>,
    pub posts: Vec<Post>,
    pub products: Vec<Product>,
    pub sales: Vec<SaleRecord>,
    pub purchase_requests: Vec<PurchaseRequest>,
    /// Ledger entries are append-only; re-inserting an id or a second entry
    /// for the same request fails the whole commit
    pub new_expenses: Vec<ExpenseRecord>,
    /// Updates of existing incentives; creation goes through insert-if-absent
    pub incentives: Vec<MonthlyIncentive>,
    /// Status each request must still have in the store; a mismatch fails the
    /// commit with `PreconditionFailed`
    pub expected_request_statuses: Vec<(PurchaseRequestId, PurchaseStatus)>,
    pub expected_incentive_statuses: Vec<(IncentiveId, IncentiveStatus)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    pub fn campaign(mut self, campaign: Campaign) -> Self {
        self.campaigns.push(campaign);
        self
    }

    pub fn post(mut self, post: Post) -> Self {
        self.posts.push(post);
        self
    }

    pub fn product(mut self, product: Product) -> Self {
        self.products.push(product);
        self
    }

    pub fn sale(mut self, sale: SaleRecord) -> Self {
        self.sales.push(sale);
        self
    }

    pub fn purchase_request(mut self, request: PurchaseRequest) -> Self {
        self.purchase_requests.push(request);
        self
    }

    pub fn expense(mut self, expense: ExpenseRecord) -> Self {
        self.new_expenses.push(expense);
        self
    }

    pub fn incentive(mut self, incentive: MonthlyIncentive) -> Self {
        self.incentives.push(incentive);
        self
    }

    pub fn expect_request_status(mut self, id: &PurchaseRequestId, status: PurchaseStatus) -> Self {
        self.expected_request_statuses.push((id.clone(), status));
        self
    }

    pub fn expect_incentive_status(mut self, id: &IncentiveId, status: IncentiveStatus) -> Self {
        self.expected_incentive_statuses.push((id.clone(), status));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.campaigns.is_empty()
            && self.posts.is_empty()
            && self.products.is_empty()
            && self.sales.is_empty()
            && self.purchase_requests.is_empty()
            && self.new_expenses.is_empty()
            && self.incentives.is_empty()
    }
}

/// Result of an insert-if-absent
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists(IncentiveId),
}

/// Full data export used for seeding and backups
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
    #[serde(default)]
    pub posts: Vec<Post>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub sales: Vec<SaleRecord>,
    #[serde(default)]
    pub purchase_requests: Vec<PurchaseRequest>,
    #[serde(default)]
    pub expenses: Vec<ExpenseRecord>,
    #[serde(default)]
    pub incentives: Vec<MonthlyIncentive>,
}

/// Storage collaborator of the engine
pub trait WorkflowStore: Send + Sync {
    fn get_user(&self, id: &UserId) -> Result<Option<User>>;
    fn list_users(&self) -> Result<Vec<User>>;

    fn get_campaign(&self, id: &CampaignId) -> Result<Option<Campaign>>;
    fn list_campaigns(&self) -> Result<Vec<Campaign>>;

    fn get_post(&self, id: &PostId) -> Result<Option<Post>>;
    fn list_posts(&self, campaign_id: &CampaignId) -> Result<Vec<Post>>;

    fn get_product(&self, id: &ProductId) -> Result<Option<Product>>;
    fn list_products(&self) -> Result<Vec<Product>>;

    fn get_sale(&self, id: &SaleId) -> Result<Option<SaleRecord>>;
    fn list_sales(&self) -> Result<Vec<SaleRecord>>;

    fn get_purchase_request(&self, id: &PurchaseRequestId) -> Result<Option<PurchaseRequest>>;
    fn list_purchase_requests(&self) -> Result<Vec<PurchaseRequest>>;

    fn list_expenses(&self) -> Result<Vec<ExpenseRecord>>;

    fn get_incentive(&self, id: &IncentiveId) -> Result<Option<MonthlyIncentive>>;
    fn find_incentive(&self, key: &IncentiveKey) -> Result<Option<MonthlyIncentive>>;
    fn list_incentives(&self) -> Result<Vec<MonthlyIncentive>>;

    /// Atomically create the record unless one exists for its (user, year, month)
    fn insert_incentive_if_absent(&self, incentive: &MonthlyIncentive) -> Result<InsertOutcome>;

    /// Apply every change or none of them
    fn commit(&self, changes: ChangeSet) -> Result<()>;

    /// Load a snapshot; existing incentive keys are left untouched
    fn import(&self, snapshot: Snapshot) -> Result<usize> {
        let mut changes = ChangeSet {
            users: snapshot.users,
            campaigns: snapshot.campaigns,
            posts: snapshot.posts,
            products: snapshot.products,
            sales: snapshot.sales,
            purchase_requests: snapshot.purchase_requests,
            ..Default::default()
        };

        let existing_expenses = self.list_expenses()?;
        changes.new_expenses = snapshot
            .expenses
            .into_iter()
            .filter(|e| !existing_expenses.iter().any(|x| x.id == e.id))
            .collect();

        let mut imported = changes.users.len()
            + changes.campaigns.len()
            + changes.posts.len()
            + changes.products.len()
            + changes.sales.len()
            + changes.purchase_requests.len()
            + changes.new_expenses.len();

        self.commit(changes)?;

        for mut incentive in snapshot.incentives {
            incentive.normalize();
            if self.insert_incentive_if_absent(&incentive)? == InsertOutcome::Inserted {
                imported += 1;
            }
        }

        Ok(imported)
    }

    /// Export everything the store holds
    fn snapshot(&self) -> Result<Snapshot> {
        let campaigns = self.list_campaigns()?;
        let mut posts = Vec::new();
        for campaign in &campaigns {
            posts.extend(self.list_posts(&campaign.id)?);
        }

        Ok(Snapshot {
            users: self.list_users()?,
            campaigns,
            posts,
            products: self.list_products()?,
            sales: self.list_sales()?,
            purchase_requests: self.list_purchase_requests()?,
            expenses: self.list_expenses()?,
            incentives: self.list_incentives()?,
        })
    }
}

/// Stored state a commit is validated against
pub(crate) struct Stored<'a> {
    pub expenses: &'a [ExpenseRecord],
    pub request_status: &'a dyn Fn(&PurchaseRequestId) -> Option<PurchaseStatus>,
    pub incentive_status: &'a dyn Fn(&IncentiveId) -> Option<IncentiveStatus>,
}

fn check_id(kind: &str, id: &str) -> Result<()> {
    if paths::is_valid_id(id) {
        return Ok(());
    }
    Err(AgencyError::Validation(format!(
        "{} id {:?} may only contain letters, digits, '-' and '_'",
        kind, id
    )))
}

fn check_amount(kind: &str, id: &impl std::fmt::Display, amount: i64) -> Result<()> {
    if amount < 0 {
        return Err(AgencyError::Validation(format!("{} {} has a negative amount {}", kind, id, amount)));
    }
    Ok(())
}

/// Ids end up in file names; every store enforces the same character set
fn check_ids(changes: &ChangeSet) -> Result<()> {
    for user in &changes.users {
        check_id("User", user.id.as_str())?;
    }
    for campaign in &changes.campaigns {
        check_id("Campaign", campaign.id.as_str())?;
    }
    for post in &changes.posts {
        check_id("Post", post.id.as_str())?;
    }
    for product in &changes.products {
        check_id("Product", product.id.as_str())?;
    }
    for sale in &changes.sales {
        check_id("Sale", sale.id.as_str())?;
    }
    for request in &changes.purchase_requests {
        check_id("Purchase request", request.id.as_str())?;
    }
    for expense in &changes.new_expenses {
        check_id("Expense", expense.id.as_str())?;
    }
    for incentive in &changes.incentives {
        check_incentive_identity(incentive)?;
    }
    Ok(())
}

pub(crate) fn check_incentive_identity(incentive: &MonthlyIncentive) -> Result<()> {
    check_id("Incentive", incentive.id.as_str())?;
    check_id("User", incentive.user_id.as_str())?;
    if !(1..=9999).contains(&incentive.year) || !(1..=12).contains(&incentive.month) {
        return Err(AgencyError::Validation(format!(
            "Incentive {} has an invalid period {}-{}",
            incentive.id, incentive.year, incentive.month
        )));
    }
    Ok(())
}

fn check_amounts(changes: &ChangeSet) -> Result<()> {
    for product in &changes.products {
        check_amount("Product", &product.id, product.unit_price)?;
        check_amount("Product", &product.id, product.cost_price)?;
    }
    for sale in &changes.sales {
        check_amount("Sale", &sale.id, sale.amount)?;
        check_amount("Sale", &sale.id, sale.cost_amount)?;
    }
    for request in &changes.purchase_requests {
        check_amount("Purchase request", &request.id, request.amount)?;
    }
    for expense in &changes.new_expenses {
        check_amount("Expense", &expense.id, expense.amount)?;
    }
    Ok(())
}

/// Requests and incentives the caller read must not have moved since
fn check_expectations(changes: &ChangeSet, stored: &Stored<'_>) -> Result<()> {
    for (id, expected) in &changes.expected_request_statuses {
        let actual = (stored.request_status)(id);
        if actual != Some(*expected) {
            log::warn!("Request {} changed concurrently: expected {:?}, found {:?}", id, expected, actual);
            return Err(AgencyError::PreconditionFailed(format!(
                "Purchase request {} was changed by someone else; reload and retry",
                id
            )));
        }
    }

    for (id, expected) in &changes.expected_incentive_statuses {
        let actual = (stored.incentive_status)(id);
        if actual != Some(*expected) {
            log::warn!("Incentive {} changed concurrently: expected {:?}, found {:?}", id, expected, actual);
            return Err(AgencyError::PreconditionFailed(format!(
                "Incentive {} was changed by someone else; reload and retry",
                id
            )));
        }
    }

    Ok(())
}

/// Checks shared by every store before a commit touches anything.
///
/// Fails with `Validation` for malformed records, `PreconditionFailed` when an
/// expected status no longer holds and `Persistence` when the commit would
/// break a ledger or consistency invariant.
pub(crate) fn validate_changes(changes: &ChangeSet, stored: &Stored<'_>) -> Result<()> {
    check_ids(changes)?;
    check_amounts(changes)?;
    check_expectations(changes, stored)?;

    let existing_expenses = stored.expenses;

    for (i, expense) in changes.new_expenses.iter().enumerate() {
        let duplicate_id = existing_expenses.iter().any(|e| e.id == expense.id)
            || changes.new_expenses[..i].iter().any(|e| e.id == expense.id);
        if duplicate_id {
            return Err(AgencyError::Persistence(format!(
                "Expense record {} already exists",
                expense.id
            )));
        }

        let already_booked = existing_expenses
            .iter()
            .chain(changes.new_expenses[..i].iter())
            .any(|e| e.purchase_request_id == expense.purchase_request_id);
        if already_booked {
            return Err(AgencyError::Persistence(format!(
                "Purchase request {} already has an expense record",
                expense.purchase_request_id
            )));
        }
    }

    for request in &changes.purchase_requests {
        let booked = existing_expenses
            .iter()
            .chain(changes.new_expenses.iter())
            .any(|e| e.purchase_request_id == request.id);

        // An order request is approved exactly when its ledger entry exists
        if request.is_order_request && request.status == PurchaseStatus::Approved && !booked {
            return Err(AgencyError::Persistence(format!(
                "Approved order request {} has no expense record",
                request.id
            )));
        }
        if request.is_order_request && request.status != PurchaseStatus::Approved && booked {
            return Err(AgencyError::Persistence(format!(
                "Order request {} has a booked expense and must stay approved",
                request.id
            )));
        }

        if request.status == PurchaseStatus::Rejected
            && request.reject_reason.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(AgencyError::Persistence(format!(
                "Rejected purchase request {} has no reject reason",
                request.id
            )));
        }
    }

    for incentive in &changes.incentives {
        if (stored.incentive_status)(&incentive.id).is_none() {
            return Err(AgencyError::Persistence(format!(
                "Incentive {} does not exist; create it with insert_incentive_if_absent",
                incentive.id
            )));
        }
        if !incentive.is_consistent() {
            return Err(AgencyError::Persistence(format!(
                "Incentive {} final amount does not match base + adjustment",
                incentive.id
            )));
        }
    }

    for post in &changes.posts {
        if post.outline.is_some() != post.outline_status.is_some() {
            return Err(AgencyError::Persistence(format!(
                "Post {} must set outline and outline status together",
                post.id
            )));
        }
    }

    Ok(())
}
