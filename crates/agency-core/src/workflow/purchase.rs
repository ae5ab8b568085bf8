//! Purchase and order request workflow
//!
//! Plain purchase requests walk Pending -> review -> Approved -> Purchased ->
//! Settled. Order requests are the agency-internal variant: they start in
//! OrderPending and approving one books a headquarters expense in the same
//! store commit as the status change.

use super::content;
use super::engine::WorkflowEngine;
use crate::error::{AgencyError, Result};
use crate::events::{EventType, WorkflowEvent};
use crate::permissions::{self, Permission};
use crate::store::ChangeSet;
use agency_types::*;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;

/// Whether `from -> to` is a legal move for the given request kind
pub fn can_transition(from: PurchaseStatus, to: PurchaseStatus, is_order_request: bool) -> bool {
    use PurchaseStatus::*;

    if is_order_request {
        return matches!((from, to), (OrderPending, Approved) | (OrderPending, Rejected));
    }

    matches!(
        (from, to),
        (Pending, UnderReview)
            | (Pending, Approved)
            | (Pending, Rejected)
            | (Pending, OnHold)
            | (UnderReview, Approved)
            | (UnderReview, Rejected)
            | (UnderReview, OnHold)
            | (OnHold, Approved)
            | (OnHold, Rejected)
            | (OnHold, UnderReview)
            | (Approved, Purchased)
            | (Purchased, Settled)
    )
}

/// Still awaiting a decision, so the requester may edit it
pub fn is_open(status: PurchaseStatus) -> bool {
    matches!(
        status,
        PurchaseStatus::Pending | PurchaseStatus::UnderReview | PurchaseStatus::OnHold | PurchaseStatus::OrderPending
    )
}

/// Input for a plain purchase request
#[derive(Debug, Clone, Default)]
pub struct PurchaseRequestDraft {
    pub title: String,
    pub description: String,
    /// Derived from the campaign's task costs when absent
    pub amount: Option<i64>,
    pub resource_type: String,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    /// Due on the day of the request; overrides `due_date`
    pub urgent: bool,
    pub campaign_id: Option<CampaignId>,
    pub post_id: Option<PostId>,
}

/// Input for an order request raised from a post or a sale
#[derive(Debug, Clone, Default)]
pub struct OrderDraft {
    pub title: Option<String>,
    pub description: String,
    /// Ignored for sales, whose cost amount is authoritative
    pub amount: Option<i64>,
    pub due_date: Option<NaiveDate>,
}

/// Σ cost_price × quantity over posts that name a product; no quantity means one unit
pub fn campaign_task_cost(posts: &[Post], products: &HashMap<ProductId, Product>) -> Result<i64> {
    priced_total(posts, products, |product| product.cost_price)
}

pub(crate) fn post_units(post: &Post) -> i64 {
    i64::from(post.quantity.unwrap_or(1))
}

fn line_amount(price: i64, post: &Post) -> Result<i64> {
    price.checked_mul(post_units(post)).ok_or_else(|| {
        AgencyError::Validation(format!("Amount of post {} is out of range", post.id))
    })
}

/// Σ price × units over the posts whose product is known
pub(crate) fn priced_total(
    posts: &[Post],
    products: &HashMap<ProductId, Product>,
    price: impl Fn(&Product) -> i64,
) -> Result<i64> {
    let mut total: i64 = 0;
    for post in posts {
        let product = match post.product_id.as_ref().and_then(|id| products.get(id)) {
            Some(product) => product,
            None => continue,
        };
        total = total
            .checked_add(line_amount(price(product), post)?)
            .ok_or_else(|| AgencyError::Validation("Total amount is out of range".to_string()))?;
    }
    Ok(total)
}

fn validate_amount(amount: i64) -> Result<i64> {
    if amount < 0 {
        return Err(AgencyError::Validation(format!("Amount must not be negative, got {}", amount)));
    }
    Ok(amount)
}

pub fn set_urgent(request: &mut PurchaseRequest, urgent: bool) {
    let created = request.created_at.date_naive();
    if urgent {
        request.due_date = Some(created);
    } else if request.is_urgent() {
        request.due_date = None;
    }
    request.updated_at = Utc::now();
}

pub fn set_due_date(request: &mut PurchaseRequest, due_date: Option<NaiveDate>) {
    request.due_date = due_date;
    request.updated_at = Utc::now();
}

fn blank_request(title: String, requester: &User, is_order_request: bool) -> PurchaseRequest {
    let now = Utc::now();
    PurchaseRequest {
        id: PurchaseRequestId::new(),
        title,
        description: String::new(),
        amount: 0,
        resource_type: String::new(),
        priority: Priority::Normal,
        status: if is_order_request {
            PurchaseStatus::OrderPending
        } else {
            PurchaseStatus::Pending
        },
        due_date: None,
        requester_id: requester.id.clone(),
        campaign_id: None,
        post_id: None,
        approver_comment: None,
        reject_reason: None,
        is_order_request,
        linked_sale_id: None,
        agency_admin_id: None,
        amount_locked: false,
        decided_by: None,
        decided_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn non_empty(value: &str, what: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AgencyError::Validation(format!("{} must not be empty", what)));
    }
    Ok(value.to_string())
}

fn denied(actor: &User, action: &str, request_id: &PurchaseRequestId) -> AgencyError {
    log::warn!("User {} ({}) may not {} request {}", actor.id, actor.role, action, request_id);
    AgencyError::PermissionDenied(format!("User {} may not {} request {}", actor.id, action, request_id))
}

impl WorkflowEngine {
    /// Agency admin of the requester's company who handles its order requests
    fn responsible_agency_admin(&self, requester: &User) -> Result<Option<UserId>> {
        if requester.role == Role::AgencyAdmin {
            return Ok(Some(requester.id.clone()));
        }

        Ok(self
            .store()
            .list_users()?
            .into_iter()
            .find(|u| u.active && u.role == Role::AgencyAdmin && u.same_company(requester))
            .map(|u| u.id))
    }

    fn campaign_cost(&self, campaign_id: &CampaignId) -> Result<i64> {
        let posts = self.store().list_posts(campaign_id)?;
        let products: HashMap<ProductId, Product> = self
            .store()
            .list_products()?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        campaign_task_cost(&posts, &products)
    }

    /// The requester or one of its approvers may edit an open request
    fn authorize_request_edit(&self, request: &PurchaseRequest, actor: &User) -> Result<()> {
        let requester = self.load_user(&request.requester_id)?;
        let own = actor.active && actor.id == request.requester_id;
        if own || permissions::can_approve_purchase_request(actor, request, &requester) {
            return Ok(());
        }
        Err(denied(actor, "edit", &request.id))
    }

    fn ensure_open(request: &PurchaseRequest) -> Result<()> {
        if !is_open(request.status) {
            return Err(AgencyError::PreconditionFailed(format!(
                "Request {} is {} and can no longer be edited",
                request.id,
                request.status.label(request.is_order_request)
            )));
        }
        Ok(())
    }

    pub fn create_purchase_request(&self, draft: PurchaseRequestDraft, actor: &User) -> Result<PurchaseRequest> {
        if !permissions::grants(actor, Permission::PurchaseCreate) {
            log::warn!("User {} ({}) may not create purchase requests", actor.id, actor.role);
            return Err(AgencyError::PermissionDenied(format!(
                "User {} may not create purchase requests",
                actor.id
            )));
        }

        if let Some(campaign_id) = &draft.campaign_id {
            let campaign = self.load_campaign(campaign_id)?;
            if !permissions::can_view_campaign(actor, &campaign) {
                return Err(AgencyError::PermissionDenied(format!(
                    "User {} may not request purchases for campaign {}",
                    actor.id, campaign.id
                )));
            }
        }
        if let Some(post_id) = &draft.post_id {
            self.load_post(post_id)?;
        }

        let title = non_empty(&draft.title, "Title")?;
        let resource_type = non_empty(&draft.resource_type, "Resource type")?;
        let amount = match (draft.amount, &draft.campaign_id) {
            (Some(amount), _) => validate_amount(amount)?,
            (None, Some(campaign_id)) => validate_amount(self.campaign_cost(campaign_id)?)?,
            (None, None) => {
                return Err(AgencyError::Validation(
                    "Amount is required when no campaign is given".to_string(),
                ))
            }
        };

        let mut request = blank_request(title, actor, false);
        request.description = draft.description.trim().to_string();
        request.amount = amount;
        request.resource_type = resource_type;
        request.priority = draft.priority;
        request.campaign_id = draft.campaign_id;
        request.post_id = draft.post_id;
        request.agency_admin_id = self.responsible_agency_admin(actor)?;
        set_due_date(&mut request, draft.due_date);
        if draft.urgent {
            set_urgent(&mut request, true);
        }

        self.commit(ChangeSet::new().purchase_request(request.clone()))?;

        log::info!("Created purchase request {} ({} KRW) by {}", request.id, request.amount, actor.id);
        self.emit(
            WorkflowEvent::new(
                EventType::PurchaseRequestCreated,
                "구매 요청",
                format!("'{}' 구매 요청이 등록되었습니다", request.title),
            )
            .related(&request.id)
            .notify(&[Role::AgencyAdmin, Role::SuperAdmin]),
        );

        Ok(request)
    }

    /// Raise an order request for a post's product work
    pub fn request_order_for_post(&self, post_id: &PostId, draft: OrderDraft, actor: &User) -> Result<PurchaseRequest> {
        let mut post = self.load_post(post_id)?;
        let campaign = self.load_campaign(&post.campaign_id)?;

        if !permissions::grants(actor, Permission::OrderRequest) || !permissions::can_edit_campaign(actor, &campaign) {
            log::warn!("User {} may not order work for post {}", actor.id, post.id);
            return Err(AgencyError::PermissionDenied(format!(
                "User {} may not order work for post {}",
                actor.id, post.id
            )));
        }

        let amount = match draft.amount {
            Some(amount) => validate_amount(amount)?,
            None => {
                let product_id = post.product_id.clone().ok_or_else(|| {
                    AgencyError::Validation(format!("Post {} has no product to derive an amount from", post.id))
                })?;
                let product = self.load_product(&product_id)?;
                validate_amount(line_amount(product.cost_price, &post)?)?
            }
        };

        let title = match draft.title.as_deref() {
            Some(title) => non_empty(title, "Title")?,
            None => post.title.clone(),
        };

        let mut request = blank_request(title, actor, true);
        request.description = draft.description.trim().to_string();
        request.amount = amount;
        request.resource_type = post.work_type.clone();
        request.campaign_id = Some(campaign.id.clone());
        request.post_id = Some(post.id.clone());
        request.agency_admin_id = self.responsible_agency_admin(actor)?;
        set_due_date(&mut request, draft.due_date.or(post.due_date));

        content::begin_order_request(&mut post, request.id.clone())?;

        self.commit(
            ChangeSet::new()
                .purchase_request(request.clone())
                .post(post.clone()),
        )?;

        log::info!("Order request {} raised for post {}", request.id, post.id);
        self.emit(
            WorkflowEvent::new(
                EventType::OrderRequested,
                "발주 요청",
                format!("'{}' 발주 요청이 등록되었습니다", request.title),
            )
            .related(&request.id)
            .related(&post.id)
            .notify(&[Role::AgencyAdmin]),
        );

        Ok(request)
    }

    /// Raise an order request whose amount is locked to a sale's cost
    pub fn request_order_for_sale(&self, sale_id: &SaleId, draft: OrderDraft, actor: &User) -> Result<PurchaseRequest> {
        let sale = self.load_sale(sale_id)?;
        let product = self.load_product(&sale.product_id)?;

        if !permissions::can_order_for_sale(actor, &sale) {
            log::warn!("User {} may not order work for sale {}", actor.id, sale.id);
            return Err(AgencyError::PermissionDenied(format!(
                "User {} may not order work for sale {}",
                actor.id, sale.id
            )));
        }

        let duplicate = self.store().list_purchase_requests()?.into_iter().find(|r| {
            r.linked_sale_id.as_ref() == Some(&sale.id) && r.status != PurchaseStatus::Rejected
        });
        if let Some(existing) = duplicate {
            return Err(AgencyError::PreconditionFailed(format!(
                "Sale {} already has order request {}",
                sale.id, existing.id
            )));
        }

        let title = match draft.title.as_deref() {
            Some(title) => non_empty(title, "Title")?,
            None => format!("{} x{}", product.name, sale.quantity),
        };

        let mut request = blank_request(title, actor, true);
        request.description = draft.description.trim().to_string();
        request.amount = validate_amount(sale.cost_amount)?;
        request.amount_locked = true;
        request.resource_type = product.name.clone();
        request.campaign_id = sale.campaign_id.clone();
        request.linked_sale_id = Some(sale.id.clone());
        request.agency_admin_id = self.responsible_agency_admin(actor)?;
        set_due_date(&mut request, draft.due_date);

        self.commit(ChangeSet::new().purchase_request(request.clone()))?;

        log::info!("Order request {} raised for sale {}", request.id, sale.id);
        self.emit(
            WorkflowEvent::new(
                EventType::OrderRequested,
                "발주 요청",
                format!("'{}' 발주 요청이 등록되었습니다", request.title),
            )
            .related(&request.id)
            .related(&sale.id)
            .notify(&[Role::AgencyAdmin]),
        );

        Ok(request)
    }

    pub fn update_purchase_amount(
        &self,
        request_id: &PurchaseRequestId,
        amount: i64,
        actor: &User,
    ) -> Result<PurchaseRequest> {
        let mut request = self.load_request(request_id)?;
        self.authorize_request_edit(&request, actor)?;

        if request.amount_locked {
            return Err(AgencyError::Validation(format!(
                "Amount of request {} is fixed by its linked sale",
                request.id
            )));
        }
        request.amount = validate_amount(amount)?;
        Self::ensure_open(&request)?;

        request.updated_at = Utc::now();
        self.commit(
            ChangeSet::new()
                .expect_request_status(&request.id, request.status)
                .purchase_request(request.clone()),
        )?;

        log::info!("Amount of request {} set to {}", request.id, request.amount);
        self.emit(
            WorkflowEvent::new(
                EventType::PurchaseRequestUpdated,
                "구매 요청 수정",
                format!("'{}' 금액이 {}원으로 변경되었습니다", request.title, request.amount),
            )
            .related(&request.id),
        );

        Ok(request)
    }

    pub fn set_purchase_urgent(&self, request_id: &PurchaseRequestId, urgent: bool, actor: &User) -> Result<PurchaseRequest> {
        let mut request = self.load_request(request_id)?;
        self.authorize_request_edit(&request, actor)?;
        Self::ensure_open(&request)?;

        set_urgent(&mut request, urgent);
        self.commit(
            ChangeSet::new()
                .expect_request_status(&request.id, request.status)
                .purchase_request(request.clone()),
        )?;

        log::info!("Request {} urgent: {}", request.id, request.is_urgent());
        Ok(request)
    }

    pub fn set_purchase_due_date(
        &self,
        request_id: &PurchaseRequestId,
        due_date: Option<NaiveDate>,
        actor: &User,
    ) -> Result<PurchaseRequest> {
        let mut request = self.load_request(request_id)?;
        self.authorize_request_edit(&request, actor)?;
        Self::ensure_open(&request)?;

        set_due_date(&mut request, due_date);
        self.commit(
            ChangeSet::new()
                .expect_request_status(&request.id, request.status)
                .purchase_request(request.clone()),
        )?;

        log::info!("Request {} due date set to {:?}", request.id, request.due_date);
        Ok(request)
    }

    /// Move a request to `decision`. `note` is the reject reason for
    /// rejections and the approver comment otherwise.
    pub fn decide_purchase_request(
        &self,
        request_id: &PurchaseRequestId,
        decision: PurchaseStatus,
        note: Option<&str>,
        actor: &User,
    ) -> Result<PurchaseRequest> {
        let mut request = self.load_request(request_id)?;

        if request.is_order_request && decision == PurchaseStatus::Approved {
            return self.approve_order_request(request_id, actor).map(|(request, _)| request);
        }

        let requester = self.load_user(&request.requester_id)?;
        let permission = if request.is_order_request {
            Permission::OrderApprove
        } else {
            Permission::PurchaseApprove
        };
        if !permissions::grants(actor, permission)
            || !permissions::can_approve_purchase_request(actor, &request, &requester)
        {
            return Err(denied(actor, "decide", &request.id));
        }

        let note = note.map(str::trim).filter(|n| !n.is_empty());
        if decision == PurchaseStatus::Rejected && note.is_none() {
            return Err(AgencyError::Validation(format!(
                "Rejecting request {} requires a reason",
                request.id
            )));
        }

        if !can_transition(request.status, decision, request.is_order_request) {
            return Err(AgencyError::PreconditionFailed(format!(
                "Request {} cannot move from {} to {}",
                request.id,
                request.status.label(request.is_order_request),
                decision.label(request.is_order_request)
            )));
        }

        let prior = request.status;
        let now = Utc::now();
        request.status = decision;
        if decision == PurchaseStatus::Rejected {
            request.reject_reason = note.map(str::to_string);
        } else if let Some(note) = note {
            request.approver_comment = Some(note.to_string());
        }
        request.decided_by = Some(actor.id.clone());
        request.decided_at = Some(now);
        request.updated_at = now;

        let mut changes = ChangeSet::new()
            .expect_request_status(&request.id, prior)
            .purchase_request(request.clone());
        if request.is_order_request {
            if let Some(post) = self.linked_post_with_pending_order(&request)? {
                changes = changes.post(post);
            }
        }
        self.commit(changes)?;

        log::info!(
            "Request {} moved to {} by {}",
            request.id,
            request.status.code(),
            actor.id
        );
        self.emit(
            WorkflowEvent::new(
                EventType::PurchaseRequestDecided,
                format!("요청 {}", request.status.label(request.is_order_request)),
                format!(
                    "'{}' 요청이 {} 처리되었습니다",
                    request.title,
                    request.status.label(request.is_order_request)
                ),
            )
            .related(&request.id)
            .notify(&[Role::Employee]),
        );

        Ok(request)
    }

    /// The request's post, with the decision mirrored, when it still points at this request
    fn linked_post_with_pending_order(&self, request: &PurchaseRequest) -> Result<Option<Post>> {
        let post_id = match &request.post_id {
            Some(id) => id,
            None => return Ok(None),
        };
        let mut post = match self.store().get_post(post_id)? {
            Some(post) => post,
            None => return Ok(None),
        };

        if post.order_request_id.as_ref() != Some(&request.id) {
            log::debug!("Post {} tracks a different order request; not mirroring", post.id);
            return Ok(None);
        }

        content::resolve_order_request(&mut post, &request.id, request.status == PurchaseStatus::Approved)?;
        Ok(Some(post))
    }

    /// Approve an order request and book its expense in one commit
    pub fn approve_order_request(
        &self,
        request_id: &PurchaseRequestId,
        actor: &User,
    ) -> Result<(PurchaseRequest, ExpenseRecord)> {
        let mut request = self.load_request(request_id)?;
        let requester = self.load_user(&request.requester_id)?;

        if !permissions::grants(actor, Permission::OrderApprove)
            || !permissions::can_approve_purchase_request(actor, &request, &requester)
        {
            return Err(denied(actor, "approve", &request.id));
        }

        if !request.is_order_request {
            return Err(AgencyError::PreconditionFailed(format!(
                "Request {} is not an order request",
                request.id
            )));
        }
        if !can_transition(request.status, PurchaseStatus::Approved, true) {
            return Err(AgencyError::PreconditionFailed(format!(
                "Order request {} is {}, not pending",
                request.id,
                request.status.label(true)
            )));
        }

        let now = Utc::now();
        request.status = PurchaseStatus::Approved;
        request.decided_by = Some(actor.id.clone());
        request.decided_at = Some(now);
        request.updated_at = now;

        let expense = ExpenseRecord {
            id: ExpenseId::new(),
            purchase_request_id: request.id.clone(),
            company: requester.company_name().map(str::to_string),
            amount: request.amount,
            category: request.resource_type.clone(),
            description: request.title.clone(),
            campaign_id: request.campaign_id.clone(),
            recorded_by: actor.id.clone(),
            recorded_at: now,
        };

        let mut changes = ChangeSet::new()
            .expect_request_status(&request.id, PurchaseStatus::OrderPending)
            .purchase_request(request.clone())
            .expense(expense.clone());
        if let Some(post) = self.linked_post_with_pending_order(&request)? {
            changes = changes.post(post);
        }
        self.commit(changes)?;

        log::info!(
            "Order request {} approved by {}; expense {} booked ({} KRW)",
            request.id,
            actor.id,
            expense.id,
            expense.amount
        );
        self.emit(
            WorkflowEvent::new(
                EventType::OrderApproved,
                "발주 승인",
                format!("'{}' 발주가 승인되었습니다", request.title),
            )
            .related(&request.id)
            .related(&expense.id)
            .notify(&[Role::Employee, Role::SuperAdmin]),
        );

        Ok((request, expense))
    }

    /// Requests the actor may see, oldest first
    pub fn visible_purchase_requests(&self, actor: &User) -> Result<Vec<PurchaseRequest>> {
        let users: HashMap<UserId, User> = self
            .store()
            .list_users()?
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect();

        Ok(self
            .store()
            .list_purchase_requests()?
            .into_iter()
            .filter(|r| {
                users
                    .get(&r.requester_id)
                    .map(|requester| permissions::can_view_purchase_request(actor, r, requester))
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Headquarters expenses scoped to the actor's company
    pub fn expense_ledger(&self, actor: &User) -> Result<Vec<ExpenseRecord>> {
        if !permissions::grants(actor, Permission::ExpenseView) {
            log::warn!("User {} ({}) may not view the expense ledger", actor.id, actor.role);
            return Err(AgencyError::PermissionDenied(format!(
                "User {} may not view the expense ledger",
                actor.id
            )));
        }

        Ok(self
            .store()
            .list_expenses()?
            .into_iter()
            .filter(|e| permissions::can_view_expense(actor, e))
            .collect())
    }
}
