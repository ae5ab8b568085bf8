use agency_core::store::{ChangeSet, InMemoryStore, InsertOutcome, WorkflowStore};
use agency_core::{
    AgencyError, ContentStage, NullSink, OrderDraft, PostDraft, PurchaseRequestDraft, ReviewDecision, WorkflowEngine,
};
use agency_types::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Delegates to an in-memory store but can be told to fail ledger commits or
/// to hand out products with a cost price that was written outside the engine
struct FlakyLedgerStore {
    inner: InMemoryStore,
    fail_expense_commits: AtomicBool,
    cost_price_on_read: Mutex<Option<i64>>,
}

impl FlakyLedgerStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            fail_expense_commits: AtomicBool::new(false),
            cost_price_on_read: Mutex::new(None),
        }
    }

    fn as_read(&self, mut product: Product) -> Product {
        if let Some(cost_price) = *self.cost_price_on_read.lock().unwrap() {
            product.cost_price = cost_price;
        }
        product
    }
}

impl WorkflowStore for FlakyLedgerStore {
    fn get_user(&self, id: &UserId) -> agency_core::Result<Option<User>> {
        self.inner.get_user(id)
    }
    fn list_users(&self) -> agency_core::Result<Vec<User>> {
        self.inner.list_users()
    }
    fn get_campaign(&self, id: &CampaignId) -> agency_core::Result<Option<Campaign>> {
        self.inner.get_campaign(id)
    }
    fn list_campaigns(&self) -> agency_core::Result<Vec<Campaign>> {
        self.inner.list_campaigns()
    }
    fn get_post(&self, id: &PostId) -> agency_core::Result<Option<Post>> {
        self.inner.get_post(id)
    }
    fn list_posts(&self, campaign_id: &CampaignId) -> agency_core::Result<Vec<Post>> {
        self.inner.list_posts(campaign_id)
    }
    fn get_product(&self, id: &ProductId) -> agency_core::Result<Option<Product>> {
        Ok(self.inner.get_product(id)?.map(|p| self.as_read(p)))
    }
    fn list_products(&self) -> agency_core::Result<Vec<Product>> {
        Ok(self.inner.list_products()?.into_iter().map(|p| self.as_read(p)).collect())
    }
    fn get_sale(&self, id: &SaleId) -> agency_core::Result<Option<SaleRecord>> {
        self.inner.get_sale(id)
    }
    fn list_sales(&self) -> agency_core::Result<Vec<SaleRecord>> {
        self.inner.list_sales()
    }
    fn get_purchase_request(&self, id: &PurchaseRequestId) -> agency_core::Result<Option<PurchaseRequest>> {
        self.inner.get_purchase_request(id)
    }
    fn list_purchase_requests(&self) -> agency_core::Result<Vec<PurchaseRequest>> {
        self.inner.list_purchase_requests()
    }
    fn list_expenses(&self) -> agency_core::Result<Vec<ExpenseRecord>> {
        self.inner.list_expenses()
    }
    fn get_incentive(&self, id: &IncentiveId) -> agency_core::Result<Option<MonthlyIncentive>> {
        self.inner.get_incentive(id)
    }
    fn find_incentive(&self, key: &IncentiveKey) -> agency_core::Result<Option<MonthlyIncentive>> {
        self.inner.find_incentive(key)
    }
    fn list_incentives(&self) -> agency_core::Result<Vec<MonthlyIncentive>> {
        self.inner.list_incentives()
    }
    fn insert_incentive_if_absent(&self, incentive: &MonthlyIncentive) -> agency_core::Result<InsertOutcome> {
        self.inner.insert_incentive_if_absent(incentive)
    }
    fn commit(&self, changes: ChangeSet) -> agency_core::Result<()> {
        if !changes.new_expenses.is_empty() && self.fail_expense_commits.load(Ordering::SeqCst) {
            return Err(AgencyError::Persistence("ledger unavailable".to_string()));
        }
        self.inner.commit(changes)
    }
}

struct Fixture {
    engine: WorkflowEngine,
    store: Arc<FlakyLedgerStore>,
    client: User,
    employee: User,
    agency_admin: User,
    other_admin: User,
    campaign: Campaign,
    product: Product,
}

fn fixture() -> Fixture {
    let store = Arc::new(FlakyLedgerStore::new());

    let client = User::new("고객사", "client@brand.kr", Role::Client, Some("Acme"));
    let employee = User::new("김직원", "staff@acme.kr", Role::Employee, Some("Acme"));
    let agency_admin = User::new("이관리", "admin@acme.kr", Role::AgencyAdmin, Some("Acme"));
    let other_admin = User::new("박관리", "admin@other.kr", Role::AgencyAdmin, Some("Other"));
    let campaign = Campaign::new("봄 캠페인", client.id.clone(), employee.id.clone(), Some("Acme"));
    let product = Product::new("블로그 포스팅", 100_000, 40_000);

    store
        .commit(
            ChangeSet::new()
                .user(client.clone())
                .user(employee.clone())
                .user(agency_admin.clone())
                .user(other_admin.clone())
                .campaign(campaign.clone())
                .product(product.clone()),
        )
        .unwrap();

    Fixture {
        engine: WorkflowEngine::new(store.clone(), Arc::new(NullSink)),
        store,
        client,
        employee,
        agency_admin,
        other_admin,
        campaign,
        product,
    }
}

fn purchase_draft(amount: i64) -> PurchaseRequestDraft {
    PurchaseRequestDraft {
        title: "촬영 장비 대여".to_string(),
        amount: Some(amount),
        resource_type: "equipment".to_string(),
        ..Default::default()
    }
}

/// Post with an approved topic and a priced product line
fn approved_post(fx: &Fixture, quantity: u32) -> Post {
    let post = fx
        .engine
        .create_post(
            &fx.campaign.id,
            PostDraft {
                work_type: "블로그".to_string(),
                title: "제품 리뷰".to_string(),
                product_id: Some(fx.product.id.clone()),
                quantity: Some(quantity),
                ..Default::default()
            },
            &fx.employee,
        )
        .unwrap();
    fx.engine
        .approve_content(&post.id, ContentStage::Topic, ReviewDecision::Approved, &fx.client)
        .unwrap()
}

#[test]
fn test_reject_without_reason_is_validation_error() {
    let fx = fixture();
    let request = fx.engine.create_purchase_request(purchase_draft(500_000), &fx.employee).unwrap();

    for reason in [None, Some(""), Some("   ")] {
        let result = fx
            .engine
            .decide_purchase_request(&request.id, PurchaseStatus::Rejected, reason, &fx.agency_admin);
        assert!(matches!(result, Err(AgencyError::Validation(_))));
    }

    let stored = fx.engine.store().get_purchase_request(&request.id).unwrap().unwrap();
    assert_eq!(stored.status, PurchaseStatus::Pending);
}

#[test]
fn test_reject_with_reason_records_it() {
    let fx = fixture();
    let request = fx.engine.create_purchase_request(purchase_draft(500_000), &fx.employee).unwrap();

    let rejected = fx
        .engine
        .decide_purchase_request(&request.id, PurchaseStatus::Rejected, Some("late delivery"), &fx.agency_admin)
        .unwrap();

    assert_eq!(rejected.status, PurchaseStatus::Rejected);
    assert_eq!(rejected.reject_reason.as_deref(), Some("late delivery"));
    assert_eq!(rejected.decided_by, Some(fx.agency_admin.id.clone()));
}

#[test]
fn test_permission_is_checked_before_validation() {
    let fx = fixture();
    let request = fx.engine.create_purchase_request(purchase_draft(500_000), &fx.employee).unwrap();

    let result = fx
        .engine
        .decide_purchase_request(&request.id, PurchaseStatus::Rejected, Some(""), &fx.other_admin);
    assert!(matches!(result, Err(AgencyError::PermissionDenied(_))));

    let result = fx
        .engine
        .decide_purchase_request(&request.id, PurchaseStatus::Approved, None, &fx.employee);
    assert!(matches!(result, Err(AgencyError::PermissionDenied(_))));
}

#[test]
fn test_purchase_lifecycle_through_settlement() {
    let fx = fixture();
    let request = fx.engine.create_purchase_request(purchase_draft(200_000), &fx.employee).unwrap();

    for status in [
        PurchaseStatus::UnderReview,
        PurchaseStatus::Approved,
        PurchaseStatus::Purchased,
        PurchaseStatus::Settled,
    ] {
        let moved = fx
            .engine
            .decide_purchase_request(&request.id, status, None, &fx.agency_admin)
            .unwrap();
        assert_eq!(moved.status, status);
    }

    let result = fx
        .engine
        .decide_purchase_request(&request.id, PurchaseStatus::Approved, None, &fx.agency_admin);
    assert!(matches!(result, Err(AgencyError::PreconditionFailed(_))));
    assert!(fx.engine.store().list_expenses().unwrap().is_empty());
}

#[test]
fn test_amount_derives_from_campaign_task_costs() {
    let fx = fixture();
    approved_post(&fx, 3);

    let request = fx
        .engine
        .create_purchase_request(
            PurchaseRequestDraft {
                amount: None,
                campaign_id: Some(fx.campaign.id.clone()),
                ..purchase_draft(0)
            },
            &fx.employee,
        )
        .unwrap();

    assert_eq!(request.amount, 3 * 40_000);
}

#[test]
fn test_amount_is_required_without_campaign() {
    let fx = fixture();
    let result = fx.engine.create_purchase_request(
        PurchaseRequestDraft {
            amount: None,
            ..purchase_draft(0)
        },
        &fx.employee,
    );
    assert!(matches!(result, Err(AgencyError::Validation(_))));

    let result = fx.engine.create_purchase_request(purchase_draft(-10), &fx.employee);
    assert!(matches!(result, Err(AgencyError::Validation(_))));
}

#[test]
fn test_order_approval_books_expense() {
    let fx = fixture();
    let post = approved_post(&fx, 2);

    let order = fx
        .engine
        .request_order_for_post(&post.id, OrderDraft::default(), &fx.employee)
        .unwrap();
    assert_eq!(order.status, PurchaseStatus::OrderPending);
    assert_eq!(order.amount, 80_000);
    assert_eq!(order.agency_admin_id, Some(fx.agency_admin.id.clone()));

    let (approved, expense) = fx.engine.approve_order_request(&order.id, &fx.agency_admin).unwrap();

    assert_eq!(approved.status, PurchaseStatus::Approved);
    assert_eq!(expense.purchase_request_id, order.id);
    assert_eq!(expense.amount, 80_000);
    assert_eq!(expense.company.as_deref(), Some("Acme"));

    let ledger = fx.engine.store().list_expenses().unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].purchase_request_id, order.id);

    let post = fx.engine.store().get_post(&post.id).unwrap().unwrap();
    assert_eq!(post.order_request_status, Some(OrderRequestStatus::Approved));

    // approving twice must not book a second expense
    let again = fx.engine.approve_order_request(&order.id, &fx.agency_admin);
    assert!(matches!(again, Err(AgencyError::PreconditionFailed(_))));
    assert_eq!(fx.engine.store().list_expenses().unwrap().len(), 1);
}

#[test]
fn test_failed_order_approval_leaves_nothing_behind() {
    let fx = fixture();
    let post = approved_post(&fx, 1);
    let order = fx
        .engine
        .request_order_for_post(&post.id, OrderDraft::default(), &fx.employee)
        .unwrap();

    fx.store.fail_expense_commits.store(true, Ordering::SeqCst);
    let result = fx.engine.approve_order_request(&order.id, &fx.agency_admin);

    assert!(matches!(result, Err(AgencyError::Persistence(_))));
    let stored = fx.engine.store().get_purchase_request(&order.id).unwrap().unwrap();
    assert_eq!(stored.status, PurchaseStatus::OrderPending);
    assert!(fx.engine.store().list_expenses().unwrap().is_empty());
    let post = fx.engine.store().get_post(&post.id).unwrap().unwrap();
    assert_eq!(post.order_request_status, Some(OrderRequestStatus::Pending));

    // once the ledger is back the same request can be approved
    fx.store.fail_expense_commits.store(false, Ordering::SeqCst);
    assert!(fx.engine.approve_order_request(&order.id, &fx.agency_admin).is_ok());
}

#[test]
fn test_decide_routes_order_approval_through_ledger() {
    let fx = fixture();
    let post = approved_post(&fx, 1);
    let order = fx
        .engine
        .request_order_for_post(&post.id, OrderDraft::default(), &fx.employee)
        .unwrap();

    let approved = fx
        .engine
        .decide_purchase_request(&order.id, PurchaseStatus::Approved, None, &fx.agency_admin)
        .unwrap();

    assert_eq!(approved.status, PurchaseStatus::Approved);
    let ledger = fx.engine.store().list_expenses().unwrap();
    assert!(ledger.iter().any(|e| e.purchase_request_id == order.id));
}

#[test]
fn test_rejected_order_can_be_requested_again() {
    let fx = fixture();
    let post = approved_post(&fx, 1);
    let first = fx
        .engine
        .request_order_for_post(&post.id, OrderDraft::default(), &fx.employee)
        .unwrap();

    let duplicate = fx.engine.request_order_for_post(&post.id, OrderDraft::default(), &fx.employee);
    assert!(matches!(duplicate, Err(AgencyError::PreconditionFailed(_))));

    fx.engine
        .decide_purchase_request(&first.id, PurchaseStatus::Rejected, Some("단가 재협의"), &fx.agency_admin)
        .unwrap();
    let post_after = fx.engine.store().get_post(&post.id).unwrap().unwrap();
    assert_eq!(post_after.order_request_status, Some(OrderRequestStatus::Rejected));

    let second = fx
        .engine
        .request_order_for_post(&post.id, OrderDraft::default(), &fx.employee)
        .unwrap();
    assert_ne!(second.id, first.id);
    let post_after = fx.engine.store().get_post(&post.id).unwrap().unwrap();
    assert_eq!(post_after.order_request_id, Some(second.id));
}

#[test]
fn test_sale_order_amount_is_locked() {
    let fx = fixture();
    let sale = SaleRecord {
        id: SaleId::new(),
        company: Some("Acme".to_string()),
        campaign_id: Some(fx.campaign.id.clone()),
        employee_id: fx.employee.id.clone(),
        product_id: fx.product.id.clone(),
        quantity: 5,
        amount: 500_000,
        cost_amount: 200_000,
        sold_at: chrono::Utc::now(),
    };
    fx.store.commit(ChangeSet::new().sale(sale.clone())).unwrap();

    let order = fx
        .engine
        .request_order_for_sale(&sale.id, OrderDraft::default(), &fx.employee)
        .unwrap();
    assert_eq!(order.amount, 200_000);
    assert!(order.amount_locked);

    let result = fx.engine.update_purchase_amount(&order.id, 1, &fx.employee);
    assert!(matches!(result, Err(AgencyError::Validation(_))));

    let duplicate = fx.engine.request_order_for_sale(&sale.id, OrderDraft::default(), &fx.employee);
    assert!(matches!(duplicate, Err(AgencyError::PreconditionFailed(_))));
}

#[test]
fn test_urgent_flag_and_due_date() {
    let fx = fixture();
    let request = fx.engine.create_purchase_request(purchase_draft(10_000), &fx.employee).unwrap();
    assert!(!request.is_urgent());

    let urgent = fx.engine.set_purchase_urgent(&request.id, true, &fx.employee).unwrap();
    assert!(urgent.is_urgent());

    let later = request.created_at.date_naive() + chrono::Duration::days(3);
    let rescheduled = fx.engine.set_purchase_due_date(&request.id, Some(later), &fx.employee).unwrap();
    assert!(!rescheduled.is_urgent());
    assert_eq!(rescheduled.due_date, Some(later));
}

#[test]
fn test_visibility_is_scoped_by_company() {
    let fx = fixture();
    let request = fx.engine.create_purchase_request(purchase_draft(10_000), &fx.employee).unwrap();

    let seen_by_admin = fx.engine.visible_purchase_requests(&fx.agency_admin).unwrap();
    assert!(seen_by_admin.iter().any(|r| r.id == request.id));

    assert!(fx.engine.visible_purchase_requests(&fx.other_admin).unwrap().is_empty());
    assert!(fx.engine.visible_purchase_requests(&fx.client).unwrap().is_empty());
}

#[test]
fn test_expense_ledger_requires_permission() {
    let fx = fixture();
    let result = fx.engine.expense_ledger(&fx.employee);
    assert!(matches!(result, Err(AgencyError::PermissionDenied(_))));
    assert!(fx.engine.expense_ledger(&fx.agency_admin).unwrap().is_empty());
}

#[test]
fn test_negative_stored_cost_never_becomes_a_request_amount() {
    let fx = fixture();
    let post = approved_post(&fx, 2);
    *fx.store.cost_price_on_read.lock().unwrap() = Some(-40_000);

    let derived = fx.engine.create_purchase_request(
        PurchaseRequestDraft {
            amount: None,
            campaign_id: Some(fx.campaign.id.clone()),
            ..purchase_draft(0)
        },
        &fx.employee,
    );
    assert!(matches!(derived, Err(AgencyError::Validation(_))));

    let order = fx
        .engine
        .request_order_for_post(&post.id, OrderDraft::default(), &fx.employee);
    assert!(matches!(order, Err(AgencyError::Validation(_))));

    assert!(fx.engine.store().list_purchase_requests().unwrap().is_empty());
    let post = fx.engine.store().get_post(&post.id).unwrap().unwrap();
    assert_eq!(post.order_request_status, None);
}

#[test]
fn test_overflowing_task_cost_is_rejected() {
    let fx = fixture();
    approved_post(&fx, 3);
    *fx.store.cost_price_on_read.lock().unwrap() = Some(i64::MAX / 2);

    let derived = fx.engine.create_purchase_request(
        PurchaseRequestDraft {
            amount: None,
            campaign_id: Some(fx.campaign.id.clone()),
            ..purchase_draft(0)
        },
        &fx.employee,
    );
    assert!(matches!(derived, Err(AgencyError::Validation(_))));
}

#[test]
fn test_stale_rejection_cannot_orphan_a_booked_expense() {
    let fx = fixture();
    let post = approved_post(&fx, 1);
    let order = fx
        .engine
        .request_order_for_post(&post.id, OrderDraft::default(), &fx.employee)
        .unwrap();

    // a second admin session read the request while it was still pending
    let mut stale = fx.engine.store().get_purchase_request(&order.id).unwrap().unwrap();
    fx.engine.approve_order_request(&order.id, &fx.agency_admin).unwrap();

    stale.status = PurchaseStatus::Rejected;
    stale.reject_reason = Some("late".to_string());
    let guarded = fx.store.commit(
        ChangeSet::new()
            .expect_request_status(&order.id, PurchaseStatus::OrderPending)
            .purchase_request(stale.clone()),
    );
    assert!(matches!(guarded, Err(AgencyError::PreconditionFailed(_))));

    let unguarded = fx.store.commit(ChangeSet::new().purchase_request(stale));
    assert!(matches!(unguarded, Err(AgencyError::Persistence(_))));

    let stored = fx.engine.store().get_purchase_request(&order.id).unwrap().unwrap();
    assert_eq!(stored.status, PurchaseStatus::Approved);
    assert_eq!(fx.engine.store().list_expenses().unwrap().len(), 1);

    // the engine path reports the already-decided request as a precondition failure
    let late = fx
        .engine
        .decide_purchase_request(&order.id, PurchaseStatus::Rejected, Some("late"), &fx.agency_admin);
    assert!(matches!(late, Err(AgencyError::PreconditionFailed(_))));
}
