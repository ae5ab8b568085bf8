//! Role & permission model
//!
//! Single source of truth for every role decision in the engine. All checks are
//! pure and fail closed: inactive accounts, blank company affiliations and
//! mismatched references always yield `false`.

use agency_types::{Campaign, ExpenseRecord, Post, PurchaseRequest, Role, SaleRecord, SystemSettings, User};
use std::str::FromStr;

/// Capability keys of the static role table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    CampaignCreate,
    CampaignUpdate,
    PostCreate,
    PostApprove,
    PostRegisterOutline,
    PostRegisterLink,
    PurchaseCreate,
    PurchaseApprove,
    OrderRequest,
    OrderApprove,
    IncentiveCalculate,
    IncentiveApprove,
    IncentiveView,
    ExpenseView,
    UserManage,
    SettingsManage,
}

impl Permission {
    pub fn key(&self) -> &'static str {
        match self {
            Self::CampaignCreate => "campaign.create",
            Self::CampaignUpdate => "campaign.update",
            Self::PostCreate => "post.create",
            Self::PostApprove => "post.approve",
            Self::PostRegisterOutline => "post.register_outline",
            Self::PostRegisterLink => "post.register_link",
            Self::PurchaseCreate => "purchase.create",
            Self::PurchaseApprove => "purchase.approve",
            Self::OrderRequest => "order.request",
            Self::OrderApprove => "order.approve",
            Self::IncentiveCalculate => "incentive.calculate",
            Self::IncentiveApprove => "incentive.approve",
            Self::IncentiveView => "incentive.view",
            Self::ExpenseView => "expense.view",
            Self::UserManage => "user.manage",
            Self::SettingsManage => "settings.manage",
        }
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ROLE_TABLE
            .iter()
            .flat_map(|(_, perms)| perms.iter())
            .find(|p| p.key() == s)
            .copied()
            .ok_or_else(|| format!("Unknown permission key: {}", s))
    }
}

use Permission::*;

static ROLE_TABLE: [(Role, &[Permission]); 4] = [
    (
        Role::SuperAdmin,
        &[
            CampaignCreate, CampaignUpdate, PostCreate, PostRegisterOutline, PostRegisterLink,
            PurchaseCreate, PurchaseApprove, OrderRequest, OrderApprove, IncentiveCalculate,
            IncentiveApprove, IncentiveView, ExpenseView, UserManage, SettingsManage,
        ],
    ),
    (
        Role::AgencyAdmin,
        &[
            CampaignCreate, CampaignUpdate, PostCreate, PostRegisterOutline, PostRegisterLink,
            PurchaseCreate, PurchaseApprove, OrderRequest, OrderApprove, IncentiveCalculate,
            IncentiveApprove, IncentiveView, ExpenseView, UserManage,
        ],
    ),
    (
        Role::Employee,
        &[
            CampaignCreate, CampaignUpdate, PostCreate, PostRegisterOutline, PostRegisterLink,
            PurchaseCreate, OrderRequest, IncentiveView,
        ],
    ),
    (Role::Client, &[PostApprove]),
];

/// Permissions granted to a role
pub fn permissions_for(role: Role) -> &'static [Permission] {
    ROLE_TABLE
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, perms)| *perms)
        .unwrap_or(&[])
}

fn is_active(user: &User) -> bool {
    user.active
}

/// Look up `permission_key` for the user's role; unknown keys are denied
pub fn has_permission(user: &User, permission_key: &str) -> bool {
    match Permission::from_str(permission_key) {
        Ok(permission) => grants(user, permission),
        Err(_) => false,
    }
}

/// Typed variant of [`has_permission`]
pub fn grants(user: &User, permission: Permission) -> bool {
    is_active(user) && permissions_for(user.role).contains(&permission)
}

pub fn can_manage_user(manager: &User, target: &User) -> bool {
    if !is_active(manager) {
        return false;
    }

    match manager.role {
        Role::SuperAdmin => true,
        _ if manager.id == target.id => true,
        Role::AgencyAdmin => manager.same_company(target) && target.role != Role::SuperAdmin,
        _ => false,
    }
}

/// Whether `client` may be offered in the user's client picker
pub fn can_select_client(user: &User, client: &User) -> bool {
    if !is_active(user) || client.role != Role::Client {
        return false;
    }

    match user.role {
        Role::SuperAdmin => true,
        Role::AgencyAdmin | Role::Employee => user.same_company(client),
        Role::Client => false,
    }
}

/// Whether `employee` may be offered in the user's employee picker
pub fn can_select_employee(user: &User, employee: &User) -> bool {
    if !is_active(user) || !matches!(employee.role, Role::Employee | Role::AgencyAdmin) {
        return false;
    }

    match user.role {
        Role::SuperAdmin => true,
        Role::AgencyAdmin => user.same_company(employee),
        Role::Employee => user.id == employee.id,
        Role::Client => false,
    }
}

/// Only the campaign's designated client approves its content
pub fn can_approve_post(user: &User, post: &Post, campaign: &Campaign) -> bool {
    is_active(user)
        && user.role == Role::Client
        && post.campaign_id == campaign.id
        && campaign.client_id == user.id
}

pub fn can_approve_purchase_request(user: &User, request: &PurchaseRequest, requester: &User) -> bool {
    if !is_active(user) || request.requester_id != requester.id {
        return false;
    }

    match user.role {
        Role::SuperAdmin => true,
        Role::AgencyAdmin => user.same_company(requester),
        _ => false,
    }
}

/// `employee` is the user the incentive belongs to
pub fn can_approve_incentive(user: &User, employee: &User) -> bool {
    if !is_active(user) {
        return false;
    }

    match user.role {
        Role::SuperAdmin => true,
        Role::AgencyAdmin => user.same_company(employee),
        _ => false,
    }
}

/// Resource an approval button would act on, with the context needed to decide
#[derive(Debug, Clone, Copy)]
pub enum ApprovalResource<'a> {
    Post { post: &'a Post, campaign: &'a Campaign },
    PurchaseRequest { request: &'a PurchaseRequest, requester: &'a User },
    Incentive { employee: &'a User },
}

impl ApprovalResource<'_> {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Post { .. } => "post",
            Self::PurchaseRequest { .. } => "purchase_request",
            Self::Incentive { .. } => "incentive",
        }
    }
}

pub fn should_show_approval_buttons(user: &User, resource: ApprovalResource<'_>) -> bool {
    match resource {
        ApprovalResource::Post { post, campaign } => can_approve_post(user, post, campaign),
        ApprovalResource::PurchaseRequest { request, requester } => {
            can_approve_purchase_request(user, request, requester)
        }
        ApprovalResource::Incentive { employee } => can_approve_incentive(user, employee),
    }
}

/// `company` is a record's free-text affiliation
fn same_company_as(user: &User, company: Option<&str>) -> bool {
    match (user.company_name(), company.map(str::trim)) {
        (Some(a), Some(b)) => !b.is_empty() && a == b,
        _ => false,
    }
}

fn same_company_as_campaign(user: &User, campaign: &Campaign) -> bool {
    same_company_as(user, campaign.company.as_deref())
}

pub fn can_view_campaign(user: &User, campaign: &Campaign) -> bool {
    if !is_active(user) {
        return false;
    }

    match user.role {
        Role::SuperAdmin => true,
        Role::AgencyAdmin => same_company_as_campaign(user, campaign),
        Role::Employee => campaign.manager_id == user.id,
        Role::Client => campaign.client_id == user.id,
    }
}

/// Manager of the campaign or an admin scoped to it may edit campaign data
pub fn can_edit_campaign(user: &User, campaign: &Campaign) -> bool {
    if !grants(user, CampaignUpdate) {
        return false;
    }

    match user.role {
        Role::SuperAdmin => true,
        Role::AgencyAdmin => same_company_as_campaign(user, campaign),
        Role::Employee => campaign.manager_id == user.id,
        Role::Client => false,
    }
}

pub fn can_view_purchase_request(user: &User, request: &PurchaseRequest, requester: &User) -> bool {
    if !is_active(user) || request.requester_id != requester.id {
        return false;
    }

    match user.role {
        Role::SuperAdmin => true,
        Role::AgencyAdmin => {
            user.same_company(requester) || request.agency_admin_id.as_ref() == Some(&user.id)
        }
        Role::Employee => request.requester_id == user.id,
        Role::Client => false,
    }
}

/// Order requests for a sale: the seller, or an admin of the sale's company
pub fn can_order_for_sale(user: &User, sale: &SaleRecord) -> bool {
    if !grants(user, OrderRequest) {
        return false;
    }

    match user.role {
        Role::SuperAdmin => true,
        Role::AgencyAdmin => same_company_as(user, sale.company.as_deref()),
        Role::Employee => sale.employee_id == user.id,
        Role::Client => false,
    }
}

/// Headquarters sees the whole ledger, agency admins their company's entries
pub fn can_view_expense(user: &User, expense: &ExpenseRecord) -> bool {
    if !grants(user, ExpenseView) {
        return false;
    }

    match user.role {
        Role::SuperAdmin => true,
        _ => same_company_as(user, expense.company.as_deref()),
    }
}

/// Whether the monthly calculation run by `user` covers `target`
pub fn can_calculate_incentive_for(user: &User, target: &User) -> bool {
    if !grants(user, IncentiveCalculate) || !is_active(target) {
        return false;
    }

    match user.role {
        Role::SuperAdmin => matches!(target.role, Role::Employee | Role::AgencyAdmin),
        Role::AgencyAdmin => target.role == Role::Employee && user.same_company(target),
        _ => false,
    }
}

/// `owner` is the user the incentive belongs to
pub fn can_view_incentive(user: &User, owner: &User) -> bool {
    if !grants(user, IncentiveView) {
        return false;
    }

    match user.role {
        Role::SuperAdmin => true,
        Role::AgencyAdmin => user.same_company(owner),
        Role::Employee => user.id == owner.id,
        Role::Client => false,
    }
}

/// Display layer on top of scoping: system settings may hide amounts per role
pub fn can_view_incentive_amounts(user: &User, owner: &User, settings: &SystemSettings) -> bool {
    if !can_view_incentive(user, owner) {
        return false;
    }

    match user.role {
        Role::SuperAdmin => true,
        Role::AgencyAdmin => settings.show_incentive_to_agency_admin,
        Role::Employee => settings.show_incentive_to_staff,
        Role::Client => false,
    }
}
