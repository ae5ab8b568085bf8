//! Monthly incentive calculation and approval
//!
//! Calculation is idempotent per (user, year, month): the store's atomic
//! insert-if-absent decides whether a record is created or reported as
//! skipped. Recalculation and adjustment are explicit operations.

use super::engine::WorkflowEngine;
use super::purchase::priced_total;
use crate::error::{AgencyError, Result};
use crate::events::{EventType, WorkflowEvent};
use crate::permissions::{self, Permission};
use crate::store::{ChangeSet, InsertOutcome};
use agency_types::*;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;

/// Legal incentive status moves
pub fn can_transition(from: IncentiveStatus, to: IncentiveStatus) -> bool {
    use IncentiveStatus::*;

    matches!(
        (from, to),
        (Calculating, PendingReview)
            | (PendingReview, Approved)
            | (PendingReview, OnHold)
            | (PendingReview, Cancelled)
            | (Approved, Paid)
            | (Approved, OnHold)
            | (Approved, Cancelled)
            | (OnHold, PendingReview)
    )
}

/// Statuses in which revenue may still be recomputed
pub fn can_recalculate(status: IncentiveStatus) -> bool {
    matches!(
        status,
        IncentiveStatus::Calculating | IncentiveStatus::PendingReview | IncentiveStatus::OnHold
    )
}

pub fn can_adjust(status: IncentiveStatus) -> bool {
    !matches!(status, IncentiveStatus::Paid | IncentiveStatus::Cancelled)
}

/// Whether a campaign's revenue belongs to `user_id` for the given month
pub fn counts_toward(
    campaign: &Campaign,
    user_id: &UserId,
    year: i32,
    month: u32,
    eligible: &[CampaignStatus],
) -> bool {
    campaign.active
        && &campaign.manager_id == user_id
        && eligible.contains(&campaign.status)
        && campaign.period() == (year, month)
}

/// Σ unit_price × quantity over a campaign's priced posts
pub fn campaign_revenue(posts: &[Post], products: &HashMap<ProductId, Product>) -> Result<i64> {
    priced_total(posts, products, |product| product.unit_price)
}

/// Users with a rate that the actor may run the calculation for
pub fn eligible_users<'a>(actor: &User, users: &'a [User]) -> Vec<&'a User> {
    users
        .iter()
        .filter(|u| u.incentive_rate > 0.0 && permissions::can_calculate_incentive_for(actor, u))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedIncentive {
    pub user_id: UserId,
    pub existing_id: IncentiveId,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub user_id: UserId,
    pub message: String,
}

/// Outcome of one calculation run
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub year: i32,
    pub month: u32,
    pub created: Vec<MonthlyIncentive>,
    pub skipped: Vec<SkippedIncentive>,
    pub errors: Vec<BatchError>,
}

impl BatchResult {
    fn new(year: i32, month: u32) -> Self {
        Self {
            year,
            month,
            created: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn created_count(&self) -> usize {
        self.created.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "신규 계산 {}건 / 건너뜀 {}건 / 오류 {}건",
            self.created_count(),
            self.skipped_count(),
            self.error_count()
        )
    }
}

/// Incentive as shown to a particular viewer; amounts are `None` when hidden
#[derive(Debug, Clone, Serialize)]
pub struct IncentiveView {
    pub id: IncentiveId,
    pub user_id: UserId,
    pub user_name: String,
    pub year: i32,
    pub month: u32,
    pub status: IncentiveStatus,
    pub status_label: &'static str,
    pub total_revenue: Option<i64>,
    pub incentive_rate: Option<f64>,
    pub base_incentive_amount: Option<i64>,
    pub adjustment_amount: Option<i64>,
    pub final_incentive_amount: Option<i64>,
    pub note: Option<String>,
}

impl IncentiveView {
    pub fn new(incentive: &MonthlyIncentive, owner: &User, show_amounts: bool) -> Self {
        let amount = |value: i64| show_amounts.then_some(value);

        Self {
            id: incentive.id.clone(),
            user_id: incentive.user_id.clone(),
            user_name: owner.name.clone(),
            year: incentive.year,
            month: incentive.month,
            status: incentive.status,
            status_label: incentive.status.label(),
            total_revenue: amount(incentive.total_revenue()),
            incentive_rate: show_amounts.then_some(incentive.incentive_rate()),
            base_incentive_amount: amount(incentive.base_incentive_amount()),
            adjustment_amount: amount(incentive.adjustment_amount()),
            final_incentive_amount: amount(incentive.final_incentive_amount()),
            note: incentive.note.clone(),
        }
    }
}

fn validate_rate(user: &User) -> Result<f64> {
    let rate = user.incentive_rate;
    if !rate.is_finite() || !(0.0..=100.0).contains(&rate) {
        return Err(AgencyError::Validation(format!(
            "Incentive rate of user {} must be between 0 and 100, got {}",
            user.id, rate
        )));
    }
    Ok(rate)
}

impl WorkflowEngine {
    fn products_by_id(&self) -> Result<HashMap<ProductId, Product>> {
        Ok(self
            .store()
            .list_products()?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect())
    }

    /// Revenue attributed to a user for a month
    pub fn monthly_revenue(&self, user_id: &UserId, year: i32, month: u32) -> Result<i64> {
        let products = self.products_by_id()?;
        self.monthly_revenue_with(user_id, year, month, &self.store().list_campaigns()?, &products)
    }

    fn monthly_revenue_with(
        &self,
        user_id: &UserId,
        year: i32,
        month: u32,
        campaigns: &[Campaign],
        products: &HashMap<ProductId, Product>,
    ) -> Result<i64> {
        let eligible = &self.incentive_config().eligible_campaign_statuses;
        let mut total: i64 = 0;

        for campaign in campaigns
            .iter()
            .filter(|c| counts_toward(c, user_id, year, month, eligible))
        {
            let posts = self.store().list_posts(&campaign.id)?;
            let revenue = campaign_revenue(&posts, products)?;
            log::debug!("Campaign {} contributes {} to user {}", campaign.id, revenue, user_id);
            total = total.checked_add(revenue).ok_or_else(|| {
                AgencyError::Validation(format!("Revenue of user {} for {}-{:02} is out of range", user_id, year, month))
            })?;
        }

        Ok(total)
    }

    fn authorize_incentive_approver(&self, incentive: &MonthlyIncentive, actor: &User) -> Result<User> {
        let owner = self.load_user(&incentive.user_id)?;
        if permissions::grants(actor, Permission::IncentiveApprove) && permissions::can_approve_incentive(actor, &owner) {
            return Ok(owner);
        }

        log::warn!("User {} ({}) may not manage incentive {}", actor.id, actor.role, incentive.id);
        Err(AgencyError::PermissionDenied(format!(
            "User {} may not manage incentive {}",
            actor.id, incentive.id
        )))
    }

    /// Create the month's incentives for every user in the actor's scope
    pub fn calculate_incentives(&self, year: i32, month: u32, actor: &User) -> Result<BatchResult> {
        if !permissions::grants(actor, Permission::IncentiveCalculate) {
            log::warn!("User {} ({}) may not calculate incentives", actor.id, actor.role);
            return Err(AgencyError::PermissionDenied(format!(
                "User {} may not calculate incentives",
                actor.id
            )));
        }
        if !(1..=12).contains(&month) {
            return Err(AgencyError::Validation(format!("Month must be 1-12, got {}", month)));
        }
        if !(1..=9999).contains(&year) {
            return Err(AgencyError::Validation(format!("Year must be 1-9999, got {}", year)));
        }

        let users = self.store().list_users()?;
        let campaigns = self.store().list_campaigns()?;
        let products = self.products_by_id()?;
        let mut result = BatchResult::new(year, month);

        for user in eligible_users(actor, &users) {
            let key = IncentiveKey::new(user.id.clone(), year, month);
            if let Some(existing) = self.store().find_incentive(&key)? {
                result.skipped.push(SkippedIncentive {
                    user_id: user.id.clone(),
                    existing_id: existing.id,
                });
                continue;
            }

            let computed = validate_rate(user).and_then(|rate| {
                let revenue = self.monthly_revenue_with(&user.id, year, month, &campaigns, &products)?;
                Ok(MonthlyIncentive::new(user.id.clone(), year, month, revenue, rate))
            });

            let incentive = match computed {
                Ok(incentive) => incentive,
                Err(e) => {
                    log::warn!("Incentive calculation for user {} failed: {}", user.id, e);
                    result.errors.push(BatchError {
                        user_id: user.id.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            match self.store().insert_incentive_if_absent(&incentive) {
                Ok(InsertOutcome::Inserted) => {
                    log::info!(
                        "Incentive {} for {}: revenue {} at {}% -> {}",
                        incentive.id,
                        key,
                        incentive.total_revenue(),
                        incentive.incentive_rate(),
                        incentive.base_incentive_amount()
                    );
                    result.created.push(incentive);
                }
                Ok(InsertOutcome::AlreadyExists(existing_id)) => {
                    result.skipped.push(SkippedIncentive {
                        user_id: user.id.clone(),
                        existing_id,
                    });
                }
                Err(e) => {
                    log::warn!("Failed to store incentive for {}: {}", key, e);
                    result.errors.push(BatchError {
                        user_id: user.id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        log::info!("Incentive run {}-{:02} by {}: {}", year, month, actor.id, result.summary());
        if result.created_count() > 0 {
            let mut event = WorkflowEvent::new(
                EventType::IncentivesCalculated,
                format!("{}년 {}월 인센티브 계산", year, month),
                result.summary(),
            )
            .notify(&[Role::SuperAdmin, Role::AgencyAdmin]);
            for incentive in &result.created {
                event = event.related(&incentive.id);
            }
            self.emit(event);
        }

        Ok(result)
    }

    pub fn decide_incentive(
        &self,
        incentive_id: &IncentiveId,
        new_status: IncentiveStatus,
        actor: &User,
    ) -> Result<MonthlyIncentive> {
        let mut incentive = self.load_incentive(incentive_id)?;
        self.authorize_incentive_approver(&incentive, actor)?;

        if !can_transition(incentive.status, new_status) {
            return Err(AgencyError::PreconditionFailed(format!(
                "Incentive {} cannot move from {} to {}",
                incentive.id,
                incentive.status.label(),
                new_status.label()
            )));
        }

        let prior = incentive.status;
        incentive.status = new_status;
        incentive.decided_by = Some(actor.id.clone());
        incentive.updated_at = Utc::now();
        self.commit(
            ChangeSet::new()
                .expect_incentive_status(&incentive.id, prior)
                .incentive(incentive.clone()),
        )?;

        log::info!("Incentive {} moved to {} by {}", incentive.id, new_status.code(), actor.id);
        self.emit(
            WorkflowEvent::new(
                EventType::IncentiveDecided,
                format!("인센티브 {}", new_status.label()),
                format!(
                    "{}년 {}월 인센티브가 {} 상태로 변경되었습니다",
                    incentive.year,
                    incentive.month,
                    new_status.label()
                ),
            )
            .related(&incentive.id)
            .related(&incentive.user_id)
            .notify(&[Role::Employee]),
        );

        Ok(incentive)
    }

    /// Set the manual adjustment; the final amount follows
    pub fn adjust_incentive(
        &self,
        incentive_id: &IncentiveId,
        adjustment_amount: i64,
        note: Option<&str>,
        actor: &User,
    ) -> Result<MonthlyIncentive> {
        let mut incentive = self.load_incentive(incentive_id)?;
        self.authorize_incentive_approver(&incentive, actor)?;

        if !can_adjust(incentive.status) {
            return Err(AgencyError::PreconditionFailed(format!(
                "Incentive {} is {} and can no longer be adjusted",
                incentive.id,
                incentive.status.label()
            )));
        }

        incentive
            .set_adjustment(adjustment_amount)
            .map_err(|e| AgencyError::Validation(format!("Incentive {}: {}", incentive_id, e)))?;
        if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
            incentive.note = Some(note.to_string());
        }
        self.commit(
            ChangeSet::new()
                .expect_incentive_status(&incentive.id, incentive.status)
                .incentive(incentive.clone()),
        )?;

        log::info!(
            "Incentive {} adjusted by {} to {}",
            incentive.id,
            adjustment_amount,
            incentive.final_incentive_amount()
        );
        self.emit(
            WorkflowEvent::new(
                EventType::IncentiveAdjusted,
                "인센티브 조정",
                format!(
                    "{}년 {}월 인센티브 조정액이 {}원으로 변경되었습니다",
                    incentive.year, incentive.month, adjustment_amount
                ),
            )
            .related(&incentive.id)
            .notify(&[Role::Employee]),
        );

        Ok(incentive)
    }

    /// Recompute revenue and base at the owner's current rate, keeping the adjustment
    pub fn recalculate_incentive(&self, incentive_id: &IncentiveId, actor: &User) -> Result<MonthlyIncentive> {
        let mut incentive = self.load_incentive(incentive_id)?;
        let owner = self.authorize_incentive_approver(&incentive, actor)?;

        if !permissions::grants(actor, Permission::IncentiveCalculate) {
            return Err(AgencyError::PermissionDenied(format!(
                "User {} may not calculate incentives",
                actor.id
            )));
        }

        let rate = validate_rate(&owner)?;
        if !can_recalculate(incentive.status) {
            return Err(AgencyError::PreconditionFailed(format!(
                "Incentive {} is {} and can no longer be recalculated",
                incentive.id,
                incentive.status.label()
            )));
        }

        let revenue = self.monthly_revenue(&owner.id, incentive.year, incentive.month)?;
        incentive
            .recalculate(revenue, rate)
            .map_err(|e| AgencyError::Validation(format!("Incentive {}: {}", incentive_id, e)))?;
        self.commit(
            ChangeSet::new()
                .expect_incentive_status(&incentive.id, incentive.status)
                .incentive(incentive.clone()),
        )?;

        log::info!(
            "Incentive {} recalculated: revenue {} -> base {}, final {}",
            incentive.id,
            revenue,
            incentive.base_incentive_amount(),
            incentive.final_incentive_amount()
        );
        Ok(incentive)
    }

    /// Incentives the actor may see, with amounts masked per system settings
    pub fn visible_incentives(&self, actor: &User) -> Result<Vec<IncentiveView>> {
        let users: HashMap<UserId, User> = self
            .store()
            .list_users()?
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect();

        Ok(self
            .store()
            .list_incentives()?
            .iter()
            .filter_map(|incentive| {
                let owner = users.get(&incentive.user_id)?;
                if !permissions::can_view_incentive(actor, owner) {
                    return None;
                }
                let show = permissions::can_view_incentive_amounts(actor, owner, self.settings());
                Some(IncentiveView::new(incentive, owner, show))
            })
            .collect())
    }
}
