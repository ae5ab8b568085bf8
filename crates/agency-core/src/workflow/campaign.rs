//! Campaign bookkeeping and user incentive rates

use super::engine::WorkflowEngine;
use crate::error::{AgencyError, Result};
use crate::events::{EventType, WorkflowEvent};
use crate::permissions::{self, Permission};
use crate::store::ChangeSet;
use agency_types::*;

/// Invoice and payment flags of a campaign; `None` leaves a flag unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct CampaignFinancials {
    pub invoice_issued: Option<bool>,
    pub payment_completed: Option<bool>,
}

impl WorkflowEngine {
    fn load_editable_campaign(&self, campaign_id: &CampaignId, actor: &User) -> Result<Campaign> {
        let campaign = self.load_campaign(campaign_id)?;
        if !permissions::can_edit_campaign(actor, &campaign) {
            log::warn!("User {} ({}) may not edit campaign {}", actor.id, actor.role, campaign.id);
            return Err(AgencyError::PermissionDenied(format!(
                "User {} may not edit campaign {}",
                actor.id, campaign.id
            )));
        }
        Ok(campaign)
    }

    fn save_campaign(&self, campaign: Campaign, change: &str) -> Result<Campaign> {
        self.commit(ChangeSet::new().campaign(campaign.clone()))?;

        log::info!("Campaign {} {}", campaign.id, change);
        self.emit(
            WorkflowEvent::new(
                EventType::CampaignUpdated,
                "캠페인 변경",
                format!("'{}' 캠페인: {}", campaign.name, change),
            )
            .related(&campaign.id)
            .notify(&[Role::AgencyAdmin, Role::Employee]),
        );

        Ok(campaign)
    }

    pub fn set_campaign_financials(
        &self,
        campaign_id: &CampaignId,
        financials: CampaignFinancials,
        actor: &User,
    ) -> Result<Campaign> {
        let mut campaign = self.load_editable_campaign(campaign_id, actor)?;

        if let Some(issued) = financials.invoice_issued {
            campaign.invoice_issued = issued;
        }
        if let Some(paid) = financials.payment_completed {
            campaign.payment_completed = paid;
        }

        let change = format!(
            "invoice issued {}, payment completed {}",
            campaign.invoice_issued, campaign.payment_completed
        );
        self.save_campaign(campaign, &change)
    }

    pub fn set_campaign_status(&self, campaign_id: &CampaignId, status: CampaignStatus, actor: &User) -> Result<Campaign> {
        let mut campaign = self.load_editable_campaign(campaign_id, actor)?;

        if !campaign.active {
            return Err(AgencyError::PreconditionFailed(format!(
                "Campaign {} is deactivated",
                campaign.id
            )));
        }

        campaign.status = status;
        self.save_campaign(campaign, &format!("status set to {}", status.code()))
    }

    /// Soft delete: the campaign stays stored but leaves listings and revenue
    pub fn deactivate_campaign(&self, campaign_id: &CampaignId, actor: &User) -> Result<Campaign> {
        let mut campaign = self.load_editable_campaign(campaign_id, actor)?;

        if !campaign.active {
            return Err(AgencyError::PreconditionFailed(format!(
                "Campaign {} is already deactivated",
                campaign.id
            )));
        }

        campaign.active = false;
        self.save_campaign(campaign, "deactivated")
    }

    /// Active campaigns the actor may see, oldest first
    pub fn visible_campaigns(&self, actor: &User) -> Result<Vec<Campaign>> {
        Ok(self
            .store()
            .list_campaigns()?
            .into_iter()
            .filter(|c| c.active && permissions::can_view_campaign(actor, c))
            .collect())
    }

    pub fn update_incentive_rate(&self, user_id: &UserId, rate: f64, actor: &User) -> Result<User> {
        let mut user = self.load_user(user_id)?;

        if !permissions::grants(actor, Permission::UserManage) || !permissions::can_manage_user(actor, &user) {
            log::warn!("User {} ({}) may not manage user {}", actor.id, actor.role, user.id);
            return Err(AgencyError::PermissionDenied(format!(
                "User {} may not manage user {}",
                actor.id, user.id
            )));
        }

        if !rate.is_finite() || !(0.0..=100.0).contains(&rate) {
            return Err(AgencyError::Validation(format!(
                "Incentive rate must be between 0 and 100, got {}",
                rate
            )));
        }

        user.incentive_rate = rate;
        self.commit(ChangeSet::new().user(user.clone()))?;

        log::info!("Incentive rate of user {} set to {}% by {}", user.id, rate, actor.id);
        Ok(user)
    }
}
