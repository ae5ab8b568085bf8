//! Workflow engine: the entry point the dashboard calls into
//!
//! The engine owns no state of its own. Every operation loads what it needs
//! from the injected store, checks permissions before touching anything,
//! commits its writes as one [`ChangeSet`] and then publishes an event.

use crate::config::{AgencyConfig, IncentiveConfig};
use crate::error::{AgencyError, Result};
use crate::events::{EventSink, WorkflowEvent};
use crate::store::{ChangeSet, WorkflowStore};
use agency_types::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    events: Arc<dyn EventSink>,
    settings: SystemSettings,
    incentive_config: IncentiveConfig,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn WorkflowStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            events,
            settings: SystemSettings::default(),
            incentive_config: IncentiveConfig::default(),
        }
    }

    pub fn from_config(
        config: &AgencyConfig,
        store: Arc<dyn WorkflowStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::new(store, events)
            .with_settings(config.settings)
            .with_incentive_config(config.incentive.clone())
    }

    pub fn with_settings(mut self, settings: SystemSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_incentive_config(mut self, incentive_config: IncentiveConfig) -> Self {
        self.incentive_config = incentive_config;
        self
    }

    pub fn settings(&self) -> &SystemSettings {
        &self.settings
    }

    pub(crate) fn incentive_config(&self) -> &IncentiveConfig {
        &self.incentive_config
    }

    pub fn store(&self) -> &dyn WorkflowStore {
        self.store.as_ref()
    }

    /// Best-effort publish; failures are logged and swallowed
    pub(crate) fn emit(&self, event: WorkflowEvent) {
        if let Err(e) = self.events.publish(&event) {
            log::warn!("Failed to publish {:?} event '{}': {}", event.event_type, event.title, e);
        }
    }

    /// Commit; conflicts and rejected records keep their kind, other storage
    /// failures become persistence errors
    pub(crate) fn commit(&self, changes: ChangeSet) -> Result<()> {
        self.store.commit(changes).map_err(|e| match e {
            AgencyError::Persistence(_) | AgencyError::PreconditionFailed(_) | AgencyError::Validation(_) => e,
            other => AgencyError::Persistence(other.to_string()),
        })
    }

    pub(crate) fn load_user(&self, id: &UserId) -> Result<User> {
        self.store
            .get_user(id)?
            .ok_or_else(|| AgencyError::NotFound(format!("User {} not found", id)))
    }

    pub(crate) fn load_campaign(&self, id: &CampaignId) -> Result<Campaign> {
        self.store
            .get_campaign(id)?
            .ok_or_else(|| AgencyError::NotFound(format!("Campaign {} not found", id)))
    }

    pub(crate) fn load_post(&self, id: &PostId) -> Result<Post> {
        self.store
            .get_post(id)?
            .ok_or_else(|| AgencyError::NotFound(format!("Post {} not found", id)))
    }

    pub(crate) fn load_product(&self, id: &ProductId) -> Result<Product> {
        self.store
            .get_product(id)?
            .ok_or_else(|| AgencyError::NotFound(format!("Product {} not found", id)))
    }

    pub(crate) fn load_sale(&self, id: &SaleId) -> Result<SaleRecord> {
        self.store
            .get_sale(id)?
            .ok_or_else(|| AgencyError::NotFound(format!("Sale {} not found", id)))
    }

    pub(crate) fn load_request(&self, id: &PurchaseRequestId) -> Result<PurchaseRequest> {
        self.store
            .get_purchase_request(id)?
            .ok_or_else(|| AgencyError::NotFound(format!("Purchase request {} not found", id)))
    }

    pub(crate) fn load_incentive(&self, id: &IncentiveId) -> Result<MonthlyIncentive> {
        self.store
            .get_incentive(id)?
            .ok_or_else(|| AgencyError::NotFound(format!("Incentive {} not found", id)))
    }

    /// Counts by status across the workflows
    pub fn summary(&self) -> Result<WorkflowSummary> {
        let mut summary = WorkflowSummary {
            generated_at: Utc::now(),
            ..Default::default()
        };

        for campaign in self.store.list_campaigns()? {
            for post in self.store.list_posts(&campaign.id)? {
                summary.posts += 1;
                if post.topic_status == ReviewStatus::Pending {
                    summary.pending_topics += 1;
                }
                if post.outline_status == Some(ReviewStatus::Pending) {
                    summary.pending_outlines += 1;
                }
            }
        }

        for request in self.store.list_purchase_requests()? {
            *summary.purchase_requests.entry(request.status.code()).or_insert(0) += 1;
        }

        for incentive in self.store.list_incentives()? {
            *summary.incentives.entry(incentive.status.code()).or_insert(0) += 1;
        }

        summary.expenses = self.store.list_expenses()?.len();
        Ok(summary)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowSummary {
    pub posts: usize,
    pub pending_topics: usize,
    pub pending_outlines: usize,
    pub purchase_requests: HashMap<&'static str, usize>,
    pub incentives: HashMap<&'static str, usize>,
    pub expenses: usize,
    pub generated_at: DateTime<Utc>,
}
