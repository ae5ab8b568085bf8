//! In-memory store; every operation runs under one mutex

use super::{check_incentive_identity, validate_changes, ChangeSet, InsertOutcome, Stored, WorkflowStore};
use crate::error::{AgencyError, Result};
use agency_types::*;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    campaigns: HashMap<CampaignId, Campaign>,
    posts: HashMap<PostId, Post>,
    products: HashMap<ProductId, Product>,
    sales: HashMap<SaleId, SaleRecord>,
    purchase_requests: HashMap<PurchaseRequestId, PurchaseRequest>,
    expenses: Vec<ExpenseRecord>,
    incentives: HashMap<IncentiveKey, MonthlyIncentive>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AgencyError::Persistence("In-memory store lock poisoned".to_string()))
    }
}

fn sorted_by<T: Clone, K: Ord>(values: impl Iterator<Item = T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut values: Vec<T> = values.collect();
    values.sort_by_key(|v| key(v));
    values
}

impl WorkflowStore for InMemoryStore {
    fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.lock()?.users.get(id).cloned())
    }

    fn list_users(&self) -> Result<Vec<User>> {
        Ok(sorted_by(self.lock()?.users.values().cloned(), |u| u.name.clone()))
    }

    fn get_campaign(&self, id: &CampaignId) -> Result<Option<Campaign>> {
        Ok(self.lock()?.campaigns.get(id).cloned())
    }

    fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        Ok(sorted_by(self.lock()?.campaigns.values().cloned(), |c| c.created_at))
    }

    fn get_post(&self, id: &PostId) -> Result<Option<Post>> {
        Ok(self.lock()?.posts.get(id).cloned())
    }

    fn list_posts(&self, campaign_id: &CampaignId) -> Result<Vec<Post>> {
        let state = self.lock()?;
        let posts = state.posts.values().filter(|p| &p.campaign_id == campaign_id).cloned();
        Ok(sorted_by(posts, |p| p.created_at))
    }

    fn get_product(&self, id: &ProductId) -> Result<Option<Product>> {
        Ok(self.lock()?.products.get(id).cloned())
    }

    fn list_products(&self) -> Result<Vec<Product>> {
        Ok(sorted_by(self.lock()?.products.values().cloned(), |p| p.name.clone()))
    }

    fn get_sale(&self, id: &SaleId) -> Result<Option<SaleRecord>> {
        Ok(self.lock()?.sales.get(id).cloned())
    }

    fn list_sales(&self) -> Result<Vec<SaleRecord>> {
        Ok(sorted_by(self.lock()?.sales.values().cloned(), |s| s.sold_at))
    }

    fn get_purchase_request(&self, id: &PurchaseRequestId) -> Result<Option<PurchaseRequest>> {
        Ok(self.lock()?.purchase_requests.get(id).cloned())
    }

    fn list_purchase_requests(&self) -> Result<Vec<PurchaseRequest>> {
        Ok(sorted_by(self.lock()?.purchase_requests.values().cloned(), |r| r.created_at))
    }

    fn list_expenses(&self) -> Result<Vec<ExpenseRecord>> {
        Ok(self.lock()?.expenses.clone())
    }

    fn get_incentive(&self, id: &IncentiveId) -> Result<Option<MonthlyIncentive>> {
        Ok(self.lock()?.incentives.values().find(|i| &i.id == id).cloned())
    }

    fn find_incentive(&self, key: &IncentiveKey) -> Result<Option<MonthlyIncentive>> {
        Ok(self.lock()?.incentives.get(key).cloned())
    }

    fn list_incentives(&self) -> Result<Vec<MonthlyIncentive>> {
        Ok(sorted_by(self.lock()?.incentives.values().cloned(), |i| i.key()))
    }

    fn insert_incentive_if_absent(&self, incentive: &MonthlyIncentive) -> Result<InsertOutcome> {
        check_incentive_identity(incentive)?;
        let mut state = self.lock()?;

        if let Some(existing) = state.incentives.get(&incentive.key()) {
            return Ok(InsertOutcome::AlreadyExists(existing.id.clone()));
        }

        state.incentives.insert(incentive.key(), incentive.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn commit(&self, changes: ChangeSet) -> Result<()> {
        let mut state = self.lock()?;

        {
            let request_status = |id: &PurchaseRequestId| state.purchase_requests.get(id).map(|r| r.status);
            let incentive_status =
                |id: &IncentiveId| state.incentives.values().find(|i| &i.id == id).map(|i| i.status);
            let stored = Stored {
                expenses: &state.expenses,
                request_status: &request_status,
                incentive_status: &incentive_status,
            };
            validate_changes(&changes, &stored)?;
        }

        // Nothing below can fail, so the commit is all-or-nothing
        for user in changes.users {
            state.users.insert(user.id.clone(), user);
        }
        for campaign in changes.campaigns {
            state.campaigns.insert(campaign.id.clone(), campaign);
        }
        for post in changes.posts {
            state.posts.insert(post.id.clone(), post);
        }
        for product in changes.products {
            state.products.insert(product.id.clone(), product);
        }
        for sale in changes.sales {
            state.sales.insert(sale.id.clone(), sale);
        }
        for request in changes.purchase_requests {
            state.purchase_requests.insert(request.id.clone(), request);
        }
        state.expenses.extend(changes.new_expenses);
        for incentive in changes.incentives {
            state.incentives.insert(incentive.key(), incentive);
        }

        Ok(())
    }
}
