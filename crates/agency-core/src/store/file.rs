//! File-backed store
//!
//! One JSON file per entity under a directory per entity kind. Commits stage
//! every file first and then rename them into place; a failed rename restores
//! the files already moved, so a commit is visible completely or not at all.
//!
//! Writers hold an exclusive lock on `<root>/.lock` for the whole
//! validate-and-write step, so separate processes sharing a data directory
//! never validate against state another writer is about to replace.

use super::{check_incentive_identity, validate_changes, ChangeSet, InsertOutcome, Stored, WorkflowStore};
use crate::error::{AgencyError, Result};
use crate::paths::{self, *};
use agency_types::*;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub struct FileStore {
    root_path: PathBuf,
    commit_lock: Mutex<()>,
}

/// Held while a writer validates and applies its changes
struct WriteGuard<'a> {
    _thread: MutexGuard<'a, ()>,
    lock_file: File,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.lock_file) {
            log::warn!("Failed to release store lock: {}", e);
        }
    }
}

fn persistence(context: &str, e: impl std::fmt::Display) -> AgencyError {
    AgencyError::Persistence(format!("{}: {}", context, e))
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root_path`
    pub fn new<P: AsRef<Path>>(root_path: P) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();

        for dir in ENTITY_DIR_NAMES {
            fs::create_dir_all(root_path.join(dir))?;
        }
        fs::create_dir_all(paths::staging_dir(&root_path))?;

        log::debug!("Opened file store at {}", root_path.display());

        Ok(Self {
            root_path,
            commit_lock: Mutex::new(()),
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// In-process mutex first, then the cross-process file lock
    fn lock(&self) -> Result<WriteGuard<'_>> {
        let thread_guard = self
            .commit_lock
            .lock()
            .map_err(|_| AgencyError::Persistence("File store lock poisoned".to_string()))?;

        let lock_path = paths::lock_file(&self.root_path);
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| persistence(&format!("Failed to open store lock {}", lock_path.display()), e))?;
        FileExt::lock_exclusive(&lock_file)
            .map_err(|e| persistence(&format!("Failed to lock store {}", lock_path.display()), e))?;

        Ok(WriteGuard {
            _thread: thread_guard,
            lock_file,
        })
    }

    fn user_path(&self, id: &UserId) -> Option<PathBuf> {
        entity_file(&self.root_path, USERS_DIR_NAME, "user", id.as_str())
    }

    fn campaign_path(&self, id: &CampaignId) -> Option<PathBuf> {
        entity_file(&self.root_path, CAMPAIGNS_DIR_NAME, "campaign", id.as_str())
    }

    fn post_path(&self, id: &PostId) -> Option<PathBuf> {
        entity_file(&self.root_path, POSTS_DIR_NAME, "post", id.as_str())
    }

    fn product_path(&self, id: &ProductId) -> Option<PathBuf> {
        entity_file(&self.root_path, PRODUCTS_DIR_NAME, "product", id.as_str())
    }

    fn sale_path(&self, id: &SaleId) -> Option<PathBuf> {
        entity_file(&self.root_path, SALES_DIR_NAME, "sale", id.as_str())
    }

    fn request_path(&self, id: &PurchaseRequestId) -> Option<PathBuf> {
        entity_file(&self.root_path, PURCHASE_REQUESTS_DIR_NAME, "request", id.as_str())
    }

    fn expense_path(&self, id: &ExpenseId) -> Option<PathBuf> {
        entity_file(&self.root_path, EXPENSES_DIR_NAME, "expense", id.as_str())
    }

    fn incentive_path(&self, key: &IncentiveKey) -> Option<PathBuf> {
        entity_file(&self.root_path, INCENTIVES_DIR_NAME, "incentive", &key.to_string())
    }

    /// Target of a write; commits validate ids first, so `None` is unexpected here
    fn target(path: Option<PathBuf>, id: &impl std::fmt::Display) -> Result<PathBuf> {
        path.ok_or_else(|| AgencyError::Validation(format!("Id {:?} cannot be stored", id.to_string())))
    }

    /// Read one entity file; a missing file is `None`
    fn read_entity<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read_to_string(path) {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| persistence(&format!("Failed to deserialize {}", path.display()), e)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the file for `requested`; a record holding a different id is ignored
    fn read_by_id<T: DeserializeOwned>(
        &self,
        path: Option<PathBuf>,
        requested: &str,
        id_of: impl Fn(&T) -> &str,
    ) -> Result<Option<T>> {
        let path = match path {
            Some(path) => path,
            None => return Ok(None),
        };

        match self.read_entity::<T>(&path)? {
            Some(entity) if id_of(&entity) == requested => Ok(Some(entity)),
            Some(entity) => {
                log::warn!(
                    "{} holds id {} instead of {}; ignoring it",
                    path.display(),
                    id_of(&entity),
                    requested
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Read every entity of a directory, skipping files that do not parse
    fn read_all<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>> {
        let dir_path = self.root_path.join(dir);

        if !dir_path.exists() {
            return Ok(Vec::new());
        }

        let mut entities = Vec::new();

        for entry in fs::read_dir(&dir_path)? {
            let entry = entry?;

            let path = entry.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json") {
                match self.read_entity(&path) {
                    Ok(Some(entity)) => entities.push(entity),
                    Ok(None) => {}
                    Err(e) => log::warn!("Skipping unreadable file {}: {}", path.display(), e),
                }
            }
        }

        Ok(entities)
    }

    fn read_incentives(&self) -> Result<Vec<MonthlyIncentive>> {
        let mut incentives: Vec<MonthlyIncentive> = self.read_all(INCENTIVES_DIR_NAME)?;
        for incentive in &mut incentives {
            incentive.normalize();
        }
        incentives.sort_by_key(|i| i.key());
        Ok(incentives)
    }

    fn to_json<T: Serialize>(value: &T) -> Result<String> {
        serde_json::to_string_pretty(value).map_err(|e| persistence("Failed to serialize entity", e))
    }

    /// Write `contents` to a fresh file in the staging directory
    fn stage(&self, contents: &[u8]) -> std::io::Result<PathBuf> {
        let tmp = paths::staging_dir(&self.root_path).join(format!("{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, contents)?;
        Ok(tmp)
    }

    /// Stage all files, then rename them into place with rollback on failure
    fn apply_writes(&self, writes: Vec<(PathBuf, String)>) -> Result<()> {
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(writes.len());

        for (target, json) in writes {
            match self.stage(json.as_bytes()) {
                Ok(tmp) => staged.push((tmp, target)),
                Err(e) => {
                    for (tmp, _) in &staged {
                        let _ = fs::remove_file(tmp);
                    }
                    return Err(persistence("Failed to stage write", e));
                }
            }
        }

        let mut applied: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::with_capacity(staged.len());

        for (i, (tmp, target)) in staged.iter().enumerate() {
            let previous = fs::read(target).ok();

            if let Err(e) = fs::rename(tmp, target) {
                log::error!("Commit failed at {}: {}; rolling back", target.display(), e);
                self.rollback(&applied);
                for (tmp, _) in &staged[i..] {
                    let _ = fs::remove_file(tmp);
                }
                return Err(persistence(&format!("Failed to write {}", target.display()), e));
            }

            applied.push((target.clone(), previous));
        }

        Ok(())
    }

    /// Restore the previous contents of every file already renamed into place
    fn rollback(&self, applied: &[(PathBuf, Option<Vec<u8>>)]) {
        for (path, previous) in applied.iter().rev() {
            let restored = match previous {
                Some(bytes) => self.stage(bytes).and_then(|tmp| fs::rename(tmp, path)),
                None => fs::remove_file(path),
            };
            if let Err(e) = restored {
                log::error!("Failed to roll back {}: {}", path.display(), e);
            }
        }
    }
}

impl WorkflowStore for FileStore {
    fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        self.read_by_id(self.user_path(id), id.as_str(), |u: &User| u.id.as_str())
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.read_all(USERS_DIR_NAME)?;
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    fn get_campaign(&self, id: &CampaignId) -> Result<Option<Campaign>> {
        self.read_by_id(self.campaign_path(id), id.as_str(), |c: &Campaign| c.id.as_str())
    }

    fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> = self.read_all(CAMPAIGNS_DIR_NAME)?;
        campaigns.sort_by_key(|c| c.created_at);
        Ok(campaigns)
    }

    fn get_post(&self, id: &PostId) -> Result<Option<Post>> {
        self.read_by_id(self.post_path(id), id.as_str(), |p: &Post| p.id.as_str())
    }

    fn list_posts(&self, campaign_id: &CampaignId) -> Result<Vec<Post>> {
        let mut posts: Vec<Post> = self
            .read_all::<Post>(POSTS_DIR_NAME)?
            .into_iter()
            .filter(|p| &p.campaign_id == campaign_id)
            .collect();
        posts.sort_by_key(|p| p.created_at);
        Ok(posts)
    }

    fn get_product(&self, id: &ProductId) -> Result<Option<Product>> {
        self.read_by_id(self.product_path(id), id.as_str(), |p: &Product| p.id.as_str())
    }

    fn list_products(&self) -> Result<Vec<Product>> {
        let mut products: Vec<Product> = self.read_all(PRODUCTS_DIR_NAME)?;
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    fn get_sale(&self, id: &SaleId) -> Result<Option<SaleRecord>> {
        self.read_by_id(self.sale_path(id), id.as_str(), |s: &SaleRecord| s.id.as_str())
    }

    fn list_sales(&self) -> Result<Vec<SaleRecord>> {
        let mut sales: Vec<SaleRecord> = self.read_all(SALES_DIR_NAME)?;
        sales.sort_by_key(|s| s.sold_at);
        Ok(sales)
    }

    fn get_purchase_request(&self, id: &PurchaseRequestId) -> Result<Option<PurchaseRequest>> {
        self.read_by_id(self.request_path(id), id.as_str(), |r: &PurchaseRequest| r.id.as_str())
    }

    fn list_purchase_requests(&self) -> Result<Vec<PurchaseRequest>> {
        let mut requests: Vec<PurchaseRequest> = self.read_all(PURCHASE_REQUESTS_DIR_NAME)?;
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    fn list_expenses(&self) -> Result<Vec<ExpenseRecord>> {
        let mut expenses: Vec<ExpenseRecord> = self.read_all(EXPENSES_DIR_NAME)?;
        expenses.sort_by_key(|e| e.recorded_at);
        Ok(expenses)
    }

    fn get_incentive(&self, id: &IncentiveId) -> Result<Option<MonthlyIncentive>> {
        Ok(self.read_incentives()?.into_iter().find(|i| &i.id == id))
    }

    fn find_incentive(&self, key: &IncentiveKey) -> Result<Option<MonthlyIncentive>> {
        let path = match self.incentive_path(key) {
            Some(path) => path,
            None => return Ok(None),
        };

        let incentive: Option<MonthlyIncentive> = self.read_entity(&path)?;
        Ok(incentive
            .filter(|i| {
                let matches = &i.key() == key;
                if !matches {
                    log::warn!("{} holds incentive {} instead of {}", path.display(), i.key(), key);
                }
                matches
            })
            .map(|mut i| {
                i.normalize();
                i
            }))
    }

    fn list_incentives(&self) -> Result<Vec<MonthlyIncentive>> {
        self.read_incentives()
    }

    fn insert_incentive_if_absent(&self, incentive: &MonthlyIncentive) -> Result<InsertOutcome> {
        check_incentive_identity(incentive)?;
        let path = Self::target(self.incentive_path(&incentive.key()), &incentive.key())?;
        let json = Self::to_json(incentive)?;

        let _guard = self.lock()?;
        let tmp = self
            .stage(json.as_bytes())
            .map_err(|e| persistence("Failed to stage incentive", e))?;

        // hard_link publishes the complete file and fails if the key is taken
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);

        match linked {
            Ok(()) => {
                log::debug!("Created incentive {} at {}", incentive.id, path.display());
                Ok(InsertOutcome::Inserted)
            }
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                let existing = self
                    .find_incentive(&incentive.key())?
                    .ok_or_else(|| persistence("Incentive file is unreadable", path.display()))?;
                Ok(InsertOutcome::AlreadyExists(existing.id))
            }
            Err(e) => Err(persistence("Failed to create incentive", e)),
        }
    }

    fn commit(&self, changes: ChangeSet) -> Result<()> {
        let _guard = self.lock()?;

        let expenses = self.list_expenses()?;
        let request_statuses: HashMap<PurchaseRequestId, PurchaseStatus> = self
            .read_all::<PurchaseRequest>(PURCHASE_REQUESTS_DIR_NAME)?
            .into_iter()
            .map(|r| (r.id, r.status))
            .collect();
        let incentive_statuses: HashMap<IncentiveId, IncentiveStatus> = self
            .read_incentives()?
            .into_iter()
            .map(|i| (i.id, i.status))
            .collect();

        let request_status = |id: &PurchaseRequestId| request_statuses.get(id).copied();
        let incentive_status = |id: &IncentiveId| incentive_statuses.get(id).copied();
        validate_changes(
            &changes,
            &Stored {
                expenses: &expenses,
                request_status: &request_status,
                incentive_status: &incentive_status,
            },
        )?;

        let mut writes = Vec::new();
        for user in &changes.users {
            writes.push((Self::target(self.user_path(&user.id), &user.id)?, Self::to_json(user)?));
        }
        for campaign in &changes.campaigns {
            writes.push((Self::target(self.campaign_path(&campaign.id), &campaign.id)?, Self::to_json(campaign)?));
        }
        for post in &changes.posts {
            writes.push((Self::target(self.post_path(&post.id), &post.id)?, Self::to_json(post)?));
        }
        for product in &changes.products {
            writes.push((Self::target(self.product_path(&product.id), &product.id)?, Self::to_json(product)?));
        }
        for sale in &changes.sales {
            writes.push((Self::target(self.sale_path(&sale.id), &sale.id)?, Self::to_json(sale)?));
        }
        for request in &changes.purchase_requests {
            writes.push((Self::target(self.request_path(&request.id), &request.id)?, Self::to_json(request)?));
        }
        for expense in &changes.new_expenses {
            writes.push((Self::target(self.expense_path(&expense.id), &expense.id)?, Self::to_json(expense)?));
        }
        for incentive in &changes.incentives {
            let key = incentive.key();
            writes.push((Self::target(self.incentive_path(&key), &key)?, Self::to_json(incentive)?));
        }

        self.apply_writes(writes)
    }
}
