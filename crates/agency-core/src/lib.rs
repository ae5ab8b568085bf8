//! Agency Core Library
//!
//! Approval and status workflows of the agency dashboard: content review,
//! purchase and order requests, monthly incentives. Storage and notification
//! delivery are injected into the [`WorkflowEngine`].

pub mod config;
pub mod error;
pub mod events;
pub mod paths;
pub mod permissions;
pub mod store;
pub mod workflow;

// Re-export main types for easy access
pub use config::AgencyConfig;
pub use error::{AgencyError, ErrorKind, Result};

pub use events::{EventBus, EventSink, EventType, FanoutSink, NullSink, WebhookNotifier, WorkflowEvent};
pub use permissions::{ApprovalResource, Permission};
pub use store::{ChangeSet, FileStore, InMemoryStore, InsertOutcome, Snapshot, WorkflowStore};

pub use workflow::{
    BatchResult,
    CampaignFinancials,
    ContentStage,
    IncentiveView,
    OrderDraft,
    PostDraft,
    PurchaseRequestDraft,
    ReviewDecision,
    WorkflowEngine,
    WorkflowSummary,
};
