//! Workflow engine and its state machines

pub mod campaign;
pub mod content;
pub mod engine;
pub mod incentive;
pub mod purchase;

pub use campaign::CampaignFinancials;
pub use content::{ContentStage, PostDraft, ReviewDecision};
pub use engine::{WorkflowEngine, WorkflowSummary};
pub use incentive::{BatchError, BatchResult, IncentiveView, SkippedIncentive};
pub use purchase::{OrderDraft, PurchaseRequestDraft};
