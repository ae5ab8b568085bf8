//! Shared types for the agency workflow engine
//!
//! Entities, typed ids and canonical status enums. Legacy status labels are
//! translated into canonical variants in [`status`].

pub mod ids;
pub mod incentive;
pub mod model;
pub mod status;

pub use ids::*;
pub use incentive::{base_incentive_amount, AmountOverflow, IncentiveKey, MonthlyIncentive};
pub use model::*;
pub use status::*;
