//! Monthly incentive record

use crate::ids::{IncentiveId, UserId};
use crate::status::IncentiveStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// round(total_revenue × rate / 100)
pub fn base_incentive_amount(total_revenue: i64, incentive_rate: f64) -> i64 {
    (total_revenue as f64 * incentive_rate / 100.0).round() as i64
}

/// base + adjustment does not fit an i64
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Incentive amount out of range: {base} + {adjustment}")]
pub struct AmountOverflow {
    pub base: i64,
    pub adjustment: i64,
}

fn final_amount(base: i64, adjustment: i64) -> Result<i64, AmountOverflow> {
    base.checked_add(adjustment).ok_or(AmountOverflow { base, adjustment })
}

/// Incentive of one user for one month.
///
/// The amount fields are private: `final_incentive_amount` is only ever
/// recomputed from base + adjustment, so the sum cannot drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyIncentive {
    pub id: IncentiveId,
    pub user_id: UserId,
    pub year: i32,
    pub month: u32,
    total_revenue: i64,
    incentive_rate: f64,
    base_incentive_amount: i64,
    adjustment_amount: i64,
    final_incentive_amount: i64,
    pub status: IncentiveStatus,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub decided_by: Option<UserId>,
    pub calculated_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonthlyIncentive {
    /// Fresh calculation with no adjustment
    pub fn new(user_id: UserId, year: i32, month: u32, total_revenue: i64, incentive_rate: f64) -> Self {
        let now = Utc::now();
        let base = base_incentive_amount(total_revenue, incentive_rate);

        Self {
            id: IncentiveId::new(),
            user_id,
            year,
            month,
            total_revenue,
            incentive_rate,
            base_incentive_amount: base,
            adjustment_amount: 0,
            final_incentive_amount: base,
            status: IncentiveStatus::Calculating,
            note: None,
            decided_by: None,
            calculated_at: now,
            updated_at: now,
        }
    }

    /// Storage key; at most one record exists per key
    pub fn key(&self) -> IncentiveKey {
        IncentiveKey::new(self.user_id.clone(), self.year, self.month)
    }

    pub fn total_revenue(&self) -> i64 {
        self.total_revenue
    }

    pub fn incentive_rate(&self) -> f64 {
        self.incentive_rate
    }

    pub fn base_incentive_amount(&self) -> i64 {
        self.base_incentive_amount
    }

    pub fn adjustment_amount(&self) -> i64 {
        self.adjustment_amount
    }

    pub fn final_incentive_amount(&self) -> i64 {
        self.final_incentive_amount
    }

    /// Leaves the record untouched when the final amount would overflow
    pub fn set_adjustment(&mut self, adjustment_amount: i64) -> Result<(), AmountOverflow> {
        self.final_incentive_amount = final_amount(self.base_incentive_amount, adjustment_amount)?;
        self.adjustment_amount = adjustment_amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Replace revenue and rate, keeping the manual adjustment
    pub fn recalculate(&mut self, total_revenue: i64, incentive_rate: f64) -> Result<(), AmountOverflow> {
        let base = base_incentive_amount(total_revenue, incentive_rate);
        self.final_incentive_amount = final_amount(base, self.adjustment_amount)?;

        let now = Utc::now();
        self.total_revenue = total_revenue;
        self.incentive_rate = incentive_rate;
        self.base_incentive_amount = base;
        self.calculated_at = now;
        self.updated_at = now;
        Ok(())
    }

    /// Whether the stored final amount equals base + adjustment
    pub fn is_consistent(&self) -> bool {
        final_amount(self.base_incentive_amount, self.adjustment_amount) == Ok(self.final_incentive_amount)
    }

    /// Re-derive the final amount, e.g. after loading a hand-edited record.
    /// An out-of-range sum is left as stored and fails `is_consistent`.
    pub fn normalize(&mut self) {
        if let Ok(amount) = final_amount(self.base_incentive_amount, self.adjustment_amount) {
            self.final_incentive_amount = amount;
        }
    }
}

/// (user, year, month) identity of an incentive
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IncentiveKey {
    pub user_id: UserId,
    pub year: i32,
    pub month: u32,
}

impl IncentiveKey {
    pub fn new(user_id: UserId, year: i32, month: u32) -> Self {
        Self { user_id, year, month }
    }
}

impl std::fmt::Display for IncentiveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{:04}_{:02}", self.user_id, self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_amount_rounds_half_away_from_zero() {
        assert_eq!(base_incentive_amount(10_000_000, 10.0), 1_000_000);
        assert_eq!(base_incentive_amount(12_345, 2.5), 309);
        assert_eq!(base_incentive_amount(0, 15.0), 0);
    }

    #[test]
    fn test_adjustment_keeps_final_in_sync() {
        let mut incentive = MonthlyIncentive::new(UserId::new(), 2024, 5, 10_000_000, 10.0);
        assert_eq!(incentive.final_incentive_amount(), 1_000_000);

        incentive.set_adjustment(-100_000).unwrap();
        assert_eq!(incentive.base_incentive_amount(), 1_000_000);
        assert_eq!(incentive.final_incentive_amount(), 900_000);

        incentive.recalculate(20_000_000, 10.0).unwrap();
        assert_eq!(incentive.adjustment_amount(), -100_000);
        assert_eq!(incentive.final_incentive_amount(), 1_900_000);
        assert!(incentive.is_consistent());
    }

    #[test]
    fn test_overflowing_adjustment_changes_nothing() {
        let mut incentive = MonthlyIncentive::new(UserId::new(), 2024, 5, 10_000_000, 10.0);
        incentive.set_adjustment(25_000).unwrap();

        let err = incentive.set_adjustment(i64::MAX).unwrap_err();
        assert_eq!(err.base, 1_000_000);
        assert_eq!(incentive.adjustment_amount(), 25_000);
        assert_eq!(incentive.final_incentive_amount(), 1_025_000);

        incentive.set_adjustment(i64::MAX - 1_000_000).unwrap();
        assert_eq!(incentive.final_incentive_amount(), i64::MAX);
        assert!(incentive.recalculate(20_000_000, 10.0).is_err());
        assert_eq!(incentive.base_incentive_amount(), 1_000_000);
        assert_eq!(incentive.total_revenue(), 10_000_000);
    }

    #[test]
    fn test_key_display_is_zero_padded() {
        let key = IncentiveKey::new(UserId::from_raw("u1"), 2024, 3);
        assert_eq!(key.to_string(), "u1_2024_03");
    }
}
