//! Commission calculator.
//!
//! Accumulates each month's net result from settlements and, once the
//! month has closed, turns its profit into an operator fee held in a
//! pending balance until withdrawn.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::locks::lock;
use crate::types::{apply_ratio, format_amount, Amount, HouseError, HouseResult, MonthId};

// ---------------------------------------------------------------------------
// Monthly record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyRecord {
    pub month: MonthId,
    pub total_collected: Amount,
    pub total_paid_out: Amount,
    /// Raw `collected - paid_out`, negative for a losing month.
    pub net_profit: Amount,
    pub draws_settled: u64,
    pub operator_fee: Amount,
    pub commission_paid: bool,
}

impl MonthlyRecord {
    pub fn new(month: MonthId) -> Self {
        Self {
            month,
            total_collected: 0,
            total_paid_out: 0,
            net_profit: 0,
            draws_settled: 0,
            operator_fee: 0,
            commission_paid: false,
        }
    }

    /// Profit that commission is charged on; a losing month counts as zero.
    pub fn commissionable_profit(&self) -> Amount {
        self.net_profit.max(0)
    }
}

impl fmt::Display for MonthlyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: draws={} net={} fee={}{}",
            self.month,
            self.draws_settled,
            format_amount(self.net_profit),
            format_amount(self.operator_fee),
            if self.commission_paid { " (paid)" } else { "" },
        )
    }
}

/// `max(0, net_profit) * rate`, floored.
pub fn operator_fee(net_profit: Amount, rate: Decimal) -> HouseResult<Amount> {
    apply_ratio(net_profit.max(0), rate).ok_or(HouseError::AmountOverflow)
}

// ---------------------------------------------------------------------------
// Commission book
// ---------------------------------------------------------------------------

/// Persisted commission state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionState {
    pub months: BTreeMap<MonthId, MonthlyRecord>,
    pub pending_operator_fees: Amount,
    pub total_fees_withdrawn: Amount,
}

impl CommissionState {
    /// Fold a settled draw into its month's record (created lazily).
    pub fn record_settlement(&mut self, month: MonthId, collected: Amount, paid_out: Amount) -> HouseResult<()> {
        let record = self
            .months
            .entry(month)
            .or_insert_with(|| MonthlyRecord::new(month));
        record.total_collected = record
            .total_collected
            .checked_add(collected)
            .ok_or(HouseError::AmountOverflow)?;
        record.total_paid_out = record
            .total_paid_out
            .checked_add(paid_out)
            .ok_or(HouseError::AmountOverflow)?;
        record.net_profit = record.total_collected - record.total_paid_out;
        record.draws_settled += 1;
        Ok(())
    }

    /// Fee that a calculation would charge right now, without marking
    /// anything. Fails if the month is still running or already charged.
    pub fn assess(&self, month: MonthId, rate: Decimal, now: DateTime<Utc>) -> HouseResult<Amount> {
        if !month.has_ended(now) {
            return Err(HouseError::MonthNotClosed(month));
        }
        match self.months.get(&month) {
            Some(record) if record.commission_paid => Err(HouseError::AlreadyCalculated(month)),
            Some(record) => operator_fee(record.net_profit, rate),
            None => Ok(0),
        }
    }

    pub fn mark_paid(&mut self, month: MonthId, fee: Amount) -> HouseResult<MonthlyRecord> {
        let pending = self
            .pending_operator_fees
            .checked_add(fee)
            .ok_or(HouseError::AmountOverflow)?;
        let record = self
            .months
            .entry(month)
            .or_insert_with(|| MonthlyRecord::new(month));
        record.operator_fee = fee;
        record.commission_paid = true;
        let record = record.clone();
        self.pending_operator_fees = pending;
        Ok(record)
    }

    /// Drain the pending fee balance.
    pub fn withdraw(&mut self) -> HouseResult<Amount> {
        if self.pending_operator_fees <= 0 {
            return Err(HouseError::NothingToWithdraw);
        }
        let amount = self.pending_operator_fees;
        self.pending_operator_fees = 0;
        self.total_fees_withdrawn = self.total_fees_withdrawn.saturating_add(amount);
        Ok(amount)
    }
}

/// Thread-safe owner of [`CommissionState`] and the commission rate.
pub struct CommissionBook {
    rate: Decimal,
    state: Mutex<CommissionState>,
}

impl CommissionBook {
    pub fn new(rate: Decimal) -> Self {
        Self::from_state(rate, CommissionState::default())
    }

    pub fn from_state(rate: Decimal, state: CommissionState) -> Self {
        Self {
            rate,
            state: Mutex::new(state),
        }
    }

    pub fn rate(&self) -> Decimal {
        self.rate
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CommissionState> {
        lock(&self.state)
    }

    pub fn snapshot(&self) -> CommissionState {
        self.lock().clone()
    }

    pub fn monthly_record(&self, month: MonthId) -> Option<MonthlyRecord> {
        self.lock().months.get(&month).cloned()
    }

    pub fn pending_operator_fees(&self) -> Amount {
        self.lock().pending_operator_fees
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
