//! Pool ledger: the authoritative bankroll record.
//!
//! Tracks the total bankroll, the reserved portion, stakes held in
//! escrow for unsettled draws, and the worst-case liability committed
//! to each open draw. Every mutation goes through [`PoolLedger`], whose
//! single mutex is also held while the payout cap is read for an
//! admission decision.

pub mod cap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::locks::lock;
use crate::types::{apply_ratio, format_amount, Amount, BetType, DrawId, HouseError, HouseResult, AMOUNT_SCALE};
use cap::PayoutCapCalculator;

// ---------------------------------------------------------------------------
// Risk parameters
// ---------------------------------------------------------------------------

/// Operator-controlled risk settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParameters {
    /// Fraction of the bankroll held back and never exposed.
    pub reserve_ratio: Decimal,
    /// Fraction of the usable balance exposable on a single number.
    pub risk_factor: Decimal,
    /// Hard per-number payout ceiling, independent of pool size.
    pub absolute_max_payout: Amount,
    pub min_bet: Amount,
    pub max_bet: Amount,
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            reserve_ratio: dec!(0.20),
            risk_factor: dec!(0.10),
            absolute_max_payout: 10_000 * AMOUNT_SCALE,
            min_bet: AMOUNT_SCALE,
            max_bet: 1_000 * AMOUNT_SCALE,
        }
    }
}

impl RiskParameters {
    pub fn validate(&self) -> HouseResult<()> {
        let invalid = |msg: String| Err(HouseError::InvalidRiskParameters(msg));

        if self.reserve_ratio < Decimal::ZERO || self.reserve_ratio >= Decimal::ONE {
            return invalid(format!("reserve_ratio {} must be in [0, 1)", self.reserve_ratio));
        }
        if self.risk_factor <= Decimal::ZERO || self.risk_factor > Decimal::ONE {
            return invalid(format!("risk_factor {} must be in (0, 1]", self.risk_factor));
        }
        if self.absolute_max_payout <= 0 {
            return invalid(format!(
                "absolute_max_payout {} must be positive",
                self.absolute_max_payout
            ));
        }
        if self.min_bet <= 0 {
            return invalid(format!("min_bet {} must be positive", self.min_bet));
        }
        if self.max_bet < self.min_bet {
            return invalid(format!(
                "max_bet {} below min_bet {}",
                self.max_bet, self.min_bet
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pool state
// ---------------------------------------------------------------------------

/// Read-only view of the pool for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub total_pool: Amount,
    pub usable_balance: Amount,
    pub payout_cap: Amount,
    pub reserved_balance: Amount,
    pub escrowed_stakes: Amount,
    pub committed_liability: Amount,
}

/// Raw ledger state. Cloned to stage multi-step mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    pub total_pool: Amount,
    /// Stakes of unsettled bets; not part of the bankroll until settlement.
    pub escrowed_stakes: Amount,
    pub params: RiskParameters,
    /// Per draw, the largest single-number liability for each bet type.
    #[serde(default)]
    committed: BTreeMap<DrawId, [Amount; 3]>,
}

impl PoolState {
    pub fn new(params: RiskParameters) -> Self {
        Self {
            total_pool: 0,
            escrowed_stakes: 0,
            params,
            committed: BTreeMap::new(),
        }
    }

    /// `total_pool * (1 - reserve_ratio)`, floored.
    pub fn reservable_balance(&self) -> Amount {
        apply_ratio(self.total_pool, Decimal::ONE - self.params.reserve_ratio)
            .unwrap_or(self.total_pool)
    }

    pub fn reserved_balance(&self) -> Amount {
        self.total_pool - self.reservable_balance()
    }

    /// Worst-case payout across all unsettled draws: per draw and bet type
    /// only one number can win, so the largest liability is what counts.
    pub fn committed_liability(&self) -> Amount {
        self.committed
            .values()
            .flat_map(|per_type| per_type.iter())
            .fold(0, |acc: Amount, v| acc.saturating_add(*v))
    }

    pub fn committed_for(&self, draw_id: DrawId, bet_type: BetType) -> Amount {
        self.committed
            .get(&draw_id)
            .map(|per_type| per_type[bet_type.index()])
            .unwrap_or(0)
    }

    /// Committed liability if `(draw_id, bet_type)` carried `liability`.
    pub fn committed_with(&self, draw_id: DrawId, bet_type: BetType, liability: Amount) -> Amount {
        let current = self.committed_for(draw_id, bet_type);
        self.committed_liability()
            .saturating_sub(current)
            .saturating_add(liability.max(current))
    }

    /// Largest single-number liability on any unsettled draw.
    pub fn max_committed(&self) -> Amount {
        self.committed
            .values()
            .flat_map(|per_type| per_type.iter())
            .copied()
            .max()
            .unwrap_or(0)
    }

    /// Every committed liability fits under the cap the pool supports now.
    pub fn within_cap(&self) -> bool {
        self.max_committed() <= self.payout_cap()
    }

    pub fn usable_balance(&self) -> Amount {
        self.reservable_balance().saturating_sub(self.committed_liability())
    }

    pub fn payout_cap(&self) -> Amount {
        PayoutCapCalculator::current(self)
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            total_pool: self.total_pool,
            usable_balance: self.usable_balance(),
            payout_cap: self.payout_cap(),
            reserved_balance: self.reserved_balance(),
            escrowed_stakes: self.escrowed_stakes,
            committed_liability: self.committed_liability(),
        }
    }

    /// Raise the committed liability of a draw/bet type to `liability` if larger.
    pub fn commit_liability(&mut self, draw_id: DrawId, bet_type: BetType, liability: Amount) {
        let slot = &mut self.committed.entry(draw_id).or_insert([0; 3])[bet_type.index()];
        if liability > *slot {
            *slot = liability;
        }
    }

    /// Drop all committed liability of a draw. Returns the amount released.
    pub fn release_period(&mut self, draw_id: DrawId) -> Amount {
        self.committed
            .remove(&draw_id)
            .map(|per_type| per_type.iter().sum())
            .unwrap_or(0)
    }

    pub fn escrow_stakes(&mut self, amount: Amount) -> HouseResult<()> {
        self.escrowed_stakes = self
            .escrowed_stakes
            .checked_add(amount)
            .ok_or(HouseError::AmountOverflow)?;
        Ok(())
    }

    /// Return escrowed stakes to bettors (cancellation).
    pub fn refund_escrow(&mut self, amount: Amount) -> HouseResult<()> {
        if amount > self.escrowed_stakes {
            return Err(HouseError::InsufficientBankroll {
                requested: amount,
                available: self.escrowed_stakes,
            });
        }
        self.escrowed_stakes -= amount;
        Ok(())
    }

    pub fn apply_deposit(&mut self, amount: Amount) -> HouseResult<()> {
        if amount <= 0 {
            return Err(HouseError::InvalidAmount(amount));
        }
        self.total_pool = self
            .total_pool
            .checked_add(amount)
            .ok_or(HouseError::AmountOverflow)?;
        Ok(())
    }

    /// Take money out of the bankroll without dropping the usable balance
    /// below zero.
    pub fn apply_withdrawal(&mut self, amount: Amount) -> HouseResult<()> {
        if amount <= 0 {
            return Err(HouseError::InvalidAmount(amount));
        }
        self.debit(amount)
    }

    /// Fold a settled draw into the bankroll: its escrowed stakes join the
    /// pool and its payouts leave it.
    pub fn apply_settlement_delta(&mut self, paid_out: Amount, collected: Amount) -> HouseResult<()> {
        if paid_out < 0 {
            return Err(HouseError::InvalidAmount(paid_out));
        }
        if collected < 0 {
            return Err(HouseError::InvalidAmount(collected));
        }
        if collected > self.escrowed_stakes {
            return Err(HouseError::InsufficientBankroll {
                requested: collected,
                available: self.escrowed_stakes,
            });
        }
        let funded = self
            .total_pool
            .checked_add(collected)
            .ok_or(HouseError::AmountOverflow)?;
        if paid_out > funded {
            return Err(HouseError::InsufficientBankroll {
                requested: paid_out,
                available: funded,
            });
        }
        self.escrowed_stakes -= collected;
        self.total_pool = funded - paid_out;
        Ok(())
    }

    /// Move an operator fee out of the bankroll.
    pub fn transfer_fee(&mut self, fee: Amount) -> HouseResult<()> {
        if fee == 0 {
            return Ok(());
        }
        if fee < 0 {
            return Err(HouseError::InvalidAmount(fee));
        }
        self.debit(fee)
    }

    /// Shrinking the bankroll lowers the cap, so a debit is refused if
    /// any committed liability would no longer fit under it.
    fn debit(&mut self, amount: Amount) -> HouseResult<()> {
        let available = self.usable_balance().max(0);
        if amount > self.total_pool {
            return Err(HouseError::InsufficientBankroll { requested: amount, available });
        }
        let mut after = self.clone();
        after.total_pool -= amount;
        if after.usable_balance() < 0 || !after.within_cap() {
            return Err(HouseError::InsufficientBankroll { requested: amount, available });
        }
        self.total_pool = after.total_pool;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Thread-safe owner of [`PoolState`].
pub struct PoolLedger {
    state: Mutex<PoolState>,
}

impl PoolLedger {
    pub fn new(params: RiskParameters) -> HouseResult<Self> {
        params.validate()?;
        Ok(Self::from_state(PoolState::new(params)))
    }

    pub fn from_state(state: PoolState) -> Self {
        Self { state: Mutex::new(state) }
    }

    /// Exclusive access for multi-component critical sections.
    pub(crate) fn lock(&self) -> MutexGuard<'_, PoolState> {
        lock(&self.state)
    }

    pub fn total_pool(&self) -> Amount {
        self.lock().total_pool
    }

    pub fn usable_balance(&self) -> Amount {
        self.lock().usable_balance()
    }

    pub fn payout_cap(&self) -> Amount {
        self.lock().payout_cap()
    }

    pub fn status(&self) -> PoolStatus {
        self.lock().status()
    }

    pub fn snapshot(&self) -> PoolState {
        self.lock().clone()
    }

    pub fn risk_parameters(&self) -> RiskParameters {
        self.lock().params.clone()
    }

    /// Replace the risk settings. Refused if the new cap would sit below
    /// liability already committed.
    pub fn set_risk_parameters(&self, params: RiskParameters) -> HouseResult<()> {
        params.validate()?;
        let mut state = self.lock();
        let mut staged = state.clone();
        staged.params = params.clone();
        if !staged.within_cap() {
            return Err(HouseError::InvalidRiskParameters(format!(
                "payout cap {} would fall below committed liability {}",
                format_amount(staged.payout_cap()),
                format_amount(staged.max_committed())
            )));
        }
        info!(
            reserve_ratio = %params.reserve_ratio,
            risk_factor = %params.risk_factor,
            absolute_max_payout = %format_amount(params.absolute_max_payout),
            min_bet = %format_amount(params.min_bet),
            max_bet = %format_amount(params.max_bet),
            "Risk parameters updated"
        );
        state.params = params;
        Ok(())
    }

    pub fn apply_deposit(&self, amount: Amount) -> HouseResult<PoolStatus> {
        let mut state = self.lock();
        state.apply_deposit(amount)?;
        info!(
            amount = %format_amount(amount),
            total_pool = %format_amount(state.total_pool),
            "Bankroll deposit"
        );
        Ok(state.status())
    }

    pub fn apply_withdrawal(&self, amount: Amount) -> HouseResult<PoolStatus> {
        let mut state = self.lock();
        state.apply_withdrawal(amount)?;
        info!(
            amount = %format_amount(amount),
            total_pool = %format_amount(state.total_pool),
            "Bankroll withdrawal"
        );
        Ok(state.status())
    }

    pub fn apply_settlement_delta(&self, paid_out: Amount, collected: Amount) -> HouseResult<PoolStatus> {
        let mut state = self.lock();
        state.apply_settlement_delta(paid_out, collected)?;
        Ok(state.status())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
