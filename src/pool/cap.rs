//! Payout cap calculator.
//!
//! The single authoritative source of the per-number payout ceiling:
//! `payout_cap = min(absolute_max_payout, risk_factor * usable_balance)`.
//! Callers only ever read its output; the value is recomputed from the
//! ledger state for every admission decision and never cached.

use super::{PoolState, RiskParameters};
use crate::types::{apply_ratio, Amount, BetType, DrawId};

pub struct PayoutCapCalculator;

impl PayoutCapCalculator {
    /// Cap for a given usable balance. Never negative.
    pub fn cap(params: &RiskParameters, usable_balance: Amount) -> Amount {
        if usable_balance <= 0 {
            return 0;
        }
        let scaled = apply_ratio(usable_balance, params.risk_factor).unwrap_or(Amount::MAX);
        scaled.min(params.absolute_max_payout).max(0)
    }

    /// Cap derived from the current ledger state.
    pub fn current(state: &PoolState) -> Amount {
        Self::cap(&state.params, state.usable_balance())
    }

    /// Cap that would hold once `(draw_id, bet_type)` carries `liability`.
    ///
    /// Committing liability shrinks the usable balance, so this is never
    /// above [`current`](Self::current).
    pub fn projected(state: &PoolState, draw_id: DrawId, bet_type: BetType, liability: Amount) -> Amount {
        let committed = state.committed_with(draw_id, bet_type, liability);
        let usable = state.reservable_balance().saturating_sub(committed);
        Self::cap(&state.params, usable)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
