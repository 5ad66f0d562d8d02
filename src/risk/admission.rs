//! Admission controller.
//!
//! Decides whether bets may be accepted against the per-number payout
//! cap, and reserves their exposure atomically when they are. The cap a
//! bet is checked against is the one left after its own liability is
//! committed, so an accepted bet never sits above the cap. A batch is
//! all-or-nothing: every key it touches is locked in sorted order, the
//! whole batch is staged against a copy of the ledger, and nothing is
//! written unless every bet passes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::MutexGuard;
use tracing::{debug, warn};

use super::exposure::{ExposureRecord, ExposureTracker};
use crate::locks::lock;
use crate::pool::cap::PayoutCapCalculator;
use crate::pool::{PoolLedger, PoolState, RiskParameters};
use crate::types::{format_amount, Amount, Bet, BetType, DrawId, ExposureKey, HouseError, HouseResult};

// ---------------------------------------------------------------------------
// Requests and decisions
// ---------------------------------------------------------------------------

/// A prospective bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetRequest {
    pub bet_type: BetType,
    pub number: u16,
    pub stake: Amount,
}

impl BetRequest {
    pub fn new(bet_type: BetType, number: u16, stake: Amount) -> Self {
        Self { bet_type, number, stake }
    }

    pub fn key(&self, draw_id: DrawId) -> ExposureKey {
        ExposureKey {
            draw_id,
            bet_type: self.bet_type,
            number: self.number,
        }
    }
}

/// Outcome of checking one stake against the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    Accept {
        projected_liability: Amount,
    },
    Reject {
        projected_liability: Amount,
        cap: Amount,
        /// Largest stake that would still fit under the cap.
        max_allowed_stake: Amount,
    },
}

/// A batch failure: which bet broke it and why.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub index: usize,
    pub error: HouseError,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct AdmissionController;

impl AdmissionController {
    /// Bet-level checks independent of exposure.
    pub fn validate(request: &BetRequest, params: &RiskParameters) -> HouseResult<()> {
        request.bet_type.validate_number(request.number)?;
        if request.stake < params.min_bet || request.stake > params.max_bet {
            return Err(HouseError::InvalidStakeAmount {
                stake: request.stake,
                min: params.min_bet,
                max: params.max_bet,
            });
        }
        Ok(())
    }

    /// Check a stake against the cap that holds once it is committed.
    ///
    /// The bet's own liability lowers the usable balance and with it the
    /// cap, so the key's projected liability and every liability already
    /// committed must fit under the projected cap.
    pub fn assess(pool: &PoolState, key: ExposureKey, current_liability: Amount, stake: Amount) -> Assessment {
        let projected_liability =
            current_liability.saturating_add(stake.saturating_mul(key.bet_type.multiplier()));
        let cap = PayoutCapCalculator::projected(pool, key.draw_id, key.bet_type, projected_liability);
        if projected_liability.max(pool.max_committed()) <= cap {
            return Assessment::Accept { projected_liability };
        }
        Assessment::Reject {
            projected_liability,
            cap,
            max_allowed_stake: Self::max_allowed_stake(pool, key, current_liability),
        }
    }

    /// Largest stake on `key` that [`assess`](Self::assess) would accept.
    pub fn max_allowed_stake(pool: &PoolState, key: ExposureKey, current_liability: Amount) -> Amount {
        let multiplier = key.bet_type.multiplier();
        let committed = pool.max_committed();
        let fits = |stake: Amount| {
            let liability = current_liability.saturating_add(stake.saturating_mul(multiplier));
            liability.max(committed)
                <= PayoutCapCalculator::projected(pool, key.draw_id, key.bet_type, liability)
        };

        let headroom = PayoutCapCalculator::current(pool) - current_liability;
        if multiplier <= 0 || headroom <= 0 || !fits(0) {
            return 0;
        }
        // The projected cap only falls as the stake grows, so `fits` is monotone.
        let (mut lo, mut hi) = (0, headroom / multiplier);
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if fits(mid) {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        lo
    }

    /// Validate and reserve exposure for every request, or for none.
    ///
    /// Caller must hold the draw gate for reading so the draw cannot close
    /// or settle underneath. Locks the touched exposure keys in ascending
    /// order, then the ledger.
    pub(crate) fn admit(
        exposure: &ExposureTracker,
        ledger: &PoolLedger,
        draw_id: DrawId,
        requests: &[BetRequest],
        placed_at: DateTime<Utc>,
    ) -> Result<Vec<Bet>, Rejection> {
        let keys: BTreeSet<ExposureKey> = requests.iter().map(|r| r.key(draw_id)).collect();
        let slots: Vec<_> = keys.into_iter().map(|key| (key, exposure.slot(key))).collect();
        let mut guards: BTreeMap<ExposureKey, MutexGuard<'_, ExposureRecord>> =
            slots.iter().map(|(key, slot)| (*key, lock(slot))).collect();

        let mut pool = ledger.lock();
        let mut staged_pool = pool.clone();
        let mut staged: BTreeMap<ExposureKey, ExposureRecord> = guards
            .iter()
            .map(|(key, record)| (*key, (**record).clone()))
            .collect();
        let mut bets = Vec::with_capacity(requests.len());

        for (index, request) in requests.iter().enumerate() {
            let reject = |error: HouseError| Rejection { index, error };

            Self::validate(request, &staged_pool.params).map_err(reject)?;

            let key = request.key(draw_id);
            let record = staged
                .entry(key)
                .or_insert_with(|| ExposureRecord::empty(key));

            match Self::assess(&staged_pool, key, record.total_liability, request.stake) {
                Assessment::Reject {
                    projected_liability,
                    cap,
                    max_allowed_stake,
                } => {
                    warn!(
                        key = %key,
                        stake = %format_amount(request.stake),
                        current = %format_amount(record.total_liability),
                        projected = %format_amount(projected_liability),
                        cap = %format_amount(cap),
                        max_allowed_stake = %format_amount(max_allowed_stake),
                        "Bet rejected: exposure limit"
                    );
                    return Err(reject(HouseError::ExposureLimitExceeded {
                        key,
                        projected: projected_liability,
                        cap,
                        max_allowed_stake,
                    }));
                }
                Assessment::Accept { projected_liability } => {
                    record.total_stake = record
                        .total_stake
                        .checked_add(request.stake)
                        .ok_or_else(|| reject(HouseError::AmountOverflow))?;
                    record.total_liability = projected_liability;
                    record.bet_count += 1;
                    staged_pool.commit_liability(draw_id, request.bet_type, projected_liability);
                    staged_pool.escrow_stakes(request.stake).map_err(reject)?;
                    bets.push(Bet::new(
                        draw_id,
                        request.bet_type,
                        request.number,
                        request.stake,
                        placed_at,
                    ));
                }
            }
        }

        // Every bet passed: publish the staged state.
        for (key, guard) in guards.iter_mut() {
            if let Some(record) = staged.remove(key) {
                **guard = record;
            }
        }
        *pool = staged_pool;

        debug!(
            draw_id,
            bets = bets.len(),
            keys = guards.len(),
            "Exposure reserved"
        );
        Ok(bets)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
