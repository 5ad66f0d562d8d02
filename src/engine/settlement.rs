//! Settlement engine.
//!
//! Turns a closed draw's bets and official results into outcomes. The
//! plan is computed without touching any state; the house applies it to
//! the ledger, exposure, monthly record, bets and draw as one unit. The
//! cancellation refund path lives here too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::types::{
    format_amount, Amount, Bet, BetId, BetStatus, DrawId, HouseError, HouseResult, MonthId,
    WinningNumbers,
};

// ---------------------------------------------------------------------------
// Plans and reports
// ---------------------------------------------------------------------------

/// Resolution of one pending bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetOutcome {
    pub bet_id: BetId,
    pub status: BetStatus,
    pub payout: Amount,
}

/// Everything settlement will write, computed up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    pub outcomes: Vec<BetOutcome>,
    pub total_collected: Amount,
    pub total_paid_out: Amount,
    pub bets_won: u64,
    pub bets_lost: u64,
}

/// Retained result of a completed draw; replayed on idempotent retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub draw_id: DrawId,
    pub winning: WinningNumbers,
    pub total_collected: Amount,
    pub total_paid_out: Amount,
    /// `collected - paid_out`; negative when the house lost the draw.
    pub net_result: Amount,
    pub bets_won: u64,
    pub bets_lost: u64,
    pub month: MonthId,
    pub settled_at: DateTime<Utc>,
}

impl fmt::Display for SettlementReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Draw #{} settled [{}]: collected={} paid={} net={} (W{}/L{})",
            self.draw_id,
            self.winning,
            format_amount(self.total_collected),
            format_amount(self.total_paid_out),
            format_amount(self.net_result),
            self.bets_won,
            self.bets_lost,
        )
    }
}

/// Retained result of a cancelled draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReport {
    pub draw_id: DrawId,
    pub refunds: Vec<Refund>,
    pub total_refunded: Amount,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub bet_id: BetId,
    pub amount: Amount,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SettlementEngine;

impl SettlementEngine {
    /// Resolve every pending bet against the results. Pure.
    pub fn plan(bets: &[Bet], winning: &WinningNumbers) -> HouseResult<SettlementPlan> {
        let mut plan = SettlementPlan {
            outcomes: Vec::with_capacity(bets.len()),
            total_collected: 0,
            total_paid_out: 0,
            bets_won: 0,
            bets_lost: 0,
        };

        for bet in bets.iter().filter(|b| b.status == BetStatus::Pending) {
            plan.total_collected = plan
                .total_collected
                .checked_add(bet.stake)
                .ok_or(HouseError::AmountOverflow)?;

            if bet.number == winning.for_type(bet.bet_type) {
                let payout = bet
                    .stake
                    .checked_mul(bet.multiplier)
                    .ok_or(HouseError::AmountOverflow)?;
                plan.total_paid_out = plan
                    .total_paid_out
                    .checked_add(payout)
                    .ok_or(HouseError::AmountOverflow)?;
                plan.bets_won += 1;
                plan.outcomes.push(BetOutcome {
                    bet_id: bet.id,
                    status: BetStatus::Won,
                    payout,
                });
            } else {
                plan.bets_lost += 1;
                plan.outcomes.push(BetOutcome {
                    bet_id: bet.id,
                    status: BetStatus::Lost,
                    payout: 0,
                });
            }
        }

        debug!(
            bets = plan.outcomes.len(),
            won = plan.bets_won,
            collected = %format_amount(plan.total_collected),
            paid_out = %format_amount(plan.total_paid_out),
            "Settlement planned"
        );
        Ok(plan)
    }

    /// Write a plan's outcomes onto the bets. Only pending bets change.
    pub fn apply(plan: &SettlementPlan, bets: &mut [Bet]) {
        let mut outcomes = plan.outcomes.iter();
        for bet in bets.iter_mut().filter(|b| b.status == BetStatus::Pending) {
            if let Some(outcome) = outcomes.next() {
                debug_assert_eq!(outcome.bet_id, bet.id);
                bet.status = outcome.status;
                bet.payout = outcome.payout;
            }
        }
    }

    /// Total stake that a refund of `bets` would return.
    pub fn refundable(bets: &[Bet]) -> HouseResult<Amount> {
        bets.iter()
            .filter(|b| b.status == BetStatus::Pending)
            .try_fold(0 as Amount, |acc, b| acc.checked_add(b.stake))
            .ok_or(HouseError::AmountOverflow)
    }

    /// Mark every pending bet refunded. Already-resolved bets are skipped,
    /// so repeating a refund is a no-op.
    pub fn refund(draw_id: DrawId, bets: &mut [Bet], now: DateTime<Utc>) -> RefundReport {
        let mut refunds = Vec::new();
        for bet in bets.iter_mut().filter(|b| b.status == BetStatus::Pending) {
            bet.status = BetStatus::Refunded;
            bet.payout = 0;
            refunds.push(Refund {
                bet_id: bet.id,
                amount: bet.stake,
            });
        }
        let total_refunded = refunds.iter().map(|r| r.amount).sum();
        RefundReport {
            draw_id,
            refunds,
            total_refunded,
            cancelled_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
