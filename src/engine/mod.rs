//! The house.
//!
//! [`House`] owns the pool ledger, the exposure tracker, every draw with
//! its bet book, and the commission book, and is the only place that
//! decides lock order:
//!
//! checkpoint → draw gate → exposure keys (sorted) → ledger → commission → bet book
//!
//! Admission holds a draw's gate for reading; lifecycle transitions,
//! settlement and cancellation hold it for writing. Multi-component
//! mutations are staged on clones and swapped in only once every step has
//! succeeded, so a failed operation leaves the ledger and exposure as
//! they were.
//!
//! Settlement and cancellation drop a draw's exposure records while holding
//! the ledger. That is the one place keys are locked after the ledger, and
//! it only touches keys of a draw whose gate is held for writing, which no
//! admission can be holding at the same time.

pub mod commission;
pub mod lifecycle;
pub mod settlement;
pub mod sweeper;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::locks::{lock, read, write};
use crate::pool::{PoolLedger, PoolState, PoolStatus, RiskParameters};
use crate::risk::{AdmissionController, BetRequest, ExposureRecord, ExposureTracker, Rejection};
use crate::types::{
    format_amount, Amount, Bet, BetId, BetType, Draw, DrawId, DrawStatus, ExposureKey, HouseError,
    HouseResult, MonthId, WinningNumbers,
};
use commission::{CommissionBook, CommissionState, MonthlyRecord};
use lifecycle::{CloseTrigger, DrawLifecycle};
use settlement::{RefundReport, SettlementEngine, SettlementReport};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct HouseConfig {
    pub risk: RiskParameters,
    pub commission_rate: Decimal,
    /// How long past its close time an unsettled Scheduled/Open draw may sit
    /// before the sweeper cancels it.
    pub stale_after: Duration,
    /// How long a Closed draw may wait for results before it is flagged.
    pub results_sla: Duration,
}

impl Default for HouseConfig {
    fn default() -> Self {
        Self {
            risk: RiskParameters::default(),
            commission_rate: dec!(0.15),
            stale_after: Duration::hours(6),
            results_sla: Duration::hours(2),
        }
    }
}

impl HouseConfig {
    pub fn validate(&self) -> HouseResult<()> {
        self.risk.validate()?;
        if self.commission_rate < Decimal::ZERO || self.commission_rate > Decimal::ONE {
            return Err(HouseError::InvalidRiskParameters(format!(
                "commission_rate {} must be in [0, 1]",
                self.commission_rate
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Receipts and snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetReceipt {
    pub accepted: bool,
    pub bet_id: BetId,
    pub draw_id: DrawId,
    pub bet_type: BetType,
    pub number: u16,
    pub stake: Amount,
    pub multiplier: Amount,
    pub potential_payout: Amount,
}

impl From<&Bet> for BetReceipt {
    fn from(bet: &Bet) -> Self {
        Self {
            accepted: true,
            bet_id: bet.id,
            draw_id: bet.draw_id,
            bet_type: bet.bet_type,
            number: bet.number,
            stake: bet.stake,
            multiplier: bet.multiplier,
            potential_payout: bet.liability(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub draw_id: DrawId,
    pub accepted_ids: Vec<BetId>,
    pub total_stake: Amount,
}

/// One draw with everything attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawRecord {
    pub draw: Draw,
    pub bets: Vec<Bet>,
    #[serde(default)]
    pub settlement: Option<SettlementReport>,
    #[serde(default)]
    pub refund: Option<RefundReport>,
}

/// Consistent copy of the whole house, as persisted to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseSnapshot {
    pub pool: PoolState,
    pub exposure: Vec<ExposureRecord>,
    pub draws: Vec<DrawRecord>,
    pub commission: CommissionState,
    pub saved_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Draw slots
// ---------------------------------------------------------------------------

struct DrawState {
    draw: Draw,
    settlement: Option<SettlementReport>,
    refund: Option<RefundReport>,
}

struct DrawSlot {
    /// The draw gate.
    state: RwLock<DrawState>,
    book: Mutex<Vec<Bet>>,
}

impl DrawSlot {
    fn new(draw: Draw) -> Self {
        Self::from_record(DrawRecord {
            draw,
            bets: Vec::new(),
            settlement: None,
            refund: None,
        })
    }

    fn from_record(record: DrawRecord) -> Self {
        Self {
            state: RwLock::new(DrawState {
                draw: record.draw,
                settlement: record.settlement,
                refund: record.refund,
            }),
            book: Mutex::new(record.bets),
        }
    }

    /// Draw view with live stake totals while bets are still pending.
    fn view(&self, draw: &Draw) -> Draw {
        let mut draw = draw.clone();
        if draw.status != DrawStatus::Completed {
            let book = lock(&self.book);
            draw.bet_count = book.len() as u64;
            draw.total_stake = book.iter().map(|b| b.stake).sum();
        }
        draw
    }
}

// ---------------------------------------------------------------------------
// House
// ---------------------------------------------------------------------------

pub struct House {
    clock: Arc<dyn Clock>,
    config: HouseConfig,
    ledger: PoolLedger,
    exposure: ExposureTracker,
    commission: CommissionBook,
    draws: RwLock<BTreeMap<DrawId, Arc<DrawSlot>>>,
    /// Held for read by every mutation and for write while snapshotting.
    checkpoint: RwLock<()>,
}

impl House {
    pub fn new(config: HouseConfig, clock: Arc<dyn Clock>) -> HouseResult<Self> {
        config.validate()?;
        let ledger = PoolLedger::new(config.risk.clone())?;
        let commission = CommissionBook::new(config.commission_rate);
        Ok(Self {
            clock,
            config,
            ledger,
            exposure: ExposureTracker::new(),
            commission,
            draws: RwLock::new(BTreeMap::new()),
            checkpoint: RwLock::new(()),
        })
    }

    /// Rebuild a house from a snapshot. Risk parameters come from the
    /// snapshot (they may have been changed at runtime); everything else
    /// comes from `config`.
    pub fn restore(snapshot: HouseSnapshot, config: HouseConfig, clock: Arc<dyn Clock>) -> HouseResult<Self> {
        config.validate()?;
        snapshot.pool.params.validate()?;
        let draws = snapshot
            .draws
            .into_iter()
            .map(|record| (record.draw.id, Arc::new(DrawSlot::from_record(record))))
            .collect();
        let commission = CommissionBook::from_state(config.commission_rate, snapshot.commission);
        Ok(Self {
            clock,
            config,
            ledger: PoolLedger::from_state(snapshot.pool),
            exposure: ExposureTracker::from_records(snapshot.exposure),
            commission,
            draws: RwLock::new(draws),
            checkpoint: RwLock::new(()),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn config(&self) -> &HouseConfig {
        &self.config
    }

    fn slot(&self, draw_id: DrawId) -> HouseResult<Arc<DrawSlot>> {
        read(&self.draws)
            .get(&draw_id)
            .cloned()
            .ok_or(HouseError::DrawNotFound(draw_id))
    }

    fn slots(&self) -> Vec<Arc<DrawSlot>> {
        read(&self.draws).values().cloned().collect()
    }

    // -- Draw lifecycle ---------------------------------------------------

    /// Create a draw closing at `scheduled_time`. Ids are monotonic.
    pub fn schedule_draw(&self, scheduled_time: DateTime<Utc>) -> HouseResult<Draw> {
        let _checkpoint = read(&self.checkpoint);
        let now = self.clock.now();
        if scheduled_time <= now {
            return Err(HouseError::InvalidSchedule(format!(
                "close time {} is not after {}",
                scheduled_time.to_rfc3339(),
                now.to_rfc3339()
            )));
        }

        let mut draws = write(&self.draws);
        let id = draws.keys().next_back().map_or(1, |last| last + 1);
        let draw = Draw::new(id, id, scheduled_time, now);
        draws.insert(id, Arc::new(DrawSlot::new(draw.clone())));

        info!(draw_id = id, closes = %scheduled_time.to_rfc3339(), "Draw scheduled");
        Ok(draw)
    }

    pub fn open_draw(&self, draw_id: DrawId) -> HouseResult<Draw> {
        self.transition(draw_id, DrawLifecycle::open)
    }

    /// Operator close; allowed at any time while the draw is open.
    pub fn close_draw(&self, draw_id: DrawId) -> HouseResult<Draw> {
        self.transition(draw_id, |draw, now| {
            DrawLifecycle::close(draw, CloseTrigger::Operator, now)
        })
    }

    /// Scheduled close; fails before the draw's close time.
    pub fn close_due_draw(&self, draw_id: DrawId) -> HouseResult<Draw> {
        self.transition(draw_id, |draw, now| {
            DrawLifecycle::close(draw, CloseTrigger::Schedule, now)
        })
    }

    fn transition<F>(&self, draw_id: DrawId, apply: F) -> HouseResult<Draw>
    where
        F: FnOnce(&mut Draw, DateTime<Utc>) -> HouseResult<()>,
    {
        let _checkpoint = read(&self.checkpoint);
        let slot = self.slot(draw_id)?;
        let mut gate = write(&slot.state);
        apply(&mut gate.draw, self.clock.now())?;
        Ok(slot.view(&gate.draw))
    }

    /// Settle a closed draw against its official results.
    ///
    /// Retrying with the same results returns the original report; retrying
    /// with different results fails with `AlreadySettled`. If the pool cannot
    /// cover the payouts nothing changes and the draw stays `Closed`.
    pub fn enter_results(&self, draw_id: DrawId, winning: WinningNumbers) -> HouseResult<SettlementReport> {
        winning.validate()?;
        let _checkpoint = read(&self.checkpoint);
        let slot = self.slot(draw_id)?;
        let mut gate = write(&slot.state);

        if gate.draw.status == DrawStatus::Completed {
            return match &gate.settlement {
                Some(report) if report.winning == winning => {
                    info!(draw_id, "Settlement replayed");
                    Ok(report.clone())
                }
                _ => Err(HouseError::AlreadySettled(draw_id)),
            };
        }
        DrawLifecycle::check_complete(&gate.draw)?;

        let now = self.clock.now();
        let month = MonthId::of(now);
        let bets = lock(&slot.book).clone();
        let plan = SettlementEngine::plan(&bets, &winning)?;

        let mut draw = gate.draw.clone();
        DrawLifecycle::complete(
            &mut draw,
            winning,
            plan.total_collected,
            plan.total_paid_out,
            bets.len() as u64,
            now,
        )?;

        {
            let mut pool = self.ledger.lock();
            let mut staged_pool = pool.clone();
            staged_pool
                .apply_settlement_delta(plan.total_paid_out, plan.total_collected)
                .map_err(|e| {
                    warn!(
                        draw_id,
                        paid_out = %format_amount(plan.total_paid_out),
                        collected = %format_amount(plan.total_collected),
                        total_pool = %format_amount(pool.total_pool),
                        error = %e,
                        "Settlement failed, draw stays closed"
                    );
                    e
                })?;
            staged_pool.release_period(draw_id);

            let mut commission = self.commission.lock();
            let mut staged_commission = commission.clone();
            staged_commission.record_settlement(month, plan.total_collected, plan.total_paid_out)?;

            // Exposure goes before the pool is published so a reader never
            // sees the settled pool next to this draw's records. No
            // admission holds these keys while the gate is write-locked.
            self.exposure.release_period(draw_id);
            *pool = staged_pool;
            *commission = staged_commission;
            SettlementEngine::apply(&plan, &mut lock(&slot.book));
        }

        let report = SettlementReport {
            draw_id,
            winning,
            total_collected: plan.total_collected,
            total_paid_out: plan.total_paid_out,
            net_result: plan.total_collected - plan.total_paid_out,
            bets_won: plan.bets_won,
            bets_lost: plan.bets_lost,
            month,
            settled_at: now,
        };
        gate.draw = draw;
        gate.settlement = Some(report.clone());

        info!(
            draw_id,
            winning = %winning,
            collected = %format_amount(report.total_collected),
            paid_out = %format_amount(report.total_paid_out),
            net = %format_amount(report.net_result),
            won = report.bets_won,
            lost = report.bets_lost,
            month = %month,
            "Draw settled"
        );
        Ok(report)
    }

    /// Cancel a scheduled or open draw, refunding every stake and clearing
    /// its exposure. Cancelling again returns the original refund report.
    pub fn cancel_draw(&self, draw_id: DrawId) -> HouseResult<RefundReport> {
        let _checkpoint = read(&self.checkpoint);
        let slot = self.slot(draw_id)?;
        let mut gate = write(&slot.state);

        if gate.draw.status == DrawStatus::Cancelled {
            if let Some(report) = &gate.refund {
                return Ok(report.clone());
            }
        }
        DrawLifecycle::check_cancel(&gate.draw)?;

        let now = self.clock.now();
        let mut draw = gate.draw.clone();
        DrawLifecycle::cancel(&mut draw, now)?;

        let report = {
            let mut pool = self.ledger.lock();
            let mut book = lock(&slot.book);
            let refundable = SettlementEngine::refundable(&book)?;
            let mut staged_pool = pool.clone();
            staged_pool.refund_escrow(refundable)?;
            staged_pool.release_period(draw_id);

            self.exposure.release_period(draw_id);
            *pool = staged_pool;
            SettlementEngine::refund(draw_id, &mut book, now)
        };

        gate.draw = draw;
        gate.refund = Some(report.clone());

        info!(
            draw_id,
            bets = report.refunds.len(),
            refunded = %format_amount(report.total_refunded),
            "Draw cancelled"
        );
        Ok(report)
    }

    // -- Bets -------------------------------------------------------------

    pub fn place_bet(&self, draw_id: DrawId, bet_type: BetType, number: u16, stake: Amount) -> HouseResult<BetReceipt> {
        let request = BetRequest::new(bet_type, number, stake);
        let bets = self.admit(draw_id, &[request], |rejection| rejection.error)?;
        bets.first()
            .map(BetReceipt::from)
            .ok_or(HouseError::EmptyBatch)
    }

    /// Place a batch atomically: every bet is accepted or none is.
    pub fn place_bets(&self, draw_id: DrawId, requests: &[BetRequest]) -> HouseResult<BatchReceipt> {
        if requests.is_empty() {
            return Err(HouseError::EmptyBatch);
        }
        let bets = self.admit(draw_id, requests, |rejection| HouseError::BatchRejected {
            index: rejection.index,
            reason: Box::new(rejection.error),
        })?;
        Ok(BatchReceipt {
            draw_id,
            accepted_ids: bets.iter().map(|b| b.id).collect(),
            total_stake: bets.iter().map(|b| b.stake).sum(),
        })
    }

    fn admit<F>(&self, draw_id: DrawId, requests: &[BetRequest], rejected: F) -> HouseResult<Vec<Bet>>
    where
        F: FnOnce(Rejection) -> HouseError,
    {
        let _checkpoint = read(&self.checkpoint);
        let slot = self.slot(draw_id)?;
        let gate = read(&slot.state);
        let now = self.clock.now();
        DrawLifecycle::ensure_accepting(&gate.draw, now)?;

        let bets = AdmissionController::admit(&self.exposure, &self.ledger, draw_id, requests, now)
            .map_err(rejected)?;
        lock(&slot.book).extend(bets.iter().cloned());

        info!(
            draw_id,
            bets = bets.len(),
            stake = %format_amount(bets.iter().map(|b| b.stake).sum()),
            "Bets accepted"
        );
        Ok(bets)
    }

    // -- Queries ----------------------------------------------------------

    pub fn draw(&self, draw_id: DrawId) -> HouseResult<Draw> {
        let slot = self.slot(draw_id)?;
        let gate = read(&slot.state);
        Ok(slot.view(&gate.draw))
    }

    /// Every draw, by id.
    pub fn draws(&self) -> Vec<Draw> {
        self.slots()
            .iter()
            .map(|slot| slot.view(&read(&slot.state).draw))
            .collect()
    }

    pub fn bets_for_draw(&self, draw_id: DrawId) -> HouseResult<Vec<Bet>> {
        let slot = self.slot(draw_id)?;
        let bets = lock(&slot.book).clone();
        Ok(bets)
    }

    pub fn settlement_report(&self, draw_id: DrawId) -> HouseResult<Option<SettlementReport>> {
        let slot = self.slot(draw_id)?;
        let report = read(&slot.state).settlement.clone();
        Ok(report)
    }

    fn draws_where<P>(&self, predicate: P) -> Vec<Draw>
    where
        P: Fn(&Draw) -> bool,
    {
        self.draws()
            .into_iter()
            .filter(|draw| predicate(draw))
            .collect()
    }

    /// Open draws whose close time has passed.
    pub fn due_draws(&self, now: DateTime<Utc>) -> Vec<Draw> {
        self.draws_where(|draw| DrawLifecycle::is_due(draw, now))
    }

    /// Scheduled or open draws past the stale timeout.
    pub fn stale_draws(&self, now: DateTime<Utc>) -> Vec<Draw> {
        let stale_after = self.config.stale_after;
        self.draws_where(|draw| DrawLifecycle::is_stale(draw, now, stale_after))
    }

    /// Closed draws still waiting for results beyond the SLA.
    pub fn overdue_results(&self, now: DateTime<Utc>) -> Vec<Draw> {
        let sla = self.config.results_sla;
        self.draws_where(|draw| DrawLifecycle::is_overdue(draw, now, sla))
    }

    // -- Pool -------------------------------------------------------------

    pub fn pool_status(&self) -> PoolStatus {
        self.ledger.status()
    }

    pub fn exposure(&self, draw_id: DrawId, bet_type: BetType, number: u16) -> HouseResult<ExposureRecord> {
        bet_type.validate_number(number)?;
        Ok(self.exposure.get(ExposureKey {
            draw_id,
            bet_type,
            number,
        }))
    }

    pub fn exposure_for_draw(&self, draw_id: DrawId) -> Vec<ExposureRecord> {
        self.exposure.records_for(draw_id)
    }

    pub fn risk_parameters(&self) -> RiskParameters {
        self.ledger.risk_parameters()
    }

    pub fn set_risk_parameters(&self, params: RiskParameters) -> HouseResult<RiskParameters> {
        let _checkpoint = read(&self.checkpoint);
        self.ledger.set_risk_parameters(params.clone())?;
        Ok(params)
    }

    pub fn deposit(&self, amount: Amount) -> HouseResult<PoolStatus> {
        let _checkpoint = read(&self.checkpoint);
        self.ledger.apply_deposit(amount)
    }

    pub fn withdraw(&self, amount: Amount) -> HouseResult<PoolStatus> {
        let _checkpoint = read(&self.checkpoint);
        self.ledger.apply_withdrawal(amount)
    }

    // -- Commission -------------------------------------------------------

    /// Charge the operator fee for a finished month, moving it out of the
    /// pool into the pending fee balance.
    pub fn calculate_monthly_commission(&self, month: MonthId) -> HouseResult<MonthlyRecord> {
        let _checkpoint = read(&self.checkpoint);
        let now = self.clock.now();

        let mut pool = self.ledger.lock();
        let mut commission = self.commission.lock();
        let fee = commission.assess(month, self.commission.rate(), now)?;

        let mut staged_pool = pool.clone();
        staged_pool.transfer_fee(fee)?;
        let record = commission.mark_paid(month, fee)?;
        *pool = staged_pool;

        info!(
            month = %month,
            net_profit = %format_amount(record.net_profit),
            rate = %self.commission.rate(),
            fee = %format_amount(fee),
            pending = %format_amount(commission.pending_operator_fees),
            "Monthly commission calculated"
        );
        Ok(record)
    }

    pub fn withdraw_operator_fees(&self) -> HouseResult<Amount> {
        let _checkpoint = read(&self.checkpoint);
        let amount = self.commission.lock().withdraw()?;
        info!(amount = %format_amount(amount), "Operator fees withdrawn");
        Ok(amount)
    }

    pub fn pending_operator_fees(&self) -> Amount {
        self.commission.pending_operator_fees()
    }

    pub fn monthly_record(&self, month: MonthId) -> Option<MonthlyRecord> {
        self.commission.monthly_record(month)
    }

    // -- Persistence ------------------------------------------------------

    /// Consistent copy of all state; waits for in-flight mutations.
    pub fn snapshot(&self) -> HouseSnapshot {
        let _checkpoint = write(&self.checkpoint);
        let draws = self
            .slots()
            .iter()
            .map(|slot| {
                let gate = read(&slot.state);
                DrawRecord {
                    draw: gate.draw.clone(),
                    bets: lock(&slot.book).clone(),
                    settlement: gate.settlement.clone(),
                    refund: gate.refund.clone(),
                }
            })
            .collect();
        HouseSnapshot {
            pool: self.ledger.snapshot(),
            exposure: self.exposure.snapshot(),
            draws,
            commission: self.commission.snapshot(),
            saved_at: self.clock.now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
