//! Draw lifecycle state machine.
//!
//! `Scheduled → Open → Closed → {Completed | Cancelled}`, plus
//! `Scheduled | Open → Cancelled`. Each transition validates first and
//! only then mutates, so a rejected transition leaves the draw untouched.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{Amount, Draw, DrawStatus, HouseError, HouseResult, WinningNumbers};

/// Why a draw is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseTrigger {
    /// The scheduled close time has passed.
    Schedule,
    /// Explicit operator action; allowed at any time while open.
    Operator,
}

pub struct DrawLifecycle;

impl DrawLifecycle {
    pub fn open(draw: &mut Draw, now: DateTime<Utc>) -> HouseResult<()> {
        if draw.status != DrawStatus::Scheduled || now >= draw.scheduled_time {
            return Err(Self::invalid(draw, DrawStatus::Open));
        }
        draw.status = DrawStatus::Open;
        draw.opened_at = Some(now);
        info!(draw_id = draw.id, closes = %draw.scheduled_time.to_rfc3339(), "Draw opened");
        Ok(())
    }

    pub fn close(draw: &mut Draw, trigger: CloseTrigger, now: DateTime<Utc>) -> HouseResult<()> {
        if draw.status != DrawStatus::Open {
            return Err(Self::invalid(draw, DrawStatus::Closed));
        }
        if trigger == CloseTrigger::Schedule && now < draw.scheduled_time {
            return Err(Self::invalid(draw, DrawStatus::Closed));
        }
        draw.status = DrawStatus::Closed;
        draw.closed_at = Some(now);
        info!(draw_id = draw.id, trigger = ?trigger, "Draw closed");
        Ok(())
    }

    /// Fails unless the draw can move to `Completed`.
    pub fn check_complete(draw: &Draw) -> HouseResult<()> {
        if draw.status != DrawStatus::Closed {
            return Err(Self::invalid(draw, DrawStatus::Completed));
        }
        Ok(())
    }

    pub fn complete(
        draw: &mut Draw,
        winning: WinningNumbers,
        total_stake: Amount,
        total_paid_out: Amount,
        bet_count: u64,
        now: DateTime<Utc>,
    ) -> HouseResult<()> {
        Self::check_complete(draw)?;
        draw.status = DrawStatus::Completed;
        draw.winning = Some(winning);
        draw.total_stake = total_stake;
        draw.total_paid_out = total_paid_out;
        draw.bet_count = bet_count;
        draw.settled_at = Some(now);
        Ok(())
    }

    /// Fails unless the draw can move to `Cancelled`.
    pub fn check_cancel(draw: &Draw) -> HouseResult<()> {
        match draw.status {
            DrawStatus::Scheduled | DrawStatus::Open => Ok(()),
            _ => Err(Self::invalid(draw, DrawStatus::Cancelled)),
        }
    }

    pub fn cancel(draw: &mut Draw, now: DateTime<Utc>) -> HouseResult<()> {
        Self::check_cancel(draw)?;
        draw.status = DrawStatus::Cancelled;
        draw.cancelled_at = Some(now);
        Ok(())
    }

    /// Fails unless bets may be admitted right now.
    pub fn ensure_accepting(draw: &Draw, now: DateTime<Utc>) -> HouseResult<()> {
        if !draw.is_accepting(now) {
            return Err(HouseError::DrawNotOpen {
                draw_id: draw.id,
                status: draw.status,
            });
        }
        Ok(())
    }

    /// Never-settled draw that outlived its close time by `stale_after`.
    pub fn is_stale(draw: &Draw, now: DateTime<Utc>, stale_after: Duration) -> bool {
        matches!(draw.status, DrawStatus::Scheduled | DrawStatus::Open)
            && now >= draw.scheduled_time + stale_after
    }

    /// Open draw whose close time has passed.
    pub fn is_due(draw: &Draw, now: DateTime<Utc>) -> bool {
        draw.status == DrawStatus::Open && now >= draw.scheduled_time
    }

    /// Closed draw still waiting for results beyond the SLA.
    pub fn is_overdue(draw: &Draw, now: DateTime<Utc>, results_sla: Duration) -> bool {
        draw.status == DrawStatus::Closed
            && draw
                .closed_at
                .map(|closed| now >= closed + results_sla)
                .unwrap_or(false)
    }

    fn invalid(draw: &Draw, to: DrawStatus) -> HouseError {
        HouseError::InvalidStateTransition {
            draw_id: draw.id,
            from: draw.status,
            to,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
