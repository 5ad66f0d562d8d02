//! Periodic maintenance.
//!
//! One sweep closes open draws whose close time has passed, cancels draws
//! that went stale without ever closing, flags closed draws still waiting
//! for results beyond the SLA, and optionally keeps the next draw scheduled
//! and open. Each step is independent: a failure on one draw is logged and
//! the sweep moves on.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::House;
use crate::types::{DrawId, DrawStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct SweeperConfig {
    /// Keep one upcoming draw scheduled at all times.
    pub auto_schedule: bool,
    /// Close time of an auto-scheduled draw, measured from the sweep.
    pub draw_interval: Duration,
    /// Open scheduled draws as soon as they are seen.
    pub auto_open: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            auto_schedule: false,
            draw_interval: Duration::hours(1),
            auto_open: false,
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub closed: Vec<DrawId>,
    pub cancelled: Vec<DrawId>,
    pub overdue: Vec<DrawId>,
    pub scheduled: Vec<DrawId>,
    pub opened: Vec<DrawId>,
    pub failures: usize,
}

impl SweepReport {
    pub fn is_quiet(&self) -> bool {
        self.closed.is_empty()
            && self.cancelled.is_empty()
            && self.overdue.is_empty()
            && self.scheduled.is_empty()
            && self.opened.is_empty()
            && self.failures == 0
    }
}

pub struct Sweeper {
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(config: SweeperConfig) -> Self {
        Self { config }
    }

    pub fn sweep(&self, house: &House) -> SweepReport {
        let mut report = SweepReport::default();
        let now = house.now();

        // Stale first: a draw past the stale timeout is cancelled, not closed.
        for draw in house.stale_draws(now) {
            match house.cancel_draw(draw.id) {
                Ok(refund) => {
                    warn!(
                        draw_id = draw.id,
                        refunds = refund.refunds.len(),
                        "Stale draw cancelled"
                    );
                    report.cancelled.push(draw.id);
                }
                Err(e) => {
                    error!(draw_id = draw.id, error = %e, "Failed to cancel stale draw");
                    report.failures += 1;
                }
            }
        }

        for draw in house.due_draws(now) {
            match house.close_due_draw(draw.id) {
                Ok(_) => report.closed.push(draw.id),
                Err(e) => {
                    error!(draw_id = draw.id, error = %e, "Failed to close due draw");
                    report.failures += 1;
                }
            }
        }

        for draw in house.overdue_results(now) {
            warn!(
                draw_id = draw.id,
                closed_at = ?draw.closed_at,
                "Draw awaiting results beyond SLA, operator action required"
            );
            report.overdue.push(draw.id);
        }

        if self.config.auto_schedule {
            let upcoming = house.draws().into_iter().any(|d| {
                matches!(d.status, DrawStatus::Scheduled | DrawStatus::Open) && d.scheduled_time > now
            });
            if !upcoming {
                match house.schedule_draw(now + self.config.draw_interval) {
                    Ok(draw) => report.scheduled.push(draw.id),
                    Err(e) => {
                        error!(error = %e, "Failed to schedule next draw");
                        report.failures += 1;
                    }
                }
            }
        }

        if self.config.auto_open {
            let pending = house
                .draws()
                .into_iter()
                .filter(|d| d.status == DrawStatus::Scheduled && d.scheduled_time > now);
            for draw in pending {
                match house.open_draw(draw.id) {
                    Ok(_) => report.opened.push(draw.id),
                    Err(e) => {
                        error!(draw_id = draw.id, error = %e, "Failed to open draw");
                        report.failures += 1;
                    }
                }
            }
        }

        if !report.is_quiet() {
            info!(
                closed = report.closed.len(),
                cancelled = report.cancelled.len(),
                overdue = report.overdue.len(),
                scheduled = report.scheduled.len(),
                opened = report.opened.len(),
                failures = report.failures,
                "Sweep complete"
            );
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
