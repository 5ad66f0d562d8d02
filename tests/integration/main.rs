//! End-to-end tests against the public `House` API.

mod concurrency;
mod scenarios;

use chrono::{DateTime, Duration, TimeZone, Utc};
use drawhouse::clock::ManualClock;
use drawhouse::engine::{House, HouseConfig};
use drawhouse::pool::RiskParameters;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 18, 0, 0).unwrap()
}

/// Small-unit parameters: cap pinned at 5,000 once the pool is deep.
pub fn config() -> HouseConfig {
    HouseConfig {
        risk: RiskParameters {
            reserve_ratio: dec!(0.20),
            risk_factor: dec!(0.10),
            absolute_max_payout: 5_000,
            min_bet: 1,
            max_bet: 1_000,
        },
        commission_rate: dec!(0.15),
        stale_after: Duration::hours(6),
        results_sla: Duration::hours(2),
    }
}

/// House with `bankroll` deposited and draw #1 open until `t0 + 1h`.
pub fn open_house(bankroll: i64) -> (Arc<House>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let house = House::new(config(), clock.clone()).unwrap();
    house.deposit(bankroll).unwrap();
    let draw = house.schedule_draw(t0() + Duration::hours(1)).unwrap();
    house.open_draw(draw.id).unwrap();
    (Arc::new(house), clock)
}
