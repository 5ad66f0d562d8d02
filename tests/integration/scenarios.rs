//! Single-threaded business scenarios.

use chrono::{Duration, TimeZone, Utc};
use drawhouse::clock::Clock;
use drawhouse::pool::RiskParameters;
use drawhouse::risk::BetRequest;
use drawhouse::types::{BetStatus, BetType, DrawStatus, HouseError, MonthId, WinningNumbers};
use rust_decimal_macros::dec;

use super::{open_house, t0};

#[test]
fn test_cap_follows_pool_size() {
    let (house, _) = open_house(62_500);
    house
        .set_risk_parameters(RiskParameters {
            absolute_max_payout: 10_000,
            ..house.risk_parameters()
        })
        .unwrap();

    // usable 50,000 → cap 5,000
    assert_eq!(house.pool_status().usable_balance, 50_000);
    assert_eq!(house.pool_status().payout_cap, 5_000);

    // usable 200,000 → cap 10,000 (absolute ceiling)
    house.deposit(187_500).unwrap();
    assert_eq!(house.pool_status().usable_balance, 200_000);
    assert_eq!(house.pool_status().payout_cap, 10_000);
}

#[test]
fn test_reduced_stake_retry() {
    let (house, _) = open_house(10_000_000);
    // 4,745 on number 7, then a stake of 5 projects 5,070 > 5,000.
    house.place_bet(1, BetType::TwoDigit, 7, 73).unwrap();
    let err = house.place_bet(1, BetType::TwoDigit, 7, 5).unwrap_err();
    let retry = err.max_allowed_stake().unwrap();
    assert_eq!(retry, 3);

    house.place_bet(1, BetType::TwoDigit, 7, retry).unwrap();
    let exposure = house.exposure(1, BetType::TwoDigit, 7).unwrap();
    assert_eq!(exposure.total_liability, 4_940);
    assert!(exposure.total_liability <= house.pool_status().payout_cap);
}

#[test]
fn test_draw_day_end_to_end() {
    let (house, clock) = open_house(10_000_000);
    let second = house.schedule_draw(t0() + Duration::hours(2)).unwrap();
    house.open_draw(second.id).unwrap();

    let batch = [
        BetRequest::new(BetType::TwoDigit, 34, 20),
        BetRequest::new(BetType::ThreeDigit, 234, 5),
        BetRequest::new(BetType::FourDigit, 1234, 2),
        BetRequest::new(BetType::TwoDigit, 99, 40),
    ];
    let receipt = house.place_bets(1, &batch).unwrap();
    assert_eq!(receipt.accepted_ids.len(), 4);
    assert_eq!(receipt.total_stake, 67);
    house.place_bet(second.id, BetType::TwoDigit, 34, 10).unwrap();

    let status = house.pool_status();
    assert_eq!(status.escrowed_stakes, 77);
    // draw 1: 2D max 2,600, 3D 1,500, 4D 3,000; draw 2: 2D 650
    assert_eq!(status.committed_liability, 2_600 + 1_500 + 3_000 + 650);

    clock.advance(Duration::hours(1));
    house.close_due_draw(1).unwrap();
    assert!(matches!(
        house.place_bet(1, BetType::TwoDigit, 1, 1),
        Err(HouseError::DrawNotOpen { .. })
    ));

    let report = house.enter_results(1, WinningNumbers::from_draw(1234).unwrap()).unwrap();
    // 20×65 + 5×300 + 2×1500
    assert_eq!(report.total_paid_out, 1_300 + 1_500 + 3_000);
    assert_eq!(report.total_collected, 67);
    assert_eq!(report.bets_won, 3);
    assert_eq!(report.bets_lost, 1);

    let status = house.pool_status();
    assert_eq!(status.total_pool, 10_000_000 + 67 - 5_800);
    assert_eq!(status.escrowed_stakes, 10);
    assert_eq!(status.committed_liability, 650);
    assert!(house.exposure_for_draw(1).is_empty());
    assert_eq!(house.exposure_for_draw(second.id).len(), 1);

    // Identical retry is a replay; nothing moves.
    let again = house.enter_results(1, WinningNumbers::from_draw(1234).unwrap()).unwrap();
    assert_eq!(again, report);
    assert_eq!(house.pool_status(), status);

    let bets = house.bets_for_draw(1).unwrap();
    let lost = bets.iter().find(|b| b.number == 99).unwrap();
    assert_eq!(lost.status, BetStatus::Lost);
    assert_eq!(lost.payout, 0);
}

#[test]
fn test_cancel_refunds_every_stake() {
    let (house, _) = open_house(10_000_000);
    let stakes = [3, 14, 15, 9, 2];
    for (i, stake) in stakes.iter().enumerate() {
        house.place_bet(1, BetType::ThreeDigit, i as u16, *stake).unwrap();
    }
    let pool_before = house.pool_status().total_pool;

    let report = house.cancel_draw(1).unwrap();
    assert_eq!(report.total_refunded, stakes.iter().sum::<i64>());
    assert_eq!(house.draw(1).unwrap().status, DrawStatus::Cancelled);
    for i in 0..stakes.len() {
        assert_eq!(house.exposure(1, BetType::ThreeDigit, i as u16).unwrap().total_stake, 0);
    }
    assert!(house
        .bets_for_draw(1)
        .unwrap()
        .iter()
        .all(|b| b.status == BetStatus::Refunded && b.payout == 0));

    let status = house.pool_status();
    assert_eq!(status.total_pool, pool_before);
    assert_eq!(status.escrowed_stakes, 0);
    assert_eq!(status.committed_liability, 0);

    let again = house.cancel_draw(1).unwrap();
    assert_eq!(again, report);
}

#[test]
fn test_rejected_transitions_have_no_side_effects() {
    let (house, _) = open_house(10_000_000);
    house.place_bet(1, BetType::TwoDigit, 1, 10).unwrap();
    let before = house.draw(1).unwrap();
    let pool = house.pool_status();

    assert!(house.open_draw(1).is_err());
    assert!(house.enter_results(1, WinningNumbers::from_draw(1).unwrap()).is_err());
    assert!(house.close_due_draw(1).is_err());

    assert_eq!(house.draw(1).unwrap(), before);
    assert_eq!(house.pool_status(), pool);
}

#[test]
fn test_shallow_pool_cap_holds_after_acceptance() {
    let (house, _) = open_house(62_500);
    assert_eq!(house.pool_status().payout_cap, 5_000);

    // 76 × 65 = 4,940 fits the cap before, but committing it leaves 4,506.
    let err = house.place_bet(1, BetType::TwoDigit, 5, 76).unwrap_err();
    assert!(matches!(err, HouseError::ExposureLimitExceeded { projected: 4_940, cap: 4_506, .. }));
    assert_eq!(house.pool_status().committed_liability, 0);

    let retry = err.max_allowed_stake().unwrap();
    assert_eq!(retry, 69);
    house.place_bet(1, BetType::TwoDigit, 5, retry).unwrap();

    let exposure = house.exposure(1, BetType::TwoDigit, 5).unwrap();
    let pool = house.pool_status();
    assert_eq!(exposure.total_liability, 4_485);
    assert_eq!(pool.payout_cap, 4_551);
    assert!(exposure.total_liability <= pool.payout_cap);
}

#[test]
fn test_withdrawal_guarded_by_committed_liability() {
    let (house, _) = open_house(62_500);
    house.place_bet(1, BetType::TwoDigit, 5, 69).unwrap(); // 4,485 committed

    // 832 out would drop the cap to 4,484.
    assert!(matches!(
        house.withdraw(832),
        Err(HouseError::InsufficientBankroll { .. })
    ));
    assert_eq!(house.pool_status().total_pool, 62_500);

    let status = house.withdraw(831).unwrap();
    assert_eq!(status.total_pool, 61_669);
    assert_eq!(status.payout_cap, 4_485);
}

#[test]
fn test_monthly_commission_cycle() {
    let (house, clock) = open_house(10_000_000);
    let march = MonthId::new(2026, 3).unwrap();

    // A losing draw: the house pays 650 against 10 collected.
    house.place_bet(1, BetType::TwoDigit, 42, 10).unwrap();
    house.close_draw(1).unwrap();
    house.enter_results(1, WinningNumbers::from_draw(42).unwrap()).unwrap();
    assert_eq!(house.monthly_record(march).unwrap().net_profit, -640);

    clock.set(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 1).unwrap());
    let record = house.calculate_monthly_commission(march).unwrap();
    assert_eq!(record.operator_fee, 0);
    assert!(record.commission_paid);
    assert_eq!(house.pending_operator_fees(), 0);

    // A profitable April.
    let april_draw = house.schedule_draw(clock.now() + Duration::hours(1)).unwrap();
    house.open_draw(april_draw.id).unwrap();
    for number in 0..20 {
        house.place_bet(april_draw.id, BetType::TwoDigit, number, 50).unwrap();
    }
    house.close_draw(april_draw.id).unwrap();
    house
        .enter_results(april_draw.id, WinningNumbers::from_draw(9999).unwrap())
        .unwrap();

    let april = MonthId::new(2026, 4).unwrap();
    clock.set(Utc.with_ymd_and_hms(2026, 5, 2, 0, 0, 0).unwrap());
    let pool_before = house.pool_status().total_pool;
    let record = house.calculate_monthly_commission(april).unwrap();
    assert_eq!(record.net_profit, 1_000);
    assert_eq!(record.operator_fee, 150);
    assert_eq!(house.pool_status().total_pool, pool_before - 150);

    assert_eq!(
        house.calculate_monthly_commission(april).unwrap_err(),
        HouseError::AlreadyCalculated(april)
    );
    assert_eq!(house.pending_operator_fees(), 150);
    assert_eq!(house.withdraw_operator_fees().unwrap(), 150);
    assert_eq!(house.withdraw_operator_fees().unwrap_err(), HouseError::NothingToWithdraw);
}

#[test]
fn test_risk_parameters_validated() {
    let (house, _) = open_house(1_000);
    let before = house.risk_parameters();
    let bad = RiskParameters {
        risk_factor: dec!(1.5),
        ..before.clone()
    };
    assert!(matches!(
        house.set_risk_parameters(bad),
        Err(HouseError::InvalidRiskParameters(_))
    ));
    assert_eq!(house.risk_parameters(), before);
}
