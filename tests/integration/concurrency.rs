//! Admission, closing and settlement under contention.

use chrono::Duration;
use drawhouse::risk::BetRequest;
use drawhouse::types::{BetType, DrawStatus, HouseError, WinningNumbers};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use super::{open_house, t0};

const THREADS: usize = 8;

#[test]
fn test_same_number_never_exceeds_cap() {
    // Deep pool: the absolute ceiling binds, so the cap stays at 5,000.
    let (house, _) = open_house(10_000_000);
    let accepted = AtomicUsize::new(0);
    let rejected = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..10 {
                    match house.place_bet(1, BetType::TwoDigit, 13, 10) {
                        Ok(_) => accepted.fetch_add(1, Ordering::SeqCst),
                        Err(HouseError::ExposureLimitExceeded { .. }) => {
                            rejected.fetch_add(1, Ordering::SeqCst)
                        }
                        Err(e) => panic!("unexpected error: {e}"),
                    };
                }
            });
        }
    });

    // 650 per bet: exactly 7 fit under 5,000.
    assert_eq!(accepted.load(Ordering::SeqCst), 7);
    assert_eq!(rejected.load(Ordering::SeqCst), THREADS * 10 - 7);

    let exposure = house.exposure(1, BetType::TwoDigit, 13).unwrap();
    assert_eq!(exposure.total_liability, 4_550);
    assert!(exposure.total_liability <= house.pool_status().payout_cap);
    assert_eq!(house.bets_for_draw(1).unwrap().len(), 7);
    assert_eq!(house.pool_status().escrowed_stakes, 70);
}

#[test]
fn test_overlapping_batches_do_not_deadlock() {
    let (house, _) = open_house(10_000_000);
    let forward: Vec<BetRequest> = (0..10).map(|n| BetRequest::new(BetType::TwoDigit, n, 1)).collect();
    let backward: Vec<BetRequest> = forward.iter().rev().copied().collect();

    thread::scope(|s| {
        for i in 0..THREADS {
            let batch = if i % 2 == 0 { &forward } else { &backward };
            let house = &house;
            s.spawn(move || {
                for _ in 0..20 {
                    let _ = house.place_bets(1, batch);
                }
            });
        }
    });

    let bets = house.bets_for_draw(1).unwrap();
    let records = house.exposure_for_draw(1);
    assert_eq!(records.len(), 10);
    for record in &records {
        assert!(record.total_liability <= 5_000);
        let on_key = bets.iter().filter(|b| b.exposure_key() == record.key).count() as u64;
        assert_eq!(record.bet_count, on_key);
    }
    // Every batch either landed whole or not at all.
    assert_eq!(bets.len() % 10, 0);
}

#[test]
fn test_close_racing_with_bets() {
    let (house, _) = open_house(10_000_000);

    thread::scope(|s| {
        for t in 0..THREADS {
            let house = &house;
            s.spawn(move || {
                for i in 0..50u16 {
                    match house.place_bet(1, BetType::FourDigit, t as u16 * 100 + i, 1) {
                        Ok(_) | Err(HouseError::DrawNotOpen { .. }) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            });
        }
        s.spawn(|| {
            house.close_draw(1).unwrap();
        });
    });

    assert_eq!(house.draw(1).unwrap().status, DrawStatus::Closed);
    let bets = house.bets_for_draw(1).unwrap();
    let stake: i64 = bets.iter().map(|b| b.stake).sum();
    let exposed: i64 = house.exposure_for_draw(1).iter().map(|r| r.total_stake).sum();
    assert_eq!(stake, exposed);
    assert_eq!(house.pool_status().escrowed_stakes, stake);

    // Nothing more gets in once closed.
    assert!(matches!(
        house.place_bet(1, BetType::FourDigit, 9_999, 1),
        Err(HouseError::DrawNotOpen { .. })
    ));
}

#[test]
fn test_settlement_alongside_admission_on_another_draw() {
    let (house, _) = open_house(10_000_000);
    let other = house.schedule_draw(t0() + Duration::hours(3)).unwrap();
    house.open_draw(other.id).unwrap();

    for n in 0..20 {
        house.place_bet(1, BetType::TwoDigit, n, 5).unwrap();
    }
    house.close_draw(1).unwrap();

    thread::scope(|s| {
        for t in 0..THREADS {
            let house = &house;
            let draw_id = other.id;
            s.spawn(move || {
                for i in 0..25u16 {
                    house
                        .place_bet(draw_id, BetType::ThreeDigit, t as u16 * 25 + i, 2)
                        .unwrap();
                }
            });
        }
        s.spawn(|| {
            // Two racing identical settlements: one applies, one replays.
            let winning = WinningNumbers::from_draw(1_207).unwrap();
            let a = house.enter_results(1, winning);
            let b = house.enter_results(1, winning);
            assert_eq!(a.unwrap(), b.unwrap());
        });
    });

    let status = house.pool_status();
    // Draw 1: 100 collected, number 07 won 5 × 65.
    assert_eq!(status.total_pool, 10_000_000 + 100 - 325);
    assert_eq!(status.escrowed_stakes, (THREADS as i64) * 25 * 2);
    assert_eq!(house.bets_for_draw(other.id).unwrap().len(), THREADS * 25);
    assert!(house.exposure_for_draw(1).is_empty());
}

#[test]
fn test_readers_never_see_settled_pool_beside_live_exposure() {
    let (house, _) = open_house(10_000_000);
    house.place_bet(1, BetType::TwoDigit, 7, 10).unwrap();
    house.close_draw(1).unwrap();
    assert_eq!(house.pool_status().committed_liability, 650);
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..THREADS / 2 {
            s.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let settled = house.pool_status().committed_liability == 0;
                    let liability = house.exposure(1, BetType::TwoDigit, 7).unwrap().total_liability;
                    if settled {
                        assert_eq!(liability, 0);
                    }
                }
            });
        }
        s.spawn(|| {
            house
                .enter_results(1, WinningNumbers::from_draw(1_207).unwrap())
                .unwrap();
            done.store(true, Ordering::Release);
        });
    });

    assert_eq!(house.pool_status().committed_liability, 0);
    assert_eq!(house.exposure(1, BetType::TwoDigit, 7).unwrap().total_liability, 0);
}
