mod common;

use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use bolao::models::{Fixture, PoolStatus, TransactionKind};
use bolao::settlement::{Actor, CreatePoolRequest, SettlementBranch};
use bolao::BolaoError;
use common::{d, guess, World};

#[test]
fn test_single_winner_takes_net() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("10.00");
    let bob = w.funded("10.00");
    let game = w.fixture("1001");
    let pool = w.pool(&creator, &[&game], "5", false, 0);

    w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 2, 1)]).unwrap();
    w.engine.buy_ticket(pool.id, bob.id, &[guess(&game, 0, 0)]).unwrap();
    w.finish(&game, 2, 1);

    let report = w.engine.finalize(pool.id).unwrap();

    assert_eq!(report.branch, SettlementBranch::Winners);
    assert_eq!(report.status, PoolStatus::Finalized);
    assert_eq!(w.balance(&w.operator), d("1.00"));
    assert_eq!(w.balance(&creator.id), d("1.00"));
    assert_eq!(w.balance(&alice.id), d("18.00"));
    assert_eq!(w.balance(&bob.id), d("0.00"));
    assert_eq!(report.total_paid(), d("20.00"));
    for account in [w.operator, creator.id, alice.id, bob.id] {
        w.assert_replay(&account);
    }
}

#[test]
fn test_no_winner_refund_splits_net_per_ticket() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("10.00");
    let bob = w.funded("10.00");
    let game = w.fixture("1002");
    let pool = w.pool(&creator, &[&game], "5", true, 0);

    w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 1, 0)]).unwrap();
    w.engine.buy_ticket(pool.id, bob.id, &[guess(&game, 0, 1)]).unwrap();
    w.finish(&game, 3, 3);

    let report = w.engine.finalize(pool.id).unwrap();

    assert_eq!(report.branch, SettlementBranch::RefundNoWinner);
    assert_eq!(w.balance(&alice.id), d("9.00"));
    assert_eq!(w.balance(&bob.id), d("9.00"));
    assert_eq!(w.balance(&creator.id), d("1.00"));
    assert_eq!(w.balance(&w.operator), d("1.00"));
}

#[test]
fn test_no_winner_creator_takes_net() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("10.00");
    let bob = w.funded("10.00");
    let game = w.fixture("1003");
    let pool = w.pool(&creator, &[&game], "5", false, 0);

    w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 1, 0)]).unwrap();
    w.engine.buy_ticket(pool.id, bob.id, &[guess(&game, 0, 1)]).unwrap();
    w.finish(&game, 2, 2);

    let report = w.engine.finalize(pool.id).unwrap();

    assert_eq!(report.branch, SettlementBranch::CreatorTakesAll);
    assert_eq!(w.balance(&creator.id), d("19.00"));
    assert_eq!(w.balance(&w.operator), d("1.00"));
    assert_eq!(report.paid_to(&creator.id), d("19.00"));
}

#[test]
fn test_uneven_split_remainder_goes_to_creator() {
    let w = World::new();
    let creator = w.funded("0");
    let players: Vec<_> = (0..4).map(|_| w.funded("10.00")).collect();
    let game = w.fixture("1004");
    let pool = w.pool(&creator, &[&game], "0", false, 0);

    for player in &players[..3] {
        w.engine.buy_ticket(pool.id, player.id, &[guess(&game, 1, 0)]).unwrap();
    }
    w.engine.buy_ticket(pool.id, players[3].id, &[guess(&game, 0, 0)]).unwrap();
    w.finish(&game, 1, 0);

    let report = w.engine.finalize(pool.id).unwrap();

    // 40.00 - 2.00 operator = 38.00 over three winners
    assert_eq!(w.balance(&w.operator), d("2.00"));
    for player in &players[..3] {
        assert_eq!(w.balance(&player.id), d("12.66"));
    }
    assert_eq!(w.balance(&creator.id), d("0.02"));
    assert_eq!(report.total_paid(), d("40.00"));
}

#[test]
fn test_winner_with_two_tickets_is_paid_once() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("20.00");
    let bob = w.funded("10.00");
    let game = w.fixture("1005");
    let pool = w.pool(&creator, &[&game], "0", false, 0);

    w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 1, 1)]).unwrap();
    w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 1, 1)]).unwrap();
    w.engine.buy_ticket(pool.id, bob.id, &[guess(&game, 1, 1)]).unwrap();
    w.finish(&game, 1, 1);

    w.engine.finalize(pool.id).unwrap();

    // 30.00 - 1.50 = 28.50 split between two distinct owners
    assert_eq!(w.balance(&alice.id), d("14.25"));
    assert_eq!(w.balance(&bob.id), d("14.25"));
}

#[test]
fn test_below_min_tickets_refunds_even_with_winner() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("10.00");
    let bob = w.funded("10.00");
    let game = w.fixture("1006");
    let pool = w.pool(&creator, &[&game], "5", false, 3);

    w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 2, 0)]).unwrap();
    w.engine.buy_ticket(pool.id, bob.id, &[guess(&game, 0, 2)]).unwrap();
    w.finish(&game, 2, 0);

    let report = w.engine.finalize(pool.id).unwrap();

    assert_eq!(report.branch, SettlementBranch::BelowMinimum);
    assert_eq!(report.status, PoolStatus::Cancelled);
    assert_eq!(w.balance(&alice.id), d("10.00"));
    assert_eq!(w.balance(&bob.id), d("10.00"));
    assert_eq!(w.balance(&w.operator), Decimal::ZERO);
    assert_eq!(w.balance(&creator.id), Decimal::ZERO);
}

#[test]
fn test_finalize_is_idempotent() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("10.00");
    let game = w.fixture("1007");
    let pool = w.pool(&creator, &[&game], "5", false, 0);
    w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 1, 0)]).unwrap();
    w.finish(&game, 1, 0);

    let first = w.engine.finalize(pool.id).unwrap();
    let history = w.ledger.history(&alice.id).unwrap();
    let second = w.engine.finalize(pool.id).unwrap();

    assert!(first.settled());
    assert!(!second.settled());
    assert_eq!(second.branch, SettlementBranch::AlreadyTerminal);
    assert_eq!(w.ledger.history(&alice.id).unwrap(), history);
    assert_eq!(w.balance(&alice.id), d("9.00"));
}

#[test]
fn test_finalize_waits_for_every_fixture() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("10.00");
    let first = w.fixture("1008");
    let second = w.fixture("1009");
    let pool = w.pool(&creator, &[&first, &second], "5", false, 0);
    w.engine
        .buy_ticket(pool.id, alice.id, &[guess(&first, 1, 0), guess(&second, 0, 0)])
        .unwrap();
    w.finish(&first, 1, 0);

    let report = w.engine.finalize(pool.id).unwrap();

    assert_eq!(report.branch, SettlementBranch::AwaitingResults);
    assert_eq!(w.engine.pool(&pool.id).unwrap().status, PoolStatus::Active);
    assert!(report.payouts.is_empty());
}

#[test]
fn test_concurrent_finalize_pays_once() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("10.00");
    let bob = w.funded("10.00");
    let game = w.fixture("1010");
    let pool = w.pool(&creator, &[&game], "5", false, 0);
    w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 1, 0)]).unwrap();
    w.engine.buy_ticket(pool.id, bob.id, &[guess(&game, 1, 0)]).unwrap();
    w.finish(&game, 1, 0);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&w.engine);
            let pool_id = pool.id;
            thread::spawn(move || engine.finalize(pool_id).unwrap())
        })
        .collect();
    let settled = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|report| report.settled())
        .count();

    assert_eq!(settled, 1);
    assert_eq!(w.balance(&alice.id), d("9.00"));
    assert_eq!(w.balance(&bob.id), d("9.00"));
    assert_eq!(w.balance(&w.operator), d("1.00"));
}

#[test]
fn test_cancel_racing_finalize_settles_once() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("10.00");
    let bob = w.funded("10.00");
    let game = w.fixture("1012");
    let pool = w.pool(&creator, &[&game], "5", false, 0);
    w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 2, 0)]).unwrap();
    w.engine.buy_ticket(pool.id, bob.id, &[guess(&game, 0, 0)]).unwrap();
    w.finish(&game, 2, 0);

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let engine = Arc::clone(&w.engine);
            let pool_id = pool.id;
            let creator_id = creator.id;
            thread::spawn(move || {
                if i % 2 == 0 {
                    engine.cancel(pool_id, Actor::user(creator_id)).ok()
                } else {
                    engine.finalize(pool_id).ok()
                }
            })
        })
        .collect();
    let settled: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .filter(|report| report.settled())
        .collect();

    assert_eq!(settled.len(), 1);
    let status = w.engine.pool(&pool.id).unwrap().status;
    assert_eq!(status, settled[0].status);
    assert!(status.is_terminal());

    let accounts = [w.operator, creator.id, alice.id, bob.id];
    let total: Decimal = accounts.iter().map(|id| w.balance(id)).sum();
    assert_eq!(total, d("20.00"));
    assert_eq!(settled[0].total_paid(), d("20.00"));
    for id in &accounts {
        w.assert_replay(id);
    }
}

#[test]
fn test_cancel_refunds_every_ticket() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("25.00");
    let game = w.fixture("1011");
    let pool = w.pool(&creator, &[&game], "5", false, 0);
    w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 1, 0)]).unwrap();
    w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 2, 0)]).unwrap();
    assert_eq!(w.balance(&alice.id), d("5.00"));

    let report = w.engine.cancel(pool.id, Actor::user(creator.id)).unwrap();

    assert_eq!(report.status, PoolStatus::Cancelled);
    assert_eq!(report.total_paid(), d("20.00"));
    assert_eq!(w.balance(&alice.id), d("25.00"));
    assert!(report.payouts.iter().all(|tx| tx.kind == TransactionKind::Payout));
    w.assert_replay(&alice.id);

    // Terminal: no second cancel, entry code is free again
    assert_eq!(
        w.engine.cancel(pool.id, Actor::user(creator.id)),
        Err(BolaoError::AlreadyTerminal)
    );
    assert!(w.ledger.db().pool_by_code(&pool.entry_code).unwrap().is_none());
}

#[test]
fn test_cancel_permissions() {
    let w = World::new();
    let creator = w.funded("0");
    let stranger = w.funded("0");
    let game = w.fixture("1012");
    let pool = w.pool(&creator, &[&game], "5", false, 0);

    assert_eq!(
        w.engine.cancel(pool.id, Actor::user(stranger.id)),
        Err(BolaoError::Unauthorized)
    );
    assert!(w.engine.cancel(pool.id, Actor::admin(stranger.id)).is_ok());
}

#[test]
fn test_pause_and_resume() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("10.00");
    let game = w.fixture("1013");
    let pool = w.pool(&creator, &[&game], "5", false, 0);

    assert_eq!(
        w.engine.pause_guesses(pool.id, Actor::user(alice.id)),
        Err(BolaoError::Unauthorized)
    );
    let paused = w.engine.pause_guesses(pool.id, Actor::user(creator.id)).unwrap();
    assert_eq!(paused.status, PoolStatus::GuessesPaused);
    // Idempotent
    assert!(w.engine.pause_guesses(pool.id, Actor::user(creator.id)).is_ok());

    assert_eq!(
        w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 1, 0)]),
        Err(BolaoError::PoolNotAcceptingEntries)
    );
    assert_eq!(w.balance(&alice.id), d("10.00"));

    w.engine.resume_guesses(pool.id, Actor::user(creator.id)).unwrap();
    assert!(w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 1, 0)]).is_ok());

    w.engine.cancel(pool.id, Actor::user(creator.id)).unwrap();
    assert_eq!(
        w.engine.pause_guesses(pool.id, Actor::user(creator.id)),
        Err(BolaoError::AlreadyTerminal)
    );
}

#[test]
fn test_invalid_guess_rolls_back_debit() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("10.00");
    let first = w.fixture("1014");
    let second = w.fixture("1015");
    let pool = w.pool(&creator, &[&first, &second], "5", false, 0);

    let negative = w.engine.buy_ticket(pool.id, alice.id, &[guess(&first, -1, 0), guess(&second, 0, 0)]);
    assert!(matches!(negative, Err(BolaoError::InvalidGuess(_))));

    let missing = w.engine.buy_ticket(pool.id, alice.id, &[guess(&first, 1, 0)]);
    assert!(matches!(missing, Err(BolaoError::InvalidGuess(_))));

    let duplicate = w.engine.buy_ticket(pool.id, alice.id, &[guess(&first, 1, 0), guess(&first, 2, 0)]);
    assert!(matches!(duplicate, Err(BolaoError::InvalidGuess(_))));

    assert_eq!(w.balance(&alice.id), d("10.00"));
    assert_eq!(w.ledger.history(&alice.id).unwrap().len(), 1);
    assert_eq!(w.engine.pool(&pool.id).unwrap().ticket_count(), 0);
}

#[test]
fn test_buy_ticket_without_funds() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("5.00");
    let game = w.fixture("1016");
    let pool = w.pool(&creator, &[&game], "5", false, 0);

    assert_eq!(
        w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 1, 0)]),
        Err(BolaoError::InsufficientFunds)
    );
    assert_eq!(w.balance(&alice.id), d("5.00"));
}

#[test]
fn test_guess_after_kickoff_is_rejected() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("10.00");
    let game = w.fixture("1017");
    let pool = w.pool(&creator, &[&game], "5", false, 0);

    // Kickoff moves into the past after the pool was created
    let mut started = game.clone();
    started.kickoff = Utc::now() - Duration::minutes(1);
    w.ledger.db().upsert_fixture(started).unwrap();

    assert_eq!(
        w.engine.buy_ticket(pool.id, alice.id, &[guess(&game, 1, 0)]),
        Err(BolaoError::PoolClosedForGuesses)
    );
    assert_eq!(w.balance(&alice.id), d("10.00"));
    assert_eq!(
        w.engine.status_effective(pool.id, Utc::now()).unwrap(),
        PoolStatus::MatchStarted
    );
}

#[test]
fn test_create_pool_validation() {
    let w = World::new();
    let creator = w.funded("0");
    let game = w.fixture("1018");
    let soon = w
        .ledger
        .db()
        .upsert_fixture(Fixture::new("1019", "A", "B", Utc::now() + Duration::minutes(2)))
        .unwrap();

    let request = |stake: &str, fee: &str, fixtures: Vec<uuid::Uuid>, code: Option<&str>| CreatePoolRequest {
        creator: creator.id,
        stake_amount: d(stake),
        fixture_ids: fixtures,
        creator_fee_pct: d(fee),
        refund_on_no_winner: false,
        min_tickets: 0,
        entry_code: code.map(str::to_string),
    };

    assert!(matches!(w.engine.create_pool(request("1.00", "5", vec![game.id], None)), Err(BolaoError::InvalidPool(_))));
    assert!(matches!(w.engine.create_pool(request("10.00", "25", vec![game.id], None)), Err(BolaoError::InvalidPool(_))));
    assert!(matches!(w.engine.create_pool(request("10.00", "5", vec![], None)), Err(BolaoError::InvalidPool(_))));
    assert!(matches!(w.engine.create_pool(request("10.00", "5", vec![soon.id], None)), Err(BolaoError::InvalidPool(_))));
    assert!(matches!(
        w.engine.create_pool(request("10.00", "5", vec![uuid::Uuid::new_v4()], None)),
        Err(BolaoError::NotFound(_))
    ));

    let pool = w.engine.create_pool(request("10.00", "5", vec![game.id], Some("copa"))).unwrap();
    assert_eq!(pool.entry_code, "COPA");
    assert_eq!(pool.operator_fee_pct, d("5"));
    assert!(matches!(
        w.engine.create_pool(request("10.00", "5", vec![game.id], Some("COPA"))),
        Err(BolaoError::InvalidPool(_))
    ));

    // A cancelled pool frees its code
    w.engine.cancel(pool.id, Actor::user(creator.id)).unwrap();
    assert!(w.engine.create_pool(request("10.00", "5", vec![game.id], Some("COPA"))).is_ok());
}

#[test]
fn test_summary_and_settle_fixture() {
    let w = World::new();
    let creator = w.funded("0");
    let alice = w.funded("10.00");
    let bob = w.funded("10.00");
    let game = w.fixture("1020");
    let first = w.pool(&creator, &[&game], "5", false, 0);
    let second = w.pool(&creator, &[&game], "0", true, 0);

    w.engine.buy_ticket(first.id, alice.id, &[guess(&game, 2, 1)]).unwrap();
    w.engine.buy_ticket(second.id, bob.id, &[guess(&game, 0, 0)]).unwrap();

    let summary = w.engine.summary(first.id).unwrap();
    assert_eq!(summary.ticket_count, 1);
    assert_eq!(summary.potential_payout, d("9.00"));
    assert!(summary.winners.is_empty());

    w.finish(&game, 2, 1);
    assert_eq!(w.engine.summary(first.id).unwrap().winners, vec![alice.id]);

    let reports = w.engine.settle_fixture(game.id).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(w.balance(&alice.id), d("9.00"));
    // No winner, refund: 10.00 - 0.50 operator
    assert_eq!(w.balance(&bob.id), d("9.50"));

    // Sweep finds nothing left to do
    assert!(w.engine.sweep().unwrap().is_empty());
}
