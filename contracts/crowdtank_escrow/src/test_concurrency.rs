use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;

use parking_lot::Mutex;

use crate::invariants::assert_all_invariants;
use crate::{
    Amount, CampaignStatus, CrowdTank, EscrowError, EscrowEvent, Identity, InMemoryLedger, Ledger,
    ManualClock, MemorySink, NewCampaign, NullSink, TransferError, Withdrawal,
};

type Tank = CrowdTank<Arc<InMemoryLedger>, Arc<ManualClock>, Arc<MemorySink>>;

fn setup() -> Tank {
    CrowdTank::new(
        Arc::new(InMemoryLedger::new()),
        Arc::new(ManualClock::new(0)),
        Arc::new(MemorySink::new()),
    )
}

fn new_campaign(goal: Amount, id: u64) -> NewCampaign {
    NewCampaign {
        name: format!("campaign {id}"),
        description: String::new(),
        goal,
        duration_secs: 100,
        id: Some(id),
    }
}

#[test]
fn test_concurrent_contributions_are_not_lost() {
    let tank = setup();
    let creator = Identity::from("creator");
    tank.create_project(&creator, new_campaign(10_000, 1)).unwrap();
    tank.create_project(&creator, new_campaign(10_000, 2)).unwrap();

    thread::scope(|s| {
        for t in 0..8 {
            let tank = &tank;
            s.spawn(move || {
                let donor = Identity::new(format!("donor-{}", t % 4));
                for _ in 0..250 {
                    tank.fund_project(&donor, 1 + (t % 2) as u64, 1).unwrap();
                }
            });
        }
    });

    assert_eq!(tank.get_project(1).unwrap().amount_raised, 1_000);
    assert_eq!(tank.get_project(2).unwrap().amount_raised, 1_000);
    assert_eq!(tank.get_contribution(1, &Identity::from("donor-0")).unwrap(), 500);
    assert_eq!(tank.get_contribution(2, &Identity::from("donor-1")).unwrap(), 500);
    assert_all_invariants(&tank);
}

#[test]
fn test_concurrent_create_same_id_admits_one() {
    let tank = setup();
    let tank_ref = &tank;
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..16)
            .map(|t| {
                s.spawn(move || {
                    let creator = Identity::new(format!("creator-{t}"));
                    tank_ref.create_project(&creator, new_campaign(100, 7))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| **r == Ok(7)).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == EscrowError::DuplicateId(7)));
    assert_eq!(tank.registry().len(), 1);
    assert_eq!(tank.sink().events_for(7).len(), 1);
}

#[test]
fn test_concurrent_auto_ids_are_unique() {
    let tank = setup();
    let creator = Identity::from("creator");
    for taken in [2, 5, 9] {
        tank.create_project(&creator, new_campaign(100, taken)).unwrap();
    }

    let (tank_ref, creator_ref) = (&tank, &creator);
    let mut ids: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..32)
            .map(|_| {
                s.spawn(move || {
                    let mut campaign = new_campaign(100, 0);
                    campaign.id = None;
                    tank_ref.create_project(creator_ref, campaign).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 32);
    assert!(ids.iter().all(|id| ![2, 5, 9].contains(id)));
    assert_eq!(tank.registry().len(), 35);
    assert_all_invariants(&tank);
}

#[test]
fn test_concurrent_contributions_report_their_own_total() {
    let tank = setup();
    let creator = Identity::from("creator");
    tank.create_project(&creator, new_campaign(10_000, 1)).unwrap();

    let tank_ref = &tank;
    let mut totals: Vec<Amount> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|t| {
                s.spawn(move || {
                    let donor = Identity::new(format!("donor-{t}"));
                    (0..50)
                        .map(|_| tank_ref.fund_project(&donor, 1, 1).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    // Each call sees the total right after its own commit, so every
    // value from 1 to 400 is reported exactly once.
    totals.sort_unstable();
    assert_eq!(totals, (1..=400).collect::<Vec<Amount>>());
    assert_eq!(tank.get_project(1).unwrap().amount_raised, 400);
}

#[test]
fn test_concurrent_creator_withdrawals_pay_once() {
    let tank = setup();
    let creator = Identity::from("creator");
    let donor = Identity::from("donor");
    tank.create_project(&creator, new_campaign(100, 1)).unwrap();
    tank.fund_project(&donor, 1, 150).unwrap();
    tank.clock().advance(100);
    tank.check_project_status(1).unwrap();

    let (tank_ref, creator_ref) = (&tank, &creator);
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..16)
            .map(|_| s.spawn(move || tank_ref.user_withdraw_funds(creator_ref, 1)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let paid: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(paid.len(), 1);
    assert_eq!(*paid[0], Ok(Withdrawal::Creator { amount: 150 }));
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == EscrowError::AlreadyWithdrawn(1)));
    assert_eq!(tank.ledger().balance_of(&creator), 150);
    assert_all_invariants(&tank);
}

#[test]
fn test_concurrent_refunds_pay_each_contributor_once() {
    let tank = setup();
    let creator = Identity::from("creator");
    tank.create_project(&creator, new_campaign(1_000_000, 1)).unwrap();
    let donors: Vec<Identity> = (0..6).map(|i| Identity::new(format!("d{i}"))).collect();
    for (i, donor) in donors.iter().enumerate() {
        tank.fund_project(donor, 1, 10 * (i as Amount + 1)).unwrap();
    }
    tank.clock().advance(100);
    assert_eq!(tank.check_project_status(1).unwrap(), CampaignStatus::Failed);

    thread::scope(|s| {
        for donor in &donors {
            for _ in 0..4 {
                let tank = &tank;
                s.spawn(move || {
                    let _ = tank.user_withdraw_funds(donor, 1);
                });
            }
        }
    });

    for (i, donor) in donors.iter().enumerate() {
        assert_eq!(tank.ledger().balance_of(donor), 10 * (i as Amount + 1));
    }
    assert_eq!(tank.ledger().total_released(), 210);
    assert_eq!(tank.get_project(1).unwrap().custody_balance, 0);
    assert_all_invariants(&tank);
}

#[test]
fn test_finalize_racing_contributions_picks_one_order() {
    let tank = setup();
    let creator = Identity::from("creator");
    tank.create_project(&creator, new_campaign(500, 1)).unwrap();

    let tank_ref = &tank;
    let accepted: u128 = thread::scope(|s| {
        let funders: Vec<_> = (0..4)
            .map(|t| {
                let tank = tank_ref;
                s.spawn(move || {
                    let donor = Identity::new(format!("racer-{t}"));
                    let mut ok = 0u128;
                    for _ in 0..200 {
                        match tank.fund_project(&donor, 1, 1) {
                            Ok(_) => ok += 1,
                            Err(e) => assert_eq!(e, EscrowError::CampaignClosed(1)),
                        }
                    }
                    ok
                })
            })
            .collect();
        s.spawn(|| {
            tank.clock().advance(100);
            for _ in 0..50 {
                tank.check_project_status(1).unwrap();
            }
        });
        funders.into_iter().map(|h| h.join().unwrap()).sum()
    });

    let project = tank.get_project(1).unwrap();
    assert_eq!(project.amount_raised, accepted);
    assert!(project.status.is_terminal());

    let finalized: Vec<_> = tank
        .sink()
        .events()
        .into_iter()
        .filter_map(|e| match e {
            EscrowEvent::ProjectFinalized { amount_raised, .. } => Some(amount_raised),
            _ => None,
        })
        .collect();
    assert_eq!(finalized, vec![accepted]);
    assert_all_invariants(&tank);
}

/// Ledger that calls back into the engine from inside `release`.
struct ReentrantLedger {
    books: InMemoryLedger,
    tank: OnceLock<Weak<ReentrantTank>>,
    observed: Mutex<Vec<Result<Withdrawal, EscrowError>>>,
}

type ReentrantTank = CrowdTank<ReentrantLedger, Arc<ManualClock>, NullSink>;

impl Ledger for ReentrantLedger {
    fn release(&self, recipient: &Identity, amount: Amount) -> Result<(), TransferError> {
        if let Some(tank) = self.tank.get().and_then(Weak::upgrade) {
            let again = tank.user_withdraw_funds(recipient, 1);
            self.observed.lock().push(again);
        }
        self.books.release(recipient, amount)
    }
}

#[test]
fn test_reentrant_withdrawal_observes_claim_taken() {
    let ledger = ReentrantLedger {
        books: InMemoryLedger::new(),
        tank: OnceLock::new(),
        observed: Mutex::new(Vec::new()),
    };
    let tank = Arc::new(CrowdTank::new(ledger, Arc::new(ManualClock::new(0)), NullSink));
    assert!(tank.ledger().tank.set(Arc::downgrade(&tank)).is_ok());

    let creator = Identity::from("creator");
    let donor = Identity::from("donor");
    tank.create_project(&creator, new_campaign(100, 1)).unwrap();
    tank.fund_project(&donor, 1, 100).unwrap();
    tank.clock().advance(100);
    tank.check_project_status(1).unwrap();

    assert_eq!(
        tank.user_withdraw_funds(&creator, 1).unwrap(),
        Withdrawal::Creator { amount: 100 }
    );
    let expected: Vec<Result<Withdrawal, EscrowError>> =
        vec![Err(EscrowError::AlreadyWithdrawn(1))];
    assert_eq!(*tank.ledger().observed.lock(), expected);
    assert_eq!(tank.ledger().books.balance_of(&creator), 100);
    assert_eq!(tank.ledger().books.total_released(), 100);
}

/// Ledger that panics on its first release.
#[derive(Default)]
struct FlakyLedger {
    books: InMemoryLedger,
    tripped: AtomicBool,
}

impl Ledger for FlakyLedger {
    fn release(&self, recipient: &Identity, amount: Amount) -> Result<(), TransferError> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("ledger connection dropped");
        }
        self.books.release(recipient, amount)
    }
}

#[test]
fn test_panicking_ledger_restores_claim() {
    let tank = CrowdTank::new(FlakyLedger::default(), Arc::new(ManualClock::new(0)), NullSink);
    let creator = Identity::from("creator");
    let donor = Identity::from("donor");
    tank.create_project(&creator, new_campaign(100, 1)).unwrap();
    tank.fund_project(&donor, 1, 40).unwrap();
    tank.clock().advance(100);
    tank.check_project_status(1).unwrap();

    let outcome = catch_unwind(AssertUnwindSafe(|| tank.user_withdraw_funds(&donor, 1)));
    assert!(outcome.is_err());
    assert!(!tank.get_contributions(1).unwrap()[0].refunded);

    assert_eq!(
        tank.user_withdraw_funds(&donor, 1).unwrap(),
        Withdrawal::Refund { amount: 40 }
    );
    assert_eq!(tank.ledger().books.balance_of(&donor), 40);
}

/// Ledger that parks inside `release` until told to continue.
struct GatedLedger {
    books: InMemoryLedger,
    entered: Mutex<Sender<()>>,
    proceed: Mutex<Receiver<()>>,
}

impl Ledger for GatedLedger {
    fn release(&self, recipient: &Identity, amount: Amount) -> Result<(), TransferError> {
        self.entered.lock().send(()).ok();
        self.proceed.lock().recv().ok();
        self.books.release(recipient, amount)
    }
}

#[test]
fn test_campaign_lock_is_not_held_during_transfer() {
    let (entered_tx, entered_rx) = channel();
    let (proceed_tx, proceed_rx) = channel();
    let ledger = GatedLedger {
        books: InMemoryLedger::new(),
        entered: Mutex::new(entered_tx),
        proceed: Mutex::new(proceed_rx),
    };
    let tank = CrowdTank::new(ledger, Arc::new(ManualClock::new(0)), NullSink);
    let creator = Identity::from("creator");
    let donor = Identity::from("donor");
    tank.create_project(&creator, new_campaign(100, 1)).unwrap();
    tank.create_project(&creator, new_campaign(100, 2)).unwrap();
    tank.fund_project(&donor, 1, 100).unwrap();
    tank.clock().advance(100);
    tank.check_project_status(1).unwrap();

    thread::scope(|s| {
        let withdrawal = s.spawn(|| tank.user_withdraw_funds(&creator, 1));
        entered_rx.recv().unwrap();

        // The transfer is parked; the same campaign and others stay usable.
        let view = tank.get_project(1).unwrap();
        assert!(!view.creator_withdrawn);
        assert_eq!(view.custody_balance, 100);
        assert_eq!(
            tank.user_withdraw_funds(&creator, 1).unwrap_err(),
            EscrowError::AlreadyWithdrawn(1)
        );
        tank.fund_project(&donor, 2, 5).unwrap();

        proceed_tx.send(()).unwrap();
        assert_eq!(
            withdrawal.join().unwrap().unwrap(),
            Withdrawal::Creator { amount: 100 }
        );
    });

    assert!(tank.get_project(1).unwrap().creator_withdrawn);
    assert_eq!(tank.get_project(2).unwrap().amount_raised, 5);
}
