//! Read-only consistency checks across rides, transactions and wallets.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Rating, Ride, Transaction, Wallet, WalletEntry};

/// Every record the checks look at, read in one unit of work.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub rides: Vec<Ride>,
    pub transactions: Vec<Transaction>,
    pub wallets: Vec<Wallet>,
    pub wallet_entries: Vec<WalletEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    OrphanTransaction {
        transaction_id: Uuid,
        ride_id: Uuid,
    },
    TransactionForUnfinishedRide {
        transaction_id: Uuid,
        ride_id: Uuid,
    },
    AmountMismatch {
        transaction_id: Uuid,
        ride_amount: Decimal,
        transaction_amount: Decimal,
    },
    DuplicateTransaction {
        ride_id: Uuid,
        transaction_id: Uuid,
    },
    MissingWalletEntry {
        transaction_id: Uuid,
        owner_id: Uuid,
        expected_delta: Decimal,
    },
    UnexpectedWalletEntry {
        transaction_id: Uuid,
        wallet_id: Uuid,
        delta: Decimal,
    },
    BalanceMismatch {
        wallet_id: Uuid,
        balance: Decimal,
        entries_total: Decimal,
    },
    NegativeBalance {
        wallet_id: Uuid,
        balance: Decimal,
    },
    InvalidRating {
        ride_id: Uuid,
        score: i32,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    pub checked_at: DateTime<Utc>,
    pub rides: usize,
    pub transactions: usize,
    pub wallets: usize,
    pub violations: Vec<Violation>,
}

impl Report {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Wallet movements a transaction must have produced, as (owner, delta).
fn expected_effects(transaction: &Transaction) -> Vec<(Uuid, Decimal)> {
    if !transaction.is_completed() {
        return vec![];
    }

    let mut effects = vec![(transaction.driver_id, transaction.amount)];

    if transaction.payment_method.is_wallet_funded() {
        effects.push((transaction.rider_id, -transaction.amount));
    }

    effects
}

pub fn check(snapshot: &Snapshot) -> Report {
    let mut violations = Vec::new();

    let rides: HashMap<Uuid, &Ride> = snapshot.rides.iter().map(|r| (r.id, r)).collect();
    let wallets: HashMap<Uuid, &Wallet> = snapshot.wallets.iter().map(|w| (w.id, w)).collect();

    let mut entries_by_transaction: HashMap<Uuid, Vec<&WalletEntry>> = HashMap::new();
    let mut totals_by_wallet: HashMap<Uuid, Decimal> = HashMap::new();
    for entry in snapshot.wallet_entries.iter() {
        entries_by_transaction
            .entry(entry.transaction_id)
            .or_default()
            .push(entry);
        *totals_by_wallet.entry(entry.wallet_id).or_default() += entry.delta;
    }

    for ride in snapshot.rides.iter() {
        if let Some(rating) = ride.rating() {
            if !Rating::is_valid_score(rating.score) {
                violations.push(Violation::InvalidRating {
                    ride_id: ride.id,
                    score: rating.score,
                });
            }
        }
    }

    let mut linked_rides: HashMap<Uuid, Uuid> = HashMap::new();

    for transaction in snapshot.transactions.iter() {
        if linked_rides
            .insert(transaction.ride_id, transaction.id)
            .is_some()
        {
            violations.push(Violation::DuplicateTransaction {
                ride_id: transaction.ride_id,
                transaction_id: transaction.id,
            });
        }

        match rides.get(&transaction.ride_id) {
            None => violations.push(Violation::OrphanTransaction {
                transaction_id: transaction.id,
                ride_id: transaction.ride_id,
            }),
            Some(ride) => {
                if !ride.is_completed() {
                    violations.push(Violation::TransactionForUnfinishedRide {
                        transaction_id: transaction.id,
                        ride_id: ride.id,
                    });
                }

                if ride.amount != transaction.amount {
                    violations.push(Violation::AmountMismatch {
                        transaction_id: transaction.id,
                        ride_amount: ride.amount,
                        transaction_amount: transaction.amount,
                    });
                }
            }
        }

        let mut actual = entries_by_transaction
            .remove(&transaction.id)
            .unwrap_or_default();

        for (owner_id, expected_delta) in expected_effects(transaction) {
            let position = actual.iter().position(|entry| {
                entry.delta == expected_delta
                    && wallets
                        .get(&entry.wallet_id)
                        .map_or(false, |wallet| wallet.owner_id == owner_id)
            });

            match position {
                Some(index) => {
                    actual.swap_remove(index);
                }
                None => violations.push(Violation::MissingWalletEntry {
                    transaction_id: transaction.id,
                    owner_id,
                    expected_delta,
                }),
            }
        }

        for entry in actual {
            violations.push(Violation::UnexpectedWalletEntry {
                transaction_id: transaction.id,
                wallet_id: entry.wallet_id,
                delta: entry.delta,
            });
        }
    }

    // entries pointing at transactions that do not exist
    for (transaction_id, entries) in entries_by_transaction {
        for entry in entries {
            violations.push(Violation::UnexpectedWalletEntry {
                transaction_id,
                wallet_id: entry.wallet_id,
                delta: entry.delta,
            });
        }
    }

    for wallet in snapshot.wallets.iter() {
        let entries_total = totals_by_wallet
            .get(&wallet.id)
            .copied()
            .unwrap_or_default();

        if entries_total != wallet.balance {
            violations.push(Violation::BalanceMismatch {
                wallet_id: wallet.id,
                balance: wallet.balance,
                entries_total,
            });
        }

        if wallet.balance < Decimal::ZERO {
            violations.push(Violation::NegativeBalance {
                wallet_id: wallet.id,
                balance: wallet.balance,
            });
        }
    }

    if !violations.is_empty() {
        tracing::warn!(count = violations.len(), "consistency violations found");
    }

    Report {
        checked_at: Utc::now(),
        rides: snapshot.rides.len(),
        transactions: snapshot.transactions.len(),
        wallets: snapshot.wallets.len(),
        violations,
    }
}

#[cfg(test)]
fn settled_snapshot() -> Snapshot {
    use crate::entities::{
        ride::sample_request, GatewayResult, PaymentMethod, RideCompletion,
    };

    let mut ride = Ride::new(Uuid::new_v4(), sample_request(1000, PaymentMethod::Card)).unwrap();
    ride.accept(Uuid::new_v4()).unwrap();
    ride.start().unwrap();
    ride.complete(RideCompletion {
        distance: Decimal::from(7),
        duration: 15,
        amount: Decimal::from(1000),
    })
    .unwrap();

    let mut transaction = Transaction::for_ride(&ride, "RWF".into()).unwrap();
    transaction
        .settle(GatewayResult::Success {
            reference: Some("PG123".into()),
        })
        .unwrap();

    let mut wallet = Wallet::new(transaction.driver_id, "RWF".into());
    let entry = wallet
        .credit(transaction.id, transaction.amount, "RWF")
        .unwrap();

    Snapshot {
        rides: vec![ride],
        transactions: vec![transaction],
        wallets: vec![wallet],
        wallet_entries: vec![entry],
    }
}

#[test]
fn consistent_snapshot_test() {
    let report = check(&settled_snapshot());

    assert!(report.is_consistent(), "{:?}", report.violations);
    assert_eq!(report.rides, 1);
    assert_eq!(report.transactions, 1);
    assert_eq!(report.wallets, 1);
}

#[test]
fn empty_snapshot_test() {
    assert!(check(&Snapshot::default()).is_consistent());
}

#[test]
fn tampered_balance_test() {
    let mut snapshot = settled_snapshot();
    snapshot.wallets[0].balance = Decimal::from(1500);

    let report = check(&snapshot);

    assert_eq!(
        report.violations,
        vec![Violation::BalanceMismatch {
            wallet_id: snapshot.wallets[0].id,
            balance: Decimal::from(1500),
            entries_total: Decimal::from(1000),
        }]
    );
}

#[test]
fn negative_balance_test() {
    let mut snapshot = settled_snapshot();
    snapshot.wallets[0].balance = Decimal::from(-5);
    snapshot.wallet_entries[0].delta = Decimal::from(-5);

    let report = check(&snapshot);

    assert!(report.violations.contains(&Violation::NegativeBalance {
        wallet_id: snapshot.wallets[0].id,
        balance: Decimal::from(-5),
    }));
    // the credit no longer matches the settled amount either
    assert!(report
        .violations
        .iter()
        .any(|v| matches!(v, Violation::MissingWalletEntry { .. })));
}

#[test]
fn orphan_and_mismatched_transaction_test() {
    let mut snapshot = settled_snapshot();
    let ride_id = snapshot.rides[0].id;
    let transaction_id = snapshot.transactions[0].id;

    snapshot.rides[0].amount = Decimal::from(900);
    let report = check(&snapshot);
    assert!(report.violations.contains(&Violation::AmountMismatch {
        transaction_id,
        ride_amount: Decimal::from(900),
        transaction_amount: Decimal::from(1000),
    }));

    snapshot.rides.clear();
    let report = check(&snapshot);
    assert!(report.violations.contains(&Violation::OrphanTransaction {
        transaction_id,
        ride_id,
    }));
}

#[test]
fn duplicate_transaction_test() {
    let mut snapshot = settled_snapshot();

    let mut duplicate = snapshot.transactions[0].clone();
    duplicate.id = Uuid::new_v4();
    duplicate.status = crate::entities::TransactionStatus::Pending;
    snapshot.transactions.push(duplicate.clone());

    let report = check(&snapshot);

    assert_eq!(
        report.violations,
        vec![Violation::DuplicateTransaction {
            ride_id: duplicate.ride_id,
            transaction_id: duplicate.id,
        }]
    );
}

#[test]
fn entry_without_settlement_test() {
    let mut snapshot = settled_snapshot();
    snapshot.transactions[0].status = crate::entities::TransactionStatus::Pending;

    let report = check(&snapshot);

    assert_eq!(
        report.violations,
        vec![Violation::UnexpectedWalletEntry {
            transaction_id: snapshot.transactions[0].id,
            wallet_id: snapshot.wallets[0].id,
            delta: Decimal::from(1000),
        }]
    );
}

#[test]
fn invalid_rating_test() {
    use crate::entities::RideStatus;

    let mut snapshot = settled_snapshot();
    if let RideStatus::Completed { rating, .. } = &mut snapshot.rides[0].status {
        *rating = Some(Rating {
            score: 9,
            comment: None,
        });
    }

    let report = check(&snapshot);

    assert_eq!(
        report.violations,
        vec![Violation::InvalidRating {
            ride_id: snapshot.rides[0].id,
            score: 9,
        }]
    );
}

#[test]
fn balances_per_wallet_test() {
    use crate::entities::{ride::sample_request, GatewayResult, PaymentMethod, RideCompletion};

    let rider_id = Uuid::new_v4();
    let mut ride = Ride::new(rider_id, sample_request(400, PaymentMethod::Wallet)).unwrap();
    ride.accept(Uuid::new_v4()).unwrap();
    ride.start().unwrap();
    ride.complete(RideCompletion {
        distance: Decimal::from(3),
        duration: 9,
        amount: Decimal::from(400),
    })
    .unwrap();

    let mut transaction = Transaction::for_ride(&ride, "RWF".into()).unwrap();
    transaction
        .settle(GatewayResult::Success { reference: None })
        .unwrap();

    // the rider drove the first ride and spends those earnings on the second
    let mut snapshot = settled_snapshot();
    snapshot.transactions[0].driver_id = rider_id;
    let earning_id = snapshot.transactions[0].id;

    let mut rider_wallet = Wallet::new(rider_id, "RWF".into());
    let mut driver_wallet = Wallet::new(transaction.driver_id, "RWF".into());

    let mut entries = vec![rider_wallet
        .credit(earning_id, Decimal::from(1000), "RWF")
        .unwrap()];
    entries.push(
        rider_wallet
            .debit(transaction.id, Decimal::from(400), "RWF")
            .unwrap(),
    );
    entries.push(
        driver_wallet
            .credit(transaction.id, Decimal::from(400), "RWF")
            .unwrap(),
    );

    snapshot.rides.push(ride);
    snapshot.transactions.push(transaction);
    snapshot.wallets = vec![rider_wallet.clone(), driver_wallet];
    snapshot.wallet_entries = entries;

    let report = check(&snapshot);
    assert!(report.is_consistent(), "{:?}", report.violations);
    assert_eq!(rider_wallet.balance, Decimal::from(600));

    snapshot.wallets[1].balance = Decimal::from(450);
    let report = check(&snapshot);
    assert_eq!(
        report.violations,
        vec![Violation::BalanceMismatch {
            wallet_id: snapshot.wallets[1].id,
            balance: Decimal::from(450),
            entries_total: Decimal::from(400),
        }]
    );
}
