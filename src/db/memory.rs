use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{RideFilter, Store, TransactionFilter, UnitOfWork};
use crate::entities::{Ride, Transaction, Wallet, WalletEntry};
use crate::error::Error;

#[derive(Clone, Debug, Default)]
struct Tables {
    rides: HashMap<Uuid, Ride>,
    transactions: HashMap<Uuid, Transaction>,
    /// Keyed by owner id.
    wallets: HashMap<Uuid, Wallet>,
    wallet_entries: Vec<WalletEntry>,
}

/// In-process store. Units of work are serialized: each one holds the table
/// lock from `begin` until it is committed or dropped.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, Error> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();

        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }

    async fn begin_snapshot(&self) -> Result<Box<dyn UnitOfWork>, Error> {
        // units of work are already serialized
        self.begin().await
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

impl MemoryUnitOfWork {
    fn ride(&self, id: &Uuid) -> Option<Ride> {
        self.working.rides.get(id).cloned()
    }

    fn transaction(&self, id: &Uuid) -> Option<Transaction> {
        self.working.transactions.get(id).cloned()
    }

    fn wallet(&self, owner_id: &Uuid) -> Option<Wallet> {
        self.working.wallets.get(owner_id).cloned()
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_ride(&mut self, id: &Uuid) -> Result<Option<Ride>, Error> {
        Ok(self.ride(id))
    }

    async fn fetch_ride_for_update(&mut self, id: &Uuid) -> Result<Option<Ride>, Error> {
        Ok(self.ride(id))
    }

    async fn insert_ride(&mut self, ride: &Ride) -> Result<(), Error> {
        if self.working.rides.contains_key(&ride.id) {
            return Err(Error::database_error("duplicate ride id"));
        }

        self.working.rides.insert(ride.id, ride.clone());
        Ok(())
    }

    async fn update_ride(&mut self, ride: &Ride) -> Result<(), Error> {
        match self.working.rides.get_mut(&ride.id) {
            Some(stored) => {
                *stored = ride.clone();
                Ok(())
            }
            None => Err(Error::database_error("ride not found")),
        }
    }

    async fn list_rides(&mut self, filter: &RideFilter) -> Result<Vec<Ride>, Error> {
        let mut rides: Vec<Ride> = self
            .working
            .rides
            .values()
            .filter(|ride| filter.matches(ride))
            .cloned()
            .collect();

        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let (offset, limit) = filter.page();
        let limit = limit.map_or(usize::MAX, |limit| limit as usize);

        Ok(rides.into_iter().skip(offset as usize).take(limit).collect())
    }

    async fn find_transaction(&mut self, id: &Uuid) -> Result<Option<Transaction>, Error> {
        Ok(self.transaction(id))
    }

    async fn fetch_transaction_for_update(
        &mut self,
        id: &Uuid,
    ) -> Result<Option<Transaction>, Error> {
        Ok(self.transaction(id))
    }

    async fn find_transaction_for_ride(
        &mut self,
        ride_id: &Uuid,
    ) -> Result<Option<Transaction>, Error> {
        Ok(self
            .working
            .transactions
            .values()
            .find(|transaction| &transaction.ride_id == ride_id)
            .cloned())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), Error> {
        // mirrors the unique constraint on transactions.ride_id
        let ride_taken = self
            .working
            .transactions
            .values()
            .any(|stored| stored.ride_id == transaction.ride_id);

        if ride_taken || self.working.transactions.contains_key(&transaction.id) {
            return Err(Error::database_error("duplicate transaction"));
        }

        self.working
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<(), Error> {
        match self.working.transactions.get_mut(&transaction.id) {
            Some(stored) => {
                *stored = transaction.clone();
                Ok(())
            }
            None => Err(Error::database_error("transaction not found")),
        }
    }

    async fn list_transactions(
        &mut self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, Error> {
        let mut transactions: Vec<Transaction> = self
            .working
            .transactions
            .values()
            .filter(|transaction| filter.matches(transaction))
            .cloned()
            .collect();

        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(transactions)
    }

    async fn find_wallet(&mut self, owner_id: &Uuid) -> Result<Option<Wallet>, Error> {
        Ok(self.wallet(owner_id))
    }

    async fn fetch_or_create_wallet_for_update(
        &mut self,
        default: &Wallet,
    ) -> Result<Wallet, Error> {
        Ok(self
            .working
            .wallets
            .entry(default.owner_id)
            .or_insert_with(|| default.clone())
            .clone())
    }

    async fn fetch_wallet_for_update(&mut self, owner_id: &Uuid) -> Result<Option<Wallet>, Error> {
        Ok(self.wallet(owner_id))
    }

    async fn update_wallet(&mut self, wallet: &Wallet) -> Result<(), Error> {
        match self.working.wallets.get_mut(&wallet.owner_id) {
            Some(stored) if stored.id == wallet.id => {
                *stored = wallet.clone();
                Ok(())
            }
            _ => Err(Error::database_error("wallet not found")),
        }
    }

    async fn list_wallets(&mut self) -> Result<Vec<Wallet>, Error> {
        Ok(self.working.wallets.values().cloned().collect())
    }

    async fn insert_wallet_entry(&mut self, entry: &WalletEntry) -> Result<(), Error> {
        self.working.wallet_entries.push(entry.clone());
        Ok(())
    }

    async fn list_wallet_entries(
        &mut self,
        wallet_id: Option<&Uuid>,
    ) -> Result<Vec<WalletEntry>, Error> {
        Ok(self
            .working
            .wallet_entries
            .iter()
            .filter(|entry| wallet_id.map_or(true, |id| &entry.wallet_id == id))
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;

        Ok(())
    }
}

#[test]
fn memory_store_rollback_on_drop_test() {
    use crate::entities::{ride::sample_request, PaymentMethod};
    use tokio_test::block_on;

    let store = MemoryStore::new();
    let ride = Ride::new(Uuid::new_v4(), sample_request(1000, PaymentMethod::Card)).unwrap();

    block_on(async {
        let mut uow = store.begin().await.unwrap();
        uow.insert_ride(&ride).await.unwrap();
        assert!(uow.find_ride(&ride.id).await.unwrap().is_some());
        drop(uow);

        let mut uow = store.begin().await.unwrap();
        assert!(uow.find_ride(&ride.id).await.unwrap().is_none());

        uow.insert_ride(&ride).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        assert!(uow.find_ride(&ride.id).await.unwrap().is_some());
    });
}

#[test]
fn memory_store_unique_ride_transaction_test() {
    use crate::entities::{ride::sample_request, PaymentMethod, RideCompletion};
    use rust_decimal::Decimal;
    use tokio_test::block_on;

    let store = MemoryStore::new();

    let mut ride = Ride::new(Uuid::new_v4(), sample_request(1000, PaymentMethod::Card)).unwrap();
    ride.accept(Uuid::new_v4()).unwrap();
    ride.start().unwrap();
    ride.complete(RideCompletion {
        distance: Decimal::ONE,
        duration: 4,
        amount: Decimal::from(1000),
    })
    .unwrap();

    let first = Transaction::for_ride(&ride, "RWF".into()).unwrap();
    let second = Transaction::for_ride(&ride, "RWF".into()).unwrap();

    block_on(async {
        let mut uow = store.begin().await.unwrap();
        uow.insert_transaction(&first).await.unwrap();
        assert!(uow.insert_transaction(&second).await.is_err());
    });
}

#[test]
fn memory_store_ride_history_order_test() {
    use crate::entities::{ride::sample_request, PaymentMethod};
    use chrono::Duration;
    use tokio_test::block_on;

    let store = MemoryStore::new();
    let rider_id = Uuid::new_v4();

    let mut older = Ride::new(rider_id, sample_request(100, PaymentMethod::Card)).unwrap();
    older.created_at = older.created_at - Duration::minutes(10);
    let newer = Ride::new(rider_id, sample_request(200, PaymentMethod::Card)).unwrap();
    let unrelated = Ride::new(Uuid::new_v4(), sample_request(300, PaymentMethod::Card)).unwrap();

    block_on(async {
        let mut uow = store.begin().await.unwrap();
        uow.insert_ride(&older).await.unwrap();
        uow.insert_ride(&newer).await.unwrap();
        uow.insert_ride(&unrelated).await.unwrap();

        let filter = RideFilter {
            participant_id: Some(rider_id),
            ..Default::default()
        };
        let rides = uow.list_rides(&filter).await.unwrap();
        let ids: Vec<Uuid> = rides.iter().map(|ride| ride.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        let page = RideFilter {
            participant_id: Some(rider_id),
            offset: 1,
            limit: Some(1),
            ..Default::default()
        };
        let rides = uow.list_rides(&page).await.unwrap();
        assert_eq!(rides.len(), 1);
        assert_eq!(rides[0].id, older.id);
    });
}
