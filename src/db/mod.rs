mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::entities::{Ride, Transaction, Wallet, WalletEntry};
use crate::error::Error;

/// Ride history query. Results are ordered newest first.
#[derive(Clone, Debug, Default)]
pub struct RideFilter {
    /// Matches rides where the user is either rider or driver.
    pub participant_id: Option<Uuid>,
    /// Status name as produced by `RideStatus::name`.
    pub status: Option<String>,
    pub offset: i64,
    pub limit: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct TransactionFilter {
    pub participant_id: Option<Uuid>,
    pub status: Option<String>,
}

impl RideFilter {
    /// Offset and limit with negative values clamped to zero.
    pub fn page(&self) -> (i64, Option<i64>) {
        (self.offset.max(0), self.limit.map(|limit| limit.max(0)))
    }

    pub fn matches(&self, ride: &Ride) -> bool {
        let participant = match self.participant_id {
            Some(id) => ride.rider_id == id || ride.driver_id == Some(id),
            None => true,
        };
        let status = match &self.status {
            Some(name) => &ride.status.name() == name,
            None => true,
        };

        participant && status
    }
}

impl TransactionFilter {
    pub fn matches(&self, transaction: &Transaction) -> bool {
        let participant = match self.participant_id {
            Some(id) => transaction.rider_id == id || transaction.driver_id == id,
            None => true,
        };
        let status = match &self.status {
            Some(name) => &transaction.status.name() == name,
            None => true,
        };

        participant && status
    }
}

/// Source of units of work.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, Error>;
    /// Read-only unit of work where every read sees the same committed state.
    async fn begin_snapshot(&self) -> Result<Box<dyn UnitOfWork>, Error>;
}

/// A transaction-scoped view of the store. Writes become visible to others
/// only on `commit`; dropping a unit of work discards them.
///
/// The `*_for_update` reads lock the record until the unit of work ends.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn find_ride(&mut self, id: &Uuid) -> Result<Option<Ride>, Error>;
    async fn fetch_ride_for_update(&mut self, id: &Uuid) -> Result<Option<Ride>, Error>;
    async fn insert_ride(&mut self, ride: &Ride) -> Result<(), Error>;
    async fn update_ride(&mut self, ride: &Ride) -> Result<(), Error>;
    async fn list_rides(&mut self, filter: &RideFilter) -> Result<Vec<Ride>, Error>;

    async fn find_transaction(&mut self, id: &Uuid) -> Result<Option<Transaction>, Error>;
    async fn fetch_transaction_for_update(
        &mut self,
        id: &Uuid,
    ) -> Result<Option<Transaction>, Error>;
    async fn find_transaction_for_ride(
        &mut self,
        ride_id: &Uuid,
    ) -> Result<Option<Transaction>, Error>;
    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), Error>;
    async fn update_transaction(&mut self, transaction: &Transaction) -> Result<(), Error>;
    async fn list_transactions(
        &mut self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, Error>;

    async fn find_wallet(&mut self, owner_id: &Uuid) -> Result<Option<Wallet>, Error>;
    /// Locks the owner's wallet, inserting `default` first if the owner has none.
    async fn fetch_or_create_wallet_for_update(&mut self, default: &Wallet)
        -> Result<Wallet, Error>;
    async fn fetch_wallet_for_update(&mut self, owner_id: &Uuid) -> Result<Option<Wallet>, Error>;
    async fn update_wallet(&mut self, wallet: &Wallet) -> Result<(), Error>;
    async fn list_wallets(&mut self) -> Result<Vec<Wallet>, Error>;

    async fn insert_wallet_entry(&mut self, entry: &WalletEntry) -> Result<(), Error>;
    async fn list_wallet_entries(
        &mut self,
        wallet_id: Option<&Uuid>,
    ) -> Result<Vec<WalletEntry>, Error>;

    async fn commit(self: Box<Self>) -> Result<(), Error>;
}

#[test]
fn ride_filter_page_test() {
    assert_eq!(RideFilter::default().page(), (0, None));

    let filter = RideFilter {
        offset: -3,
        limit: Some(-1),
        ..Default::default()
    };
    assert_eq!(filter.page(), (0, Some(0)));

    let filter = RideFilter {
        offset: 10,
        limit: Some(20),
        ..Default::default()
    };
    assert_eq!(filter.page(), (10, Some(20)));
}
