use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::Report;
use crate::auth::User;
use crate::db::{RideFilter, TransactionFilter};
use crate::entities::{
    GatewayResult, Ride, RideCompletion, RideRequest, Transaction, Wallet, WalletEntry,
};
use crate::error::Error;

#[async_trait]
pub trait RideAPI {
    async fn create_ride(&self, user: User, request: RideRequest) -> Result<Ride, Error>;
    async fn find_ride(&self, user: User, id: Uuid) -> Result<Ride, Error>;
    /// Rides the user took part in, newest first. System users see every ride.
    async fn list_rides(&self, user: User, filter: RideFilter) -> Result<Vec<Ride>, Error>;
    async fn accept_ride(&self, user: User, id: Uuid, driver_id: Uuid) -> Result<Ride, Error>;
    async fn start_ride(&self, user: User, id: Uuid) -> Result<Ride, Error>;
    /// Completes the ride and opens its PENDING transaction in the same commit.
    async fn complete_ride(
        &self,
        user: User,
        id: Uuid,
        completion: RideCompletion,
    ) -> Result<(Ride, Transaction), Error>;
    async fn cancel_ride(&self, user: User, id: Uuid, reason: String) -> Result<Ride, Error>;
    async fn rate_ride(
        &self,
        user: User,
        id: Uuid,
        rating: i32,
        comment: Option<String>,
    ) -> Result<Ride, Error>;
}

#[async_trait]
pub trait TransactionAPI {
    async fn create_transaction(&self, user: User, ride_id: Uuid) -> Result<Transaction, Error>;
    async fn find_transaction(&self, user: User, id: Uuid) -> Result<Transaction, Error>;
    async fn find_transaction_for_ride(
        &self,
        user: User,
        ride_id: Uuid,
    ) -> Result<Transaction, Error>;
    async fn list_transactions(
        &self,
        user: User,
        filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, Error>;
    async fn settle_transaction(
        &self,
        user: User,
        id: Uuid,
        result: GatewayResult,
    ) -> Result<Transaction, Error>;
    /// Charges through the payment gateway (or the rider wallet) and settles
    /// with the outcome.
    async fn process_payment(&self, user: User, id: Uuid) -> Result<Transaction, Error>;
}

#[async_trait]
pub trait WalletAPI {
    async fn open_wallet(&self, user: User) -> Result<Wallet, Error>;
    async fn find_wallet(&self, user: User, owner_id: Uuid) -> Result<Wallet, Error>;
    async fn list_wallet_entries(
        &self,
        user: User,
        owner_id: Uuid,
    ) -> Result<Vec<WalletEntry>, Error>;
}

#[async_trait]
pub trait AuditAPI {
    async fn check_consistency(&self, user: User) -> Result<Report, Error>;
}

pub trait API: RideAPI + TransactionAPI + WalletAPI + AuditAPI {}

pub type DynAPI = Arc<dyn API + Send + Sync>;
