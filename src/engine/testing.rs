use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::Engine;
use crate::{
    api::{RideAPI, TransactionAPI},
    auth::User,
    config::Config,
    db::{MemoryStore, PgStore},
    entities::{
        ride::sample_request, GatewayResult, PaymentMethod, Ride, RideCompletion, Transaction,
    },
    error::Error,
    external::{Charge, PaymentGateway},
};

pub enum Behaviour {
    Respond(GatewayResult),
    Fail,
    Hang,
}

pub struct StubGateway {
    behaviour: Behaviour,
    pub charges: Mutex<Vec<Charge>>,
}

impl StubGateway {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            charges: Mutex::new(vec![]),
        }
    }

    pub fn succeeding(reference: &str) -> Self {
        Self::new(Behaviour::Respond(GatewayResult::Success {
            reference: Some(reference.into()),
        }))
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn charge(&self, charge: &Charge) -> Result<GatewayResult, Error> {
        self.charges.lock().unwrap().push(charge.clone());

        match &self.behaviour {
            Behaviour::Respond(result) => Ok(result.clone()),
            Behaviour::Fail => Err(Error::upstream_error()),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::unexpected_error())
            }
        }
    }
}

pub fn new_engine(gateway: Arc<StubGateway>) -> Engine {
    let config = Config {
        gateway_timeout: Duration::from_millis(50),
        ..Config::default()
    };

    Engine::new(Arc::new(MemoryStore::new()), gateway, config).unwrap()
}

/// Engine over the database named by `Config::default()`.
pub async fn new_pg_engine() -> Engine {
    let config = Config::default();
    let store = PgStore::new(&config.database_url, config.max_connections)
        .await
        .unwrap();

    Engine::new(
        Arc::new(store),
        Arc::new(StubGateway::succeeding("PG123")),
        config,
    )
    .unwrap()
}

pub fn default_engine() -> Engine {
    new_engine(Arc::new(StubGateway::succeeding("PG123")))
}

pub struct Participants {
    pub rider: User,
    pub driver: User,
    pub system: User,
}

impl Participants {
    pub fn new() -> Self {
        Self {
            rider: User::new_rider(Uuid::new_v4()),
            driver: User::new_driver(Uuid::new_v4()),
            system: User::new_system_user(),
        }
    }
}

pub async fn book_ride(
    engine: &Engine,
    participants: &Participants,
    amount: i64,
    payment_method: PaymentMethod,
) -> Ride {
    engine
        .create_ride(
            participants.rider.clone(),
            sample_request(amount, payment_method),
        )
        .await
        .unwrap()
}

/// Books, accepts, starts and completes a ride charged at `amount`.
pub async fn finish_ride(
    engine: &Engine,
    participants: &Participants,
    amount: i64,
    payment_method: PaymentMethod,
) -> (Ride, Transaction) {
    let ride = book_ride(engine, participants, amount, payment_method).await;
    let driver = participants.driver.clone();

    engine
        .accept_ride(driver.clone(), ride.id, driver.id)
        .await
        .unwrap();
    engine.start_ride(driver.clone(), ride.id).await.unwrap();
    engine
        .complete_ride(
            driver,
            ride.id,
            RideCompletion {
                distance: Decimal::from(9),
                duration: 22,
                amount: Decimal::from(amount),
            },
        )
        .await
        .unwrap()
}

/// Settles a transaction successfully without going through the gateway.
pub async fn settle_success(engine: &Engine, transaction_id: Uuid, reference: &str) -> Transaction {
    engine
        .settle_transaction(
            User::new_system_user(),
            transaction_id,
            GatewayResult::Success {
                reference: Some(reference.into()),
            },
        )
        .await
        .unwrap()
}
