use super::helpers::{self, fetch_ride_for_update, fetch_transaction_for_update, open_transaction};
use super::Engine;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::TransactionAPI,
    auth::User,
    db::TransactionFilter,
    entities::{GatewayResult, Transaction},
    error::Error,
    external::Charge,
};

impl Engine {
    async fn settle(&self, id: &Uuid, result: GatewayResult) -> Result<Transaction, Error> {
        let mut uow = self.store.begin().await?;

        let transaction = fetch_transaction_for_update(uow.as_mut(), id).await?;

        helpers::settle(uow, transaction, result).await
    }

    /// Records a failed charge and hands back the error that caused it.
    async fn settle_failure(
        &self,
        id: &Uuid,
        reason: &str,
        error: Error,
    ) -> Result<Transaction, Error> {
        self.settle(
            id,
            GatewayResult::Failure {
                reason: reason.into(),
            },
        )
        .await?;

        Err(error)
    }

    async fn charge_wallet(&self, transaction: &Transaction) -> Result<Transaction, Error> {
        let result = self
            .settle(&transaction.id, GatewayResult::Success { reference: None })
            .await;

        match result {
            Err(err) if err.is_insufficient_funds_error() => {
                tracing::warn!("rider wallet cannot cover the fare");
                self.settle_failure(&transaction.id, "insufficient funds", err)
                    .await
            }
            other => other,
        }
    }

    async fn charge_gateway(&self, transaction: &Transaction) -> Result<Transaction, Error> {
        let charge = Charge::from(transaction);

        let outcome =
            tokio::time::timeout(self.config.gateway_timeout, self.gateway.charge(&charge)).await;

        match outcome {
            Ok(Ok(result)) => self.settle(&transaction.id, result).await,
            Ok(Err(err)) => {
                tracing::error!(error = %err, "payment gateway failed");
                self.settle_failure(
                    &transaction.id,
                    "gateway failure",
                    Error::gateway_failure_error(),
                )
                .await
            }
            Err(_) => {
                tracing::error!(
                    timeout_ms = self.config.gateway_timeout.as_millis() as u64,
                    "payment gateway timed out"
                );
                self.settle_failure(
                    &transaction.id,
                    "gateway timeout",
                    Error::gateway_timeout_error(),
                )
                .await
            }
        }
    }
}

#[async_trait]
impl TransactionAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn create_transaction(&self, user: User, ride_id: Uuid) -> Result<Transaction, Error> {
        let mut uow = self.store.begin().await?;

        let ride = fetch_ride_for_update(uow.as_mut(), &ride_id).await?;

        self.authorize(user.clone(), "complete", ride.clone())?;

        let transaction = open_transaction(uow.as_mut(), &ride, &self.config.currency).await?;

        uow.commit().await?;

        Ok(transaction)
    }

    #[tracing::instrument(skip(self))]
    async fn find_transaction(&self, user: User, id: Uuid) -> Result<Transaction, Error> {
        let mut uow = self.store.begin().await?;

        let transaction = uow
            .find_transaction(&id)
            .await?
            .ok_or_else(Error::invalid_input_error)?;

        self.authorize(user.clone(), "read", transaction.clone())?;

        Ok(transaction)
    }

    #[tracing::instrument(skip(self))]
    async fn find_transaction_for_ride(
        &self,
        user: User,
        ride_id: Uuid,
    ) -> Result<Transaction, Error> {
        let mut uow = self.store.begin().await?;

        let transaction = uow
            .find_transaction_for_ride(&ride_id)
            .await?
            .ok_or_else(Error::invalid_input_error)?;

        self.authorize(user.clone(), "read", transaction.clone())?;

        Ok(transaction)
    }

    #[tracing::instrument(skip(self))]
    async fn list_transactions(
        &self,
        user: User,
        mut filter: TransactionFilter,
    ) -> Result<Vec<Transaction>, Error> {
        if !user.is_system() {
            filter.participant_id = Some(user.id);
        }

        let mut uow = self.store.begin().await?;

        uow.list_transactions(&filter).await
    }

    #[tracing::instrument(skip(self))]
    async fn settle_transaction(
        &self,
        user: User,
        id: Uuid,
        result: GatewayResult,
    ) -> Result<Transaction, Error> {
        let mut uow = self.store.begin().await?;

        let transaction = fetch_transaction_for_update(uow.as_mut(), &id).await?;

        self.authorize(user.clone(), "settle", transaction.clone())?;

        helpers::settle(uow, transaction, result).await
    }

    #[tracing::instrument(skip(self))]
    async fn process_payment(&self, user: User, id: Uuid) -> Result<Transaction, Error> {
        // no lock is held while the gateway is working
        let transaction = {
            let mut uow = self.store.begin().await?;

            uow.find_transaction(&id)
                .await?
                .ok_or_else(Error::invalid_input_error)?
        };

        self.authorize(user.clone(), "process_payment", transaction.clone())?;

        if !transaction.is_pending() {
            return Err(Error::already_settled_error());
        }

        if transaction.payment_method.is_wallet_funded() {
            self.charge_wallet(&transaction).await
        } else {
            self.charge_gateway(&transaction).await
        }
    }
}

#[test]
fn settle_transaction_idempotent_test() {
    use super::testing::{default_engine, finish_ride, settle_success, Participants};
    use crate::api::WalletAPI;
    use crate::entities::PaymentMethod;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();

    block_on(async {
        let (_, transaction) =
            finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;

        let settled = settle_success(&engine, transaction.id, "PG123").await;
        assert!(settled.is_completed());
        assert_eq!(settled.payment_reference(), Some("PG123"));

        // the same result again is a no-op
        let again = settle_success(&engine, transaction.id, "PG123").await;
        assert_eq!(again.status, settled.status);

        let err = engine
            .settle_transaction(
                participants.system.clone(),
                transaction.id,
                GatewayResult::Failure {
                    reason: "declined".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_already_settled_error());

        let err = engine
            .settle_transaction(
                participants.system.clone(),
                transaction.id,
                GatewayResult::Success {
                    reference: Some("PG999".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_already_settled_error());

        // credited exactly once
        let wallet = engine
            .find_wallet(participants.driver.clone(), participants.driver.id)
            .await
            .unwrap();
        assert_eq!(wallet.balance, rust_decimal::Decimal::from(1000));
    });
}

#[test]
fn settle_transaction_unauthorized_test() {
    use super::testing::{default_engine, finish_ride, Participants};
    use crate::entities::PaymentMethod;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();

    block_on(async {
        let (_, transaction) =
            finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;

        for user in [participants.rider.clone(), participants.driver.clone()] {
            let err = engine
                .settle_transaction(
                    user,
                    transaction.id,
                    GatewayResult::Success { reference: None },
                )
                .await
                .unwrap_err();
            assert!(err.is_unauthorized_error());
        }

        let err = engine
            .process_payment(participants.rider.clone(), transaction.id)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        // participants can still read it
        let found = engine
            .find_transaction(participants.rider.clone(), transaction.id)
            .await
            .unwrap();
        assert!(found.is_pending());

        let err = engine
            .find_transaction(User::new_rider(Uuid::new_v4()), transaction.id)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());
    });
}

#[test]
fn duplicate_transaction_test() {
    use super::testing::{book_ride, default_engine, finish_ride, Participants};
    use crate::entities::PaymentMethod;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();

    block_on(async {
        let (ride, transaction) =
            finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;

        let err = engine
            .create_transaction(participants.driver.clone(), ride.id)
            .await
            .unwrap_err();
        assert!(err.is_duplicate_transaction_error());

        let found = engine
            .find_transaction_for_ride(participants.driver.clone(), ride.id)
            .await
            .unwrap();
        assert_eq!(found.id, transaction.id);

        let pending = book_ride(&engine, &participants, 700, PaymentMethod::Card).await;
        let err = engine
            .create_transaction(participants.system.clone(), pending.id)
            .await
            .unwrap_err();
        assert!(err.is_invalid_transition_error());
    });
}

#[test]
fn process_payment_gateway_success_test() {
    use super::testing::{finish_ride, new_engine, Participants, StubGateway};
    use crate::api::WalletAPI;
    use crate::entities::PaymentMethod;
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use tokio_test::block_on;

    let gateway = Arc::new(StubGateway::succeeding("PG123"));
    let engine = new_engine(gateway.clone());
    let participants = Participants::new();

    block_on(async {
        let (_, transaction) =
            finish_ride(&engine, &participants, 1000, PaymentMethod::MobileMoney).await;

        let settled = engine
            .process_payment(participants.system.clone(), transaction.id)
            .await
            .unwrap();
        assert!(settled.is_completed());
        assert_eq!(settled.payment_reference(), Some("PG123"));

        let charges = gateway.charges.lock().unwrap().clone();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].idempotency_key, transaction.id);
        assert_eq!(charges[0].payer_id, participants.rider.id);
        assert_eq!(charges[0].payee_id, participants.driver.id);
        assert_eq!(charges[0].amount, Decimal::from(1000));

        let wallet = engine
            .find_wallet(participants.driver.clone(), participants.driver.id)
            .await
            .unwrap();
        assert_eq!(wallet.balance, Decimal::from(1000));

        let err = engine
            .process_payment(participants.system.clone(), transaction.id)
            .await
            .unwrap_err();
        assert!(err.is_already_settled_error());
        assert_eq!(gateway.charges.lock().unwrap().len(), 1);
    });
}

#[test]
fn process_payment_declined_test() {
    use super::testing::{finish_ride, new_engine, Behaviour, Participants, StubGateway};
    use crate::api::WalletAPI;
    use crate::entities::{PaymentMethod, TransactionStatus};
    use std::sync::Arc;
    use tokio_test::block_on;

    let gateway = Arc::new(StubGateway::new(Behaviour::Respond(
        GatewayResult::Failure {
            reason: "card declined".into(),
        },
    )));
    let engine = new_engine(gateway);
    let participants = Participants::new();

    block_on(async {
        let (_, transaction) =
            finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;

        let settled = engine
            .process_payment(participants.system.clone(), transaction.id)
            .await
            .unwrap();
        assert!(
            matches!(&settled.status, TransactionStatus::Failed { reason, .. } if reason == "card declined")
        );

        // no money moved
        let err = engine
            .find_wallet(participants.driver.clone(), participants.driver.id)
            .await
            .unwrap_err();
        assert!(err.is_invalid_input_error());
    });
}

#[test]
fn process_payment_gateway_failure_test() {
    use super::testing::{finish_ride, new_engine, Behaviour, Participants, StubGateway};
    use crate::entities::PaymentMethod;
    use std::sync::Arc;

    let engine = new_engine(Arc::new(StubGateway::new(Behaviour::Fail)));
    let participants = Participants::new();

    tokio_test::block_on(async {
        let (_, transaction) =
            finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;

        let err = engine
            .process_payment(participants.system.clone(), transaction.id)
            .await
            .unwrap_err();
        assert!(err.is_gateway_failure_error());

        let stored = engine
            .find_transaction(participants.system.clone(), transaction.id)
            .await
            .unwrap();
        assert_eq!(stored.status.name(), "failed");
    });
}

#[tokio::test]
async fn process_payment_gateway_timeout_test() {
    use super::testing::{finish_ride, new_engine, Behaviour, Participants, StubGateway};
    use crate::entities::PaymentMethod;
    use std::sync::Arc;

    let engine = new_engine(Arc::new(StubGateway::new(Behaviour::Hang)));
    let participants = Participants::new();

    let (_, transaction) = finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;

    let err = engine
        .process_payment(participants.system.clone(), transaction.id)
        .await
        .unwrap_err();
    assert!(err.is_gateway_timeout_error());

    let stored = engine
        .find_transaction(participants.system.clone(), transaction.id)
        .await
        .unwrap();
    assert_eq!(stored.status.name(), "failed");
}

#[test]
fn process_payment_wallet_test() {
    use super::testing::{finish_ride, new_engine, settle_success, Participants, StubGateway};
    use crate::api::WalletAPI;
    use crate::entities::PaymentMethod;
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use tokio_test::block_on;

    let gateway = Arc::new(StubGateway::succeeding("PG123"));
    let engine = new_engine(gateway.clone());
    let participants = Participants::new();
    // the rider earns as a driver first
    let earner = Participants {
        rider: User::new_rider(Uuid::new_v4()),
        driver: User::new_driver(participants.rider.id),
        system: participants.system.clone(),
    };

    block_on(async {
        let (_, earning) = finish_ride(&engine, &earner, 1500, PaymentMethod::Card).await;
        settle_success(&engine, earning.id, "PG001").await;
        let charges_before = gateway.charges.lock().unwrap().len();

        let (_, transaction) =
            finish_ride(&engine, &participants, 1000, PaymentMethod::Wallet).await;

        let settled = engine
            .process_payment(participants.system.clone(), transaction.id)
            .await
            .unwrap();
        assert!(settled.is_completed());
        assert_eq!(settled.payment_reference(), None);
        assert_eq!(gateway.charges.lock().unwrap().len(), charges_before);

        let rider_wallet = engine
            .find_wallet(participants.rider.clone(), participants.rider.id)
            .await
            .unwrap();
        assert_eq!(rider_wallet.balance, Decimal::from(500));

        let driver_wallet = engine
            .find_wallet(participants.driver.clone(), participants.driver.id)
            .await
            .unwrap();
        assert_eq!(driver_wallet.balance, Decimal::from(1000));
    });
}

#[test]
fn process_payment_insufficient_funds_test() {
    use super::testing::{default_engine, finish_ride, Participants};
    use crate::api::WalletAPI;
    use crate::entities::PaymentMethod;
    use rust_decimal::Decimal;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();

    block_on(async {
        engine
            .open_wallet(participants.rider.clone())
            .await
            .unwrap();

        let (_, transaction) =
            finish_ride(&engine, &participants, 1000, PaymentMethod::Wallet).await;

        let err = engine
            .process_payment(participants.system.clone(), transaction.id)
            .await
            .unwrap_err();
        assert!(err.is_insufficient_funds_error());

        let stored = engine
            .find_transaction(participants.rider.clone(), transaction.id)
            .await
            .unwrap();
        assert_eq!(stored.status.name(), "failed");

        let rider_wallet = engine
            .find_wallet(participants.rider.clone(), participants.rider.id)
            .await
            .unwrap();
        assert_eq!(rider_wallet.balance, Decimal::ZERO);

        // the driver credit was rolled back along with the failed debit
        let err = engine
            .find_wallet(participants.driver.clone(), participants.driver.id)
            .await
            .unwrap_err();
        assert!(err.is_invalid_input_error());
    });
}

#[test]
fn list_transactions_test() {
    use super::testing::{default_engine, finish_ride, settle_success, Participants};
    use crate::entities::PaymentMethod;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();
    let others = Participants::new();

    block_on(async {
        let (_, first) = finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;
        finish_ride(&engine, &participants, 2000, PaymentMethod::Card).await;
        finish_ride(&engine, &others, 3000, PaymentMethod::Card).await;

        settle_success(&engine, first.id, "PG123").await;

        let mine = engine
            .list_transactions(participants.rider.clone(), TransactionFilter::default())
            .await
            .unwrap();
        assert_eq!(mine.len(), 2);

        let completed = engine
            .list_transactions(
                participants.driver.clone(),
                TransactionFilter {
                    status: Some("completed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, first.id);

        let all = engine
            .list_transactions(participants.system.clone(), TransactionFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_settlement_test() {
    use super::testing::{default_engine, finish_ride, Participants};
    use crate::api::WalletAPI;
    use crate::entities::PaymentMethod;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    let engine = Arc::new(default_engine());
    let participants = Participants::new();

    let (_, transaction) = finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;
    let transaction_id = transaction.id;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let system = participants.system.clone();
            tokio::spawn(async move {
                engine
                    .settle_transaction(
                        system,
                        transaction_id,
                        GatewayResult::Success {
                            reference: Some("PG123".into()),
                        },
                    )
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert!(result.unwrap().unwrap().is_completed());
    }

    let wallet = engine
        .find_wallet(participants.driver.clone(), participants.driver.id)
        .await
        .unwrap();
    assert_eq!(wallet.balance, Decimal::from(1000));

    let entries = engine
        .list_wallet_entries(participants.driver.clone(), participants.driver.id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a running PostgreSQL instance"]
async fn pg_concurrent_settlement_test() {
    use super::testing::{finish_ride, new_pg_engine, Participants};
    use crate::api::WalletAPI;
    use crate::entities::PaymentMethod;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    let engine = Arc::new(new_pg_engine().await);
    let participants = Participants::new();

    let mut transaction_ids = Vec::new();
    for _ in 0..4 {
        let (_, transaction) =
            finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;
        transaction_ids.push(transaction.id);
    }

    // every transaction settled twice at once; the driver wallet does not exist yet
    let handles: Vec<_> = transaction_ids
        .iter()
        .chain(transaction_ids.iter())
        .map(|&transaction_id| {
            let engine = engine.clone();
            let system = participants.system.clone();
            tokio::spawn(async move {
                engine
                    .settle_transaction(
                        system,
                        transaction_id,
                        GatewayResult::Success {
                            reference: Some("PG123".into()),
                        },
                    )
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert!(result.unwrap().unwrap().is_completed());
    }

    let wallet = engine
        .find_wallet(participants.driver.clone(), participants.driver.id)
        .await
        .unwrap();
    assert_eq!(wallet.balance, Decimal::from(4000));

    let entries = engine
        .list_wallet_entries(participants.driver.clone(), participants.driver.id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 4);
    assert!(entries
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at));
}
