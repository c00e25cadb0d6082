use super::Engine;

use async_trait::async_trait;

use crate::{
    api::AuditAPI,
    audit::{self, Report, Snapshot},
    auth::{Platform, User},
    db::{RideFilter, TransactionFilter},
    error::Error,
};

#[async_trait]
impl AuditAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn check_consistency(&self, user: User) -> Result<Report, Error> {
        self.authorize(user.clone(), "audit", Platform::default())?;

        let mut uow = self.store.begin_snapshot().await?;

        let snapshot = Snapshot {
            rides: uow.list_rides(&RideFilter::default()).await?,
            transactions: uow.list_transactions(&TransactionFilter::default()).await?,
            wallets: uow.list_wallets().await?,
            wallet_entries: uow.list_wallet_entries(None).await?,
        };

        drop(uow);

        let report = audit::check(&snapshot);

        tracing::info!(
            rides = report.rides,
            transactions = report.transactions,
            wallets = report.wallets,
            violations = report.violations.len(),
            "consistency check finished"
        );

        Ok(report)
    }
}

#[test]
fn check_consistency_after_flows_test() {
    use super::testing::{default_engine, finish_ride, settle_success, Participants};
    use crate::api::{RideAPI, TransactionAPI};
    use crate::entities::{GatewayResult, PaymentMethod};
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();

    block_on(async {
        let (_, paid) = finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;
        settle_success(&engine, paid.id, "PG123").await;

        let (_, declined) =
            finish_ride(&engine, &participants, 800, PaymentMethod::MobileMoney).await;
        engine
            .settle_transaction(
                participants.system.clone(),
                declined.id,
                GatewayResult::Failure {
                    reason: "declined".into(),
                },
            )
            .await
            .unwrap();

        let (rated, _) = finish_ride(&engine, &participants, 600, PaymentMethod::Card).await;
        engine
            .rate_ride(participants.rider.clone(), rated.id, 4, None)
            .await
            .unwrap();

        let report = engine
            .check_consistency(participants.system.clone())
            .await
            .unwrap();

        assert!(report.is_consistent(), "{:?}", report.violations);
        assert_eq!(report.rides, 3);
        assert_eq!(report.transactions, 3);
        assert_eq!(report.wallets, 1);
    });
}

#[test]
fn check_consistency_unauthorized_test() {
    use super::testing::{default_engine, Participants};
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();

    block_on(async {
        for user in [participants.rider.clone(), participants.driver.clone()] {
            let err = engine.check_consistency(user).await.unwrap_err();
            assert!(err.is_unauthorized_error());
        }
    });
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running PostgreSQL instance"]
async fn check_consistency_during_settlement_test() {
    use super::testing::{finish_ride, new_pg_engine, settle_success, Participants};
    use crate::entities::PaymentMethod;

    let engine = new_pg_engine().await;
    let participants = Participants::new();

    let (_, transaction) = finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;

    let mut uow = engine.store.begin_snapshot().await.unwrap();
    let rides = uow.list_rides(&RideFilter::default()).await.unwrap();
    let transactions = uow
        .list_transactions(&TransactionFilter::default())
        .await
        .unwrap();

    // commits between the reads of the audit
    settle_success(&engine, transaction.id, "PG123").await;

    let snapshot = Snapshot {
        rides,
        transactions,
        wallets: uow.list_wallets().await.unwrap(),
        wallet_entries: uow.list_wallet_entries(None).await.unwrap(),
    };
    drop(uow);

    assert!(snapshot
        .wallet_entries
        .iter()
        .all(|entry| entry.transaction_id != transaction.id));

    let report = audit::check(&snapshot);
    assert!(report.is_consistent(), "{:?}", report.violations);

    let report = engine
        .check_consistency(participants.system.clone())
        .await
        .unwrap();
    assert!(report.is_consistent(), "{:?}", report.violations);
}
