use super::Engine;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::WalletAPI,
    auth::{Platform, User},
    entities::{Wallet, WalletEntry},
    error::Error,
};

#[async_trait]
impl WalletAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn open_wallet(&self, user: User) -> Result<Wallet, Error> {
        self.authorize(user.clone(), "open_wallet", Platform::default())?;

        let mut uow = self.store.begin().await?;

        let default = Wallet::new(user.id, self.config.currency.clone());
        let wallet = uow.fetch_or_create_wallet_for_update(&default).await?;

        uow.commit().await?;

        Ok(wallet)
    }

    #[tracing::instrument(skip(self))]
    async fn find_wallet(&self, user: User, owner_id: Uuid) -> Result<Wallet, Error> {
        let mut uow = self.store.begin().await?;

        let wallet = uow
            .find_wallet(&owner_id)
            .await?
            .ok_or_else(Error::invalid_input_error)?;

        self.authorize(user.clone(), "read", wallet.clone())?;

        Ok(wallet)
    }

    #[tracing::instrument(skip(self))]
    async fn list_wallet_entries(
        &self,
        user: User,
        owner_id: Uuid,
    ) -> Result<Vec<WalletEntry>, Error> {
        let mut uow = self.store.begin().await?;

        let wallet = uow
            .find_wallet(&owner_id)
            .await?
            .ok_or_else(Error::invalid_input_error)?;

        self.authorize(user.clone(), "read", wallet.clone())?;

        uow.list_wallet_entries(Some(&wallet.id)).await
    }
}

#[test]
fn open_wallet_test() {
    use super::testing::{default_engine, Participants};
    use rust_decimal::Decimal;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();

    block_on(async {
        let wallet = engine
            .open_wallet(participants.rider.clone())
            .await
            .unwrap();
        assert_eq!(wallet.owner_id, participants.rider.id);
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert_eq!(wallet.currency, "RWF");

        // opening twice hands back the same wallet
        let again = engine
            .open_wallet(participants.rider.clone())
            .await
            .unwrap();
        assert_eq!(again.id, wallet.id);

        let found = engine
            .find_wallet(participants.rider.clone(), participants.rider.id)
            .await
            .unwrap();
        assert_eq!(found.id, wallet.id);
    });
}

#[test]
fn wallet_authorization_test() {
    use super::testing::{default_engine, Participants};
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();

    block_on(async {
        engine
            .open_wallet(participants.rider.clone())
            .await
            .unwrap();

        let err = engine
            .find_wallet(participants.driver.clone(), participants.rider.id)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        let err = engine
            .list_wallet_entries(participants.driver.clone(), participants.rider.id)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        engine
            .find_wallet(participants.system.clone(), participants.rider.id)
            .await
            .unwrap();

        let err = engine
            .find_wallet(participants.system.clone(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.is_invalid_input_error());
    });
}

#[test]
fn wallet_entries_test() {
    use super::testing::{default_engine, finish_ride, settle_success, Participants};
    use crate::entities::PaymentMethod;
    use rust_decimal::Decimal;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();

    block_on(async {
        let (_, first) = finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;
        let (_, second) = finish_ride(&engine, &participants, 250, PaymentMethod::Card).await;

        settle_success(&engine, first.id, "PG001").await;
        settle_success(&engine, second.id, "PG002").await;

        let wallet = engine
            .find_wallet(participants.driver.clone(), participants.driver.id)
            .await
            .unwrap();
        assert_eq!(wallet.balance, Decimal::from(1250));

        let entries = engine
            .list_wallet_entries(participants.driver.clone(), participants.driver.id)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|entry| entry.wallet_id == wallet.id));

        let total: Decimal = entries.iter().map(|entry| entry.delta).sum();
        assert_eq!(total, wallet.balance);
    });
}
