use super::helpers::{fetch_ride_for_update, open_transaction};
use super::Engine;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    api::RideAPI,
    auth::{Platform, User},
    db::RideFilter,
    entities::{Ride, RideCompletion, RideRequest, Transaction},
    error::Error,
};

#[async_trait]
impl RideAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn create_ride(&self, user: User, request: RideRequest) -> Result<Ride, Error> {
        self.authorize(user.clone(), "create_ride", Platform::default())?;

        let ride = Ride::new(user.id, request)?;

        let mut uow = self.store.begin().await?;
        uow.insert_ride(&ride).await?;
        uow.commit().await?;

        tracing::info!(ride_id = %ride.id, "ride booked");

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn find_ride(&self, user: User, id: Uuid) -> Result<Ride, Error> {
        let mut uow = self.store.begin().await?;

        let ride = uow
            .find_ride(&id)
            .await?
            .ok_or_else(Error::invalid_input_error)?;

        self.authorize(user.clone(), "read", ride.clone())?;

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn list_rides(&self, user: User, mut filter: RideFilter) -> Result<Vec<Ride>, Error> {
        if !user.is_system() {
            filter.participant_id = Some(user.id);
        }

        let mut uow = self.store.begin().await?;

        uow.list_rides(&filter).await
    }

    #[tracing::instrument(skip(self))]
    async fn accept_ride(&self, user: User, id: Uuid, driver_id: Uuid) -> Result<Ride, Error> {
        let mut uow = self.store.begin().await?;

        let mut ride = fetch_ride_for_update(uow.as_mut(), &id).await?;

        self.authorize(user.clone(), "accept", ride.clone())?;

        // drivers accept on their own behalf only
        if !user.is_system() && user.id != driver_id {
            return Err(Error::unauthorized_error());
        }

        ride.accept(driver_id)?;

        uow.update_ride(&ride).await?;
        uow.commit().await?;

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn start_ride(&self, user: User, id: Uuid) -> Result<Ride, Error> {
        let mut uow = self.store.begin().await?;

        let mut ride = fetch_ride_for_update(uow.as_mut(), &id).await?;

        self.authorize(user.clone(), "start", ride.clone())?;

        ride.start()?;

        uow.update_ride(&ride).await?;
        uow.commit().await?;

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn complete_ride(
        &self,
        user: User,
        id: Uuid,
        completion: RideCompletion,
    ) -> Result<(Ride, Transaction), Error> {
        let mut uow = self.store.begin().await?;

        let mut ride = fetch_ride_for_update(uow.as_mut(), &id).await?;

        self.authorize(user.clone(), "complete", ride.clone())?;

        ride.complete(completion)?;

        uow.update_ride(&ride).await?;
        let transaction = open_transaction(uow.as_mut(), &ride, &self.config.currency).await?;

        uow.commit().await?;

        Ok((ride, transaction))
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_ride(&self, user: User, id: Uuid, reason: String) -> Result<Ride, Error> {
        let mut uow = self.store.begin().await?;

        let mut ride = fetch_ride_for_update(uow.as_mut(), &id).await?;

        self.authorize(user.clone(), "cancel", ride.clone())?;

        if uow.find_transaction_for_ride(&ride.id).await?.is_some() {
            tracing::warn!("ride has a transaction, refusing to cancel");
            return Err(Error::invalid_transition_error());
        }

        ride.cancel(reason)?;

        uow.update_ride(&ride).await?;
        uow.commit().await?;

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn rate_ride(
        &self,
        user: User,
        id: Uuid,
        rating: i32,
        comment: Option<String>,
    ) -> Result<Ride, Error> {
        let mut uow = self.store.begin().await?;

        let mut ride = fetch_ride_for_update(uow.as_mut(), &id).await?;

        self.authorize(user.clone(), "rate", ride.clone())?;

        ride.rate(rating, comment)?;

        uow.update_ride(&ride).await?;
        uow.commit().await?;

        Ok(ride)
    }
}

#[test]
fn ride_scenario_test() {
    use super::testing::{default_engine, finish_ride, Participants};
    use crate::entities::{PaymentMethod, RideStatus};
    use rust_decimal::Decimal;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();

    block_on(async {
        let (ride, transaction) =
            finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;

        assert!(matches!(ride.status, RideStatus::Completed { .. }));
        assert!(ride.completed_at().is_some());
        assert_eq!(ride.driver_id, Some(participants.driver.id));

        assert!(transaction.is_pending());
        assert_eq!(transaction.amount, Decimal::from(1000));
        assert_eq!(transaction.currency, "RWF");
        assert_eq!(transaction.ride_id, ride.id);

        let stored = engine
            .find_ride(participants.rider.clone(), ride.id)
            .await
            .unwrap();
        assert_eq!(stored.status, ride.status);
    });
}

#[test]
fn ride_cancel_pending_test() {
    use super::testing::{book_ride, default_engine, Participants};
    use crate::api::TransactionAPI;
    use crate::entities::PaymentMethod;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();

    block_on(async {
        let ride = book_ride(&engine, &participants, 1000, PaymentMethod::Card).await;

        let ride = engine
            .cancel_ride(participants.rider.clone(), ride.id, "no driver".into())
            .await
            .unwrap();

        assert_eq!(ride.status.name(), "cancelled");
        assert!(ride.completed_at().is_some());

        let err = engine
            .find_transaction_for_ride(participants.system.clone(), ride.id)
            .await
            .unwrap_err();
        assert!(err.is_invalid_input_error());

        // terminal
        let err = engine
            .accept_ride(
                participants.driver.clone(),
                ride.id,
                participants.driver.id,
            )
            .await
            .unwrap_err();
        assert!(err.is_invalid_transition_error());
    });
}

#[test]
fn ride_cancel_completed_test() {
    use super::testing::{default_engine, finish_ride, Participants};
    use crate::entities::PaymentMethod;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();

    block_on(async {
        let (ride, _) = finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;

        let err = engine
            .cancel_ride(participants.rider.clone(), ride.id, "too late".into())
            .await
            .unwrap_err();

        assert!(err.is_invalid_transition_error());
    });
}

#[test]
fn ride_transitions_out_of_order_test() {
    use super::testing::{book_ride, default_engine, Participants};
    use crate::entities::PaymentMethod;
    use rust_decimal::Decimal;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();
    let system = participants.system.clone();

    block_on(async {
        let ride = book_ride(&engine, &participants, 1000, PaymentMethod::Card).await;

        let err = engine.start_ride(system.clone(), ride.id).await.unwrap_err();
        assert!(err.is_invalid_transition_error());

        let completion = RideCompletion {
            distance: Decimal::ONE,
            duration: 1,
            amount: Decimal::from(1000),
        };
        let err = engine
            .complete_ride(system.clone(), ride.id, completion)
            .await
            .unwrap_err();
        assert!(err.is_invalid_transition_error());

        // failed transitions leave the stored ride untouched
        let stored = engine.find_ride(system.clone(), ride.id).await.unwrap();
        assert_eq!(stored.status.name(), "pending");
    });
}

#[test]
fn ride_authorization_test() {
    use super::testing::{book_ride, default_engine, Participants};
    use crate::entities::PaymentMethod;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();
    let stranger = User::new_rider(Uuid::new_v4());
    let other_driver = User::new_driver(Uuid::new_v4());

    block_on(async {
        let ride = book_ride(&engine, &participants, 1000, PaymentMethod::Card).await;

        let err = engine
            .find_ride(stranger.clone(), ride.id)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        // riders cannot accept
        let err = engine
            .accept_ride(stranger.clone(), ride.id, stranger.id)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        // drivers cannot accept on someone else's behalf
        let err = engine
            .accept_ride(other_driver.clone(), ride.id, participants.driver.id)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        engine
            .accept_ride(
                participants.driver.clone(),
                ride.id,
                participants.driver.id,
            )
            .await
            .unwrap();

        let err = engine
            .start_ride(other_driver.clone(), ride.id)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        let err = engine
            .find_ride(participants.system.clone(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.is_invalid_input_error());
    });
}

#[test]
fn ride_rating_test() {
    use super::testing::{book_ride, default_engine, finish_ride, Participants};
    use crate::entities::PaymentMethod;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();

    block_on(async {
        let pending = book_ride(&engine, &participants, 500, PaymentMethod::Card).await;
        let err = engine
            .rate_ride(participants.rider.clone(), pending.id, 5, None)
            .await
            .unwrap_err();
        assert!(err.is_invalid_rating_error());

        let (ride, _) = finish_ride(&engine, &participants, 1000, PaymentMethod::Card).await;

        let err = engine
            .rate_ride(participants.rider.clone(), ride.id, 6, None)
            .await
            .unwrap_err();
        assert!(err.is_invalid_rating_error());

        // only the rider rates
        let err = engine
            .rate_ride(participants.driver.clone(), ride.id, 5, None)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized_error());

        let ride = engine
            .rate_ride(
                participants.rider.clone(),
                ride.id,
                5,
                Some("great driver".into()),
            )
            .await
            .unwrap();
        assert_eq!(ride.rating().unwrap().score, 5);
        assert_eq!(
            ride.rating().unwrap().comment.as_deref(),
            Some("great driver")
        );
    });
}

#[test]
fn ride_history_test() {
    use super::testing::{book_ride, default_engine, finish_ride, Participants};
    use crate::entities::PaymentMethod;
    use tokio_test::block_on;

    let engine = default_engine();
    let participants = Participants::new();
    let someone_else = Participants::new();

    block_on(async {
        let first = book_ride(&engine, &participants, 100, PaymentMethod::Card).await;
        let (second, _) = finish_ride(&engine, &participants, 200, PaymentMethod::Card).await;
        book_ride(&engine, &someone_else, 300, PaymentMethod::Card).await;

        let rides = engine
            .list_rides(participants.rider.clone(), RideFilter::default())
            .await
            .unwrap();
        let mut ids: Vec<Uuid> = rides.iter().map(|ride| ride.id).collect();
        ids.sort();
        let mut expected = vec![first.id, second.id];
        expected.sort();
        assert_eq!(ids, expected);

        let completed = engine
            .list_rides(
                participants.rider.clone(),
                RideFilter {
                    status: Some("completed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, second.id);

        // the driver sees the ride they drove
        let driven = engine
            .list_rides(participants.driver.clone(), RideFilter::default())
            .await
            .unwrap();
        assert_eq!(driven.len(), 1);

        // a participant filter from a non-system caller is overridden
        let rides = engine
            .list_rides(
                participants.rider.clone(),
                RideFilter {
                    participant_id: Some(someone_else.rider.id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(rides.len(), 2);

        let all = engine
            .list_rides(participants.system.clone(), RideFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    });
}
