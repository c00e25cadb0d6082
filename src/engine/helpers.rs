use uuid::Uuid;

use crate::{
    db::UnitOfWork,
    entities::{GatewayResult, Ride, Settlement, Transaction, Wallet},
    error::Error,
};

#[tracing::instrument(skip(uow))]
pub async fn fetch_ride_for_update(uow: &mut dyn UnitOfWork, id: &Uuid) -> Result<Ride, Error> {
    uow.fetch_ride_for_update(id)
        .await?
        .ok_or_else(Error::invalid_input_error)
}

#[tracing::instrument(skip(uow))]
pub async fn fetch_transaction_for_update(
    uow: &mut dyn UnitOfWork,
    id: &Uuid,
) -> Result<Transaction, Error> {
    uow.fetch_transaction_for_update(id)
        .await?
        .ok_or_else(Error::invalid_input_error)
}

/// Opens the PENDING transaction of a completed ride. The caller must hold
/// the ride lock so two openers cannot both see "no transaction yet".
#[tracing::instrument(skip(uow, ride), fields(ride_id = %ride.id))]
pub async fn open_transaction(
    uow: &mut dyn UnitOfWork,
    ride: &Ride,
    currency: &str,
) -> Result<Transaction, Error> {
    if !ride.is_completed() {
        return Err(Error::invalid_transition_error());
    }

    if uow.find_transaction_for_ride(&ride.id).await?.is_some() {
        tracing::warn!("ride already has a transaction");
        return Err(Error::duplicate_transaction_error());
    }

    let transaction = Transaction::for_ride(ride, currency.into())?;

    uow.insert_transaction(&transaction).await?;

    tracing::info!(transaction_id = %transaction.id, "transaction opened");

    Ok(transaction)
}

/// Moves money for a transaction that just became COMPLETED: the driver is
/// credited, and for wallet payments the rider is debited. Wallets are locked
/// in owner id order.
#[tracing::instrument(skip(uow, transaction), fields(transaction_id = %transaction.id))]
async fn apply_wallet_effects(
    uow: &mut dyn UnitOfWork,
    transaction: &Transaction,
) -> Result<(), Error> {
    let mut owner_ids = vec![transaction.driver_id];
    if transaction.payment_method.is_wallet_funded() {
        owner_ids.push(transaction.rider_id);
    }
    owner_ids.sort();

    let mut wallets = Vec::with_capacity(owner_ids.len());

    for owner_id in owner_ids {
        let wallet = if owner_id == transaction.driver_id {
            let default = Wallet::new(owner_id, transaction.currency.clone());
            uow.fetch_or_create_wallet_for_update(&default).await?
        } else {
            uow.fetch_wallet_for_update(&owner_id)
                .await?
                .ok_or_else(Error::insufficient_funds_error)?
        };

        wallets.push(wallet);
    }

    for mut wallet in wallets {
        let entry = if wallet.owner_id == transaction.driver_id {
            wallet.credit(transaction.id, transaction.amount, &transaction.currency)?
        } else {
            wallet.debit(transaction.id, transaction.amount, &transaction.currency)?
        };

        uow.update_wallet(&wallet).await?;
        uow.insert_wallet_entry(&entry).await?;
    }

    Ok(())
}

/// Settles a transaction already locked in `uow` and commits. Nothing is
/// written when the result repeats an earlier settlement or when any wallet
/// effect fails.
#[tracing::instrument(skip(uow, transaction), fields(transaction_id = %transaction.id))]
pub async fn settle(
    mut uow: Box<dyn UnitOfWork>,
    mut transaction: Transaction,
    result: GatewayResult,
) -> Result<Transaction, Error> {
    if transaction.settle(result)? == Settlement::Unchanged {
        return Ok(transaction);
    }

    if transaction.is_completed() {
        apply_wallet_effects(uow.as_mut(), &transaction).await?;
    }

    uow.update_transaction(&transaction).await?;
    uow.commit().await?;

    tracing::info!(status = %transaction.status.name(), "transaction settled");

    Ok(transaction)
}
