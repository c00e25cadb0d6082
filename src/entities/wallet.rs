use chrono::{DateTime, Utc};
use oso::PolarClass;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

#[derive(Clone, Debug, Serialize, Deserialize, PolarClass)]
pub struct Wallet {
    #[polar(attribute)]
    pub id: Uuid,
    #[polar(attribute)]
    pub owner_id: Uuid,
    pub balance: Decimal,
    pub currency: String,
}

/// One balance movement, written in the same unit of work as the wallet update.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletEntry {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub transaction_id: Uuid,
    pub delta: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(owner_id: Uuid, currency: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            balance: Decimal::ZERO,
            currency,
        }
    }

    fn ensure_currency(&self, currency: &str) -> Result<(), Error> {
        if self.currency != currency {
            tracing::warn!(
                wallet_currency = %self.currency,
                currency,
                "currency mismatch"
            );
            return Err(Error::invalid_input_error());
        }

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(wallet_id = %self.id))]
    pub fn credit(
        &mut self,
        transaction_id: Uuid,
        amount: Decimal,
        currency: &str,
    ) -> Result<WalletEntry, Error> {
        self.ensure_currency(currency)?;

        if amount.is_sign_negative() {
            return Err(Error::invalid_input_error());
        }

        self.balance += amount;

        Ok(self.entry(transaction_id, amount))
    }

    #[tracing::instrument(skip(self), fields(wallet_id = %self.id))]
    pub fn debit(
        &mut self,
        transaction_id: Uuid,
        amount: Decimal,
        currency: &str,
    ) -> Result<WalletEntry, Error> {
        self.ensure_currency(currency)?;

        if amount.is_sign_negative() {
            return Err(Error::invalid_input_error());
        }

        if self.balance < amount {
            return Err(Error::insufficient_funds_error());
        }

        self.balance -= amount;

        Ok(self.entry(transaction_id, -amount))
    }

    fn entry(&self, transaction_id: Uuid, delta: Decimal) -> WalletEntry {
        WalletEntry {
            id: Uuid::new_v4(),
            wallet_id: self.id,
            transaction_id,
            delta,
            created_at: Utc::now(),
        }
    }
}

#[test]
fn wallet_credit_debit_test() {
    let mut wallet = Wallet::new(Uuid::new_v4(), "RWF".into());
    let transaction_id = Uuid::new_v4();

    assert_eq!(wallet.balance, Decimal::ZERO);

    let entry = wallet
        .credit(transaction_id, Decimal::from(1000), "RWF")
        .unwrap();
    assert_eq!(entry.delta, Decimal::from(1000));
    assert_eq!(entry.wallet_id, wallet.id);
    assert_eq!(wallet.balance, Decimal::from(1000));

    let entry = wallet
        .debit(Uuid::new_v4(), Decimal::from(400), "RWF")
        .unwrap();
    assert_eq!(entry.delta, Decimal::from(-400));
    assert_eq!(wallet.balance, Decimal::from(600));
}

#[test]
fn wallet_insufficient_funds_test() {
    let mut wallet = Wallet::new(Uuid::new_v4(), "RWF".into());
    wallet
        .credit(Uuid::new_v4(), Decimal::from(100), "RWF")
        .unwrap();

    let err = wallet
        .debit(Uuid::new_v4(), Decimal::from(101), "RWF")
        .unwrap_err();

    assert!(err.is_insufficient_funds_error());
    assert_eq!(wallet.balance, Decimal::from(100));

    // draining to exactly zero is allowed
    wallet
        .debit(Uuid::new_v4(), Decimal::from(100), "RWF")
        .unwrap();
    assert_eq!(wallet.balance, Decimal::ZERO);
}

#[test]
fn wallet_currency_mismatch_test() {
    let mut wallet = Wallet::new(Uuid::new_v4(), "RWF".into());

    assert!(wallet
        .credit(Uuid::new_v4(), Decimal::from(100), "USD")
        .unwrap_err()
        .is_invalid_input_error());
    assert_eq!(wallet.balance, Decimal::ZERO);
}
