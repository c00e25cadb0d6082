use chrono::{DateTime, Utc};
use oso::PolarClass;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Ride;
use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    MobileMoney,
    /// Paid out of the rider's own wallet balance.
    Wallet,
}

impl PaymentMethod {
    pub fn name(&self) -> String {
        match self {
            Self::Card => "CARD".into(),
            Self::MobileMoney => "MOBILE_MONEY".into(),
            Self::Wallet => "WALLET".into(),
        }
    }

    pub fn is_wallet_funded(&self) -> bool {
        matches!(self, Self::Wallet)
    }
}

/// Outcome reported by the payment gateway for a charge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GatewayResult {
    Success { reference: Option<String> },
    Failure { reason: String },
}

impl GatewayResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether `status` is what settling with this result would have produced.
    /// Failure reasons are informational and not compared.
    fn matches(&self, status: &Status) -> bool {
        match (self, status) {
            (Self::Success { reference }, Status::Completed { reference: stored, .. }) => {
                reference == stored
            }
            (Self::Failure { .. }, Status::Failed { .. }) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PolarClass)]
pub struct Transaction {
    #[polar(attribute)]
    pub id: Uuid,
    pub ride_id: Uuid,
    #[polar(attribute)]
    pub rider_id: Uuid,
    #[polar(attribute)]
    pub driver_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Status {
    Pending,
    Completed {
        reference: Option<String>,
        settled_at: DateTime<Utc>,
    },
    Failed {
        reason: String,
        settled_at: DateTime<Utc>,
    },
}

impl Status {
    pub fn name(&self) -> String {
        match self {
            Self::Pending => "pending".into(),
            Self::Completed { .. } => "completed".into(),
            Self::Failed { .. } => "failed".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// The transaction moved out of PENDING and must be persisted.
    Applied,
    /// The transaction was already settled with an identical result.
    Unchanged,
}

impl Transaction {
    pub fn for_ride(ride: &Ride, currency: String) -> Result<Self, Error> {
        if !ride.is_completed() {
            return Err(Error::invalid_transition_error());
        }

        let driver_id = ride.driver_id.ok_or_else(Error::unexpected_error)?;

        Ok(Self {
            id: Uuid::new_v4(),
            ride_id: ride.id,
            rider_id: ride.rider_id,
            driver_id,
            amount: ride.amount,
            currency,
            payment_method: ride.payment_method,
            status: Status::Pending,
            created_at: Utc::now(),
        })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.status, Status::Pending)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, Status::Completed { .. })
    }

    pub fn payment_reference(&self) -> Option<&str> {
        match &self.status {
            Status::Completed { reference, .. } => reference.as_deref(),
            _ => None,
        }
    }

    #[tracing::instrument(skip(self), fields(transaction_id = %self.id))]
    pub fn settle(&mut self, result: GatewayResult) -> Result<Settlement, Error> {
        if !self.is_pending() {
            if result.matches(&self.status) {
                tracing::info!("transaction already settled with the same result");
                return Ok(Settlement::Unchanged);
            }

            return Err(Error::already_settled_error());
        }

        let settled_at = Utc::now();

        self.status = match result {
            GatewayResult::Success { reference } => Status::Completed {
                reference,
                settled_at,
            },
            GatewayResult::Failure { reason } => Status::Failed { reason, settled_at },
        };

        Ok(Settlement::Applied)
    }
}

#[cfg(test)]
fn completed_ride(amount: i64, payment_method: PaymentMethod) -> Ride {
    use crate::entities::{ride::sample_request, RideCompletion};

    let mut ride = Ride::new(Uuid::new_v4(), sample_request(amount, payment_method)).unwrap();
    ride.accept(Uuid::new_v4()).unwrap();
    ride.start().unwrap();
    ride.complete(RideCompletion {
        distance: Decimal::from(5),
        duration: 12,
        amount: Decimal::from(amount),
    })
    .unwrap();
    ride
}

#[test]
fn transaction_for_ride_test() {
    let ride = completed_ride(1000, PaymentMethod::MobileMoney);
    let transaction = Transaction::for_ride(&ride, "RWF".into()).unwrap();

    assert!(transaction.is_pending());
    assert_eq!(transaction.ride_id, ride.id);
    assert_eq!(transaction.amount, ride.amount);
    assert_eq!(transaction.currency, "RWF");
    assert_eq!(transaction.payment_method, PaymentMethod::MobileMoney);
    assert_eq!(Some(transaction.driver_id), ride.driver_id);
}

#[test]
fn transaction_for_unfinished_ride_test() {
    use crate::entities::ride::sample_request;

    let ride = Ride::new(Uuid::new_v4(), sample_request(1000, PaymentMethod::Card)).unwrap();

    assert!(Transaction::for_ride(&ride, "RWF".into())
        .unwrap_err()
        .is_invalid_transition_error());
}

#[test]
fn transaction_settle_idempotency_test() {
    let ride = completed_ride(1000, PaymentMethod::Card);
    let mut transaction = Transaction::for_ride(&ride, "RWF".into()).unwrap();

    let success = GatewayResult::Success {
        reference: Some("PG123".into()),
    };

    assert_eq!(transaction.settle(success.clone()).unwrap(), Settlement::Applied);
    assert_eq!(transaction.payment_reference(), Some("PG123"));

    assert_eq!(transaction.settle(success).unwrap(), Settlement::Unchanged);

    let other_reference = GatewayResult::Success {
        reference: Some("PG999".into()),
    };
    assert!(transaction
        .settle(other_reference)
        .unwrap_err()
        .is_already_settled_error());

    let failure = GatewayResult::Failure {
        reason: "declined".into(),
    };
    assert!(transaction
        .settle(failure)
        .unwrap_err()
        .is_already_settled_error());
    assert!(transaction.is_completed());
}

#[test]
fn transaction_settle_failure_test() {
    let ride = completed_ride(1000, PaymentMethod::Card);
    let mut transaction = Transaction::for_ride(&ride, "RWF".into()).unwrap();

    let failure = GatewayResult::Failure {
        reason: "card declined".into(),
    };

    assert_eq!(transaction.settle(failure).unwrap(), Settlement::Applied);
    assert_eq!(transaction.status.name(), "failed");
    assert!(transaction.payment_reference().is_none());

    let retry = GatewayResult::Failure {
        reason: "still declined".into(),
    };
    assert_eq!(transaction.settle(retry).unwrap(), Settlement::Unchanged);

    let success = GatewayResult::Success { reference: None };
    assert!(transaction
        .settle(success)
        .unwrap_err()
        .is_already_settled_error());
}
