use chrono::{DateTime, Utc};
use oso::PolarClass;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{PaymentMethod, Place};
use crate::error::Error;

#[derive(Clone, Debug, Serialize, Deserialize, PolarClass)]
pub struct Ride {
    #[polar(attribute)]
    pub id: Uuid,
    #[polar(attribute)]
    pub rider_id: Uuid,
    #[polar(attribute)]
    pub driver_id: Option<Uuid>,
    pub pickup: Place,
    pub dropoff: Place,
    /// Kilometres.
    pub distance: Decimal,
    /// Minutes.
    pub duration: i32,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

/// Booking parameters supplied by the rider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RideRequest {
    pub pickup: Place,
    pub dropoff: Place,
    pub distance: Decimal,
    pub duration: i32,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
}

/// Measured values that replace the booking estimate once the ride ends.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RideCompletion {
    pub distance: Decimal,
    pub duration: i32,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub score: i32,
    pub comment: Option<String>,
}

impl Rating {
    pub const MIN: i32 = 1;
    pub const MAX: i32 = 5;

    pub fn new(score: i32, comment: Option<String>) -> Result<Self, Error> {
        if !Self::is_valid_score(score) {
            return Err(Error::invalid_rating_error());
        }

        Ok(Self { score, comment })
    }

    pub fn is_valid_score(score: i32) -> bool {
        (Self::MIN..=Self::MAX).contains(&score)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Status {
    Pending,
    Accepted {
        accepted_at: DateTime<Utc>,
    },
    InProgress {
        started_at: DateTime<Utc>,
    },
    Completed {
        completed_at: DateTime<Utc>,
        rating: Option<Rating>,
    },
    Cancelled {
        completed_at: DateTime<Utc>,
        reason: String,
    },
}

impl Status {
    pub fn name(&self) -> String {
        match self {
            Self::Pending => "pending".into(),
            Self::Accepted { .. } => "accepted".into(),
            Self::InProgress { .. } => "in_progress".into(),
            Self::Completed { .. } => "completed".into(),
            Self::Cancelled { .. } => "cancelled".into(),
        }
    }
}

fn validate_measurements(distance: Decimal, duration: i32, amount: Decimal) -> Result<(), Error> {
    if distance.is_sign_negative() || duration < 0 || amount.is_sign_negative() {
        return Err(Error::invalid_input_error());
    }

    Ok(())
}

impl Ride {
    pub fn new(rider_id: Uuid, request: RideRequest) -> Result<Self, Error> {
        validate_measurements(request.distance, request.duration, request.amount)?;

        Ok(Self {
            id: Uuid::new_v4(),
            rider_id,
            driver_id: None,
            pickup: request.pickup,
            dropoff: request.dropoff,
            distance: request.distance,
            duration: request.duration,
            amount: request.amount,
            payment_method: request.payment_method,
            status: Status::Pending,
            created_at: Utc::now(),
        })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, Status::Completed { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            Status::Completed { .. } | Status::Cancelled { .. }
        )
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            Status::Completed { completed_at, .. } | Status::Cancelled { completed_at, .. } => {
                Some(*completed_at)
            }
            _ => None,
        }
    }

    pub fn rating(&self) -> Option<&Rating> {
        match &self.status {
            Status::Completed { rating, .. } => rating.as_ref(),
            _ => None,
        }
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id))]
    pub fn accept(&mut self, driver_id: Uuid) -> Result<(), Error> {
        match self.status {
            Status::Pending => {
                if driver_id == self.rider_id {
                    return Err(Error::invalid_input_error());
                }

                self.driver_id = Some(driver_id);
                self.status = Status::Accepted {
                    accepted_at: Utc::now(),
                };
                Ok(())
            }
            _ => Err(Error::invalid_transition_error()),
        }
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id))]
    pub fn start(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Accepted { .. } => {
                self.status = Status::InProgress {
                    started_at: Utc::now(),
                };
                Ok(())
            }
            _ => Err(Error::invalid_transition_error()),
        }
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id))]
    pub fn complete(&mut self, completion: RideCompletion) -> Result<(), Error> {
        match self.status {
            Status::InProgress { .. } => {
                validate_measurements(completion.distance, completion.duration, completion.amount)?;

                self.distance = completion.distance;
                self.duration = completion.duration;
                self.amount = completion.amount;
                self.status = Status::Completed {
                    completed_at: Utc::now(),
                    rating: None,
                };
                Ok(())
            }
            _ => Err(Error::invalid_transition_error()),
        }
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id))]
    pub fn cancel(&mut self, reason: String) -> Result<(), Error> {
        match self.status {
            Status::Pending | Status::Accepted { .. } | Status::InProgress { .. } => {
                self.status = Status::Cancelled {
                    completed_at: Utc::now(),
                    reason,
                };
                Ok(())
            }
            _ => Err(Error::invalid_transition_error()),
        }
    }

    #[tracing::instrument(skip(self), fields(ride_id = %self.id))]
    pub fn rate(&mut self, score: i32, comment: Option<String>) -> Result<(), Error> {
        match &mut self.status {
            Status::Completed { rating, .. } if rating.is_none() => {
                *rating = Some(Rating::new(score, comment)?);
                Ok(())
            }
            _ => Err(Error::invalid_rating_error()),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_request(amount: i64, payment_method: PaymentMethod) -> RideRequest {
    use crate::entities::Coordinates;

    RideRequest {
        pickup: Place::new(
            "Kigali Convention Centre".into(),
            Coordinates {
                lat: -1.9536,
                lng: 30.0928,
            },
        ),
        dropoff: Place::new(
            "Kigali International Airport".into(),
            Coordinates {
                lat: -1.9686,
                lng: 30.1395,
            },
        ),
        distance: Decimal::new(85, 1),
        duration: 20,
        amount: Decimal::from(amount),
        payment_method,
    }
}

#[test]
fn ride_lifecycle_test() {
    let rider_id = Uuid::new_v4();
    let driver_id = Uuid::new_v4();
    let mut ride = Ride::new(rider_id, sample_request(900, PaymentMethod::Card)).unwrap();

    assert_eq!(ride.status, Status::Pending);
    assert!(ride.completed_at().is_none());

    ride.accept(driver_id).unwrap();
    assert_eq!(ride.driver_id, Some(driver_id));
    assert!(ride.completed_at().is_none());

    ride.start().unwrap();
    assert!(ride.completed_at().is_none());

    ride.complete(RideCompletion {
        distance: Decimal::new(92, 1),
        duration: 24,
        amount: Decimal::from(1000),
    })
    .unwrap();

    assert!(ride.is_completed());
    assert!(ride.completed_at().is_some());
    assert_eq!(ride.amount, Decimal::from(1000));
    assert_eq!(ride.duration, 24);
}

#[test]
fn ride_invalid_transitions_test() {
    let mut ride = Ride::new(Uuid::new_v4(), sample_request(900, PaymentMethod::Card)).unwrap();

    assert!(ride.start().unwrap_err().is_invalid_transition_error());

    let completion = RideCompletion {
        distance: Decimal::ONE,
        duration: 1,
        amount: Decimal::ONE,
    };
    assert!(ride
        .complete(completion.clone())
        .unwrap_err()
        .is_invalid_transition_error());

    ride.accept(Uuid::new_v4()).unwrap();
    assert!(ride
        .accept(Uuid::new_v4())
        .unwrap_err()
        .is_invalid_transition_error());
    assert!(ride
        .complete(completion)
        .unwrap_err()
        .is_invalid_transition_error());
}

#[test]
fn ride_rider_cannot_drive_own_ride_test() {
    let rider_id = Uuid::new_v4();
    let mut ride = Ride::new(rider_id, sample_request(900, PaymentMethod::Card)).unwrap();

    assert!(ride.accept(rider_id).unwrap_err().is_invalid_input_error());
    assert_eq!(ride.status, Status::Pending);
}

#[test]
fn ride_negative_amount_test() {
    let mut request = sample_request(900, PaymentMethod::Card);
    request.amount = Decimal::from(-1);

    assert!(Ride::new(Uuid::new_v4(), request)
        .unwrap_err()
        .is_invalid_input_error());
}

#[test]
fn ride_cancel_test() {
    let mut ride = Ride::new(Uuid::new_v4(), sample_request(900, PaymentMethod::Card)).unwrap();

    ride.cancel("no driver".into()).unwrap();

    assert_eq!(ride.status.name(), "cancelled");
    assert!(ride.completed_at().is_some());
    assert!(ride
        .cancel("again".into())
        .unwrap_err()
        .is_invalid_transition_error());
    assert!(ride.start().unwrap_err().is_invalid_transition_error());
}

#[test]
fn ride_cancel_in_progress_test() {
    let mut ride = Ride::new(Uuid::new_v4(), sample_request(900, PaymentMethod::Card)).unwrap();

    ride.accept(Uuid::new_v4()).unwrap();
    ride.start().unwrap();
    ride.cancel("rider unwell".into()).unwrap();

    match &ride.status {
        Status::Cancelled { reason, .. } => assert_eq!(reason, "rider unwell"),
        other => panic!("unexpected status {:?}", other),
    }
}

#[test]
fn ride_rating_test() {
    let mut ride = Ride::new(Uuid::new_v4(), sample_request(900, PaymentMethod::Card)).unwrap();

    // not completed yet
    assert!(ride.rate(5, None).unwrap_err().is_invalid_rating_error());

    ride.accept(Uuid::new_v4()).unwrap();
    ride.start().unwrap();
    ride.complete(RideCompletion {
        distance: Decimal::ONE,
        duration: 3,
        amount: Decimal::from(500),
    })
    .unwrap();

    assert!(ride.rate(0, None).unwrap_err().is_invalid_rating_error());
    assert!(ride.rate(6, None).unwrap_err().is_invalid_rating_error());
    assert!(ride.rating().is_none());

    ride.rate(4, Some("smooth ride".into())).unwrap();
    assert_eq!(ride.rating().unwrap().score, 4);

    // only once
    assert!(ride.rate(5, None).unwrap_err().is_invalid_rating_error());
    assert_eq!(ride.rating().unwrap().score, 4);
}

#[test]
fn ride_cancelled_cannot_be_rated_test() {
    let mut ride = Ride::new(Uuid::new_v4(), sample_request(900, PaymentMethod::Card)).unwrap();
    ride.cancel("changed plans".into()).unwrap();

    assert!(ride.rate(3, None).unwrap_err().is_invalid_rating_error());
}
