use oso::{Oso, PolarClass};

use crate::auth::{Platform, User};
use crate::entities::{Ride, Transaction, Wallet};
use crate::error::Error;

pub fn new() -> Result<Oso, Error> {
    let mut o = Oso::new();

    o.register_class(Platform::get_polar_class())?;
    o.register_class(User::get_polar_class())?;
    o.register_class(Ride::get_polar_class())?;
    o.register_class(Transaction::get_polar_class())?;
    o.register_class(Wallet::get_polar_class())?;

    o.load_str(include_str!("rules.polar"))?;

    Ok(o)
}

#[cfg(test)]
fn pending_ride(rider_id: uuid::Uuid) -> Ride {
    use crate::entities::{ride::sample_request, PaymentMethod};

    Ride::new(rider_id, sample_request(1000, PaymentMethod::Card)).unwrap()
}

#[test]
fn platform_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();
    let rider = User::new_rider(Uuid::new_v4());

    let result = authorizor.is_allowed(rider.clone(), "create_ride", Platform::default());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(rider.clone(), "open_wallet", Platform::default());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(rider.clone(), "audit", Platform::default());
    assert_eq!(result.unwrap(), false);

    let system = User::new_system_user();
    let result = authorizor.is_allowed(system, "audit", Platform::default());
    assert_eq!(result.unwrap(), true);
}

#[test]
fn ride_rider_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let rider = User::new_rider(Uuid::new_v4());
    let stranger = User::new_rider(Uuid::new_v4());
    let ride = pending_ride(rider.id);

    for action in ["read", "cancel", "rate"] {
        let result = authorizor.is_allowed(rider.clone(), action, ride.clone());
        assert_eq!(result.unwrap(), true, "rider {}", action);

        let result = authorizor.is_allowed(stranger.clone(), action, ride.clone());
        assert_eq!(result.unwrap(), false, "stranger {}", action);
    }

    for action in ["accept", "start", "complete"] {
        let result = authorizor.is_allowed(rider.clone(), action, ride.clone());
        assert_eq!(result.unwrap(), false, "rider {}", action);
    }
}

#[test]
fn ride_driver_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let driver = User::new_driver(Uuid::new_v4());
    let mut ride = pending_ride(Uuid::new_v4());

    // before the driver accepts

    let result = authorizor.is_allowed(driver.clone(), "accept", ride.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(driver.clone(), "start", ride.clone());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(driver.clone(), "read", ride.clone());
    assert_eq!(result.unwrap(), false);

    ride.accept(driver.id).unwrap();

    // after the driver accepts

    for action in ["read", "start", "complete", "cancel"] {
        let result = authorizor.is_allowed(driver.clone(), action, ride.clone());
        assert_eq!(result.unwrap(), true, "driver {}", action);
    }

    let result = authorizor.is_allowed(driver.clone(), "rate", ride.clone());
    assert_eq!(result.unwrap(), false);

    let other_driver = User::new_driver(Uuid::new_v4());
    let result = authorizor.is_allowed(other_driver, "start", ride.clone());
    assert_eq!(result.unwrap(), false);
}

#[test]
fn ledger_records_test() {
    use crate::entities::RideCompletion;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let rider = User::new_rider(Uuid::new_v4());
    let driver = User::new_driver(Uuid::new_v4());
    let stranger = User::new_rider(Uuid::new_v4());
    let system = User::new_system_user();

    let mut ride = pending_ride(rider.id);
    ride.accept(driver.id).unwrap();
    ride.start().unwrap();
    ride.complete(RideCompletion {
        distance: Decimal::ONE,
        duration: 5,
        amount: Decimal::from(1000),
    })
    .unwrap();

    let transaction = Transaction::for_ride(&ride, "RWF".into()).unwrap();

    for user in [rider.clone(), driver.clone(), system.clone()] {
        let result = authorizor.is_allowed(user, "read", transaction.clone());
        assert_eq!(result.unwrap(), true);
    }

    let result = authorizor.is_allowed(stranger.clone(), "read", transaction.clone());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(driver.clone(), "settle", transaction.clone());
    assert_eq!(result.unwrap(), false);

    let result = authorizor.is_allowed(system.clone(), "settle", transaction.clone());
    assert_eq!(result.unwrap(), true);

    let wallet = Wallet::new(driver.id, "RWF".into());

    let result = authorizor.is_allowed(driver.clone(), "read", wallet.clone());
    assert_eq!(result.unwrap(), true);

    let result = authorizor.is_allowed(stranger, "read", wallet.clone());
    assert_eq!(result.unwrap(), false);
}
