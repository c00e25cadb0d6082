mod place;
pub(crate) mod ride;
mod transaction;
mod wallet;

pub use place::{Coordinates, Place};
pub use ride::{Rating, Ride, RideCompletion, RideRequest, Status as RideStatus};
pub use transaction::{
    GatewayResult, PaymentMethod, Settlement, Status as TransactionStatus, Transaction,
};
pub use wallet::{Wallet, WalletEntry};
