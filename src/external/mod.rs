pub mod payment_gateway;

pub use payment_gateway::{Charge, HttpPaymentGateway, PaymentGateway};
