use std::env;
use std::fmt::{self, Debug, Display};

#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

impl From<env::VarError> for Error {
    fn from(err: env::VarError) -> Self {
        Error::env_var_error(err)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::database_error(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::reqwest_error(err)
    }
}

impl From<oso::OsoError> for Error {
    fn from(err: oso::OsoError) -> Self {
        Error::authorizor_error(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for Error {}

const INVALID_TRANSITION: i32 = 100;
const INVALID_INPUT: i32 = 101;
const UNAUTHORIZED: i32 = 102;
const INVALID_RATING: i32 = 103;
const DUPLICATE_TRANSACTION: i32 = 104;
const ALREADY_SETTLED: i32 = 105;
const INSUFFICIENT_FUNDS: i32 = 106;
const GATEWAY_TIMEOUT: i32 = 107;
const GATEWAY_FAILURE: i32 = 108;

impl Error {
    fn new(code: i32, message: &str) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Codes below 100 are infrastructure failures rather than rejected requests.
    pub fn is_internal(&self) -> bool {
        (1..=99).contains(&self.code)
    }

    pub fn invalid_transition_error() -> Self {
        Self::new(INVALID_TRANSITION, "invalid transition")
    }

    pub fn invalid_input_error() -> Self {
        Self::new(INVALID_INPUT, "invalid input")
    }

    pub fn unauthorized_error() -> Self {
        Self::new(UNAUTHORIZED, "unauthorized")
    }

    pub fn invalid_rating_error() -> Self {
        Self::new(INVALID_RATING, "invalid rating")
    }

    pub fn duplicate_transaction_error() -> Self {
        Self::new(DUPLICATE_TRANSACTION, "transaction already exists for ride")
    }

    pub fn already_settled_error() -> Self {
        Self::new(ALREADY_SETTLED, "transaction already settled")
    }

    pub fn insufficient_funds_error() -> Self {
        Self::new(INSUFFICIENT_FUNDS, "insufficient funds")
    }

    pub fn gateway_timeout_error() -> Self {
        Self::new(GATEWAY_TIMEOUT, "payment gateway timed out")
    }

    pub fn gateway_failure_error() -> Self {
        Self::new(GATEWAY_FAILURE, "payment gateway failure")
    }

    pub fn env_var_error(_: env::VarError) -> Self {
        Self::new(1, "environment variable error")
    }

    pub fn database_error<T: Debug>(err: T) -> Self {
        tracing::error!(error = ?err, "database error");
        Self::new(2, "database error")
    }

    pub fn reqwest_error(err: reqwest::Error) -> Self {
        tracing::warn!(error = %err, "reqwest error");
        Self::new(3, "reqwest error")
    }

    pub fn upstream_error() -> Self {
        Self::new(4, "upstream error")
    }

    pub fn unexpected_error() -> Self {
        Self::new(5, "unexpected error")
    }

    pub fn authorizor_error(err: oso::OsoError) -> Self {
        tracing::error!(error = %err, "authorizor error");
        Self::new(6, "authorizor error")
    }

    pub fn config_error() -> Self {
        Self::new(7, "configuration error")
    }

    pub fn is_invalid_transition_error(&self) -> bool {
        self.code == INVALID_TRANSITION
    }

    pub fn is_invalid_input_error(&self) -> bool {
        self.code == INVALID_INPUT
    }

    pub fn is_unauthorized_error(&self) -> bool {
        self.code == UNAUTHORIZED
    }

    pub fn is_invalid_rating_error(&self) -> bool {
        self.code == INVALID_RATING
    }

    pub fn is_duplicate_transaction_error(&self) -> bool {
        self.code == DUPLICATE_TRANSACTION
    }

    pub fn is_already_settled_error(&self) -> bool {
        self.code == ALREADY_SETTLED
    }

    pub fn is_insufficient_funds_error(&self) -> bool {
        self.code == INSUFFICIENT_FUNDS
    }

    pub fn is_gateway_timeout_error(&self) -> bool {
        self.code == GATEWAY_TIMEOUT
    }

    pub fn is_gateway_failure_error(&self) -> bool {
        self.code == GATEWAY_FAILURE
    }
}

#[test]
fn internal_codes_test() {
    assert!(Error::unexpected_error().is_internal());
    assert!(Error::config_error().is_internal());
    assert!(!Error::invalid_transition_error().is_internal());
    assert!(!Error::gateway_timeout_error().is_internal());
    assert!(Error::already_settled_error().is_already_settled_error());
    assert!(!Error::already_settled_error().is_duplicate_transaction_error());
}
