use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::Config,
    entities::{GatewayResult, PaymentMethod, Transaction},
    error::Error,
};

/// Charge request sent to the gateway. The idempotency key is the transaction
/// id, so a caller retrying a charge can never collect twice.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Charge {
    pub idempotency_key: Uuid,
    pub payer_id: Uuid,
    pub payee_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
}

impl From<&Transaction> for Charge {
    fn from(transaction: &Transaction) -> Self {
        Self {
            idempotency_key: transaction.id,
            payer_id: transaction.rider_id,
            payee_id: transaction.driver_id,
            amount: transaction.amount,
            currency: transaction.currency.clone(),
            payment_method: transaction.payment_method,
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns `Ok` for any definitive answer, including a decline.
    /// `Err` means the outcome is unknown.
    async fn charge(&self, charge: &Charge) -> Result<GatewayResult, Error>;
}

pub struct HttpPaymentGateway {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Response {
    status: String,
    reference: Option<String>,
    reason: Option<String>,
}

impl HttpPaymentGateway {
    pub fn new(api_base: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base,
            api_key,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.gateway_api_base.clone(),
            config.gateway_api_key.clone(),
        )
    }
}

fn interpret(data: Response) -> Result<GatewayResult, Error> {
    match data.status.as_str() {
        "succeeded" => Ok(GatewayResult::Success {
            reference: data.reference,
        }),
        "declined" | "failed" => Ok(GatewayResult::Failure {
            reason: data.reason.unwrap_or_else(|| data.status.clone()),
        }),
        _ => Err(Error::upstream_error()),
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[tracing::instrument(skip(self, charge), fields(idempotency_key = %charge.idempotency_key))]
    async fn charge(&self, charge: &Charge) -> Result<GatewayResult, Error> {
        let url = format!("https://{}/v1/charges", self.api_base);

        let res = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", charge.idempotency_key.to_string())
            .json(charge)
            .send()
            .await?;

        let status_code = res.status().as_u16();

        if status_code >= 400 && status_code < 500 && status_code != 402 {
            return Err(Error::invalid_input_error());
        } else if status_code != 200 && status_code != 402 {
            return Err(Error::upstream_error());
        }

        let data: Response = res.json().await?;

        interpret(data)
    }
}

#[test]
fn interpret_test() {
    use serde_json::json;

    let data: Response = serde_json::from_value(json!({
        "status": "succeeded",
        "reference": "PG123",
    }))
    .unwrap();
    assert_eq!(
        interpret(data).unwrap(),
        GatewayResult::Success {
            reference: Some("PG123".into())
        }
    );

    let data: Response = serde_json::from_value(json!({
        "status": "declined",
        "reason": "insufficient balance on card",
    }))
    .unwrap();
    assert_eq!(
        interpret(data).unwrap(),
        GatewayResult::Failure {
            reason: "insufficient balance on card".into()
        }
    );

    let data: Response = serde_json::from_value(json!({ "status": "failed" })).unwrap();
    assert_eq!(
        interpret(data).unwrap(),
        GatewayResult::Failure {
            reason: "failed".into()
        }
    );

    let data: Response = serde_json::from_value(json!({ "status": "processing" })).unwrap();
    assert!(interpret(data).is_err());
}
