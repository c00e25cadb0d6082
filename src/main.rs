use std::process::ExitCode;
use std::sync::Arc;

use rideledger::api::{AuditAPI, DynAPI};
use rideledger::auth::User;
use rideledger::config::Config;
use rideledger::db::PgStore;
use rideledger::engine::Engine;
use rideledger::error::Error;
use rideledger::external::HttpPaymentGateway;

async fn run() -> Result<bool, Error> {
    let config = Config::from_env()?;

    let store = PgStore::new(&config.database_url, config.max_connections).await?;
    let gateway = HttpPaymentGateway::from_config(&config);

    let engine: DynAPI = Arc::new(Engine::new(
        Arc::new(store),
        Arc::new(gateway),
        config,
    )?);

    let report = engine.check_consistency(User::new_system_user()).await?;

    for violation in report.violations.iter() {
        tracing::warn!(?violation, "ledger violation");
    }

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(err) => tracing::error!(error = %err, "could not serialize report"),
    }

    Ok(report.is_consistent())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            tracing::warn!("ledger is inconsistent");
            ExitCode::from(1)
        }
        Err(err) => {
            tracing::error!(error = %err, "consistency check failed");
            ExitCode::from(2)
        }
    }
}
