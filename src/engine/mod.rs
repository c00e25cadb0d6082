mod audit_api;
mod helpers;
mod ride_api;
#[cfg(test)]
mod testing;
mod transaction_api;
mod wallet_api;

use std::sync::Arc;

use oso::Oso;

use crate::{
    api::API,
    auth::authorizor,
    config::Config,
    db::Store,
    error::Error,
    external::PaymentGateway,
};

pub struct Engine {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    authorizor: Oso,
    config: Config,
}

impl Engine {
    #[tracing::instrument(name = "Engine::new", skip_all)]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        config: Config,
    ) -> Result<Self, Error> {
        Ok(Self {
            store,
            gateway,
            authorizor: authorizor::new()?,
            config,
        })
    }
}

impl Engine {
    pub fn authorize<Actor, Action, Resource>(
        &self,
        actor: Actor,
        action: Action,
        resource: Resource,
    ) -> Result<(), Error>
    where
        Actor: oso::ToPolar,
        Action: oso::ToPolar,
        Resource: oso::ToPolar,
    {
        if self.authorizor.is_allowed(actor, action, resource)? {
            return Ok(());
        }

        Err(Error::unauthorized_error())
    }
}

impl API for Engine {}
