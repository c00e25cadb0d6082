use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stand-in resource for actions that do not target an existing record,
/// such as booking a ride or opening a wallet.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Platform {
    id: Uuid,
}

impl Default for Platform {
    fn default() -> Self {
        Self { id: Uuid::nil() }
    }
}

impl PolarClass for Platform {
    fn get_polar_class_builder() -> oso::ClassBuilder<Platform> {
        oso::Class::builder()
            .name("Platform")
            .add_attribute_getter("id", |recv: &Platform| recv.id)
    }

    fn get_polar_class() -> oso::Class {
        let builder = Platform::get_polar_class_builder();
        builder.build()
    }
}
