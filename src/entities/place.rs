use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// A pickup or dropoff point as shown to the rider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub label: String,
    pub coordinates: Coordinates,
}

impl Place {
    pub fn new(label: String, coordinates: Coordinates) -> Self {
        Self { label, coordinates }
    }
}
