use serde::{Deserialize, Serialize};

use super::LookupEngine;
use crate::binary::LocationRecord;

/// A location resolved through its [`LookupEngine`].
///
/// The view borrows the engine, so it cannot outlive it. Use
/// [`to_resolved`](Location::to_resolved) for a copy that can.
#[derive(Clone, Copy)]
pub struct Location<'a> {
    engine: &'a LookupEngine,
    id: u16,
    record: &'a LocationRecord,
}

impl<'a> Location<'a> {
    pub(super) fn new(engine: &'a LookupEngine, id: u16, record: &'a LocationRecord) -> Self {
        Self { engine, id, record }
    }

    /// LocationID of this location.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// The engine this location belongs to.
    pub fn engine(&self) -> &'a LookupEngine {
        self.engine
    }

    pub fn latitude(&self) -> f64 {
        self.record.latitude_degrees()
    }

    pub fn longitude(&self) -> f64 {
        self.record.longitude_degrees()
    }

    pub fn country_code(&self) -> &'a str {
        self.resolve(self.record.country_code)
    }

    pub fn country(&self) -> &'a str {
        self.resolve(self.record.country)
    }

    pub fn region(&self) -> &'a str {
        self.resolve(self.record.region)
    }

    pub fn city(&self) -> &'a str {
        self.resolve(self.record.city)
    }

    pub fn country_code_id(&self) -> u16 {
        self.record.country_code
    }

    pub fn country_id(&self) -> u16 {
        self.record.country
    }

    pub fn region_id(&self) -> u16 {
        self.record.region
    }

    pub fn city_id(&self) -> u16 {
        self.record.city
    }

    /// Copy every field out of the engine.
    pub fn to_resolved(&self) -> ResolvedLocation {
        ResolvedLocation {
            location_id: self.id,
            latitude: self.latitude(),
            longitude: self.longitude(),
            country_code: self.country_code().to_string(),
            country: self.country().to_string(),
            region: self.region().to_string(),
            city: self.city().to_string(),
        }
    }

    // StringIDs were range-checked on load.
    fn resolve(&self, id: u16) -> &'a str {
        self.engine.string(id).unwrap_or_default()
    }
}

impl std::fmt::Debug for Location<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Location")
            .field("id", &self.id)
            .field("latitude", &self.latitude())
            .field("longitude", &self.longitude())
            .field("country_code", &self.country_code())
            .field("country", &self.country())
            .field("region", &self.region())
            .field("city", &self.city())
            .finish()
    }
}

/// Owned copy of a [`Location`], independent of the engine's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub location_id: u16,
    pub latitude: f64,
    pub longitude: f64,
    pub country_code: String,
    pub country: String,
    pub region: String,
    pub city: String,
}
