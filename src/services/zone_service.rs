//! Request-side operations exposed to API clients
//!
//! Thin facade over the zone set, the device control cache, the location
//! correlator and the localization dispatcher. Holds no state of its own.

use crate::domain::error::ZoneError;
use crate::domain::types::{LocalizeAck, Location, ZoneControl};
use crate::domain::zone::{ZoneInfo, ZoneRef, ZoneSet};
use crate::services::device_controls::DeviceControlCache;
use crate::services::localization::LocalizationDispatcher;
use crate::services::location_correlator::LocationCorrelator;
use std::sync::Arc;

/// A zone paired with one of its matched locations
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ZoneLocation {
    pub zone: ZoneInfo,
    pub location: Location,
}

pub struct ZoneService {
    zones: Arc<ZoneSet>,
    controls: Arc<DeviceControlCache>,
    correlator: Arc<LocationCorrelator>,
    localization: Arc<LocalizationDispatcher>,
}

impl ZoneService {
    pub fn new(
        zones: Arc<ZoneSet>,
        controls: Arc<DeviceControlCache>,
        correlator: Arc<LocationCorrelator>,
        localization: Arc<LocalizationDispatcher>,
    ) -> Self {
        Self { zones, controls, correlator, localization }
    }

    pub fn zones(&self) -> Vec<ZoneInfo> {
        self.zones.iter().map(|zone| zone.info()).collect()
    }

    /// Live control values for the devices configured in `zone`
    pub async fn list_devices_in_zone(&self, zone: &str) -> Result<Vec<ZoneControl>, ZoneError> {
        self.controls.list_controls(zone).await
    }

    /// Every (zone, location) pair where the two share a device
    ///
    /// Zones are visited in zone set order and a zone appears once per
    /// matched location. Any registry failure fails the whole request.
    pub async fn get_zone_locations(&self) -> Result<Vec<ZoneLocation>, ZoneError> {
        let mut pairs = Vec::new();
        for zone in self.zones.iter() {
            let matched = self.correlator.matched_locations(&ZoneRef::Resolved(zone.clone())).await?;
            pairs.extend(matched.into_iter().map(|location| ZoneLocation { zone: zone.info(), location }));
        }
        Ok(pairs)
    }

    pub async fn localize_in_zone(&self, zone: &str) -> Result<LocalizeAck, ZoneError> {
        self.localization.localize(zone).await
    }
}
