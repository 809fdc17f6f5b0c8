//! Zone ↔ location correlation via shared devices
//!
//! A location matches a zone when at least one of its devices is also one of
//! the devices configured for the zone.

use crate::domain::error::ZoneError;
use crate::domain::types::Location;
use crate::domain::zone::{ZoneRef, ZoneSet};
use crate::infra::metrics::Metrics;
use crate::io::registry::LocationRegistry;
use crate::services::device_controls::DeviceControlCache;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct LocationCorrelator {
    zones: Arc<ZoneSet>,
    controls: Arc<DeviceControlCache>,
    registry: Arc<dyn LocationRegistry>,
    metrics: Arc<Metrics>,
}

impl LocationCorrelator {
    pub fn new(
        zones: Arc<ZoneSet>,
        controls: Arc<DeviceControlCache>,
        registry: Arc<dyn LocationRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { zones, controls, registry, metrics }
    }

    /// Locations sharing at least one device with `zone`, in registry order
    pub async fn matched_locations(&self, zone: &ZoneRef) -> Result<Vec<Location>, ZoneError> {
        let zone = self.zones.resolve(zone)?;

        let device_ids: HashSet<String> = self
            .controls
            .list_controls(zone.name())
            .await?
            .into_iter()
            .map(|control| control.device_id)
            .collect();

        let locations = self.registry.list_locations().await.inspect_err(|e| self.upstream_failed(e))?;

        let mut matched = Vec::new();
        for location in locations {
            let location_devices = self
                .registry
                .list_devices(&location.location_id)
                .await
                .inspect_err(|e| self.upstream_failed(e))?;

            if location_devices.iter().any(|d| device_ids.contains(&d.device_id)) {
                matched.push(location);
            }
        }

        debug!(zone = %zone.name(), devices = %device_ids.len(), matched = %matched.len(), "locations_correlated");
        Ok(matched)
    }

    fn upstream_failed(&self, error: &ZoneError) {
        self.metrics.record_registry_failure();
        warn!(error = %error, "location_registry_failed");
    }
}
