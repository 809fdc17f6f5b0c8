//! Live control values for the devices configured in a zone
//!
//! Each `list_controls` call builds its own control cache so the registry is
//! asked about a device at most once per distinct control id within that
//! call. Nothing is carried over between calls. A single mutex is held for
//! the whole lookup, so concurrent calls (even for different zones) run one
//! after another.

use crate::domain::error::ZoneError;
use crate::domain::types::{ControlDescriptor, DeviceControl, ZoneControl};
use crate::infra::metrics::Metrics;
use crate::io::registry::DeviceRegistry;
use rustc_hash::FxHashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Serialized, request-scoped lookup of zone control values
pub struct DeviceControlCache {
    /// Zone name → configured control descriptors
    zone_controls: HashMap<String, Vec<ControlDescriptor>>,
    registry: Arc<dyn DeviceRegistry>,
    metrics: Arc<Metrics>,
    /// Held across the full registry-query + cache-build sequence
    lock: Mutex<()>,
}

impl DeviceControlCache {
    pub fn new(
        zone_controls: HashMap<String, Vec<ControlDescriptor>>,
        registry: Arc<dyn DeviceRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { zone_controls, registry, metrics, lock: Mutex::new(()) }
    }

    /// Resolve live values for every control configured in `zone`
    ///
    /// Output follows descriptor order. A zone without descriptors (or an
    /// unknown zone name) yields an empty list.
    pub async fn list_controls(&self, zone: &str) -> Result<Vec<ZoneControl>, ZoneError> {
        let _guard = self.lock.lock().await;
        self.metrics.record_device_request();

        let Some(descriptors) = self.zone_controls.get(zone) else {
            debug!(zone = %zone, "zone_has_no_controls");
            return Ok(Vec::new());
        };

        let mut control_cache: FxHashMap<String, DeviceControl> = FxHashMap::default();
        let mut controls = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            if !control_cache.contains_key(&descriptor.control_id) {
                let reported = match self.registry.get_device_info(&descriptor.device_id).await {
                    Ok(reported) => reported,
                    Err(e) => {
                        self.metrics.record_registry_failure();
                        warn!(
                            zone = %zone,
                            device_id = %descriptor.device_id,
                            error = %e,
                            "device_info_failed"
                        );
                        return Err(e);
                    }
                };
                for control in reported {
                    control_cache.insert(control.control_id.clone(), control);
                }
            }

            let Some(value) = control_cache.get(&descriptor.control_id) else {
                let err = ZoneError::ControlNotReported {
                    device_id: descriptor.device_id.clone(),
                    control_id: descriptor.control_id.clone(),
                };
                self.metrics.record_registry_failure();
                warn!(
                    zone = %zone,
                    device_id = %descriptor.device_id,
                    control_id = %descriptor.control_id,
                    kind = %err.kind(),
                    "device_control_missing"
                );
                return Err(err);
            };

            controls.push(ZoneControl {
                zone: zone.to_string(),
                device_id: descriptor.device_id.clone(),
                control_id: descriptor.control_id.clone(),
                name: descriptor.control.clone(),
                num_val: value.num_val,
            });
        }

        debug!(zone = %zone, controls = %controls.len(), "zone_controls_resolved");
        Ok(controls)
    }
}
