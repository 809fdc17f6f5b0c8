//! Localization requests scoped to a zone or the whole map

use crate::domain::error::ZoneError;
use crate::domain::types::{LocalizeAck, PolygonConstraint};
use crate::domain::zone::ZoneSet;
use crate::infra::metrics::Metrics;
use crate::io::registry::Localizer;
use std::sync::Arc;
use tracing::{info, warn};

/// Zone name that requests global localization instead of a zone prior
pub const GLOBAL_SENTINEL: &str = "none";

pub struct LocalizationDispatcher {
    zones: Arc<ZoneSet>,
    localizer: Arc<dyn Localizer>,
    metrics: Arc<Metrics>,
}

impl LocalizationDispatcher {
    pub fn new(zones: Arc<ZoneSet>, localizer: Arc<dyn Localizer>, metrics: Arc<Metrics>) -> Self {
        Self { zones, localizer, metrics }
    }

    /// Trigger localization within `zone`, or globally for `none` (any case)
    ///
    /// Returns once the request is accepted; does not wait for convergence.
    pub async fn localize(&self, zone: &str) -> Result<LocalizeAck, ZoneError> {
        self.metrics.record_localization_request();

        if zone.eq_ignore_ascii_case(GLOBAL_SENTINEL) {
            self.localizer.global_localization().await.inspect_err(|e| self.failed(zone, e))?;
            info!("global_localization_requested");
            return Ok(LocalizeAck::Global);
        }

        let zone = self.zones.get(zone)?;
        let constraint =
            PolygonConstraint { frame_id: zone.frame_id().to_string(), points: zone.vertices().to_vec() };

        self.localizer
            .polygon_localization(&constraint)
            .await
            .inspect_err(|e| self.failed(zone.name(), e))?;

        info!(zone = %zone.name(), frame_id = %zone.frame_id(), "polygon_localization_requested");
        Ok(LocalizeAck::Polygon { zone: zone.name().to_string(), frame_id: zone.frame_id().to_string() })
    }

    fn failed(&self, zone: &str, error: &ZoneError) {
        self.metrics.record_registry_failure();
        warn!(zone = %zone, error = %error, "localization_failed");
    }
}
