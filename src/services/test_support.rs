//! In-memory registry and localizer doubles for service tests

use crate::domain::error::ZoneError;
use crate::domain::types::{DeviceControl, Location, LocationDevice, PolygonConstraint};
use crate::io::registry::{DeviceRegistry, LocationRegistry, Localizer};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Registry double that counts calls and tracks call concurrency
#[derive(Default)]
pub struct MockRegistry {
    devices: Mutex<HashMap<String, Vec<DeviceControl>>>,
    locations: Vec<Location>,
    location_devices: HashMap<String, Vec<String>>,
    delay: Option<Duration>,
    device_calls: Mutex<Vec<String>>,
    location_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_devices: AtomicBool,
    fail_locations: AtomicBool,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device_id: &str, controls: &[(&str, f64)]) -> Self {
        let controls = controls
            .iter()
            .map(|(id, val)| DeviceControl { control_id: id.to_string(), num_val: *val, name: None })
            .collect();
        self.devices.lock().insert(device_id.to_string(), controls);
        self
    }

    pub fn with_location(mut self, location_id: &str, device_ids: &[&str]) -> Self {
        self.locations.push(Location {
            location_id: location_id.to_string(),
            name: format!("{} name", location_id),
        });
        self.location_devices.insert(
            location_id.to_string(),
            device_ids.iter().map(|d| d.to_string()).collect(),
        );
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_control(&self, device_id: &str, control_id: &str, num_val: f64) {
        if let Some(controls) = self.devices.lock().get_mut(device_id) {
            for control in controls.iter_mut().filter(|c| c.control_id == control_id) {
                control.num_val = num_val;
            }
        }
    }

    pub fn fail_devices(&self, fail: bool) {
        self.fail_devices.store(fail, Ordering::SeqCst);
    }

    pub fn fail_locations(&self, fail: bool) {
        self.fail_locations.store(fail, Ordering::SeqCst);
    }

    pub fn device_calls(&self) -> usize {
        self.device_calls.lock().len()
    }

    pub fn device_calls_for(&self, device_id: &str) -> usize {
        self.device_calls.lock().iter().filter(|d| d.as_str() == device_id).count()
    }

    pub fn location_calls(&self) -> usize {
        self.location_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceRegistry for MockRegistry {
    async fn get_device_info(&self, device_id: &str) -> Result<Vec<DeviceControl>, ZoneError> {
        self.device_calls.lock().push(device_id.to_string());
        self.enter().await;
        let result = if self.fail_devices.load(Ordering::SeqCst) {
            Err(ZoneError::RegistryUnavailable("device registry down".to_string()))
        } else {
            Ok(self.devices.lock().get(device_id).cloned().unwrap_or_default())
        };
        self.leave();
        result
    }
}

#[async_trait]
impl LocationRegistry for MockRegistry {
    async fn list_locations(&self) -> Result<Vec<Location>, ZoneError> {
        self.location_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_locations.load(Ordering::SeqCst) {
            return Err(ZoneError::RegistryUnavailable("location registry down".to_string()));
        }
        Ok(self.locations.clone())
    }

    async fn list_devices(&self, location_id: &str) -> Result<Vec<LocationDevice>, ZoneError> {
        self.location_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_locations.load(Ordering::SeqCst) {
            return Err(ZoneError::RegistryUnavailable("location registry down".to_string()));
        }
        Ok(self
            .location_devices
            .get(location_id)
            .map(|ids| {
                ids.iter().map(|id| LocationDevice { device_id: id.clone(), name: None }).collect()
            })
            .unwrap_or_default())
    }
}

/// A localization request observed by `MockLocalizer`
#[derive(Debug, Clone, PartialEq)]
pub enum LocalizeCall {
    Global,
    Polygon(PolygonConstraint),
}

#[derive(Default)]
pub struct MockLocalizer {
    calls: Mutex<Vec<LocalizeCall>>,
    fail: AtomicBool,
}

impl MockLocalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<LocalizeCall> {
        self.calls.lock().clone()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn result(&self) -> Result<(), ZoneError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(ZoneError::RegistryUnavailable("localizer down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Localizer for MockLocalizer {
    async fn global_localization(&self) -> Result<(), ZoneError> {
        self.calls.lock().push(LocalizeCall::Global);
        self.result()
    }

    async fn polygon_localization(&self, polygon: &PolygonConstraint) -> Result<(), ZoneError> {
        self.calls.lock().push(LocalizeCall::Polygon(polygon.clone()));
        self.result()
    }
}
