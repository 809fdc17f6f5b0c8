//! Services - business logic and state management
//!
//! - `transition_engine` - Membership state machine fed by the pose channel
//! - `transition_worker` - Correlates and emits transitions off the pose path
//! - `device_controls` - Serialized lookup of live zone control values
//! - `location_correlator` - Zone to location matching via shared devices
//! - `localization` - Zone-scoped or global localization requests
//! - `zone_service` - Request-side facade used by the HTTP API

pub mod device_controls;
pub mod localization;
pub mod location_correlator;
pub mod transition_engine;
pub mod transition_worker;
pub mod zone_service;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use device_controls::DeviceControlCache;
pub use localization::LocalizationDispatcher;
pub use location_correlator::LocationCorrelator;
pub use transition_engine::{TransitionBatch, TransitionEngine};
pub use transition_worker::{create_transition_worker, TransitionWorker};
pub use zone_service::ZoneService;
