//! Domain models - zones, poses and transition types
//!
//! - `zone` - zone geometry, zone sets and membership
//! - `types` - observation, registry, localization and transition types
//! - `error` - `ZoneError` taxonomy

pub mod error;
pub mod types;
pub mod zone;

pub use error::ZoneError;
pub use zone::{Membership, Zone, ZoneRef, ZoneSet};
