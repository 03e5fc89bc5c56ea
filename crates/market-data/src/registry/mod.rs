//! Provider registry module.
//!
//! This module owns provider lifecycles:
//! - Exchange registration with a static handler table and symbol mapper
//! - Lazy, race-free construction of pooled instances
//! - Shutdown that closes every instance and reports all failures

mod provider_registry;

pub use provider_registry::{ProviderRegistration, ProviderRegistry};
