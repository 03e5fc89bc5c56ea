//! Capability table and request validation.
//!
//! Answers "is (exchange, market, instrument, feature, transport) supported?"
//! without touching any provider, and suggests alternatives when it is not.

mod catalog;
mod registry;
mod service;

pub use catalog::{CapabilityCatalog, CatalogExchange};
pub use registry::{
    CapabilityKey, CapabilityRegistry, CapabilitySource, CapabilityStatus, ExchangeCapability,
    StreamMetadata, SymbolScope,
};
pub use service::CapabilityService;
