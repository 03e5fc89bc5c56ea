//! Built-in capability catalog.
//!
//! Loads `capabilities.json` at compile time via `include_str!` and parses it
//! once via `lazy_static`. The catalog is flat (exchange → feature →
//! transports); [`CapabilityRegistry::from_catalog`](super::CapabilityRegistry::from_catalog)
//! expands it into the full hierarchy.

use std::collections::HashMap;

use lazy_static::lazy_static;
use log::error;
use serde::Deserialize;

use crate::models::{DataFeature, MarketType, TransportKind};

// ── JSON schema ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilityCatalog {
    pub exchanges: Vec<CatalogExchange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogExchange {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub default_market_type: Option<MarketType>,
    pub market_types: Vec<MarketType>,
    pub features: HashMap<DataFeature, Vec<TransportKind>>,
    /// Websocket features delivered as one all-symbol stream.
    #[serde(default)]
    pub global_streams: Vec<DataFeature>,
    /// Groups of features that can share one websocket connection.
    #[serde(default)]
    pub combo_streams: Vec<Vec<DataFeature>>,
    #[serde(default)]
    pub constraints: HashMap<DataFeature, serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CapabilityCatalog {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

lazy_static! {
    pub(crate) static ref BUILTIN_CATALOG: CapabilityCatalog = load_builtin();
}

fn load_builtin() -> CapabilityCatalog {
    CapabilityCatalog::from_json(include_str!("capabilities.json")).unwrap_or_else(|e| {
        error!("Built-in capability catalog is invalid, starting empty: {}", e);
        CapabilityCatalog::default()
    })
}
