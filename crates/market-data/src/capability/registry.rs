//! Hierarchical capability table.
//!
//! Maps exchange → market type → instrument type → feature → transport →
//! [`CapabilityStatus`]. The table is populated once (from the built-in
//! catalog, explicit inserts, or runtime overrides applied before the registry
//! is shared) and is read-only afterwards.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::catalog::{CapabilityCatalog, CatalogExchange, BUILTIN_CATALOG};
use crate::models::{DataFeature, InstrumentType, MarketType, Timeframe, TransportKind};

/// Lookup coordinate for one capability fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CapabilityKey {
    pub exchange: String,
    pub market_type: MarketType,
    pub instrument_type: InstrumentType,
    pub feature: DataFeature,
    pub transport: TransportKind,
}

impl CapabilityKey {
    pub fn new(
        exchange: impl AsRef<str>,
        market_type: MarketType,
        instrument_type: InstrumentType,
        feature: DataFeature,
        transport: TransportKind,
    ) -> Self {
        Self {
            exchange: exchange.as_ref().to_lowercase(),
            market_type,
            instrument_type,
            feature,
            transport,
        }
    }
}

impl fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) on {} {}/{}",
            self.feature, self.transport, self.exchange, self.market_type, self.instrument_type
        )
    }
}

/// Where a status came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapabilitySource {
    #[default]
    Static,
    Runtime,
}

/// Whether a websocket stream is per symbol or covers the whole market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolScope {
    Symbol,
    Global,
}

/// Extra facts about websocket capabilities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamMetadata {
    pub symbol_scope: SymbolScope,
    /// Other features that can ride the same connection.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub combo: Vec<DataFeature>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub timeframes: Vec<Timeframe>,
}

/// Support status for one capability key.
///
/// `recommendations` is only filled by
/// [`CapabilityService`](super::CapabilityService) for unsupported keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityStatus {
    pub supported: bool,
    pub reason: Option<String>,
    pub source: CapabilitySource,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub constraints: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_metadata: Option<StreamMetadata>,
    pub recommendations: Vec<CapabilityKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verified_at: Option<DateTime<Utc>>,
}

impl CapabilityStatus {
    pub fn supported() -> Self {
        Self {
            supported: true,
            reason: None,
            source: CapabilitySource::Static,
            constraints: serde_json::Map::new(),
            stream_metadata: None,
            recommendations: Vec::new(),
            last_verified_at: None,
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            supported: false,
            reason: Some(reason.into()),
            ..Self::supported()
        }
    }

    pub fn with_constraints(mut self, constraints: serde_json::Map<String, serde_json::Value>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_stream_metadata(mut self, metadata: StreamMetadata) -> Self {
        self.stream_metadata = Some(metadata);
        self
    }
}

/// Summary of what one exchange offers, grouped per feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeCapability {
    pub name: String,
    pub display_name: String,
    pub market_types: Vec<MarketType>,
    pub default_market_type: Option<MarketType>,
    pub timeframes: Vec<Timeframe>,
    /// Feature → transports supported on at least one market.
    pub features: BTreeMap<String, Vec<TransportKind>>,
    pub notes: Option<String>,
}

type TransportTable = HashMap<TransportKind, CapabilityStatus>;
type FeatureTable = HashMap<DataFeature, TransportTable>;
type InstrumentTable = HashMap<InstrumentType, FeatureTable>;

#[derive(Debug, Clone, Default)]
struct ExchangeEntry {
    display_name: String,
    default_market_type: Option<MarketType>,
    notes: Option<String>,
    markets: HashMap<MarketType, InstrumentTable>,
}

/// Static capability table answering "is this combination supported?".
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    exchanges: BTreeMap<String, ExchangeEntry>,
}

impl CapabilityRegistry {
    /// Empty registry, filled through [`insert`](Self::insert).
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry expanded from the catalog shipped with the crate.
    pub fn builtin() -> Self {
        Self::from_catalog(&BUILTIN_CATALOG)
    }

    /// Expand a flat catalog into the full hierarchy.
    ///
    /// Each market type lists its default instrument types; derivative-only
    /// features on spot instruments become explicit unsupported entries.
    pub fn from_catalog(catalog: &CapabilityCatalog) -> Self {
        let mut registry = Self::new();
        for exchange in &catalog.exchanges {
            registry.load_exchange(exchange);
        }
        registry
    }

    fn load_exchange(&mut self, exchange: &CatalogExchange) {
        let name = exchange.name.to_lowercase();
        let entry = self.exchanges.entry(name.clone()).or_default();
        entry.display_name = exchange.display_name.clone().unwrap_or_else(|| name.clone());
        entry.default_market_type = exchange
            .default_market_type
            .or_else(|| exchange.market_types.first().copied());
        entry.notes = exchange.notes.clone();

        for market_type in &exchange.market_types {
            for instrument_type in market_type.default_instrument_types() {
                for (feature, transports) in &exchange.features {
                    for transport in transports {
                        let status = catalog_status(exchange, *feature, *transport, *instrument_type);
                        self.insert(
                            CapabilityKey::new(
                                &name,
                                *market_type,
                                *instrument_type,
                                *feature,
                                *transport,
                            ),
                            status,
                        );
                    }
                }
            }
        }
    }

    /// Record a capability fact. Used while the registry is being populated.
    pub fn insert(&mut self, key: CapabilityKey, status: CapabilityStatus) {
        let entry = self
            .exchanges
            .entry(key.exchange.clone())
            .or_insert_with(|| ExchangeEntry {
                display_name: key.exchange.clone(),
                default_market_type: Some(key.market_type),
                ..ExchangeEntry::default()
            });
        entry
            .markets
            .entry(key.market_type)
            .or_default()
            .entry(key.instrument_type)
            .or_default()
            .entry(key.feature)
            .or_default()
            .insert(key.transport, status);
    }

    /// Override a fact with a runtime-verified status.
    pub fn apply_runtime_status(&mut self, key: CapabilityKey, mut status: CapabilityStatus) {
        status.source = CapabilitySource::Runtime;
        status.last_verified_at = Some(Utc::now());
        self.insert(key, status);
    }

    /// Exact entry for a key, if the table has one.
    pub fn get(&self, key: &CapabilityKey) -> Option<&CapabilityStatus> {
        self.exchanges
            .get(&key.exchange)?
            .markets
            .get(&key.market_type)?
            .get(&key.instrument_type)?
            .get(&key.feature)?
            .get(&key.transport)
    }

    /// Hierarchical lookup. The first missing level determines the reason.
    pub fn supports(&self, key: &CapabilityKey) -> CapabilityStatus {
        let Some(exchange) = self.exchanges.get(&key.exchange) else {
            return CapabilityStatus::unsupported(format!(
                "Exchange '{}' not found in capability registry",
                key.exchange
            ));
        };
        let Some(instruments) = exchange.markets.get(&key.market_type) else {
            return CapabilityStatus::unsupported(format!(
                "Market type '{}' not supported for exchange '{}'",
                key.market_type, key.exchange
            ));
        };
        let Some(features) = instruments.get(&key.instrument_type) else {
            return CapabilityStatus::unsupported(format!(
                "Instrument type '{}' not supported for {}/{}",
                key.instrument_type, key.exchange, key.market_type
            ));
        };
        let Some(transports) = features.get(&key.feature) else {
            return CapabilityStatus::unsupported(format!(
                "Feature '{}' not supported for {}/{}/{}",
                key.feature, key.exchange, key.market_type, key.instrument_type
            ));
        };
        match transports.get(&key.transport) {
            Some(status) => status.clone(),
            None => CapabilityStatus::unsupported(format!(
                "Transport '{}' not supported for {} on {}/{}/{}",
                key.transport, key.feature, key.exchange, key.market_type, key.instrument_type
            )),
        }
    }

    /// Every entry in deterministic order (exchange name, then enum order).
    pub fn entries(&self) -> Vec<(CapabilityKey, &CapabilityStatus)> {
        let mut out = Vec::new();
        for (name, exchange) in &self.exchanges {
            for market_type in MarketType::ALL {
                let Some(instruments) = exchange.markets.get(&market_type) else {
                    continue;
                };
                for instrument_type in InstrumentType::ALL {
                    let Some(features) = instruments.get(&instrument_type) else {
                        continue;
                    };
                    for feature in DataFeature::ALL {
                        let Some(transports) = features.get(&feature) else {
                            continue;
                        };
                        for transport in TransportKind::ALL {
                            if let Some(status) = transports.get(&transport) {
                                out.push((
                                    CapabilityKey::new(
                                        name,
                                        market_type,
                                        instrument_type,
                                        feature,
                                        transport,
                                    ),
                                    status,
                                ));
                            }
                        }
                    }
                }
            }
        }
        out
    }

    pub fn list_exchanges(&self) -> Vec<&str> {
        self.exchanges.keys().map(String::as_str).collect()
    }

    pub fn is_exchange_supported(&self, exchange: &str) -> bool {
        self.exchanges.contains_key(&exchange.to_lowercase())
    }

    pub fn supported_market_types(&self, exchange: &str) -> Option<Vec<MarketType>> {
        let entry = self.exchanges.get(&exchange.to_lowercase())?;
        Some(
            MarketType::ALL
                .into_iter()
                .filter(|m| entry.markets.contains_key(m))
                .collect(),
        )
    }

    /// Timeframes accepted for OHLCV. Identical for every known exchange.
    pub fn supported_timeframes(&self, exchange: &str) -> Option<Vec<Timeframe>> {
        self.is_exchange_supported(exchange)
            .then(|| Timeframe::ALL.to_vec())
    }

    /// Supported features for one exchange/market/instrument combination.
    pub fn list_features(
        &self,
        exchange: &str,
        market_type: MarketType,
        instrument_type: InstrumentType,
    ) -> Vec<(DataFeature, TransportKind, CapabilityStatus)> {
        self.entries()
            .into_iter()
            .filter(|(key, _)| {
                key.exchange == exchange.to_lowercase()
                    && key.market_type == market_type
                    && key.instrument_type == instrument_type
            })
            .map(|(key, status)| (key.feature, key.transport, status.clone()))
            .collect()
    }

    pub fn describe_exchange(&self, exchange: &str) -> Option<ExchangeCapability> {
        let name = exchange.to_lowercase();
        let entry = self.exchanges.get(&name)?;

        let mut features: BTreeMap<String, Vec<TransportKind>> = BTreeMap::new();
        for (key, status) in self.entries() {
            if key.exchange != name || !status.supported {
                continue;
            }
            let transports = features.entry(key.feature.as_str().to_string()).or_default();
            if !transports.contains(&key.transport) {
                transports.push(key.transport);
            }
        }

        Some(ExchangeCapability {
            display_name: entry.display_name.clone(),
            market_types: self.supported_market_types(&name).unwrap_or_default(),
            default_market_type: entry.default_market_type,
            timeframes: Timeframe::ALL.to_vec(),
            features,
            notes: entry.notes.clone(),
            name,
        })
    }
}

fn catalog_status(
    exchange: &CatalogExchange,
    feature: DataFeature,
    transport: TransportKind,
    instrument_type: InstrumentType,
) -> CapabilityStatus {
    if feature.derivatives_only() && !instrument_type.is_derivative() {
        return CapabilityStatus::unsupported(format!(
            "{} is only available for futures/perpetual markets",
            feature
        ));
    }

    let mut status = CapabilityStatus::supported();
    if let Some(constraints) = exchange.constraints.get(&feature) {
        status = status.with_constraints(constraints.clone());
    }

    if transport == TransportKind::Ws {
        let symbol_scope = if exchange.global_streams.contains(&feature) {
            SymbolScope::Global
        } else {
            SymbolScope::Symbol
        };
        let combo = exchange
            .combo_streams
            .iter()
            .find(|group| group.contains(&feature))
            .map(|group| group.iter().copied().filter(|f| *f != feature).collect())
            .unwrap_or_default();
        let timeframes = if feature == DataFeature::Ohlcv {
            Timeframe::ALL.to_vec()
        } else {
            Vec::new()
        };
        status = status.with_stream_metadata(StreamMetadata {
            symbol_scope,
            combo,
            timeframes,
        });
    }

    status
}
