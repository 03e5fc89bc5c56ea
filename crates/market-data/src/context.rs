//! Runtime context.
//!
//! Groups the shared components built once at process start. The router,
//! chunked fetchers and stream relays receive it by `Arc`.

use log::info;

use crate::capability::{CapabilityRegistry, CapabilityService};
use crate::chunking::ChunkPolicy;
use crate::config::RuntimeConfig;
use crate::errors::MarketDataError;
use crate::models::{DataFeature, DataRequestBuilder};
use crate::registry::{ProviderRegistration, ProviderRegistry};
use crate::symbol::SymbolNormalizer;

pub struct RuntimeContext {
    config: RuntimeConfig,
    capabilities: CapabilityService,
    symbols: SymbolNormalizer,
    providers: ProviderRegistry,
}

impl RuntimeContext {
    /// Context backed by the built-in capability catalog.
    pub fn new(config: RuntimeConfig) -> Result<Self, MarketDataError> {
        Self::with_capabilities(config, CapabilityRegistry::builtin())
    }

    pub fn with_capabilities(
        config: RuntimeConfig,
        capabilities: CapabilityRegistry,
    ) -> Result<Self, MarketDataError> {
        config.validate()?;
        info!(
            "Runtime context ready: {} exchanges in capability table, symbol TTL {}s",
            capabilities.list_exchanges().len(),
            config.symbol_cache_ttl_secs
        );
        Ok(Self {
            symbols: SymbolNormalizer::with_ttl(config.symbol_cache_ttl()),
            capabilities: CapabilityService::new(capabilities),
            providers: ProviderRegistry::new(),
            config,
        })
    }

    /// Register a provider and its symbol mapper.
    pub fn register_provider(
        &self,
        registration: ProviderRegistration,
    ) -> Result<(), MarketDataError> {
        let exchange = registration.exchange().to_string();
        let mapper = registration.mapper().cloned();
        self.providers.register(registration)?;
        if let Some(mapper) = mapper {
            self.symbols.register_mapper(&exchange, mapper);
        }
        Ok(())
    }

    /// Request builder pre-filled with the configured defaults.
    pub fn request_builder(&self) -> DataRequestBuilder {
        DataRequestBuilder::with_defaults(
            self.config.default_exchange.clone(),
            self.config.default_market_type,
        )
    }

    pub fn chunk_policy(&self, exchange: &str, feature: DataFeature) -> Option<&ChunkPolicy> {
        self.config.chunk_policy(exchange, feature)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &CapabilityService {
        &self.capabilities
    }

    pub fn symbols(&self) -> &SymbolNormalizer {
        &self.symbols
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }
}
