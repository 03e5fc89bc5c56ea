//! Runtime configuration.
//!
//! Values are injected at construction time. Hosts typically deserialize
//! them from their own settings store; every field has a default.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::ChunkPolicy;
use crate::errors::MarketDataError;
use crate::models::{DataFeature, MarketType};

/// Default symbol cache lifetime in seconds.
pub const DEFAULT_SYMBOL_CACHE_TTL_SECS: u64 = 300;

/// Default per-sink buffer for the drop policy.
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 1000;

/// Consecutive publish failures before a sink is detached.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

pub const DEFAULT_MAX_RECONNECTS: u32 = 3;

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// Behavior when a sink cannot keep up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Await every sink before pulling the next upstream event.
    #[default]
    Block,
    /// Buffer per sink; drop the newest event when the buffer is full.
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub backpressure: BackpressurePolicy,
    pub buffer_size: usize,
    pub failure_threshold: u32,
    pub max_reconnects: u32,
    pub reconnect_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backpressure: BackpressurePolicy::Block,
            buffer_size: DEFAULT_RELAY_BUFFER_SIZE,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            max_reconnects: DEFAULT_MAX_RECONNECTS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

impl RelayConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn validate(&self) -> Result<(), MarketDataError> {
        if self.buffer_size == 0 {
            return Err(MarketDataError::configuration(
                "relay buffer_size must be at least 1",
            ));
        }
        if self.failure_threshold == 0 {
            return Err(MarketDataError::configuration(
                "relay failure_threshold must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub default_exchange: Option<String>,
    pub default_market_type: Option<MarketType>,
    pub symbol_cache_ttl_secs: u64,
    pub relay: RelayConfig,
    /// Chunk policies keyed by `"{exchange}.{feature}"`, e.g. `"binance.ohlcv"`.
    pub chunk_policies: HashMap<String, ChunkPolicy>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_exchange: None,
            default_market_type: None,
            symbol_cache_ttl_secs: DEFAULT_SYMBOL_CACHE_TTL_SECS,
            relay: RelayConfig::default(),
            chunk_policies: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn symbol_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.symbol_cache_ttl_secs)
    }

    pub fn chunk_policy(&self, exchange: &str, feature: DataFeature) -> Option<&ChunkPolicy> {
        self.chunk_policies
            .get(&policy_key(exchange, feature))
    }

    pub fn set_chunk_policy(&mut self, exchange: &str, feature: DataFeature, policy: ChunkPolicy) {
        self.chunk_policies
            .insert(policy_key(exchange, feature), policy);
    }

    pub fn validate(&self) -> Result<(), MarketDataError> {
        self.relay.validate()?;
        for (key, policy) in &self.chunk_policies {
            policy.validate().map_err(|e| {
                MarketDataError::configuration(format!("chunk policy '{}': {}", key, e))
            })?;
        }
        Ok(())
    }
}

fn policy_key(exchange: &str, feature: DataFeature) -> String {
    format!("{}.{}", exchange.to_lowercase(), feature.as_str())
}
