//! Symbol normalization with a per-key TTL cache.
//!
//! Resolution order for a raw symbol:
//! 1. `urm://` canonical identifiers
//! 2. `BASE/QUOTE` short form (primary instrument type of the market)
//! 3. the exchange's registered [`SymbolMapper`]
//!
//! Successful results are cached by `(exchange, market_type, symbol)`.
//! Concurrent lookups for the same key share a single in-flight resolution.
//! Failures are never cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::OnceCell;

use super::mapper::SymbolMapper;
use super::urm::{is_urm_id, parse_urm_id};
use crate::errors::{MarketDataError, SymbolResolutionError};
use crate::models::{InstrumentSpec, InstrumentType, MarketType};

/// Default lifetime of a cached resolution.
pub const DEFAULT_SYMBOL_CACHE_TTL: Duration = Duration::from_secs(300);

type CacheKey = (String, MarketType, String);

#[derive(Debug, Clone)]
struct CachedSpec {
    spec: InstrumentSpec,
    expires_at: Instant,
}

/// Resolves raw symbols into [`InstrumentSpec`]s and back to native form.
pub struct SymbolNormalizer {
    mappers: RwLock<HashMap<String, Arc<dyn SymbolMapper>>>,
    cache: Mutex<HashMap<CacheKey, Arc<OnceCell<CachedSpec>>>>,
    ttl: Duration,
}

impl Default for SymbolNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolNormalizer {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SYMBOL_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            mappers: RwLock::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register (or replace) the mapper for an exchange.
    ///
    /// Cached resolutions for the exchange are dropped.
    pub fn register_mapper(&self, exchange: &str, mapper: Arc<dyn SymbolMapper>) {
        let exchange = exchange.to_lowercase();
        self.write_mappers().insert(exchange.clone(), mapper);
        self.clear_cache(Some(&exchange));
    }

    pub fn unregister_mapper(&self, exchange: &str) -> bool {
        let exchange = exchange.to_lowercase();
        let removed = self.write_mappers().remove(&exchange).is_some();
        self.clear_cache(Some(&exchange));
        removed
    }

    pub fn has_mapper(&self, exchange: &str) -> bool {
        self.read_mappers().contains_key(&exchange.to_lowercase())
    }

    fn mapper(&self, exchange: &str) -> Option<Arc<dyn SymbolMapper>> {
        self.read_mappers().get(exchange).cloned()
    }

    /// Resolve a raw symbol for an exchange and market.
    ///
    /// # Errors
    /// [`MarketDataError::SymbolResolution`] naming the exchange, market type
    /// and any aliases the mapper knows.
    pub async fn resolve(
        &self,
        symbol: &str,
        exchange: &str,
        market_type: MarketType,
    ) -> Result<InstrumentSpec, MarketDataError> {
        let exchange = exchange.to_lowercase();
        let key: CacheKey = (exchange.clone(), market_type, symbol.to_string());
        let cell = self.slot(&key);

        let resolved = cell
            .get_or_try_init(|| async {
                debug!("Resolving symbol '{}' on {} ({})", symbol, exchange, market_type);
                self.resolve_uncached(symbol, &exchange, market_type)
                    .map(|spec| CachedSpec {
                        spec,
                        expires_at: Instant::now() + self.ttl,
                    })
            })
            .await;

        match resolved {
            Ok(cached) => Ok(cached.spec.clone()),
            Err(err) => {
                self.release_slot(&key, &cell);
                Err(err)
            }
        }
    }

    /// Render a spec in the exchange's native spelling.
    pub fn to_native(
        &self,
        spec: &InstrumentSpec,
        exchange: &str,
        market_type: MarketType,
    ) -> Result<String, MarketDataError> {
        let exchange = exchange.to_lowercase();
        let mapper = self.mapper(&exchange).ok_or_else(|| {
            SymbolResolutionError::new(
                &exchange,
                spec.to_string(),
                market_type,
                "no symbol mapper registered",
            )
        })?;
        Ok(mapper.to_native(spec, market_type)?)
    }

    /// Drop cached resolutions, for one exchange or all of them.
    pub fn clear_cache(&self, exchange: Option<&str>) {
        let mut cache = self.lock_cache();
        match exchange {
            Some(exchange) => {
                let exchange = exchange.to_lowercase();
                cache.retain(|(cached_exchange, _, _), _| *cached_exchange != exchange);
            }
            None => cache.clear(),
        }
    }

    /// Number of cache slots, including in-flight and expired ones.
    pub fn cache_len(&self) -> usize {
        self.lock_cache().len()
    }

    /// Cell for `key`. Expired entries are replaced by a fresh cell and
    /// pruned from the rest of the cache; an in-flight cell is shared so
    /// concurrent callers wait on one resolution.
    fn slot(&self, key: &CacheKey) -> Arc<OnceCell<CachedSpec>> {
        let mut cache = self.lock_cache();
        if let Some(cell) = cache.get(key) {
            match cell.get() {
                Some(cached) if cached.expires_at > Instant::now() => {
                    debug!("Symbol cache hit for '{}' on {}", key.2, key.0);
                    return cell.clone();
                }
                None => return cell.clone(),
                Some(_) => debug!("Symbol cache entry expired for '{}' on {}", key.2, key.0),
            }
        }
        let now = Instant::now();
        cache.retain(|_, cell| !matches!(cell.get(), Some(cached) if cached.expires_at <= now));
        let cell = Arc::new(OnceCell::new());
        cache.insert(key.clone(), cell.clone());
        cell
    }

    /// Drop a slot left empty by a failed resolution, unless another caller
    /// has already replaced or filled it.
    fn release_slot(&self, key: &CacheKey, cell: &Arc<OnceCell<CachedSpec>>) {
        let mut cache = self.lock_cache();
        let stale = cache
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, cell) && !current.initialized());
        if stale {
            cache.remove(key);
        }
    }

    fn resolve_uncached(
        &self,
        symbol: &str,
        exchange: &str,
        market_type: MarketType,
    ) -> Result<InstrumentSpec, MarketDataError> {
        let fail = |message: String| -> MarketDataError {
            let aliases = self
                .mapper(exchange)
                .map(|m| m.known_aliases(symbol, market_type))
                .unwrap_or_default();
            SymbolResolutionError::new(exchange, symbol, market_type, message)
                .with_aliases(aliases)
                .into()
        };

        let trimmed = symbol.trim();
        if trimmed.is_empty() {
            return Err(fail("symbol is empty".to_string()));
        }

        if is_urm_id(trimmed) {
            let id = parse_urm_id(trimmed).map_err(|e| fail(e.to_string()))?;
            if let Some(scope) = id.exchange.as_deref() {
                if scope != exchange {
                    return Err(fail(format!("identifier is scoped to exchange '{}'", scope)));
                }
            }
            return Ok(id.spec);
        }

        if let Some((base, quote)) = trimmed.split_once('/') {
            let instrument_type = market_type
                .default_instrument_types()
                .first()
                .copied()
                .unwrap_or(InstrumentType::Spot);
            return InstrumentSpec::new(base, quote, instrument_type)
                .map_err(|e| fail(e.to_string()));
        }

        match self.mapper(exchange) {
            Some(mapper) => mapper.to_spec(trimmed, market_type).map_err(|err| {
                let err = if err.known_aliases.is_empty() {
                    let aliases = mapper.known_aliases(trimmed, market_type);
                    err.with_aliases(aliases)
                } else {
                    err
                };
                MarketDataError::from(err)
            }),
            None => Err(fail("no symbol mapper registered".to_string())),
        }
    }

    fn read_mappers(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn SymbolMapper>>> {
        self.mappers.read().unwrap_or_else(|poisoned| {
            warn!("Symbol mapper lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_mappers(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn SymbolMapper>>> {
        self.mappers.write().unwrap_or_else(|poisoned| {
            warn!("Symbol mapper lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_cache(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Arc<OnceCell<CachedSpec>>>> {
        self.cache.lock().unwrap_or_else(|poisoned| {
            warn!("Symbol cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
