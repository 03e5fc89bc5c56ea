//! Provider registry owning pooled exchange clients.
//!
//! The registry manages:
//! - Registrations: a construction recipe, supported market types, the
//!   static handler table and the symbol mapper per exchange
//! - A lazily populated pool of provider instances keyed by
//!   `(exchange, market_type)`, constructed at most once per key
//! - Shutdown, which closes every pooled instance and reports every failure

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use futures::future::BoxFuture;
use log::{debug, info, warn};
use tokio::sync::OnceCell;

use crate::errors::{CloseFailure, MarketDataError};
use crate::models::{DataFeature, MarketType, TransportKind};
use crate::provider::{ExchangeProvider, FeatureHandler, HandlerTable, ProviderHandle};
use crate::symbol::SymbolMapper;

type ProviderFactory =
    Arc<dyn Fn(MarketType) -> BoxFuture<'static, Result<ProviderHandle, MarketDataError>> + Send + Sync>;

type PoolKey = (String, MarketType);

/// Everything the registry needs to serve one exchange.
pub struct ProviderRegistration {
    exchange: String,
    market_types: Vec<MarketType>,
    factory: ProviderFactory,
    handlers: HandlerTable,
    mapper: Option<Arc<dyn SymbolMapper>>,
}

impl ProviderRegistration {
    /// Create a registration from a typed factory.
    ///
    /// # Arguments
    ///
    /// * `exchange` - Exchange identifier (case-insensitive)
    /// * `market_types` - Market types the provider can be constructed for
    /// * `factory` - Builds a fresh provider for one market type
    pub fn new<P, F, Fut>(
        exchange: impl Into<String>,
        market_types: impl IntoIterator<Item = MarketType>,
        factory: F,
    ) -> Self
    where
        P: ExchangeProvider,
        F: Fn(MarketType) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, MarketDataError>> + Send + 'static,
    {
        let exchange = exchange.into().to_lowercase();
        let name = exchange.clone();
        let factory: ProviderFactory = Arc::new(move |market_type: MarketType| {
            let construct = factory(market_type);
            let name = name.clone();
            Box::pin(async move {
                let provider = construct.await?;
                Ok(ProviderHandle::new(name, market_type, Arc::new(provider)))
            }) as BoxFuture<'static, Result<ProviderHandle, MarketDataError>>
        });

        let mut market_types: Vec<MarketType> = market_types.into_iter().collect();
        market_types.dedup();

        Self {
            exchange,
            market_types,
            factory,
            handlers: HandlerTable::new(),
            mapper: None,
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn SymbolMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn market_types(&self) -> &[MarketType] {
        &self.market_types
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub fn mapper(&self) -> Option<&Arc<dyn SymbolMapper>> {
        self.mapper.as_ref()
    }
}

/// Pooled provider instances and their handler tables.
pub struct ProviderRegistry {
    registrations: RwLock<HashMap<String, Arc<ProviderRegistration>>>,
    pool: Mutex<HashMap<PoolKey, Arc<OnceCell<ProviderHandle>>>>,
    /// Only written while holding the pool lock.
    closed: AtomicBool,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            pool: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Record a registration. Fails if the exchange is already registered.
    pub fn register(&self, registration: ProviderRegistration) -> Result<(), MarketDataError> {
        if self.is_closed() {
            return Err(MarketDataError::RegistryClosed);
        }
        let mut registrations = self.write_registrations();
        if registrations.contains_key(&registration.exchange) {
            return Err(MarketDataError::DuplicateRegistration {
                exchange: registration.exchange.clone(),
            });
        }
        info!(
            "Registered provider '{}' for {:?} with {} handlers",
            registration.exchange,
            registration
                .market_types
                .iter()
                .map(MarketType::as_str)
                .collect::<Vec<_>>(),
            registration.handlers.len()
        );
        registrations.insert(registration.exchange.clone(), Arc::new(registration));
        Ok(())
    }

    /// Remove a registration and close its pooled instances.
    ///
    /// Returns `false` when the exchange was not registered.
    pub async fn unregister(&self, exchange: &str) -> Result<bool, MarketDataError> {
        let exchange = exchange.to_lowercase();
        if self.write_registrations().remove(&exchange).is_none() {
            return Ok(false);
        }

        let cells: Vec<(PoolKey, Arc<OnceCell<ProviderHandle>>)> = {
            let mut pool = self.lock_pool();
            let keys: Vec<PoolKey> = pool
                .keys()
                .filter(|(pooled, _)| *pooled == exchange)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| pool.remove(&key).map(|cell| (key, cell)))
                .collect()
        };

        let failures = close_cells(cells).await;
        info!("Unregistered provider '{}'", exchange);
        if failures.is_empty() {
            Ok(true)
        } else {
            Err(MarketDataError::ShutdownFailed { failures })
        }
    }

    /// Pooled instance for `(exchange, market_type)`, constructed on first use.
    ///
    /// Concurrent first requests share one construction. A failed
    /// construction is not cached; the next call starts over.
    pub async fn get_provider(
        &self,
        exchange: &str,
        market_type: MarketType,
    ) -> Result<ProviderHandle, MarketDataError> {
        if self.is_closed() {
            return Err(MarketDataError::RegistryClosed);
        }
        let exchange = exchange.to_lowercase();
        let registration = self.registration(&exchange)?;
        if !registration.market_types.contains(&market_type) {
            return Err(MarketDataError::MarketTypeNotSupported {
                exchange,
                market_type,
            });
        }

        let cell = {
            let mut pool = self.lock_pool();
            if self.closed.load(Ordering::SeqCst) {
                return Err(MarketDataError::RegistryClosed);
            }
            pool.entry((exchange.clone(), market_type))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let handle = cell
            .get_or_try_init(|| async {
                info!("Constructing provider '{}' ({})", exchange, market_type);
                let handle = (registration.factory)(market_type).await?;
                if let Err(e) = handle.provider().connect().await {
                    warn!(
                        "Provider '{}' ({}) failed to connect: {}",
                        exchange, market_type, e
                    );
                    if let Err(close_err) = handle.provider().close().await {
                        warn!("Closing unconnected provider '{}' failed: {}", exchange, close_err);
                    }
                    return Err(e);
                }
                Ok(handle)
            })
            .await?
            .clone();

        // Shutdown owns the close of anything it found in the pool.
        if self.is_closed() {
            return Err(MarketDataError::RegistryClosed);
        }
        Ok(handle)
    }

    /// Handler for `(feature, transport)` in the exchange's table.
    pub fn get_handler(
        &self,
        exchange: &str,
        feature: DataFeature,
        transport: TransportKind,
    ) -> Result<FeatureHandler, MarketDataError> {
        let registration = self.registration(&exchange.to_lowercase())?;
        registration
            .handlers
            .get(feature, transport)
            .cloned()
            .ok_or_else(|| MarketDataError::HandlerNotFound {
                exchange: registration.exchange.clone(),
                feature: feature.to_string(),
                transport: transport.to_string(),
            })
    }

    pub fn get_mapper(&self, exchange: &str) -> Option<Arc<dyn SymbolMapper>> {
        self.read_registrations()
            .get(&exchange.to_lowercase())
            .and_then(|r| r.mapper.clone())
    }

    pub fn is_registered(&self, exchange: &str) -> bool {
        self.read_registrations()
            .contains_key(&exchange.to_lowercase())
    }

    /// Registered exchanges, sorted.
    pub fn list_exchanges(&self) -> Vec<String> {
        let mut exchanges: Vec<String> = self.read_registrations().keys().cloned().collect();
        exchanges.sort();
        exchanges
    }

    pub fn market_types(&self, exchange: &str) -> Option<Vec<MarketType>> {
        self.read_registrations()
            .get(&exchange.to_lowercase())
            .map(|r| r.market_types.clone())
    }

    /// Number of constructed pool instances.
    pub fn pooled_count(&self) -> usize {
        self.lock_pool()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close every pooled instance.
    ///
    /// Continues through failures and reports all of them. Constructions
    /// still in flight are awaited and closed. Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<(), MarketDataError> {
        let mut cells: Vec<(PoolKey, Arc<OnceCell<ProviderHandle>>)> = {
            let mut pool = self.lock_pool();
            if self.closed.swap(true, Ordering::SeqCst) {
                debug!("Provider registry already shut down");
                return Ok(());
            }
            pool.drain().collect()
        };
        cells.sort_by(|(a, _), (b, _)| (a.0.as_str(), a.1.as_str()).cmp(&(b.0.as_str(), b.1.as_str())));

        let count = cells.len();
        let failures = close_cells(cells).await;
        if failures.is_empty() {
            info!("Provider registry shut down ({} pool slots)", count);
            Ok(())
        } else {
            warn!(
                "Provider registry shut down with {} close failure(s)",
                failures.len()
            );
            Err(MarketDataError::ShutdownFailed { failures })
        }
    }

    fn registration(&self, exchange: &str) -> Result<Arc<ProviderRegistration>, MarketDataError> {
        self.read_registrations()
            .get(exchange)
            .cloned()
            .ok_or_else(|| MarketDataError::ExchangeNotRegistered {
                exchange: exchange.to_string(),
            })
    }

    fn read_registrations(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ProviderRegistration>>> {
        self.registrations.read().unwrap_or_else(|poisoned| {
            warn!("Provider registration lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_registrations(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<ProviderRegistration>>> {
        self.registrations.write().unwrap_or_else(|poisoned| {
            warn!("Provider registration lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_pool(&self) -> MutexGuard<'_, HashMap<PoolKey, Arc<OnceCell<ProviderHandle>>>> {
        self.pool.lock().unwrap_or_else(|poisoned| {
            warn!("Provider pool lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Close every constructed instance among `cells`, collecting failures.
///
/// An in-flight construction is awaited; an empty or failed slot is skipped.
async fn close_cells(cells: Vec<(PoolKey, Arc<OnceCell<ProviderHandle>>)>) -> Vec<CloseFailure> {
    let mut failures = Vec::new();
    for ((exchange, market_type), cell) in cells {
        let handle = match cell
            .get_or_try_init(|| async { Err::<ProviderHandle, _>(MarketDataError::RegistryClosed) })
            .await
        {
            Ok(handle) => handle.clone(),
            Err(_) => continue,
        };
        match handle.provider().close().await {
            Ok(()) => debug!("Closed provider '{}' ({})", exchange, market_type),
            Err(e) => {
                warn!("Failed to close provider '{}' ({}): {}", exchange, market_type, e);
                failures.push(CloseFailure {
                    exchange,
                    market_type,
                    message: e.to_string(),
                });
            }
        }
    }
    failures
}
