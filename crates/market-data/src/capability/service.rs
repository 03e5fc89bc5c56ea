//! Request validation against the capability table.
//!
//! Pure table lookups: no provider is instantiated and no network call is made,
//! so validation can run before anything expensive happens.

use log::debug;

use super::registry::{CapabilityKey, CapabilityRegistry, CapabilityStatus};
use crate::errors::{CapabilityError, MarketDataError};
use crate::models::DataRequest;

/// Validates requests and ranks alternatives for unsupported ones.
#[derive(Debug, Clone, Default)]
pub struct CapabilityService {
    registry: CapabilityRegistry,
}

impl CapabilityService {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn key_for(request: &DataRequest) -> CapabilityKey {
        CapabilityKey::new(
            request.exchange(),
            request.market_type(),
            request.instrument_type(),
            request.feature(),
            request.transport(),
        )
    }

    /// Validate a request, failing with ranked recommendations when unsupported.
    pub fn validate(&self, request: &DataRequest) -> Result<CapabilityStatus, MarketDataError> {
        let key = Self::key_for(request);
        let status = self.check(&key);
        if status.supported {
            return Ok(status);
        }

        debug!(
            "Capability check failed for {}: {:?} ({} alternatives)",
            key,
            status.reason,
            status.recommendations.len()
        );
        Err(CapabilityError::new(key, status).into())
    }

    /// Non-raising check. Unsupported statuses carry recommendations.
    pub fn check(&self, key: &CapabilityKey) -> CapabilityStatus {
        let mut status = self.registry.supports(key);
        if status.supported {
            status.recommendations.clear();
        } else {
            status.recommendations = self.recommend(key);
        }
        status
    }

    /// Supported alternatives with one constraint relaxed, best first:
    /// 1. same exchange, market and instrument over another transport
    /// 2. same exchange and feature on another market type
    /// 3. other exchanges offering the exact combination
    pub fn recommend(&self, key: &CapabilityKey) -> Vec<CapabilityKey> {
        let supported: Vec<CapabilityKey> = self
            .registry
            .entries()
            .into_iter()
            .filter(|(candidate, status)| status.supported && candidate.feature == key.feature)
            .map(|(candidate, _)| candidate)
            .collect();

        let mut ranked: Vec<CapabilityKey> = Vec::new();
        let mut push = |candidate: &CapabilityKey| {
            if candidate != key && !ranked.contains(candidate) {
                ranked.push(candidate.clone());
            }
        };

        supported
            .iter()
            .filter(|c| {
                c.exchange == key.exchange
                    && c.market_type == key.market_type
                    && c.instrument_type == key.instrument_type
                    && c.transport != key.transport
            })
            .for_each(&mut push);

        let other_markets = |c: &&CapabilityKey| {
            c.exchange == key.exchange && c.market_type != key.market_type
        };
        supported
            .iter()
            .filter(other_markets)
            .filter(|c| c.transport == key.transport)
            .for_each(&mut push);
        supported
            .iter()
            .filter(other_markets)
            .filter(|c| c.transport != key.transport)
            .for_each(&mut push);

        supported
            .iter()
            .filter(|c| {
                c.exchange != key.exchange
                    && c.market_type == key.market_type
                    && c.instrument_type == key.instrument_type
                    && c.transport == key.transport
            })
            .for_each(&mut push);

        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DataFeature, DataRequestBuilder, InstrumentType, MarketType, Timeframe, TransportKind,
    };

    fn service() -> CapabilityService {
        CapabilityService::new(CapabilityRegistry::builtin())
    }

    #[test]
    fn test_every_supported_entry_validates_clean() {
        let service = service();
        for (key, status) in service.registry().entries() {
            let checked = service.check(&key);
            if status.supported {
                assert!(checked.supported, "{} should be supported", key);
                assert!(checked.recommendations.is_empty());
            } else {
                assert!(!checked.supported);
                assert!(checked.reason.is_some());
            }
        }
    }

    #[test]
    fn test_non_entries_have_reason() {
        let service = service();
        let registry = service.registry();
        for exchange in ["binance", "coinbase", "unknown"] {
            for market_type in MarketType::ALL {
                for instrument_type in InstrumentType::ALL {
                    for feature in DataFeature::ALL {
                        for transport in TransportKind::ALL {
                            let key = CapabilityKey::new(
                                exchange,
                                market_type,
                                instrument_type,
                                feature,
                                transport,
                            );
                            if registry.get(&key).is_some() {
                                continue;
                            }
                            let status = service.check(&key);
                            assert!(!status.supported);
                            assert!(!status.reason.unwrap_or_default().is_empty());
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_validate_rejects_spot_liquidations_with_futures_alternative() {
        let request = DataRequestBuilder::new()
            .feature(DataFeature::Liquidations)
            .transport(TransportKind::Ws)
            .exchange("binance")
            .market_type(MarketType::Spot)
            .build()
            .unwrap();

        let err = service().validate(&request).unwrap_err();
        let MarketDataError::Capability(err) = err else {
            panic!("expected capability error");
        };
        let first = &err.recommendations()[0];
        assert_eq!(first.exchange, "binance");
        assert_eq!(first.market_type, MarketType::Futures);
        assert_eq!(first.feature, DataFeature::Liquidations);
        assert_eq!(first.transport, TransportKind::Ws);
    }

    #[test]
    fn test_recommendation_ranking_prefers_other_transport() {
        let key = CapabilityKey::new(
            "binance",
            MarketType::Futures,
            InstrumentType::Perpetual,
            DataFeature::MarkPrice,
            TransportKind::Rest,
        );
        let recommendations = service().recommend(&key);

        assert_eq!(
            recommendations[0],
            CapabilityKey::new(
                "binance",
                MarketType::Futures,
                InstrumentType::Perpetual,
                DataFeature::MarkPrice,
                TransportKind::Ws,
            )
        );
        assert!(recommendations
            .iter()
            .all(|k| k.feature == DataFeature::MarkPrice));
    }

    #[test]
    fn test_unknown_exchange_suggests_other_exchanges() {
        let key = CapabilityKey::new(
            "nowhere",
            MarketType::Spot,
            InstrumentType::Spot,
            DataFeature::Ohlcv,
            TransportKind::Rest,
        );
        let recommendations = service().recommend(&key);
        assert!(!recommendations.is_empty());
        assert!(recommendations.iter().all(|k| k.exchange != "nowhere"
            && k.market_type == MarketType::Spot
            && k.transport == TransportKind::Rest));
    }

    #[test]
    fn test_validate_supported_request() {
        let request = DataRequestBuilder::for_ohlcv("BTC/USDT", Timeframe::H1)
            .exchange("okx")
            .market_type(MarketType::Futures)
            .build()
            .unwrap();
        let status = service().validate(&request).unwrap();
        assert!(status.supported);
        assert!(status.recommendations.is_empty());
    }
}
