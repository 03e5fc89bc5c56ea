//! Market data models
//!
//! This module contains the core data types shared by the routing engine:
//! - `types` - Market, instrument, feature, transport and timeframe enums
//! - `instrument` - Canonical instrument identity (InstrumentSpec)
//! - `request` - Immutable request description (DataRequest) and its builder

mod instrument;
mod request;
mod types;

pub use instrument::{InstrumentSpec, OptionSide};
pub use request::{DataRequest, DataRequestBuilder};
pub use types::{
    DataFeature, ExchangeId, InstrumentType, MarketType, Payload, Timeframe, TransportKind,
};
