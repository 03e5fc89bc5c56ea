//! Enumerations shared by every layer of the routing engine.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;

/// Exchange identifier, always stored lowercase (e.g. "binance").
pub type ExchangeId = String;

/// Market-data payload carried opaquely between providers, sinks and callers.
pub type Payload = serde_json::Value;

fn unknown(kind: &str, value: &str) -> MarketDataError {
    MarketDataError::InvalidRequest {
        message: format!("Unknown {}: '{}'", kind, value),
    }
}

/// Market segment an exchange exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    #[default]
    Spot,
    Futures,
    Options,
    Equity,
    Fx,
}

impl MarketType {
    pub const ALL: [MarketType; 5] = [
        Self::Spot,
        Self::Futures,
        Self::Options,
        Self::Equity,
        Self::Fx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Futures => "futures",
            Self::Options => "options",
            Self::Equity => "equity",
            Self::Fx => "fx",
        }
    }

    /// Instrument types listed under this market, primary type first.
    pub fn default_instrument_types(&self) -> &'static [InstrumentType] {
        match self {
            Self::Spot | Self::Equity | Self::Fx => &[InstrumentType::Spot],
            Self::Futures => &[InstrumentType::Perpetual, InstrumentType::Future],
            Self::Options => &[InstrumentType::Option],
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| unknown("market type", s))
    }
}

/// Contract shape of a tradable instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    #[default]
    Spot,
    Perpetual,
    Future,
    Option,
    Move,
    Basket,
}

impl InstrumentType {
    pub const ALL: [InstrumentType; 6] = [
        Self::Spot,
        Self::Perpetual,
        Self::Future,
        Self::Option,
        Self::Move,
        Self::Basket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Perpetual => "perpetual",
            Self::Future => "future",
            Self::Option => "option",
            Self::Move => "move",
            Self::Basket => "basket",
        }
    }

    /// Derivatives settle against an underlying and carry funding/open interest.
    pub fn is_derivative(&self) -> bool {
        !matches!(self, Self::Spot)
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentType {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|i| i.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| unknown("instrument type", s))
    }
}

/// Data feature a provider can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFeature {
    Ohlcv,
    Health,
    OrderBook,
    Trades,
    HistoricalTrades,
    Liquidations,
    OpenInterest,
    FundingRates,
    MarkPrice,
    SymbolMetadata,
}

impl DataFeature {
    pub const ALL: [DataFeature; 10] = [
        Self::Ohlcv,
        Self::Health,
        Self::OrderBook,
        Self::Trades,
        Self::HistoricalTrades,
        Self::Liquidations,
        Self::OpenInterest,
        Self::FundingRates,
        Self::MarkPrice,
        Self::SymbolMetadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ohlcv => "ohlcv",
            Self::Health => "health",
            Self::OrderBook => "order_book",
            Self::Trades => "trades",
            Self::HistoricalTrades => "historical_trades",
            Self::Liquidations => "liquidations",
            Self::OpenInterest => "open_interest",
            Self::FundingRates => "funding_rates",
            Self::MarkPrice => "mark_price",
            Self::SymbolMetadata => "symbol_metadata",
        }
    }

    /// Features that only exist for derivative instruments.
    pub fn derivatives_only(&self) -> bool {
        matches!(
            self,
            Self::Liquidations | Self::OpenInterest | Self::FundingRates | Self::MarkPrice
        )
    }

    /// Whether a request for this feature must name a symbol.
    pub fn requires_symbol(&self, transport: TransportKind) -> bool {
        match self {
            Self::Health | Self::SymbolMetadata => false,
            Self::Liquidations => transport == TransportKind::Rest,
            _ => true,
        }
    }
}

impl fmt::Display for DataFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataFeature {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| unknown("data feature", s))
    }
}

/// How a feature is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Rest,
    Ws,
}

impl TransportKind {
    pub const ALL: [TransportKind; 2] = [Self::Rest, Self::Ws];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Ws => "ws",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rest" => Ok(Self::Rest),
            "ws" | "websocket" => Ok(Self::Ws),
            _ => Err(unknown("transport", s)),
        }
    }
}

/// Candle interval.
///
/// `1M` is treated as a fixed 30-day interval. Alignment is relative to the
/// Unix epoch, so weekly bars start on Thursdays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1M")]
    Mo1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 15] = [
        Self::M1,
        Self::M3,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H2,
        Self::H4,
        Self::H6,
        Self::H8,
        Self::H12,
        Self::D1,
        Self::D3,
        Self::W1,
        Self::Mo1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::D3 => "3d",
            Self::W1 => "1w",
            Self::Mo1 => "1M",
        }
    }

    pub fn seconds(&self) -> i64 {
        const MINUTE: i64 = 60;
        const HOUR: i64 = 60 * MINUTE;
        const DAY: i64 = 24 * HOUR;
        match self {
            Self::M1 => MINUTE,
            Self::M3 => 3 * MINUTE,
            Self::M5 => 5 * MINUTE,
            Self::M15 => 15 * MINUTE,
            Self::M30 => 30 * MINUTE,
            Self::H1 => HOUR,
            Self::H2 => 2 * HOUR,
            Self::H4 => 4 * HOUR,
            Self::H6 => 6 * HOUR,
            Self::H8 => 8 * HOUR,
            Self::H12 => 12 * HOUR,
            Self::D1 => DAY,
            Self::D3 => 3 * DAY,
            Self::W1 => 7 * DAY,
            Self::Mo1 => 30 * DAY,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds() as u64)
    }

    pub fn chrono_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seconds())
    }

    /// Offset of the first bar boundary from the Unix epoch. Weekly bars
    /// open on Monday and the epoch fell on a Thursday.
    fn anchor_seconds(&self) -> i64 {
        match self {
            Self::W1 => 4 * 86_400,
            _ => 0,
        }
    }

    /// Start of the bar containing `ts`.
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let floored = secs - (secs - self.anchor_seconds()).rem_euclid(self.seconds());
        DateTime::from_timestamp(floored, 0).unwrap_or(ts)
    }

    /// Smallest bar boundary at or after `ts`.
    pub fn ceil(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let floored = self.floor(ts);
        if floored == ts {
            floored
        } else {
            floored + self.chrono_duration()
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = MarketDataError;

    // Case matters: "1m" is a minute, "1M" a month.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| unknown("timeframe", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_enum_round_trip_through_str() {
        for feature in DataFeature::ALL {
            assert_eq!(feature.as_str().parse::<DataFeature>().unwrap(), feature);
        }
        assert_eq!("FUTURES".parse::<MarketType>().unwrap(), MarketType::Futures);
        assert_eq!(
            "websocket".parse::<TransportKind>().unwrap(),
            TransportKind::Ws
        );
        assert!("swap".parse::<InstrumentType>().is_err());
    }

    #[test]
    fn test_timeframe_month_and_minute_are_distinct() {
        assert_eq!("1m".parse::<Timeframe>().unwrap(), Timeframe::M1);
        assert_eq!("1M".parse::<Timeframe>().unwrap(), Timeframe::Mo1);
        assert_eq!(Timeframe::Mo1.seconds(), 30 * 86_400);
    }

    #[test]
    fn test_timeframe_serde_uses_exchange_notation() {
        let json = serde_json::to_string(&Timeframe::H4).unwrap();
        assert_eq!(json, "\"4h\"");
        let parsed: Timeframe = serde_json::from_str("\"15m\"").unwrap();
        assert_eq!(parsed, Timeframe::M15);
    }

    #[test]
    fn test_floor_and_ceil_alignment() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 10, 37, 12).unwrap();
        assert_eq!(
            Timeframe::M15.floor(ts),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap()
        );
        assert_eq!(
            Timeframe::M15.ceil(ts),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 45, 0).unwrap()
        );

        let aligned = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(Timeframe::H1.floor(aligned), aligned);
        assert_eq!(Timeframe::H1.ceil(aligned), aligned);
    }

    #[test]
    fn test_weekly_bars_open_on_monday() {
        // 2024-03-07 is a Thursday; its week opened on Monday 2024-03-04.
        let ts = Utc.with_ymd_and_hms(2024, 3, 7, 15, 20, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        assert_eq!(Timeframe::W1.floor(ts), monday);
        assert_eq!(Timeframe::W1.floor(monday), monday);
        assert_eq!(
            Timeframe::W1.ceil(ts),
            Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap()
        );
        assert_eq!(
            Timeframe::W1.floor(Utc.with_ymd_and_hms(2024, 3, 3, 23, 59, 59).unwrap()),
            Utc.with_ymd_and_hms(2024, 2, 26, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_futures_market_lists_perpetual_first() {
        assert_eq!(
            MarketType::Futures.default_instrument_types(),
            &[InstrumentType::Perpetual, InstrumentType::Future]
        );
        assert_eq!(
            MarketType::Spot.default_instrument_types(),
            &[InstrumentType::Spot]
        );
    }

    #[test]
    fn test_symbol_requirements() {
        assert!(DataFeature::Ohlcv.requires_symbol(TransportKind::Rest));
        assert!(!DataFeature::Health.requires_symbol(TransportKind::Rest));
        assert!(!DataFeature::Liquidations.requires_symbol(TransportKind::Ws));
        assert!(DataFeature::Liquidations.derivatives_only());
    }
}
