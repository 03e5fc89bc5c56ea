//! Exchange symbol mappers.
//!
//! A mapper translates between an exchange's native symbol strings and
//! [`InstrumentSpec`]. Every registered exchange contributes one.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::errors::SymbolResolutionError;
use crate::models::{InstrumentSpec, InstrumentType, MarketType};

/// Quote assets recognised at the end of concatenated symbols.
pub const DEFAULT_QUOTE_ASSETS: &[&str] = &[
    "USDT", "USDC", "FDUSD", "BUSD", "TUSD", "USD", "EUR", "GBP", "TRY", "BTC", "ETH", "BNB",
];

/// Shortest base asset expected in a concatenated symbol when the quote is ambiguous.
const MIN_CONCATENATED_BASE_LEN: usize = 3;

/// Bidirectional translation between native symbols and instrument specs.
pub trait SymbolMapper: Send + Sync {
    /// Parse a native symbol.
    ///
    /// # Arguments
    /// * `native` - The exchange's own spelling, e.g. `BTCUSDT` or `BTC-USDT-SWAP`
    /// * `market_type` - Market the symbol is quoted on
    fn to_spec(
        &self,
        native: &str,
        market_type: MarketType,
    ) -> Result<InstrumentSpec, SymbolResolutionError>;

    /// Render a spec in the exchange's native spelling.
    fn to_native(
        &self,
        spec: &InstrumentSpec,
        market_type: MarketType,
    ) -> Result<String, SymbolResolutionError>;

    /// Alternative spellings this mapper accepts, surfaced in resolution errors.
    fn known_aliases(&self, _value: &str, _market_type: MarketType) -> Vec<String> {
        Vec::new()
    }
}

/// Mapper for exchanges whose symbols are `BASE{sep}QUOTE` with optional
/// contract suffixes.
///
/// Covers the common crypto spellings:
/// - `BTCUSDT` (concatenated, quote found by suffix match)
/// - `BTC-USDT` (delimited)
/// - `BTC-USDT-SWAP` (perpetual suffix)
/// - `BTCUSDT_240329` (dated future, `YYMMDD` after the expiry separator)
#[derive(Debug, Clone)]
pub struct QuoteSuffixMapper {
    exchange: String,
    separator: Option<String>,
    quote_assets: Vec<String>,
    perpetual_suffix: Option<String>,
    expiry_separator: String,
    /// native asset code -> canonical asset code
    aliases: BTreeMap<String, String>,
}

impl QuoteSuffixMapper {
    /// `BTCUSDT` style symbols.
    pub fn concatenated(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into().to_lowercase(),
            separator: None,
            quote_assets: Vec::new(),
            perpetual_suffix: None,
            expiry_separator: "_".to_string(),
            aliases: BTreeMap::new(),
        }
        .with_quote_assets(DEFAULT_QUOTE_ASSETS.iter().copied())
    }

    /// `BTC-USDT` style symbols.
    pub fn delimited(exchange: impl Into<String>, separator: impl Into<String>) -> Self {
        let separator = separator.into();
        Self {
            expiry_separator: separator.clone(),
            separator: Some(separator),
            ..Self::concatenated(exchange)
        }
    }

    pub fn with_quote_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut assets: Vec<String> = assets
            .into_iter()
            .map(|a| a.as_ref().to_uppercase())
            .collect();
        assets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        assets.dedup();
        self.quote_assets = assets;
        self
    }

    pub fn with_perpetual_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.perpetual_suffix = Some(suffix.into().to_uppercase());
        self
    }

    pub fn with_expiry_separator(mut self, separator: impl Into<String>) -> Self {
        self.expiry_separator = separator.into();
        self
    }

    /// Accept `native` as a spelling of the canonical asset `canonical` (e.g. XBT -> BTC).
    pub fn with_alias(mut self, native: impl AsRef<str>, canonical: impl AsRef<str>) -> Self {
        self.aliases.insert(
            native.as_ref().to_uppercase(),
            canonical.as_ref().to_uppercase(),
        );
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    fn error(
        &self,
        value: &str,
        market_type: MarketType,
        message: impl Into<String>,
    ) -> SymbolResolutionError {
        SymbolResolutionError::new(&self.exchange, value, market_type, message)
            .with_aliases(self.known_aliases(value, market_type))
    }

    fn canonical_asset(&self, asset: &str) -> String {
        self.aliases
            .get(asset)
            .cloned()
            .unwrap_or_else(|| asset.to_string())
    }

    fn native_asset(&self, asset: &str) -> String {
        self.aliases
            .iter()
            .find(|(_, canonical)| canonical.as_str() == asset)
            .map(|(native, _)| native.clone())
            .unwrap_or_else(|| asset.to_string())
    }

    fn split_expiry<'a>(&self, symbol: &'a str) -> (&'a str, Option<NaiveDate>) {
        if let Some((head, tail)) = symbol.rsplit_once(self.expiry_separator.as_str()) {
            if tail.len() == 6 && tail.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(date) = NaiveDate::parse_from_str(tail, "%y%m%d") {
                    return (head, Some(date));
                }
            }
        }
        (symbol, None)
    }

    fn split_pair(&self, symbol: &str) -> Option<(String, String)> {
        match &self.separator {
            Some(sep) => {
                let (base, quote) = symbol.split_once(sep.as_str())?;
                (!base.is_empty() && !quote.is_empty() && !quote.contains(sep.as_str()))
                    .then(|| (base.to_string(), quote.to_string()))
            }
            // Several quotes can match (DOTUSD ends in both USD and TUSD).
            // Prefer a base that is a known alias, then a base of at least
            // three letters, then the longest quote.
            None => self
                .quote_assets
                .iter()
                .filter_map(|quote| {
                    symbol
                        .strip_suffix(quote.as_str())
                        .filter(|base| !base.is_empty())
                        .map(|base| (base, quote))
                })
                .max_by_key(|(base, quote)| {
                    (
                        self.aliases.contains_key(*base),
                        base.len() >= MIN_CONCATENATED_BASE_LEN,
                        quote.len(),
                    )
                })
                .map(|(base, quote)| (base.to_string(), quote.clone())),
        }
    }
}

impl SymbolMapper for QuoteSuffixMapper {
    fn to_spec(
        &self,
        native: &str,
        market_type: MarketType,
    ) -> Result<InstrumentSpec, SymbolResolutionError> {
        let upper = native.trim().to_uppercase();
        if upper.is_empty() {
            return Err(self.error(native, market_type, "symbol is empty"));
        }

        let (rest, expiry) = self.split_expiry(&upper);
        let (rest, perpetual) = match self.perpetual_suffix.as_deref() {
            Some(suffix) if expiry.is_none() && rest.ends_with(suffix) => {
                (&rest[..rest.len() - suffix.len()], true)
            }
            _ => (rest, false),
        };

        let instrument_type = match (market_type, expiry) {
            (MarketType::Futures, Some(_)) => InstrumentType::Future,
            (MarketType::Futures, None) => InstrumentType::Perpetual,
            (MarketType::Spot, None) if !perpetual => InstrumentType::Spot,
            (market, _) => {
                return Err(self.error(
                    native,
                    market_type,
                    format!("contract suffix not valid on {} market", market),
                ))
            }
        };

        let (base, quote) = self
            .split_pair(rest)
            .ok_or_else(|| self.error(native, market_type, "unrecognized quote asset"))?;

        let spec = InstrumentSpec::new(
            self.canonical_asset(&base),
            self.canonical_asset(&quote),
            instrument_type,
        )
        .map_err(|e| self.error(native, market_type, e.to_string()))?;

        Ok(match expiry {
            Some(date) => spec.with_expiry(date),
            None => spec,
        })
    }

    fn to_native(
        &self,
        spec: &InstrumentSpec,
        market_type: MarketType,
    ) -> Result<String, SymbolResolutionError> {
        let pair = format!(
            "{}{}{}",
            self.native_asset(&spec.base),
            self.separator.as_deref().unwrap_or(""),
            self.native_asset(&spec.quote)
        );

        match (market_type, spec.instrument_type) {
            (MarketType::Spot, InstrumentType::Spot) => Ok(pair),
            (MarketType::Futures, InstrumentType::Perpetual) => {
                Ok(format!("{}{}", pair, self.perpetual_suffix.as_deref().unwrap_or("")))
            }
            (MarketType::Futures, InstrumentType::Future) => {
                let expiry = spec.expiry.ok_or_else(|| {
                    self.error(&spec.to_string(), market_type, "dated future requires an expiry")
                })?;
                Ok(format!(
                    "{}{}{}",
                    pair,
                    self.expiry_separator,
                    expiry.format("%y%m%d")
                ))
            }
            (market, instrument) => Err(self.error(
                &spec.to_string(),
                market_type,
                format!("{} instruments are not listed on the {} market", instrument, market),
            )),
        }
    }

    fn known_aliases(&self, _value: &str, _market_type: MarketType) -> Vec<String> {
        self.aliases
            .iter()
            .map(|(native, canonical)| format!("{}={}", native, canonical))
            .collect()
    }
}
