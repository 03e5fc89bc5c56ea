use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::InstrumentType;
use crate::errors::MarketDataError;

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionSide {
    #[serde(rename = "C")]
    Call,
    #[serde(rename = "P")]
    Put,
}

impl OptionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

/// Exchange-independent identity of a tradable instrument.
///
/// Base and quote are stored uppercase. Qualifiers (expiry, strike, side)
/// only matter for dated futures and options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub base: String,
    pub quote: String,
    pub instrument_type: InstrumentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_side: Option<OptionSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_size: Option<Decimal>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl InstrumentSpec {
    /// Build a spec, normalizing case. Fails when base or quote is blank.
    pub fn new(
        base: impl AsRef<str>,
        quote: impl AsRef<str>,
        instrument_type: InstrumentType,
    ) -> Result<Self, MarketDataError> {
        let base = base.as_ref().trim().to_uppercase();
        let quote = quote.as_ref().trim().to_uppercase();
        if base.is_empty() || quote.is_empty() {
            return Err(MarketDataError::InvalidRequest {
                message: "Instrument base and quote must be non-empty".to_string(),
            });
        }
        Ok(Self {
            base,
            quote,
            instrument_type,
            expiry: None,
            strike: None,
            option_side: None,
            contract_size: None,
            metadata: BTreeMap::new(),
        })
    }

    pub fn with_expiry(mut self, expiry: NaiveDate) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn with_option(mut self, side: OptionSide, strike: Decimal) -> Self {
        self.option_side = Some(side);
        self.strike = Some(strike);
        self
    }

    pub fn with_contract_size(mut self, size: Decimal) -> Self {
        self.contract_size = Some(size);
        self
    }

    /// Same instrument with a different contract shape.
    pub fn with_instrument_type(mut self, instrument_type: InstrumentType) -> Self {
        self.instrument_type = instrument_type;
        self
    }

    /// `BASE/QUOTE` short form.
    pub fn pair(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

impl fmt::Display for InstrumentSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.base, self.quote, self.instrument_type)?;
        if let Some(expiry) = self.expiry {
            write!(f, ":{}", expiry.format("%Y%m%d"))?;
        }
        if let (Some(side), Some(strike)) = (self.option_side, self.strike) {
            write!(f, ":{}:{}", side.as_str(), strike)?;
        }
        Ok(())
    }
}
