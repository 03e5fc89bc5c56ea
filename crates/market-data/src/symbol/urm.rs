//! Canonical instrument identifiers.
//!
//! Format: `urm://{exchange|*}:{base}/{quote}:{instrument_type}[:qualifiers]`
//!
//! Qualifiers are an expiry date (`YYYYMMDD`) and/or an option leg
//! (`C:{strike}` or `P:{strike}`), in any order:
//!
//! ```text
//! urm://binance:btc/usdt:spot
//! urm://*:btc/usdt:perpetual
//! urm://okx:btc/usdt:future:20240329
//! urm://deribit:btc/usd:option:20240628:C:35000
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{InstrumentSpec, InstrumentType, OptionSide};

pub const URM_SCHEME: &str = "urm://";

/// Malformed canonical identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid URM ID '{value}': {message}")]
pub struct UrmParseError {
    pub value: String,
    pub message: String,
}

/// Parsed canonical identifier. `exchange` is `None` for the `*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrmId {
    pub exchange: Option<String>,
    pub spec: InstrumentSpec,
}

pub fn is_urm_id(value: &str) -> bool {
    value.starts_with(URM_SCHEME)
}

pub fn parse_urm_id(value: &str) -> Result<UrmId, UrmParseError> {
    let fail = |message: String| UrmParseError {
        value: value.to_string(),
        message,
    };

    let body = value.strip_prefix(URM_SCHEME).ok_or_else(|| {
        fail(format!("expected scheme '{}'", URM_SCHEME))
    })?;
    let mut parts = body.split(':');
    let (Some(exchange), Some(pair), Some(instrument)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(fail(
            "expected {exchange|*}:{base}/{quote}:{instrument_type}[:qualifiers]".to_string(),
        ));
    };

    if exchange.is_empty() || (exchange != "*" && !exchange.chars().all(|c| c.is_ascii_alphanumeric())) {
        return Err(fail(format!(
            "exchange '{}' must be '*' or alphanumeric",
            exchange
        )));
    }

    let (base, quote) = pair
        .split_once('/')
        .filter(|(b, q)| !b.is_empty() && !q.is_empty() && !q.contains('/'))
        .ok_or_else(|| fail(format!("pair '{}' must be BASE/QUOTE", pair)))?;

    let instrument_type = InstrumentType::from_str(instrument)
        .map_err(|_| fail(format!("unknown instrument type '{}'", instrument)))?;

    let mut spec = InstrumentSpec::new(base, quote, instrument_type)
        .map_err(|e| fail(e.to_string()))?;

    let qualifiers: Vec<&str> = parts.collect();
    let mut i = 0;
    while i < qualifiers.len() {
        let token = qualifiers[i];
        if token.len() == 8 && token.chars().all(|c| c.is_ascii_digit()) {
            let expiry = NaiveDate::parse_from_str(token, "%Y%m%d")
                .map_err(|_| fail(format!("invalid expiry '{}'", token)))?;
            spec = spec.with_expiry(expiry);
            i += 1;
            continue;
        }

        let side = match token {
            "C" | "c" => OptionSide::Call,
            "P" | "p" => OptionSide::Put,
            _ => return Err(fail(format!("unrecognized qualifier '{}'", token))),
        };
        let strike = qualifiers
            .get(i + 1)
            .and_then(|s| Decimal::from_str(s).ok())
            .ok_or_else(|| fail(format!("option leg '{}' needs a numeric strike", token)))?;
        spec = spec.with_option(side, strike);
        i += 2;
    }

    Ok(UrmId {
        exchange: (exchange != "*").then(|| exchange.to_lowercase()),
        spec,
    })
}

/// Inverse of [`parse_urm_id`]. `None` renders the `*` wildcard.
pub fn format_urm_id(spec: &InstrumentSpec, exchange: Option<&str>) -> String {
    let mut id = format!(
        "{}{}:{}/{}:{}",
        URM_SCHEME,
        exchange.map(str::to_lowercase).unwrap_or_else(|| "*".to_string()),
        spec.base.to_lowercase(),
        spec.quote.to_lowercase(),
        spec.instrument_type
    );
    if let Some(expiry) = spec.expiry {
        id.push_str(&format!(":{}", expiry.format("%Y%m%d")));
    }
    if let (Some(side), Some(strike)) = (spec.option_side, spec.strike) {
        id.push_str(&format!(":{}:{}", side.as_str(), strike.normalize()));
    }
    id
}

impl fmt::Display for UrmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_urm_id(&self.spec, self.exchange.as_deref()))
    }
}

impl FromStr for UrmId {
    type Err = UrmParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_urm_id(s)
    }
}
