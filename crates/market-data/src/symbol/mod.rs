//! Symbol normalization.
//!
//! - [`urm`]: canonical `urm://` identifiers
//! - [`SymbolMapper`]: per-exchange native symbol translation
//! - [`SymbolNormalizer`]: cached resolution front-end used by the router

mod mapper;
mod normalizer;
pub mod urm;

pub use mapper::{QuoteSuffixMapper, SymbolMapper, DEFAULT_QUOTE_ASSETS};
pub use normalizer::{SymbolNormalizer, DEFAULT_SYMBOL_CACHE_TTL};
pub use urm::{format_urm_id, parse_urm_id, UrmId, UrmParseError};
