//! Chunking policies.
//!
//! A [`ChunkPolicy`] describes one endpoint's per-call limits and how a
//! request that exceeds them should be split.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::MarketDataError;

/// What to do when a plan needs more chunks than `max_chunks` allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the first `max_chunks` windows and report truncated coverage.
    #[default]
    Strict,
    /// Shrink the range to exactly `max_chunks * page_size` points.
    Clamp,
}

/// How consecutive pages are addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationKind {
    /// Pre-computed time windows (or limit pages when no range is given).
    #[default]
    Window,
    /// Each response carries the cursor of the next page.
    Cursor,
}

/// One weight tier: applies when `min <= limit < max` (`max = None` is unbounded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightTier {
    pub min: u32,
    #[serde(default)]
    pub max: Option<u32>,
    pub weight: u32,
}

/// Declared rate-limit weight of one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightPolicy {
    Static(u32),
    Tiered(Vec<WeightTier>),
}

impl WeightPolicy {
    /// Weight of a call requesting `limit` points.
    ///
    /// Falls back to the last tier when none matches.
    pub fn weight_for(&self, limit: u32) -> u32 {
        match self {
            Self::Static(weight) => *weight,
            Self::Tiered(tiers) => tiers
                .iter()
                .find(|t| t.min <= limit && t.max.map_or(true, |max| limit < max))
                .or_else(|| tiers.last())
                .map_or(0, |t| t.weight),
        }
    }
}

/// Where pagination data lives in requests and responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkHint {
    /// Response field holding the next cursor; `None` for time windows.
    pub cursor_field: Option<String>,
    /// Row field holding the row timestamp (epoch milliseconds).
    pub timestamp_key: String,
    pub limit_field: String,
    pub start_time_field: String,
    pub end_time_field: String,
}

impl Default for ChunkHint {
    fn default() -> Self {
        Self {
            cursor_field: None,
            timestamp_key: "timestamp".to_string(),
            limit_field: "limit".to_string(),
            start_time_field: "start_time".to_string(),
            end_time_field: "end_time".to_string(),
        }
    }
}

/// Reaction to a page that reports throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnThrottle {
    /// Stop and return what was collected so far.
    Abort,
    /// Keep fetching.
    #[default]
    Continue,
    /// Sleep, then keep fetching.
    Pause(Duration),
}

/// Pagination limits of one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPolicy {
    max_points: u32,
    #[serde(default)]
    pub max_chunks: Option<usize>,
    #[serde(default)]
    pub requires_start_time: bool,
    #[serde(default = "default_true")]
    pub supports_auto_chunking: bool,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    #[serde(default)]
    pub pagination: PaginationKind,
    #[serde(default)]
    pub weight: Option<WeightPolicy>,
    #[serde(default)]
    pub hint: ChunkHint,
}

fn default_true() -> bool {
    true
}

impl ChunkPolicy {
    /// Policy allowing `max_points` rows per call. Zero is rejected.
    pub fn new(max_points: u32) -> Result<Self, MarketDataError> {
        if max_points == 0 {
            return Err(MarketDataError::configuration(
                "max_points_per_call must be at least 1",
            ));
        }
        Ok(Self {
            max_points,
            max_chunks: None,
            requires_start_time: false,
            supports_auto_chunking: true,
            overflow: OverflowPolicy::Strict,
            pagination: PaginationKind::Window,
            weight: None,
            hint: ChunkHint::default(),
        })
    }

    pub fn max_points(&self) -> u32 {
        self.max_points
    }

    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = Some(max_chunks);
        self
    }

    pub fn requiring_start_time(mut self) -> Self {
        self.requires_start_time = true;
        self
    }

    pub fn without_auto_chunking(mut self) -> Self {
        self.supports_auto_chunking = false;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Cursor pagination reading the next cursor from `cursor_field`.
    pub fn with_cursor(mut self, cursor_field: impl Into<String>) -> Self {
        self.pagination = PaginationKind::Cursor;
        self.hint.cursor_field = Some(cursor_field.into());
        self
    }

    pub fn with_weight(mut self, weight: WeightPolicy) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_hint(mut self, hint: ChunkHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn is_cursor_paginated(&self) -> bool {
        self.pagination == PaginationKind::Cursor || self.hint.cursor_field.is_some()
    }

    /// Checks a policy deserialized from configuration.
    pub fn validate(&self) -> Result<(), MarketDataError> {
        if self.max_points == 0 {
            return Err(MarketDataError::configuration(
                "max_points_per_call must be at least 1",
            ));
        }
        if self.max_chunks == Some(0) {
            return Err(MarketDataError::configuration("max_chunks must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_max_points_rejected() {
        assert!(matches!(
            ChunkPolicy::new(0),
            Err(MarketDataError::Configuration { .. })
        ));
        assert_eq!(ChunkPolicy::new(1).unwrap().max_points(), 1);
    }

    #[test]
    fn test_tiered_weights() {
        let policy = WeightPolicy::Tiered(vec![
            WeightTier { min: 1, max: Some(100), weight: 1 },
            WeightTier { min: 100, max: Some(500), weight: 2 },
            WeightTier { min: 500, max: Some(1000), weight: 5 },
            WeightTier { min: 1000, max: None, weight: 10 },
        ]);
        assert_eq!(policy.weight_for(99), 1);
        assert_eq!(policy.weight_for(100), 2);
        assert_eq!(policy.weight_for(1000), 10);
        assert_eq!(policy.weight_for(0), 10);
        assert_eq!(WeightPolicy::Static(2).weight_for(5000), 2);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let policy: ChunkPolicy = serde_json::from_str(
            r#"{ "max_points": 1000, "max_chunks": 5, "overflow": "clamp" }"#,
        )
        .unwrap();
        assert_eq!(policy.max_points(), 1000);
        assert_eq!(policy.overflow, OverflowPolicy::Clamp);
        assert!(policy.supports_auto_chunking);
        assert_eq!(policy.hint.timestamp_key, "timestamp");
        assert!(policy.validate().is_ok());

        let zero: ChunkPolicy = serde_json::from_str(r#"{ "max_points": 0 }"#).unwrap();
        assert!(zero.validate().is_err());
    }
}
