//! Trait for the upstream case-count feature service.

use anyhow::Result;
use std::collections::HashMap;

use crate::analyzers::types::{DailyObservation, TrendLabel};
use crate::catalog::TimeSeriesQuery;

/// FIPS → trend label.
pub type TrendLookup = HashMap<String, TrendLabel>;

/// Abstraction over the statistical feature service (e.g., ArcGIS).
#[async_trait::async_trait]
pub trait CasesApi: Send + Sync {
    /// Daily observations for one region, ascending by date.
    async fn time_series(&self, query: &TimeSeriesQuery) -> Result<Vec<DailyObservation>>;

    /// County trend categories. Empty when no trend service is configured.
    async fn trend_categories(&self) -> Result<TrendLookup>;

    /// Last edit of the upstream dataset, in epoch milliseconds.
    async fn last_modified(&self) -> Result<i64>;
}
