//! Trend computations over fetched region series.
//!
//! Daily observations are aggregated into weekly per-capita indicators,
//! summarized into latest numbers, ranked across each region class and
//! encoded into sparkline paths.

pub mod latest;
pub mod nyc;
pub mod path;
pub mod percentile;
pub mod types;
pub mod utility;
pub mod weekly;
