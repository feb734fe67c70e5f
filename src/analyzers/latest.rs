//! Most recent totals and trailing deltas for the tooltip table.

use crate::analyzers::types::{DailyObservation, LatestNumbers};

/// Builds a region's latest numbers from its raw daily series.
///
/// Trailing deltas compare the last observation with the one 7 (resp. 100)
/// days earlier; shorter series use their earliest observation instead.
/// `population` is used when the last observation reports none.
/// Returns `None` for an empty series.
pub fn record_latest(
    name: &str,
    observations: &[DailyObservation],
    population: i64,
) -> Option<LatestNumbers> {
    let latest = observations.last()?;
    let len = observations.len();

    let week_ago = &observations[len.saturating_sub(8)];
    let hundred_days_ago = &observations[len.saturating_sub(101)];

    Some(LatestNumbers {
        name: name.to_string(),
        confirmed: latest.confirmed,
        deaths: latest.deaths,
        population: if latest.population > 0 {
            latest.population
        } else {
            population
        },
        new_cases_7d: latest.confirmed - week_ago.confirmed,
        new_deaths_7d: latest.deaths - week_ago.deaths,
        new_cases_100d: latest.confirmed - hundred_days_ago.confirmed,
        new_deaths_100d: latest.deaths - hundred_days_ago.deaths,
        trend: None,
        percentiles: None,
        ranks: None,
    })
}
