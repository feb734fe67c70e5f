//! Cross-sectional percentiles and ranks of per-region metrics.
//!
//! Ranking is two-phase. A [`RankCollector`] gathers every region's metrics
//! for the batch; [`RankCollector::finalize`] consumes it and yields a
//! [`RankTable`], the only type that answers rank queries. A query against
//! a partially collected pool therefore cannot be expressed.
//!
//! Counties (5-digit FIPS) and states (2-digit FIPS) are pooled separately.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::analyzers::types::{LatestNumbers, LatestNumbersTable};
use crate::analyzers::utility::round_to;
use crate::analyzers::weekly::{CASES_PER, DEATHS_PER};
use crate::catalog::RegionClass;

/// Number of ranked metrics per region.
pub const METRIC_COUNT: usize = 4;

/// Ranked metrics, in artifact order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RankMetrics {
    pub cases_per_capita: f64,
    pub deaths_per_capita: f64,
    pub case_fatality_rate: f64,
    pub case_fatality_rate_100d: f64,
}

impl RankMetrics {
    /// Derives the metrics; zero denominators give 0 rather than excluding the region.
    pub fn from_latest(latest: &LatestNumbers) -> Self {
        let population = latest.population as f64;
        let ratio = |num: f64, den: f64, decimals: i32| {
            if den == 0.0 || num == 0.0 {
                0.0
            } else {
                round_to(num / den, decimals)
            }
        };

        RankMetrics {
            cases_per_capita: if latest.population > 0 {
                ratio(latest.confirmed as f64 * CASES_PER, population, 4)
            } else {
                0.0
            },
            deaths_per_capita: if latest.population > 0 {
                ratio(latest.deaths as f64 * DEATHS_PER, population, 4)
            } else {
                0.0
            },
            case_fatality_rate: ratio(latest.deaths as f64, latest.confirmed as f64, 6),
            case_fatality_rate_100d: ratio(
                latest.new_deaths_100d as f64,
                latest.new_cases_100d as f64,
                6,
            ),
        }
    }

    fn values(&self) -> [f64; METRIC_COUNT] {
        [
            self.cases_per_capita,
            self.deaths_per_capita,
            self.case_fatality_rate,
            self.case_fatality_rate_100d,
        ]
    }
}

/// Percentiles (0–1, 4 decimals) and ranks (1 = highest value) for one region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Standing {
    pub percentiles: [f64; METRIC_COUNT],
    pub ranks: [usize; METRIC_COUNT],
}

#[derive(Debug, Default)]
struct MetricPools {
    pools: [Vec<f64>; METRIC_COUNT],
}

impl MetricPools {
    fn push(&mut self, metrics: &RankMetrics) {
        for (pool, value) in self.pools.iter_mut().zip(metrics.values()) {
            pool.push(value);
        }
    }

    fn sort(&mut self) {
        for pool in &mut self.pools {
            pool.sort_by(|a, b| a.total_cmp(b));
        }
    }

    fn len(&self) -> usize {
        self.pools[0].len()
    }
}

/// Collection phase of the rank engine. Create one per run.
#[derive(Debug, Default)]
pub struct RankCollector {
    counties: MetricPools,
    states: MetricPools,
    entries: Vec<(String, RegionClass, RankMetrics)>,
}

impl RankCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a region to its class pool. Returns `false` when the FIPS length
    /// matches neither class; such regions are left unranked.
    pub fn collect(&mut self, fips: &str, latest: &LatestNumbers) -> bool {
        let Some(class) = RegionClass::from_fips(fips) else {
            warn!(fips, "FIPS matches no region class, not ranked");
            return false;
        };

        let metrics = RankMetrics::from_latest(latest);
        match class {
            RegionClass::County => self.counties.push(&metrics),
            RegionClass::State => self.states.push(&metrics),
        }
        self.entries.push((fips.to_string(), class, metrics));
        true
    }

    /// Closes collection: sorts every pool and resolves each region's standing.
    pub fn finalize(mut self) -> RankTable {
        self.counties.sort();
        self.states.sort();

        debug!(
            counties = self.counties.len(),
            states = self.states.len(),
            "Rank pools finalized"
        );

        let standings = self
            .entries
            .iter()
            .map(|(fips, class, metrics)| {
                let pools = match class {
                    RegionClass::County => &self.counties,
                    RegionClass::State => &self.states,
                };
                (fips.clone(), standing_in(pools, metrics))
            })
            .collect();

        RankTable { standings }
    }
}

/// Finalized rank engine.
#[derive(Debug)]
pub struct RankTable {
    standings: HashMap<String, Standing>,
}

impl RankTable {
    pub fn standing(&self, fips: &str) -> Option<&Standing> {
        self.standings.get(fips)
    }

    /// Fills `Percentiles` and `Ranks` for every ranked entry of `table`.
    pub fn apply(&self, table: &mut LatestNumbersTable) {
        for (fips, latest) in table.iter_mut() {
            if let Some(standing) = self.standings.get(fips) {
                latest.percentiles = Some(standing.percentiles);
                latest.ranks = Some(standing.ranks);
            }
        }
    }
}

fn standing_in(pools: &MetricPools, metrics: &RankMetrics) -> Standing {
    let mut standing = Standing {
        percentiles: [0.0; METRIC_COUNT],
        ranks: [0; METRIC_COUNT],
    };

    for (i, value) in metrics.values().into_iter().enumerate() {
        let (percentile, rank) = percentile_and_rank(value, &pools.pools[i]);
        standing.percentiles[i] = percentile;
        standing.ranks[i] = rank;
    }

    standing
}

/// Percentile and rank of `value` within an ascending pool.
///
/// Ties resolve to the last matching index, so equal values share the
/// better standing. A value missing from the pool gets `(0.0, 0)`.
pub fn percentile_and_rank(value: f64, sorted: &[f64]) -> (f64, usize) {
    let upper = sorted.partition_point(|x| x.total_cmp(&value).is_le());
    if upper == 0 || sorted[upper - 1].total_cmp(&value).is_ne() {
        return (0.0, 0);
    }

    let last = upper - 1;
    let len = sorted.len();
    let percentile = round_to((last + 1) as f64 / len as f64, 4);
    (percentile, len - last)
}
