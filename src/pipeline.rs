//! Run orchestration.
//!
//! A run is two passes over one [`BatchContext`]. The first pass fetches
//! every region in catalog order and accumulates indicators, latest numbers
//! and rank metrics. The second pass ([`BatchContext::finish`]) resolves
//! ranks, attaches trend labels and encodes paths against the batch-wide
//! y-scale. Artifacts are only written once both passes are done.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::analyzers::latest::record_latest;
use crate::analyzers::nyc::{BoroughBuffer, MERGED_NAME, is_nyc_borough};
use crate::analyzers::path::YScale;
use crate::analyzers::percentile::RankCollector;
use crate::analyzers::types::{
    DailyObservation, LatestNumbersTable, PathAttributes, PathFeature, PathsArtifact, RegionTrend,
    WeeklyIndicators,
};
use crate::analyzers::weekly::weekly_indicators;
use crate::catalog::{
    CountyAttributes, CountyRecord, Region, RegionClass, StateAttributes, StateRecord,
    filter_state, load_catalog,
};
use crate::config::Config;
use crate::error::PipelineError;
use crate::gate;
use crate::output::{
    self, Artifact, COUNTIES_FILE, COUNTIES_PATHS_FILE, LATEST_NUMBERS_FILE, RUN_HISTORY_FILE,
    STATES_FILE, STATES_PATHS_FILE,
};
use crate::services::cases_api::{CasesApi, TrendLookup};

/// Why a region was left out of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Failed(String),
    Empty,
}

/// Result of the skip policy for one region's fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Usable(Vec<DailyObservation>),
    Skip(SkipReason),
}

/// Skip policy: a failed query or an empty series drops the region;
/// anything else is processed.
pub fn fetch_outcome(result: anyhow::Result<Vec<DailyObservation>>) -> FetchOutcome {
    match result {
        Ok(observations) if observations.is_empty() => FetchOutcome::Skip(SkipReason::Empty),
        Ok(observations) => FetchOutcome::Usable(observations),
        Err(e) => FetchOutcome::Skip(SkipReason::Failed(format!("{e:#}"))),
    }
}

/// Normalization population: the first observation's when positive,
/// otherwise the catalog's.
pub fn resolve_population<R: Region>(region: &R, observations: &[DailyObservation]) -> i64 {
    match observations.first() {
        Some(first) if first.population > 0 => first.population,
        _ => region.population(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCounts {
    pub processed: usize,
    pub skipped: usize,
}

/// Run-scoped accumulators. Create one per run; nothing survives it.
#[derive(Debug)]
pub struct BatchContext {
    window: usize,
    ranks: RankCollector,
    boroughs: BoroughBuffer,
    latest: LatestNumbersTable,
    counties: Vec<RegionTrend<CountyAttributes>>,
    states: Vec<RegionTrend<StateAttributes>>,
    county_counts: ClassCounts,
    state_counts: ClassCounts,
}

/// Everything a run writes, fully computed.
#[derive(Debug)]
pub struct BatchOutput {
    pub counties: Vec<RegionTrend<CountyAttributes>>,
    pub states: Vec<RegionTrend<StateAttributes>>,
    pub county_paths: Vec<PathFeature>,
    pub state_paths: Vec<PathFeature>,
    pub scale: YScale,
    pub latest: LatestNumbersTable,
    pub county_counts: ClassCounts,
    pub state_counts: ClassCounts,
    pub paths_dropped: usize,
}

impl BatchContext {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            ranks: RankCollector::new(),
            boroughs: BoroughBuffer::new(),
            latest: LatestNumbersTable::new(),
            counties: Vec::new(),
            states: Vec::new(),
            county_counts: ClassCounts::default(),
            state_counts: ClassCounts::default(),
        }
    }

    /// Records a region the skip policy rejected.
    pub fn skip(&mut self, class: RegionClass, fips: &str, reason: &SkipReason) {
        match reason {
            SkipReason::Failed(message) => {
                warn!(fips, error = %message, "Fetch failed, skipping region")
            }
            SkipReason::Empty => warn!(fips, "No observations, skipping region"),
        }
        match class {
            RegionClass::County => self.county_counts.skipped += 1,
            RegionClass::State => self.state_counts.skipped += 1,
        }
    }

    /// Adds a county. NYC boroughs are held until all five are present and
    /// then emitted once, as the merged county.
    pub fn add_county(&mut self, county: CountyRecord, observations: Vec<DailyObservation>) {
        if !is_nyc_borough(county.fips()) {
            self.push_county(county, &observations, None);
            return;
        }

        self.boroughs.hold(county, observations);
        match self.boroughs.take_merged() {
            None => {}
            Some(Ok((primary, merged))) => {
                info!(fips = %primary.fips(), observations = merged.len(), "NYC boroughs merged");
                self.push_county(primary, &merged, Some(MERGED_NAME));
            }
            Some(Err(e)) => {
                error!(error = %e, "NYC merge failed, skipping merged county");
                self.county_counts.skipped += 1;
            }
        }
    }

    pub fn add_state(&mut self, mut state: StateRecord, observations: Vec<DailyObservation>) {
        let indicators = self.accumulate(&mut state, None, &observations);
        self.states.push(RegionTrend {
            attributes: state.attributes,
            geometry: state.geometry,
            indicators,
        });
        self.state_counts.processed += 1;
    }

    fn push_county(
        &mut self,
        mut county: CountyRecord,
        observations: &[DailyObservation],
        name: Option<&str>,
    ) {
        let indicators = self.accumulate(&mut county, name, observations);
        self.counties.push(RegionTrend {
            attributes: county.attributes,
            geometry: county.geometry,
            indicators,
        });
        self.county_counts.processed += 1;
    }

    fn accumulate<R: Region>(
        &mut self,
        region: &mut R,
        name: Option<&str>,
        observations: &[DailyObservation],
    ) -> WeeklyIndicators {
        let population = resolve_population(region, observations);
        region.set_population(population);

        let indicators = weekly_indicators(observations, population, self.window);
        if indicators.is_empty() {
            debug!(
                fips = region.fips(),
                observations = observations.len(),
                "Series shorter than one window"
            );
        }

        let name = name.map_or_else(|| region.display_name(), str::to_string);
        if let Some(latest) = record_latest(&name, observations, population) {
            self.ranks.collect(region.fips(), &latest);
            self.latest.insert(region.fips().to_string(), latest);
        }

        indicators
    }

    /// Second pass: ranks, trend labels and path encoding.
    pub fn finish(mut self, trends: &TrendLookup, new_cases_y_max: Option<i64>) -> BatchOutput {
        if !self.boroughs.is_empty() {
            warn!(
                missing = ?self.boroughs.missing(),
                "Incomplete NYC borough set, merged county not emitted"
            );
        }

        let ranks = self.ranks.finalize();
        ranks.apply(&mut self.latest);

        for (fips, latest) in self.latest.iter_mut() {
            if RegionClass::from_fips(fips) == Some(RegionClass::County) {
                latest.trend = trends.get(fips).copied();
            }
        }

        let has_county_series = self.counties.iter().any(|c| !c.indicators.is_empty());
        let scale = if has_county_series {
            YScale::from_batch(self.counties.iter().map(|c| &c.indicators))
        } else {
            YScale::from_batch(self.states.iter().map(|s| &s.indicators))
        }
        .with_new_cases_max(new_cases_y_max);

        let county_paths: Vec<PathFeature> = self
            .counties
            .iter()
            .filter_map(|county| {
                let attributes = PathAttributes {
                    fips: county.attributes.fips.clone(),
                    trend: trends.get(&county.attributes.fips).copied(),
                };
                scale.encode_feature(attributes, county.geometry, &county.indicators)
            })
            .collect();

        let state_paths: Vec<PathFeature> = self
            .states
            .iter()
            .filter_map(|state| {
                let attributes = PathAttributes {
                    fips: state.attributes.fips.clone(),
                    trend: None,
                };
                scale.encode_feature(attributes, state.geometry, &state.indicators)
            })
            .collect();

        let paths_dropped =
            (self.counties.len() - county_paths.len()) + (self.states.len() - state_paths.len());

        BatchOutput {
            counties: self.counties,
            states: self.states,
            county_paths,
            state_paths,
            scale,
            latest: self.latest,
            county_counts: self.county_counts,
            state_counts: self.state_counts,
            paths_dropped,
        }
    }
}

impl BatchOutput {
    /// Serializes every artifact. The state paths come last so the gate
    /// only sees a fresh `modified` once everything else is in place.
    pub fn artifacts(&self, modified: i64) -> Result<Vec<Artifact>, PipelineError> {
        let frames = self.scale.frames();
        let county_paths = PathsArtifact {
            features: self.county_paths.clone(),
            frames,
            modified,
        };
        let state_paths = PathsArtifact {
            features: self.state_paths.clone(),
            frames,
            modified,
        };

        Ok(vec![
            Artifact::json(COUNTIES_FILE, &self.counties)?,
            Artifact::json(STATES_FILE, &self.states)?,
            Artifact::json(COUNTIES_PATHS_FILE, &county_paths)?,
            Artifact::json(LATEST_NUMBERS_FILE, &self.latest)?,
            Artifact::json(STATES_PATHS_FILE, &state_paths)?,
        ])
    }
}

/// One row of `run-history.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub skipped_by_gate: bool,
    pub upstream_modified: Option<i64>,
    pub counties_processed: usize,
    pub counties_skipped: usize,
    pub states_processed: usize,
    pub states_skipped: usize,
    pub paths_dropped: usize,
}

impl RunSummary {
    fn skipped(started_at: DateTime<Utc>, upstream_modified: Option<i64>) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            skipped_by_gate: true,
            upstream_modified,
            counties_processed: 0,
            counties_skipped: 0,
            states_processed: 0,
            states_skipped: 0,
            paths_dropped: 0,
        }
    }
}

/// Runs the gate and, when upstream changed (or `force` is set), the full
/// pipeline. Region failures are skipped; catalog, write and publish
/// failures abort the run.
#[tracing::instrument(skip(api, config), fields(output_dir = %config.output_dir.display()))]
pub async fn run<S: CasesApi + ?Sized>(
    api: &S,
    config: &Config,
) -> Result<RunSummary, PipelineError> {
    let started_at = Utc::now();
    let output_dir = &config.output_dir;

    std::fs::create_dir_all(output_dir).map_err(|source| PipelineError::Write {
        path: output_dir.clone(),
        source,
    })?;

    let decision = gate::check(api, &output_dir.join(STATES_PATHS_FILE)).await;
    if !decision.should_run && !config.force {
        info!("Upstream unchanged since last run, nothing to do");
        let summary = RunSummary::skipped(started_at, decision.upstream_modified);
        record_history(config, &summary);
        return Ok(summary);
    }

    let counties: Vec<CountyRecord> = filter_state(
        load_catalog(&config.counties_catalog)?,
        config.state_filter.as_deref(),
    );
    let states: Vec<StateRecord> = filter_state(
        load_catalog(&config.states_catalog)?,
        config.state_filter.as_deref(),
    );

    let trends = match api.trend_categories().await {
        Ok(trends) => trends,
        Err(e) => {
            warn!(error = %e, "Trend lookup failed, continuing without trend labels");
            TrendLookup::new()
        }
    };

    let mut batch = BatchContext::new(config.effective_window());

    info!(counties = counties.len(), "Processing counties");
    for county in counties {
        match fetch_outcome(api.time_series(&county.query()).await) {
            FetchOutcome::Usable(observations) => batch.add_county(county, observations),
            FetchOutcome::Skip(reason) => batch.skip(county.class(), county.fips(), &reason),
        }
    }

    info!(states = states.len(), "Processing states");
    for state in states {
        match fetch_outcome(api.time_series(&state.query()).await) {
            FetchOutcome::Usable(observations) => batch.add_state(state, observations),
            FetchOutcome::Skip(reason) => batch.skip(state.class(), state.fips(), &reason),
        }
    }

    let output = batch.finish(&trends, config.new_cases_y_max);
    let modified = decision
        .upstream_modified
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    let artifacts = output.artifacts(modified)?;

    for artifact in &artifacts {
        output::write_atomic(output_dir, artifact)?;
    }

    if let Some(bucket) = &config.s3_bucket {
        let aws = aws_config::load_from_env().await;
        let s3 = aws_sdk_s3::Client::new(&aws);
        output::publish_artifacts(&s3, bucket, &artifacts, config.gzip).await?;
    }

    let summary = RunSummary {
        started_at,
        finished_at: Utc::now(),
        skipped_by_gate: false,
        upstream_modified: decision.upstream_modified,
        counties_processed: output.county_counts.processed,
        counties_skipped: output.county_counts.skipped,
        states_processed: output.state_counts.processed,
        states_skipped: output.state_counts.skipped,
        paths_dropped: output.paths_dropped,
    };

    info!(
        counties = summary.counties_processed,
        states = summary.states_processed,
        skipped = summary.counties_skipped + summary.states_skipped,
        paths_dropped = summary.paths_dropped,
        modified,
        "Run complete"
    );
    record_history(config, &summary);

    Ok(summary)
}

fn record_history(config: &Config, summary: &RunSummary) {
    let path = config.output_dir.join(RUN_HISTORY_FILE);
    if let Err(e) = output::append_record(&path, summary) {
        warn!(path = %path.display(), error = %e, "Failed to append run history");
    }
}
