use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use covid19_trends::analyzers::types::{
    DailyObservation, LatestNumbersTable, PathsArtifact, TrendLabel,
};
use covid19_trends::catalog::TimeSeriesQuery;
use covid19_trends::config::Config;
use covid19_trends::output::{
    COUNTIES_FILE, COUNTIES_PATHS_FILE, LATEST_NUMBERS_FILE, RUN_HISTORY_FILE, STATES_PATHS_FILE,
};
use covid19_trends::pipeline;
use covid19_trends::services::cases_api::{CasesApi, TrendLookup};
use std::fs;
use std::path::Path;

const UPSTREAM_MODIFIED: i64 = 1_590_000_000_000;

/// In-memory upstream: every county grows by a FIPS-dependent daily amount.
struct FakeCases;

#[async_trait::async_trait]
impl CasesApi for FakeCases {
    async fn time_series(&self, query: &TimeSeriesQuery) -> Result<Vec<DailyObservation>> {
        match query {
            TimeSeriesQuery::County { fips } if fips == "06037" => Err(anyhow!("connection reset")),
            TimeSeriesQuery::County { fips } => {
                let daily = fips[3..].parse::<i64>()? % 50 + 1;
                Ok(series(21, daily, 100_000))
            }
            TimeSeriesQuery::State { .. } => Ok(series(21, 500, 10_000_000)),
        }
    }

    async fn trend_categories(&self) -> Result<TrendLookup> {
        let mut lookup = TrendLookup::new();
        lookup.insert("53033".to_string(), TrendLabel::Controlled);
        Ok(lookup)
    }

    async fn last_modified(&self) -> Result<i64> {
        Ok(UPSTREAM_MODIFIED)
    }
}

fn series(len: i64, daily: i64, population: i64) -> Vec<DailyObservation> {
    let start = NaiveDate::from_ymd_opt(2020, 4, 1).unwrap();
    (0..len)
        .map(|day| DailyObservation {
            date: start + chrono::Duration::days(day),
            confirmed: daily * (day + 1),
            deaths: day / 2,
            new_cases: daily,
            population,
        })
        .collect()
}

fn write_catalogs(dir: &Path) {
    let county = |fips: &str, name: &str, state: &str| {
        serde_json::json!({
            "attributes": { "FIPS": fips, "NAME": name, "STATE": state, "POPULATION": 100000 },
            "geometry": { "x": -74.0, "y": 40.7 }
        })
    };
    let counties = serde_json::json!({ "features": [
        county("36005", "Bronx", "New York"),
        county("36047", "Kings", "New York"),
        county("36061", "New York", "New York"),
        county("36081", "Queens", "New York"),
        county("36085", "Richmond", "New York"),
        county("53033", "King", "Washington"),
        county("53053", "Pierce", "Washington"),
        county("06037", "Los Angeles", "California"),
    ]});
    let states = serde_json::json!({ "features": [
        { "attributes": { "STATE_FIPS": "36", "STATE_NAME": "New York", "POPULATION": 19453561 },
          "geometry": { "x": -75.5, "y": 42.9 } },
        { "attributes": { "STATE_FIPS": "53", "STATE_NAME": "Washington", "POPULATION": 7614893 },
          "geometry": { "x": -120.4, "y": 47.3 } }
    ]});

    fs::write(dir.join("US-Counties.json"), counties.to_string()).unwrap();
    fs::write(dir.join("US-States.json"), states.to_string()).unwrap();
}

fn config(dir: &Path) -> Config {
    Config {
        counties_catalog: dir.join("US-Counties.json"),
        states_catalog: dir.join("US-States.json"),
        output_dir: dir.join("public"),
        ..Default::default()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> T {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_full_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    write_catalogs(dir.path());
    let config = config(dir.path());

    let summary = pipeline::run(&FakeCases, &config).await.unwrap();

    assert!(!summary.skipped_by_gate);
    // NYC merged into one county, plus King and Pierce; Los Angeles failed
    assert_eq!(summary.counties_processed, 3);
    assert_eq!(summary.counties_skipped, 1);
    assert_eq!(summary.states_processed, 2);

    let out = &config.output_dir;
    let county_paths: PathsArtifact = read_json(&out.join(COUNTIES_PATHS_FILE));
    let fips: Vec<&str> = county_paths
        .features
        .iter()
        .map(|f| f.attributes.fips.as_str())
        .collect();
    // the merged county is emitted once its last borough arrives
    assert_eq!(fips, vec!["36061", "53033", "53053"]);
    assert_eq!(county_paths.modified, UPSTREAM_MODIFIED);
    assert_eq!(county_paths.features[1].attributes.trend, Some(TrendLabel::Controlled));
    assert_eq!(county_paths.features[0].attributes.trend, None);

    let state_paths: PathsArtifact = read_json(&out.join(STATES_PATHS_FILE));
    assert_eq!(state_paths.features.len(), 2);
    // both artifact sets share the batch-wide frames
    assert_eq!(state_paths.frames, county_paths.frames);
    assert_eq!(
        state_paths.frames.new_cases.xmax,
        (state_paths.frames.new_cases.ymax as f64 * 0.5).ceil() as i64
    );
    for feature in &county_paths.features {
        assert_eq!(feature.confirmed.path.len(), 3);
        assert!(feature.confirmed.path.iter().all(|p| p[1] <= county_paths.frames.confirmed.ymax));
    }

    let latest: LatestNumbersTable = read_json(&out.join(LATEST_NUMBERS_FILE));
    assert_eq!(latest["36061"].name, "NEW YORK, NEW YORK");
    assert_eq!(latest["36061"].population, 500_000);
    assert!(!latest.contains_key("36005"));
    assert!(!latest.contains_key("06037"));
    assert_eq!(latest["53033"].name, "King, Washington");
    assert_eq!(latest["53033"].trend, Some(TrendLabel::Controlled));
    assert_eq!(latest["53033"].new_cases_7d, 7 * 34);
    assert!(latest["53"].ranks.is_some());
    // cases per capita: Pierce 54, King 34, merged NYC 26.8 per day per 100k
    assert_eq!(latest["53053"].ranks.unwrap()[0], 1);
    assert_eq!(latest["36061"].ranks.unwrap()[0], 3);

    let raw: serde_json::Value = read_json(&out.join(LATEST_NUMBERS_FILE));
    assert_eq!(raw["36061"]["TrendType"], "");
    assert_eq!(raw["53033"]["TrendType"], "Controlled");

    let counties: serde_json::Value = read_json(&out.join(COUNTIES_FILE));
    assert_eq!(counties.as_array().unwrap().len(), 3);
    assert_eq!(counties[1]["attributes"]["FIPS"], "53033");
    assert_eq!(counties[0]["confirmed"].as_array().unwrap().len(), 3);
    assert!(counties[0].get("newCases").is_some());
}

#[tokio::test]
async fn test_unchanged_upstream_skips_second_run() {
    let dir = tempfile::tempdir().unwrap();
    write_catalogs(dir.path());
    let config = config(dir.path());

    pipeline::run(&FakeCases, &config).await.unwrap();
    let second = pipeline::run(&FakeCases, &config).await.unwrap();
    assert!(second.skipped_by_gate);

    let forced = Config {
        force: true,
        ..config.clone()
    };
    let third = pipeline::run(&FakeCases, &forced).await.unwrap();
    assert!(!third.skipped_by_gate);

    let history = fs::read_to_string(config.output_dir.join(RUN_HISTORY_FILE)).unwrap();
    // 1 header + 3 runs
    assert_eq!(history.lines().count(), 4);
}

#[tokio::test]
async fn test_state_filter() {
    let dir = tempfile::tempdir().unwrap();
    write_catalogs(dir.path());
    let config = Config {
        state_filter: Some("washington".to_string()),
        ..config(dir.path())
    };

    let summary = pipeline::run(&FakeCases, &config).await.unwrap();

    assert_eq!(summary.counties_processed, 2);
    assert_eq!(summary.states_processed, 1);
    let latest: LatestNumbersTable = read_json(&config.output_dir.join(LATEST_NUMBERS_FILE));
    assert!(!latest.contains_key("36061"));
}

#[tokio::test]
async fn test_missing_catalog_is_fatal_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let result = pipeline::run(&FakeCases, &config).await;

    assert!(result.is_err());
    assert!(!config.output_dir.join(STATES_PATHS_FILE).exists());
}
