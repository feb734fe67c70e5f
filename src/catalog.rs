//! Static region catalog: counties and states with population and a
//! representative point.
//!
//! Catalogs are ArcGIS-style feature collections:
//! ```json
//! { "features": [ { "attributes": { "FIPS": "53033", ... }, "geometry": { "x": -121.8, "y": 47.4 } } ] }
//! ```
//! County attributes carry `FIPS`, `NAME`, `STATE`, `POPULATION`; state
//! attributes carry `STATE_FIPS`, `STATE_NAME`, `POPULATION`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::analyzers::types::lenient_count;
use crate::error::PipelineError;

/// Point used to anchor a region's chart on the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
}

/// Region class, derived from FIPS length. Rank pools never mix classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionClass {
    County,
    State,
}

impl RegionClass {
    /// `Some(State)` for 2-digit FIPS, `Some(County)` for 5-digit FIPS.
    pub fn from_fips(fips: &str) -> Option<Self> {
        match fips.len() {
            2 => Some(RegionClass::State),
            5 => Some(RegionClass::County),
            _ => None,
        }
    }
}

/// How the time-series service should be queried for a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeSeriesQuery {
    /// One county's records, filtered by FIPS.
    County { fips: String },
    /// All counties of a state summed per date.
    State { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyAttributes {
    #[serde(rename = "FIPS")]
    pub fips: String,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "STATE")]
    pub state: String,
    #[serde(rename = "POPULATION", deserialize_with = "lenient_count", default)]
    pub population: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateAttributes {
    #[serde(rename = "STATE_FIPS")]
    pub fips: String,
    #[serde(rename = "STATE_NAME")]
    pub name: String,
    #[serde(rename = "POPULATION", deserialize_with = "lenient_count", default)]
    pub population: i64,
}

/// One catalog entry: class-specific attributes plus geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionFeature<A> {
    pub attributes: A,
    pub geometry: Geometry,
}

pub type CountyRecord = RegionFeature<CountyAttributes>;
pub type StateRecord = RegionFeature<StateAttributes>;

/// Identity shared by every region class.
pub trait Region: Clone + Serialize {
    fn fips(&self) -> &str;
    /// Display name used in the latest-numbers table.
    fn display_name(&self) -> String;
    fn population(&self) -> i64;
    fn class(&self) -> RegionClass;
    fn query(&self) -> TimeSeriesQuery;
    /// Replaces the catalog population with the one reported upstream.
    fn set_population(&mut self, population: i64);
    /// Whether this region belongs to `state` (case-insensitive name match).
    fn in_state(&self, state: &str) -> bool;
}

impl Region for CountyRecord {
    fn fips(&self) -> &str {
        &self.attributes.fips
    }

    fn display_name(&self) -> String {
        format!("{}, {}", self.attributes.name, self.attributes.state)
    }

    fn population(&self) -> i64 {
        self.attributes.population
    }

    fn class(&self) -> RegionClass {
        RegionClass::County
    }

    fn query(&self) -> TimeSeriesQuery {
        TimeSeriesQuery::County {
            fips: self.attributes.fips.clone(),
        }
    }

    fn set_population(&mut self, population: i64) {
        self.attributes.population = population;
    }

    fn in_state(&self, state: &str) -> bool {
        self.attributes.state.eq_ignore_ascii_case(state)
    }
}

impl Region for StateRecord {
    fn fips(&self) -> &str {
        &self.attributes.fips
    }

    fn display_name(&self) -> String {
        self.attributes.name.clone()
    }

    fn population(&self) -> i64 {
        self.attributes.population
    }

    fn class(&self) -> RegionClass {
        RegionClass::State
    }

    fn query(&self) -> TimeSeriesQuery {
        TimeSeriesQuery::State {
            name: self.attributes.name.clone(),
        }
    }

    fn set_population(&mut self, population: i64) {
        self.attributes.population = population;
    }

    fn in_state(&self, state: &str) -> bool {
        self.attributes.name.eq_ignore_ascii_case(state)
    }
}

#[derive(Deserialize)]
struct CatalogFile<A> {
    features: Vec<RegionFeature<A>>,
}

/// Parses a catalog from its JSON text.
pub fn parse_catalog<A: DeserializeOwned>(json: &str) -> serde_json::Result<Vec<RegionFeature<A>>> {
    let file: CatalogFile<A> = serde_json::from_str(json)?;
    Ok(file.features)
}

/// Loads a catalog file. Any failure here is fatal for the run.
pub fn load_catalog<A: DeserializeOwned>(
    path: &Path,
) -> Result<Vec<RegionFeature<A>>, PipelineError> {
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::Catalog {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let features = parse_catalog(&content).map_err(|e| PipelineError::Catalog {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    info!(path = %path.display(), regions = features.len(), "Catalog loaded");
    Ok(features)
}

/// Keeps only the regions of `state` when a filter is set.
pub fn filter_state<R: Region>(regions: Vec<R>, state: Option<&str>) -> Vec<R> {
    match state {
        None => regions,
        Some(state) => {
            let kept: Vec<R> = regions.into_iter().filter(|r| r.in_state(state)).collect();
            debug!(state, kept = kept.len(), "Applied single-state filter");
            kept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTIES: &str = r#"{
        "features": [
            { "attributes": { "FIPS": "53033", "NAME": "King", "STATE": "Washington", "POPULATION": 2252782 },
              "geometry": { "x": -121.8, "y": 47.4 } },
            { "attributes": { "FIPS": "06037", "NAME": "Los Angeles", "STATE": "California", "POPULATION": 10039107.0 },
              "geometry": { "x": -118.2, "y": 34.3 } }
        ]
    }"#;

    const STATES: &str = r#"{
        "features": [
            { "attributes": { "STATE_FIPS": "53", "STATE_NAME": "Washington", "POPULATION": 7614893 },
              "geometry": { "x": -120.4, "y": 47.3 } }
        ]
    }"#;

    #[test]
    fn test_parse_counties() {
        let counties: Vec<CountyRecord> = parse_catalog(COUNTIES).unwrap();

        assert_eq!(counties.len(), 2);
        assert_eq!(counties[0].fips(), "53033");
        assert_eq!(counties[0].display_name(), "King, Washington");
        assert_eq!(counties[1].population(), 10039107);
        assert_eq!(counties[0].class(), RegionClass::County);
        assert_eq!(
            counties[0].query(),
            TimeSeriesQuery::County {
                fips: "53033".to_string()
            }
        );
    }

    #[test]
    fn test_parse_states() {
        let states: Vec<StateRecord> = parse_catalog(STATES).unwrap();

        assert_eq!(states[0].fips(), "53");
        assert_eq!(states[0].class(), RegionClass::State);
        assert_eq!(
            states[0].query(),
            TimeSeriesQuery::State {
                name: "Washington".to_string()
            }
        );
    }

    #[test]
    fn test_region_class_from_fips() {
        assert_eq!(RegionClass::from_fips("06"), Some(RegionClass::State));
        assert_eq!(RegionClass::from_fips("06037"), Some(RegionClass::County));
        assert_eq!(RegionClass::from_fips("123"), None);
    }

    #[test]
    fn test_filter_state_is_case_insensitive() {
        let counties: Vec<CountyRecord> = parse_catalog(COUNTIES).unwrap();

        let kept = filter_state(counties.clone(), Some("washington"));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].fips(), "53033");

        assert_eq!(filter_state(counties, None).len(), 2);
    }

    #[test]
    fn test_load_missing_catalog_is_fatal() {
        let result = load_catalog::<CountyAttributes>(Path::new("/nonexistent/catalog.json"));
        assert!(matches!(result, Err(PipelineError::Catalog { .. })));
    }
}
