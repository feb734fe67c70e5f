//! Data types used by the aggregation pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::catalog::Geometry;

/// Reads a count that upstream may send as an integer, a float, or `null`.
pub(crate) fn lenient_count<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<f64> = Option::deserialize(deserializer)?;
    Ok(value.map(|v| v.round() as i64).unwrap_or(0))
}

/// One day of cumulative counts for a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyObservation {
    pub date: NaiveDate,
    pub confirmed: i64,
    pub deaths: i64,
    pub new_cases: i64,
    pub population: i64,
}

/// The three charted indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indicator {
    Confirmed,
    Deaths,
    NewCases,
}

impl Indicator {
    pub const ALL: [Indicator; 3] = [Indicator::Confirmed, Indicator::Deaths, Indicator::NewCases];
}

/// Window-averaged, per-capita indicator series, oldest window first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyIndicators {
    /// Confirmed per 100k.
    pub confirmed: Vec<i64>,
    /// New deaths per 10M.
    pub deaths: Vec<i64>,
    /// New cases per 100k.
    pub new_cases: Vec<i64>,
}

impl WeeklyIndicators {
    pub fn series(&self, indicator: Indicator) -> &[i64] {
        match indicator {
            Indicator::Confirmed => &self.confirmed,
            Indicator::Deaths => &self.deaths,
            Indicator::NewCases => &self.new_cases,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.deaths.is_empty() && self.new_cases.is_empty()
    }
}

/// Externally supplied county trajectory category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendLabel {
    Emergent,
    Spreading,
    Epidemic,
    Controlled,
    #[serde(rename = "End Stage")]
    EndStage,
    #[serde(rename = "Zero Cases")]
    ZeroCases,
}

impl std::str::FromStr for TrendLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Emergent" => Ok(TrendLabel::Emergent),
            "Spreading" => Ok(TrendLabel::Spreading),
            "Epidemic" => Ok(TrendLabel::Epidemic),
            "Controlled" => Ok(TrendLabel::Controlled),
            "End Stage" => Ok(TrendLabel::EndStage),
            "Zero Cases" => Ok(TrendLabel::ZeroCases),
            other => Err(format!("unknown trend type '{other}'")),
        }
    }
}

/// `TrendType` is always present in the latest-numbers table; an unlabelled
/// region carries an empty string.
fn serialize_trend<S>(trend: &Option<TrendLabel>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match trend {
        Some(label) => label.serialize(serializer),
        None => serializer.serialize_str(""),
    }
}

fn deserialize_trend<'de, D>(deserializer: D) -> Result<Option<TrendLabel>, D::Error>
where
    D: Deserializer<'de>,
{
    let text: Option<String> = Option::deserialize(deserializer)?;
    match text.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(label) => label.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Tooltip numbers for one region, keyed by FIPS in the latest-numbers artifact.
///
/// Percentiles and ranks are ordered: cases per capita, deaths per capita,
/// case fatality rate, case fatality rate over the past 100 days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestNumbers {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Confirmed")]
    pub confirmed: i64,
    #[serde(rename = "Deaths")]
    pub deaths: i64,
    #[serde(rename = "Population")]
    pub population: i64,
    #[serde(rename = "NewCases")]
    pub new_cases_7d: i64,
    #[serde(rename = "NewDeaths")]
    pub new_deaths_7d: i64,
    #[serde(rename = "NewCases100Days")]
    pub new_cases_100d: i64,
    #[serde(rename = "NewDeaths100Days")]
    pub new_deaths_100d: i64,
    #[serde(
        rename = "TrendType",
        default,
        serialize_with = "serialize_trend",
        deserialize_with = "deserialize_trend"
    )]
    pub trend: Option<TrendLabel>,
    #[serde(rename = "Percentiles", default, skip_serializing_if = "Option::is_none")]
    pub percentiles: Option<[f64; 4]>,
    #[serde(rename = "Ranks", default, skip_serializing_if = "Option::is_none")]
    pub ranks: Option<[usize; 4]>,
}

/// Bounding box of an encoded path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFrame {
    pub xmin: i64,
    pub ymin: i64,
    pub xmax: i64,
    pub ymax: i64,
}

/// Integer polyline for one indicator series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEncoding {
    pub path: Vec<[i64; 2]>,
    pub frame: PathFrame,
}

/// Raw indicator record written to `us-counties.json` / `us-states.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RegionTrend<R> {
    pub attributes: R,
    pub geometry: Geometry,
    #[serde(flatten)]
    pub indicators: WeeklyIndicators,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathOnly {
    pub path: Vec<[i64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAttributes {
    #[serde(rename = "FIPS")]
    pub fips: String,
    #[serde(rename = "trendType", default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendLabel>,
}

/// One region's charts in a paths artifact. Frames live at artifact level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathFeature {
    pub attributes: PathAttributes,
    pub geometry: Geometry,
    pub confirmed: PathOnly,
    pub deaths: PathOnly,
    pub new_cases: PathOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathFrames {
    pub confirmed: PathFrame,
    pub deaths: PathFrame,
    pub new_cases: PathFrame,
}

/// Contents of `us-counties-paths.json` / `us-states-paths.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsArtifact {
    pub features: Vec<PathFeature>,
    pub frames: PathFrames,
    /// Epoch milliseconds.
    pub modified: i64,
}

/// Latest-numbers artifact, ordered by FIPS.
pub type LatestNumbersTable = BTreeMap<String, LatestNumbers>;
