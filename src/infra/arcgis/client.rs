use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::analyzers::types::{DailyObservation, TrendLabel, lenient_count};
use crate::catalog::TimeSeriesQuery;
use crate::fetch::{HttpClient, fetch_bytes};
use crate::services::cases_api::{CasesApi, TrendLookup};

/// Trend pages requested even when the first page looks complete.
const MIN_TREND_PAGES: usize = 2;
const MAX_TREND_PAGES: usize = 10;

#[derive(Deserialize)]
struct ServiceError {
    code: Option<i64>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct Feature<A> {
    attributes: A,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse<A> {
    features: Option<Vec<Feature<A>>>,
    #[serde(default)]
    exceeded_transfer_limit: bool,
    error: Option<ServiceError>,
}

/// `dt` arrives as epoch milliseconds, or as text from some layers.
#[derive(Deserialize)]
#[serde(untagged)]
enum DateValue {
    Millis(i64),
    Text(String),
}

impl DateValue {
    fn to_date(&self) -> Option<NaiveDate> {
        match self {
            DateValue::Millis(ms) => DateTime::from_timestamp_millis(*ms).map(|dt| dt.date_naive()),
            DateValue::Text(text) => text
                .get(..10)
                .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()),
        }
    }
}

#[derive(Deserialize)]
struct CasesAttributes {
    dt: DateValue,
    #[serde(rename = "Confirmed", deserialize_with = "lenient_count", default)]
    confirmed: i64,
    #[serde(rename = "Deaths", deserialize_with = "lenient_count", default)]
    deaths: i64,
    #[serde(rename = "NewCases", deserialize_with = "lenient_count", default)]
    new_cases: i64,
    #[serde(rename = "Population", deserialize_with = "lenient_count", default)]
    population: i64,
}

#[derive(Deserialize)]
struct TrendAttributes {
    #[serde(rename = "Cty_FIPS")]
    fips: Option<String>,
    #[serde(rename = "TrendType")]
    trend_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditingInfo {
    last_edit_date: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayerInfo {
    editing_info: Option<EditingInfo>,
    error: Option<ServiceError>,
}

fn service_error(error: &ServiceError) -> anyhow::Error {
    anyhow!(
        "Service returned error {}: {}",
        error.code.unwrap_or_default(),
        error.message.as_deref().unwrap_or("unknown")
    )
}

/// Quotes a value for a SQL-style `where` clause.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// State-level query: per-date sums over all counties of the state.
fn state_statistics() -> String {
    let stat = |field: &str| {
        serde_json::json!({
            "statisticType": "sum",
            "onStatisticField": field,
            "outStatisticFieldName": field,
        })
    };
    serde_json::Value::Array(vec![
        stat("Confirmed"),
        stat("Deaths"),
        stat("NewCases"),
        stat("Population"),
    ])
    .to_string()
}

/// ArcGIS feature-service implementation of [`CasesApi`].
pub struct ArcGisClient<C> {
    http: C,
    cases_url: reqwest::Url,
    trend_url: Option<reqwest::Url>,
    trend_page_size: usize,
}

impl<C: HttpClient> ArcGisClient<C> {
    /// `cases_url` and `trend_url` are layer URLs (ending in the layer id).
    pub fn new(
        http: C,
        cases_url: &str,
        trend_url: Option<&str>,
        trend_page_size: usize,
    ) -> Result<Self> {
        let cases_url = reqwest::Url::parse(cases_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid cases service URL '{cases_url}'"))?;
        let trend_url = trend_url
            .map(|url| {
                reqwest::Url::parse(url.trim_end_matches('/'))
                    .with_context(|| format!("Invalid trend service URL '{url}'"))
            })
            .transpose()?;

        Ok(Self {
            http,
            cases_url,
            trend_url,
            trend_page_size: trend_page_size.max(1),
        })
    }

    fn query_url(layer: &reqwest::Url, params: &[(&str, String)]) -> reqwest::Url {
        let mut url = layer.clone();
        url.set_path(&format!("{}/query", layer.path()));
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        url
    }

    /// URL of the time-series query for `query`.
    pub fn time_series_url(&self, query: &TimeSeriesQuery) -> reqwest::Url {
        let params: Vec<(&str, String)> = match query {
            TimeSeriesQuery::County { fips } => vec![
                ("f", "json".to_string()),
                ("where", format!("FIPS = {}", quote(fips))),
                ("outFields", "dt,Confirmed,Deaths,NewCases,Population".to_string()),
                ("orderByFields", "dt".to_string()),
            ],
            TimeSeriesQuery::State { name } => vec![
                ("f", "json".to_string()),
                ("where", format!("ST_Name = {}", quote(name))),
                ("outFields", "*".to_string()),
                ("orderByFields", "dt".to_string()),
                ("groupByFieldsForStatistics", "ST_Name,dt".to_string()),
                ("outStatistics", state_statistics()),
            ],
        };
        Self::query_url(&self.cases_url, &params)
    }

    fn trend_page_url(&self, layer: &reqwest::Url, offset: usize) -> reqwest::Url {
        Self::query_url(
            layer,
            &[
                ("f", "json".to_string()),
                ("where", "1=1".to_string()),
                ("outFields", "Cty_FIPS,Cty_NAME,ST_ABBREV,TrendType".to_string()),
                ("orderByFields", "Cty_FIPS".to_string()),
                ("returnGeometry", "false".to_string()),
                ("resultOffset", offset.to_string()),
                ("resultRecordCount", self.trend_page_size.to_string()),
            ],
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: reqwest::Url) -> Result<T> {
        let body = fetch_bytes(&self.http, url).await?;
        serde_json::from_slice(&body).map_err(|e| anyhow!("Failed to parse response: {}", e))
    }

    async fn query<A: DeserializeOwned>(&self, url: reqwest::Url) -> Result<(Vec<A>, bool)> {
        let response: QueryResponse<A> = self.get_json(url).await?;

        if let Some(error) = &response.error {
            return Err(service_error(error));
        }

        let features = response
            .features
            .ok_or_else(|| anyhow!("Response has no features"))?;

        Ok((
            features.into_iter().map(|f| f.attributes).collect(),
            response.exceeded_transfer_limit,
        ))
    }
}

#[async_trait]
impl<C: HttpClient> CasesApi for ArcGisClient<C> {
    #[tracing::instrument(skip(self))]
    async fn time_series(&self, query: &TimeSeriesQuery) -> Result<Vec<DailyObservation>> {
        let (records, _) = self
            .query::<CasesAttributes>(self.time_series_url(query))
            .await?;

        let mut observations = records
            .into_iter()
            .map(|r| -> Result<DailyObservation> {
                let date = r
                    .dt
                    .to_date()
                    .ok_or_else(|| anyhow!("Record has an unreadable date"))?;
                Ok(DailyObservation {
                    date,
                    confirmed: r.confirmed,
                    deaths: r.deaths,
                    new_cases: r.new_cases,
                    population: r.population,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        observations.sort_by_key(|o| o.date);
        debug!(observations = observations.len(), "Time series fetched");
        Ok(observations)
    }

    #[tracing::instrument(skip(self))]
    async fn trend_categories(&self) -> Result<TrendLookup> {
        let mut lookup = TrendLookup::new();
        let Some(layer) = &self.trend_url else {
            info!("No trend service configured, skipping trend categories");
            return Ok(lookup);
        };

        for page in 0..MAX_TREND_PAGES {
            let url = self.trend_page_url(layer, page * self.trend_page_size);
            let (records, exceeded) = self.query::<TrendAttributes>(url).await?;
            let count = records.len();

            for record in records {
                let (Some(fips), Some(trend_type)) = (record.fips, record.trend_type) else {
                    continue;
                };
                match trend_type.parse::<TrendLabel>() {
                    Ok(label) => {
                        lookup.insert(fips, label);
                    }
                    Err(e) => warn!(fips = %fips, error = %e, "Ignoring trend record"),
                }
            }

            debug!(page, count, exceeded, "Trend page fetched");

            let more = count > 0 && (exceeded || count == self.trend_page_size);
            if page + 1 >= MIN_TREND_PAGES && !more {
                break;
            }
        }

        info!(counties = lookup.len(), "Trend categories fetched");
        Ok(lookup)
    }

    #[tracing::instrument(skip(self))]
    async fn last_modified(&self) -> Result<i64> {
        let mut url = self.cases_url.clone();
        url.query_pairs_mut().append_pair("f", "json");

        let info: LayerInfo = self.get_json(url).await?;
        if let Some(error) = &info.error {
            return Err(service_error(error));
        }

        info.editing_info
            .and_then(|e| e.last_edit_date)
            .ok_or_else(|| anyhow!("Layer metadata has no lastEditDate"))
    }
}
