//! Run configuration.
//!
//! Everything here has a compiled default; the CLI (and `.env` through
//! clap's `env` support) overrides individual fields.

use std::path::PathBuf;

/// Cases-by-time layer of the US counties feature service.
pub const DEFAULT_CASES_SERVICE_URL: &str =
    "https://services9.arcgis.com/6Hv9AANartyT7fJW/ArcGIS/rest/services/USCounties_cases_V1/FeatureServer/1";

/// Days per aggregation window.
pub const DEFAULT_WINDOW: usize = 7;

/// Records per trend-category page.
pub const DEFAULT_TREND_PAGE_SIZE: usize = 2000;

#[derive(Debug, Clone)]
pub struct Config {
    pub cases_service_url: String,
    /// County trend-category layer; trend labels are omitted when unset.
    pub trend_service_url: Option<String>,
    pub counties_catalog: PathBuf,
    pub states_catalog: PathBuf,
    pub output_dir: PathBuf,
    pub window: usize,
    pub trend_page_size: usize,
    /// Restricts the run to one state (matched by name, case-insensitive).
    pub state_filter: Option<String>,
    /// Pins the new-cases chart scale instead of deriving it from the batch.
    pub new_cases_y_max: Option<i64>,
    /// Bypasses the change-detection gate.
    pub force: bool,
    /// Bucket receiving a copy of every artifact; local only when unset.
    pub s3_bucket: Option<String>,
    /// Gzip artifacts before uploading.
    pub gzip: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cases_service_url: DEFAULT_CASES_SERVICE_URL.to_string(),
            trend_service_url: None,
            counties_catalog: PathBuf::from("data/US-Counties.json"),
            states_catalog: PathBuf::from("data/US-States.json"),
            output_dir: PathBuf::from("public"),
            window: DEFAULT_WINDOW,
            trend_page_size: DEFAULT_TREND_PAGE_SIZE,
            state_filter: None,
            new_cases_y_max: None,
            force: false,
            s3_bucket: None,
            gzip: false,
        }
    }
}

impl Config {
    /// Window size actually used; a zero window falls back to the default.
    pub fn effective_window(&self) -> usize {
        if self.window == 0 {
            DEFAULT_WINDOW
        } else {
            self.window
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.window, 7);
        assert_eq!(config.trend_page_size, 2000);
        assert_eq!(config.output_dir, PathBuf::from("public"));
        assert!(config.state_filter.is_none());
        assert!(!config.force);
        assert!(config.s3_bucket.is_none());
    }

    #[test]
    fn test_zero_window_falls_back() {
        let config = Config {
            window: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_window(), DEFAULT_WINDOW);

        let config = Config {
            window: 10,
            ..Default::default()
        };
        assert_eq!(config.effective_window(), 10);
    }
}
