//! Sparkline path encoding with a batch-wide y-scale.
//!
//! Every region of a batch is drawn against the same [`YScale`] so charts
//! are comparable on the map. The scale is the 2-sigma bound of the
//! per-region maxima: a handful of extreme regions get flattened against
//! the top of their frame instead of compressing everyone else.

use tracing::{debug, warn};

use crate::analyzers::types::{
    Indicator, PathAttributes, PathEncoding, PathFeature, PathFrame, PathFrames, PathOnly,
    WeeklyIndicators,
};
use crate::analyzers::utility::{max, mean, stddev};
use crate::catalog::Geometry;

/// x/y aspect ratio of the new-cases chart.
pub const NEW_CASES_ASPECT: f64 = 0.5;

fn aspect(indicator: Indicator) -> f64 {
    match indicator {
        Indicator::NewCases => NEW_CASES_ASPECT,
        Indicator::Confirmed | Indicator::Deaths => 1.0,
    }
}

fn frame_for(ymax: i64, xy_ratio: f64) -> PathFrame {
    let xmax = if xy_ratio == 1.0 {
        ymax
    } else {
        (ymax as f64 * xy_ratio).ceil() as i64
    };

    PathFrame {
        xmin: 0,
        ymin: 0,
        xmax,
        ymax,
    }
}

/// Encodes one series into an integer polyline inside `[0, xmax] × [0, ymax]`.
///
/// A series whose own maximum exceeds `ymax` is scaled down by
/// `ymax / max`; otherwise values are kept and only clamped to `ymax`.
pub fn encode_path(values: &[i64], ymax: i64, xy_ratio: f64) -> PathEncoding {
    let frame = frame_for(ymax, xy_ratio);

    let y_ratio = match max(values) {
        Some(local_max) if local_max > ymax => ymax as f64 / local_max as f64,
        _ => 1.0,
    };

    let x_step = if values.is_empty() {
        0.0
    } else {
        frame.xmax as f64 / values.len() as f64
    };

    let path = values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let x = (x_step * i as f64).round() as i64;
            let y = if y_ratio == 1.0 {
                *value
            } else {
                (*value as f64 * y_ratio).round() as i64
            };
            [x, y.min(ymax)]
        })
        .collect();

    PathEncoding { path, frame }
}

/// `round(mean + 2 × stddev)` of the given maxima; 0 for an empty pool.
pub fn two_sigma_bound(maxima: &[f64]) -> i64 {
    if maxima.is_empty() {
        return 0;
    }
    let m = mean(maxima);
    (m + 2.0 * stddev(maxima, m)).round() as i64
}

/// Shared y-max per indicator for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YScale {
    pub confirmed: i64,
    pub deaths: i64,
    pub new_cases: i64,
}

impl YScale {
    /// Computes the scale from every region's own maxima. Regions with an
    /// empty series contribute nothing.
    pub fn from_batch<'a, I>(batch: I) -> Self
    where
        I: IntoIterator<Item = &'a WeeklyIndicators>,
    {
        let mut maxima: [Vec<f64>; 3] = Default::default();

        for indicators in batch {
            for (slot, indicator) in Indicator::ALL.iter().enumerate() {
                if let Some(m) = max(indicators.series(*indicator)) {
                    maxima[slot].push(m as f64);
                }
            }
        }

        let scale = YScale {
            confirmed: two_sigma_bound(&maxima[0]),
            deaths: two_sigma_bound(&maxima[1]),
            new_cases: two_sigma_bound(&maxima[2]),
        };
        debug!(
            confirmed = scale.confirmed,
            deaths = scale.deaths,
            new_cases = scale.new_cases,
            regions = maxima[0].len(),
            "Shared y-scale computed"
        );
        scale
    }

    /// Pins the new-cases y-max when configured.
    pub fn with_new_cases_max(mut self, y_max: Option<i64>) -> Self {
        if let Some(y_max) = y_max {
            self.new_cases = y_max;
        }
        self
    }

    pub fn get(&self, indicator: Indicator) -> i64 {
        match indicator {
            Indicator::Confirmed => self.confirmed,
            Indicator::Deaths => self.deaths,
            Indicator::NewCases => self.new_cases,
        }
    }

    /// Frames shared by every feature encoded with this scale.
    pub fn frames(&self) -> PathFrames {
        PathFrames {
            confirmed: frame_for(self.confirmed, aspect(Indicator::Confirmed)),
            deaths: frame_for(self.deaths, aspect(Indicator::Deaths)),
            new_cases: frame_for(self.new_cases, aspect(Indicator::NewCases)),
        }
    }

    fn encode(&self, indicators: &WeeklyIndicators, indicator: Indicator) -> PathEncoding {
        encode_path(
            indicators.series(indicator),
            self.get(indicator),
            aspect(indicator),
        )
    }

    /// Encodes all three charts of a region. Returns `None`, with a
    /// diagnostic, when any chart would be empty.
    pub fn encode_feature(
        &self,
        attributes: PathAttributes,
        geometry: Geometry,
        indicators: &WeeklyIndicators,
    ) -> Option<PathFeature> {
        let confirmed = self.encode(indicators, Indicator::Confirmed);
        let deaths = self.encode(indicators, Indicator::Deaths);
        let new_cases = self.encode(indicators, Indicator::NewCases);

        if confirmed.path.is_empty() || deaths.path.is_empty() || new_cases.path.is_empty() {
            warn!(fips = %attributes.fips, "Dropping region with empty path");
            return None;
        }

        Some(PathFeature {
            attributes,
            geometry,
            confirmed: PathOnly {
                path: confirmed.path,
            },
            deaths: PathOnly { path: deaths.path },
            new_cases: PathOnly {
                path: new_cases.path,
            },
        })
    }
}
