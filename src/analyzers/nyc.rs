//! New York City borough correction.
//!
//! Upstream reports all five boroughs under New York County while the
//! catalog lists each borough separately. Borough series are buffered until
//! all five are fetched, then summed into New York County. Secondary
//! boroughs are never emitted on their own.

use std::collections::HashMap;
use tracing::debug;

use crate::analyzers::types::DailyObservation;
use crate::catalog::CountyRecord;
use crate::error::AlignmentError;

/// New York County (Manhattan); carries the merged series.
pub const PRIMARY_BOROUGH_FIPS: &str = "36061";

/// Bronx, Kings, Queens, Richmond.
pub const SECONDARY_BOROUGH_FIPS: [&str; 4] = ["36005", "36047", "36081", "36085"];

/// Latest-numbers name of the merged county.
pub const MERGED_NAME: &str = "NEW YORK, NEW YORK";

pub fn is_nyc_borough(fips: &str) -> bool {
    fips == PRIMARY_BOROUGH_FIPS || SECONDARY_BOROUGH_FIPS.contains(&fips)
}

/// Sums the secondary series into the primary one, index by index.
///
/// All series must have the primary's length; nothing is summed otherwise.
pub fn merge_boroughs(
    primary: &[DailyObservation],
    secondaries: &[(&str, &[DailyObservation])],
) -> Result<Vec<DailyObservation>, AlignmentError> {
    for (fips, series) in secondaries {
        if series.len() != primary.len() {
            return Err(AlignmentError::LengthMismatch {
                fips: fips.to_string(),
                expected: primary.len(),
                found: series.len(),
            });
        }
    }

    let mut merged = primary.to_vec();
    for (_, series) in secondaries {
        for (day, other) in merged.iter_mut().zip(series.iter()) {
            day.confirmed += other.confirmed;
            day.deaths += other.deaths;
            day.new_cases += other.new_cases;
            day.population += other.population;
        }
    }

    Ok(merged)
}

/// Run-scoped holding area for borough series.
#[derive(Debug, Default)]
pub struct BoroughBuffer {
    held: HashMap<String, (CountyRecord, Vec<DailyObservation>)>,
}

impl BoroughBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a fetched borough series. Non-borough FIPS are ignored.
    pub fn hold(&mut self, county: CountyRecord, observations: Vec<DailyObservation>) {
        let fips = county.attributes.fips.clone();
        if !is_nyc_borough(&fips) {
            return;
        }
        debug!(fips = %fips, observations = observations.len(), "Holding NYC borough series");
        self.held.insert(fips, (county, observations));
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Borough FIPS not yet held.
    pub fn missing(&self) -> Vec<&'static str> {
        std::iter::once(PRIMARY_BOROUGH_FIPS)
            .chain(SECONDARY_BOROUGH_FIPS)
            .filter(|fips| !self.held.contains_key(*fips))
            .collect()
    }

    /// Merges and drains the buffer once all five boroughs are held.
    ///
    /// Returns `None` while any borough is still missing. The merged region
    /// keeps the primary borough's catalog record.
    pub fn take_merged(
        &mut self,
    ) -> Option<Result<(CountyRecord, Vec<DailyObservation>), AlignmentError>> {
        if !self.is_complete() {
            return None;
        }

        let mut held = std::mem::take(&mut self.held);
        let (primary, primary_series) = held.remove(PRIMARY_BOROUGH_FIPS)?;

        let secondaries: Vec<(&str, &[DailyObservation])> = SECONDARY_BOROUGH_FIPS
            .iter()
            .filter_map(|fips| held.get(*fips).map(|(_, series)| (*fips, series.as_slice())))
            .collect();

        Some(merge_boroughs(&primary_series, &secondaries).map(|merged| (primary, merged)))
    }
}
