//! Window averages of daily counts, normalized per capita.

use crate::analyzers::types::{DailyObservation, WeeklyIndicators};

/// Base for confirmed and new-case rates.
pub const CASES_PER: f64 = 100_000.0;

/// Base for death rates.
pub const DEATHS_PER: f64 = 10_000_000.0;

/// Daily death increments; the first day has no predecessor and counts 0.
pub fn daily_death_deltas(observations: &[DailyObservation]) -> Vec<i64> {
    let mut deltas = Vec::with_capacity(observations.len());
    let mut previous: Option<i64> = None;

    for obs in observations {
        deltas.push(previous.map_or(0, |p| obs.deaths - p));
        previous = Some(obs.deaths);
    }

    deltas
}

fn per_capita(average: f64, population: i64, base: f64) -> i64 {
    if population > 0 {
        (average / population as f64 * base).round() as i64
    } else {
        average.round() as i64
    }
}

/// Aggregates `observations` into non-overlapping windows of `window` days.
///
/// Windows are aligned to the most recent day, so an incomplete window at
/// the oldest end is dropped and the output holds `len / window` entries,
/// oldest first. Negative daily values are clamped to zero before summing.
/// With a non-positive `population` the raw rounded averages are returned.
pub fn weekly_indicators(
    observations: &[DailyObservation],
    population: i64,
    window: usize,
) -> WeeklyIndicators {
    let window = window.max(1);
    let windows = observations.len() / window;
    let mut out = WeeklyIndicators {
        confirmed: Vec::with_capacity(windows),
        deaths: Vec::with_capacity(windows),
        new_cases: Vec::with_capacity(windows),
    };

    if windows == 0 {
        return out;
    }

    let new_deaths = daily_death_deltas(observations);
    let start = observations.len() - windows * window;

    for (days, deaths) in observations[start..]
        .chunks_exact(window)
        .zip(new_deaths[start..].chunks_exact(window))
    {
        let confirmed_sum: i64 = days.iter().map(|d| d.confirmed.max(0)).sum();
        let new_cases_sum: i64 = days.iter().map(|d| d.new_cases.max(0)).sum();
        let deaths_sum: i64 = deaths.iter().map(|d| (*d).max(0)).sum();

        let divisor = window as f64;
        out.confirmed
            .push(per_capita(confirmed_sum as f64 / divisor, population, CASES_PER));
        out.deaths
            .push(per_capita(deaths_sum as f64 / divisor, population, DEATHS_PER));
        out.new_cases
            .push(per_capita(new_cases_sum as f64 / divisor, population, CASES_PER));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_example_week_per_100k() {
        let obs = series(&[100; 7], &[0; 7], &[0; 7]);
        let weekly = weekly_indicators(&obs, 100_000, 7);

        assert_eq!(weekly.confirmed, vec![100]);
    }

    #[test]
    fn test_output_length_is_floor_of_len_over_window() {
        for len in 0..40 {
            for window in [1usize, 3, 7, 10] {
                let obs = series(&vec![5; len], &vec![1; len], &vec![2; len]);
                let weekly = weekly_indicators(&obs, 0, window);

                assert_eq!(weekly.confirmed.len(), len / window);
                assert_eq!(weekly.deaths.len(), len / window);
                assert_eq!(weekly.new_cases.len(), len / window);
                assert!(weekly.confirmed.iter().all(|v| *v >= 0));
            }
        }
    }

    #[test]
    fn test_eight_points_drop_oldest_partial_window() {
        // oldest day is a huge outlier; it must not reach the single window
        let mut confirmed = vec![7; 8];
        confirmed[0] = 1_000_000;
        let obs = series(&confirmed, &[0; 8], &[0; 8]);

        let weekly = weekly_indicators(&obs, 0, 7);

        assert_eq!(weekly.confirmed, vec![7]);
    }

    #[test]
    fn test_short_series_is_empty_not_error() {
        let obs = series(&[1; 6], &[0; 6], &[0; 6]);
        assert!(weekly_indicators(&obs, 1000, 7).is_empty());
    }

    #[test]
    fn test_negative_values_are_clamped() {
        let obs = series(&[7, 7, 7, 7, 7, 7, -42], &[0; 7], &[1, 1, 1, 1, 1, 1, -6]);
        let weekly = weekly_indicators(&obs, 0, 7);

        assert_eq!(weekly.confirmed, vec![6]);
        assert_eq!(weekly.new_cases, vec![1]);
    }

    #[test]
    fn test_death_deltas_and_per_10m() {
        // cumulative deaths: 10 per day; a downward correction on day 4
        let deaths: [i64; 7] = [0, 10, 20, 30, 25, 35, 45];
        let deltas = daily_death_deltas(&series(&[0; 7], &deaths, &[0; 7]));
        assert_eq!(deltas, vec![0, 10, 10, 10, -5, 10, 10]);

        let obs = series(&[0; 7], &deaths, &[0; 7]);
        let weekly = weekly_indicators(&obs, 1_000_000, 7);
        // (50 / 7) / 1M * 10M = 71.43
        assert_eq!(weekly.deaths, vec![71]);
    }

    #[test]
    fn test_zero_population_returns_raw_averages() {
        let obs = series(&[10; 14], &[0; 14], &[3; 14]);
        let weekly = weekly_indicators(&obs, 0, 7);

        assert_eq!(weekly.confirmed, vec![10, 10]);
        assert_eq!(weekly.new_cases, vec![3, 3]);
    }

    #[test]
    fn test_windows_ordered_oldest_first() {
        let confirmed: Vec<i64> = (0..14).map(|i| if i < 7 { 1 } else { 2 }).collect();
        let obs = series(&confirmed, &[0; 14], &[0; 14]);

        assert_eq!(weekly_indicators(&obs, 0, 7).confirmed, vec![1, 2]);
    }

    fn series(confirmed: &[i64], deaths: &[i64], new_cases: &[i64]) -> Vec<DailyObservation> {
        let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
        confirmed
            .iter()
            .zip(deaths)
            .zip(new_cases)
            .enumerate()
            .map(|(i, ((c, d), n))| DailyObservation {
                date: start + chrono::Duration::days(i as i64),
                confirmed: *c,
                deaths: *d,
                new_cases: *n,
                population: 0,
            })
            .collect()
    }
}
