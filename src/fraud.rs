//flags trips that are both longer and slower than a threshold
use crate::error::{Error, Result};
use crate::metrics::TripMetrics;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FraudThresholds {
    pub min_distance_km: f64,
    pub min_duration_seconds: f64,
}

impl FraudThresholds {
    /// Mean distance and mean duration of the candidate trips. Trips without a
    /// duration are left out of both means. `None` if nothing is left.
    pub fn mean_of(metrics: &[TripMetrics]) -> Option<Self> {
        let timed: Vec<(f64, f64)> = metrics
            .iter()
            .filter_map(|m| m.duration_seconds.map(|d| (m.distance_km, d)))
            .collect();
        if timed.is_empty() {
            return None;
        }
        let n = timed.len() as f64;
        Some(Self {
            min_distance_km: timed.iter().map(|(km, _)| km).sum::<f64>() / n,
            min_duration_seconds: timed.iter().map(|(_, s)| s).sum::<f64>() / n,
        })
    }

    /// The given thresholds, falling back to `mean_of` for whichever is
    /// missing. The mean is only needed, and only fails, when one is missing.
    pub fn or_mean_of(
        min_distance_km: Option<f64>,
        min_duration_seconds: Option<f64>,
        metrics: &[TripMetrics],
    ) -> Option<Self> {
        if let (Some(min_distance_km), Some(min_duration_seconds)) =
            (min_distance_km, min_duration_seconds)
        {
            return Some(Self {
                min_distance_km,
                min_duration_seconds,
            });
        }
        let mean = Self::mean_of(metrics)?;
        Some(Self {
            min_distance_km: min_distance_km.unwrap_or(mean.min_distance_km),
            min_duration_seconds: min_duration_seconds.unwrap_or(mean.min_duration_seconds),
        })
    }
}

/// Trips at or above both thresholds.
pub fn find_fraud(metrics: &[TripMetrics], thresholds: &FraudThresholds) -> Vec<TripMetrics> {
    let suspected: Vec<TripMetrics> = metrics
        .iter()
        .filter(|m| {
            m.distance_km >= thresholds.min_distance_km
                && m.duration_seconds
                    .is_some_and(|d| d >= thresholds.min_duration_seconds)
        })
        .copied()
        .collect();
    info!(
        "{} of {} routes are at least {:.2} km and {:.0} s long",
        suspected.len(),
        metrics.len(),
        thresholds.min_distance_km,
        thresholds.min_duration_seconds
    );
    suspected
}

/// One route number per line.
pub fn write_route_numbers<W: Write>(mut writer: W, numbers: &[u64]) -> Result<()> {
    for number in numbers {
        writeln!(writer, "{number}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_route_numbers<R: BufRead>(reader: R) -> Result<Vec<u64>> {
    let mut numbers = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        numbers.push(
            line.parse::<u64>()
                .map_err(|_| Error::RouteNumber(line.to_string()))?,
        );
    }
    Ok(numbers)
}
