//distance and duration of trips, and the cleanup passes that depend on them
use crate::error::Result;
use crate::segmentation::{LabelledRecord, RouteNumber};
use crate::trips::Trip;
use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Read, Write};
use tracing::{info, warn};

pub const DEFAULT_MAX_DISTANCE_KM: f64 = 100.0;

/// Great circle distance between two (lat, lon) pairs in kilometres.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let a = Point::new(a.1, a.0);
    let b = Point::new(b.1, b.0);
    Haversine.distance(a, b).abs() / 1000.0
}

/// Sum of the distances between consecutive pings of the trip.
pub fn route_distance_km(trip: &Trip) -> f64 {
    trip.rows
        .windows(2)
        .map(|w| {
            haversine_km(
                (w[0].record.latitude, w[0].record.longitude),
                (w[1].record.latitude, w[1].record.longitude),
            )
        })
        .sum()
}

/// Seconds between the start and end rows, `None` if either is missing.
pub fn route_duration(trip: &Trip) -> Option<f64> {
    let Some(start) = trip.start_time() else {
        warn!("no start for route {}", trip.route_number);
        return None;
    };
    let Some(end) = trip.end_time() else {
        warn!("no end for route {}", trip.route_number);
        return None;
    };
    if end < start {
        warn!(
            "end time earlier than start time for route {}",
            trip.route_number
        );
    }
    Some((end - start).num_milliseconds() as f64 / 1000.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TripMetrics {
    pub route_number: u64,
    pub taxi_id: u64,
    #[serde(rename = "distance_in_km")]
    pub distance_km: f64,
    #[serde(rename = "duration_in_seconds")]
    pub duration_seconds: Option<f64>,
}

pub fn compute_metrics(trips: &[Trip]) -> Vec<TripMetrics> {
    trips
        .iter()
        .map(|trip| TripMetrics {
            route_number: trip.route_number,
            taxi_id: trip.taxi_id,
            distance_km: route_distance_km(trip),
            duration_seconds: route_duration(trip),
        })
        .collect()
}

/// Drops trips without a start or end row, and trips whose end is not
/// strictly after their start.
pub fn remove_corrupt(trips: Vec<Trip>) -> Vec<Trip> {
    let before = trips.len();
    let kept: Vec<Trip> = trips
        .into_iter()
        .filter(|trip| match (trip.start_time(), trip.end_time()) {
            (Some(start), Some(end)) => start < end,
            (None, _) => {
                warn!("no start for route {}", trip.route_number);
                false
            }
            (_, None) => {
                warn!("no end for route {}", trip.route_number);
                false
            }
        })
        .collect();
    info!(
        "removed {} routes with corrupt start/end times",
        before - kept.len()
    );
    kept
}

/// Keeps trips shorter than `max_km`; longer ones are GPS glitches.
pub fn remove_excessive_distance(trips: Vec<Trip>, max_km: f64) -> Vec<Trip> {
    trips
        .into_iter()
        .filter(|trip| {
            let distance = route_distance_km(trip);
            if distance < max_km {
                true
            } else {
                warn!(
                    "route {} has excessive distance: {:.3} km",
                    trip.route_number, distance
                );
                false
            }
        })
        .collect()
}

/// First row of every route, in input order.
pub fn reduce_to_first_row(records: &[LabelledRecord]) -> Vec<LabelledRecord> {
    let mut seen: HashSet<RouteNumber> = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert(r.route_number))
        .copied()
        .collect()
}

pub fn write_metrics<W: Write>(writer: W, metrics: &[TripMetrics]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in metrics {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_metrics<R: Read>(reader: R) -> Result<Vec<TripMetrics>> {
    let mut reader = csv::Reader::from_reader(reader);
    let metrics = reader
        .deserialize::<TripMetrics>()
        .collect::<std::result::Result<Vec<_>, csv::Error>>()?;
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::GpsRecord;
    use crate::segmentation::{label_trajectories, SegmentOptions};
    use crate::trips::collect_trips;
    use crate::zones::ZoneSet;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn ping(taxi_id: u64, minute: u32, occupied: bool, lat: f64, lon: f64) -> GpsRecord {
        GpsRecord {
            taxi_id,
            time: NaiveDate::from_ymd_opt(2014, 4, 6)
                .unwrap()
                .and_hms_opt(10, minute, 0)
                .unwrap(),
            longitude: lon,
            latitude: lat,
            speed: 0.0,
            direction: 0.0,
            occupied,
        }
    }

    fn trips_of(pings: Vec<GpsRecord>) -> Vec<Trip> {
        let seg = label_trajectories(&pings, 1, &ZoneSet::shenzhen(), &SegmentOptions::default());
        collect_trips(&seg.records)
    }

    #[test]
    fn haversine_known_distance() {
        //one degree of latitude is ~111.2 km
        let d = haversine_km((22.0, 114.0), (23.0, 114.0));
        assert!((d - 111.19).abs() < 0.1, "{d}");
        assert_eq!(haversine_km((22.5, 114.0), (22.5, 114.0)), 0.0);
        assert_eq!(
            haversine_km((22.0, 114.0), (23.0, 114.1)),
            haversine_km((23.0, 114.1), (22.0, 114.0))
        );
    }

    #[test]
    fn distance_and_duration() {
        let trips = trips_of(vec![
            ping(1, 0, true, 22.0, 114.0),
            ping(1, 30, true, 22.5, 114.0),
            ping(1, 45, false, 23.0, 114.0),
        ]);
        let metrics = compute_metrics(&trips);
        assert_eq!(metrics.len(), 1);
        assert!((metrics[0].distance_km - 111.19).abs() < 0.1);
        assert_eq!(metrics[0].duration_seconds, Some(45.0 * 60.0));
    }

    #[test]
    fn corrupt_and_excessive() {
        let trips = trips_of(vec![
            //open trip, no end
            ping(1, 0, true, 22.6, 114.0),
            ping(1, 5, true, 22.6, 114.01),
            //fine, short
            ping(2, 0, true, 22.6, 114.0),
            ping(2, 5, false, 22.6, 114.01),
            //fine, but crosses a whole degree twice
            ping(3, 0, true, 22.0, 114.0),
            ping(3, 5, true, 23.0, 114.0),
            ping(3, 10, false, 22.0, 114.0),
        ]);
        assert_eq!(trips.len(), 3);
        assert_eq!(compute_metrics(&trips)[0].duration_seconds, None);

        let clean = remove_corrupt(trips);
        assert_eq!(
            clean.iter().map(|t| t.taxi_id).collect::<Vec<_>>(),
            vec![2, 3]
        );
        let short = remove_excessive_distance(clean, DEFAULT_MAX_DISTANCE_KM);
        assert_eq!(short.iter().map(|t| t.taxi_id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn excessive_distance_is_strict() {
        let trips = trips_of(vec![
            ping(1, 0, true, 22.6, 114.0),
            ping(1, 5, false, 22.7, 114.0),
        ]);
        let exact = route_distance_km(&trips[0]);
        assert!(remove_excessive_distance(trips.clone(), exact).is_empty());
        assert_eq!(remove_excessive_distance(trips, exact + 1e-9).len(), 1);
    }

    #[test]
    fn zero_length_trip_is_corrupt() {
        let trips = trips_of(vec![ping(1, 0, true, 22.6, 114.0), ping(1, 0, false, 22.6, 114.0)]);
        assert_eq!(trips.len(), 1);
        assert!(remove_corrupt(trips).is_empty());
    }

    #[test]
    fn first_row_per_route() {
        let pings = vec![
            ping(1, 0, false, 22.6, 114.0),
            ping(1, 1, true, 22.6, 114.0),
            ping(1, 2, true, 22.6, 114.0),
            ping(1, 3, false, 22.6, 114.0),
        ];
        let seg = label_trajectories(&pings, 1, &ZoneSet::shenzhen(), &SegmentOptions::default());
        let reduced = reduce_to_first_row(&seg.records);
        assert_eq!(reduced.len(), 2);
        assert_eq!(reduced[1].route_number, RouteNumber::Trip(1));
        assert!(reduced[1].route_start);
    }

    #[test]
    fn metrics_csv() {
        let metrics = vec![
            TripMetrics {
                route_number: 4,
                taxi_id: 9,
                distance_km: 31.5,
                duration_seconds: Some(1800.0),
            },
            TripMetrics {
                route_number: 5,
                taxi_id: 9,
                distance_km: 2.0,
                duration_seconds: None,
            },
        ];
        let mut buffer = Vec::new();
        write_metrics(&mut buffer, &metrics).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("route_number,taxi_id,distance_in_km,duration_in_seconds"));
        assert_eq!(read_metrics(buffer.as_slice()).unwrap(), metrics);
    }
}
