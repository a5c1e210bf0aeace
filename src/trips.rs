//trips assembled from labelled pings, and the filters that pick the
//airport/station routes out of them
use crate::error::{Error, Result};
use crate::segmentation::{LabelledRecord, RouteNumber};
use crate::zones::ZoneKind;
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    pub route_number: u64,
    pub taxi_id: u64,
    pub rows: Vec<LabelledRecord>, //sorted by time
}

impl Trip {
    pub fn start(&self) -> Option<&LabelledRecord> {
        self.rows.iter().find(|r| r.route_start)
    }

    pub fn end(&self) -> Option<&LabelledRecord> {
        self.rows.iter().find(|r| r.route_end)
    }

    pub fn start_zone(&self) -> Option<ZoneKind> {
        self.start().and_then(|r| r.start_zone)
    }

    pub fn end_zone(&self) -> Option<ZoneKind> {
        self.end().and_then(|r| r.end_zone)
    }

    pub fn start_time(&self) -> Option<NaiveDateTime> {
        self.start().map(|r| r.record.time)
    }

    pub fn end_time(&self) -> Option<NaiveDateTime> {
        self.end().map(|r| r.record.time)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// (longitude, latitude) pairs in time order
    pub fn lon_lat(&self) -> Vec<(f64, f64)> {
        self.rows
            .iter()
            .map(|r| (r.record.longitude, r.record.latitude))
            .collect()
    }
}

/// Groups labelled pings into trips, in the order each route number first
/// appears. Pings outside any trip are skipped.
pub fn collect_trips(records: &[LabelledRecord]) -> Vec<Trip> {
    let mut position: HashMap<u64, usize> = HashMap::new();
    let mut trips: Vec<Trip> = Vec::new();

    for row in records {
        let RouteNumber::Trip(number) = row.route_number else {
            continue;
        };
        match position.get(&number) {
            Some(&i) => trips[i].rows.push(*row),
            None => {
                position.insert(number, trips.len());
                trips.push(Trip {
                    route_number: number,
                    taxi_id: row.record.taxi_id,
                    rows: vec![*row],
                });
            }
        }
    }

    for trip in trips.iter_mut() {
        trip.rows.sort_by_key(|r| r.record.time);
    }
    trips
}

#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub struct RoutePair {
    pub from: ZoneKind,
    pub to: ZoneKind,
}

impl RoutePair {
    pub const fn new(from: ZoneKind, to: ZoneKind) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for RoutePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.from, self.to)
    }
}

// "airport:train", "bus_station:train_station"
impl FromStr for RoutePair {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (from, to) = s
            .split_once(':')
            .ok_or_else(|| Error::Zone(format!("expected from:to, got {s:?}")))?;
        Ok(Self::new(from.parse()?, to.parse()?))
    }
}

/// Which (start zone, end zone) combinations count as a relevant route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFilter {
    pairs: Vec<RoutePair>,
}

impl RouteFilter {
    pub fn new(pairs: Vec<RoutePair>) -> Self {
        Self { pairs }
    }

    /// airport to train station and back
    pub fn air_train() -> Self {
        Self::new(vec![
            RoutePair::new(ZoneKind::Airport, ZoneKind::TrainStation),
            RoutePair::new(ZoneKind::TrainStation, ZoneKind::Airport),
        ])
    }

    /// airport to bus station and back
    pub fn air_bus() -> Self {
        Self::new(vec![
            RoutePair::new(ZoneKind::Airport, ZoneKind::BusStation),
            RoutePair::new(ZoneKind::BusStation, ZoneKind::Airport),
        ])
    }

    /// airport or bus station to the train station
    pub fn to_train() -> Self {
        Self::new(vec![
            RoutePair::new(ZoneKind::Airport, ZoneKind::TrainStation),
            RoutePair::new(ZoneKind::BusStation, ZoneKind::TrainStation),
        ])
    }

    pub fn pairs(&self) -> &[RoutePair] {
        &self.pairs
    }

    pub fn matches(&self, trip: &Trip) -> bool {
        match (trip.start_zone(), trip.end_zone()) {
            (Some(from), Some(to)) => self.pairs.contains(&RoutePair::new(from, to)),
            _ => false,
        }
    }
}

impl Default for RouteFilter {
    fn default() -> Self {
        Self::air_train()
    }
}

pub fn relevant_route_numbers(trips: &[Trip], filter: &RouteFilter) -> Vec<u64> {
    let numbers: Vec<u64> = trips
        .iter()
        .filter(|t| filter.matches(t))
        .map(|t| t.route_number)
        .collect();
    info!(
        "found {} relevant routes out of {} trips",
        numbers.len(),
        trips.len()
    );
    numbers
}

/// Rows belonging to any of the given routes, input order preserved.
pub fn select_routes(records: &[LabelledRecord], numbers: &[u64]) -> Vec<LabelledRecord> {
    let numbers: HashSet<u64> = numbers.iter().copied().collect();
    records
        .iter()
        .filter(|r| r.route_number.trip().is_some_and(|n| numbers.contains(&n)))
        .copied()
        .collect()
}

pub fn select_trips(trips: Vec<Trip>, numbers: &[u64]) -> Vec<Trip> {
    let numbers: HashSet<u64> = numbers.iter().copied().collect();
    trips
        .into_iter()
        .filter(|t| numbers.contains(&t.route_number))
        .collect()
}

pub fn routes_with_min_readings(trips: Vec<Trip>, min_readings: usize) -> Vec<Trip> {
    let kept: Vec<Trip> = trips
        .into_iter()
        .filter(|trip| {
            let enough = trip.len() >= min_readings;
            if !enough {
                debug!(
                    "route {} only has {} readings",
                    trip.route_number,
                    trip.len()
                );
            }
            enough
        })
        .collect();
    info!(
        "found {} routes that have {} or more readings",
        kept.len(),
        min_readings
    );
    kept
}
