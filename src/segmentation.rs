//splits each taxi's occupancy stream into numbered trips
use crate::records::GpsRecord;
use crate::zones::{ZoneKind, ZoneSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Route number of a ping. Pings driven without a passenger belong to no
/// route and are written as `-1`.
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Debug, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum RouteNumber {
    Empty,
    Trip(u64),
}

impl RouteNumber {
    pub fn trip(&self) -> Option<u64> {
        match self {
            RouteNumber::Trip(n) => Some(*n),
            RouteNumber::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RouteNumber::Empty)
    }
}

impl From<RouteNumber> for i64 {
    fn from(v: RouteNumber) -> i64 {
        match v {
            RouteNumber::Empty => -1,
            RouteNumber::Trip(n) => n as i64,
        }
    }
}

impl TryFrom<i64> for RouteNumber {
    type Error = String;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            -1 => Ok(RouteNumber::Empty),
            n if n >= 0 => Ok(RouteNumber::Trip(n as u64)),
            n => Err(format!("invalid route number {n}")),
        }
    }
}

impl fmt::Display for RouteNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", i64::from(*self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelledRecord {
    pub record: GpsRecord,
    pub route_number: RouteNumber,
    pub route_start: bool,
    pub route_end: bool,
    pub start_zone: Option<ZoneKind>, //only set on the start row
    pub end_zone: Option<ZoneKind>,   //only set on the end row
}

impl LabelledRecord {
    fn empty(record: GpsRecord) -> Self {
        Self {
            record,
            route_number: RouteNumber::Empty,
            route_start: false,
            route_end: false,
            start_zone: None,
            end_zone: None,
        }
    }

    fn within(record: GpsRecord, route_number: u64) -> Self {
        Self {
            route_number: RouteNumber::Trip(route_number),
            ..Self::empty(record)
        }
    }

    fn start(record: GpsRecord, route_number: u64, zone: Option<ZoneKind>) -> Self {
        Self {
            route_start: true,
            start_zone: zone,
            ..Self::within(record, route_number)
        }
    }

    fn end(record: GpsRecord, route_number: u64, zone: Option<ZoneKind>) -> Self {
        Self {
            route_end: true,
            end_zone: zone,
            ..Self::within(record, route_number)
        }
    }

    pub fn is_relevant_start(&self) -> bool {
        self.start_zone.is_some()
    }

    pub fn is_relevant_end(&self) -> bool {
        self.end_zone.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentOptions {
    /// keep pings that belong to no trip (route number -1)
    pub keep_empty: bool,
    /// log progress every n taxis, 0 disables
    pub progress_every: usize,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            keep_empty: true,
            progress_every: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segmented {
    pub records: Vec<LabelledRecord>,
    /// first route number not handed out, pass it to the next call
    pub next_route_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaxiState {
    Idle,
    Carrying,
}

/// Groups pings by taxi, keeping the order in which taxis first appear.
pub fn group_by_taxi(records: &[GpsRecord]) -> Vec<(u64, Vec<GpsRecord>)> {
    let mut position: HashMap<u64, usize> = HashMap::new();
    let mut groups: Vec<(u64, Vec<GpsRecord>)> = Vec::new();
    for record in records {
        match position.get(&record.taxi_id) {
            Some(&i) => groups[i].1.push(*record),
            None => {
                position.insert(record.taxi_id, groups.len());
                groups.push((record.taxi_id, vec![*record]));
            }
        }
    }
    groups
}

/// Labels every ping with the trip it belongs to.
///
/// A trip starts at the first occupied ping after an unoccupied stretch and
/// ends at the first unoccupied ping after that; the end ping is part of the
/// trip. Trip numbers start at `first_route_number` and are never shared
/// between taxis. A trip still running when a taxi's pings run out keeps its
/// start row, has no end row, and its number is not reused.
pub fn label_trajectories(
    records: &[GpsRecord],
    first_route_number: u64,
    zones: &ZoneSet,
    options: &SegmentOptions,
) -> Segmented {
    let by_taxi = group_by_taxi(records);
    let taxi_count = by_taxi.len();
    info!("there are {} unique taxi ids in this data", taxi_count);

    let mut output = Vec::with_capacity(records.len());
    let mut route_number = first_route_number;

    for (completed, (taxi_id, mut pings)) in by_taxi.into_iter().enumerate() {
        pings.sort_by_key(|p| p.time);
        route_number = label_taxi(
            taxi_id,
            &pings,
            route_number,
            zones,
            options.keep_empty,
            &mut output,
        );

        if options.progress_every > 0 && (completed + 1) % options.progress_every == 0 {
            info!("completed {} taxi ids out of {}", completed + 1, taxi_count);
        }
    }

    debug_assert!(!options.keep_empty || output.len() == records.len());
    debug_assert!(output.iter().all(|r| match r.route_number {
        RouteNumber::Trip(n) => (first_route_number..route_number).contains(&n),
        RouteNumber::Empty => !r.route_start && !r.route_end,
    }));

    Segmented {
        records: output,
        next_route_number: route_number,
    }
}

fn label_taxi(
    taxi_id: u64,
    pings: &[GpsRecord],
    mut route_number: u64,
    zones: &ZoneSet,
    keep_empty: bool,
    output: &mut Vec<LabelledRecord>,
) -> u64 {
    let mut state = TaxiState::Idle;

    for ping in pings {
        let labelled = match (state, ping.occupied) {
            (TaxiState::Carrying, true) => LabelledRecord::within(*ping, route_number),
            (TaxiState::Carrying, false) => {
                state = TaxiState::Idle;
                let zone = zones.kind_at(ping.latitude, ping.longitude);
                let end = LabelledRecord::end(*ping, route_number, zone);
                route_number += 1;
                end
            }
            (TaxiState::Idle, true) => {
                state = TaxiState::Carrying;
                let zone = zones.kind_at(ping.latitude, ping.longitude);
                LabelledRecord::start(*ping, route_number, zone)
            }
            (TaxiState::Idle, false) => {
                if !keep_empty {
                    continue;
                }
                LabelledRecord::empty(*ping)
            }
        };
        output.push(labelled);
    }

    if state == TaxiState::Carrying {
        debug!(
            "taxi {} ran out of readings during route {}",
            taxi_id, route_number
        );
        route_number += 1;
    }

    route_number
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use pretty_assertions::assert_eq;

    fn at(second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2014, 4, 6)
            .unwrap()
            .and_hms_opt(8, second / 60, second % 60)
            .unwrap()
    }

    fn ping(taxi_id: u64, second: u32, occupied: bool) -> GpsRecord {
        GpsRecord {
            taxi_id,
            time: at(second),
            longitude: 114.2,
            latitude: 22.7,
            speed: 30.0,
            direction: 0.0,
            occupied,
        }
    }

    fn ping_at(taxi_id: u64, second: u32, occupied: bool, lat: f64, lon: f64) -> GpsRecord {
        GpsRecord {
            latitude: lat,
            longitude: lon,
            ..ping(taxi_id, second, occupied)
        }
    }

    fn numbers(seg: &Segmented) -> Vec<i64> {
        seg.records
            .iter()
            .map(|r| i64::from(r.route_number))
            .collect()
    }

    #[test]
    fn single_taxi_two_trips() {
        let pings = vec![
            ping(7, 0, false),
            ping(7, 10, true),
            ping(7, 20, true),
            ping(7, 30, false),
            ping(7, 40, false),
            ping(7, 50, true),
            ping(7, 60, false),
        ];
        let seg = label_trajectories(&pings, 1, &ZoneSet::shenzhen(), &SegmentOptions::default());
        assert_eq!(numbers(&seg), vec![-1, 1, 1, 1, -1, 2, 2]);
        assert_eq!(
            seg.records.iter().map(|r| r.route_start).collect::<Vec<_>>(),
            vec![false, true, false, false, false, true, false]
        );
        assert_eq!(
            seg.records.iter().map(|r| r.route_end).collect::<Vec<_>>(),
            vec![false, false, false, true, false, false, true]
        );
        assert_eq!(seg.next_route_number, 3);
    }

    #[test]
    fn pings_are_sorted_by_time_per_taxi() {
        let pings = vec![ping(7, 30, false), ping(7, 10, true), ping(7, 0, false)];
        let seg = label_trajectories(&pings, 1, &ZoneSet::shenzhen(), &SegmentOptions::default());
        assert_eq!(
            seg.records.iter().map(|r| r.record.time).collect::<Vec<_>>(),
            vec![at(0), at(10), at(30)]
        );
        assert_eq!(numbers(&seg), vec![-1, 1, 1]);
    }

    #[test]
    fn numbering_continues_across_taxis_and_calls() {
        let pings = vec![
            ping(1, 0, true),
            ping(2, 0, true),
            ping(1, 10, false),
            ping(2, 10, false),
        ];
        let seg = label_trajectories(&pings, 40, &ZoneSet::shenzhen(), &SegmentOptions::default());
        //taxi 1 is seen first so it is labelled first
        assert_eq!(numbers(&seg), vec![40, 40, 41, 41]);
        assert_eq!(
            seg.records.iter().map(|r| r.record.taxi_id).collect::<Vec<_>>(),
            vec![1, 1, 2, 2]
        );

        let next = label_trajectories(
            &[ping(3, 0, true), ping(3, 5, false)],
            seg.next_route_number,
            &ZoneSet::shenzhen(),
            &SegmentOptions::default(),
        );
        assert_eq!(numbers(&next), vec![42, 42]);
    }

    #[test]
    fn open_trip_number_is_not_reused() {
        let pings = vec![
            ping(1, 0, true),
            ping(1, 10, true),
            ping(2, 0, true),
            ping(2, 10, false),
        ];
        let seg = label_trajectories(&pings, 1, &ZoneSet::shenzhen(), &SegmentOptions::default());
        assert_eq!(numbers(&seg), vec![1, 1, 2, 2]);
        assert!(seg.records[..2].iter().all(|r| !r.route_end));
        assert_eq!(seg.next_route_number, 3);
    }

    #[test]
    fn dropping_empty_rows() {
        let pings = vec![
            ping(1, 0, false),
            ping(1, 10, true),
            ping(1, 20, false),
            ping(1, 30, false),
        ];
        let options = SegmentOptions {
            keep_empty: false,
            ..SegmentOptions::default()
        };
        let seg = label_trajectories(&pings, 1, &ZoneSet::shenzhen(), &options);
        assert_eq!(numbers(&seg), vec![1, 1]);
    }

    #[test]
    fn endpoints_are_tagged_with_zones() {
        let pings = vec![
            ping_at(5, 0, true, 22.62, 113.81),   //airport
            ping_at(5, 60, true, 22.60, 113.95),  //on the way
            ping_at(5, 120, false, 22.61, 114.03), //north station
        ];
        let seg = label_trajectories(&pings, 1, &ZoneSet::shenzhen(), &SegmentOptions::default());
        assert_eq!(seg.records[0].start_zone, Some(ZoneKind::Airport));
        assert!(seg.records[0].is_relevant_start());
        assert_eq!(seg.records[1].start_zone, None);
        assert_eq!(seg.records[1].end_zone, None);
        assert_eq!(seg.records[2].end_zone, Some(ZoneKind::TrainStation));
        assert!(seg.records[2].is_relevant_end());
        assert_eq!(seg.records[2].start_zone, None);
    }

    #[test]
    fn route_number_serialisation() {
        assert_eq!(i64::from(RouteNumber::Empty), -1);
        assert_eq!(RouteNumber::try_from(-1).unwrap(), RouteNumber::Empty);
        assert_eq!(RouteNumber::try_from(12).unwrap(), RouteNumber::Trip(12));
        assert!(RouteNumber::try_from(-2).is_err());
        assert_eq!(RouteNumber::Trip(9).to_string(), "9");
        assert_eq!(serde_json::to_string(&RouteNumber::Empty).unwrap(), "-1");
    }
}
