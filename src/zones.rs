//fixed geographic zones (airport, train and bus stations) and the helpers that
//filter pings against them
use crate::error::{Error, Result};
use crate::records::GpsRecord;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::RTree;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Axis aligned lat/lon box, inclusive on every edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub const fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    pub fn around(lat: f64, lon: f64, lat_diff: f64, lon_diff: f64) -> Self {
        Self::new(lat - lat_diff, lat + lat_diff, lon - lon_diff, lon + lon_diff)
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.min_lat <= lat && lat <= self.max_lat && self.min_lon <= lon && lon <= self.max_lon
    }

    pub fn is_valid(&self) -> bool {
        self.min_lat <= self.max_lat && self.min_lon <= self.max_lon
    }

    //x = lon, y = lat
    fn rectangle(&self) -> Rectangle<[f64; 2]> {
        Rectangle::from_corners([self.min_lon, self.min_lat], [self.max_lon, self.max_lat])
    }
}

/// Tight box around Bao'an airport used to pre-filter readings.
pub const AIRPORT_FILTER: BoundingBox =
    BoundingBox::new(22.606742, 22.627078, 113.804928, 113.827262);
/// Tight box around Shenzhen North station.
pub const NORTH_TRAIN_FILTER: BoundingBox =
    BoundingBox::new(22.605502, 22.613580, 114.023724, 114.034568);
pub const WEST_TRAIN_CENTER: (f64, f64) = (22.5316, 113.903);
pub const WEST_TRAIN_RADIUS: f64 = 0.025;

pub fn west_train_filter() -> BoundingBox {
    BoundingBox::around(
        WEST_TRAIN_CENTER.0,
        WEST_TRAIN_CENTER.1,
        WEST_TRAIN_RADIUS,
        WEST_TRAIN_RADIUS,
    )
}

#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    Airport,
    TrainStation,
    BusStation,
}

impl ZoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneKind::Airport => "airport",
            ZoneKind::TrainStation => "train_station",
            ZoneKind::BusStation => "bus_station",
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "airport" | "air" => Ok(ZoneKind::Airport),
            "train_station" | "train" => Ok(ZoneKind::TrainStation),
            "bus_station" | "bus" => Ok(ZoneKind::BusStation),
            other => Err(Error::Zone(format!("unknown zone kind {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub kind: ZoneKind,
    pub bounds: BoundingBox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ZoneConfig {
    zones: Vec<Zone>,
}

type IndexedZone = GeomWithData<Rectangle<[f64; 2]>, usize>;

fn build_index(zones: &[Zone]) -> RTree<IndexedZone> {
    RTree::bulk_load(
        zones
            .iter()
            .enumerate()
            .map(|(i, zone)| GeomWithData::new(zone.bounds.rectangle(), i))
            .collect(),
    )
}

/// Zones indexed by their bounding boxes. When zones overlap, the one
/// declared first wins.
#[derive(Debug, Clone)]
pub struct ZoneSet {
    zones: Vec<Zone>,
    index: RTree<IndexedZone>,
}

impl ZoneSet {
    pub fn new(zones: Vec<Zone>) -> Result<Self> {
        if zones.is_empty() {
            return Err(Error::Zone("no zones configured".to_string()));
        }
        if let Some(bad) = zones.iter().find(|z| !z.bounds.is_valid()) {
            return Err(Error::Zone(format!("zone {} has inverted bounds", bad.name)));
        }

        let index = build_index(&zones);
        Ok(Self { zones, index })
    }

    pub fn shenzhen() -> Self {
        let zones = vec![
            Zone {
                name: "Shenzhen Bao'an International Airport".to_string(),
                kind: ZoneKind::Airport,
                bounds: BoundingBox::new(22.605770, 22.667089, 113.784647, 113.837340),
            },
            Zone {
                name: "Shenzhen North Railway Station".to_string(),
                kind: ZoneKind::TrainStation,
                bounds: BoundingBox::new(22.604998, 22.614221, 114.021111, 114.034778),
            },
            Zone {
                name: "Futian Bus Station".to_string(),
                kind: ZoneKind::BusStation,
                bounds: BoundingBox::new(22.567210, 22.568807, 114.089676, 114.091320),
            },
        ];
        let index = build_index(&zones);
        Self { zones, index }
    }

    pub fn from_json<R: Read>(reader: R) -> Result<Self> {
        let config: ZoneConfig = serde_json::from_reader(reader)?;
        Self::new(config.zones)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let zones = Self::from_json(std::io::BufReader::new(file))?;
        info!("loaded {} zones from {}", zones.len(), path.display());
        Ok(zones)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&ZoneConfig {
            zones: self.zones.clone(),
        })?)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn zone_at(&self, lat: f64, lon: f64) -> Option<&Zone> {
        self.index
            .locate_all_at_point(&[lon, lat])
            .map(|hit| hit.data)
            .min()
            .map(|i| &self.zones[i])
    }

    pub fn kind_at(&self, lat: f64, lon: f64) -> Option<ZoneKind> {
        self.zone_at(lat, lon).map(|zone| zone.kind)
    }

    /// Is the point inside any zone of this kind, regardless of overlap order.
    pub fn near(&self, kind: ZoneKind, lat: f64, lon: f64) -> bool {
        self.index
            .locate_all_at_point(&[lon, lat])
            .any(|hit| self.zones[hit.data].kind == kind)
    }
}

impl Default for ZoneSet {
    fn default() -> Self {
        Self::shenzhen()
    }
}

/// Unique taxi ids in the order they first appear.
pub fn taxi_ids(records: &[GpsRecord]) -> Vec<u64> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert(r.taxi_id))
        .map(|r| r.taxi_id)
        .collect()
}

/// Readings inside `bounds`, optionally only those with a passenger.
pub fn readings_within(
    records: &[GpsRecord],
    bounds: &BoundingBox,
    with_passenger: bool,
) -> Vec<GpsRecord> {
    let inside: Vec<GpsRecord> = records
        .iter()
        .filter(|r| bounds.contains(r.latitude, r.longitude))
        .copied()
        .collect();
    info!(
        "{} of {} GPS readings ({} taxis) fall inside the box, {} taxis inside",
        inside.len(),
        records.len(),
        taxi_ids(records).len(),
        taxi_ids(&inside).len()
    );

    if !with_passenger {
        return inside;
    }

    let occupied: Vec<GpsRecord> = inside.into_iter().filter(|r| r.occupied).collect();
    info!(
        "{} readings inside the box carry a passenger, from {} taxis",
        occupied.len(),
        taxi_ids(&occupied).len()
    );
    occupied
}

/// Every reading of the given taxis.
pub fn records_for_taxis(records: &[GpsRecord], ids: &[u64]) -> Vec<GpsRecord> {
    let ids: HashSet<u64> = ids.iter().copied().collect();
    records
        .iter()
        .filter(|r| ids.contains(&r.taxi_id))
        .copied()
        .collect()
}

/// Taxis seen inside `area` (and also inside `and_area` when given), together
/// with every reading of those taxis, wherever it was taken.
pub fn taxis_seen_within(
    records: &[GpsRecord],
    area: &BoundingBox,
    and_area: Option<&BoundingBox>,
    with_passenger: bool,
) -> (Vec<u64>, Vec<GpsRecord>) {
    let inside = readings_within(records, area, with_passenger);
    let ids = match and_area {
        Some(other) => taxis_in_both(&inside, &readings_within(records, other, with_passenger)),
        None => taxi_ids(&inside),
    };
    let readings = records_for_taxis(records, &ids);
    info!(
        "{} taxis matched, {} of their readings kept",
        ids.len(),
        readings.len()
    );
    (ids, readings)
}

/// Taxis that appear in both reading sets, in first-seen order of `a`.
pub fn taxis_in_both(a: &[GpsRecord], b: &[GpsRecord]) -> Vec<u64> {
    let in_b: HashSet<u64> = b.iter().map(|r| r.taxi_id).collect();
    taxi_ids(a)
        .into_iter()
        .filter(|id| in_b.contains(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn ping(taxi_id: u64, lat: f64, lon: f64, occupied: bool) -> GpsRecord {
        GpsRecord {
            taxi_id,
            time: NaiveDate::from_ymd_opt(2014, 4, 6)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            longitude: lon,
            latitude: lat,
            speed: 0.0,
            direction: 0.0,
            occupied,
        }
    }

    #[test]
    fn shenzhen_zones() {
        let zones = ZoneSet::shenzhen();
        assert_eq!(zones.kind_at(22.62, 113.81), Some(ZoneKind::Airport));
        assert_eq!(zones.kind_at(22.61, 114.03), Some(ZoneKind::TrainStation));
        assert_eq!(zones.kind_at(22.568, 114.09), Some(ZoneKind::BusStation));
        assert_eq!(zones.kind_at(22.54, 114.05), None);
    }

    #[test]
    fn edges_are_inclusive() {
        let zones = ZoneSet::shenzhen();
        assert_eq!(zones.kind_at(22.605770, 113.784647), Some(ZoneKind::Airport));
        assert_eq!(zones.kind_at(22.667089, 113.837340), Some(ZoneKind::Airport));
        assert_eq!(zones.kind_at(22.667090, 113.837340), None);
        assert!(zones.near(ZoneKind::TrainStation, 22.614221, 114.034778));
        assert!(!zones.near(ZoneKind::Airport, 22.614221, 114.034778));
    }

    #[test]
    fn overlapping_zones_pick_first_declared() {
        let zones = ZoneSet::new(vec![
            Zone {
                name: "a".into(),
                kind: ZoneKind::TrainStation,
                bounds: BoundingBox::new(0.0, 2.0, 0.0, 2.0),
            },
            Zone {
                name: "b".into(),
                kind: ZoneKind::Airport,
                bounds: BoundingBox::new(1.0, 3.0, 1.0, 3.0),
            },
        ])
        .unwrap();
        assert_eq!(zones.kind_at(1.5, 1.5), Some(ZoneKind::TrainStation));
        assert!(zones.near(ZoneKind::Airport, 1.5, 1.5));
        assert_eq!(zones.kind_at(2.5, 2.5), Some(ZoneKind::Airport));
    }

    #[test]
    fn json_round_trip_and_validation() {
        let json = ZoneSet::shenzhen().to_json().unwrap();
        let zones = ZoneSet::from_json(json.as_bytes()).unwrap();
        assert_eq!(zones.len(), 3);
        assert_eq!(zones.zones()[0].kind, ZoneKind::Airport);

        assert!(ZoneSet::from_json(r#"{"zones": []}"#.as_bytes()).is_err());
        let inverted = r#"{"zones": [{"name": "x", "kind": "bus_station",
            "bounds": {"min_lat": 2.0, "max_lat": 1.0, "min_lon": 0.0, "max_lon": 1.0}}]}"#;
        assert!(matches!(
            ZoneSet::from_json(inverted.as_bytes()),
            Err(Error::Zone(_))
        ));
    }

    #[test]
    fn kind_from_str() {
        assert_eq!("train".parse::<ZoneKind>().unwrap(), ZoneKind::TrainStation);
        assert_eq!("Airport".parse::<ZoneKind>().unwrap(), ZoneKind::Airport);
        assert!("harbour".parse::<ZoneKind>().is_err());
    }

    #[test]
    fn filters() {
        let records = vec![
            ping(1, 22.61, 113.81, true),
            ping(2, 22.61, 113.81, false),
            ping(3, 22.61, 114.03, true),
            ping(1, 22.61, 114.03, false),
        ];
        let airport = readings_within(&records, &AIRPORT_FILTER, false);
        assert_eq!(taxi_ids(&airport), vec![1, 2]);
        let airport_with_passenger = readings_within(&records, &AIRPORT_FILTER, true);
        assert_eq!(taxi_ids(&airport_with_passenger), vec![1]);

        let train = readings_within(&records, &NORTH_TRAIN_FILTER, false);
        assert_eq!(taxis_in_both(&airport, &train), vec![1]);
        assert_eq!(records_for_taxis(&records, &[1]).len(), 2);

        let (ids, readings) = taxis_seen_within(&records, &AIRPORT_FILTER, None, true);
        assert_eq!(ids, vec![1]);
        assert_eq!(readings, vec![records[0], records[3]]);
        let (ids, readings) =
            taxis_seen_within(&records, &AIRPORT_FILTER, Some(&NORTH_TRAIN_FILTER), false);
        assert_eq!(ids, vec![1]);
        assert_eq!(readings.len(), 2);
        let (ids, readings) =
            taxis_seen_within(&records, &NORTH_TRAIN_FILTER, Some(&AIRPORT_FILTER), true);
        assert!(ids.is_empty() && readings.is_empty());

        let west = west_train_filter();
        assert!(west.contains(22.5316, 113.903));
        assert!(!west.contains(22.61, 113.81));
    }
}
