//raw taxi GPS pings and the loaders for the Shenzhen exports
use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

const TIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsRecord {
    pub taxi_id: u64,
    pub time: NaiveDateTime,
    pub longitude: f64,
    pub latitude: f64,
    pub speed: f64,
    pub direction: f64,
    pub occupied: bool, //passenger in the taxi
}

/// Zero based column positions of the fields we read from a raw export.
///
/// The exports carry a header row but the names are not stable between dumps,
/// so columns are picked by position and the header is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub longitude: usize,
    pub latitude: usize,
    pub time: usize,
    pub taxi_id: usize,
    pub speed: usize,
    pub direction: usize,
    pub occupancy: usize,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            longitude: 3,
            latitude: 4,
            time: 5,
            taxi_id: 6,
            speed: 7,
            direction: 8,
            occupancy: 12,
        }
    }
}

impl FromStr for ColumnLayout {
    type Err = Error;

    //order: longitude,latitude,time,taxi_id,speed,direction,occupancy
    fn from_str(s: &str) -> Result<Self> {
        let positions = s
            .split(',')
            .map(|p| p.trim().parse::<usize>())
            .collect::<std::result::Result<Vec<usize>, _>>()
            .map_err(|_| Error::ColumnLayout(s.to_string()))?;

        match positions.as_slice() {
            &[longitude, latitude, time, taxi_id, speed, direction, occupancy] => Ok(Self {
                longitude,
                latitude,
                time,
                taxi_id,
                speed,
                direction,
                occupancy,
            }),
            _ => Err(Error::ColumnLayout(s.to_string())),
        }
    }
}

impl ColumnLayout {
    fn named(&self) -> [(&'static str, usize); 7] {
        [
            ("longitude", self.longitude),
            ("latitude", self.latitude),
            ("time", self.time),
            ("taxi_id", self.taxi_id),
            ("speed", self.speed),
            ("direction", self.direction),
            ("occupancy_status", self.occupancy),
        ]
    }

    /// Number of columns a row needs to hold every field.
    pub fn width(&self) -> usize {
        self.named().iter().map(|(_, i)| i + 1).max().unwrap_or(0)
    }
}

/// Memoises timestamp parsing, the exports repeat the same timestamp text for
/// every taxi reporting in that second.
#[derive(Debug, Default)]
pub struct TimeCache {
    parsed: HashMap<String, NaiveDateTime>,
}

impl TimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, raw: &str) -> Option<NaiveDateTime> {
        if let Some(time) = self.parsed.get(raw) {
            return Some(*time);
        }
        let time = parse_time(raw)?;
        self.parsed.insert(raw.to_owned(), time);
        Some(time)
    }

    pub fn len(&self) -> usize {
        self.parsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }
}

pub fn parse_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

/// Full path of an input file: `base` + `sub_directories` + `file_name`.
/// `sub_directories` may carry leading/trailing slashes (`/2014-04-06/`).
pub fn data_path(base: &Path, sub_directories: &str, file_name: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in sub_directories.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path.push(file_name);
    path
}

/// `part-m-00000`, `part-m-00001`, ...
pub fn part_file_name(index: usize) -> String {
    format!("part-m-{index:05}")
}

pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim() {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        other => other
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v != 0.0),
    }
}

fn field<'a>(record: &'a StringRecord, line: u64, column: usize) -> Result<&'a str> {
    record
        .get(column)
        .ok_or(Error::MissingColumn { line, column })
}

fn parse_field<T: FromStr>(record: &StringRecord, line: u64, column: usize) -> Result<T> {
    let raw = field(record, line, column)?;
    raw.trim().parse::<T>().map_err(|_| Error::InvalidValue {
        line,
        column,
        raw: raw.to_string(),
    })
}

//speed and direction are blank on some pings
fn parse_optional_f64(record: &StringRecord, line: u64, column: usize) -> Result<f64> {
    let raw = field(record, line, column)?;
    if raw.trim().is_empty() {
        return Ok(0.0);
    }
    parse_field(record, line, column)
}

pub fn read_records<R: Read>(reader: R, layout: &ColumnLayout) -> Result<Vec<GpsRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let mut times = TimeCache::new();
    let mut records = Vec::new();

    for (index, row) in reader.records().enumerate() {
        let row = row?;
        let line = row
            .position()
            .map(|p| p.line())
            .unwrap_or(index as u64 + 2);

        let raw_time = field(&row, line, layout.time)?;
        let time = times.get(raw_time).ok_or_else(|| Error::Timestamp {
            line,
            raw: raw_time.to_string(),
        })?;

        let raw_occupancy = field(&row, line, layout.occupancy)?;
        let occupied = parse_flag(raw_occupancy).ok_or_else(|| Error::InvalidValue {
            line,
            column: layout.occupancy,
            raw: raw_occupancy.to_string(),
        })?;

        records.push(GpsRecord {
            taxi_id: parse_field(&row, line, layout.taxi_id)?,
            time,
            longitude: parse_field(&row, line, layout.longitude)?,
            latitude: parse_field(&row, line, layout.latitude)?,
            speed: parse_optional_f64(&row, line, layout.speed)?,
            direction: parse_optional_f64(&row, line, layout.direction)?,
            occupied,
        });
    }

    Ok(records)
}

pub fn load_records(path: &Path, layout: &ColumnLayout) -> Result<Vec<GpsRecord>> {
    let file = std::fs::File::open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let records = read_records(std::io::BufReader::new(file), layout)?;
    info!("loaded {} GPS readings from {}", records.len(), path.display());
    Ok(records)
}

/// Writes pings in a raw export layout so `read_records` with the same layout
/// reads them back. Columns the layout does not use are left blank.
pub fn write_records<W: Write>(
    writer: W,
    records: &[GpsRecord],
    layout: &ColumnLayout,
) -> Result<()> {
    let width = layout.width();
    let mut writer = csv::Writer::from_writer(writer);

    let mut header = vec![""; width];
    for (name, i) in layout.named() {
        header[i] = name;
    }
    writer.write_record(&header)?;

    for r in records {
        let mut row = vec![String::new(); width];
        row[layout.longitude] = r.longitude.to_string();
        row[layout.latitude] = r.latitude.to_string();
        row[layout.time] = r.time.format(TIME_FORMATS[0]).to_string();
        row[layout.taxi_id] = r.taxi_id.to_string();
        row[layout.speed] = r.speed.to_string();
        row[layout.direction] = r.direction.to_string();
        row[layout.occupancy] = (r.occupied as u8).to_string();
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn save_records(path: &Path, records: &[GpsRecord], layout: &ColumnLayout) -> Result<()> {
    let file = std::fs::File::create(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    write_records(std::io::BufWriter::new(file), records, layout)?;
    info!("wrote {} GPS readings to {}", records.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    const RAW: &str = "a,b,c,longitude,latitude,time,taxi_id,speed,direction,x,y,z,occupancy_status
0,0,0,113.8101,22.6201,2014-04-06 08:00:00,22223,40,90,0,0,0,1
0,0,0,113.8102,22.6202,2014-04-06 08:00:30,22223,,,0,0,0,0
";

    #[test]
    fn reads_default_layout() {
        let records = read_records(RAW.as_bytes(), &ColumnLayout::default()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].taxi_id, 22223);
        assert_eq!(records[0].latitude, 22.6201);
        assert_eq!(records[0].longitude, 113.8101);
        assert!(records[0].occupied);
        assert!(!records[1].occupied);
        assert_eq!(records[1].speed, 0.0);
        assert_eq!(
            records[1].time,
            NaiveDate::from_ymd_opt(2014, 4, 6)
                .unwrap()
                .and_hms_opt(8, 0, 30)
                .unwrap()
        );
    }

    #[test]
    fn written_records_read_back() {
        let records = read_records(RAW.as_bytes(), &ColumnLayout::default()).unwrap();

        let mut buffer = Vec::new();
        write_records(&mut buffer, &records, &ColumnLayout::default()).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert_eq!(
            text.lines().next().unwrap(),
            ",,,longitude,latitude,time,taxi_id,speed,direction,,,,occupancy_status"
        );
        assert_eq!(
            read_records(buffer.as_slice(), &ColumnLayout::default()).unwrap(),
            records
        );

        //a compact layout only needs seven columns
        let compact: ColumnLayout = "0,1,2,3,4,5,6".parse().unwrap();
        assert_eq!(compact.width(), 7);
        let mut buffer = Vec::new();
        write_records(&mut buffer, &records, &compact).unwrap();
        assert_eq!(read_records(buffer.as_slice(), &compact).unwrap(), records);
    }

    #[test]
    fn bad_timestamp_reports_line() {
        let raw = "a,b,c,d,e,f,g,h,i,j,k,l,m
0,0,0,113.8,22.6,yesterday,1,0,0,0,0,0,1
";
        match read_records(raw.as_bytes(), &ColumnLayout::default()) {
            Err(Error::Timestamp { line, raw }) => {
                assert_eq!(line, 2);
                assert_eq!(raw, "yesterday");
            }
            other => panic!("expected timestamp error, got {other:?}"),
        }
    }

    #[test]
    fn short_row_is_missing_column() {
        let raw = "a,b,c,d,e,f,g\n0,0,0,113.8,22.6,2014-04-06 08:00:00,1\n";
        assert!(matches!(
            read_records(raw.as_bytes(), &ColumnLayout::default()),
            Err(Error::MissingColumn { column: 12, .. })
        ));
    }

    #[test]
    fn time_formats() {
        assert!(parse_time("2014-04-06 00:00:05").is_some());
        assert!(parse_time("2014-04-06T00:00:05").is_some());
        assert!(parse_time("2014/04/06 00:00:05").is_some());
        assert!(parse_time("2014-04-06 00:00:05.250").is_some());
        assert!(parse_time("06/04/2014").is_none());
    }

    #[test]
    fn time_cache_reuses_entries() {
        let mut cache = TimeCache::new();
        let a = cache.get("2014-04-06 00:00:05");
        let b = cache.get("2014-04-06 00:00:05");
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("nope").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn paths() {
        assert_eq!(
            data_path(Path::new("/data"), "/2014-04-06/", "part-m-00003"),
            PathBuf::from("/data/2014-04-06/part-m-00003")
        );
        assert_eq!(
            data_path(Path::new("data"), "", "x.csv"),
            PathBuf::from("data/x.csv")
        );
        assert_eq!(part_file_name(0), "part-m-00000");
        assert_eq!(part_file_name(75), "part-m-00075");
    }

    #[test]
    fn layout_from_str() {
        let layout: ColumnLayout = "0,1,2,3,4,5,6".parse().unwrap();
        assert_eq!(layout.occupancy, 6);
        assert_eq!(layout.longitude, 0);
        assert!(matches!(
            "1,2,3".parse::<ColumnLayout>(),
            Err(Error::ColumnLayout(raw)) if raw == "1,2,3"
        ));
        let err = "a,b,c,d,e,f,g".parse::<ColumnLayout>().unwrap_err();
        assert!(matches!(err, Error::ColumnLayout(_)));
        assert!(!err.to_string().contains("line"));
    }

    #[test]
    fn flags() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("True"), Some(true));
        assert_eq!(parse_flag("1.0"), Some(true));
        assert_eq!(parse_flag("maybe"), None);
        assert_eq!(parse_flag("nan"), None);
        assert_eq!(parse_flag("inf"), None);
    }
}
