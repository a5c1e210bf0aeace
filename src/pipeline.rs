//runs segmentation over the daily part files and keeps the intermediate csvs
use crate::error::{Error, Result};
use crate::records::{data_path, load_records, parse_time, part_file_name, ColumnLayout, GpsRecord};
use crate::segmentation::{label_trajectories, LabelledRecord, RouteNumber, SegmentOptions};
use crate::trips::{collect_trips, relevant_route_numbers, select_routes, RouteFilter};
use crate::zones::{ZoneKind, ZoneSet};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const ROUTE_COUNTER_FILE: &str = "RouteNumbers.txt";
pub const RELEVANT_FILE: &str = "RelevantTrajectories.csv";
pub const SUMMARY_FILE: &str = "summary.json";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Serialize, Deserialize)]
struct LabelledRow {
    taxi_id: u64,
    time: String,
    longitude: f64,
    latitude: f64,
    speed: f64,
    direction: f64,
    occupancy_status: u8,
    route_number: RouteNumber,
    route_start: bool,
    route_end: bool,
    start_zone: Option<ZoneKind>,
    end_zone: Option<ZoneKind>,
}

impl From<&LabelledRecord> for LabelledRow {
    fn from(r: &LabelledRecord) -> Self {
        Self {
            taxi_id: r.record.taxi_id,
            time: r.record.time.format(TIME_FORMAT).to_string(),
            longitude: r.record.longitude,
            latitude: r.record.latitude,
            speed: r.record.speed,
            direction: r.record.direction,
            occupancy_status: r.record.occupied as u8,
            route_number: r.route_number,
            route_start: r.route_start,
            route_end: r.route_end,
            start_zone: r.start_zone,
            end_zone: r.end_zone,
        }
    }
}

pub fn write_labelled<W: Write>(writer: W, records: &[LabelledRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for record in records {
        writer.serialize(LabelledRow::from(record))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_labelled<R: Read>(reader: R) -> Result<Vec<LabelledRecord>> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();
    let mut records = Vec::new();

    for row in reader.records() {
        let row = row?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        let parsed: LabelledRow = row.deserialize(Some(&headers))?;
        let time = parse_time(&parsed.time).ok_or_else(|| Error::Timestamp {
            line,
            raw: parsed.time.clone(),
        })?;
        records.push(LabelledRecord {
            record: GpsRecord {
                taxi_id: parsed.taxi_id,
                time,
                longitude: parsed.longitude,
                latitude: parsed.latitude,
                speed: parsed.speed,
                direction: parsed.direction,
                occupied: parsed.occupancy_status != 0,
            },
            route_number: parsed.route_number,
            route_start: parsed.route_start,
            route_end: parsed.route_end,
            start_zone: parsed.start_zone,
            end_zone: parsed.end_zone,
        });
    }

    Ok(records)
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufWriter::new(file))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

pub fn save_labelled(path: &Path, records: &[LabelledRecord]) -> Result<()> {
    write_labelled(create(path)?, records)
}

pub fn load_labelled(path: &Path) -> Result<Vec<LabelledRecord>> {
    let records = read_labelled(open(path)?)?;
    info!("loaded {} labelled readings from {}", records.len(), path.display());
    Ok(records)
}

/// Next free route number stored by a previous run, if any.
pub fn read_route_counter(dir: &Path) -> Result<Option<u64>> {
    let path = dir.join(ROUTE_COUNTER_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    let raw = raw.trim();
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| Error::RouteNumber(raw.to_string()))
}

pub fn write_route_counter(dir: &Path, next_route_number: u64) -> Result<()> {
    std::fs::write(dir.join(ROUTE_COUNTER_FILE), next_route_number.to_string())?;
    Ok(())
}

/// What every file of a run shares: where outputs go and how pings are read,
/// labelled and filtered.
#[derive(Debug, Clone)]
pub struct PartConfig {
    pub output_dir: PathBuf,
    pub layout: ColumnLayout,
    pub zones: ZoneSet,
    pub filter: RouteFilter,
    pub options: SegmentOptions,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub data_dir: PathBuf,
    pub sub_directories: String,
    pub file_count: usize,
    pub first_route_number: u64,
    pub part: PartConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub file: String,
    pub readings: usize,
    pub routes: usize,
    pub relevant_routes: usize,
    pub next_route_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub files: Vec<FileSummary>,
    pub readings: usize,
    pub routes: usize,
    pub relevant_routes: usize,
    pub next_route_number: u64,
}

pub struct PartOutcome {
    pub summary: FileSummary,
    pub relevant: Vec<LabelledRecord>,
}

/// Labels one raw file, writes `<name>-With-Trajectories.csv` and the relevant
/// rows as `<name>.csv` into the output dir, and stores the route counter.
pub fn process_part(
    input: &Path,
    name: &str,
    first_route_number: u64,
    config: &PartConfig,
) -> Result<PartOutcome> {
    let output_dir = config.output_dir.as_path();
    let records = load_records(input, &config.layout)?;
    let segmented = label_trajectories(
        &records,
        first_route_number,
        &config.zones,
        &config.options,
    );

    save_labelled(
        &output_dir.join(format!("{name}-With-Trajectories.csv")),
        &segmented.records,
    )?;

    let trips = collect_trips(&segmented.records);
    let numbers = relevant_route_numbers(&trips, &config.filter);
    let relevant = select_routes(&segmented.records, &numbers);
    save_labelled(&output_dir.join(format!("{name}.csv")), &relevant)?;
    write_route_counter(output_dir, segmented.next_route_number)?;

    info!(
        "found {} relevant routes in {}, next route number {}",
        numbers.len(),
        name,
        segmented.next_route_number
    );

    Ok(PartOutcome {
        summary: FileSummary {
            file: name.to_string(),
            readings: records.len(),
            routes: trips.len(),
            relevant_routes: numbers.len(),
            next_route_number: segmented.next_route_number,
        },
        relevant,
    })
}

pub fn run_batch(config: &BatchConfig) -> Result<BatchSummary> {
    let output_dir = config.part.output_dir.as_path();
    std::fs::create_dir_all(output_dir)?;

    let mut route_number = config.first_route_number;
    let mut relevant = Vec::new();
    let mut files = Vec::with_capacity(config.file_count);

    for index in 0..config.file_count {
        let name = part_file_name(index);
        let input = data_path(&config.data_dir, &config.sub_directories, &name);
        let outcome = process_part(&input, &name, route_number, &config.part)?;
        route_number = outcome.summary.next_route_number;
        relevant.extend(outcome.relevant);
        files.push(outcome.summary);
    }

    save_labelled(&output_dir.join(RELEVANT_FILE), &relevant)?;

    let summary = BatchSummary {
        readings: files.iter().map(|f| f.readings).sum(),
        routes: files.iter().map(|f| f.routes).sum(),
        relevant_routes: files.iter().map(|f| f.relevant_routes).sum(),
        next_route_number: route_number,
        files,
    };
    serde_json::to_writer_pretty(create(&output_dir.join(SUMMARY_FILE))?, &summary)?;

    info!(
        "done: {} files, {} readings, {} routes, {} relevant",
        summary.files.len(),
        summary.readings,
        summary.routes,
        summary.relevant_routes
    );
    Ok(summary)
}
