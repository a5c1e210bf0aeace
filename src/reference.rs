//reference routes traced from Google Maps, used as a baseline when plotting,
//and the grid cell exports for them and for trips
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::trips::Trip;
use serde::Serialize;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

pub const AIR_TRAIN_ROUTES: [&str; 4] = [
    "BottomRoute.csv",
    "MiddleRoute.csv",
    "TopRoute.csv",
    "TrainToAirMiddle.csv",
];

pub const NORTH_WEST_TRAIN_ROUTES: [&str; 5] = [
    "North-Train-To-West-Left-Google-Maps-Route.csv",
    "North-Train-To-West-Middle-Google-Maps-Route.csv",
    "West-Train-To-North-Bottom-Google-Maps-Route.csv",
    "West-Train-To-North-Middle-Google-Maps-Route.csv",
    "West-Train-To-North-Top-Google-Maps-Route.csv",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRoute {
    pub name: String,
    pub points: Vec<(f64, f64)>, //(lat, lon)
}

impl ReferenceRoute {
    pub fn lon_lat(&self) -> Vec<(f64, f64)> {
        self.points.iter().map(|(lat, lon)| (*lon, *lat)).collect()
    }
}

/// Two columns, latitude then longitude, after a header row whose names are
/// not used.
pub fn read_reference_route<R: Read>(name: &str, reader: R) -> Result<ReferenceRoute> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let mut points = Vec::new();

    for (index, row) in reader.records().enumerate() {
        let row = row?;
        let line = row
            .position()
            .map(|p| p.line())
            .unwrap_or(index as u64 + 2);
        let coordinate = |column: usize| -> Result<f64> {
            let raw = row.get(column).ok_or(Error::MissingColumn { line, column })?;
            raw.trim().parse::<f64>().map_err(|_| Error::InvalidValue {
                line,
                column,
                raw: raw.to_string(),
            })
        };
        points.push((coordinate(0)?, coordinate(1)?));
    }

    Ok(ReferenceRoute {
        name: name.to_string(),
        points,
    })
}

pub fn load_reference_routes<S: AsRef<str>>(dir: &Path, names: &[S]) -> Result<Vec<ReferenceRoute>> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name.as_ref());
            let file = std::fs::File::open(&path).map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?;
            let route = read_reference_route(name.as_ref(), std::io::BufReader::new(file))?;
            info!("loaded reference route {} with {} points", name.as_ref(), route.points.len());
            Ok(route)
        })
        .collect()
}

/// `Route.csv` -> `Route-Cells.csv`
pub fn cells_file_name(name: &str) -> String {
    let stem = name.strip_suffix(".csv").unwrap_or(name);
    format!("{stem}-Cells.csv")
}

#[derive(Serialize)]
struct CellRow {
    latitude: f64,
    longitude: f64,
    cell: String,
    row: i64,
    column: i64,
}

impl CellRow {
    fn new(grid: &Grid, latitude: f64, longitude: f64) -> Self {
        match grid.cell_of(latitude, longitude) {
            Some(cell) => Self {
                latitude,
                longitude,
                cell: cell.to_string(),
                row: cell.row as i64,
                column: cell.col as i64,
            },
            None => Self {
                latitude,
                longitude,
                cell: "-1".to_string(),
                row: -1,
                column: -1,
            },
        }
    }
}

#[derive(Serialize)]
struct TripCellRow {
    route_number: u64,
    taxi_id: u64,
    latitude: f64,
    longitude: f64,
    cell: String,
    row: i64,
    column: i64,
}

/// The route's points with the grid cell each falls in; `-1` outside the grid.
pub fn write_route_cells<W: Write>(route: &ReferenceRoute, grid: &Grid, writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for (lat, lon) in &route.points {
        writer.serialize(CellRow::new(grid, *lat, *lon))?;
    }
    writer.flush()?;
    Ok(())
}

/// Every reading of every trip with its grid cell, or with `endings_only`
/// just the end row of each trip (trips without one are skipped).
pub fn write_trip_cells<W: Write>(
    trips: &[Trip],
    grid: &Grid,
    endings_only: bool,
    writer: W,
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for trip in trips {
        let rows: Vec<_> = if endings_only {
            trip.end().into_iter().collect()
        } else {
            trip.rows.iter().collect()
        };
        for r in rows {
            let cell = CellRow::new(grid, r.record.latitude, r.record.longitude);
            writer.serialize(TripCellRow {
                route_number: trip.route_number,
                taxi_id: trip.taxi_id,
                latitude: cell.latitude,
                longitude: cell.longitude,
                cell: cell.cell,
                row: cell.row,
                column: cell.column,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}
