use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not open {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("csv error")]
    Csv(#[from] csv::Error),
    #[error("json error")]
    Json(#[from] serde_json::Error),
    #[error("line {line}: could not parse timestamp {raw:?}")]
    Timestamp { line: u64, raw: String },
    #[error("line {line}: missing column {column}")]
    MissingColumn { line: u64, column: usize },
    #[error("line {line}: invalid value {raw:?} in column {column}")]
    InvalidValue {
        line: u64,
        column: usize,
        raw: String,
    },
    #[error("invalid column layout {0:?}, expected seven positions: longitude,latitude,time,taxi_id,speed,direction,occupancy")]
    ColumnLayout(String),
    #[error("invalid route number {0:?}")]
    RouteNumber(String),
    #[error("invalid zone configuration: {0}")]
    Zone(String),
    #[error("invalid grid: {0}")]
    Grid(String),
    #[error("plotting failed: {0}")]
    Plot(String),
}

pub type Result<T> = std::result::Result<T, Error>;
