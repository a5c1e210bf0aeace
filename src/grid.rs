//bins GPS positions into a square lat/lon grid
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub row: u32,
    pub col: u32,
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.row, self.col)
    }
}

/// Latitude span, western edge and row count a grid is laid out from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpan {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub rows: u32,
}

impl GridSpan {
    /// lat 22..23, lon from 113, 20 rows
    pub const SHENZHEN: Self = Self {
        min_lat: 22.0,
        max_lat: 23.0,
        min_lon: 113.0,
        rows: 20,
    };

    /// tighter span used for trip endings, 15 rows
    pub const SHENZHEN_ENDINGS: Self = Self {
        min_lat: 22.444014,
        max_lat: 22.858081,
        min_lon: 113.749946,
        rows: 15,
    };

    pub fn grid(&self) -> Result<Grid> {
        Grid::with_rows(self.min_lat, self.max_lat, self.min_lon, self.rows)
    }
}

/// Square cells of `cell_size` degrees, counted north and east from
/// (`min_lat`, `min_lon`). The grid has no upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub min_lat: f64,
    pub min_lon: f64,
    pub cell_size: f64,
}

impl Grid {
    pub fn new(min_lat: f64, min_lon: f64, cell_size: f64) -> Result<Self> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(Error::Grid(format!("cell size must be positive, got {cell_size}")));
        }
        Ok(Self {
            min_lat,
            min_lon,
            cell_size,
        })
    }

    /// Cell size chosen so the latitude span is split into `rows` rows.
    pub fn with_rows(min_lat: f64, max_lat: f64, min_lon: f64, rows: u32) -> Result<Self> {
        if rows == 0 || max_lat <= min_lat {
            return Err(Error::Grid(format!(
                "need at least one row over a positive span, got {rows} rows over {min_lat}..{max_lat}"
            )));
        }
        Self::new(min_lat, min_lon, (max_lat - min_lat) / rows as f64)
    }

    //the built-in spans are known to be valid
    fn from_span(span: GridSpan) -> Self {
        Self {
            min_lat: span.min_lat,
            min_lon: span.min_lon,
            cell_size: (span.max_lat - span.min_lat) / span.rows as f64,
        }
    }

    pub fn shenzhen() -> Self {
        Self::from_span(GridSpan::SHENZHEN)
    }

    pub fn shenzhen_endings() -> Self {
        Self::from_span(GridSpan::SHENZHEN_ENDINGS)
    }

    /// `None` when the point lies south or west of the grid origin.
    pub fn cell_of(&self, lat: f64, lon: f64) -> Option<Cell> {
        let row = ((lat - self.min_lat) / self.cell_size).floor();
        let col = ((lon - self.min_lon) / self.cell_size).floor();
        if row < 0.0 || col < 0.0 || !row.is_finite() || !col.is_finite() {
            return None;
        }
        Some(Cell {
            row: row as u32,
            col: col as u32,
        })
    }

    /// Southern edge of a row.
    pub fn row_latitude(&self, row: u32) -> f64 {
        self.min_lat + self.cell_size * row as f64
    }

    pub fn col_longitude(&self, col: u32) -> f64 {
        self.min_lon + self.cell_size * col as f64
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::shenzhen()
    }
}
