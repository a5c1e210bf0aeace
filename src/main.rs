use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use taxi_routes::{
    fraud::{find_fraud, read_route_numbers, write_route_numbers, FraudThresholds},
    grid::GridSpan,
    metrics::{
        compute_metrics, read_metrics, remove_corrupt, remove_excessive_distance, write_metrics,
        DEFAULT_MAX_DISTANCE_KM,
    },
    pipeline::{
        load_labelled, process_part, read_route_counter, run_batch, BatchConfig, PartConfig,
    },
    plot::{
        plot_against_reference, plot_each_against_reference, plot_route, plot_routes, RouteClasses,
    },
    records::{load_records, save_records, ColumnLayout},
    reference::{
        cells_file_name, load_reference_routes, write_route_cells, write_trip_cells,
        AIR_TRAIN_ROUTES, NORTH_WEST_TRAIN_ROUTES,
    },
    trips::{collect_trips, routes_with_min_readings, select_trips, RouteFilter, RoutePair},
    zones::{
        taxis_seen_within, west_train_filter, BoundingBox, ZoneSet, AIRPORT_FILTER,
        NORTH_TRAIN_FILTER,
    },
    SegmentOptions,
};
use tracing::info;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(version, about = "Find airport/station taxi trips in Shenzhen GPS traces", long_about = None)]
struct Args {
    /// log at debug level
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Preset {
    /// airport to train station and back
    AirTrain,
    /// airport to bus station and back
    AirBus,
    /// airport or bus station to the train station
    ToTrain,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ReferenceSet {
    AirTrain,
    NorthWest,
}

impl ReferenceSet {
    fn names(&self) -> &'static [&'static str] {
        match self {
            ReferenceSet::AirTrain => &AIR_TRAIN_ROUTES,
            ReferenceSet::NorthWest => &NORTH_WEST_TRAIN_ROUTES,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FilterBox {
    Airport,
    NorthTrain,
    WestTrain,
}

impl FilterBox {
    fn bounds(&self) -> BoundingBox {
        match self {
            FilterBox::Airport => AIRPORT_FILTER,
            FilterBox::NorthTrain => NORTH_TRAIN_FILTER,
            FilterBox::WestTrain => west_train_filter(),
        }
    }
}

#[derive(clap::Args, Debug)]
struct SegmentArgs {
    /// column positions: longitude,latitude,time,taxi_id,speed,direction,occupancy
    #[arg(long, default_value = "3,4,5,6,7,8,12")]
    columns: ColumnLayout,
    /// json file overriding the built-in Shenzhen zones
    #[arg(long)]
    zones: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Preset::AirTrain)]
    preset: Preset,
    /// explicit from:to route pairs, replaces the preset
    #[arg(long = "route")]
    routes: Vec<RoutePair>,
    /// drop readings that belong to no trip
    #[arg(long, default_value_t = false)]
    drop_empty: bool,
    #[arg(long, default_value_t = 500)]
    progress_every: usize,
}

impl SegmentArgs {
    fn zones(&self) -> Result<ZoneSet> {
        match &self.zones {
            Some(path) => ZoneSet::load(path).context("failed to load zones"),
            None => Ok(ZoneSet::shenzhen()),
        }
    }

    fn filter(&self) -> RouteFilter {
        if !self.routes.is_empty() {
            return RouteFilter::new(self.routes.clone());
        }
        match self.preset {
            Preset::AirTrain => RouteFilter::air_train(),
            Preset::AirBus => RouteFilter::air_bus(),
            Preset::ToTrain => RouteFilter::to_train(),
        }
    }

    fn options(&self) -> SegmentOptions {
        SegmentOptions {
            keep_empty: !self.drop_empty,
            progress_every: self.progress_every,
        }
    }

    fn part(&self, output_dir: PathBuf) -> Result<PartConfig> {
        Ok(PartConfig {
            output_dir,
            layout: self.columns,
            zones: self.zones()?,
            filter: self.filter(),
            options: self.options(),
        })
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Label the trips of a single raw file
    Label {
        input: PathBuf,
        #[arg(long, default_value = ".")]
        output: PathBuf,
        /// first route number, defaults to the counter stored in the output dir
        #[arg(long)]
        first_route: Option<u64>,
        #[command(flatten)]
        segment: SegmentArgs,
    },
    /// Label every part file of a day and collect the relevant trips
    Batch {
        #[arg(long, env = "TAXI_DATA_DIR", default_value = ".")]
        data_dir: PathBuf,
        /// subdirectory of the data dir holding the part files, e.g. /2014-04-06/
        #[arg(long, default_value = "")]
        sub_directories: String,
        #[arg(long, default_value_t = 76)]
        files: usize,
        #[arg(long, default_value = "out")]
        output: PathBuf,
        /// continue numbering from the counter stored in the output dir
        #[arg(long, default_value_t = false)]
        resume: bool,
        #[command(flatten)]
        segment: SegmentArgs,
    },
    /// Readings inside a filter box, and the taxis they came from
    Filter {
        input: PathBuf,
        #[arg(long, value_enum, default_value_t = FilterBox::Airport)]
        area: FilterBox,
        /// only keep taxis also seen inside this second box
        #[arg(long, value_enum)]
        and_area: Option<FilterBox>,
        #[arg(long, default_value_t = false)]
        with_passenger: bool,
        #[arg(long, default_value = "3,4,5,6,7,8,12")]
        columns: ColumnLayout,
        /// write the matching taxi ids here, one per line
        #[arg(long)]
        output: Option<PathBuf>,
        /// write every reading of the matching taxis here, in the input's
        /// column layout, ready for `label`
        #[arg(long)]
        readings_output: Option<PathBuf>,
    },
    /// Distance and duration of each trip in a labelled file
    Metrics {
        input: PathBuf,
        #[arg(long, default_value = "metrics.csv")]
        output: PathBuf,
        #[arg(long, default_value_t = 10)]
        min_readings: usize,
        #[arg(long, default_value_t = DEFAULT_MAX_DISTANCE_KM)]
        max_distance_km: f64,
        /// keep trips with corrupt start/end times or excessive distances
        #[arg(long, default_value_t = false)]
        keep_corrupt: bool,
    },
    /// Flag trips that are both longer and slower than the thresholds
    Fraud {
        metrics: PathBuf,
        /// defaults to the mean distance of the trips
        #[arg(long)]
        min_distance_km: Option<f64>,
        /// defaults to the mean duration of the trips
        #[arg(long)]
        min_duration_seconds: Option<f64>,
        #[arg(long, default_value = "FraudRoutes.txt")]
        output: PathBuf,
    },
    /// Bin reference routes, or the trips of a labelled file, into grid cells
    Cells {
        #[arg(long, default_value = ".")]
        reference_dir: PathBuf,
        #[arg(long, value_enum, default_value_t = ReferenceSet::NorthWest)]
        reference: ReferenceSet,
        /// labelled file whose trips are binned instead of the reference routes
        #[arg(long)]
        trips: Option<PathBuf>,
        /// only bin the end row of each trip, on the endings grid by default
        #[arg(long, requires = "trips", default_value_t = false)]
        endings: bool,
        /// grid overrides, unset parts come from the default grid
        #[arg(long)]
        min_lat: Option<f64>,
        #[arg(long)]
        max_lat: Option<f64>,
        #[arg(long)]
        min_lon: Option<f64>,
        #[arg(long)]
        rows: Option<u32>,
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
    /// Draw trips against the reference routes
    Plot {
        input: PathBuf,
        #[arg(long, default_value = ".")]
        reference_dir: PathBuf,
        #[arg(long, value_enum, default_value_t = ReferenceSet::AirTrain)]
        reference: ReferenceSet,
        /// route numbers drawn as fraud
        #[arg(long)]
        fraud: Option<PathBuf>,
        /// route numbers drawn as errors
        #[arg(long)]
        errors: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        show_errors: bool,
        #[arg(long, default_value = "Airport to Train Routes")]
        title: String,
        /// one image per route titled "<prefix> <route number>"
        #[arg(long)]
        each: Option<String>,
        /// draw only the trips, no reference routes
        #[arg(long, default_value_t = false)]
        no_reference: bool,
        #[arg(long, default_value = ".")]
        output: PathBuf,
    },
}

fn read_numbers(path: &Path) -> Result<Vec<u64>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(read_route_numbers(BufReader::new(file))?)
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    match args.command {
        Commands::Label {
            input,
            output,
            first_route,
            segment,
        } => {
            std::fs::create_dir_all(&output).context("failed to create output dir")?;
            let first_route = match first_route {
                Some(n) => n,
                None => read_route_counter(&output)?.unwrap_or(1),
            };
            let name = input
                .file_name()
                .and_then(|n| n.to_str())
                .context("input has no file name")?
                .to_string();
            let outcome = process_part(&input, &name, first_route, &segment.part(output)?)?;
            println!("{}", serde_json::to_string_pretty(&outcome.summary)?);
        }
        Commands::Batch {
            data_dir,
            sub_directories,
            files,
            output,
            resume,
            segment,
        } => {
            let first_route_number = if resume {
                read_route_counter(&output)?.unwrap_or(1)
            } else {
                1
            };
            let config = BatchConfig {
                data_dir,
                sub_directories,
                file_count: files,
                first_route_number,
                part: segment.part(output)?,
            };
            let summary = run_batch(&config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Filter {
            input,
            area,
            and_area,
            with_passenger,
            columns,
            output,
            readings_output,
        } => {
            let records = load_records(&input, &columns)?;
            let and_area = and_area.map(|a| a.bounds());
            let (ids, readings) =
                taxis_seen_within(&records, &area.bounds(), and_area.as_ref(), with_passenger);
            println!(
                "{} taxis matched, {} readings in total",
                ids.len(),
                readings.len()
            );
            if let Some(path) = output {
                write_route_numbers(create(&path)?, &ids)?;
            }
            if let Some(path) = readings_output {
                save_records(&path, &readings, &columns)?;
            }
        }
        Commands::Metrics {
            input,
            output,
            min_readings,
            max_distance_km,
            keep_corrupt,
        } => {
            let records = load_labelled(&input)?;
            let mut trips = routes_with_min_readings(collect_trips(&records), min_readings);
            if !keep_corrupt {
                trips = remove_excessive_distance(remove_corrupt(trips), max_distance_km);
            }
            let metrics = compute_metrics(&trips);
            write_metrics(create(&output)?, &metrics)?;
            info!("wrote metrics for {} routes to {}", metrics.len(), output.display());
        }
        Commands::Fraud {
            metrics,
            min_distance_km,
            min_duration_seconds,
            output,
        } => {
            let file = File::open(&metrics)
                .with_context(|| format!("failed to open {}", metrics.display()))?;
            let metrics = read_metrics(BufReader::new(file))?;
            let thresholds =
                FraudThresholds::or_mean_of(min_distance_km, min_duration_seconds, &metrics)
                    .context("no route with a duration to average over")?;
            let suspected = find_fraud(&metrics, &thresholds);
            let numbers: Vec<u64> = suspected.iter().map(|m| m.route_number).collect();
            write_route_numbers(create(&output)?, &numbers)?;
            println!("{}", serde_json::to_string_pretty(&thresholds)?);
            println!("{} suspected routes written to {}", numbers.len(), output.display());
        }
        Commands::Cells {
            reference_dir,
            reference,
            trips,
            endings,
            min_lat,
            max_lat,
            min_lon,
            rows,
            output,
        } => {
            let default = if endings {
                GridSpan::SHENZHEN_ENDINGS
            } else {
                GridSpan::SHENZHEN
            };
            let grid = GridSpan {
                min_lat: min_lat.unwrap_or(default.min_lat),
                max_lat: max_lat.unwrap_or(default.max_lat),
                min_lon: min_lon.unwrap_or(default.min_lon),
                rows: rows.unwrap_or(default.rows),
            }
            .grid()?;
            std::fs::create_dir_all(&output).context("failed to create output dir")?;

            if let Some(input) = trips {
                let name = input
                    .file_name()
                    .and_then(|n| n.to_str())
                    .context("input has no file name")?;
                let name = if endings {
                    let stem = name.strip_suffix(".csv").unwrap_or(name);
                    format!("{stem}-Endings-Cells.csv")
                } else {
                    cells_file_name(name)
                };
                let path = output.join(name);
                let trips = collect_trips(&load_labelled(&input)?);
                let mut writer = create(&path)?;
                write_trip_cells(&trips, &grid, endings, &mut writer)?;
                writer.flush()?;
                info!("wrote {}", path.display());
                return Ok(());
            }

            for route in load_reference_routes(&reference_dir, reference.names())? {
                let path = output.join(cells_file_name(&route.name));
                let mut writer = create(&path)?;
                write_route_cells(&route, &grid, &mut writer)?;
                writer.flush()?;
                info!("wrote {}", path.display());
            }
        }
        Commands::Plot {
            input,
            reference_dir,
            reference,
            fraud,
            errors,
            show_errors,
            title,
            each,
            no_reference,
            output,
        } => {
            std::fs::create_dir_all(&output).context("failed to create output dir")?;
            let trips = collect_trips(&load_labelled(&input)?);
            let refs = if no_reference {
                Vec::new()
            } else {
                load_reference_routes(&reference_dir, reference.names())?
            };

            if let Some(prefix) = each {
                let trips = match &fraud {
                    Some(path) => select_trips(trips, &read_numbers(path)?),
                    None => trips,
                };
                if no_reference {
                    for trip in &trips {
                        plot_route(
                            trip,
                            &output.join(format!("{prefix} {}.png", trip.route_number)),
                        )?;
                    }
                } else {
                    plot_each_against_reference(&refs, &trips, &prefix, &output)?;
                }
                return Ok(());
            }

            let path = output.join(format!("{title}.png"));
            if no_reference {
                plot_routes(&trips, &title, &path)?;
            } else {
                let classes = RouteClasses {
                    fraud: match &fraud {
                        Some(path) => read_numbers(path)?.into_iter().collect(),
                        None => HashSet::new(),
                    },
                    error: match &errors {
                        Some(path) => read_numbers(path)?.into_iter().collect(),
                        None => HashSet::new(),
                    },
                    show_errors,
                };
                plot_against_reference(&refs, &trips, &classes, &title, &path)?;
            }
            info!("wrote {}", path.display());
        }
    }

    Ok(())
}
