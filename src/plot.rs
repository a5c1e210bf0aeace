//draws trips (and the reference routes) to png files
use crate::error::{Error, Result};
use crate::reference::ReferenceRoute;
use crate::trips::Trip;
use plotters::prelude::*;
use std::collections::HashSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SIZE: (u32, u32) = (1024, 768);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Normal,
    Fraud,
    Error,
}

impl RouteClass {
    fn color(&self) -> RGBColor {
        match self {
            RouteClass::Normal => BLUE,
            RouteClass::Fraud => RED,
            RouteClass::Error => YELLOW,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RouteClass::Normal => "Normal",
            RouteClass::Fraud => "Fraud",
            RouteClass::Error => "Error",
        }
    }
}

/// Which routes are drawn as fraud and which as errors; everything else is
/// normal. Error routes are skipped unless `show_errors` is set.
#[derive(Debug, Clone, Default)]
pub struct RouteClasses {
    pub fraud: HashSet<u64>,
    pub error: HashSet<u64>,
    pub show_errors: bool,
}

impl RouteClasses {
    pub fn class_of(&self, route_number: u64) -> Option<RouteClass> {
        if self.fraud.contains(&route_number) {
            Some(RouteClass::Fraud)
        } else if self.error.contains(&route_number) {
            self.show_errors.then_some(RouteClass::Error)
        } else {
            Some(RouteClass::Normal)
        }
    }
}

/// One polyline of a plot, points as (lon, lat).
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub points: Vec<(f64, f64)>,
    pub color: RGBColor,
    pub label: Option<&'static str>,
}

fn plot_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Plot(e.to_string())
}

/// Lon/lat ranges covering every layer with a small margin.
pub fn bounds(layers: &[Layer]) -> Option<(Range<f64>, Range<f64>)> {
    let mut points = layers.iter().flat_map(|l| l.points.iter());
    let first = points.next()?;
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.0, first.0, first.1, first.1);
    for (x, y) in points {
        min_x = min_x.min(*x);
        max_x = max_x.max(*x);
        min_y = min_y.min(*y);
        max_y = max_y.max(*y);
    }
    let pad_x = ((max_x - min_x) * 0.02).max(0.001);
    let pad_y = ((max_y - min_y) * 0.02).max(0.001);
    Some((
        (min_x - pad_x)..(max_x + pad_x),
        (min_y - pad_y)..(max_y + pad_y),
    ))
}

/// Reference routes in green, labelled once when `label` is given.
pub fn reference_layers(refs: &[ReferenceRoute], label: Option<&'static str>) -> Vec<Layer> {
    refs.iter()
        .enumerate()
        .map(|(i, r)| Layer {
            points: r.lon_lat(),
            color: GREEN,
            label: if i == 0 { label } else { None },
        })
        .collect()
}

/// One layer per shown trip, colored by class, each class labelled once.
pub fn classified_layers(trips: &[Trip], classes: &RouteClasses) -> Vec<Layer> {
    let mut labelled: HashSet<RouteClass> = HashSet::new();
    trips
        .iter()
        .filter_map(|trip| {
            let class = classes.class_of(trip.route_number)?;
            Some(Layer {
                points: trip.lon_lat(),
                color: class.color(),
                label: labelled.insert(class).then_some(class.label()),
            })
        })
        .collect()
}

fn render(title: &str, path: &Path, layers: &[Layer], axis_names: bool) -> Result<()> {
    let (x_range, y_range) =
        bounds(layers).ok_or_else(|| Error::Plot(format!("nothing to draw for {title}")))?;

    let root = BitMapBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)
        .map_err(plot_err)?;

    let mut mesh = chart.configure_mesh();
    mesh.disable_x_mesh().disable_y_mesh();
    if axis_names {
        mesh.x_desc("Longitude").y_desc("Latitude");
    } else {
        mesh.x_labels(0).y_labels(0);
    }
    mesh.draw().map_err(plot_err)?;

    for layer in layers {
        let color = layer.color;
        let anno = chart
            .draw_series(LineSeries::new(layer.points.iter().copied(), &color))
            .map_err(plot_err)?;
        if let Some(label) = layer.label {
            anno.label(label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
        }
    }

    if layers.iter().any(|l| l.label.is_some()) {
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .label_font(("sans-serif", 12))
            .draw()
            .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    debug!("wrote {}", path.display());
    Ok(())
}

pub fn plot_route(trip: &Trip, path: &Path) -> Result<()> {
    let layer = Layer {
        points: trip.lon_lat(),
        color: RED,
        label: None,
    };
    render(&format!("Route {}", trip.route_number), path, &[layer], true)
}

/// Every trip, cycling through a palette.
pub fn plot_routes(trips: &[Trip], title: &str, path: &Path) -> Result<()> {
    let layers: Vec<Layer> = trips
        .iter()
        .enumerate()
        .map(|(i, trip)| {
            let (r, g, b) = Palette99::pick(i).rgb();
            Layer {
                points: trip.lon_lat(),
                color: RGBColor(r, g, b),
                label: None,
            }
        })
        .collect();
    render(title, path, &layers, true)
}

pub fn plot_against_reference(
    refs: &[ReferenceRoute],
    trips: &[Trip],
    classes: &RouteClasses,
    title: &str,
    path: &Path,
) -> Result<()> {
    let mut layers = reference_layers(refs, Some("Google Maps"));
    layers.extend(classified_layers(trips, classes));
    render(title, path, &layers, false)
}

/// One image per trip, titled `<prefix> <route number>`, written to `dir`.
pub fn plot_each_against_reference(
    refs: &[ReferenceRoute],
    trips: &[Trip],
    prefix: &str,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(trips.len());
    for trip in trips {
        let title = format!("{prefix} {}", trip.route_number);
        let path = dir.join(format!("{title}.png"));
        let mut layers = reference_layers(refs, None);
        layers.push(Layer {
            points: trip.lon_lat(),
            color: RED,
            label: None,
        });
        debug!("route {} has {} readings", trip.route_number, trip.len());
        render(&title, &path, &layers, false)?;
        written.push(path);
    }
    info!("done creating {} route graphs", written.len());
    Ok(written)
}
