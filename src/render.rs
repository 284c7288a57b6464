//! Static SVG rendering of a [`Figure`] with plotters

use plotters::coord::{CoordTranslate, Shift};
use plotters::prelude::*;
use std::ops::Range;
use std::path::Path;

use crate::error::{Result, VizError};
use crate::reduction::PlotDims;
use crate::visualizer::{Figure, MarkerSymbol, Rgb, Trace};

const WIDTH: u32 = 1200;
const HEIGHT: u32 = 900;

fn render_err<E: std::fmt::Display>(e: E) -> VizError {
    VizError::Render(e.to_string())
}

/// Draw the figure and return the SVG document
pub fn render_svg(figure: &Figure) -> Result<String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (WIDTH, HEIGHT)).into_drawing_area();
        root.fill(&WHITE).map_err(render_err)?;
        match figure.dims {
            PlotDims::Two => draw_2d(&root, figure)?,
            PlotDims::Three => draw_3d(&root, figure)?,
        }
        root.present().map_err(render_err)?;
    }
    Ok(svg)
}

/// Write the figure as an SVG file
pub fn write_svg(figure: &Figure, path: &Path) -> Result<()> {
    std::fs::write(path, render_svg(figure)?)?;
    Ok(())
}

fn draw_2d(root: &DrawingArea<SVGBackend, Shift>, figure: &Figure) -> Result<()> {
    let axes = figure.axis_titles();
    let mut chart = ChartBuilder::on(root)
        .caption(&figure.title, ("sans-serif", 28).into_font())
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(axis_range(figure, 0), axis_range(figure, 1))
        .map_err(render_err)?;

    chart
        .configure_mesh()
        .x_desc(axes[0].as_str())
        .y_desc(axes[1].as_str())
        .draw()
        .map_err(render_err)?;

    for trace in &figure.traces {
        let color = color_of(trace.color);
        let coord = (trace.point.x(), trace.point.y());
        let size = trace.size as i32;
        let label = trace.text.clone().unwrap_or_default();
        let drawn = chart
            .draw_series(std::iter::once(
                EmptyElement::at(coord)
                    + marker_shape(trace.symbol, size, color)
                    + Text::new(label, (size + 2, -size), ("sans-serif", 12).into_font()),
            ))
            .map_err(render_err)?;
        if let Some(name) = trace.name.as_ref().filter(|_| trace.show_legend) {
            drawn
                .label(name.as_str())
                .legend(move |(x, y)| Circle::new((x, y), 5, color.filled()));
        }
    }

    draw_legend(&mut chart)
}

fn draw_3d(root: &DrawingArea<SVGBackend, Shift>, figure: &Figure) -> Result<()> {
    let axes = figure.axis_titles();
    let (x_range, y_range, z_range) = (
        axis_range(figure, 0),
        axis_range(figure, 1),
        axis_range(figure, 2),
    );
    let label_at = [
        (x_range.end, y_range.start, z_range.start),
        (x_range.start, y_range.end, z_range.start),
        (x_range.start, y_range.start, z_range.end),
    ];

    let mut chart = ChartBuilder::on(root)
        .caption(&figure.title, ("sans-serif", 28).into_font())
        .margin(20)
        .build_cartesian_3d(x_range, y_range, z_range)
        .map_err(render_err)?;

    chart.with_projection(|mut pb| {
        pb.yaw = 0.6;
        pb.pitch = 0.3;
        pb.scale = 0.85;
        pb.into_matrix()
    });

    chart
        .configure_axes()
        .light_grid_style(BLACK.mix(0.1))
        .max_light_lines(3)
        .draw()
        .map_err(render_err)?;

    chart
        .draw_series(
            axes.iter()
                .zip(label_at)
                .map(|(title, at)| Text::new(title.clone(), at, ("sans-serif", 14).into_font())),
        )
        .map_err(render_err)?;

    for trace in &figure.traces {
        let color = color_of(trace.color);
        let coord = (trace.point.x(), trace.point.y(), trace.point.z());
        let size = trace.size as i32;
        let label = trace.text.clone().unwrap_or_default();
        let drawn = chart
            .draw_series(std::iter::once(
                EmptyElement::at(coord)
                    + marker_shape(trace.symbol, size, color)
                    + Text::new(label, (size + 2, -size), ("sans-serif", 12).into_font()),
            ))
            .map_err(render_err)?;
        if let Some(name) = trace.name.as_ref().filter(|_| trace.show_legend) {
            drawn
                .label(name.as_str())
                .legend(move |(x, y)| Circle::new((x, y), 5, color.filled()));
        }
    }

    draw_legend(&mut chart)
}

fn draw_legend<'a, CT: CoordTranslate>(
    chart: &mut ChartContext<'a, SVGBackend<'a>, CT>,
) -> Result<()> {
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(render_err)
}

/// Circle or diamond marker in pixel offsets around its anchor
fn marker_shape(symbol: MarkerSymbol, size: i32, color: RGBColor) -> Polygon<(i32, i32)> {
    let r = (size / 2).max(2);
    let points = match symbol {
        MarkerSymbol::Diamond => vec![(0, -r), (r, 0), (0, r), (-r, 0)],
        MarkerSymbol::Circle => (0..16)
            .map(|i| {
                let angle = i as f64 * std::f64::consts::TAU / 16.0;
                (
                    (angle.cos() * r as f64).round() as i32,
                    (angle.sin() * r as f64).round() as i32,
                )
            })
            .collect(),
    };
    Polygon::new(points, color.filled())
}

fn color_of(rgb: Rgb) -> RGBColor {
    RGBColor(rgb.0, rgb.1, rgb.2)
}

/// Padded data range of one axis across all traces
fn axis_range(figure: &Figure, axis: usize) -> Range<f64> {
    let values = figure
        .traces
        .iter()
        .filter_map(|t: &Trace| t.point.coords.get(axis).copied())
        .filter(|v| v.is_finite());
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() || !max.is_finite() {
        return -1.0..1.0;
    }
    let pad = ((max - min) * 0.1).max(1e-3);
    if max - min < 1e-9 {
        return (min - 1.0)..(max + 1.0);
    }
    (min - pad)..(max + pad)
}
