//! Scatter figure of focus-word points and their neighbor satellites
//!
//! A [`Figure`] is a backend-neutral description (traces + layout). It can
//! be written as a Plotly figure (JSON or an interactive HTML page) or drawn
//! to SVG through [`crate::render`].

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

use crate::error::{Result, VizError};
use crate::reduction::PlotDims;

/// Contrasting colors assigned to contexts in order
pub const DEFAULT_PALETTE: [Rgb; 6] = [
    Rgb(0xFF, 0x57, 0x33), // Red-orange
    Rgb(0x33, 0xFF, 0x57), // Green
    Rgb(0x33, 0x57, 0xFF), // Blue
    Rgb(0xFF, 0x33, 0xA8), // Pink
    Rgb(0xA8, 0x33, 0xFF), // Purple
    Rgb(0xFF, 0xC3, 0x00), // Yellow
];

const FOCUS_MARKER_SIZE: u32 = 10;
const NEIGHBOR_MARKER_SIZE: u32 = 6;
const NEIGHBOR_TEXT_SIZE: u32 = 10;

/// Marker shapes used by the figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerSymbol {
    Circle,
    Diamond,
}

impl MarkerSymbol {
    fn plotly_name(&self) -> &'static str {
        match self {
            MarkerSymbol::Circle => "circle",
            MarkerSymbol::Diamond => "diamond",
        }
    }
}

/// An RGB color parsed from `#RRGGBB`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn parse(hex: &str) -> Result<Self> {
        let digits = hex
            .strip_prefix('#')
            .filter(|d| d.len() == 6 && d.is_ascii())
            .ok_or_else(|| VizError::InvalidColor(hex.to_string()))?;
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| VizError::InvalidColor(hex.to_string()))
        };
        Ok(Rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.0, self.1, self.2)
    }
}

/// One plotted point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// 2 or 3 coordinates
    pub coords: Vec<f64>,
}

impl Point {
    pub fn x(&self) -> f64 {
        self.coords.first().copied().unwrap_or(0.0)
    }

    pub fn y(&self) -> f64 {
        self.coords.get(1).copied().unwrap_or(0.0)
    }

    pub fn z(&self) -> f64 {
        self.coords.get(2).copied().unwrap_or(0.0)
    }
}

/// One marker with its styling; each point is its own trace so every point
/// keeps its own label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Legend entry (focus points only)
    pub name: Option<String>,
    pub point: Point,
    /// Inline text drawn next to the marker
    pub text: Option<String>,
    pub color: Rgb,
    pub size: u32,
    pub symbol: MarkerSymbol,
    pub show_legend: bool,
    /// Index of the context this point belongs to
    pub context: usize,
}

/// Renderable scatter figure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: String,
    pub dims: PlotDims,
    pub traces: Vec<Trace>,
}

/// Reduced neighbor vectors for one context with their tokens
#[derive(Debug, Clone)]
pub struct NeighborGroup<'a> {
    pub tokens: &'a [String],
    pub coords: ArrayView2<'a, f64>,
}

/// Builds figures from reduced vectors
#[derive(Debug, Clone)]
pub struct EmbeddingVisualizer {
    palette: Vec<Rgb>,
}

impl EmbeddingVisualizer {
    /// Visualizer with [`DEFAULT_PALETTE`]
    pub fn new() -> Self {
        Self {
            palette: DEFAULT_PALETTE.to_vec(),
        }
    }

    /// Visualizer with a custom palette of `#RRGGBB` colors
    pub fn with_palette<S: AsRef<str>>(palette: &[S]) -> Result<Self> {
        let palette = palette
            .iter()
            .map(|hex| Rgb::parse(hex.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { palette })
    }

    pub fn palette_len(&self) -> usize {
        self.palette.len()
    }

    /// Fail unless every one of `n_contexts` contexts can get its own color
    pub fn check_palette(&self, n_contexts: usize) -> Result<()> {
        if n_contexts > self.palette.len() {
            return Err(VizError::InsufficientColors {
                needed: n_contexts,
                available: self.palette.len(),
            });
        }
        Ok(())
    }

    /// Plot focus-word points and their neighbors in 2D or 3D
    ///
    /// # Arguments
    /// * `focus` - reduced focus vectors, shape `(n_contexts, dims)`
    /// * `labels` - one label per context (the sentence text)
    /// * `neighbors` - one group per context, aligned by index
    /// * `title` - figure title
    /// * `dims` - plot dimensionality
    pub fn plot_focus_and_neighbors(
        &self,
        focus: ArrayView2<f64>,
        labels: &[String],
        neighbors: &[NeighborGroup],
        title: &str,
        dims: PlotDims,
    ) -> Result<Figure> {
        let n_contexts = focus.nrows();
        self.check_palette(n_contexts)?;
        if labels.len() != n_contexts || neighbors.len() != n_contexts {
            return Err(VizError::InvalidRequest(format!(
                "{} focus points, {} labels and {} neighbor groups must match",
                n_contexts,
                labels.len(),
                neighbors.len()
            )));
        }

        let d = dims.n_components();
        check_columns(focus.ncols(), d)?;
        for group in neighbors {
            check_columns(group.coords.ncols(), d)?;
            if group.coords.nrows() != group.tokens.len() {
                return Err(VizError::InvalidRequest(format!(
                    "{} neighbor points but {} tokens",
                    group.coords.nrows(),
                    group.tokens.len()
                )));
            }
        }

        let mut traces = Vec::new();

        for (i, (row, label)) in focus.outer_iter().zip(labels).enumerate() {
            traces.push(Trace {
                name: Some(label.clone()),
                point: Point {
                    coords: row.iter().copied().collect(),
                },
                text: None,
                color: self.palette[i],
                size: FOCUS_MARKER_SIZE,
                symbol: MarkerSymbol::Circle,
                show_legend: true,
                context: i,
            });
        }

        for (i, group) in neighbors.iter().enumerate() {
            for (row, token) in group.coords.outer_iter().zip(group.tokens) {
                traces.push(Trace {
                    name: None,
                    point: Point {
                        coords: row.iter().copied().collect(),
                    },
                    text: Some(token.clone()),
                    color: self.palette[i],
                    size: NEIGHBOR_MARKER_SIZE,
                    symbol: MarkerSymbol::Diamond,
                    show_legend: false,
                    context: i,
                });
            }
        }

        Ok(Figure {
            title: title.to_string(),
            dims,
            traces,
        })
    }
}

impl Default for EmbeddingVisualizer {
    fn default() -> Self {
        Self::new()
    }
}

fn check_columns(actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(VizError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

impl Figure {
    /// Axis titles, "Dimension 1" .. "Dimension d"
    pub fn axis_titles(&self) -> Vec<String> {
        (1..=self.dims.n_components())
            .map(|i| format!("Dimension {i}"))
            .collect()
    }

    /// Traces that appear in the legend (one per context)
    pub fn focus_traces(&self) -> impl Iterator<Item = &Trace> {
        self.traces.iter().filter(|t| t.show_legend)
    }

    /// Neighbor traces belonging to one context
    pub fn neighbor_traces(&self, context: usize) -> impl Iterator<Item = &Trace> {
        self.traces
            .iter()
            .filter(move |t| !t.show_legend && t.context == context)
    }

    /// Plotly figure object: `{"data": [...], "layout": {...}}`
    pub fn to_plotly_json(&self) -> Value {
        let three_d = self.dims == PlotDims::Three;
        let data: Vec<Value> = self
            .traces
            .iter()
            .map(|trace| {
                let mut value = json!({
                    "type": if three_d { "scatter3d" } else { "scatter" },
                    "x": [trace.point.x()],
                    "y": [trace.point.y()],
                    "mode": if trace.text.is_some() { "markers+text" } else { "markers" },
                    "marker": {
                        "size": trace.size,
                        "color": trace.color.to_hex(),
                        "symbol": trace.symbol.plotly_name(),
                    },
                    "showlegend": trace.show_legend,
                });
                if three_d {
                    value["z"] = json!([trace.point.z()]);
                }
                if let Some(name) = &trace.name {
                    value["name"] = json!(name);
                }
                if let Some(text) = &trace.text {
                    value["text"] = json!([text]);
                    value["textfont"] = json!({ "size": NEIGHBOR_TEXT_SIZE });
                }
                value
            })
            .collect();

        let axes = self.axis_titles();
        let layout = if three_d {
            json!({
                "title": { "text": self.title },
                "scene": {
                    "xaxis": { "title": { "text": axes[0] } },
                    "yaxis": { "title": { "text": axes[1] } },
                    "zaxis": { "title": { "text": axes[2] } },
                },
                "showlegend": true,
            })
        } else {
            json!({
                "title": { "text": self.title },
                "xaxis": { "title": { "text": axes[0] } },
                "yaxis": { "title": { "text": axes[1] } },
                "showlegend": true,
            })
        };

        json!({ "data": data, "layout": layout })
    }

    /// Standalone interactive page that renders the figure with plotly.js
    pub fn to_html(&self) -> Result<String> {
        let figure = serde_json::to_string(&self.to_plotly_json())?.replace("</", "<\\/");
        Ok(format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="https://cdn.plot.ly/plotly-2.35.2.min.js"></script>
</head>
<body>
<div id="figure" style="width:100%;height:95vh;"></div>
<script>
const figure = {figure};
Plotly.newPlot("figure", figure.data, figure.layout);
</script>
</body>
</html>
"#,
            title = escape_html(&self.title),
        ))
    }

    /// Write the interactive HTML page
    pub fn write_html(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_html()?)?;
        Ok(())
    }

    /// Write the Plotly JSON figure
    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(&self.to_plotly_json())?)?;
        Ok(())
    }

    /// Save by file extension: `.html`, `.json` or `.svg`
    pub fn save(&self, path: &Path) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "html" | "htm" => self.write_html(path)?,
            "json" => self.write_json(path)?,
            "svg" => crate::render::write_svg(self, path)?,
            other => {
                return Err(VizError::InvalidRequest(format!(
                    "unsupported output extension '{other}', use .html, .json or .svg"
                )))
            }
        }
        info!("Figure saved to {}", path.display());
        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// Rgb is stored as its hex string in serialized figures
impl Serialize for Rgb {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Rgb {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Rgb::parse(&hex).map_err(serde::de::Error::custom)
    }
}
