// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::dataset::Frame;
use crate::program::{ChartSpec, Mark};
use crate::sandbox::SandboxError;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::debug;

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 400.0;
const MARGIN_LEFT: f64 = 60.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 50.0;

const PALETTE: [&str; 6] = [
    "#4c78a8", "#f58518", "#54a24b", "#e45756", "#72b7b2", "#b279a2",
];

struct Point {
    label: String,
    x: f64,
    y: f64,
    series: Option<String>,
}

/// Renders the chart spec against a prepared frame into an encoded SVG
/// buffer, the image artifact carried by the draw histories.
pub fn render_svg(frame: &Frame, spec: &ChartSpec) -> Result<Vec<u8>, SandboxError> {
    let x_column = frame
        .get_column(&spec.x)
        .ok_or_else(|| SandboxError::Exec(format!("column not found: {}", spec.x)))?;
    let y_column = frame
        .get_column(&spec.y)
        .ok_or_else(|| SandboxError::Exec(format!("column not found: {}", spec.y)))?;
    let series_column = match &spec.series {
        Some(name) => Some(
            frame
                .get_column(name)
                .ok_or_else(|| SandboxError::Exec(format!("column not found: {name}")))?,
        ),
        None => None,
    };

    let mut points = Vec::new();
    for i in 0..frame.row_count() {
        let Some(y) = y_column.to_f64(i) else {
            continue;
        };
        let label = x_column.get_string(i).unwrap_or_else(|| "NULL".to_string());
        let x = x_column.to_f64(i).unwrap_or(points.len() as f64);
        points.push(Point {
            label,
            x,
            y,
            series: series_column.and_then(|c| c.get_string(i)),
        });
    }
    if points.is_empty() {
        return Err(SandboxError::Exec(
            "chart has no plottable points".to_string(),
        ));
    }
    debug!(points = points.len(), mark = ?spec.mark, "Rendering chart");

    let plot_width = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let y_max = points.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
    let y_min = points
        .iter()
        .map(|p| p.y)
        .fold(f64::INFINITY, f64::min)
        .min(0.0);
    let y_span = if (y_max - y_min).abs() < f64::EPSILON {
        1.0
    } else {
        y_max - y_min
    };
    let y_pos = |y: f64| MARGIN_TOP + plot_height - ((y - y_min) / y_span) * plot_height;

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">"#
    );
    let _ = write!(
        svg,
        r#"<rect width="{WIDTH}" height="{HEIGHT}" fill="white"/>"#
    );
    if let Some(title) = &spec.title {
        let _ = write!(
            svg,
            r#"<text x="{}" y="24" text-anchor="middle" font-family="sans-serif" font-size="16">{}</text>"#,
            WIDTH / 2.0,
            escape(title)
        );
    }
    // axes
    let _ = write!(
        svg,
        r#"<line x1="{MARGIN_LEFT}" y1="{MARGIN_TOP}" x2="{MARGIN_LEFT}" y2="{}" stroke="black"/>"#,
        MARGIN_TOP + plot_height
    );
    let _ = write!(
        svg,
        r#"<line x1="{MARGIN_LEFT}" y1="{}" x2="{}" y2="{}" stroke="black"/>"#,
        MARGIN_TOP + plot_height,
        MARGIN_LEFT + plot_width,
        MARGIN_TOP + plot_height
    );
    for (value, label) in [(y_min, format_number(y_min)), (y_max, format_number(y_max))] {
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-family="sans-serif" font-size="11">{}</text>"#,
            MARGIN_LEFT - 6.0,
            y_pos(value) + 4.0,
            label
        );
    }

    match spec.mark {
        Mark::Bar => render_bars(&mut svg, &points, plot_width, plot_height, &y_pos),
        Mark::Line => render_series(&mut svg, &points, plot_width, &y_pos, true),
        Mark::Scatter => render_series(&mut svg, &points, plot_width, &y_pos, false),
    }

    svg.push_str("</svg>");
    Ok(svg.into_bytes())
}

fn render_bars<F>(svg: &mut String, points: &[Point], plot_width: f64, plot_height: f64, y_pos: &F)
where
    F: Fn(f64) -> f64,
{
    let slot = plot_width / points.len() as f64;
    let bar_width = (slot * 0.8).max(1.0);
    for (i, point) in points.iter().enumerate() {
        let x = MARGIN_LEFT + slot * i as f64 + (slot - bar_width) / 2.0;
        let top = y_pos(point.y.max(0.0));
        let bottom = y_pos(point.y.min(0.0));
        let _ = write!(
            svg,
            r#"<rect x="{x:.1}" y="{top:.1}" width="{bar_width:.1}" height="{:.1}" fill="{}"/>"#,
            (bottom - top).abs(),
            PALETTE[0]
        );
        let _ = write!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-family="sans-serif" font-size="11">{}</text>"#,
            x + bar_width / 2.0,
            MARGIN_TOP + plot_height + 16.0,
            escape(&point.label)
        );
    }
}

fn render_series<F>(svg: &mut String, points: &[Point], plot_width: f64, y_pos: &F, connect: bool)
where
    F: Fn(f64) -> f64,
{
    let x_max = points.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
    let x_min = points.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let x_span = if (x_max - x_min).abs() < f64::EPSILON {
        1.0
    } else {
        x_max - x_min
    };
    let x_pos = |x: f64| MARGIN_LEFT + ((x - x_min) / x_span) * plot_width;

    let mut grouped: BTreeMap<String, Vec<&Point>> = BTreeMap::new();
    for point in points {
        grouped
            .entry(point.series.clone().unwrap_or_default())
            .or_default()
            .push(point);
    }
    for (series_index, (name, series_points)) in grouped.iter().enumerate() {
        let colour = PALETTE[series_index % PALETTE.len()];
        if connect && series_points.len() > 1 {
            let path: Vec<String> = series_points
                .iter()
                .map(|p| format!("{:.1},{:.1}", x_pos(p.x), y_pos(p.y)))
                .collect();
            let _ = write!(
                svg,
                r#"<polyline points="{}" fill="none" stroke="{colour}" stroke-width="2"/>"#,
                path.join(" ")
            );
        }
        for point in series_points {
            let _ = write!(
                svg,
                r#"<circle cx="{:.1}" cy="{:.1}" r="3" fill="{colour}"/>"#,
                x_pos(point.x),
                y_pos(point.y)
            );
        }
        if !name.is_empty() {
            let _ = write!(
                svg,
                r#"<text x="{}" y="{}" font-family="sans-serif" font-size="11" fill="{colour}">{}</text>"#,
                MARGIN_LEFT + 8.0,
                MARGIN_TOP + 14.0 * (series_index as f64 + 1.0),
                escape(name)
            );
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract().abs() < 1e-9 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
