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

use crate::dataset::{Column, Frame};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod relevance;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestConfig {
    #[serde(default = "default_sample_values")]
    pub sample_values: usize,
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    #[serde(default = "default_categorical_cardinality")]
    pub categorical_cardinality: usize,
    #[serde(default = "default_scan_cap")]
    pub scan_cap: usize,
}

fn default_sample_values() -> usize {
    5
}
fn default_sample_rows() -> usize {
    10
}
fn default_categorical_cardinality() -> usize {
    10
}
fn default_scan_cap() -> usize {
    200
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            sample_values: default_sample_values(),
            sample_rows: default_sample_rows(),
            categorical_cardinality: default_categorical_cardinality(),
            scan_cap: default_scan_cap(),
        }
    }
}

/// Textual dataset profile tailored to one request. Recomputed once per
/// top-level request and reused across that request's repair cycle.
pub fn build_digest(frame: &Frame, description: &str, request: &str, config: &DigestConfig) -> String {
    let mut lines = Vec::new();
    if !description.trim().is_empty() {
        lines.push(description.trim().to_string());
    }
    lines.push(format!(
        "The dataset is summarised below; only the structure and the slices most \
         relevant to the current request are shown. It has {} columns: {}.",
        frame.column_count(),
        frame.column_names().join(", ")
    ));

    for name in frame.column_names() {
        if let Some(column) = frame.get_column(name) {
            lines.push(describe_column(name, column, request, config));
        }
    }

    let top = relevance::rank_rows(request, frame, config.scan_cap, config.sample_rows);
    lines.push(format!(
        "The dataset has {} rows in total. The {} most relevant rows:",
        frame.row_count(),
        top.len()
    ));
    match frame.select_rows(&top) {
        Ok(sample) => lines.push(sample.render_table(config.sample_rows)),
        Err(e) => debug!("Digest row sample unavailable: {e}"),
    }

    lines.join("\n")
}

fn describe_column(name: &str, column: &Column, request: &str, config: &DigestConfig) -> String {
    let mut line = format!("- Column '{name}' ");
    match column {
        Column::Int64(_) | Column::Float64(_) => {
            let values = column.numeric_values();
            if values.is_empty() {
                line.push_str("is numeric but holds no values.");
            } else if values.iter().all(|v| (0.0..=1.0).contains(v)) {
                line.push_str("holds shares of a total (every value sits between 0 and 1).");
            } else {
                let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                line.push_str(&format!(
                    "is numeric, ranging {min} to {max} with mean {mean:.2} and median {}.",
                    median(&values)
                ));
            }
        }
        Column::Boolean(_) => {
            line.push_str("is a true/false flag.");
        }
        Column::String(_) => {
            if column.unique_count() < config.categorical_cardinality {
                line.push_str(&format!(
                    "is categorical with values: {}.",
                    column.unique_values().join(", ")
                ));
            } else {
                line.push_str("is text data.");
            }
        }
    }
    let unique = column.unique_values();
    let samples = if unique.len() <= config.sample_values {
        unique
    } else {
        relevance::rank_values(request, &unique, config.sample_values)
    };
    if !samples.is_empty() {
        line.push_str(&format!(" Relevant values: {}.", samples.join(", ")));
    }
    line
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ColumnBuilder;

    fn frame() -> Frame {
        let mut frame = Frame::new("sales");
        let mut region = ColumnBuilder::new();
        let mut amount = ColumnBuilder::new();
        let mut share = ColumnBuilder::new();
        for (r, a, s) in [
            ("North", "120.5", "0.3"),
            ("South", "80", "0.2"),
            ("East", "40", "0.5"),
        ] {
            region.push(r);
            amount.push(a);
            share.push(s);
        }
        frame.add_column("region", region.build().unwrap()).unwrap();
        frame.add_column("amount", amount.build().unwrap()).unwrap();
        frame.add_column("share", share.build().unwrap()).unwrap();
        frame
    }

    #[test]
    fn digest_profiles_each_column() {
        let digest = build_digest(
            &frame(),
            "Regional sales records.",
            "total for North",
            &DigestConfig::default(),
        );
        assert!(digest.contains("Regional sales records."));
        assert!(digest.contains("'region' is categorical"));
        assert!(digest.contains("'amount' is numeric"));
        assert!(digest.contains("shares of a total"));
        assert!(digest.contains("3 rows in total"));
    }

    #[test]
    fn relevant_row_listed_first() {
        let digest = build_digest(&frame(), "", "North", &DigestConfig::default());
        let table_start = digest.find("| region |").unwrap();
        let first_row = digest[table_start..]
            .lines()
            .nth(2)
            .unwrap()
            .to_string();
        assert!(first_row.contains("North"));
    }
}
