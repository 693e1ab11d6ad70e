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

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mark {
    Bar,
    Line,
    Scatter,
}

/// Declarative chart request rendered by the sandbox: `x`/`y` name columns of
/// the prepared frame, `series` optionally splits line/scatter marks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub mark: Mark,
    pub x: String,
    pub y: String,
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_round_trips_through_json() {
        let spec = ChartSpec {
            mark: Mark::Bar,
            x: "region".to_string(),
            y: "total".to_string(),
            series: None,
            title: Some("Totals by region".to_string()),
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: ChartSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn optional_fields_default() {
        let spec: ChartSpec =
            serde_json::from_str(r#"{"mark":"line","x":"date","y":"amount"}"#).unwrap();
        assert!(spec.series.is_none());
        assert!(spec.title.is_none());
    }
}
