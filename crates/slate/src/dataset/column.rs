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

use crate::dataset::{DatasetError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Int64,
    Float64,
    String,
    Boolean,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    String(Vec<Option<String>>),
    Boolean(Vec<Option<bool>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Int64(data) => data.len(),
            Column::Float64(data) => data.len(),
            Column::String(data) => data.len(),
            Column::Boolean(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Column::Int64(_) => DataType::Int64,
            Column::Float64(_) => DataType::Float64,
            Column::String(_) => DataType::String,
            Column::Boolean(_) => DataType::Boolean,
        }
    }

    pub fn null_count(&self) -> usize {
        match self {
            Column::Int64(data) => data.iter().filter(|v| v.is_none()).count(),
            Column::Float64(data) => data.iter().filter(|v| v.is_none()).count(),
            Column::String(data) => data.iter().filter(|v| v.is_none()).count(),
            Column::Boolean(data) => data.iter().filter(|v| v.is_none()).count(),
        }
    }

    pub fn get_string(&self, index: usize) -> Option<String> {
        match self {
            Column::Int64(data) => data.get(index)?.map(|v| v.to_string()),
            Column::Float64(data) => data.get(index)?.map(|v| v.to_string()),
            Column::String(data) => data.get(index)?.clone(),
            Column::Boolean(data) => data.get(index)?.map(|v| v.to_string()),
        }
    }

    pub fn to_f64(&self, index: usize) -> Option<f64> {
        match self {
            Column::Int64(data) => data.get(index)?.map(|v| v as f64),
            Column::Float64(data) => *data.get(index)?,
            Column::String(data) => data.get(index)?.as_ref().and_then(|s| s.parse().ok()),
            Column::Boolean(data) => data.get(index)?.map(|v| if v { 1.0 } else { 0.0 }),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Column::Int64(_) | Column::Float64(_))
    }

    /// All non-null values coerced to f64, in row order.
    pub fn numeric_values(&self) -> Vec<f64> {
        (0..self.len()).filter_map(|i| self.to_f64(i)).collect()
    }

    pub fn unique_count(&self) -> usize {
        let mut seen = HashSet::new();
        for i in 0..self.len() {
            if let Some(value) = self.get_string(i) {
                seen.insert(value);
            }
        }
        seen.len()
    }

    pub fn unique_values(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for i in 0..self.len() {
            if let Some(value) = self.get_string(i) {
                if seen.insert(value.clone()) {
                    values.push(value);
                }
            }
        }
        values
    }

    pub fn select_rows(&self, indices: &[usize]) -> Result<Column> {
        let len = self.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(DatasetError::OutOfBounds(bad));
        }
        Ok(match self {
            Column::Int64(data) => Column::Int64(indices.iter().map(|&i| data[i]).collect()),
            Column::Float64(data) => Column::Float64(indices.iter().map(|&i| data[i]).collect()),
            Column::String(data) => {
                Column::String(indices.iter().map(|&i| data[i].clone()).collect())
            }
            Column::Boolean(data) => Column::Boolean(indices.iter().map(|&i| data[i]).collect()),
        })
    }

    pub fn from_strings(values: &[Option<String>], data_type: DataType) -> Result<Column> {
        match data_type {
            DataType::Int64 => {
                let parsed: Result<Vec<Option<i64>>> = values
                    .iter()
                    .map(|v| {
                        v.as_ref()
                            .map(|s| {
                                s.parse()
                                    .map_err(|_| DatasetError::Parse(format!("not an integer: {s}")))
                            })
                            .transpose()
                    })
                    .collect();
                Ok(Column::Int64(parsed?))
            }
            DataType::Float64 => {
                let parsed: Result<Vec<Option<f64>>> = values
                    .iter()
                    .map(|v| {
                        v.as_ref()
                            .map(|s| {
                                s.parse()
                                    .map_err(|_| DatasetError::Parse(format!("not a number: {s}")))
                            })
                            .transpose()
                    })
                    .collect();
                Ok(Column::Float64(parsed?))
            }
            DataType::Boolean => {
                let parsed: Result<Vec<Option<bool>>> = values
                    .iter()
                    .map(|v| {
                        v.as_ref()
                            .map(|s| match s.to_lowercase().as_str() {
                                "true" => Ok(true),
                                "false" => Ok(false),
                                other => {
                                    Err(DatasetError::Parse(format!("not a boolean: {other}")))
                                }
                            })
                            .transpose()
                    })
                    .collect();
                Ok(Column::Boolean(parsed?))
            }
            DataType::String => Ok(Column::String(values.to_vec())),
        }
    }
}

/// Accumulates raw text fields and infers the narrowest type on build.
#[derive(Debug, Default)]
pub struct ColumnBuilder {
    raw: Vec<Option<String>>,
}

impl ColumnBuilder {
    pub fn new() -> Self {
        Self { raw: Vec::new() }
    }

    pub fn push(&mut self, field: &str) {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            self.raw.push(None);
        } else {
            self.raw.push(Some(trimmed.to_string()));
        }
    }

    pub fn build(self) -> Result<Column> {
        let non_null: Vec<&String> = self.raw.iter().flatten().collect();
        if !non_null.is_empty() && non_null.iter().all(|s| s.parse::<i64>().is_ok()) {
            return Column::from_strings(&self.raw, DataType::Int64);
        }
        if !non_null.is_empty() && non_null.iter().all(|s| s.parse::<f64>().is_ok()) {
            return Column::from_strings(&self.raw, DataType::Float64);
        }
        if !non_null.is_empty()
            && non_null
                .iter()
                .all(|s| s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false"))
        {
            let lowered: Vec<Option<String>> = self
                .raw
                .iter()
                .map(|v| v.as_ref().map(|s| s.to_lowercase()))
                .collect();
            return Column::from_strings(&lowered, DataType::Boolean);
        }
        Column::from_strings(&self.raw, DataType::String)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn built(fields: &[&str]) -> Column {
        let mut builder = ColumnBuilder::new();
        for field in fields {
            builder.push(field);
        }
        builder.build().unwrap()
    }

    #[test]
    fn infers_integer_column() {
        let column = built(&["1", "2", ""]);
        assert_eq!(column.data_type(), DataType::Int64);
        assert_eq!(column.null_count(), 1);
    }

    #[test]
    fn infers_float_when_any_fraction_present() {
        let column = built(&["1", "2.5"]);
        assert_eq!(column.data_type(), DataType::Float64);
        assert_eq!(column.to_f64(1), Some(2.5));
    }

    #[test]
    fn falls_back_to_string() {
        let column = built(&["north", "south"]);
        assert_eq!(column.data_type(), DataType::String);
        assert_eq!(column.unique_count(), 2);
    }

    #[test]
    fn select_rows_checks_bounds() {
        let column = built(&["1", "2"]);
        assert!(column.select_rows(&[0, 5]).is_err());
        let picked = column.select_rows(&[1, 0]).unwrap();
        assert_eq!(picked.get_string(0), Some("2".to_string()));
    }
}
