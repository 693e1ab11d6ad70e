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

use crate::dataset::column::Column;
use crate::dataset::{DatasetError, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FrameMeta {
    pub id: Uuid,
    pub name: String,
    pub row_count: usize,
    pub column_count: usize,
    pub created_at: DateTime<Utc>,
}

impl FrameMeta {
    fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            row_count: 0,
            column_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// Columnar table. Column data is immutable behind `Arc`; every operation
/// produces a new `Frame`, so shared snapshots are never written through.
#[derive(Debug, Clone)]
pub struct Frame {
    columns: HashMap<String, Arc<Column>>,
    column_order: Vec<String>,
    pub meta: FrameMeta,
}

impl Frame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            columns: HashMap::new(),
            column_order: Vec::new(),
            meta: FrameMeta::new(name.into()),
        }
    }

    pub fn add_column(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if let Some(first) = self.columns.values().next() {
            if column.len() != first.len() {
                return Err(DatasetError::InvalidOperation(format!(
                    "column length mismatch: expected {}, got {}",
                    first.len(),
                    column.len()
                )));
            }
        }
        if !self.columns.contains_key(&name) {
            self.column_order.push(name.clone());
        }
        self.meta.row_count = column.len();
        self.columns.insert(name, Arc::new(column));
        self.meta.column_count = self.columns.len();
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.meta.row_count
    }

    pub fn column_count(&self) -> usize {
        self.meta.column_count
    }

    pub fn is_empty(&self) -> bool {
        self.meta.row_count == 0
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_order
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name).map(|arc| arc.as_ref())
    }

    /// Private working copy for a sandbox run: same data, fresh identity.
    pub fn fork(&self) -> Frame {
        let mut copy = self.clone();
        copy.meta.id = Uuid::new_v4();
        copy.meta.created_at = Utc::now();
        copy
    }

    pub fn select(&self, column_names: &[String]) -> Result<Frame> {
        let mut result = Frame::new(self.meta.name.clone());
        for name in column_names {
            let column = self
                .columns
                .get(name)
                .ok_or_else(|| DatasetError::ColumnNotFound(name.clone()))?;
            result.add_column(name.clone(), column.as_ref().clone())?;
        }
        Ok(result)
    }

    pub fn select_rows(&self, indices: &[usize]) -> Result<Frame> {
        let mut result = Frame::new(self.meta.name.clone());
        for name in &self.column_order {
            let column = self.columns[name].select_rows(indices)?;
            result.add_column(name.clone(), column)?;
        }
        result.meta.row_count = indices.len();
        Ok(result)
    }

    pub fn filter<P>(&self, predicate: P) -> Result<Frame>
    where
        P: Fn(usize) -> bool + Send + Sync,
    {
        let indices: Vec<usize> = (0..self.row_count())
            .into_par_iter()
            .filter(|&i| predicate(i))
            .collect();
        self.select_rows(&indices)
    }

    pub fn sort_by(&self, column_name: &str, descending: bool) -> Result<Frame> {
        let column = self
            .get_column(column_name)
            .ok_or_else(|| DatasetError::ColumnNotFound(column_name.to_string()))?;
        let mut indices: Vec<usize> = (0..self.row_count()).collect();
        if column.is_numeric() {
            indices.sort_by(|&a, &b| {
                let va = column.to_f64(a);
                let vb = column.to_f64(b);
                va.partial_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal)
            });
        } else {
            indices.sort_by(|&a, &b| column.get_string(a).cmp(&column.get_string(b)));
        }
        if descending {
            indices.reverse();
        }
        self.select_rows(&indices)
    }

    pub fn head(&self, rows: usize) -> Result<Frame> {
        let indices: Vec<usize> = (0..self.row_count().min(rows)).collect();
        self.select_rows(&indices)
    }

    /// Pipe-delimited rendering used for digests and conversation turns.
    pub fn render_table(&self, limit: usize) -> String {
        let mut out = String::new();
        out.push_str("| ");
        out.push_str(&self.column_order.join(" | "));
        out.push_str(" |\n|");
        out.push_str(&"---|".repeat(self.column_order.len()));
        out.push('\n');
        let shown = self.row_count().min(limit);
        for i in 0..shown {
            let row: Vec<String> = self
                .column_order
                .iter()
                .map(|name| {
                    self.columns[name]
                        .get_string(i)
                        .unwrap_or_else(|| "NULL".to_string())
                })
                .collect();
            out.push_str("| ");
            out.push_str(&row.join(" | "));
            out.push_str(" |\n");
        }
        if self.row_count() > shown {
            out.push_str(&format!("... ({} more rows)\n", self.row_count() - shown));
        }
        out
    }

    /// Whole row as joined text, used for relevance ranking.
    pub fn row_text(&self, index: usize) -> String {
        self.column_order
            .iter()
            .filter_map(|name| self.columns[name].get_string(index))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
