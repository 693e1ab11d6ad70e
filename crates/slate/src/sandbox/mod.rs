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

use crate::dataset::{Column, DataType, DatasetError, Frame};
use crate::program::{
    AggFn, Aggregate, CmpOp, ColumnExpr, Condition, Predicate, Program, Scalar, TransformOp,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

pub mod render;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Execution failed: {0}")]
    Exec(String),

    #[error("Output contract violated: {0}")]
    Contract(String),
}

impl From<DatasetError> for SandboxError {
    fn from(error: DatasetError) -> Self {
        SandboxError::Exec(error.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Table,
    Image,
}

#[derive(Debug, Clone)]
pub enum Output {
    Table(Frame),
    Image(Vec<u8>),
}

/// Runs parsed programs against a private copy of the dataset. The
/// `TransformOp`/`ChartSpec` vocabulary is the entire binding surface; a
/// program cannot reach anything else, and the caller's frame is never
/// touched.
#[derive(Debug, Default)]
pub struct SandboxExecutor;

impl SandboxExecutor {
    pub fn new() -> Self {
        Self
    }

    pub fn run(
        &self,
        program: &Program,
        dataset: &Frame,
        want: OutputKind,
    ) -> Result<Output, SandboxError> {
        let working = dataset.fork();
        match (program, want) {
            (Program::Transform { ops }, OutputKind::Table) => {
                let result = apply_ops(working, ops)?;
                debug!(
                    rows = result.row_count(),
                    columns = result.column_count(),
                    "Sandbox produced tabular output"
                );
                Ok(Output::Table(result))
            }
            (Program::Chart { prepare, spec }, OutputKind::Image) => {
                let prepared = apply_ops(working, prepare)?;
                let bytes = render::render_svg(&prepared, spec)?;
                if bytes.is_empty() {
                    return Err(SandboxError::Contract(
                        "chart rendering produced an empty buffer".to_string(),
                    ));
                }
                Ok(Output::Image(bytes))
            }
            (Program::Chart { .. }, OutputKind::Table) => Err(SandboxError::Contract(
                "expected a tabular program, got a chart program".to_string(),
            )),
            (Program::Transform { .. }, OutputKind::Image) => Err(SandboxError::Contract(
                "expected a chart program, got a tabular program".to_string(),
            )),
        }
    }
}

fn apply_ops(mut frame: Frame, ops: &[TransformOp]) -> Result<Frame, SandboxError> {
    for op in ops {
        frame = apply_op(frame, op)?;
    }
    Ok(frame)
}

fn apply_op(frame: Frame, op: &TransformOp) -> Result<Frame, SandboxError> {
    match op {
        TransformOp::Select { columns } => Ok(frame.select(columns)?),
        TransformOp::Filter { predicate } => {
            validate_predicate(&frame, predicate)?;
            Ok(frame.filter(|i| eval_predicate(&frame, predicate, i))?)
        }
        TransformOp::Derive { name, expr } => {
            let column = eval_expr(&frame, expr)?;
            let mut result = frame;
            result.add_column(name.clone(), column)?;
            Ok(result)
        }
        TransformOp::GroupBy { by, aggregates } => group_by(&frame, by, aggregates),
        TransformOp::Sort { by, descending } => Ok(frame.sort_by(by, *descending)?),
        TransformOp::Limit { rows } => Ok(frame.head(*rows)?),
    }
}

fn validate_predicate(frame: &Frame, predicate: &Predicate) -> Result<(), SandboxError> {
    match predicate {
        Predicate::Cond(cond) => {
            if frame.get_column(&cond.column).is_none() {
                return Err(SandboxError::Exec(format!(
                    "column not found: {}",
                    cond.column
                )));
            }
            Ok(())
        }
        Predicate::All(parts) | Predicate::Any(parts) => {
            parts.iter().try_for_each(|p| validate_predicate(frame, p))
        }
        Predicate::Not(inner) => validate_predicate(frame, inner),
    }
}

fn eval_predicate(frame: &Frame, predicate: &Predicate, row: usize) -> bool {
    match predicate {
        Predicate::Cond(cond) => eval_condition(frame, cond, row),
        Predicate::All(parts) => parts.iter().all(|p| eval_predicate(frame, p, row)),
        Predicate::Any(parts) => parts.iter().any(|p| eval_predicate(frame, p, row)),
        Predicate::Not(inner) => !eval_predicate(frame, inner, row),
    }
}

fn eval_condition(frame: &Frame, cond: &Condition, row: usize) -> bool {
    let Some(column) = frame.get_column(&cond.column) else {
        return false;
    };
    match cond.op {
        CmpOp::Contains | CmpOp::StartsWith | CmpOp::EndsWith => {
            let (Some(cell), Scalar::Str(needle)) = (column.get_string(row), &cond.value) else {
                return false;
            };
            match cond.op {
                CmpOp::Contains => cell.contains(needle),
                CmpOp::StartsWith => cell.starts_with(needle),
                _ => cell.ends_with(needle),
            }
        }
        _ => {
            if let (Some(cell), Some(target)) = (column.to_f64(row), cond.value.as_f64()) {
                compare_ordered(cell.partial_cmp(&target), cond.op)
            } else if let Some(cell) = column.get_string(row) {
                let target = cond.value.render();
                compare_ordered(Some(cell.cmp(&target)), cond.op)
            } else {
                false
            }
        }
    }
}

fn compare_ordered(ordering: Option<std::cmp::Ordering>, op: CmpOp) -> bool {
    use std::cmp::Ordering::*;
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        CmpOp::Eq => ordering == Equal,
        CmpOp::Ne => ordering != Equal,
        CmpOp::Gt => ordering == Greater,
        CmpOp::Lt => ordering == Less,
        CmpOp::Ge => ordering != Less,
        CmpOp::Le => ordering != Greater,
        _ => false,
    }
}

fn eval_expr(frame: &Frame, expr: &ColumnExpr) -> Result<Column, SandboxError> {
    match expr {
        ColumnExpr::Column(name) => frame
            .get_column(name)
            .cloned()
            .ok_or_else(|| SandboxError::Exec(format!("column not found: {name}"))),
        ColumnExpr::Value(scalar) => {
            let rows = frame.row_count();
            Ok(match scalar {
                Scalar::Int(v) => Column::Int64(vec![Some(*v); rows]),
                Scalar::Float(v) => Column::Float64(vec![Some(*v); rows]),
                Scalar::Bool(v) => Column::Boolean(vec![Some(*v); rows]),
                Scalar::Str(v) => Column::String(vec![Some(v.clone()); rows]),
            })
        }
        ColumnExpr::Add(l, r) => numeric_op(frame, l, r, |a, b| Some(a + b)),
        ColumnExpr::Sub(l, r) => numeric_op(frame, l, r, |a, b| Some(a - b)),
        ColumnExpr::Mul(l, r) => numeric_op(frame, l, r, |a, b| Some(a * b)),
        ColumnExpr::Div(l, r) => {
            numeric_op(frame, l, r, |a, b| if b == 0.0 { None } else { Some(a / b) })
        }
        ColumnExpr::Concat(l, r) => {
            let left = eval_expr(frame, l)?;
            let right = eval_expr(frame, r)?;
            let joined: Vec<Option<String>> = (0..frame.row_count())
                .map(|i| match (left.get_string(i), right.get_string(i)) {
                    (Some(a), Some(b)) => Some(format!("{a}{b}")),
                    (Some(a), None) => Some(a),
                    (None, Some(b)) => Some(b),
                    (None, None) => None,
                })
                .collect();
            Ok(Column::String(joined))
        }
    }
}

fn numeric_op<F>(
    frame: &Frame,
    left: &ColumnExpr,
    right: &ColumnExpr,
    op: F,
) -> Result<Column, SandboxError>
where
    F: Fn(f64, f64) -> Option<f64>,
{
    let left = eval_expr(frame, left)?;
    let right = eval_expr(frame, right)?;
    let values: Vec<Option<f64>> = (0..frame.row_count())
        .map(|i| match (left.to_f64(i), right.to_f64(i)) {
            (Some(a), Some(b)) => op(a, b),
            _ => None,
        })
        .collect();
    Ok(Column::Float64(values))
}

/// Groups are keyed and emitted in sorted key order so that re-executing an
/// accepted program reproduces its original output exactly.
fn group_by(
    frame: &Frame,
    by: &[String],
    aggregates: &[Aggregate],
) -> Result<Frame, SandboxError> {
    if by.is_empty() && aggregates.is_empty() {
        return Err(SandboxError::Exec(
            "group_by needs grouping columns or aggregates".to_string(),
        ));
    }
    for name in by {
        if frame.get_column(name).is_none() {
            return Err(SandboxError::Exec(format!("column not found: {name}")));
        }
    }
    for agg in aggregates {
        if frame.get_column(&agg.column).is_none() {
            return Err(SandboxError::Exec(format!(
                "column not found: {}",
                agg.column
            )));
        }
    }

    let mut groups: BTreeMap<Vec<String>, Vec<usize>> = BTreeMap::new();
    for i in 0..frame.row_count() {
        let key: Vec<String> = by
            .iter()
            .map(|name| {
                frame
                    .get_column(name)
                    .and_then(|c| c.get_string(i))
                    .unwrap_or_else(|| "NULL".to_string())
            })
            .collect();
        groups.entry(key).or_default().push(i);
    }

    let mut key_columns: Vec<Vec<Option<String>>> = vec![Vec::new(); by.len()];
    let mut agg_columns: Vec<Vec<Option<String>>> = vec![Vec::new(); aggregates.len()];
    for (key, indices) in &groups {
        for (slot, part) in key_columns.iter_mut().zip(key) {
            slot.push(Some(part.clone()));
        }
        for (slot, agg) in agg_columns.iter_mut().zip(aggregates) {
            slot.push(aggregate_value(frame, agg, indices)?);
        }
    }

    let mut result = Frame::new(format!("{}_grouped", frame.meta.name));
    for (name, values) in by.iter().zip(key_columns) {
        result.add_column(name.clone(), Column::String(values))?;
    }
    for (agg, values) in aggregates.iter().zip(agg_columns) {
        let data_type = aggregate_output_type(frame, agg);
        let column = Column::from_strings(&values, data_type)
            .map_err(|e| SandboxError::Exec(e.to_string()))?;
        result.add_column(agg.output_name(), column)?;
    }
    Ok(result)
}

fn aggregate_output_type(frame: &Frame, agg: &Aggregate) -> DataType {
    match agg.func {
        AggFn::Count | AggFn::CountDistinct => DataType::Int64,
        AggFn::Min | AggFn::Max => {
            if frame.get_column(&agg.column).is_some_and(Column::is_numeric) {
                DataType::Float64
            } else {
                DataType::String
            }
        }
        _ => DataType::Float64,
    }
}

fn aggregate_value(
    frame: &Frame,
    agg: &Aggregate,
    indices: &[usize],
) -> Result<Option<String>, SandboxError> {
    let column = frame
        .get_column(&agg.column)
        .ok_or_else(|| SandboxError::Exec(format!("column not found: {}", agg.column)))?;
    let numeric = || -> Vec<f64> { indices.iter().filter_map(|&i| column.to_f64(i)).collect() };
    let value = match agg.func {
        AggFn::Count => Some(indices.len().to_string()),
        AggFn::CountDistinct => {
            let mut values: Vec<String> =
                indices.iter().filter_map(|&i| column.get_string(i)).collect();
            values.sort();
            values.dedup();
            Some(values.len().to_string())
        }
        AggFn::Sum => {
            let values = numeric();
            Some(values.iter().sum::<f64>().to_string())
        }
        AggFn::Mean => {
            let values = numeric();
            if values.is_empty() {
                None
            } else {
                Some((values.iter().sum::<f64>() / values.len() as f64).to_string())
            }
        }
        AggFn::Median => {
            let mut values = numeric();
            if values.is_empty() {
                None
            } else {
                values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let mid = values.len() / 2;
                let median = if values.len() % 2 == 0 {
                    (values[mid - 1] + values[mid]) / 2.0
                } else {
                    values[mid]
                };
                Some(median.to_string())
            }
        }
        AggFn::Std => {
            let values = numeric();
            if values.len() < 2 {
                None
            } else {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                    / (values.len() - 1) as f64;
                Some(variance.sqrt().to_string())
            }
        }
        AggFn::Min | AggFn::Max => {
            if column.is_numeric() {
                let values = numeric();
                let picked = if agg.func == AggFn::Min {
                    values.iter().cloned().fold(f64::INFINITY, f64::min)
                } else {
                    values.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
                };
                if values.is_empty() {
                    None
                } else {
                    Some(picked.to_string())
                }
            } else {
                let mut values: Vec<String> =
                    indices.iter().filter_map(|&i| column.get_string(i)).collect();
                values.sort();
                if agg.func == AggFn::Min {
                    values.first().cloned()
                } else {
                    values.last().cloned()
                }
            }
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ColumnBuilder;

    fn sales_frame() -> Frame {
        let mut frame = Frame::new("sales");
        let mut region = ColumnBuilder::new();
        let mut amount = ColumnBuilder::new();
        for (r, a) in [("North", "10"), ("South", "20"), ("North", "5"), ("East", "8")] {
            region.push(r);
            amount.push(a);
        }
        frame.add_column("region", region.build().unwrap()).unwrap();
        frame.add_column("amount", amount.build().unwrap()).unwrap();
        frame
    }

    fn filter_north() -> TransformOp {
        TransformOp::Filter {
            predicate: Predicate::Cond(Condition {
                column: "region".to_string(),
                op: CmpOp::Eq,
                value: Scalar::Str("North".to_string()),
            }),
        }
    }

    #[test]
    fn filter_and_group_totals() {
        let program = Program::Transform {
            ops: vec![
                filter_north(),
                TransformOp::GroupBy {
                    by: vec!["region".to_string()],
                    aggregates: vec![Aggregate {
                        column: "amount".to_string(),
                        func: AggFn::Sum,
                        alias: Some("total".to_string()),
                    }],
                },
            ],
        };
        let executor = SandboxExecutor::new();
        let Output::Table(result) = executor
            .run(&program, &sales_frame(), OutputKind::Table)
            .unwrap()
        else {
            panic!("expected table output");
        };
        assert_eq!(result.row_count(), 1);
        assert_eq!(
            result.get_column("total").unwrap().to_f64(0),
            Some(15.0)
        );
    }

    #[test]
    fn unknown_column_is_an_exec_error() {
        let program = Program::Transform {
            ops: vec![TransformOp::Sort {
                by: "missing".to_string(),
                descending: false,
            }],
        };
        let result = SandboxExecutor::new().run(&program, &sales_frame(), OutputKind::Table);
        assert!(matches!(result, Err(SandboxError::Exec(_))));
    }

    #[test]
    fn kind_mismatch_is_a_contract_error() {
        let program = Program::Transform { ops: vec![] };
        let result = SandboxExecutor::new().run(&program, &sales_frame(), OutputKind::Image);
        assert!(matches!(result, Err(SandboxError::Contract(_))));
    }

    #[test]
    fn source_frame_is_untouched() {
        let frame = sales_frame();
        let program = Program::Transform {
            ops: vec![filter_north(), TransformOp::Limit { rows: 1 }],
        };
        SandboxExecutor::new()
            .run(&program, &frame, OutputKind::Table)
            .unwrap();
        assert_eq!(frame.row_count(), 4);
    }

    #[test]
    fn derive_divides_with_null_on_zero() {
        let mut frame = sales_frame();
        let mut divisor = ColumnBuilder::new();
        for v in ["2", "0", "1", "4"] {
            divisor.push(v);
        }
        frame.add_column("divisor", divisor.build().unwrap()).unwrap();
        let program = Program::Transform {
            ops: vec![TransformOp::Derive {
                name: "ratio".to_string(),
                expr: ColumnExpr::Div(
                    Box::new(ColumnExpr::Column("amount".to_string())),
                    Box::new(ColumnExpr::Column("divisor".to_string())),
                ),
            }],
        };
        let Output::Table(result) = SandboxExecutor::new()
            .run(&program, &frame, OutputKind::Table)
            .unwrap()
        else {
            panic!("expected table output");
        };
        let ratio = result.get_column("ratio").unwrap();
        assert_eq!(ratio.to_f64(0), Some(5.0));
        assert_eq!(ratio.to_f64(1), None);
    }
}
