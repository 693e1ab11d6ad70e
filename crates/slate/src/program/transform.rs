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
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Bool(_) | Scalar::Str(_) => None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Scalar::Bool(v) => v.to_string(),
            Scalar::Int(v) => v.to_string(),
            Scalar::Float(v) => v.to_string(),
            Scalar::Str(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub op: CmpOp,
    pub value: Scalar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Cond(Condition),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFn {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    Median,
    Std,
    CountDistinct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub column: String,
    pub func: AggFn,
    #[serde(default)]
    pub alias: Option<String>,
}

impl Aggregate {
    pub fn output_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("{}_{:?}", self.column, self.func).to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnExpr {
    Column(String),
    Value(Scalar),
    Add(Box<ColumnExpr>, Box<ColumnExpr>),
    Sub(Box<ColumnExpr>, Box<ColumnExpr>),
    Mul(Box<ColumnExpr>, Box<ColumnExpr>),
    Div(Box<ColumnExpr>, Box<ColumnExpr>),
    Concat(Box<ColumnExpr>, Box<ColumnExpr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformOp {
    Select { columns: Vec<String> },
    Filter { predicate: Predicate },
    Derive { name: String, expr: ColumnExpr },
    GroupBy { by: Vec<String>, aggregates: Vec<Aggregate> },
    Sort { by: String, #[serde(default)] descending: bool },
    Limit { rows: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_round_trip_through_json() {
        let ops = vec![
            TransformOp::Filter {
                predicate: Predicate::Cond(Condition {
                    column: "region".to_string(),
                    op: CmpOp::Eq,
                    value: Scalar::Str("North".to_string()),
                }),
            },
            TransformOp::GroupBy {
                by: vec!["region".to_string()],
                aggregates: vec![Aggregate {
                    column: "amount".to_string(),
                    func: AggFn::Sum,
                    alias: Some("total".to_string()),
                }],
            },
        ];
        let json = serde_json::to_string(&ops).unwrap();
        let back: Vec<TransformOp> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ops);
    }

    #[test]
    fn scalar_accepts_bare_json_values() {
        let scalar: Scalar = serde_json::from_str("42").unwrap();
        assert_eq!(scalar, Scalar::Int(42));
        let scalar: Scalar = serde_json::from_str("\"North\"").unwrap();
        assert_eq!(scalar, Scalar::Str("North".to_string()));
    }

    #[test]
    fn aggregate_default_name_is_derived() {
        let agg = Aggregate {
            column: "amount".to_string(),
            func: AggFn::Mean,
            alias: None,
        };
        assert_eq!(agg.output_name(), "amount_mean");
    }
}
