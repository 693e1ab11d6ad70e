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
use thiserror::Error;

pub mod chart;
pub mod transform;

pub use chart::{ChartSpec, Mark};
pub use transform::{
    AggFn, Aggregate, CmpOp, ColumnExpr, Condition, Predicate, Scalar, TransformOp,
};

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("No program payload found in reply")]
    Missing,

    #[error("Program does not match the transformation schema: {0}")]
    Schema(#[from] serde_json::Error),
}

/// A generated transformation script. Parsed before any execution; the op
/// vocabulary is the whole capability surface available to generated code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Program {
    Transform {
        ops: Vec<TransformOp>,
    },
    Chart {
        #[serde(default)]
        prepare: Vec<TransformOp>,
        spec: ChartSpec,
    },
}

impl Program {
    pub fn is_chart(&self) -> bool {
        matches!(self, Program::Chart { .. })
    }

    /// Extracts the program from reply text: a fenced ```json block, or the
    /// reply itself when it is a bare JSON object.
    pub fn from_reply_text(text: &str) -> Result<Program, ProgramError> {
        let payload = extract_json_payload(text).ok_or(ProgramError::Missing)?;
        Ok(serde_json::from_str(&payload)?)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

fn extract_json_payload(text: &str) -> Option<String> {
    for fence in ["```json", "```"] {
        if let Some(start) = text.find(fence) {
            let content_start = start + fence.len();
            if let Some(end) = text[content_start..].find("```") {
                let content = text[content_start..content_start + end].trim();
                if content.starts_with('{') {
                    return Some(content.to_string());
                }
            }
        }
    }
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const FENCED: &str = r#"Here is the program.
```json
{"kind":"transform","ops":[{"op":"limit","rows":5}]}
```
"#;

    #[test]
    fn parses_fenced_program() {
        let program = Program::from_reply_text(FENCED).unwrap();
        assert_eq!(
            program,
            Program::Transform {
                ops: vec![TransformOp::Limit { rows: 5 }]
            }
        );
    }

    #[test]
    fn parses_bare_json_object() {
        let program = Program::from_reply_text(
            r#"{"kind":"chart","spec":{"mark":"bar","x":"region","y":"total"}}"#,
        )
        .unwrap();
        assert!(program.is_chart());
    }

    #[test]
    fn missing_payload_is_distinguished_from_bad_schema() {
        assert!(matches!(
            Program::from_reply_text("no code here"),
            Err(ProgramError::Missing)
        ));
        assert!(matches!(
            Program::from_reply_text(r#"{"kind":"unknown"}"#),
            Err(ProgramError::Schema(_))
        ));
    }
}
