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

use crate::program::{Program, ProgramError};
use port_contracts::Role;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{role} reply violates its contract: {message}")]
pub struct ProtocolViolation {
    pub role: Role,
    pub message: String,
}

impl ProtocolViolation {
    fn new(role: Role, message: impl Into<String>) -> Self {
        Self {
            role,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClarifierReply {
    pub handoff: bool,
    pub reply: String,
}

#[derive(Debug, Clone)]
pub struct PlannerReply {
    pub brief: String,
}

/// Shared shape of the program-producing roles: either an accepted program or
/// a prose reason why the task cannot be served.
#[derive(Debug, Clone)]
pub struct SynthesisReply {
    pub accepted: bool,
    pub program: Option<Program>,
    pub reason: String,
}

fn flag_field(content: &str, marker: &str) -> Option<bool> {
    let pattern = format!(r"(?i){marker}\s*:\s*\[?\s*([yn])");
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(content)?;
    Some(caps.get(1)?.as_str().eq_ignore_ascii_case("y"))
}

fn text_field(content: &str, marker: &str) -> Option<String> {
    let pattern = format!(r"(?is){marker}\s*:\s*(.*)");
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(content)?;
    let raw = caps.get(1)?.as_str().trim();
    let cleaned = raw
        .strip_prefix('[')
        .unwrap_or(raw)
        .trim_end_matches(']')
        .trim();
    Some(cleaned.to_string())
}

pub fn parse_clarifier(content: &str) -> Result<ClarifierReply, ProtocolViolation> {
    let handoff = flag_field(content, "handoff")
        .ok_or_else(|| ProtocolViolation::new(Role::Clarifier, "missing 'handoff:' marker"))?;
    let reply = text_field(content, "reply")
        .ok_or_else(|| ProtocolViolation::new(Role::Clarifier, "missing 'reply:' marker"))?;
    if reply.is_empty() {
        return Err(ProtocolViolation::new(Role::Clarifier, "empty reply text"));
    }
    Ok(ClarifierReply { handoff, reply })
}

/// The planner is lenient: a reply without the marker is taken verbatim as
/// the brief, since every planner output is consumed exactly once downstream.
pub fn parse_planner(content: &str) -> Result<PlannerReply, ProtocolViolation> {
    let brief = text_field(content, "brief").unwrap_or_else(|| content.trim().to_string());
    if brief.is_empty() {
        return Err(ProtocolViolation::new(Role::Planner, "empty task brief"));
    }
    Ok(PlannerReply { brief })
}

pub fn parse_synthesis(content: &str, role: Role) -> Result<SynthesisReply, ProtocolViolation> {
    let marker = if role == Role::Repair {
        "repairable"
    } else {
        "feasible"
    };
    let accepted = flag_field(content, marker)
        .ok_or_else(|| ProtocolViolation::new(role, format!("missing '{marker}:' marker")))?;
    let body = text_field(content, "program").unwrap_or_else(|| content.trim().to_string());
    if !accepted {
        return Ok(SynthesisReply {
            accepted: false,
            program: None,
            reason: body,
        });
    }
    match Program::from_reply_text(content) {
        Ok(program) => Ok(SynthesisReply {
            accepted: true,
            program: Some(program),
            reason: String::new(),
        }),
        Err(ProgramError::Missing) => Err(ProtocolViolation::new(
            role,
            "declared feasible but carried no program payload",
        )),
        Err(ProgramError::Schema(e)) => Err(ProtocolViolation::new(
            role,
            format!("program payload does not match the schema: {e}"),
        )),
    }
}
