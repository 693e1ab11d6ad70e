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
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Clarifier,
    Planner,
    Synthesis,
    Repair,
    Adjustment,
    Draw,
    DrawAdjustment,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Clarifier => "clarifier",
            Role::Planner => "planner",
            Role::Synthesis => "synthesis",
            Role::Repair => "repair",
            Role::Adjustment => "adjustment",
            Role::Draw => "draw",
            Role::DrawAdjustment => "draw_adjustment",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.as_str() {
            "clarifier" => Role::Clarifier,
            "planner" => Role::Planner,
            "repair" => Role::Repair,
            "adjustment" => Role::Adjustment,
            "draw" => Role::Draw,
            "draw_adjustment" => Role::DrawAdjustment,
            _ => Role::Synthesis,
        }
    }
}

#[derive(Debug, Error)]
pub enum PortError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Transient port failure: {0}")]
    Transient(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Timed out waiting for reply")]
    Timeout,

    #[error("Malformed reply: {0}")]
    Malformed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PortError {
    /// Retryable kinds are the ones a later identical call may survive.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PortError::Transient(_) | PortError::RateLimited | PortError::Timeout
        )
    }
}

pub type PortResult<T> = Result<T, PortError>;
