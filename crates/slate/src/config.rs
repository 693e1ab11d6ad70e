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

use crate::digest::DigestConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Conversation window size, counted in turn pairs.
    #[serde(default = "default_memory_pairs")]
    pub memory_pairs: usize,
    /// Consecutive automated repair attempts allowed for one task brief.
    #[serde(default = "default_repair_bound")]
    pub repair_bound: u32,
    /// Corrective reissues allowed when the clarifier violates its contract.
    #[serde(default = "default_clarify_reissue_bound")]
    pub clarify_reissue_bound: u32,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub digest: DigestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: u64,
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_seconds)
    }
}

fn default_memory_pairs() -> usize {
    15
}
fn default_repair_bound() -> u32 {
    2
}
fn default_clarify_reissue_bound() -> u32 {
    3
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_backoff_seconds() -> u64 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            backoff_seconds: default_backoff_seconds(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_pairs: default_memory_pairs(),
            repair_bound: default_repair_bound(),
            clarify_reissue_bound: default_clarify_reissue_bound(),
            retry: RetryConfig::default(),
            digest: DigestConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml_str(&content)?)
    }
}
