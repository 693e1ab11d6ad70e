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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}
fn default_api_version() -> String {
    "2023-06-01".to_string()
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.2
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            endpoint: None,
            api_key_env: default_api_key_env(),
            api_version: default_api_version(),
            timeout_seconds: default_timeout_seconds(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl PortConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}
