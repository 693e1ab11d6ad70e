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

use async_trait::async_trait;
use port_contracts::{PortReply, PortRequest, PortResult};

pub mod http;
pub mod retry;
pub mod scripted;

pub use http::HttpPort;
pub use retry::call_with_retry;
pub use scripted::ScriptedPort;

/// The external reasoning capability: a structured prompt in, a structured
/// reply out. Implementations must be safe to call concurrently from
/// independent pipelines.
#[async_trait]
pub trait ReasoningPort: Send + Sync {
    async fn respond(&self, request: PortRequest) -> PortResult<PortReply>;
}
