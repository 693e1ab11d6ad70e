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

pub mod config;
pub mod dataset;
pub mod digest;
pub mod events;
pub mod history;
pub mod memory;
pub mod pipeline;
pub mod port;
pub mod program;
pub mod roles;
pub mod sandbox;
pub mod session;

pub use config::{EngineConfig, RetryConfig};
pub use dataset::{import_csv_path, import_csv_reader, Column, DataType, Frame};
pub use digest::{build_digest, DigestConfig};
pub use events::{EventSink, Phase, SessionEvent};
pub use history::{History, HistoryError};
pub use memory::{ConversationMemory, Speaker};
pub use pipeline::{PipelineKind, SubmitError};
pub use port::{call_with_retry, HttpPort, ReasoningPort, ScriptedPort};
pub use program::{ChartSpec, Mark, Program, TransformOp};
pub use sandbox::{Output, OutputKind, SandboxError, SandboxExecutor};
pub use session::Session;
