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

use crate::config::EngineConfig;
use crate::dataset::Frame;
use crate::events::EventSink;
use crate::history::History;
use crate::memory::ConversationMemory;
use crate::port::ReasoningPort;
use crate::program::Program;
use crate::sandbox::SandboxExecutor;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod query;
pub mod revise;

/// Tagged variant selecting which request family a controller serves; a
/// single controller implementation dispatches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Query,
    Adjustment,
    Draw,
    DrawAdjustment,
}

#[derive(Debug)]
pub enum PipelineRequest {
    Query { text: String },
    Adjustment { base: usize, text: String },
    Draw { frame: Frame, text: String },
    DrawAdjustment { base: usize, text: String },
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Pipeline is still processing the previous request")]
    Busy,

    #[error("Pipeline has terminated")]
    Terminated,
}

pub type SharedHistory<T> = Arc<Mutex<History<T>>>;
pub type SharedDigest = Arc<Mutex<Option<String>>>;
pub type SharedFrameSlot = Arc<Mutex<Option<Frame>>>;

/// Everything a controller shares with its session and, for the paired
/// pipelines, with its sibling controller.
pub struct PipelineContext {
    pub kind: PipelineKind,
    pub port: Arc<dyn ReasoningPort>,
    pub dataset: Arc<Frame>,
    pub description: String,
    pub config: Arc<EngineConfig>,
    pub events: EventSink,
    pub history: SharedHistory<Program>,
    pub artifacts: Option<SharedHistory<Vec<u8>>>,
    pub digest: SharedDigest,
    pub draw_source: Option<SharedFrameSlot>,
}

pub struct PipelineHandle {
    kind: PipelineKind,
    tx: mpsc::Sender<PipelineRequest>,
    join: JoinHandle<()>,
}

impl PipelineHandle {
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// Hands a request to the control loop. The channel holds exactly one
    /// request, so a second submission while one is in flight is rejected
    /// instead of overwriting it.
    pub fn submit(&self, request: PipelineRequest) -> Result<(), SubmitError> {
        self.tx.try_send(request).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => SubmitError::Busy,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Terminated,
        })
    }

    /// Forceful teardown: the only cancellation mechanism for in-flight work.
    pub fn abort(&self) {
        self.join.abort();
    }
}

pub fn spawn(context: PipelineContext) -> PipelineHandle {
    let (tx, rx) = mpsc::channel(1);
    let kind = context.kind;
    let memory = ConversationMemory::new(context.config.memory_pairs);
    let controller = Controller {
        kind,
        port: context.port,
        dataset: context.dataset,
        description: context.description,
        config: context.config,
        events: context.events,
        history: context.history,
        artifacts: context.artifacts,
        digest: context.digest,
        draw_source: context.draw_source,
        memory,
        executor: SandboxExecutor::new(),
        repair_rounds: 0,
        rx,
    };
    let join = tokio::spawn(controller.run());
    PipelineHandle { kind, tx, join }
}

pub(crate) struct Controller {
    pub(crate) kind: PipelineKind,
    pub(crate) port: Arc<dyn ReasoningPort>,
    pub(crate) dataset: Arc<Frame>,
    pub(crate) description: String,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) events: EventSink,
    pub(crate) history: SharedHistory<Program>,
    pub(crate) artifacts: Option<SharedHistory<Vec<u8>>>,
    pub(crate) digest: SharedDigest,
    pub(crate) draw_source: Option<SharedFrameSlot>,
    pub(crate) memory: ConversationMemory,
    pub(crate) executor: SandboxExecutor,
    pub(crate) repair_rounds: u32,
    rx: mpsc::Receiver<PipelineRequest>,
}

impl Controller {
    async fn run(mut self) {
        info!(kind = ?self.kind, "Pipeline controller started");
        self.events.mode_changed(true);
        while let Some(request) = self.rx.recv().await {
            self.events.mode_changed(false);
            match (self.kind, request) {
                (PipelineKind::Query, PipelineRequest::Query { text }) => {
                    self.handle_query(text).await;
                }
                (PipelineKind::Adjustment, PipelineRequest::Adjustment { base, text }) => {
                    self.handle_adjustment(base, text).await;
                }
                (PipelineKind::Draw, PipelineRequest::Draw { frame, text }) => {
                    self.handle_draw(frame, text).await;
                }
                (
                    PipelineKind::DrawAdjustment,
                    PipelineRequest::DrawAdjustment { base, text },
                ) => {
                    self.handle_draw_adjustment(base, text).await;
                }
                (kind, request) => {
                    warn!(?kind, ?request, "Dropping request routed to the wrong pipeline");
                }
            }
            self.events.mode_changed(true);
        }
        debug!(kind = ?self.kind, "Pipeline controller stopped");
    }
}
