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
use crate::events::{EventSink, SessionEvent};
use crate::history::History;
use crate::pipeline::{
    self, PipelineContext, PipelineHandle, PipelineKind, PipelineRequest, SharedDigest,
    SharedFrameSlot, SharedHistory, SubmitError,
};
use crate::port::ReasoningPort;
use crate::program::Program;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

/// One session per imported dataset: the immutable snapshot, one controller
/// per pipeline kind, and the shared version state. Teardown and re-creation
/// of the controllers is the session's only cancellation mechanism.
pub struct Session {
    dataset: Arc<Frame>,
    description: String,
    config: Arc<EngineConfig>,
    port: Arc<dyn ReasoningPort>,
    events: EventSink,
    query: PipelineHandle,
    adjustment: PipelineHandle,
    draw: PipelineHandle,
    draw_adjustment: PipelineHandle,
}

struct SharedState {
    table_history: SharedHistory<Program>,
    table_digest: SharedDigest,
    draw_history: SharedHistory<Program>,
    draw_artifacts: SharedHistory<Vec<u8>>,
    draw_digest: SharedDigest,
    draw_source: SharedFrameSlot,
}

impl SharedState {
    fn fresh() -> Self {
        Self {
            table_history: Arc::new(Mutex::new(History::new())),
            table_digest: Arc::new(Mutex::new(None)),
            draw_history: Arc::new(Mutex::new(History::new())),
            draw_artifacts: Arc::new(Mutex::new(History::new())),
            draw_digest: Arc::new(Mutex::new(None)),
            draw_source: Arc::new(Mutex::new(None)),
        }
    }
}

impl Session {
    pub fn new(
        dataset: Frame,
        description: impl Into<String>,
        port: Arc<dyn ReasoningPort>,
        config: EngineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = EventSink::channel();
        let dataset = Arc::new(dataset);
        let description = description.into();
        let config = Arc::new(config);
        let shared = SharedState::fresh();
        let (query, adjustment, draw, draw_adjustment) = Self::spawn_controllers(
            &dataset,
            &description,
            &port,
            &config,
            &events,
            &shared,
        );
        info!(dataset = %dataset.meta.name, "Session created");
        (
            Self {
                dataset,
                description,
                config,
                port,
                events,
                query,
                adjustment,
                draw,
                draw_adjustment,
            },
            receiver,
        )
    }

    fn spawn_controllers(
        dataset: &Arc<Frame>,
        description: &str,
        port: &Arc<dyn ReasoningPort>,
        config: &Arc<EngineConfig>,
        events: &EventSink,
        shared: &SharedState,
    ) -> (
        PipelineHandle,
        PipelineHandle,
        PipelineHandle,
        PipelineHandle,
    ) {
        let base = |kind: PipelineKind| PipelineContext {
            kind,
            port: port.clone(),
            dataset: dataset.clone(),
            description: description.to_string(),
            config: config.clone(),
            events: events.clone(),
            history: shared.table_history.clone(),
            artifacts: None,
            digest: shared.table_digest.clone(),
            draw_source: None,
        };
        let query = pipeline::spawn(base(PipelineKind::Query));
        let adjustment = pipeline::spawn(base(PipelineKind::Adjustment));
        let draw = pipeline::spawn(PipelineContext {
            history: shared.draw_history.clone(),
            artifacts: Some(shared.draw_artifacts.clone()),
            digest: shared.draw_digest.clone(),
            draw_source: Some(shared.draw_source.clone()),
            ..base(PipelineKind::Draw)
        });
        let draw_adjustment = pipeline::spawn(PipelineContext {
            history: shared.draw_history.clone(),
            artifacts: Some(shared.draw_artifacts.clone()),
            digest: shared.draw_digest.clone(),
            draw_source: Some(shared.draw_source.clone()),
            ..base(PipelineKind::DrawAdjustment)
        });
        (query, adjustment, draw, draw_adjustment)
    }

    pub fn submit_query(&self, text: impl Into<String>) -> Result<(), SubmitError> {
        let text = text.into();
        self.query
            .submit(PipelineRequest::Query { text: text.clone() })?;
        self.events.message(text, true);
        Ok(())
    }

    pub fn submit_adjustment(
        &self,
        base: usize,
        text: impl Into<String>,
    ) -> Result<(), SubmitError> {
        self.adjustment.submit(PipelineRequest::Adjustment {
            base,
            text: text.into(),
        })
    }

    pub fn submit_drawing(&self, frame: Frame, text: impl Into<String>) -> Result<(), SubmitError> {
        self.draw.submit(PipelineRequest::Draw {
            frame,
            text: text.into(),
        })
    }

    pub fn submit_draw_adjustment(
        &self,
        base: usize,
        text: impl Into<String>,
    ) -> Result<(), SubmitError> {
        self.draw_adjustment
            .submit(PipelineRequest::DrawAdjustment {
                base,
                text: text.into(),
            })
    }

    /// Stop-and-recreate: aborts all four controllers, discards in-flight
    /// state and version histories, and spawns fresh controllers over the
    /// same snapshot.
    pub fn reset(&mut self) {
        info!("Session reset");
        for handle in [
            &self.query,
            &self.adjustment,
            &self.draw,
            &self.draw_adjustment,
        ] {
            handle.abort();
        }
        let shared = SharedState::fresh();
        let (query, adjustment, draw, draw_adjustment) = Self::spawn_controllers(
            &self.dataset,
            &self.description,
            &self.port,
            &self.config,
            &self.events,
            &shared,
        );
        self.query = query;
        self.adjustment = adjustment;
        self.draw = draw;
        self.draw_adjustment = draw_adjustment;
        self.events.history_updated(Vec::new());
        self.events.mode_changed(true);
    }

    /// Replaces the dataset snapshot; implies a full reset.
    pub fn import(&mut self, dataset: Frame, description: impl Into<String>) {
        self.dataset = Arc::new(dataset);
        self.description = description.into();
        self.reset();
    }

    pub fn dataset(&self) -> Arc<Frame> {
        self.dataset.clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for handle in [
            &self.query,
            &self.adjustment,
            &self.draw,
            &self.draw_adjustment,
        ] {
            handle.abort();
        }
    }
}
