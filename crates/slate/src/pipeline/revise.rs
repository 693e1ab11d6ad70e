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

//! The three single-shot pipelines: synthesize from an existing base, run
//! once, accept or explain. There is no repair stage; any failure leaves the
//! histories untouched and reports to the requester.

use crate::dataset::Frame;
use crate::digest::build_digest;
use crate::events::Phase;
use crate::pipeline::Controller;
use crate::port::call_with_retry;
use crate::program::Program;
use crate::roles;
use crate::sandbox::{Output, OutputKind};
use port_contracts::{PortRequest, Role};
use tracing::{info, warn};

const PORT_DOWN: &str =
    "The reasoning service is not responding right now; nothing was changed. Please try again.";

impl Controller {
    pub(crate) async fn handle_adjustment(&mut self, base: usize, text: String) {
        let digest = self.cached_or_fresh_digest(&text).await;
        let Some(base_program) = self.history.lock().await.get(base).cloned() else {
            self.events.message(
                format!("Version {base} does not exist; nothing was changed."),
                false,
            );
            return;
        };

        self.events.phase_changed(Phase::Operating);
        let request = roles::adjustment_request(&digest, &base_program.to_json(), &text);
        let Some(program) = self.revise_program(request, Role::Adjustment).await else {
            return;
        };

        match self.executor.run(&program, &self.dataset, OutputKind::Table) {
            Ok(Output::Table(frame)) => {
                let mut history = self.history.lock().await;
                if let Err(error) = history.fork_from(base) {
                    warn!(%error, "Adjustment base vanished under us");
                    self.events.message(
                        format!("Version {base} does not exist; nothing was changed."),
                        false,
                    );
                    return;
                }
                history.push(program);
                self.events.history_updated(history.entries().to_vec());
                drop(history);
                info!(base, rows = frame.row_count(), "Adjustment accepted");
                self.events.tabular_result(frame, false);
                self.events.message(
                    "The adjusted table is ready. Keep adjusting it, or move on.",
                    false,
                );
            }
            Ok(Output::Image(_)) | Err(_) => {
                self.events.message(
                    "The adjustment could not be executed; the base version is unchanged. \
                     Please try again.",
                    false,
                );
            }
        }
    }

    pub(crate) async fn handle_draw(&mut self, frame: Frame, text: String) {
        // Drawing always starts cold: fresh digest for the chosen view.
        self.events.phase_changed(Phase::Seeking);
        let digest = build_digest(&frame, "", &text, &self.config.digest);
        *self.digest.lock().await = Some(digest.clone());
        self.events.digest_updated(&digest);

        self.events.phase_changed(Phase::Operating);
        let request = roles::draw_request(&digest, &text);
        let Some(program) = self.revise_program(request, Role::Draw).await else {
            return;
        };

        match self.executor.run(&program, &frame, OutputKind::Image) {
            Ok(Output::Image(bytes)) => {
                info!(bytes = bytes.len(), "Chart rendered");
                self.events.image_result(bytes.clone());
                let mut history = self.history.lock().await;
                history.clear();
                history.push(program);
                self.events.history_updated(history.entries().to_vec());
                drop(history);
                if let Some(artifacts) = &self.artifacts {
                    let mut artifacts = artifacts.lock().await;
                    artifacts.clear();
                    artifacts.push(bytes);
                }
                if let Some(source) = &self.draw_source {
                    *source.lock().await = Some(frame);
                }
                self.events.message(
                    "The chart is ready. Ask for adjustments to refine it.",
                    false,
                );
            }
            Ok(Output::Table(_)) | Err(_) => {
                self.events.message(
                    "The chart could not be drawn from that view; please try again.",
                    false,
                );
            }
        }
    }

    pub(crate) async fn handle_draw_adjustment(&mut self, base: usize, text: String) {
        // Reuses the digest and source view computed by the draw pipeline.
        let digest = self.digest.lock().await.clone();
        let source = match &self.draw_source {
            Some(slot) => slot.lock().await.clone(),
            None => None,
        };
        let (Some(digest), Some(source)) = (digest, source) else {
            self.events
                .message("There is no chart to adjust yet; draw one first.", false);
            return;
        };
        let Some(base_program) = self.history.lock().await.get(base).cloned() else {
            self.events.message(
                format!("Chart version {base} does not exist; nothing was changed."),
                false,
            );
            return;
        };

        self.events.phase_changed(Phase::Operating);
        let request = roles::draw_adjustment_request(&digest, &base_program.to_json(), &text);
        let Some(program) = self.revise_program(request, Role::DrawAdjustment).await else {
            return;
        };

        match self.executor.run(&program, &source, OutputKind::Image) {
            Ok(Output::Image(bytes)) => {
                self.events.image_result(bytes.clone());
                let mut history = self.history.lock().await;
                if let Err(error) = history.fork_from(base) {
                    warn!(%error, "Draw-adjustment base vanished under us");
                    self.events.message(
                        format!("Chart version {base} does not exist; nothing was changed."),
                        false,
                    );
                    return;
                }
                history.push(program);
                self.events.history_updated(history.entries().to_vec());
                drop(history);
                if let Some(artifacts) = &self.artifacts {
                    let mut artifacts = artifacts.lock().await;
                    // Program and artifact histories stay index-aligned.
                    if artifacts.fork_from(base).is_ok() {
                        artifacts.push(bytes);
                    }
                }
                info!(base, "Chart adjustment accepted");
                self.events.message(
                    "The adjusted chart is ready. Keep refining it if needed.",
                    false,
                );
            }
            Ok(Output::Table(_)) | Err(_) => {
                self.events.message(
                    "The chart adjustment could not be executed; the previous chart is \
                     unchanged. Please try again.",
                    false,
                );
            }
        }
    }

    /// One port round-trip producing a revised program, or a user-visible
    /// explanation and `None`.
    async fn revise_program(&mut self, request: PortRequest, role: Role) -> Option<Program> {
        let reply = match call_with_retry(self.port.as_ref(), request, &self.config.retry).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(%error, %role, "Port call failed");
                self.events.message(PORT_DOWN, false);
                return None;
            }
        };
        match roles::parse_synthesis(&reply.content, role) {
            Ok(synthesis) if synthesis.accepted => synthesis.program,
            Ok(synthesis) => {
                self.events.message(
                    format!(
                        "This cannot be done with the current data: {} If you believe it \
                         should work, please try rephrasing.",
                        synthesis.reason
                    ),
                    false,
                );
                None
            }
            Err(violation) => {
                warn!(%violation, "Single-shot reply violated its contract");
                self.events.message(
                    "The revision reply was malformed; nothing was changed. Please try again.",
                    false,
                );
                None
            }
        }
    }

    async fn cached_or_fresh_digest(&mut self, request_text: &str) -> String {
        if let Some(digest) = self.digest.lock().await.clone() {
            return digest;
        }
        self.events.phase_changed(Phase::Seeking);
        let digest = build_digest(
            &self.dataset,
            &self.description,
            request_text,
            &self.config.digest,
        );
        *self.digest.lock().await = Some(digest.clone());
        self.events.digest_updated(&digest);
        digest
    }
}
