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

use crate::dataset::Frame;
use crate::program::Program;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Seeking,
    Operating,
    Thinking,
}

/// Outbound notifications consumed by the front end.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Message { text: String, from_user: bool },
    TabularResult { frame: Frame, new_series: bool },
    ImageResult { bytes: Vec<u8> },
    HistoryUpdated { programs: Vec<Program> },
    DigestUpdated { digest: String },
    ModeChanged { conversational: bool },
    PhaseChanged { phase: Phase },
}

/// Fan-out handle shared by all pipeline controllers of a session. Sends are
/// best-effort: a dropped receiver only means nobody is listening any more.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped, discarding event");
        }
    }

    pub fn message(&self, text: impl Into<String>, from_user: bool) {
        self.emit(SessionEvent::Message {
            text: text.into(),
            from_user,
        });
    }

    pub fn tabular_result(&self, frame: Frame, new_series: bool) {
        self.emit(SessionEvent::TabularResult { frame, new_series });
    }

    pub fn image_result(&self, bytes: Vec<u8>) {
        self.emit(SessionEvent::ImageResult { bytes });
    }

    pub fn history_updated(&self, programs: Vec<Program>) {
        self.emit(SessionEvent::HistoryUpdated { programs });
    }

    pub fn digest_updated(&self, digest: impl Into<String>) {
        self.emit(SessionEvent::DigestUpdated {
            digest: digest.into(),
        });
    }

    pub fn mode_changed(&self, conversational: bool) {
        self.emit(SessionEvent::ModeChanged { conversational });
    }

    pub fn phase_changed(&self, phase: Phase) {
        self.emit(SessionEvent::PhaseChanged { phase });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.phase_changed(Phase::Seeking);
        sink.message("hello", false);
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::PhaseChanged {
                phase: Phase::Seeking
            })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::Message { from_user: false, .. })
        ));
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.message("nobody listening", false);
    }
}
