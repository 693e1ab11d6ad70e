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

use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Requester,
    Analyst,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Requester => f.write_str("requester"),
            Speaker::Analyst => f.write_str("analyst"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// Sliding window of conversation turns. The cap counts turn *pairs*: the
/// window never holds more than `2 * max_pairs` entries, and eviction drops
/// the oldest entries first.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    max_pairs: usize,
}

impl ConversationMemory {
    pub fn new(max_pairs: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_pairs: max_pairs.max(1),
        }
    }

    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.turns.push_back(Turn {
            speaker,
            text: text.into(),
        });
        while self.turns.len() > self.max_pairs * 2 {
            self.turns.pop_front();
        }
    }

    /// Rolls back the newest entry; used when a port call for the turn was
    /// abandoned.
    pub fn discard_last(&mut self) {
        self.turns.pop_back();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn render(&self) -> String {
        if self.turns.is_empty() {
            return "No conversation so far.".to_string();
        }
        self.turns
            .iter()
            .map(|turn| format!("{}: {}", turn.speaker, turn.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
