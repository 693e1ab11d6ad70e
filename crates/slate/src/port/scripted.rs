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

use crate::port::ReasoningPort;
use async_trait::async_trait;
use port_contracts::{PortError, PortReply, PortRequest, PortResult};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Deterministic reasoning port: replies (or errors) are served in the order
/// they were queued. Used by tests and the offline demo walkthrough.
#[derive(Debug, Default)]
pub struct ScriptedPort {
    replies: Mutex<VecDeque<PortResult<String>>>,
    requests: Mutex<Vec<PortRequest>>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, content: impl Into<String>) {
        self.replies
            .lock()
            .expect("scripted port lock poisoned")
            .push_back(Ok(content.into()));
    }

    pub fn push_error(&self, error: PortError) {
        self.replies
            .lock()
            .expect("scripted port lock poisoned")
            .push_back(Err(error));
    }

    /// Requests seen so far, for asserting on prompts and role routing.
    pub fn requests(&self) -> Vec<PortRequest> {
        self.requests
            .lock()
            .expect("scripted port lock poisoned")
            .clone()
    }
}

#[async_trait]
impl ReasoningPort for ScriptedPort {
    async fn respond(&self, request: PortRequest) -> PortResult<PortReply> {
        let next = self
            .replies
            .lock()
            .expect("scripted port lock poisoned")
            .pop_front();
        self.requests
            .lock()
            .expect("scripted port lock poisoned")
            .push(request.clone());
        match next {
            Some(Ok(content)) => Ok(PortReply::new(request.id, content, "scripted")),
            Some(Err(error)) => Err(error),
            None => Err(PortError::Internal("scripted port exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use port_contracts::Role;

    #[tokio::test]
    async fn serves_queued_replies_in_order() {
        let port = ScriptedPort::new();
        port.push_reply("first");
        port.push_error(PortError::RateLimited);
        assert_eq!(
            port.respond(PortRequest::new(Role::Clarifier, "a"))
                .await
                .unwrap()
                .content,
            "first"
        );
        assert!(matches!(
            port.respond(PortRequest::new(Role::Clarifier, "b")).await,
            Err(PortError::RateLimited)
        ));
        assert!(matches!(
            port.respond(PortRequest::new(Role::Clarifier, "c")).await,
            Err(PortError::Internal(_))
        ));
        assert_eq!(port.requests().len(), 3);
    }
}
