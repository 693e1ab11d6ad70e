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

use crate::config::RetryConfig;
use crate::port::ReasoningPort;
use port_contracts::{PortError, PortReply, PortRequest, PortResult};
use tracing::warn;

/// Issues a port call with the bounded retry policy: retryable failures get a
/// fixed backoff and another attempt; the last failure is returned once the
/// attempts are spent, and the caller must abort its in-flight request.
pub async fn call_with_retry(
    port: &dyn ReasoningPort,
    request: PortRequest,
    retry: &RetryConfig,
) -> PortResult<PortReply> {
    let attempts = retry.attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        match port.respond(request.clone()).await {
            Ok(reply) => return Ok(reply),
            Err(error) if error.is_retryable() => {
                warn!(attempt, attempts, role = %request.role, error = %error, "Port call failed");
                last_error = Some(error);
                if attempt < attempts {
                    tokio::time::sleep(retry.backoff()).await;
                }
            }
            Err(error) => return Err(error),
        }
    }
    Err(last_error.unwrap_or_else(|| PortError::Internal("no attempts made".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::ScriptedPort;
    use port_contracts::Role;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            attempts: 3,
            backoff_seconds: 0,
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let port = ScriptedPort::new();
        port.push_error(PortError::Transient("connection reset".to_string()));
        port.push_error(PortError::Timeout);
        port.push_reply("recovered");
        let reply = call_with_retry(
            &port,
            PortRequest::new(Role::Planner, "plan"),
            &fast_retry(),
        )
        .await
        .unwrap();
        assert_eq!(reply.content, "recovered");
        assert_eq!(port.requests().len(), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let port = ScriptedPort::new();
        for _ in 0..3 {
            port.push_error(PortError::RateLimited);
        }
        let error = call_with_retry(
            &port,
            PortRequest::new(Role::Planner, "plan"),
            &fast_retry(),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, PortError::RateLimited));
        assert_eq!(port.requests().len(), 3);
    }

    #[tokio::test]
    async fn malformed_reply_is_not_retried() {
        let port = ScriptedPort::new();
        port.push_error(PortError::Malformed("garbage".to_string()));
        port.push_reply("never served");
        let error = call_with_retry(
            &port,
            PortRequest::new(Role::Planner, "plan"),
            &fast_retry(),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, PortError::Malformed(_)));
        assert_eq!(port.requests().len(), 1);
    }
}
