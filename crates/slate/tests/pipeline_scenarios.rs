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

use port_contracts::{PortError, Role};
use slate::roles::HANDOFF_PHRASE;
use slate::sandbox::{Output, OutputKind, SandboxExecutor};
use slate::{import_csv_reader, EngineConfig, RetryConfig, ScriptedPort, Session, SessionEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const CSV: &str = "date,region,amount\n\
                   2024-07-01,North,120.5\n\
                   2024-07-03,South,80\n\
                   2024-07-15,North,60.5\n";

fn dataset() -> slate::Frame {
    import_csv_reader(CSV.as_bytes(), "sales").unwrap()
}

fn test_config() -> EngineConfig {
    EngineConfig {
        retry: RetryConfig {
            attempts: 3,
            backoff_seconds: 0,
        },
        ..EngineConfig::default()
    }
}

fn start_session(port: Arc<ScriptedPort>) -> (Session, UnboundedReceiver<SessionEvent>) {
    Session::new(
        dataset(),
        "Daily sales records, one row per sale.",
        port,
        test_config(),
    )
}

fn handoff_reply() -> String {
    format!("handoff: Y\nreply: {HANDOFF_PHRASE}")
}

fn planner_reply() -> String {
    "brief: Total amount for region North in July 2024.".to_string()
}

fn north_total_program() -> String {
    r#"feasible: Y
program:
```json
{"kind":"transform","ops":[
  {"op":"filter","predicate":{"cond":{"column":"region","op":"eq","value":"North"}}},
  {"op":"group_by","by":[],"aggregates":[{"column":"amount","func":"sum","alias":"total"}]}
]}
```"#
        .to_string()
}

fn broken_program() -> String {
    r#"feasible: Y
program:
```json
{"kind":"transform","ops":[{"op":"sort","by":"missing","descending":false}]}
```"#
        .to_string()
}

fn broken_repair() -> String {
    broken_program().replace("feasible", "repairable")
}

fn narration_reply() -> String {
    "handoff: N\nreply: We filtered the North rows and summed the amount column.".to_string()
}

async fn next_matching<F>(
    rx: &mut UnboundedReceiver<SessionEvent>,
    mut predicate: F,
) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event stream closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn drain_until_message<F>(
    rx: &mut UnboundedReceiver<SessionEvent>,
    mut predicate: F,
) -> Vec<SessionEvent>
where
    F: FnMut(&str) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut seen = Vec::new();
        loop {
            let event = rx.recv().await.expect("event stream closed");
            let done = matches!(
                &event,
                SessionEvent::Message { text, from_user: false } if predicate(text)
            );
            seen.push(event);
            if done {
                return seen;
            }
        }
    })
    .await
    .expect("timed out waiting for message")
}

// Scenario A: an unambiguous request flows straight through to a single-row
// result and a history of length one.
#[tokio::test]
async fn clean_request_produces_result_and_history() {
    let port = Arc::new(ScriptedPort::new());
    port.push_reply(handoff_reply());
    port.push_reply(planner_reply());
    port.push_reply(north_total_program());
    port.push_reply(narration_reply());

    let (session, mut rx) = start_session(port.clone());
    session
        .submit_query("total amount for region North last month")
        .unwrap();

    let event = next_matching(&mut rx, |e| matches!(e, SessionEvent::TabularResult { .. })).await;
    let SessionEvent::TabularResult { frame, new_series } = event else {
        unreachable!();
    };
    assert!(new_series);
    assert_eq!(frame.row_count(), 1);
    assert_eq!(frame.get_column("total").unwrap().to_f64(0), Some(181.0));

    let event =
        next_matching(&mut rx, |e| matches!(e, SessionEvent::HistoryUpdated { .. })).await;
    let SessionEvent::HistoryUpdated { programs } = event else {
        unreachable!();
    };
    assert_eq!(programs.len(), 1);

    // The narration turn is a clarifier call, routed after the result.
    next_matching(
        &mut rx,
        |e| matches!(e, SessionEvent::Message { text, .. } if text.contains("summed")),
    )
    .await;
    let roles: Vec<Role> = port.requests().iter().map(|r| r.role).collect();
    assert_eq!(
        roles,
        [Role::Clarifier, Role::Planner, Role::Synthesis, Role::Clarifier]
    );
}

// Accepted programs deterministically reproduce their emitted result when
// re-executed against the original snapshot.
#[tokio::test]
async fn accepted_program_reexecutes_identically() {
    let port = Arc::new(ScriptedPort::new());
    port.push_reply(handoff_reply());
    port.push_reply(planner_reply());
    port.push_reply(north_total_program());
    port.push_reply(narration_reply());

    let (session, mut rx) = start_session(port);
    session.submit_query("total for North").unwrap();

    let emitted = next_matching(&mut rx, |e| matches!(e, SessionEvent::TabularResult { .. })).await;
    let SessionEvent::TabularResult { frame: emitted, .. } = emitted else {
        unreachable!();
    };
    let event =
        next_matching(&mut rx, |e| matches!(e, SessionEvent::HistoryUpdated { .. })).await;
    let SessionEvent::HistoryUpdated { programs } = event else {
        unreachable!();
    };

    let Output::Table(replayed) = SandboxExecutor::new()
        .run(&programs[0], &session.dataset(), OutputKind::Table)
        .unwrap()
    else {
        panic!("expected table output");
    };
    assert_eq!(replayed.render_table(100), emitted.render_table(100));
}

// Scenario B: a failing first program goes through exactly one repair
// round-trip and then succeeds.
#[tokio::test]
async fn single_repair_round_trip_recovers() {
    let port = Arc::new(ScriptedPort::new());
    port.push_reply(handoff_reply());
    port.push_reply(planner_reply());
    port.push_reply(broken_program());
    port.push_reply(north_total_program().replace("feasible", "repairable"));
    port.push_reply(narration_reply());

    let (session, mut rx) = start_session(port.clone());
    session.submit_query("total for North").unwrap();

    let event = next_matching(&mut rx, |e| matches!(e, SessionEvent::TabularResult { .. })).await;
    let SessionEvent::TabularResult { frame, .. } = event else {
        unreachable!();
    };
    assert_eq!(frame.row_count(), 1);
    let event =
        next_matching(&mut rx, |e| matches!(e, SessionEvent::HistoryUpdated { .. })).await;
    let SessionEvent::HistoryUpdated { programs } = event else {
        unreachable!();
    };
    assert_eq!(programs.len(), 1);

    let repair_calls = port
        .requests()
        .iter()
        .filter(|r| r.role == Role::Repair)
        .count();
    assert_eq!(repair_calls, 1);
}

// Scenario C: two still-failing repairs exhaust the bound; the pipeline
// reports a permanent failure and history stays empty.
#[tokio::test]
async fn repeated_repair_failures_give_up() {
    let port = Arc::new(ScriptedPort::new());
    port.push_reply(handoff_reply());
    port.push_reply(planner_reply());
    port.push_reply(broken_program());
    port.push_reply(broken_repair());
    port.push_reply(broken_repair());

    let (session, mut rx) = start_session(port.clone());
    session.submit_query("total for North").unwrap();

    let seen = drain_until_message(&mut rx, |text| text.contains("kept hitting errors")).await;
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::TabularResult { .. })));
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::HistoryUpdated { .. })));

    let repair_calls = port
        .requests()
        .iter()
        .filter(|r| r.role == Role::Repair)
        .count();
    assert_eq!(repair_calls, 2);
}

// Scenario D: a clarifier that declares handoff with the wrong reply text is
// reissued with a corrective note instead of reaching planning.
#[tokio::test]
async fn clarifier_contract_violation_is_reissued() {
    let port = Arc::new(ScriptedPort::new());
    port.push_reply("handoff: Y\nreply: Sure thing, coming right up!");
    port.push_reply("handoff: N\nreply: Did you mean the calendar month of July?");

    let (session, mut rx) = start_session(port.clone());
    session.submit_query("total for last month").unwrap();

    next_matching(
        &mut rx,
        |e| matches!(e, SessionEvent::Message { text, .. } if text.contains("calendar month")),
    )
    .await;

    let requests = port.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].role, Role::Clarifier);
    assert!(requests[1].prompt.contains("System note"));
    assert!(!requests
        .iter()
        .any(|r| r.role == Role::Planner || r.role == Role::Synthesis));
}

// Scenario E: adjusting from version 1 of a 3-entry history truncates the
// discarded tail and appends, yielding [0, 1, new].
#[tokio::test]
async fn adjustment_forks_history_at_base_version() {
    let port = Arc::new(ScriptedPort::new());
    port.push_reply(handoff_reply());
    port.push_reply(planner_reply());
    port.push_reply(north_total_program());
    port.push_reply(narration_reply());

    let (session, mut rx) = start_session(port.clone());
    session.submit_query("total for North").unwrap();
    next_matching(&mut rx, |e| matches!(e, SessionEvent::HistoryUpdated { .. })).await;
    next_matching(
        &mut rx,
        |e| matches!(e, SessionEvent::Message { text, .. } if text.contains("summed")),
    )
    .await;

    // Grow the history to three entries with two accepted adjustments.
    for (base, rows) in [(0usize, 1usize), (1, 2)] {
        port.push_reply(limit_program(rows));
        session.submit_adjustment(base, format!("only {rows} rows")).unwrap();
        let event =
            next_matching(&mut rx, |e| matches!(e, SessionEvent::HistoryUpdated { .. })).await;
        let SessionEvent::HistoryUpdated { programs } = event else {
            unreachable!();
        };
        assert_eq!(programs.len(), base + 2);
    }

    // Fork from version 1: former version 2 is discarded.
    port.push_reply(limit_program(3));
    session.submit_adjustment(1, "show three rows").unwrap();
    let event =
        next_matching(&mut rx, |e| matches!(e, SessionEvent::HistoryUpdated { .. })).await;
    let SessionEvent::HistoryUpdated { programs } = event else {
        unreachable!();
    };
    assert_eq!(programs.len(), 3);
    assert_eq!(
        programs[2],
        slate::Program::Transform {
            ops: vec![slate::TransformOp::Limit { rows: 3 }]
        }
    );
}

fn limit_program(rows: usize) -> String {
    format!(
        "feasible: Y\nprogram:\n```json\n{{\"kind\":\"transform\",\"ops\":[{{\"op\":\"limit\",\"rows\":{rows}}}]}}\n```"
    )
}

// An empty result routes to repair with the empty-table classification; an
// unrepairable verdict surfaces the no-matching-data explanation.
#[tokio::test]
async fn empty_result_reaches_repair_then_reports_no_data() {
    let port = Arc::new(ScriptedPort::new());
    port.push_reply(handoff_reply());
    port.push_reply(planner_reply());
    port.push_reply(
        r#"feasible: Y
program:
```json
{"kind":"transform","ops":[{"op":"filter","predicate":{"cond":{"column":"region","op":"eq","value":"Nowhere"}}}]}
```"#,
    );
    port.push_reply("repairable: N\nprogram: There is no such region in the data.");

    let (session, mut rx) = start_session(port.clone());
    session.submit_query("total for region Nowhere").unwrap();

    next_matching(
        &mut rx,
        |e| matches!(e, SessionEvent::Message { text, .. } if text.contains("No matching data")),
    )
    .await;

    let repair_request = port
        .requests()
        .into_iter()
        .find(|r| r.role == Role::Repair)
        .expect("repair role was never consulted");
    assert!(repair_request.prompt.contains("empty table"));
}

// Transient port failures are retried and the request aborts cleanly once the
// attempts are spent: no message, no result, and the conversation memory
// rolls back the failed turn.
#[tokio::test]
async fn exhausted_port_retries_abort_to_idle() {
    let port = Arc::new(ScriptedPort::new());
    for _ in 0..3 {
        port.push_error(PortError::Transient("connection reset".to_string()));
    }
    // Second, healthy query.
    port.push_reply("handoff: N\nreply: Happy to help with the follow-up.");

    let (session, mut rx) = start_session(port.clone());
    session.submit_query("first doomed question").unwrap();

    // The pipeline returns to conversational mode without emitting a result.
    let mut saw_mode_off = false;
    let event = next_matching(&mut rx, |e| {
        if matches!(e, SessionEvent::ModeChanged { conversational: false }) {
            saw_mode_off = true;
        }
        saw_mode_off && matches!(e, SessionEvent::ModeChanged { conversational: true })
    })
    .await;
    assert!(matches!(
        event,
        SessionEvent::ModeChanged { conversational: true }
    ));

    session.submit_query("second question").unwrap();
    next_matching(
        &mut rx,
        |e| matches!(e, SessionEvent::Message { text, .. } if text.contains("follow-up")),
    )
    .await;

    // Three transport attempts for the first turn, one for the second.
    assert_eq!(port.requests().len(), 4);
    let last = port.requests().pop().unwrap();
    // The rolled-back first turn must not leak into the next conversation.
    assert!(!last
        .system_prompt
        .unwrap_or_default()
        .contains("doomed question"));
}

// Reset tears the controllers down and discards the version histories; the
// recreated pipelines start from an empty state but keep serving requests.
#[tokio::test]
async fn reset_discards_history_and_respawns_controllers() {
    let port = Arc::new(ScriptedPort::new());
    port.push_reply(handoff_reply());
    port.push_reply(planner_reply());
    port.push_reply(north_total_program());
    port.push_reply(narration_reply());

    let (mut session, mut rx) = start_session(port.clone());
    session.submit_query("total for North").unwrap();
    next_matching(&mut rx, |e| matches!(e, SessionEvent::HistoryUpdated { .. })).await;
    next_matching(
        &mut rx,
        |e| matches!(e, SessionEvent::Message { text, .. } if text.contains("summed")),
    )
    .await;

    session.reset();
    let event =
        next_matching(&mut rx, |e| matches!(e, SessionEvent::HistoryUpdated { .. })).await;
    let SessionEvent::HistoryUpdated { programs } = event else {
        unreachable!();
    };
    assert!(programs.is_empty());

    // The old version series is gone: adjusting against it is refused.
    session.submit_adjustment(0, "limit to one row").unwrap();
    next_matching(
        &mut rx,
        |e| matches!(e, SessionEvent::Message { text, .. } if text.contains("does not exist")),
    )
    .await;
}

// The clarifier correction loop is bounded: persistent violations end the
// turn with a user-visible explanation.
#[tokio::test]
async fn clarifier_reissue_bound_terminates_turn() {
    let mut config = test_config();
    config.clarify_reissue_bound = 1;
    let port = Arc::new(ScriptedPort::new());
    port.push_reply("no markers at all");
    port.push_reply("still no markers");

    let (session, mut rx) = Session::new(dataset(), "sales", port.clone(), config);
    session.submit_query("anything").unwrap();

    next_matching(
        &mut rx,
        |e| matches!(e, SessionEvent::Message { text, .. } if text.contains("rephrasing")),
    )
    .await;
    assert_eq!(port.requests().len(), 2);
}
