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
use crate::digest::build_digest;
use crate::events::Phase;
use crate::memory::Speaker;
use crate::pipeline::Controller;
use crate::port::call_with_retry;
use crate::program::Program;
use crate::roles;
use crate::sandbox::{Output, OutputKind, SandboxError};
use port_contracts::Role;
use tracing::{info, warn};

/// Why an executed program was routed to repair.
#[derive(Debug, Clone)]
pub(crate) enum Fault {
    EmptyResult,
    ExecError(String),
}

impl Fault {
    fn describe(&self) -> String {
        match self {
            Fault::EmptyResult => "the program ran but returned an empty table".to_string(),
            Fault::ExecError(message) => format!("the program failed to run: {message}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Synthesis,
    Repair,
}

enum State {
    Synthesizing { note: Option<String> },
    Executing { program: Program, origin: Origin },
    Repairing { program: Program, fault: Fault, note: Option<String> },
}

impl Controller {
    /// The full request machine:
    /// `IDLE -> CLARIFYING -> PLANNING -> SYNTHESIZING -> EXECUTING -> REPAIRING`.
    /// Returning from this function is the transition back to `IDLE`.
    pub(crate) async fn handle_query(&mut self, text: String) {
        self.repair_rounds = 0;

        self.events.phase_changed(Phase::Seeking);
        let digest = build_digest(&self.dataset, &self.description, &text, &self.config.digest);
        *self.digest.lock().await = Some(digest.clone());
        self.events.digest_updated(&digest);

        // CLARIFYING
        self.memory.push(Speaker::Requester, &text);
        let Some(clarifier) = self.clarify(&digest, &text).await else {
            return;
        };
        self.events.message(&clarifier.reply, false);
        self.memory.push(Speaker::Analyst, &clarifier.reply);
        if !clarifier.handoff {
            return;
        }

        // PLANNING
        self.events.phase_changed(Phase::Thinking);
        let planner_request = roles::planner_request(&digest, &self.memory.render());
        let brief = match call_with_retry(self.port.as_ref(), planner_request, &self.config.retry)
            .await
            .map_err(|e| e.to_string())
            .and_then(|reply| {
                roles::parse_planner(&reply.content).map_err(|v| v.to_string())
            }) {
            Ok(planner) => planner.brief,
            Err(error) => {
                warn!(%error, "Planning failed, aborting request");
                self.memory.discard_last();
                return;
            }
        };
        info!(brief = %brief, "Task brief settled");

        // SYNTHESIZING / EXECUTING / REPAIRING
        let mut state = State::Synthesizing { note: None };
        loop {
            state = match state {
                State::Synthesizing { note } => {
                    match self.synthesize(&digest, &brief, note).await {
                        Flow::Next(state) => state,
                        Flow::Idle => return,
                    }
                }
                State::Executing { program, origin } => {
                    match self.execute(&digest, program, origin).await {
                        Flow::Next(state) => state,
                        Flow::Idle => return,
                    }
                }
                State::Repairing { program, fault, note } => {
                    match self.repair(&digest, &brief, program, fault, note).await {
                        Flow::Next(state) => state,
                        Flow::Idle => return,
                    }
                }
            };
        }
    }

    /// Reissues the clarifier turn with a corrective note while it violates
    /// the handoff contract, up to the configured bound.
    async fn clarify(&mut self, digest: &str, text: &str) -> Option<roles::ClarifierReply> {
        let mut request_text = text.to_string();
        let mut reissues = 0;
        loop {
            self.events.phase_changed(Phase::Thinking);
            let request = roles::clarifier_request(digest, &self.memory.render(), &request_text);
            let reply = match call_with_retry(self.port.as_ref(), request, &self.config.retry).await
            {
                Ok(reply) => reply,
                Err(error) => {
                    warn!(%error, "Clarifier call failed, aborting request");
                    self.memory.discard_last();
                    return None;
                }
            };
            let violation = match roles::parse_clarifier(&reply.content) {
                Ok(clarifier) => {
                    if clarifier.handoff == (clarifier.reply == roles::HANDOFF_PHRASE) {
                        return Some(clarifier);
                    }
                    "the handoff flag and the reply text contradict each other".to_string()
                }
                Err(violation) => violation.to_string(),
            };
            reissues += 1;
            if reissues > self.config.clarify_reissue_bound {
                warn!(reissues, "Clarifier kept violating its contract, giving up");
                self.events.message(
                    "I could not produce a well-formed answer to that; please try rephrasing \
                     your request.",
                    false,
                );
                self.memory.discard_last();
                return None;
            }
            warn!(%violation, reissues, "Clarifier contract violation, reissuing turn");
            request_text = format!(
                "{text}\nSystem note: your previous reply was rejected ({violation}). \
                 Answer again, following the reply format contract exactly."
            );
        }
    }

    async fn synthesize(&mut self, digest: &str, brief: &str, note: Option<String>) -> Flow {
        self.events.phase_changed(Phase::Operating);
        let mut prompt_brief = brief.to_string();
        if let Some(note) = note {
            prompt_brief.push_str(&format!("\nSystem note: {note}"));
        }
        let request = roles::synthesis_request(digest, &prompt_brief);
        let reply = match call_with_retry(self.port.as_ref(), request, &self.config.retry).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(%error, "Synthesis call failed, aborting request");
                self.memory.discard_last();
                return Flow::Idle;
            }
        };
        match roles::parse_synthesis(&reply.content, Role::Synthesis) {
            Ok(synthesis) if synthesis.accepted => match synthesis.program {
                Some(program) => Flow::Next(State::Executing {
                    program,
                    origin: Origin::Synthesis,
                }),
                None => Flow::Next(State::Synthesizing {
                    note: Some("the accepted reply carried no program".to_string()),
                }),
            },
            Ok(synthesis) => {
                let text = format!(
                    "This request cannot be served from the dataset: {}",
                    synthesis.reason
                );
                self.events.message(&text, false);
                self.memory.push(Speaker::Analyst, &text);
                Flow::Idle
            }
            Err(violation) => {
                warn!(%violation, "Synthesis protocol violation, regenerating");
                Flow::Next(State::Synthesizing {
                    note: Some(violation.to_string()),
                })
            }
        }
    }

    async fn execute(&mut self, digest: &str, program: Program, origin: Origin) -> Flow {
        self.events.phase_changed(Phase::Operating);
        match self.executor.run(&program, &self.dataset, OutputKind::Table) {
            Ok(Output::Table(frame)) if frame.is_empty() => Flow::Next(State::Repairing {
                program,
                fault: Fault::EmptyResult,
                note: None,
            }),
            Ok(Output::Table(frame)) => {
                self.accept_result(digest, program, frame).await;
                Flow::Idle
            }
            Ok(Output::Image(_)) => Flow::Next(State::Repairing {
                program,
                fault: Fault::ExecError("produced an image instead of a table".to_string()),
                note: None,
            }),
            Err(SandboxError::Contract(message)) => {
                // The program itself broke its output contract; regenerate it
                // where it came from.
                warn!(%message, ?origin, "Output contract violation");
                match origin {
                    Origin::Synthesis => Flow::Next(State::Synthesizing {
                        note: Some(message),
                    }),
                    Origin::Repair => Flow::Next(State::Repairing {
                        program,
                        fault: Fault::ExecError(message),
                        note: Some("the repaired program must produce a table".to_string()),
                    }),
                }
            }
            Err(SandboxError::Exec(message)) => Flow::Next(State::Repairing {
                program,
                fault: Fault::ExecError(message),
                note: None,
            }),
        }
    }

    async fn repair(
        &mut self,
        digest: &str,
        brief: &str,
        program: Program,
        fault: Fault,
        note: Option<String>,
    ) -> Flow {
        if self.repair_rounds >= self.config.repair_bound {
            info!(rounds = self.repair_rounds, "Repair bound reached, giving up");
            let text = "The analysts kept hitting errors on this request. The request may \
                        need to be phrased differently, or the data may not support it."
                .to_string();
            self.events.message(&text, false);
            self.memory.push(Speaker::Analyst, &text);
            self.repair_rounds = 0;
            return Flow::Idle;
        }

        self.events.phase_changed(Phase::Thinking);
        let mut fault_text = fault.describe();
        if let Some(note) = note {
            fault_text.push_str(&format!("\nSystem note: {note}"));
        }
        let request = roles::repair_request(digest, brief, &fault_text, &program.to_json());
        let reply = match call_with_retry(self.port.as_ref(), request, &self.config.retry).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(%error, "Repair call failed, aborting request");
                self.memory.discard_last();
                self.repair_rounds = 0;
                return Flow::Idle;
            }
        };
        match roles::parse_synthesis(&reply.content, Role::Repair) {
            Ok(repair) if repair.accepted => match repair.program {
                Some(revised) => {
                    self.repair_rounds += 1;
                    Flow::Next(State::Executing {
                        program: revised,
                        origin: Origin::Repair,
                    })
                }
                None => Flow::Next(State::Repairing {
                    program,
                    fault,
                    note: Some("the repairable reply carried no program".to_string()),
                }),
            },
            Ok(_) => {
                let text = "No matching data was found: the result came back empty, most \
                            likely because the dataset holds nothing relevant. Try again or \
                            ask something else."
                    .to_string();
                self.events.message(&text, false);
                self.memory.push(Speaker::Analyst, &text);
                self.repair_rounds = 0;
                Flow::Idle
            }
            Err(violation) => {
                warn!(%violation, "Repair protocol violation, re-asking");
                Flow::Next(State::Repairing {
                    program,
                    fault,
                    note: Some(violation.to_string()),
                })
            }
        }
    }

    async fn accept_result(&mut self, digest: &str, program: Program, frame: Frame) {
        self.repair_rounds = 0;
        info!(
            rows = frame.row_count(),
            columns = frame.column_count(),
            "Query result accepted"
        );
        self.events.tabular_result(frame.clone(), true);

        {
            // A fresh query starts a new version series.
            let mut history = self.history.lock().await;
            history.clear();
            history.push(program.clone());
            self.events.history_updated(history.entries().to_vec());
        }

        let sample = frame.render_table(5);
        self.memory.push(
            Speaker::Analyst,
            format!(
                "The analysts produced the result. Sample rows:\n{sample}\n\
                 Program:\n{}\n\
                 The requester may ask for adjustments, for an explanation of the method, \
                 or move on to a new request.",
                program.to_json()
            ),
        );

        // Best-effort narration of the method behind the result.
        self.events.phase_changed(Phase::Thinking);
        let request = roles::narrate_request(digest, &self.memory.render());
        match call_with_retry(self.port.as_ref(), request, &self.config.retry).await {
            Ok(reply) => {
                if let Ok(clarifier) = roles::parse_clarifier(&reply.content) {
                    self.events.message(&clarifier.reply, false);
                    self.memory.push(Speaker::Analyst, &clarifier.reply);
                }
            }
            Err(error) => warn!(%error, "Narration turn failed, skipping"),
        }
    }
}

enum Flow {
    Next(State),
    Idle,
}
