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

use port_contracts::{PortRequest, Role};

pub mod reply;

pub use reply::{
    parse_clarifier, parse_planner, parse_synthesis, ClarifierReply, PlannerReply,
    ProtocolViolation, SynthesisReply,
};

/// The clarifier may only declare handoff with exactly this reply text.
pub const HANDOFF_PHRASE: &str = "Understood, I will run that for you now.";

const CLARIFIER_FORMAT: &str = concat!(
    "Reply in exactly this structure and nothing else:\n",
    "handoff: [Y or N]\n",
    "reply: [your reply to the requester]\n",
    "Set handoff to Y only when the request is fully specified and ready to run, ",
    "and in that case the reply must be exactly: ",
    "\"Understood, I will run that for you now.\" ",
    "Otherwise set handoff to N and use the reply to clarify the request or to ",
    "answer questions about delivered results."
);

const PROGRAM_FORMAT: &str = concat!(
    "A program is a JSON object: {\"kind\":\"transform\",\"ops\":[...]} where each op is one of ",
    "{\"op\":\"select\",\"columns\":[..]}, ",
    "{\"op\":\"filter\",\"predicate\":{\"cond\":{\"column\":..,\"op\":\"eq|ne|gt|lt|ge|le|contains|starts_with|ends_with\",\"value\":..}}} ",
    "(predicates compose with \"all\", \"any\", \"not\"), ",
    "{\"op\":\"derive\",\"name\":..,\"expr\":{\"column\"|\"value\"|\"add\"|\"sub\"|\"mul\"|\"div\"|\"concat\":..}}, ",
    "{\"op\":\"group_by\",\"by\":[..],\"aggregates\":[{\"column\":..,\"func\":\"count|sum|mean|min|max|median|std|count_distinct\",\"alias\":..}]}, ",
    "{\"op\":\"sort\",\"by\":..,\"descending\":bool}, ",
    "{\"op\":\"limit\",\"rows\":n}."
);

const CHART_FORMAT: &str = concat!(
    "A chart program is a JSON object: {\"kind\":\"chart\",\"prepare\":[transform ops],",
    "\"spec\":{\"mark\":\"bar|line|scatter\",\"x\":column,\"y\":column,",
    "\"series\":optional column,\"title\":optional text}}. ",
    "The prepare ops shape the data before plotting."
);

fn synthesis_format(marker: &str) -> String {
    format!(
        "Reply in exactly this structure and nothing else:\n\
         {marker}: [Y or N]\n\
         program: [a fenced ```json program when {marker} is Y, otherwise a short \
         explanation for the requester]\n"
    )
}

pub fn clarifier_request(digest: &str, memory: &str, request_text: &str) -> PortRequest {
    let system = format!(
        "You are the front desk of a data analysis service. You converse with the \
         requester until their request is ready for the analysts.\n\
         Dataset digest:\n{digest}\n\
         Conversation so far:\n{memory}\n\
         {CLARIFIER_FORMAT}"
    );
    PortRequest::new(Role::Clarifier, request_text).with_system(system)
}

/// Best-effort secondary turn narrating how an accepted result was produced.
pub fn narrate_request(digest: &str, memory: &str) -> PortRequest {
    clarifier_request(
        digest,
        memory,
        "Briefly walk the requester through how the delivered result was computed.",
    )
}

pub fn planner_request(digest: &str, memory: &str) -> PortRequest {
    let system = format!(
        "You condense a clarified conversation into one formal task instruction \
         for a data analyst.\n\
         Dataset digest:\n{digest}\n\
         Reply in exactly this structure and nothing else:\n\
         brief: [the task instruction]"
    );
    PortRequest::new(
        Role::Planner,
        format!("Conversation to condense:\n{memory}"),
    )
    .with_system(system)
}

pub fn synthesis_request(digest: &str, brief: &str) -> PortRequest {
    let system = format!(
        "You are a data analyst. Decide whether the task below can be served from \
         the dataset and, if so, produce the transformation program.\n\
         Dataset digest:\n{digest}\n\
         {PROGRAM_FORMAT}\n\
         {}",
        synthesis_format("feasible")
    );
    PortRequest::new(Role::Synthesis, format!("Task: {brief}")).with_system(system)
}

pub fn repair_request(
    digest: &str,
    brief: &str,
    fault_text: &str,
    failing_program: &str,
) -> PortRequest {
    let system = format!(
        "You diagnose a failed transformation program and either fix it or declare \
         the task unservable.\n\
         Dataset digest:\n{digest}\n\
         {PROGRAM_FORMAT}\n\
         {}",
        synthesis_format("repairable")
    );
    PortRequest::new(
        Role::Repair,
        format!(
            "Task: {brief}\nProblem: {fault_text}\nFailing program:\n{failing_program}"
        ),
    )
    .with_system(system)
}

pub fn adjustment_request(
    digest: &str,
    base_program: &str,
    adjustment_text: &str,
) -> PortRequest {
    let system = format!(
        "You revise an accepted transformation program to satisfy an adjustment \
         request, keeping everything the requester did not ask to change.\n\
         Dataset digest:\n{digest}\n\
         {PROGRAM_FORMAT}\n\
         {}",
        synthesis_format("feasible")
    );
    PortRequest::new(
        Role::Adjustment,
        format!("Base program:\n{base_program}\nAdjustment: {adjustment_text}"),
    )
    .with_system(system)
}

pub fn draw_request(digest: &str, request_text: &str) -> PortRequest {
    let system = format!(
        "You design a chart over the dataset described below.\n\
         Dataset digest:\n{digest}\n\
         {CHART_FORMAT}\n\
         {}",
        synthesis_format("feasible")
    );
    PortRequest::new(Role::Draw, format!("Drawing request: {request_text}")).with_system(system)
}

pub fn draw_adjustment_request(
    digest: &str,
    base_program: &str,
    adjustment_text: &str,
) -> PortRequest {
    let system = format!(
        "You revise an accepted chart program to satisfy an adjustment request, \
         keeping everything the requester did not ask to change.\n\
         Dataset digest:\n{digest}\n\
         {CHART_FORMAT}\n\
         {}",
        synthesis_format("feasible")
    );
    PortRequest::new(
        Role::DrawAdjustment,
        format!("Base chart program:\n{base_program}\nAdjustment: {adjustment_text}"),
    )
    .with_system(system)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_route_to_their_roles() {
        assert_eq!(clarifier_request("d", "m", "q").role, Role::Clarifier);
        assert_eq!(planner_request("d", "m").role, Role::Planner);
        assert_eq!(synthesis_request("d", "b").role, Role::Synthesis);
        assert_eq!(repair_request("d", "b", "f", "p").role, Role::Repair);
        assert_eq!(adjustment_request("d", "p", "a").role, Role::Adjustment);
        assert_eq!(draw_request("d", "q").role, Role::Draw);
        assert_eq!(
            draw_adjustment_request("d", "p", "a").role,
            Role::DrawAdjustment
        );
    }

    #[test]
    fn digest_and_format_reach_the_system_prompt() {
        let request = synthesis_request("COLUMN-PROFILE", "total by region");
        let system = request.system_prompt.unwrap();
        assert!(system.contains("COLUMN-PROFILE"));
        assert!(system.contains("group_by"));
        assert!(request.prompt.contains("total by region"));
    }

    #[test]
    fn handoff_phrase_is_quoted_verbatim_to_the_clarifier() {
        let request = clarifier_request("d", "m", "q");
        assert!(request
            .system_prompt
            .unwrap()
            .contains(HANDOFF_PHRASE));
    }
}
