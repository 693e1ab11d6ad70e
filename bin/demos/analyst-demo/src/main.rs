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

use anyhow::{anyhow, Context, Result};
use port_contracts::PortConfig;
use slate::roles::HANDOFF_PHRASE;
use slate::{
    import_csv_path, import_csv_reader, Frame, HttpPort, ReasoningPort, ScriptedPort, Session,
    SessionEvent,
};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const SAMPLE_CSV: &str = "date,region,amount\n\
                          2024-07-01,North,120.5\n\
                          2024-07-03,South,80\n\
                          2024-07-15,North,60.5\n\
                          2024-07-21,East,42\n";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let scripted = args.iter().any(|a| a == "--scripted");
    let csv_path = args.iter().skip(1).find(|a| !a.starts_with("--"));

    let dataset = match csv_path {
        Some(path) => import_csv_path(Path::new(path), "imported")
            .with_context(|| format!("failed to import {path}"))?,
        None => {
            info!("No CSV given, using the built-in sample dataset");
            import_csv_reader(SAMPLE_CSV.as_bytes(), "sample sales")?
        }
    };
    println!("Dataset loaded ({} rows):", dataset.row_count());
    println!("{}", dataset.render_table(5));

    let port: Arc<dyn ReasoningPort> = if scripted {
        Arc::new(walkthrough_port())
    } else {
        Arc::new(
            HttpPort::new(PortConfig::default())
                .map_err(|e| anyhow!("{e}\nHint: run with --scripted for an offline walkthrough"))?,
        )
    };

    let (session, mut events) = Session::new(
        dataset,
        "One row per sale: date, region and amount.",
        port,
        slate::EngineConfig::default(),
    );

    let last_table: Arc<Mutex<Option<Frame>>> = Arc::new(Mutex::new(None));
    let table_slot = last_table.clone();
    tokio::spawn(async move {
        let mut chart_index = 0usize;
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Message { text, from_user } => {
                    let who = if from_user { "you" } else { "analyst" };
                    println!("[{who}] {text}");
                }
                SessionEvent::TabularResult { frame, new_series } => {
                    let label = if new_series { "result" } else { "adjusted result" };
                    println!("[{label}]\n{}", frame.render_table(10));
                    *table_slot.lock().expect("table slot poisoned") = Some(frame);
                }
                SessionEvent::ImageResult { bytes } => {
                    let path = format!("chart-{chart_index}.svg");
                    chart_index += 1;
                    match std::fs::write(&path, &bytes) {
                        Ok(()) => println!("[chart] written to {path}"),
                        Err(e) => println!("[chart] could not write {path}: {e}"),
                    }
                }
                SessionEvent::HistoryUpdated { programs } => {
                    println!("[history] {} version(s)", programs.len());
                }
                SessionEvent::DigestUpdated { .. } => println!("[digest] refreshed"),
                SessionEvent::ModeChanged { conversational } if conversational => {
                    print!("> ");
                    let _ = io::stdout().flush();
                }
                SessionEvent::ModeChanged { .. } => {}
                SessionEvent::PhaseChanged { phase } => info!(?phase, "phase"),
            }
        }
    });

    println!(
        "Commands: query <text> | adjust <k> <text> | draw <text> | drawadj <k> <text> | reset | quit"
    );
    print!("> ");
    io::stdout().flush()?;

    let stdin = io::stdin();
    let mut session = session;
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let outcome = match command {
            "quit" | "exit" => break,
            "reset" => {
                session.reset();
                Ok(())
            }
            "query" => session.submit_query(rest),
            "adjust" => match parse_indexed(rest) {
                Some((base, text)) => session.submit_adjustment(base, text),
                None => {
                    println!("usage: adjust <version> <text>");
                    Ok(())
                }
            },
            "draw" => {
                let frame = last_table.lock().expect("table slot poisoned").clone();
                match frame {
                    Some(frame) => session.submit_drawing(frame, rest),
                    None => {
                        println!("run a query first, then draw its result");
                        Ok(())
                    }
                }
            }
            "drawadj" => match parse_indexed(rest) {
                Some((base, text)) => session.submit_draw_adjustment(base, text),
                None => {
                    println!("usage: drawadj <version> <text>");
                    Ok(())
                }
            },
            _ => {
                println!("unknown command: {command}");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            println!("[engine] {e}");
            print!("> ");
            io::stdout().flush()?;
        }
    }
    Ok(())
}

fn parse_indexed(rest: &str) -> Option<(usize, &str)> {
    let (index, text) = rest.split_once(' ')?;
    Some((index.parse().ok()?, text))
}

/// Offline walkthrough: scripted replies for one query, one adjustment and
/// one chart over the sample dataset.
fn walkthrough_port() -> ScriptedPort {
    let port = ScriptedPort::new();
    port.push_reply(format!("handoff: Y\nreply: {HANDOFF_PHRASE}"));
    port.push_reply("brief: Total amount per region.");
    port.push_reply(
        "feasible: Y\nprogram:\n```json\n{\"kind\":\"transform\",\"ops\":[{\"op\":\"group_by\",\"by\":[\"region\"],\"aggregates\":[{\"column\":\"amount\",\"func\":\"sum\",\"alias\":\"total\"}]}]}\n```",
    );
    port.push_reply("handoff: N\nreply: Amounts were grouped by region and summed.");
    port.push_reply(
        "feasible: Y\nprogram:\n```json\n{\"kind\":\"transform\",\"ops\":[{\"op\":\"group_by\",\"by\":[\"region\"],\"aggregates\":[{\"column\":\"amount\",\"func\":\"sum\",\"alias\":\"total\"}]},{\"op\":\"sort\",\"by\":\"total\",\"descending\":true}]}\n```",
    );
    port.push_reply(
        "feasible: Y\nprogram:\n```json\n{\"kind\":\"chart\",\"prepare\":[],\"spec\":{\"mark\":\"bar\",\"x\":\"region\",\"y\":\"total\",\"title\":\"Total per region\"}}\n```",
    );
    port
}
