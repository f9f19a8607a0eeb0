//! tabedit command line
//!
//! `turn` reads one JSON [`TurnRequest`] from a file or stdin and prints the
//! JSON response. `repl` loads a table and applies one request per line on
//! a single thread until `quit`. Logs go to stderr, filtered by `TABEDIT_LOG`.

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tabedit_core::{RuleInterpreter, Supervisor, SupervisorConfig, TurnRequest};
use tabedit_table::Table;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("tabedit")
        .version(tabedit_core::VERSION)
        .about("Edit tables through conversational requests")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("turn")
                .about("Run one turn: JSON request in, JSON response out")
                .arg(
                    Arg::new("request")
                        .value_parser(value_parser!(PathBuf))
                        .help("Request file; reads stdin when omitted"),
                ),
        )
        .subcommand(
            Command::new("repl")
                .about("Edit a table interactively, one request per line")
                .arg(
                    Arg::new("table")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Table as {\"headers\": [...], \"data\": [...]}"),
                ),
        );

    let matches = cli.get_matches();
    let Some((command, args)) = matches.subcommand() else {
        return Ok(());
    };
    init_tracing(args.get_flag("json-logs"));

    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => SupervisorConfig::load(path)?,
        None => SupervisorConfig::default(),
    };
    let supervisor = Supervisor::new(RuleInterpreter::from_config(&config), config);

    match command {
        "turn" => turn(&supervisor, args).await,
        "repl" => repl(&supervisor, args).await,
        _ => Ok(()),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("TABEDIT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn turn(supervisor: &Supervisor<RuleInterpreter>, args: &ArgMatches) -> anyhow::Result<()> {
    let text = match args.get_one::<PathBuf>("request") {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?,
        None => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            text
        }
    };
    let request: TurnRequest = serde_json::from_str(&text).context("invalid turn request")?;
    let response = supervisor.handle_turn(request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn repl(supervisor: &Supervisor<RuleInterpreter>, args: &ArgMatches) -> anyhow::Result<()> {
    let path = args
        .get_one::<PathBuf>("table")
        .context("table file is required")?;
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let mut table = tabedit_table::from_json_str(&text)?;
    let thread_id = ulid::Ulid::new().to_string();

    println!("{}", render(&table));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if matches!(message, "quit" | "exit") {
            break;
        }
        let request = TurnRequest::new(message, table.clone()).with_thread(&thread_id);
        match supervisor.handle_turn(request).await {
            Ok(response) => {
                println!("{}", response.response_text);
                if response.table_changed {
                    if let Some(next) = response.table {
                        table = next;
                        println!("{}", render(&table));
                    }
                }
            }
            Err(err) => eprintln!("error: {err}"),
        }
    }
    supervisor.close_thread(&thread_id).await;
    Ok(())
}

/// Fixed-width text grid with a leading 1-based row number
fn render(table: &Table) -> String {
    let mut grid: Vec<Vec<String>> = Vec::with_capacity(table.row_count() + 1);
    let mut header = vec!["#".to_string()];
    header.extend(table.columns().iter().cloned());
    grid.push(header);
    for index in 0..table.row_count() {
        let mut line = vec![(index + 1).to_string()];
        line.extend(table.dense_row(index).iter().map(ToString::to_string));
        grid.push(line);
    }

    let widths: Vec<usize> = (0..grid[0].len())
        .map(|col| grid.iter().map(|line| line[col].chars().count()).max().unwrap_or(0))
        .collect();
    grid.iter()
        .map(|line| {
            line.iter()
                .zip(widths.iter().copied())
                .map(|(cell, width)| format!("{cell:<width$}"))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
