// clrun: persistent interactive terminal sessions for agents
//
// Commands:
//   clrun run <command...> [--cwd <dir>]
//   clrun input <id> <text> [--priority N] [--override]
//   clrun key <id> <keys...>
//   clrun tail <id> [-n N] / clrun head <id> [-n N]
//   clrun since <id> <offset>
//   clrun status
//   clrun kill <id>

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clrun_lib::logging;
use clrun_lib::session::client;
use clrun_lib::session::config::Config;
use clrun_lib::session::error::SessionError;
use clrun_lib::session::protocol::TerminalId;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

const DEFAULT_LINES: usize = 50;

#[derive(Debug, Parser)]
#[command(name = "clrun", version, about = "Persistent interactive terminal sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new session running a command
    Run {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        /// Working directory (defaults to the current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// Queue a line of input for a session
    Input {
        terminal_id: TerminalId,
        text: String,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i64,
        /// Cancel everything still queued and send this next
        #[arg(long = "override")]
        override_queue: bool,
    },
    /// Send named keys (up, down, enter, ctrl-c, ...)
    Key {
        terminal_id: TerminalId,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Show the last lines of a session's output
    Tail {
        terminal_id: TerminalId,
        #[arg(short = 'n', long, default_value_t = DEFAULT_LINES)]
        lines: usize,
    },
    /// Show the first lines of a session's output
    Head {
        terminal_id: TerminalId,
        #[arg(short = 'n', long, default_value_t = DEFAULT_LINES)]
        lines: usize,
    },
    /// Output appended since a byte offset
    Since { terminal_id: TerminalId, offset: u64 },
    /// List sessions and runtime state
    Status,
    /// Terminate a session
    Kill { terminal_id: TerminalId },
}

fn data<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).context("Failed to serialize response")
}

fn execute(config: &Config, command: Command) -> Result<Value> {
    match command {
        Command::Run { command, cwd } => {
            let cwd = match cwd {
                Some(dir) => dir,
                None => std::env::current_dir().context("Failed to read current directory")?,
            };
            data(client::create_session(config, &command.join(" "), &cwd)?)
        }
        Command::Input {
            terminal_id,
            text,
            priority,
            override_queue,
        } => data(client::send_input(
            config,
            terminal_id,
            &text,
            priority,
            override_queue,
        )?),
        Command::Key { terminal_id, keys } => data(client::send_keys(config, terminal_id, &keys)?),
        Command::Tail { terminal_id, lines } => data(client::tail(config, terminal_id, lines)?),
        Command::Head { terminal_id, lines } => data(client::head(config, terminal_id, lines)?),
        Command::Since {
            terminal_id,
            offset,
        } => data(client::buffer_since(config, terminal_id, offset)?),
        Command::Status => data(client::status(config)?),
        Command::Kill { terminal_id } => data(client::kill_session(config, terminal_id)?),
    }
}

fn failure(err: &anyhow::Error) -> Value {
    let hints = err
        .downcast_ref::<SessionError>()
        .map(SessionError::hints)
        .unwrap_or_default();
    json!({
        "ok": false,
        "error": format!("{err:#}"),
        "hints": hints,
    })
}

fn main() {
    logging::init_cli();
    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(project_root = %config.project_root.display(), "resolved project");

    let (response, code) = match execute(&config, cli.command) {
        Ok(data) => (json!({ "ok": true, "data": data }), 0),
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            (failure(&err), 1)
        }
    };

    match serde_json::to_string_pretty(&response) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("failed to render response: {e}");
            std::process::exit(1);
        }
    }
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_keeps_hyphenated_command_words() {
        let cli = Cli::try_parse_from(["clrun", "run", "ls", "-la"]).unwrap();
        match cli.command {
            Command::Run { command, cwd } => {
                assert_eq!(command, vec!["ls", "-la"]);
                assert!(cwd.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_input_flags() {
        let id = uuid::Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from([
            "clrun",
            "input",
            id.as_str(),
            "y",
            "--priority",
            "-2",
            "--override",
        ])
        .unwrap();
        match cli.command {
            Command::Input {
                priority,
                override_queue,
                text,
                ..
            } => {
                assert_eq!(priority, -2);
                assert!(override_queue);
                assert_eq!(text, "y");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_failure_carries_hints() {
        let err: anyhow::Error = SessionError::NotFound {
            terminal_id: uuid::Uuid::nil(),
        }
        .into();
        let value = failure(&err);
        assert_eq!(value["ok"], false);
        assert!(!value["hints"].as_array().unwrap().is_empty());
    }
}
