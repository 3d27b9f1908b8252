//! CLI command definitions for the workflow daemon's operator surface.
//!
//! This is a debugging/inspection surface, not the orchestrator's own
//! tool-call loop: dispatch a workflow, resume a suspended instance, list
//! templates, and replay logged events for an instance.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Workflow Execution Engine operator CLI.
#[derive(Parser)]
#[command(name = "td", about = "Workflow execution engine operator CLI", version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true, help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Dispatch an instruction to a matching (or named) workflow template.
    Run {
        /// Thread/conversation id the instance is scoped to.
        #[arg(long)]
        thread_id: String,

        /// Instruction text to route.
        instruction: String,

        /// Explicit template name, bypassing routing.
        #[arg(long)]
        name: Option<String>,
    },

    /// Resume a suspended instance on a thread with human input or an event name.
    Resume {
        /// Thread id the suspended instance is tracked under.
        #[arg(long)]
        thread_id: String,

        /// Template name the instance was created from.
        name: String,

        /// Human input (JSON) or event name to resume with.
        input: String,
    },

    /// List the workflow templates the daemon has loaded.
    Templates,

    /// Replay logged events for a workflow instance.
    Replay {
        /// Instance id to replay events for.
        instance_id: String,
    },
}

/// Output format for inspection commands.
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {s}. Use: text or json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_explicit_template() {
        let cli = Cli::parse_from(["td", "run", "--thread-id", "t1", "--name", "onboarding", "onboard Acme"]);
        match cli.command {
            Command::Run { thread_id, instruction, name } => {
                assert_eq!(thread_id, "t1");
                assert_eq!(instruction, "onboard Acme");
                assert_eq!(name.as_deref(), Some("onboarding"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_resume() {
        let cli = Cli::parse_from(["td", "resume", "--thread-id", "t1", "onboarding", "{\"approved\":true}"]);
        assert!(matches!(cli.command, Command::Resume { .. }));
    }

    #[test]
    fn parses_templates() {
        let cli = Cli::parse_from(["td", "templates"]);
        assert!(matches!(cli.command, Command::Templates));
    }

    #[test]
    fn output_format_parses_text_and_json() {
        assert!(matches!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text));
        assert!(matches!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json));
        assert!("garbage".parse::<OutputFormat>().is_err());
    }
}
