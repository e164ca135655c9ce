//! chatsync CLI
//!
//! Command-line interface for chatsync - chat log sync and project snapshots.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use chatsync_core::{Config, Role};

mod commands;
mod output;

use commands::Engine;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "chatsync")]
#[command(about = "chatsync - Chat log sync and project snapshots")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a project's messages
    #[command(alias = "log")]
    History {
        /// Project ID
        project: String,
        /// End the view at this message
        #[arg(long)]
        rewind: Option<String>,
    },
    /// Append a message to a project
    Send {
        /// Project ID
        project: String,
        /// Message text
        text: String,
        /// Author role
        #[arg(short, long, value_enum, default_value = "user")]
        role: RoleArg,
    },
    /// Show sync status of a project
    Status {
        /// Project ID
        project: String,
    },
    /// List projects stored locally
    Projects,
    /// Deliver pending messages now
    Sync {
        /// Project ID
        project: String,
    },
    /// Delete a project's messages and snapshot
    Clear {
        /// Project ID
        project: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Manage project snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// Snapshot a directory as the state at a message
    Take {
        /// Project ID
        project: String,
        /// Message the snapshot belongs to
        message_id: String,
        /// Directory to capture
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        /// Short description of the project state
        #[arg(short, long)]
        summary: Option<String>,
        /// Take the snapshot even if no file changed
        #[arg(long)]
        force: bool,
    },
    /// Show the stored snapshot
    Show {
        /// Project ID
        project: String,
    },
    /// Write the stored snapshot into a directory
    Restore {
        /// Project ID
        project: String,
        /// Target directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, remote_url, sync_enabled, retry.auto_retry, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    User,
    Assistant,
    System,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::User => Role::User,
            RoleArg::Assistant => Role::Assistant,
            RoleArg::System => Role::System,
        }
    }
}

/// Install the stderr logger; RUST_LOG overrides the default filter
fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "chatsync_core={},chatsync_cli={}",
            log_level, log_level
        ))
    });

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Commands that don't need the stores
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), &output);
    }

    let config = Config::load()?;
    if let Commands::Projects = cli.command {
        return commands::status::projects(&config, &output);
    }
    let mut engine = Engine::from_config(&config)?;

    match cli.command {
        Commands::History { project, rewind } => {
            commands::chat::history(&mut engine, project, rewind, &output).await
        }
        Commands::Send {
            project,
            text,
            role,
        } => commands::chat::send(&mut engine, project, role.into(), text, &output).await,
        Commands::Status { project } => commands::status::show(&mut engine, project, &output).await,
        Commands::Sync { project } => commands::chat::sync(&mut engine, project, &output).await,
        Commands::Clear { project, yes } => {
            commands::chat::clear(&mut engine, project, yes, &output).await
        }
        Commands::Snapshot { command } => {
            handle_snapshot_command(command, &mut engine, &output).await
        }
        Commands::Config { .. } | Commands::Projects => unreachable!(), // Handled above
    }
}

async fn handle_snapshot_command(
    command: SnapshotCommands,
    engine: &mut Engine,
    output: &Output,
) -> Result<()> {
    match command {
        SnapshotCommands::Take {
            project,
            message_id,
            dir,
            summary,
            force,
        } => commands::snapshot::take(engine, project, message_id, dir, summary, force, output).await,
        SnapshotCommands::Show { project } => commands::snapshot::show(engine, project, output).await,
        SnapshotCommands::Restore { project, dir } => {
            commands::snapshot::restore(engine, project, dir, output).await
        }
    }
}

fn handle_config_command(command: Option<ConfigCommands>, output: &Output) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(output),
        Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send_with_role() {
        let cli = Cli::try_parse_from(["chatsync", "send", "p1", "hello", "--role", "assistant"])
            .unwrap();
        match cli.command {
            Commands::Send { project, text, role } => {
                assert_eq!(project, "p1");
                assert_eq!(text, "hello");
                assert_eq!(Role::from(role), Role::Assistant);
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_parse_snapshot_restore_default_dir() {
        let cli = Cli::try_parse_from(["chatsync", "--json", "snapshot", "restore", "p1"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Snapshot {
                command: SnapshotCommands::Restore { project, dir },
            } => {
                assert_eq!(project, "p1");
                assert_eq!(dir, PathBuf::from("."));
            }
            _ => panic!("expected snapshot restore"),
        }
    }
}
