//! Pomodoro CLI - command-line client for the Pomodoro server.
//!
//! # Commands
//!
//! - `pomodoro start|pause|resume|stop|current|delete`: session control
//! - `pomodoro task add|list|done|rename|rm`: task management
//! - `pomodoro status`: remaining time for status bars
//!
//! # Environment Variables
//!
//! See the [`config`](pomodoro_cli::config) module for available options.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use pomodoro_cli::client::{ApiClient, StartOptions};
use pomodoro_cli::config::Config;
use pomodoro_cli::error::ClientError;
use pomodoro_cli::status;

/// Pomodoro CLI - drive the Pomodoro server from the terminal.
#[derive(Parser, Debug)]
#[command(name = "pomodoro")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    POMODORO_SERVER_URL    Server URL (default: http://127.0.0.1:7070)
    POMODORO_SOCKET_PATH   Status-bar socket (default: <data dir>/pomodoro.sock)

EXAMPLES:
    # Start a 50 minute work phase attributed to a task
    pomodoro start --work 3000 --task 6f1c...

    # Pause whatever is running
    pomodoro pause

    # Show remaining time in a status bar
    pomodoro status
")]
struct Cli {
    /// Log requests and responses to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new session. The phase follows the previous session.
    Start {
        /// Work phase length in seconds.
        #[arg(long = "work", value_name = "SECS")]
        work_secs: Option<u64>,

        /// Short break length in seconds.
        #[arg(long = "break", value_name = "SECS")]
        break_secs: Option<u64>,

        /// Long break length in seconds.
        #[arg(long = "long-break", value_name = "SECS")]
        long_break_secs: Option<u64>,

        /// Task to attribute the session to.
        #[arg(long = "task", value_name = "ID")]
        task_id: Option<String>,
    },

    /// Pause the running session.
    Pause {
        /// Session id (default: the current session).
        #[arg(long)]
        id: Option<String>,
    },

    /// Resume a paused session.
    Resume {
        #[arg(long)]
        id: Option<String>,
    },

    /// Stop the session without completing it.
    Stop {
        #[arg(long)]
        id: Option<String>,
    },

    /// Show the latest session.
    Current,

    /// Delete a session record.
    Delete {
        #[arg(long)]
        id: Option<String>,
    },

    /// Manage tasks.
    #[command(subcommand)]
    Task(TaskCommand),

    /// Print the remaining time as MM:SS (or --:--).
    Status,
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    /// Create a task.
    Add { title: String },

    /// List all tasks.
    List,

    /// Mark a task completed.
    Done { id: String },

    /// Change a task's title.
    Rename { id: String, title: String },

    /// Delete a task.
    Rm { id: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
        .and_then(|runtime| runtime.block_on(run(cli.command)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let config = Config::from_env().map_err(ClientError::from)?;
    debug!(server_url = %config.server_url, "Configuration loaded");

    if let Command::Status = command {
        println!("{}", status::query(&config.socket_path).await);
        return Ok(());
    }

    let client = ApiClient::new(config.server_url)?;

    match command {
        Command::Start {
            work_secs,
            break_secs,
            long_break_secs,
            task_id,
        } => {
            let options = StartOptions {
                work_secs,
                break_secs,
                long_break_secs,
                task_id,
            };
            println!("{}", client.start(&options).await?);
        }
        Command::Pause { id } => {
            let id = resolve_id(&client, id).await?;
            println!("{}", client.pause(&id).await?);
        }
        Command::Resume { id } => {
            let id = resolve_id(&client, id).await?;
            println!("{}", client.resume(&id).await?);
        }
        Command::Stop { id } => {
            let id = resolve_id(&client, id).await?;
            println!("{}", client.stop(&id).await?);
        }
        Command::Current => match client.current().await? {
            Some(session) => println!("{session}"),
            None => return Err(ClientError::NoSession.into()),
        },
        Command::Delete { id } => {
            let id = resolve_id(&client, id).await?;
            client.delete(&id).await?;
            println!("deleted {id}");
        }
        Command::Task(task) => run_task(&client, task).await?,
        Command::Status => {}
    }

    Ok(())
}

async fn run_task(client: &ApiClient, command: TaskCommand) -> Result<()> {
    match command {
        TaskCommand::Add { title } => println!("{}", client.create_task(&title).await?),
        TaskCommand::List => {
            for task in client.tasks().await? {
                println!("{task}");
            }
        }
        TaskCommand::Done { id } => {
            let task = client.get_task(&id).await?;
            println!("{}", client.update_task(&id, &task.title, true).await?);
        }
        TaskCommand::Rename { id, title } => {
            let task = client.get_task(&id).await?;
            println!("{}", client.update_task(&id, &title, task.completed).await?);
        }
        TaskCommand::Rm { id } => {
            client.delete_task(&id).await?;
            println!("deleted {id}");
        }
    }
    Ok(())
}

/// Uses `id` when given, else the id of the latest session.
async fn resolve_id(client: &ApiClient, id: Option<String>) -> Result<String, ClientError> {
    if let Some(id) = id {
        return Ok(id);
    }
    client
        .current()
        .await?
        .map(|session| session.id)
        .ok_or(ClientError::NoSession)
}

/// Plain logging to stderr; `warn` unless `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
