use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use portwarden_core::ids::ApprovalId;

mod commands;
mod context;
mod logging;

use commands::review::{ReviewAction, ReviewInputs};

#[derive(Parser, Debug)]
#[command(
    name = "portwarden",
    version,
    about = "Human-in-the-loop broker for opening network paths"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Init {
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Ask to open SOURCE -> DESTINATION:PORT
    Request {
        source: String,
        destination: String,
        port: u16,
        #[arg(long)]
        daemon: bool,
    },
    /// Approve a suspended request and apply it
    Approve {
        approval_id: ApprovalId,
        #[arg(long)]
        daemon: bool,
    },
    /// Deny a suspended request
    Deny {
        approval_id: ApprovalId,
        #[arg(long)]
        daemon: bool,
    },
    /// Withdraw a suspended request without an answer
    Cancel {
        approval_id: ApprovalId,
        #[arg(long)]
        daemon: bool,
    },
    /// List requests awaiting approval
    Pending {
        #[arg(long)]
        daemon: bool,
    },
    /// Remove expired suspensions
    Purge,
    /// Show the review table in priority order
    Rules,
    Daemon {
        #[command(subcommand)]
        action: DaemonCommand,
    },
    Config {
        #[arg(long)]
        print: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DaemonCommand {
    Start {
        #[arg(long)]
        socket: Option<PathBuf>,
        #[arg(long)]
        pid: Option<PathBuf>,
    },
    Stop {
        #[arg(long)]
        socket: Option<PathBuf>,
        #[arg(long)]
        pid: Option<PathBuf>,
        /// Stop even if an in-memory daemon still holds approvals
        #[arg(long)]
        force: bool,
    },
    Ping {
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    Status {
        #[arg(long)]
        socket: Option<PathBuf>,
    },
    SocketPath,
    PidPath,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.config.as_deref());

    match cli.command {
        Commands::Init { path, force } => commands::config::init(path, force),
        Commands::Request {
            source,
            destination,
            port,
            daemon,
        } => commands::request::execute(commands::request::RequestInputs {
            config_path: cli.config,
            source,
            destination,
            port,
            use_daemon: daemon,
            json: cli.json,
        }),
        Commands::Approve { approval_id, daemon } => {
            review(cli.config, approval_id, ReviewAction::Approve, daemon, cli.json)
        }
        Commands::Deny { approval_id, daemon } => {
            review(cli.config, approval_id, ReviewAction::Deny, daemon, cli.json)
        }
        Commands::Cancel { approval_id, daemon } => {
            review(cli.config, approval_id, ReviewAction::Cancel, daemon, cli.json)
        }
        Commands::Pending { daemon } => commands::pending::list(cli.config, daemon, cli.json),
        Commands::Purge => commands::pending::purge(cli.config),
        Commands::Rules => commands::rules::print_table(cli.config, cli.json),
        Commands::Daemon { action } => {
            let action = match action {
                DaemonCommand::Start { socket, pid } => commands::daemon::DaemonAction::Start {
                    config: cli.config,
                    socket,
                    pid,
                },
                DaemonCommand::Stop { socket, pid, force } => {
                    commands::daemon::DaemonAction::Stop { socket, pid, force }
                }
                DaemonCommand::Ping { socket } => commands::daemon::DaemonAction::Ping { socket },
                DaemonCommand::Status { socket } => {
                    commands::daemon::DaemonAction::Status { socket }
                }
                DaemonCommand::SocketPath => commands::daemon::DaemonAction::SocketPath,
                DaemonCommand::PidPath => commands::daemon::DaemonAction::PidPath,
            };
            commands::daemon::execute(action)
        }
        Commands::Config { print } => {
            if print {
                commands::config::print_effective(cli.config)
            } else {
                Ok(())
            }
        }
    }
}

fn review(
    config_path: Option<PathBuf>,
    approval_id: ApprovalId,
    action: ReviewAction,
    use_daemon: bool,
    json: bool,
) -> Result<()> {
    commands::review::execute(ReviewInputs {
        config_path,
        approval_id,
        action,
        use_daemon,
        json,
    })
}
