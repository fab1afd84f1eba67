//! Flowey CLI
//!
//! Runs the sync server and manages accounts and sessions.
//!
//! # Commands
//!
//! - `serve` - Run the websocket sync server
//! - `user add` - Create an account with a generated password
//! - `session create` - Exchange credentials for a session token
//! - `session delete` - Revoke a session token

mod commands;

use clap::{Parser, Subcommand};
use commands::serve::ServeOptions;
use commands::DataDir;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Flowey state-sync server and tools.
#[derive(Parser)]
#[command(name = "flowey")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding states and accounts (default: $XDG_DATA_HOME/flowey)
    #[arg(global = true, short, long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0")]
        ip: IpAddr,

        /// Port to listen on
        #[arg(short, long, default_value_t = 80)]
        port: u16,

        /// Maximum concurrent connections
        #[arg(long, default_value_t = 1000)]
        max_connections: usize,

        /// Seconds to wait for connections to drain on shutdown
        #[arg(long, default_value_t = 10)]
        shutdown_timeout: u64,

        /// Browser origin host allowed to connect (repeatable; default allows any)
        #[arg(long = "allowed-origin")]
        allowed_origins: Vec<String>,
    },

    /// Manage accounts
    User {
        #[command(subcommand)]
        command: UserCommand,
    },

    /// Manage session tokens
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum UserCommand {
    /// Add an account with a generated password
    Add {
        /// Login name
        username: String,

        /// Random bytes in the generated password
        #[arg(short = 'l', long = "length", default_value_t = 40)]
        length: usize,

        /// Skip confirmation
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Create a session token (password is read from stdin)
    Create {
        /// Login name
        username: String,
    },

    /// Revoke a session token
    Delete {
        /// Token to revoke
        token: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so printed passwords and tokens stay pipeable.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("Flowey CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir)?;

    match cli.command {
        Commands::Serve {
            ip,
            port,
            max_connections,
            shutdown_timeout,
            allowed_origins,
        } => {
            let options = ServeOptions {
                ip,
                port,
                max_connections,
                shutdown_timeout: Duration::from_secs(shutdown_timeout),
                allowed_origins,
            };
            commands::serve::run(&data_dir, options)?;
        }
        Commands::User {
            command: UserCommand::Add {
                username,
                length,
                yes,
            },
        } => {
            commands::user::add(&data_dir, &username, length, yes)?;
        }
        Commands::Session {
            command: SessionCommand::Create { username },
        } => {
            let token = commands::session::create(&data_dir, &username, &mut std::io::stdin().lock())?;
            println!("{}", token);
        }
        Commands::Session {
            command: SessionCommand::Delete { token },
        } => {
            commands::session::delete(&data_dir, &token)?;
            println!("session deleted");
        }
        Commands::Version => {}
    }

    Ok(())
}
