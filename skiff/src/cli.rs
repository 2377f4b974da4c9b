use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "skiff", version, about = "Emulate a fleet of machines with containers")]
pub struct Cli {
    /// Cluster config file
    #[arg(short, long, global = true, default_value = "skiff.yaml")]
    pub config: PathBuf,

    /// Log filter (tracing EnvFilter syntax)
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default cluster config file
    Init {
        /// Cluster name
        #[arg(long, default_value = "skiff")]
        name: String,
    },
    /// Create all machines in the cluster
    Create,
    /// Delete all machines in the cluster
    Delete,
    /// Start stopped machines
    Start,
    /// Stop started machines
    Stop,
    /// Show all machines
    Show {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Show one machine by container name
    Inspect { name: String },
    /// Open a shell on a machine, or run a command on it
    Ssh {
        /// Machine hostname
        hostname: String,
        /// Remote username
        #[arg(short = 'l', long, default_value = "root")]
        username: String,
        /// Remote command and arguments; a shell when empty
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        remote: Vec<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum OutputFormat {
    Table,
    Json,
}
