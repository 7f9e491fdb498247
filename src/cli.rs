use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mppinstall")]
#[command(version)]
#[command(about = "Unattended installer for MPP database clusters", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Cluster config file [default: <config dir>/cluster.toml]
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// State directory for phase markers, artifacts and the incident log
    #[arg(long, global = true, value_name = "DIR", env = "MPPINSTALL_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Install the cluster, resuming from the first incomplete phase
    Install(InstallArgs),

    /// Show phase progress and the last incident
    Status,

    /// Generate the bootstrap configuration without contacting any host
    Generate {
        /// Write the files here instead of the state directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Validate the config file
    Validate {
        /// Write a starter config if none exists
        #[arg(long)]
        init: bool,
    },

    /// Copy a file to every cluster host
    Push(PushArgs),

    /// Close and remove stale control sockets left by earlier runs
    Sweep,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct InstallArgs {
    /// Log mutating operations instead of running them
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Forget completed phases and start over
    #[arg(long, conflicts_with_all = ["extensions_only", "clean"])]
    pub force: bool,

    /// Only install optional packages on an existing cluster
    #[arg(long, conflicts_with = "clean")]
    pub extensions_only: bool,

    /// Tear the cluster down instead of installing it
    #[arg(long)]
    pub clean: bool,

    /// Skip confirmation prompts
    #[arg(short, long)]
    pub yes: bool,

    /// Prompt for a shared ssh password when MPPINSTALL_PASSWORD is unset
    #[arg(long)]
    pub ask_password: bool,
}

#[derive(Args)]
pub struct PushArgs {
    /// Local file to copy
    pub local: PathBuf,

    /// Destination path on every host
    pub remote: String,

    /// Install the copied package with the configured installer
    #[arg(long)]
    pub install: bool,

    /// Work on several hosts at once
    #[arg(short, long)]
    pub parallel: bool,

    /// Number of hosts handled concurrently with --parallel
    #[arg(short, long, default_value = "4", requires = "parallel")]
    pub jobs: usize,

    /// Log the copy instead of running it
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Prompt for a shared ssh password when MPPINSTALL_PASSWORD is unset
    #[arg(long)]
    pub ask_password: bool,
}
