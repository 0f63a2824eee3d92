use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::transport::TransportChoice;

#[derive(Parser, Debug)]
#[command(name = "qvm", about = "Create and run qubes through the qubesd management API")]
pub struct Cli {
    /// Path to config file [default: ~/.config/qvm/qvm.toml]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// qubesd socket (overrides config)
    #[arg(long, value_name = "PATH", global = true)]
    pub socket: Option<PathBuf>,

    /// How to reach qubesd (overrides config)
    #[arg(long, value_enum, global = true)]
    pub transport: Option<TransportChoice>,

    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new qube
    Create(CreateArgs),

    /// Run a command or RPC service in one or more qubes
    Run(RunArgs),

    /// List qubes
    Ls {
        #[arg(long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// Show or change a qube's properties
    Prefs(PrefsArgs),

    /// Show or change global properties
    GlobalPrefs(GlobalPrefsArgs),

    /// Start qubes
    Start {
        #[arg(required = true)]
        vms: Vec<String>,
    },

    /// Shut qubes down gracefully
    Shutdown {
        #[arg(required = true)]
        vms: Vec<String>,
    },

    /// Kill qubes immediately
    Kill {
        #[arg(required = true)]
        vms: Vec<String>,
    },

    /// Pause running qubes
    Pause {
        #[arg(required = true)]
        vms: Vec<String>,
    },

    /// Resume paused qubes
    Unpause {
        #[arg(required = true)]
        vms: Vec<String>,
    },

    /// Remove a qube and all its volumes
    Remove { vm: String },

    /// Manage storage pools
    Pool {
        #[command(subcommand)]
        action: PoolCommand,
    },

    /// Manage a qube's volumes
    Volume {
        #[command(subcommand)]
        action: VolumeCommand,
    },

    /// List labels
    Labels,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// VM class to create
    #[arg(short = 'C', long = "class", value_name = "CLS")]
    pub class: Option<String>,

    /// Create a StandaloneVM (shorthand for --class StandaloneVM)
    #[arg(long, conflicts_with = "class")]
    pub standalone: bool,

    /// Template to base the new qube on
    #[arg(short, long)]
    pub template: Option<String>,

    /// Label (colour) of the new qube
    #[arg(short, long)]
    pub label: Option<String>,

    /// Set a property on the new qube (repeatable)
    #[arg(short = 'p', long = "property", value_name = "NAME=VALUE")]
    pub properties: Vec<String>,

    /// Storage pool for all volumes, or POOL:VOLUME for one volume (repeatable)
    #[arg(short = 'P', long = "pool", value_name = "POOL[:VOLUME]")]
    pub pools: Vec<String>,

    /// Use a copy of FILE as the root volume
    #[arg(
        short = 'r',
        long,
        value_name = "FILE",
        conflicts_with = "root_move_from"
    )]
    pub root_copy_from: Option<PathBuf>,

    /// Use FILE as the root volume, removing it afterwards
    #[arg(short = 'R', long, value_name = "FILE")]
    pub root_move_from: Option<PathBuf>,

    /// List available qube classes and exit
    #[arg(long)]
    pub help_classes: bool,

    /// Name of the new qube
    #[arg(value_name = "VMNAME", required_unless_present = "help_classes")]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// User to run the command as
    #[arg(short, long)]
    pub user: Option<String>,

    /// Start the qube if it isn't running (default)
    #[arg(long, overrides_with = "no_autostart")]
    pub autostart: bool,

    /// Fail instead of starting a halted qube
    #[arg(long)]
    pub no_autostart: bool,

    /// Pass stdin/stdout/stderr from the remote program
    #[arg(short, long)]
    pub pass_io: bool,

    /// Connect the remote program's stdin/stdout to a local command
    #[arg(long, value_name = "COMMAND", conflicts_with = "pass_io")]
    pub localcmd: Option<String>,

    /// Wait for the GUI session before running the command (default)
    #[arg(long, overrides_with = "no_gui")]
    pub gui: bool,

    /// Don't wait for the GUI session
    #[arg(long, alias = "nogui")]
    pub no_gui: bool,

    /// Mark remote stdout with ANSI colour COLOUR (e.g. 31 for red)
    #[arg(long, value_name = "COLOUR", overrides_with = "no_colour_output")]
    pub colour_output: Option<u8>,

    /// Don't colour remote stdout
    #[arg(long)]
    pub no_colour_output: bool,

    /// Mark remote stderr with ANSI colour COLOUR
    #[arg(long, value_name = "COLOUR", overrides_with = "no_colour_stderr")]
    pub colour_stderr: Option<u8>,

    /// Don't colour remote stderr
    #[arg(long)]
    pub no_colour_stderr: bool,

    /// Replace terminal control characters in remote output [default when stdout is a terminal]
    #[arg(long, overrides_with = "no_filter_escape_chars")]
    pub filter_escape_chars: bool,

    /// Pass remote output through unchanged
    #[arg(long)]
    pub no_filter_escape_chars: bool,

    /// Treat COMMAND as an RPC service name instead of a shell command
    #[arg(long)]
    pub service: bool,

    /// Run in a new DisposableVM, optionally based on BASE_APPVM
    #[arg(
        long,
        value_name = "BASE_APPVM",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "",
        conflicts_with = "all"
    )]
    pub dispvm: Option<String>,

    /// Run in every running qube
    #[arg(long, conflicts_with_all = ["pass_io", "localcmd"])]
    pub all: bool,

    /// Skip this qube with --all (repeatable)
    #[arg(long, value_name = "VM", requires = "all")]
    pub exclude: Vec<String>,

    /// Target qube (omitted with --all/--dispvm) followed by the command
    #[arg(
        value_name = "VMNAME COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct PrefsArgs {
    pub vm: String,

    /// Property to show or set; all are listed when omitted
    pub property: Option<String>,

    /// New value
    #[arg(conflicts_with = "default")]
    pub value: Option<String>,

    /// Reset the property to its default
    #[arg(short = 'D', long, requires = "property")]
    pub default: bool,

    /// Show the property's description
    #[arg(long, requires = "property", conflicts_with_all = ["value", "default"])]
    pub help_property: bool,
}

#[derive(Args, Debug)]
pub struct GlobalPrefsArgs {
    pub property: Option<String>,

    #[arg(conflicts_with = "default")]
    pub value: Option<String>,

    #[arg(short = 'D', long, requires = "property")]
    pub default: bool,

    /// Show the property's description
    #[arg(long, requires = "property", conflicts_with_all = ["value", "default"])]
    pub help_property: bool,
}

#[derive(Subcommand, Debug)]
pub enum PoolCommand {
    /// List storage pools
    List,

    /// List pool drivers and their parameters
    Drivers,

    /// Add a storage pool
    Add {
        name: String,
        driver: String,
        /// Driver parameters
        #[arg(value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Remove a storage pool
    Remove { name: String },
}

#[derive(Subcommand, Debug)]
pub enum VolumeCommand {
    /// List a qube's volumes
    List { vm: String },

    /// Show details of one volume
    Info { vm: String, volume: String },

    /// Grow a volume (e.g. 20G, 512M)
    Resize {
        vm: String,
        volume: String,
        size: String,
    },
}
