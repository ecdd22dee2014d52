use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "MolState Developers",
    version,
    about = "MolState CLI - Run transaction scenarios against a reactive state graph of numeric transforms and inspect the resulting tree.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply the transactions of a scenario file in order and print the resulting state tree.
    Run(RunArgs),
    /// List the built-in transformers and their parameters.
    Transformers(TransformersArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Path to the scenario file in TOML format.
    #[arg(required = true, value_name = "PATH")]
    pub scenario: PathBuf,

    // --- Engine Overrides ---
    /// Override the maximum number of transformers computed concurrently.
    #[arg(short = 'c', long, value_name = "INT")]
    pub max_concurrency: Option<usize>,

    /// Show inherited errors with the original message only, without the failing ref.
    #[arg(long)]
    pub verbatim_errors: bool,

    /// Keep replaced objects alive until their node is removed.
    #[arg(long)]
    pub keep_replaced: bool,

    /// Set a specific configuration value, overriding the scenario file.
    /// Can be used multiple times. Example: -S engine.max-concurrency=4
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,

    // --- Output ---
    /// Also render nodes that are hidden.
    #[arg(long)]
    pub show_hidden: bool,

    /// Print the state tree after every transaction, not only after the last one.
    #[arg(long)]
    pub each: bool,
}

/// Arguments for the `transformers` subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct TransformersArgs {
    /// Show the parameter schema of each transformer.
    #[arg(short, long)]
    pub params: bool,
}
