//! Command-line surface for the `dispatchd` demo binary.

use clap::{Parser, Subcommand};

use crate::constants::{APP_NAME, ENV_LOG};

#[derive(Debug, Parser)]
#[command(name = APP_NAME, version, about = "Topic dispatch core demo harness")]
pub struct Cli {
    /// Tracing filter directive, e.g. `info` or `dispatch_core=debug`.
    #[arg(long, global = true, env = ENV_LOG, default_value = "info")]
    pub log: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Publish a handful of messages and dispatch them to a demo consumer
    /// against each subscription type, printing what each one receives.
    Run {
        /// Number of messages to publish before dispatching.
        #[arg(long, default_value_t = 10)]
        messages: u64,
    },
}
