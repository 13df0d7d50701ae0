/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

pub mod commands;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
/// Tiered work-order scheduler CLI
///
/// Runs the scheduler (ingress + dispatcher pool) or operates on work
/// orders directly against the store, bypassing HTTP — handy for local
/// runs and seed scenarios.
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the ingress API and the dispatcher worker pool.
    Serve,

    /// Submit a raw message as a new work order, bypassing HTTP.
    Submit(SubmitArgs),

    /// Fetch one work order by id.
    Status {
        #[arg(long)]
        id: Uuid,
    },

    /// List work orders, optionally filtered by status/owner.
    List(ListArgs),

    /// Report accumulated cost/token usage over a lookback window.
    Cost {
        /// Lookback window in seconds. Defaults to the last 24h.
        #[arg(long, default_value_t = 86_400)]
        window_s: i64,
    },
}

#[derive(Args)]
pub struct SubmitArgs {
    /// The raw user message to classify and dispatch.
    #[arg(long)]
    pub message: String,

    /// Session to attach this work order to, if any.
    #[arg(long)]
    pub session_id: Option<Uuid>,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<String>,

    #[arg(long)]
    pub owner: Option<String>,

    #[arg(long, default_value_t = 50)]
    pub limit: i64,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
