/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Work order scheduler CLI entry point.
//!
//! Provides `serve` (ingress + dispatcher pool) plus a handful of
//! store-direct operator commands (`submit`, `status`, `list`, `cost`) for
//! local use without going through HTTP.

use wos_core::cli::{parse_cli, commands, Commands};
use wos_utils::config::Settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = parse_cli();

    let config = Settings::new(None).expect("failed to load configuration");

    wos_utils::logging::init_with_format(&config.log.level, &config.log.format)
        .expect("failed to initialize logging");
    wos_utils::telemetry::init(&config.telemetry, &config.log.level, &config.log.format)
        .expect("failed to initialize telemetry");

    match cli.command {
        Commands::Serve => commands::serve(&config).await?,
        Commands::Submit(args) => commands::submit(&config, args.message, args.session_id).await?,
        Commands::Status { id } => commands::status(&config, id).await?,
        Commands::List(args) => commands::list(&config, args.status, args.owner, args.limit).await?,
        Commands::Cost { window_s } => commands::cost(&config, window_s).await?,
    }

    wos_utils::telemetry::shutdown();

    Ok(())
}
