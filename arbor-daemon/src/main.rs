//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;
mod manager;

use clap::{App, Arg};
use config::{Config, LoggingFmtStyle};
use manager::Manager;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

// Exit codes: 0 normal, 1 configuration error, 2 fatal runtime error.
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_FATAL: i32 = 2;

fn init_tracing(config: &config::Logging) {
    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.stdout.show_thread_id)
            .with_file(config.stdout.show_source)
            .with_line_number(config.stdout.show_source)
            .with_ansi(config.stdout.colors);
        let layer = match config.stdout.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("arbor=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout)
        .init();
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("Arbor routing daemon")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    // Read and validate the configuration file. Configuration errors are
    // reported synchronously, before anything starts.
    let config_file = matches.value_of("config");
    let config = match Config::load(config_file) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    // Initialize tracing.
    init_tracing(&config.logging);

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(EXIT_FATAL);
    }));

    // We're ready to go!
    info!("starting up");

    // Main loop.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async {
            let manager = match Manager::start(config).await {
                Ok(manager) => manager,
                Err(error) => {
                    eprintln!("{error}");
                    std::process::exit(EXIT_FATAL);
                }
            };

            // Run until asked to stop.
            let mut sigterm = tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            )
            .expect("failed to register signal handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => (),
                _ = sigterm.recv() => (),
            }

            // Stop all components within the teardown grace window.
            manager.shutdown().await;
        });

    info!("exiting");
}
