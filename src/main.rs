// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the ball mill driver
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use rust_ballmill::ballmill::{CycleController, CycleOptions, CycleOutcome, Recipe};
use rust_ballmill::config::{output_config_schema, Config};
use rust_ballmill::modbus::{serve, ModbusTcpTransport, RegisterTransport, SimulatedBallMill};

/// Delay between a normal end of cycle and the automatic lid opening
const OPEN_AFTER_RUN: Duration = Duration::from_millis(500);

/// Ball mill driver over Modbus TCP
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML), created with defaults if missing
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Ball mill address, overrides the configuration
    #[arg(long)]
    address: Option<String>,

    /// Ball mill Modbus TCP port, overrides the configuration
    #[arg(long)]
    port: Option<u16>,

    /// Modbus unit identifier, overrides the configuration
    #[arg(long)]
    unit_id: Option<u8>,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    show_config_schema: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Read and decode the status word
    Status,
    /// Read the status word and the feedback registers
    Telemetry,
    /// Open the lid and wait for it
    OpenLid,
    /// Close the lid and wait for it
    CloseLid,
    /// Close the lid, run the configured recipe and open the lid afterwards
    Run {
        /// Give up waiting after this many seconds
        #[arg(long)]
        max_wait: Option<u64>,
    },
    /// Stop the running cycle
    Stop,
    /// Clear a latched mixer error
    ResetError,
    /// Serve a simulated ball mill over Modbus TCP
    Simulate,
}

/// Clears the running flag when `signal` fires. The watch ends when dropped.
struct InterruptWatch {
    handle: JoinHandle<()>,
}

impl InterruptWatch {
    fn spawn<F>(signal: F, running: Arc<AtomicBool>) -> Self
    where
        F: Future<Output = io::Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            if signal.await.is_ok() {
                warn!("Interrupted, abandoning the cycle");
                running.store(false, Ordering::SeqCst);
            }
        });
        Self { handle }
    }
}

impl Drop for InterruptWatch {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    let args = Args::parse();

    if args.show_config_schema {
        return output_config_schema();
    }

    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    config.apply_args(args.address, args.port, args.unit_id);
    config.validate()?;

    let Some(command) = args.command else {
        println!("No command given, see --help");
        return Ok(());
    };

    if let Commands::Simulate = command {
        return run_simulator(&config).await;
    }

    let transport = ModbusTcpTransport::connect(&config.modbus).await?;
    let mut mill = CycleController::new(transport).with_lid_timeout(config.cycle.lid_timeout());

    let result = execute(&mut mill, command, &config).await;
    if let Err(err) = mill.shutdown().await {
        warn!("Failed to close the Modbus connection: {}", err);
    }
    result
}

async fn execute(
    mill: &mut CycleController<ModbusTcpTransport>,
    command: Commands,
    config: &Config,
) -> Result<()> {
    match command {
        Commands::Status => {
            let status = mill.read_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Telemetry => {
            let telemetry = mill.read_telemetry().await?;
            println!("{}", serde_json::to_string_pretty(&telemetry)?);
            println!("{}", telemetry.status());
        }
        Commands::OpenLid => mill.open_lid().await?,
        Commands::CloseLid => mill.close_lid().await?,
        Commands::Run { max_wait } => {
            let recipe = Recipe::try_from(&config.recipe)?;
            let running = Arc::new(AtomicBool::new(true));
            let mut options = CycleOptions::default().with_running_flag(Arc::clone(&running));
            if let Some(max_wait) = max_wait
                .map(Duration::from_secs)
                .or_else(|| config.cycle.max_wait())
            {
                options = options.with_max_wait(max_wait);
            }

            close_run_open(mill, &recipe, &options, running).await?;
        }
        Commands::Stop => mill.stop_cycle().await?,
        Commands::ResetError => mill.reset_error().await?,
        Commands::Simulate => anyhow::bail!("The simulator does not drive a device"),
    }
    Ok(())
}

/// Close the lid, run `recipe` and open the lid after a normal completion.
async fn close_run_open<T: RegisterTransport>(
    mill: &mut CycleController<T>,
    recipe: &Recipe,
    options: &CycleOptions,
    running: Arc<AtomicBool>,
) -> Result<()> {
    mill.close_lid().await?;

    let interrupt = InterruptWatch::spawn(tokio::signal::ctrl_c(), running);
    let outcome = mill.run_full_cycle(recipe, options).await;
    drop(interrupt);

    match outcome? {
        CycleOutcome::NotReady(status) => {
            anyhow::bail!("Machine is not ready to run ({})", status)
        }
        CycleOutcome::Faulted(status) => {
            anyhow::bail!("Cycle ended with a mixer error ({}), reset required", status)
        }
        CycleOutcome::Completed(_) => {
            info!("Cycle complete");
            tokio::time::sleep(OPEN_AFTER_RUN).await;
            // the signal handler stays installed, so Ctrl-C has to be
            // honoured here explicitly
            tokio::select! {
                result = mill.open_lid() => result?,
                _ = tokio::signal::ctrl_c() => {
                    anyhow::bail!("Interrupted while opening the lid")
                }
            }
        }
    }
    Ok(())
}

async fn run_simulator(config: &Config) -> Result<()> {
    let address = format!("{}:{}", config.simulator.address, config.simulator.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind simulator to {}", address))?;
    let device = Arc::new(SimulatedBallMill::from_config(&config.simulator));

    tokio::select! {
        result = serve(listener, device) => {
            if let Err(err) = &result {
                error!("Simulator stopped: {}", err);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Simulator shutting down");
            Ok(())
        }
    }
}
