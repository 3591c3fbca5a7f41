// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rust Ball Mill library
//!
//! This library drives a networked ball mill through its Modbus holding
//! register map: loading mix programs, running cycles, moving the lid,
//! resetting errors and decoding the device status word.
//!
//! ## Modules
//!
//! - [`ballmill`]: register map, status decoding, command sequencing and the
//!   cycle controller
//! - [`modbus`]: the register transport abstraction, the Modbus TCP client,
//!   a scripted mock and a simulated device served over Modbus TCP
//! - [`config`]: YAML configuration with JSON schema validation
//!
//! ## Usage
//!
//! ```no_run
//! use rust_ballmill::ballmill::{CycleController, CycleOptions, Recipe};
//! use rust_ballmill::config::Config;
//! use rust_ballmill::modbus::ModbusTcpTransport;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::from_file("config.yaml")?;
//! let recipe = Recipe::try_from(&config.recipe)?;
//! let transport = ModbusTcpTransport::connect(&config.modbus).await?;
//! let mut mill = CycleController::new(transport);
//!
//! mill.close_lid().await?;
//! let outcome = mill.run_full_cycle(&recipe, &CycleOptions::default()).await?;
//! println!("cycle ended: {:?}", outcome);
//! mill.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod ballmill;
pub mod config;
pub mod modbus;
