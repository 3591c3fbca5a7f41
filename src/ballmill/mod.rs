// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Ball mill driver
//!
//! Everything above the register transport lives here:
//!
//! - [`registers`]: holding register addresses and command opcodes
//! - [`recipe`]: validated mix programs and the mix name packing
//! - [`status`]: decoding of the status word and the feedback block
//! - [`sequencer`]: ordered register writes ending with the doorbell pulse
//! - [`controller`]: full cycle and lid operations built on status polling
//!
//! ## Register Map
//!
//! ### Holding Registers written by the driver
//!
//! - 3000-3012: mix name, two ASCII characters per register
//! - 3013-3022: segment speeds (signed, RPM)
//! - 3023-3032: segment times (seconds)
//! - 3033-3042: vacuum setpoints (not driven)
//! - 3043: acceleration ramp
//! - 3044: deceleration ramp
//! - 3053: command register
//!
//! ### Holding Registers read by the driver
//!
//! - 3100: status word
//! - 3101: speed feedback
//! - 3102: position feedback
//! - 3103: vacuum/lid feedback

pub mod controller;
pub mod error;
pub mod recipe;
pub mod registers;
pub mod sequencer;
pub mod status;

pub use controller::{CycleController, CycleOptions, CycleOutcome, CyclePhase, CycleStep};
pub use error::{BallMillError, LidDirection};
pub use recipe::{Recipe, RecipeError};
pub use registers::Command;
pub use sequencer::CommandSequencer;
pub use status::{Status, Telemetry};
