// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP connection configuration
//!
//! This module defines the connection parameters for the ball mill and the
//! settings of the built-in device simulator.

use serde::{Deserialize, Serialize};

/// Connection parameters for the ball mill Modbus TCP interface.
///
/// # Example
///
/// ```
/// use rust_ballmill::config::ModbusClientConfig;
///
/// let modbus_config = ModbusClientConfig {
///     address: "10.10.1.2".to_string(),
///     port: 503,
///     unit_id: 1,
///     timeout_ms: 5000,
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModbusClientConfig {
    /// IPv4/IPv6 address of the ball mill.
    pub address: String,

    /// TCP port of the device. Default value is 502, the standard Modbus TCP port.
    pub port: u16,

    /// Modbus unit (slave) identifier. Default is 1.
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Timeout for connecting and for every single request, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for ModbusClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 502,
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Settings of the simulated ball mill served by the `simulate` command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatorConfig {
    /// Address the simulator binds to.
    pub address: String,

    /// Port the simulator listens on. Defaults to 5020 so it does not need
    /// elevated privileges.
    pub port: u16,

    /// Time the lid takes to open or close, in milliseconds.
    #[serde(default = "default_lid_travel_ms")]
    pub lid_travel_ms: u64,

    /// Multiplier applied to programmed segment times (0.1 runs ten times faster).
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
}

fn default_lid_travel_ms() -> u64 {
    1500
}

fn default_time_scale() -> f64 {
    1.0
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 5020,
            lid_travel_ms: default_lid_travel_ms(),
            time_scale: default_time_scale(),
        }
    }
}
