// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::debug;

use super::{Config, CONFIG_SCHEMA};
use crate::ballmill::Recipe;

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// ### Example
///
/// ```bash
/// ./rust_ballmill --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;
    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;
    println!("{}", formatted_schema);
    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against rules the JSON schema cannot express.
///
/// # Validation Rules
///
/// - **Addresses**: the device and simulator addresses must be IP addresses
///   (the transport does not resolve host names)
/// - **Recipe**: the mix name must be ASCII and at most 12 characters, with at
///   most 10 speeds and 10 times
/// - **Simulator**: the time scale must be a positive finite number
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    if config.modbus.address == "localhost" || !is_valid_ip_address(&config.modbus.address) {
        anyhow::bail!(
            "Invalid ball mill address '{}': an IP address is required",
            config.modbus.address
        );
    }
    if config.modbus.port == 0 {
        anyhow::bail!("Invalid ball mill port number: 0");
    }

    Recipe::try_from(&config.recipe).context("Invalid recipe")?;

    if !is_valid_ip_address(&config.simulator.address) {
        anyhow::bail!(
            "Invalid simulator address '{}'",
            config.simulator.address
        );
    }
    if !(config.simulator.time_scale.is_finite() && config.simulator.time_scale > 0.0) {
        anyhow::bail!(
            "Simulator time scale must be positive, got {}",
            config.simulator.time_scale
        );
    }

    Ok(())
}
