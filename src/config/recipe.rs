// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Mix program and cycle timing configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ballmill::{Recipe, RecipeError};

/// Mix program as written in the configuration file.
///
/// Converted into a validated [`Recipe`] with `Recipe::try_from(&config.recipe)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipeConfig {
    /// Name shown on the device (12 ASCII characters max).
    pub mix_name: String,

    /// Speed setpoints in RPM, one per segment (10 max).
    pub speeds: Vec<i16>,

    /// Segment durations in seconds, one per segment (10 max).
    pub times: Vec<u16>,

    pub acceleration: u16,
    pub deceleration: u16,
}

impl Default for RecipeConfig {
    fn default() -> Self {
        Self {
            mix_name: "Remote Test".to_string(),
            speeds: vec![500, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            times: vec![30, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            acceleration: 500,
            deceleration: 500,
        }
    }
}

impl TryFrom<&RecipeConfig> for Recipe {
    type Error = RecipeError;

    fn try_from(config: &RecipeConfig) -> Result<Self, Self::Error> {
        Recipe::new(
            config.mix_name.clone(),
            config.speeds.clone(),
            config.times.clone(),
            config.acceleration,
            config.deceleration,
        )
    }
}

/// Waiting behaviour of the cycle controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleConfig {
    /// Deadline for the lid to reach its target position, counted from the
    /// moment the command is issued.
    #[serde(default = "default_lid_timeout_secs")]
    pub lid_timeout_secs: u64,

    /// Upper bound on the run loop. Absent means wait until the device
    /// reports stop or error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_secs: Option<u64>,
}

fn default_lid_timeout_secs() -> u64 {
    10
}

impl CycleConfig {
    pub fn lid_timeout(&self) -> Duration {
        Duration::from_secs(self.lid_timeout_secs)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_secs.map(Duration::from_secs)
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            lid_timeout_secs: default_lid_timeout_secs(),
            max_wait_secs: None,
        }
    }
}
