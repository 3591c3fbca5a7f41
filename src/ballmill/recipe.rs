// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Mix program recipe
//!
//! A [`Recipe`] bundles everything the device needs to run one mix: the name
//! shown on the front panel, up to ten speed/time segments and the ramp
//! options. It is validated once at construction and never mutated.

use thiserror::Error;

use super::registers::{MAX_MIX_NAME_LEN, MAX_SETPOINTS};

/// Padding byte appended to odd-length mix names
pub const NAME_PAD: u8 = b' ';

/// Reasons a recipe cannot be sent to the device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecipeError {
    #[error("Mix name '{name}' is {len} characters long, the device accepts at most {max}")]
    NameTooLong { name: String, len: usize, max: usize },

    #[error("Mix name '{name}' contains non-ASCII characters")]
    NonAsciiName { name: String },

    #[error("{field} has {count} setpoints, the device accepts at most {max}")]
    TooManySetpoints {
        field: &'static str,
        count: usize,
        max: usize,
    },
}

/// Immutable mix program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    mix_name: String,
    speeds: Vec<i16>,
    times: Vec<u16>,
    acceleration: u16,
    deceleration: u16,
}

impl Recipe {
    /// Validate and build a recipe.
    ///
    /// ### Errors
    ///
    /// * [`RecipeError::NonAsciiName`] if the name is not plain ASCII
    /// * [`RecipeError::NameTooLong`] if the name exceeds 12 characters
    /// * [`RecipeError::TooManySetpoints`] if more than 10 speeds or times are given
    pub fn new(
        mix_name: impl Into<String>,
        speeds: Vec<i16>,
        times: Vec<u16>,
        acceleration: u16,
        deceleration: u16,
    ) -> Result<Self, RecipeError> {
        let mix_name = mix_name.into();
        if !mix_name.is_ascii() {
            return Err(RecipeError::NonAsciiName { name: mix_name });
        }
        if mix_name.len() > MAX_MIX_NAME_LEN {
            return Err(RecipeError::NameTooLong {
                len: mix_name.len(),
                name: mix_name,
                max: MAX_MIX_NAME_LEN,
            });
        }
        check_setpoints("speeds", speeds.len())?;
        check_setpoints("times", times.len())?;

        Ok(Self {
            mix_name,
            speeds,
            times,
            acceleration,
            deceleration,
        })
    }

    pub fn mix_name(&self) -> &str {
        &self.mix_name
    }

    pub fn speeds(&self) -> &[i16] {
        &self.speeds
    }

    pub fn times(&self) -> &[u16] {
        &self.times
    }

    pub fn acceleration(&self) -> u16 {
        self.acceleration
    }

    pub fn deceleration(&self) -> u16 {
        self.deceleration
    }

    /// Speeds as raw register values (two's complement).
    pub fn speed_registers(&self) -> Vec<u16> {
        self.speeds.iter().map(|&s| s as u16).collect()
    }

    /// Pack the mix name two characters per register.
    ///
    /// The first character of each pair goes in the high byte and the second
    /// in the low byte. Odd-length names get one trailing space so the last
    /// register is fully defined. Only as many registers as the name needs
    /// are produced.
    pub fn packed_name(&self) -> Vec<u16> {
        pack_ascii_pairs(self.mix_name.as_bytes())
    }

    /// Total programmed duration in seconds.
    pub fn total_seconds(&self) -> u32 {
        self.times.iter().map(|&t| u32::from(t)).sum()
    }
}

fn check_setpoints(field: &'static str, count: usize) -> Result<(), RecipeError> {
    if count > MAX_SETPOINTS {
        return Err(RecipeError::TooManySetpoints {
            field,
            count,
            max: MAX_SETPOINTS,
        });
    }
    Ok(())
}

/// Pack bytes into big-endian 16-bit words, padding an odd tail with [`NAME_PAD`].
pub fn pack_ascii_pairs(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| {
            let high = pair[0];
            let low = pair.get(1).copied().unwrap_or(NAME_PAD);
            u16::from_be_bytes([high, low])
        })
        .collect()
}

/// Inverse of [`pack_ascii_pairs`]; trailing padding and NUL bytes are stripped.
pub fn unpack_ascii_pairs(words: &[u16]) -> String {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    String::from_utf8_lossy(&bytes)
        .trim_end_matches(|c| c == ' ' || c == '\0')
        .to_string()
}
