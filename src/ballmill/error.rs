// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::modbus::TransportError;

/// Target of a lid operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LidDirection {
    Open,
    Close,
}

impl fmt::Display for LidDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LidDirection::Open => write!(f, "opening"),
            LidDirection::Close => write!(f, "closing"),
        }
    }
}

/// Errors raised by ball mill operations.
///
/// A device that is not ready, or that reports a mixer error at the end of a
/// cycle, is not an error: see [`crate::ballmill::CycleOutcome`].
#[derive(Error, Debug)]
pub enum BallMillError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The command was issued and is not rolled back; poll the status to
    /// find out where the lid actually is.
    #[error("Lid {direction} timed out after {waited:?}")]
    LidTimeout {
        direction: LidDirection,
        waited: Duration,
    },

    #[error("Cycle still running after {waited:?}")]
    CycleTimeout { waited: Duration },

    #[error("Cycle wait cancelled")]
    Cancelled,
}
