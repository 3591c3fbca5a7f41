// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Ball mill holding register map
//!
//! All addresses are decimal holding register addresses (function codes
//! 0x03 for reads and 0x10 for writes).
//!
//! | Register Address | Description | Unit |
//! |-----------------|-------------|------|
//! | 3000-3012 | Mix name, 2 ASCII characters per register | - |
//! | 3013-3022 | Speed setpoints 1-10 | RPM |
//! | 3023-3032 | Time setpoints 1-10 | seconds |
//! | 3033-3042 | Vacuum setpoints 1-10 (not driven) | mmHg |
//! | 3043 | Acceleration | - |
//! | 3044 | Deceleration | - |
//! | 3053 | Command register | opcode |
//! | 3100 | Status word (low 8 bits) | bit field |
//! | 3101 | Speed feedback | RPM |
//! | 3102 | Position feedback | - |
//! | 3103 | Vacuum lid feedback | - |

use std::fmt;

pub const MIX_NAME: u16 = 3000;
/// Number of registers reserved for the mix name
pub const MIX_NAME_REGISTERS: u16 = 13;
/// Longest mix name accepted by the device front panel
pub const MAX_MIX_NAME_LEN: usize = 12;

pub const SPEEDS: u16 = 3013;
pub const TIMES: u16 = 3023;
/// Vacuum setpoints, reserved: the driver never writes them
pub const VACUUM_SETPOINTS: u16 = 3033;
/// Number of speed, time and vacuum slots in one program
pub const MAX_SETPOINTS: usize = 10;

pub const ACCELERATION: u16 = 3043;
pub const DECELERATION: u16 = 3044;

pub const COMMAND: u16 = 3053;

pub const STATUS: u16 = 3100;
pub const SPEED_FEEDBACK: u16 = 3101;
pub const POSITION_FEEDBACK: u16 = 3102;
pub const VACUUM_LID_FEEDBACK: u16 = 3103;
/// Status word plus the three feedback registers
pub const TELEMETRY_REGISTERS: u16 = 4;

/// Opcodes accepted by the command register.
///
/// A command only takes effect once the doorbell pulse (0, 1, 0) has been
/// written to the same register.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Load = 1,
    Open = 50,
    Close = 75,
    Start = 100,
    /// Reserved, never issued by the driver
    SecureLid = 150,
    Stop = 200,
    ResetError = 300,
    /// Reserved, never issued by the driver
    GoHome = 400,
}

impl Command {
    /// Register value for this opcode.
    pub fn opcode(self) -> u16 {
        self as u16
    }

    /// Map a raw register value back to a command, if it is one.
    pub fn from_opcode(value: u16) -> Option<Self> {
        match value {
            1 => Some(Command::Load),
            50 => Some(Command::Open),
            75 => Some(Command::Close),
            100 => Some(Command::Start),
            150 => Some(Command::SecureLid),
            200 => Some(Command::Stop),
            300 => Some(Command::ResetError),
            400 => Some(Command::GoHome),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Load => "load",
            Command::Open => "open",
            Command::Close => "close",
            Command::Start => "start",
            Command::SecureLid => "secure-lid",
            Command::Stop => "stop",
            Command::ResetError => "reset-error",
            Command::GoHome => "go-home",
        };
        write!(f, "{} ({})", name, self.opcode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_match_device_table() {
        assert_eq!(Command::Load.opcode(), 1);
        assert_eq!(Command::Open.opcode(), 50);
        assert_eq!(Command::Close.opcode(), 75);
        assert_eq!(Command::Start.opcode(), 100);
        assert_eq!(Command::SecureLid.opcode(), 150);
        assert_eq!(Command::Stop.opcode(), 200);
        assert_eq!(Command::ResetError.opcode(), 300);
        assert_eq!(Command::GoHome.opcode(), 400);
    }

    #[test]
    fn from_opcode_rejects_unknown_values() {
        assert_eq!(Command::from_opcode(75), Some(Command::Close));
        assert_eq!(Command::from_opcode(0), None);
        assert_eq!(Command::from_opcode(101), None);
    }

    #[test]
    fn setpoint_blocks_do_not_overlap() {
        assert_eq!(SPEEDS + MAX_SETPOINTS as u16, TIMES);
        assert_eq!(TIMES + MAX_SETPOINTS as u16, VACUUM_SETPOINTS);
        assert_eq!(VACUUM_SETPOINTS + MAX_SETPOINTS as u16, ACCELERATION);
        assert_eq!(MIX_NAME + MIX_NAME_REGISTERS, SPEEDS);
    }
}
