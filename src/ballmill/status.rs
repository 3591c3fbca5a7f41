// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Status word decoding
//!
//! The device reports its condition in the low byte of register 3100,
//! most-significant bit first:
//!
//! | Bit | Flag |
//! |-----|------|
//! | 7 | robot at home |
//! | 6 | reserved |
//! | 5 | safety ok |
//! | 4 | lid closed |
//! | 3 | lid open |
//! | 2 | mixer error |
//! | 1 | mixer running |
//! | 0 | ready to run |
//!
//! The high byte is undefined and ignored.

use std::fmt;

use serde::{Deserialize, Serialize};

const ROBOT_AT_HOME: u16 = 1 << 7;
const RESERVED: u16 = 1 << 6;
const SAFETY_OK: u16 = 1 << 5;
const LID_CLOSED: u16 = 1 << 4;
const LID_OPEN: u16 = 1 << 3;
const MIXER_ERROR: u16 = 1 << 2;
const MIXER_RUNNING: u16 = 1 << 1;
const READY_TO_RUN: u16 = 1;

/// Decoded device conditions from one status register read.
///
/// A `Status` is built fresh on every poll and never cached. The driver
/// does not check consistency between flags (for instance `lid_open` and
/// `lid_closed` both set); it reports what the device says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    pub robot_at_home: bool,
    pub reserved: bool,
    pub safety_ok: bool,
    pub lid_closed: bool,
    pub lid_open: bool,
    pub mixer_error: bool,
    pub mixer_running: bool,
    pub ready_to_run: bool,
}

impl Status {
    /// Decode a raw status word. Bits above bit 7 are ignored.
    pub fn decode(raw: u16) -> Self {
        let has = |mask: u16| raw & mask != 0;
        Self {
            robot_at_home: has(ROBOT_AT_HOME),
            reserved: has(RESERVED),
            safety_ok: has(SAFETY_OK),
            lid_closed: has(LID_CLOSED),
            lid_open: has(LID_OPEN),
            mixer_error: has(MIXER_ERROR),
            mixer_running: has(MIXER_RUNNING),
            ready_to_run: has(READY_TO_RUN),
        }
    }

    /// Re-encode the flags as the low byte of a status word.
    pub fn bits(&self) -> u16 {
        [
            (self.robot_at_home, ROBOT_AT_HOME),
            (self.reserved, RESERVED),
            (self.safety_ok, SAFETY_OK),
            (self.lid_closed, LID_CLOSED),
            (self.lid_open, LID_OPEN),
            (self.mixer_error, MIXER_ERROR),
            (self.mixer_running, MIXER_RUNNING),
            (self.ready_to_run, READY_TO_RUN),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .fold(0, |acc, (_, mask)| acc | mask)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |b: bool| if b { '1' } else { '0' };
        write!(
            f,
            "robot_at_home={} safety_ok={} lid_closed={} lid_open={} mixer_error={} mixer_running={} ready_to_run={} (0b{:08b})",
            flag(self.robot_at_home),
            flag(self.safety_ok),
            flag(self.lid_closed),
            flag(self.lid_open),
            flag(self.mixer_error),
            flag(self.mixer_running),
            flag(self.ready_to_run),
            self.bits()
        )
    }
}

/// Snapshot of the four feedback registers 3100..=3103.
///
/// Returned by value from [`crate::ballmill::CycleController::read_telemetry`];
/// callers that need a history accumulate the snapshots themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Telemetry {
    /// Raw status word (register 3100)
    pub machine_status: u16,
    /// Observed speed (register 3101)
    pub speed: u16,
    /// Observed position (register 3102)
    pub position: u16,
    /// Observed vacuum lid reading (register 3103)
    pub vacuum_lid: u16,
}

impl Telemetry {
    /// Build a snapshot from a 4-register read starting at the status word.
    ///
    /// Returns `None` when fewer than four values are supplied.
    pub fn from_registers(values: &[u16]) -> Option<Self> {
        match values {
            [machine_status, speed, position, vacuum_lid, ..] => Some(Self {
                machine_status: *machine_status,
                speed: *speed,
                position: *position,
                vacuum_lid: *vacuum_lid,
            }),
            _ => None,
        }
    }

    /// Decoded view of the status word.
    pub fn status(&self) -> Status {
        Status::decode(self.machine_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_maps_msb_to_robot_at_home_and_lsb_to_ready() {
        let status = Status::decode(0b1000_0001);
        assert_eq!(
            status,
            Status {
                robot_at_home: true,
                reserved: false,
                safety_ok: false,
                lid_closed: false,
                lid_open: false,
                mixer_error: false,
                mixer_running: false,
                ready_to_run: true,
            }
        );
    }

    #[test]
    fn decode_small_values_are_left_padded() {
        // 0b11 only needs two bits: running + ready
        let status = Status::decode(3);
        assert!(status.mixer_running);
        assert!(status.ready_to_run);
        assert!(!status.robot_at_home);
        assert!(!status.safety_ok);
    }

    #[test]
    fn decode_ignores_high_byte() {
        assert_eq!(Status::decode(0xFF00), Status::default());
        assert_eq!(Status::decode(0xAB18), Status::decode(0x0018));
    }

    #[test]
    fn decode_is_pure_and_reversible_on_low_byte() {
        for raw in 0..=u16::MAX {
            let first = Status::decode(raw);
            assert_eq!(first, Status::decode(raw));
            assert_eq!(first.bits(), raw & 0x00FF);
        }
    }

    #[test]
    fn each_flag_has_its_own_bit() {
        assert!(Status::decode(1 << 6).reserved);
        assert!(Status::decode(1 << 5).safety_ok);
        assert!(Status::decode(1 << 4).lid_closed);
        assert!(Status::decode(1 << 3).lid_open);
        assert!(Status::decode(1 << 2).mixer_error);
        assert!(Status::decode(1 << 1).mixer_running);
    }

    #[test]
    fn telemetry_requires_four_registers() {
        assert!(Telemetry::from_registers(&[1, 2, 3]).is_none());
        let telemetry = Telemetry::from_registers(&[0b0011_0001, 500, 7, 0]).unwrap();
        assert_eq!(telemetry.speed, 500);
        assert_eq!(telemetry.position, 7);
        assert!(telemetry.status().lid_closed);
        assert!(telemetry.status().ready_to_run);
    }
}
