// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Command sequencing
//!
//! The device applies staged register values only when it sees the doorbell
//! pulse on the command register: `0`, then `1`, then `0`, with 250 ms
//! between writes. Every operation here ends with that pulse.
//!
//! Requests are awaited one by one; nothing is retried.

use std::time::Duration;

use log::{debug, info};
use tokio::time::sleep;

use super::recipe::Recipe;
use super::registers::{Command, ACCELERATION, COMMAND, DECELERATION, MIX_NAME, SPEEDS, TIMES};
use crate::modbus::{RegisterTransport, TransportError};

/// Delay between the writes of the doorbell pulse
pub const PULSE_SETTLE: Duration = Duration::from_millis(250);
/// Extra delay between the reset opcode and its pulse
pub const RESET_SETTLE: Duration = Duration::from_millis(250);

/// Issues the ordered register writes behind each device command.
pub struct CommandSequencer<T> {
    transport: T,
}

impl<T: RegisterTransport> CommandSequencer<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Commit staged values with the 0 -> 1 -> 0 doorbell pulse.
    pub async fn pulse_load(&mut self) -> Result<(), TransportError> {
        debug!("Doorbell pulse on register {}", COMMAND);
        self.transport.write_registers(COMMAND, &[0]).await?;
        sleep(PULSE_SETTLE).await;
        self.transport
            .write_registers(COMMAND, &[Command::Load.opcode()])
            .await?;
        sleep(PULSE_SETTLE).await;
        self.transport.write_registers(COMMAND, &[0]).await
    }

    /// Stage speeds, times and ramps, then pulse.
    ///
    /// Returns the speeds and times that were written. An empty speed or
    /// time list is skipped since Modbus forbids zero-length writes.
    pub async fn load_program(
        &mut self,
        recipe: &Recipe,
    ) -> Result<(Vec<i16>, Vec<u16>), TransportError> {
        info!("Loading program...");
        if !recipe.speeds().is_empty() {
            self.transport
                .write_registers(SPEEDS, &recipe.speed_registers())
                .await?;
        }
        if !recipe.times().is_empty() {
            self.transport.write_registers(TIMES, recipe.times()).await?;
        }
        self.transport
            .write_registers(ACCELERATION, &[recipe.acceleration()])
            .await?;
        self.transport
            .write_registers(DECELERATION, &[recipe.deceleration()])
            .await?;

        self.pulse_load().await?;
        info!("Program loaded.");

        Ok((recipe.speeds().to_vec(), recipe.times().to_vec()))
    }

    /// Stage the packed mix name, then pulse. Returns the packed words.
    pub async fn load_name(&mut self, recipe: &Recipe) -> Result<Vec<u16>, TransportError> {
        let packed = recipe.packed_name();
        debug!("Mix name '{}' packed as {:04X?}", recipe.mix_name(), packed);
        if !packed.is_empty() {
            self.transport.write_registers(MIX_NAME, &packed).await?;
        }
        self.pulse_load().await?;
        Ok(packed)
    }

    pub async fn start(&mut self) -> Result<(), TransportError> {
        info!("Starting cycle...");
        self.send(Command::Start).await
    }

    pub async fn stop(&mut self) -> Result<(), TransportError> {
        info!("Stopping cycle...");
        self.send(Command::Stop).await
    }

    pub async fn reset_error(&mut self) -> Result<(), TransportError> {
        info!("Resetting error...");
        self.transport
            .write_registers(COMMAND, &[Command::ResetError.opcode()])
            .await?;
        sleep(RESET_SETTLE).await;
        self.pulse_load().await
    }

    /// Command half of the lid opening; waiting is the controller's job.
    pub async fn open_lid_command(&mut self) -> Result<(), TransportError> {
        info!("Opening lid...");
        self.send(Command::Open).await
    }

    /// Command half of the lid closing; waiting is the controller's job.
    pub async fn close_lid_command(&mut self) -> Result<(), TransportError> {
        info!("Closing lid...");
        self.send(Command::Close).await
    }

    async fn send(&mut self, command: Command) -> Result<(), TransportError> {
        debug!("Writing command {}", command);
        self.transport
            .write_registers(COMMAND, &[command.opcode()])
            .await?;
        self.pulse_load().await
    }
}
