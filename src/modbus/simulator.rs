// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated ball mill and its Modbus TCP server
//!
//! [`SimulatedBallMill`] models the device side of the register map closely
//! enough to exercise the driver end to end:
//!
//! - Writing an opcode to the command register latches it; writing `1`
//!   (the middle of the doorbell pulse) executes the latched command, or
//!   commits the staged program when nothing is latched.
//! - The lid takes `lid_travel` to open or close; both lid flags are clear
//!   while it moves.
//! - A started cycle lasts the sum of the programmed times, multiplied by
//!   `time_scale`.
//! - `ready_to_run` is set when a program is loaded, the lid is closed, the
//!   safety chain is ok, no cycle is running and no error is latched.
//!
//! [`BallMillModbusServer`] exposes the model through `tokio-modbus`.
//! For avoiding confusion with the Modbus master/slave terminology, the
//! server is the simulated device and the client is the driver.

use std::collections::HashMap;
use std::future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

use super::transport::{RegisterTransport, TransportError};
use crate::ballmill::recipe::unpack_ascii_pairs;
use crate::ballmill::registers::{
    Command, COMMAND, MAX_SETPOINTS, MIX_NAME, MIX_NAME_REGISTERS, POSITION_FEEDBACK, SPEEDS,
    SPEED_FEEDBACK, STATUS, TIMES, VACUUM_LID_FEEDBACK,
};
use crate::ballmill::status::Status;
use crate::config::SimulatorConfig;

const FIRST_REGISTER: u16 = MIX_NAME;
const LAST_REGISTER: u16 = VACUUM_LID_FEEDBACK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LidState {
    Open,
    Closed,
    Opening { since: Instant },
    Closing { since: Instant },
}

#[derive(Debug, Clone)]
struct CycleRun {
    started: Instant,
    /// (speed, scaled duration) per programmed segment
    segments: Vec<(u16, Duration)>,
}

impl CycleRun {
    fn total(&self) -> Duration {
        self.segments.iter().map(|(_, d)| *d).sum()
    }

    /// 1-based index and speed of the active segment
    fn active_segment(&self, now: Instant) -> Option<(u16, u16)> {
        let mut elapsed = now.saturating_duration_since(self.started);
        for (index, (speed, duration)) in self.segments.iter().enumerate() {
            if elapsed < *duration {
                return Some((index as u16 + 1, *speed));
            }
            elapsed -= *duration;
        }
        None
    }
}

#[derive(Debug)]
struct DeviceState {
    holding: HashMap<u16, u16>,
    latched: Option<Command>,
    program_loaded: bool,
    lid: LidState,
    run: Option<CycleRun>,
    error: bool,
    safety_ok: bool,
}

/// Register-level model of the ball mill.
#[derive(Debug)]
pub struct SimulatedBallMill {
    state: Mutex<DeviceState>,
    lid_travel: Duration,
    time_scale: f64,
}

impl Default for SimulatedBallMill {
    fn default() -> Self {
        Self::new(Duration::from_millis(1500), 1.0)
    }
}

impl SimulatedBallMill {
    /// Create a device with an open lid, no program and no error.
    pub fn new(lid_travel: Duration, time_scale: f64) -> Self {
        let holding = (FIRST_REGISTER..=LAST_REGISTER).map(|r| (r, 0)).collect();
        Self {
            state: Mutex::new(DeviceState {
                holding,
                latched: None,
                program_loaded: false,
                lid: LidState::Open,
                run: None,
                error: false,
                safety_ok: true,
            }),
            lid_travel,
            time_scale,
        }
    }

    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self::new(Duration::from_millis(config.lid_travel_ms), config.time_scale)
    }

    /// Latch a mixer fault, stopping any running cycle.
    pub fn inject_fault(&self) {
        let mut state = self.lock();
        warn!("Simulator: mixer fault injected");
        state.error = true;
        state.run = None;
    }

    /// Open or close the safety chain.
    pub fn set_safety_ok(&self, ok: bool) {
        self.lock().safety_ok = ok;
    }

    /// Current decoded status.
    pub fn status(&self) -> Status {
        let mut state = self.lock();
        self.refresh(&mut state, Instant::now());
        Status::decode(status_word(&state))
    }

    /// Mix name currently stored in the name registers.
    pub fn mix_name(&self) -> String {
        let state = self.lock();
        let words: Vec<u16> = (MIX_NAME..MIX_NAME + MIX_NAME_REGISTERS)
            .map(|r| state.holding.get(&r).copied().unwrap_or(0))
            .collect();
        unpack_ascii_pairs(&words)
    }

    /// Read holding registers, computing the feedback block on the fly.
    pub fn read(&self, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
        check_range(addr, cnt)?;
        let now = Instant::now();
        let mut state = self.lock();
        self.refresh(&mut state, now);

        let segment = state.run.as_ref().and_then(|run| run.active_segment(now));
        let values = (addr..addr + cnt)
            .map(|register| match register {
                STATUS => status_word(&state),
                SPEED_FEEDBACK => segment.map(|(_, speed)| speed).unwrap_or(0),
                POSITION_FEEDBACK => segment.map(|(index, _)| index).unwrap_or(0),
                VACUUM_LID_FEEDBACK => 0,
                _ => state.holding.get(&register).copied().unwrap_or(0),
            })
            .collect();
        Ok(values)
    }

    /// Write holding registers. The feedback block is read-only.
    pub fn write(&self, addr: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        check_range(addr, values.len() as u16)?;
        if addr + values.len() as u16 > STATUS {
            error!(
                "Exception::IllegalDataAddress - Register {} is read-only",
                addr
            );
            return Err(ExceptionCode::IllegalDataAddress);
        }

        let now = Instant::now();
        let mut state = self.lock();
        self.refresh(&mut state, now);
        for (offset, value) in values.iter().enumerate() {
            let register = addr + offset as u16;
            state.holding.insert(register, *value);
            if register == COMMAND {
                self.on_command_write(&mut state, *value, now);
            }
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn on_command_write(&self, state: &mut DeviceState, value: u16, now: Instant) {
        match value {
            0 => {}
            1 => match state.latched.take() {
                Some(command) => self.execute(state, command, now),
                None => {
                    debug!("Simulator: program committed");
                    state.program_loaded = true;
                }
            },
            other => match Command::from_opcode(other) {
                Some(command) => {
                    debug!("Simulator: latched {}", command);
                    state.latched = Some(command);
                }
                None => warn!("Simulator: ignoring unknown opcode {}", other),
            },
        }
    }

    fn execute(&self, state: &mut DeviceState, command: Command, now: Instant) {
        info!("Simulator: executing {}", command);
        match command {
            Command::Open => {
                if state.run.is_some() {
                    warn!("Simulator: refusing to open the lid while running");
                } else if state.lid != LidState::Open {
                    state.lid = LidState::Opening { since: now };
                }
            }
            Command::Close => {
                if state.lid != LidState::Closed {
                    state.lid = LidState::Closing { since: now };
                }
            }
            Command::Start => {
                if ready_to_run(state) {
                    let segments = self.program_segments(state);
                    state.run = Some(CycleRun {
                        started: now,
                        segments,
                    });
                } else {
                    warn!("Simulator: start ignored, device not ready");
                }
            }
            Command::Stop => state.run = None,
            Command::ResetError => state.error = false,
            Command::Load | Command::SecureLid | Command::GoHome => {}
        }
    }

    fn program_segments(&self, state: &DeviceState) -> Vec<(u16, Duration)> {
        (0..MAX_SETPOINTS as u16)
            .map(|i| {
                let speed = state.holding.get(&(SPEEDS + i)).copied().unwrap_or(0);
                let seconds = state.holding.get(&(TIMES + i)).copied().unwrap_or(0);
                (speed, Duration::from_secs_f64(f64::from(seconds) * self.time_scale))
            })
            .filter(|(_, duration)| !duration.is_zero())
            .collect()
    }

    fn refresh(&self, state: &mut DeviceState, now: Instant) {
        state.lid = match state.lid {
            LidState::Opening { since } if now.saturating_duration_since(since) >= self.lid_travel => {
                LidState::Open
            }
            LidState::Closing { since } if now.saturating_duration_since(since) >= self.lid_travel => {
                LidState::Closed
            }
            lid => lid,
        };
        let finished = state
            .run
            .as_ref()
            .is_some_and(|run| now.saturating_duration_since(run.started) >= run.total());
        if finished {
            info!("Simulator: cycle complete");
            state.run = None;
        }
    }
}

fn ready_to_run(state: &DeviceState) -> bool {
    state.program_loaded
        && state.lid == LidState::Closed
        && state.safety_ok
        && state.run.is_none()
        && !state.error
}

fn status_word(state: &DeviceState) -> u16 {
    let lid_moving = matches!(state.lid, LidState::Opening { .. } | LidState::Closing { .. });
    Status {
        robot_at_home: state.run.is_none() && !lid_moving,
        reserved: false,
        safety_ok: state.safety_ok,
        lid_closed: state.lid == LidState::Closed,
        lid_open: state.lid == LidState::Open,
        mixer_error: state.error,
        mixer_running: state.run.is_some(),
        ready_to_run: ready_to_run(state),
    }
    .bits()
}

fn check_range(addr: u16, cnt: u16) -> Result<(), ExceptionCode> {
    let end = u32::from(addr) + u32::from(cnt);
    if cnt == 0 || addr < FIRST_REGISTER || end > u32::from(LAST_REGISTER) + 1 {
        error!(
            "Exception::IllegalDataAddress - Registers {}..{} out of range",
            addr, end
        );
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(())
}

/// Modbus TCP service in front of a [`SimulatedBallMill`].
#[derive(Clone)]
pub struct BallMillModbusServer {
    device: Arc<SimulatedBallMill>,
}

impl BallMillModbusServer {
    pub fn new(device: Arc<SimulatedBallMill>) -> Self {
        Self { device }
    }
}

impl tokio_modbus::server::Service for BallMillModbusServer {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    /// Handles 0x03 (read holding), 0x06 (write single) and 0x10 (write
    /// multiple). Any other function code is an IllegalFunction exception.
    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("Received Modbus request: {:?}", req);
        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => self
                .device
                .read(addr, cnt)
                .map(Response::ReadHoldingRegisters),
            Request::WriteMultipleRegisters(addr, values) => self
                .device
                .write(addr, &values)
                .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16)),
            Request::WriteSingleRegister(addr, value) => self
                .device
                .write(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleRegister(addr, value)),
            _ => {
                error!(
                    "Exception::IllegalFunction - Unimplemented function code in request: {req:?}"
                );
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(res)
    }
}

/// Serve `device` on `listener` until the task is dropped or aborted.
pub async fn serve(listener: TcpListener, device: Arc<SimulatedBallMill>) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("Simulated ball mill listening on {}", local_addr);
    let server = Server::new(listener);

    let on_connected = move |stream, socket_addr: SocketAddr| {
        let device = Arc::clone(&device);
        async move {
            info!("Driver connected from {}", socket_addr);
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                Ok(Some(BallMillModbusServer::new(Arc::clone(&device))))
            })
        }
    };
    let on_process_error = |err| {
        error!("Modbus server error: {err}");
    };

    server.serve(&on_connected, on_process_error).await?;
    Ok(())
}

/// In-process transport talking straight to a [`SimulatedBallMill`].
#[derive(Clone)]
pub struct SimulatedTransport {
    device: Arc<SimulatedBallMill>,
}

impl SimulatedTransport {
    pub fn new(device: Arc<SimulatedBallMill>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl RegisterTransport for SimulatedTransport {
    async fn read_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.device
            .read(address, count)
            .map_err(TransportError::Exception)
    }

    async fn write_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), TransportError> {
        self.device
            .write(address, values)
            .map_err(TransportError::Exception)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse(device: &SimulatedBallMill, opcode: Option<u16>) {
        if let Some(op) = opcode {
            device.write(COMMAND, &[op]).unwrap();
        }
        device.write(COMMAND, &[0]).unwrap();
        device.write(COMMAND, &[1]).unwrap();
        device.write(COMMAND, &[0]).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn lid_moves_after_travel_time() {
        let device = SimulatedBallMill::new(Duration::from_secs(1), 1.0);
        assert!(device.status().lid_open);

        pulse(&device, Some(Command::Close.opcode()));
        let moving = device.status();
        assert!(!moving.lid_open && !moving.lid_closed);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(device.status().lid_closed);
    }

    #[tokio::test(start_paused = true)]
    async fn start_requires_loaded_program_and_closed_lid() {
        let device = SimulatedBallMill::new(Duration::ZERO, 1.0);
        device.write(TIMES, &[2]).unwrap();
        device.write(SPEEDS, &[800]).unwrap();

        pulse(&device, Some(Command::Start.opcode()));
        assert!(!device.status().mixer_running, "lid is still open");

        pulse(&device, Some(Command::Close.opcode()));
        let status = device.status();
        assert!(status.lid_closed && !status.ready_to_run, "no program yet");

        pulse(&device, None);
        assert!(device.status().ready_to_run);

        pulse(&device, Some(Command::Start.opcode()));
        assert!(device.status().mixer_running);
        assert_eq!(device.read(SPEED_FEEDBACK, 2).unwrap(), vec![800, 1]);

        tokio::time::advance(Duration::from_secs(2)).await;
        let status = device.status();
        assert!(!status.mixer_running);
        assert!(status.ready_to_run);
    }

    #[test]
    fn command_pulse_does_not_commit_program() {
        let device = SimulatedBallMill::new(Duration::ZERO, 1.0);
        for opcode in [Command::Close, Command::Stop, Command::ResetError] {
            pulse(&device, Some(opcode.opcode()));
        }
        let status = device.status();
        assert!(status.lid_closed);
        assert!(!status.ready_to_run);
    }

    #[test]
    fn feedback_registers_are_read_only() {
        let device = SimulatedBallMill::default();
        assert_eq!(
            device.write(STATUS, &[0xFF]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            device.read(2999, 2),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(device.read(3103, 2), Err(ExceptionCode::IllegalDataAddress));
    }

    #[test]
    fn fault_clears_with_reset() {
        let device = SimulatedBallMill::default();
        device.inject_fault();
        assert!(device.status().mixer_error);
        pulse(&device, Some(Command::ResetError.opcode()));
        assert!(!device.status().mixer_error);
    }

    #[test]
    fn stores_mix_name() {
        let device = SimulatedBallMill::default();
        device.write(MIX_NAME, &[0x4142, 0x4320]).unwrap();
        assert_eq!(device.mix_name(), "ABC");
    }
}
