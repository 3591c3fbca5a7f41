// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Cycle controller
//!
//! Composes the command sequencer and the status decoder into the
//! operations an operator actually wants: run a full mix cycle, open the
//! lid and wait, close the lid and wait.
//!
//! The controller never stores device state. Every decision is taken on a
//! fresh status read, and the phases below are only reported in the logs:
//!
//! ```text
//! Idle -> Loading -> WaitingReady -> Running -> Terminal(Normal | Error)
//!                          \-> Idle (not ready)
//! Idle -> LidMoving -> Idle | LidTimeout
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::{sleep, Instant};

use super::error::{BallMillError, LidDirection};
use super::recipe::Recipe;
use super::registers::{STATUS, TELEMETRY_REGISTERS};
use super::sequencer::CommandSequencer;
use super::status::{Status, Telemetry};
use crate::modbus::{RegisterTransport, TransportError};

/// Wait after staging a program before trusting the ready flag
pub const LOAD_SETTLE: Duration = Duration::from_millis(250);
/// Wait after the start command before the device reports running
pub const START_SETTLE: Duration = Duration::from_millis(500);
/// Period of every status polling loop
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Default lid deadline, counted from the moment the command is issued
pub const DEFAULT_LID_TIMEOUT: Duration = Duration::from_secs(10);

/// Observed phase of the device, used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Loading,
    WaitingReady,
    Running,
    Terminal(Termination),
    LidMoving(LidDirection),
    LidTimeout(LidDirection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Normal,
    Error,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePhase::Idle => write!(f, "idle"),
            CyclePhase::Loading => write!(f, "loading"),
            CyclePhase::WaitingReady => write!(f, "waiting for ready"),
            CyclePhase::Running => write!(f, "running"),
            CyclePhase::Terminal(Termination::Normal) => write!(f, "finished"),
            CyclePhase::Terminal(Termination::Error) => write!(f, "finished with mixer error"),
            CyclePhase::LidMoving(direction) => write!(f, "lid {}", direction),
            CyclePhase::LidTimeout(direction) => write!(f, "lid {} timed out", direction),
        }
    }
}

/// How a full cycle ended.
///
/// None of these is an error: the caller branches on the variant. After
/// [`CycleOutcome::Faulted`] the caller must call
/// [`CycleController::reset_error`] before issuing further commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// `ready_to_run` was clear after loading; start was never sent.
    NotReady(Status),
    /// The device stopped running without an error.
    Completed(Status),
    /// The device asserted `mixer_error`.
    Faulted(Status),
}

impl CycleOutcome {
    /// Status read that ended the operation
    pub fn status(&self) -> Status {
        match self {
            CycleOutcome::NotReady(s) | CycleOutcome::Completed(s) | CycleOutcome::Faulted(s) => {
                *s
            }
        }
    }

    pub fn phase(&self) -> CyclePhase {
        match self {
            CycleOutcome::NotReady(_) => CyclePhase::Idle,
            CycleOutcome::Completed(_) => CyclePhase::Terminal(Termination::Normal),
            CycleOutcome::Faulted(_) => CyclePhase::Terminal(Termination::Error),
        }
    }
}

/// Result of one [`CycleController::poll_cycle`] step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    Running(Status),
    Finished(CycleOutcome),
}

impl CycleStep {
    fn from_status(status: Status) -> Self {
        if status.mixer_error {
            CycleStep::Finished(CycleOutcome::Faulted(status))
        } else if status.mixer_running {
            CycleStep::Running(status)
        } else {
            CycleStep::Finished(CycleOutcome::Completed(status))
        }
    }
}

/// Bounds on the run loop of [`CycleController::run_full_cycle`].
///
/// The default waits as long as the device keeps running.
#[derive(Debug, Clone, Default)]
pub struct CycleOptions {
    /// Give up after this long, counted from the start command.
    pub max_wait: Option<Duration>,
    /// Checked before loading, before the ready read, before start and
    /// before every poll; storing `false` ends the run without starting or
    /// stopping the device.
    pub running: Option<Arc<AtomicBool>>,
}

impl CycleOptions {
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    fn check_cancelled(&self) -> Result<(), BallMillError> {
        if let Some(running) = &self.running {
            if !running.load(Ordering::SeqCst) {
                warn!("Cycle wait cancelled");
                return Err(BallMillError::Cancelled);
            }
        }
        Ok(())
    }

    fn check(&self, started: Instant) -> Result<(), BallMillError> {
        self.check_cancelled()?;
        if let Some(max_wait) = self.max_wait {
            let waited = started.elapsed();
            if waited >= max_wait {
                error!("Cycle still running after {:?}, giving up", waited);
                return Err(BallMillError::CycleTimeout { waited });
            }
        }
        Ok(())
    }
}

/// Drives one ball mill over an exclusively owned transport.
pub struct CycleController<T> {
    sequencer: CommandSequencer<T>,
    lid_timeout: Duration,
}

impl<T: RegisterTransport> CycleController<T> {
    pub fn new(transport: T) -> Self {
        Self {
            sequencer: CommandSequencer::new(transport),
            lid_timeout: DEFAULT_LID_TIMEOUT,
        }
    }

    pub fn with_lid_timeout(mut self, lid_timeout: Duration) -> Self {
        self.lid_timeout = lid_timeout;
        self
    }

    pub fn sequencer(&mut self) -> &mut CommandSequencer<T> {
        &mut self.sequencer
    }

    /// Read and decode the status word.
    pub async fn read_status(&mut self) -> Result<Status, TransportError> {
        let values = self
            .sequencer
            .transport_mut()
            .read_registers(STATUS, 1)
            .await?;
        let raw = values.first().copied().ok_or(TransportError::ShortRead {
            address: STATUS,
            expected: 1,
            got: 0,
        })?;
        let status = Status::decode(raw);
        debug!("Status: {}", status);
        Ok(status)
    }

    /// Read the status word and the three feedback registers in one request.
    pub async fn read_telemetry(&mut self) -> Result<Telemetry, TransportError> {
        let values = self
            .sequencer
            .transport_mut()
            .read_registers(STATUS, TELEMETRY_REGISTERS)
            .await?;
        Telemetry::from_registers(&values).ok_or(TransportError::ShortRead {
            address: STATUS,
            expected: TELEMETRY_REGISTERS,
            got: values.len(),
        })
    }

    /// Load `recipe`, start it if the device is ready and wait for the end
    /// of the cycle.
    ///
    /// With default options the wait is unbounded: it only ends when the
    /// device reports an error or stops running.
    pub async fn run_full_cycle(
        &mut self,
        recipe: &Recipe,
        options: &CycleOptions,
    ) -> Result<CycleOutcome, BallMillError> {
        options.check_cancelled()?;
        enter(CyclePhase::Loading);
        self.sequencer.load_name(recipe).await?;
        let (speeds, times) = self.sequencer.load_program(recipe).await?;
        info!("\tMix Name: [{}]", recipe.mix_name());
        info!("\tSpeeds: {:?}", speeds);
        info!("\tTimes: {:?}", times);
        sleep(LOAD_SETTLE).await;

        enter(CyclePhase::WaitingReady);
        options.check_cancelled()?;
        let status = self.read_status().await?;
        if !status.ready_to_run {
            warn!("Machine is not ready to run: {}", status);
            enter(CyclePhase::Idle);
            return Ok(CycleOutcome::NotReady(status));
        }

        // last chance to back out before the device moves
        options.check_cancelled()?;
        let started = Instant::now();
        self.sequencer.start().await?;
        enter(CyclePhase::Running);
        sleep(START_SETTLE).await;

        options.check(started)?;
        let mut status = self.read_status().await?;
        loop {
            if let CycleStep::Finished(outcome) = CycleStep::from_status(status) {
                enter(outcome.phase());
                if let CycleOutcome::Faulted(status) = outcome {
                    warn!("Mixer error asserted, reset required: {}", status);
                }
                return Ok(outcome);
            }
            sleep(POLL_INTERVAL).await;
            options.check(started)?;
            status = self.read_status().await?;
            info!("{}", status);
        }
    }

    /// One step of the run loop for callers that schedule polling themselves.
    ///
    /// Call after [`CommandSequencer::start`]; repeat every
    /// [`POLL_INTERVAL`] until it returns [`CycleStep::Finished`].
    pub async fn poll_cycle(&mut self) -> Result<CycleStep, BallMillError> {
        let status = self.read_status().await?;
        let step = CycleStep::from_status(status);
        if let CycleStep::Finished(outcome) = step {
            enter(outcome.phase());
        }
        Ok(step)
    }

    /// Open the lid and wait until the device reports it open.
    pub async fn open_lid(&mut self) -> Result<(), BallMillError> {
        self.move_lid(LidDirection::Open).await
    }

    /// Close the lid and wait until the device reports it closed.
    pub async fn close_lid(&mut self) -> Result<(), BallMillError> {
        self.move_lid(LidDirection::Close).await
    }

    pub async fn stop_cycle(&mut self) -> Result<(), BallMillError> {
        Ok(self.sequencer.stop().await?)
    }

    pub async fn reset_error(&mut self) -> Result<(), BallMillError> {
        Ok(self.sequencer.reset_error().await?)
    }

    /// Release the transport. Call on every exit path of a session.
    pub async fn shutdown(self) -> Result<(), TransportError> {
        let mut transport = self.sequencer.into_inner();
        transport.disconnect().await
    }

    async fn move_lid(&mut self, direction: LidDirection) -> Result<(), BallMillError> {
        let issued = Instant::now();
        match direction {
            LidDirection::Open => self.sequencer.open_lid_command().await?,
            LidDirection::Close => self.sequencer.close_lid_command().await?,
        }
        enter(CyclePhase::LidMoving(direction));

        loop {
            let status = self.read_status().await?;
            let reached = match direction {
                LidDirection::Open => status.lid_open,
                LidDirection::Close => status.lid_closed,
            };
            if reached {
                match direction {
                    LidDirection::Open => info!("Lid open!"),
                    LidDirection::Close => info!("Lid closed!"),
                }
                enter(CyclePhase::Idle);
                return Ok(());
            }

            let waited = issued.elapsed();
            if waited >= self.lid_timeout {
                enter(CyclePhase::LidTimeout(direction));
                error!("Lid {} timed out after {:?}", direction, waited);
                return Err(BallMillError::LidTimeout { direction, waited });
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

fn enter(phase: CyclePhase) {
    debug!("Phase: {}", phase);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::mock::MockTransport;

    const RUNNING: u16 = 0b0011_0010;
    const STOPPED: u16 = 0b1011_0000;
    const FAULT: u16 = 0b0011_0100;

    #[test]
    fn step_classification() {
        assert!(matches!(
            CycleStep::from_status(Status::decode(RUNNING)),
            CycleStep::Running(_)
        ));
        assert!(matches!(
            CycleStep::from_status(Status::decode(STOPPED)),
            CycleStep::Finished(CycleOutcome::Completed(_))
        ));
        // an error wins even if the running bit is still set
        assert!(matches!(
            CycleStep::from_status(Status::decode(FAULT | RUNNING)),
            CycleStep::Finished(CycleOutcome::Faulted(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_cycle_reads_once() {
        let mock = MockTransport::with_status_sequence([RUNNING, STOPPED]);
        let mut controller = CycleController::new(mock.clone());

        assert!(matches!(
            controller.poll_cycle().await.unwrap(),
            CycleStep::Running(_)
        ));
        let step = controller.poll_cycle().await.unwrap();
        assert_eq!(
            step,
            CycleStep::Finished(CycleOutcome::Completed(Status::decode(STOPPED)))
        );
        assert_eq!(mock.status_reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_reads_four_registers() {
        let mock = MockTransport::with_status_sequence([RUNNING]);
        mock.set_register(3101, 750);
        mock.set_register(3102, 2);
        mock.set_register(3103, 12);
        let mut controller = CycleController::new(mock.clone());

        let telemetry = controller.read_telemetry().await.unwrap();
        assert_eq!(
            telemetry,
            Telemetry {
                machine_status: RUNNING,
                speed: 750,
                position: 2,
                vacuum_lid: 12
            }
        );
    }

    const READY: u16 = 0b1011_0001;
    const NOT_READY: u16 = 0b1010_0000;
    const LID_OPEN: u16 = 0b1010_1000;
    const LID_MOVING: u16 = 0b0010_0000;

    fn recipe() -> Recipe {
        Recipe::new("Test", vec![500], vec![30], 500, 500).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn open_lid_polls_until_flag_is_set() {
        let mock = MockTransport::with_status_sequence([LID_MOVING, LID_MOVING, LID_OPEN]);
        let mut controller = CycleController::new(mock.clone());

        let begin = Instant::now();
        controller.open_lid().await.unwrap();
        let elapsed = begin.elapsed();

        assert_eq!(mock.status_reads(), 3);
        assert_eq!(mock.writes_to(3053), vec![vec![50], vec![0], vec![1], vec![0]]);
        assert!(elapsed >= Duration::from_millis(1500) && elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn close_lid_times_out_from_command_issue() {
        let mock = MockTransport::with_status_sequence([LID_MOVING]);
        let mut controller = CycleController::new(mock.clone());

        let begin = Instant::now();
        let err = controller.close_lid().await.unwrap_err();
        let elapsed = begin.elapsed();

        match err {
            BallMillError::LidTimeout { direction, waited } => {
                assert_eq!(direction, LidDirection::Close);
                assert!(waited >= DEFAULT_LID_TIMEOUT);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(elapsed >= DEFAULT_LID_TIMEOUT && elapsed < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn lid_timeout_is_configurable() {
        let mock = MockTransport::with_status_sequence([LID_MOVING]);
        let mut controller =
            CycleController::new(mock.clone()).with_lid_timeout(Duration::from_secs(1));

        let err = controller.open_lid().await.unwrap_err();
        assert!(matches!(err, BallMillError::LidTimeout { .. }));
        // the command pulse itself counts against the deadline
        assert_eq!(mock.status_reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_never_starts() {
        let mock = MockTransport::with_status_sequence([NOT_READY]);
        let mut controller = CycleController::new(mock.clone());

        let outcome = controller
            .run_full_cycle(&recipe(), &CycleOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome, CycleOutcome::NotReady(Status::decode(NOT_READY)));
        assert!(!mock.writes_to(3053).contains(&vec![100]));
        assert_eq!(mock.status_reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_ends_when_running_clears() {
        let mock = MockTransport::with_status_sequence([READY, RUNNING, STOPPED]);
        let mut controller = CycleController::new(mock.clone());

        let outcome = controller
            .run_full_cycle(&recipe(), &CycleOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome, CycleOutcome::Completed(Status::decode(STOPPED)));
        assert_eq!(mock.status_reads(), 3);
        assert_eq!(mock.writes_to(3053).iter().filter(|w| **w == [100]).count(), 1);
        assert_eq!(mock.writes_to(3000), vec![vec![0x5465, 0x7374]]);
    }

    #[tokio::test(start_paused = true)]
    async fn mixer_error_ends_cycle_as_faulted() {
        let mock = MockTransport::with_status_sequence([READY, RUNNING, RUNNING, FAULT]);
        let mut controller = CycleController::new(mock.clone());

        let outcome = controller
            .run_full_cycle(&recipe(), &CycleOptions::default())
            .await
            .unwrap();

        assert!(matches!(outcome, CycleOutcome::Faulted(s) if s.mixer_error));
        assert_eq!(mock.status_reads(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn max_wait_bounds_the_run_loop() {
        let mock = MockTransport::with_status_sequence([READY, RUNNING]);
        let mut controller = CycleController::new(mock.clone());
        let options = CycleOptions::default().with_max_wait(Duration::from_secs(3));

        let err = controller.run_full_cycle(&recipe(), &options).await.unwrap_err();
        match err {
            BallMillError::CycleTimeout { waited } => {
                assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_running_flag_cancels_the_wait() {
        let mock = MockTransport::with_status_sequence([READY, RUNNING]);
        let mut controller = CycleController::new(mock.clone());
        let running = Arc::new(AtomicBool::new(true));
        let options = CycleOptions::default().with_running_flag(Arc::clone(&running));

        let flag = Arc::clone(&running);
        tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            flag.store(false, Ordering::SeqCst);
        });

        let err = controller.run_full_cycle(&recipe(), &options).await.unwrap_err();
        assert!(matches!(err, BallMillError::Cancelled));
        // the controller never sends stop on its own
        assert!(!mock.writes_to(3053).contains(&vec![200]));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_never_sends_start() {
        let mock = MockTransport::with_status_sequence([READY, RUNNING]);
        let mut controller = CycleController::new(mock.clone());
        let options =
            CycleOptions::default().with_running_flag(Arc::new(AtomicBool::new(false)));

        let err = controller.run_full_cycle(&recipe(), &options).await.unwrap_err();
        assert!(matches!(err, BallMillError::Cancelled));
        assert!(!mock.writes_to(3053).contains(&vec![100]));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_loading_never_sends_start() {
        let mock = MockTransport::with_status_sequence([READY, RUNNING]);
        let mut controller = CycleController::new(mock.clone());
        let running = Arc::new(AtomicBool::new(true));
        let options = CycleOptions::default().with_running_flag(Arc::clone(&running));

        // both load pulses take 1 s, the ready read happens at 1.25 s
        let flag = Arc::clone(&running);
        tokio::spawn(async move {
            sleep(Duration::from_millis(600)).await;
            flag.store(false, Ordering::SeqCst);
        });

        let err = controller.run_full_cycle(&recipe(), &options).await.unwrap_err();
        assert!(matches!(err, BallMillError::Cancelled));
        assert!(!mock.writes_to(3053).contains(&vec![100]));
        assert_eq!(mock.status_reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_propagates_from_cycle() {
        let mock = MockTransport::with_status_sequence([READY]);
        // first request is the mix name write
        mock.fail_on_request(0);
        let mut controller = CycleController::new(mock.clone());

        let err = controller
            .run_full_cycle(&recipe(), &CycleOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BallMillError::Transport(TransportError::Mock(_))));
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_disconnects_transport() {
        let mock = MockTransport::new();
        let controller = CycleController::new(mock.clone());
        controller.shutdown().await.unwrap();
        assert!(mock.is_disconnected());
    }
}
