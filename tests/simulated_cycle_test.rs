// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Cycle controller against the in-process simulated ball mill
//!
//! All tests run under paused tokio time, so lid travel and cycle durations
//! elapse instantly while keeping their relative ordering.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;

use rust_ballmill::ballmill::{
    BallMillError, CycleController, CycleOptions, CycleOutcome, CycleStep, LidDirection, Recipe,
};
use rust_ballmill::modbus::{SimulatedBallMill, SimulatedTransport};

fn setup() -> (Arc<SimulatedBallMill>, CycleController<SimulatedTransport>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = Arc::new(SimulatedBallMill::new(Duration::from_millis(1500), 1.0));
    let controller = CycleController::new(SimulatedTransport::new(Arc::clone(&device)));
    (device, controller)
}

fn recipe() -> Result<Recipe> {
    Ok(Recipe::new("Remote Test", vec![500, 900], vec![20, 10], 500, 500)?)
}

#[tokio::test(start_paused = true)]
async fn test_close_run_open() -> Result<()> {
    let (device, mut mill) = setup();

    mill.close_lid().await?;
    assert!(device.status().lid_closed);

    let begin = Instant::now();
    let outcome = mill.run_full_cycle(&recipe()?, &CycleOptions::default()).await?;
    assert!(matches!(outcome, CycleOutcome::Completed(s) if !s.mixer_running));
    assert!(begin.elapsed() >= Duration::from_secs(30));
    assert_eq!(device.mix_name(), "Remote Test");

    mill.open_lid().await?;
    assert!(device.status().lid_open);
    mill.shutdown().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_open_lid_refuses_to_run() -> Result<()> {
    let (device, mut mill) = setup();

    let outcome = mill.run_full_cycle(&recipe()?, &CycleOptions::default()).await?;

    assert!(matches!(outcome, CycleOutcome::NotReady(s) if s.lid_open && !s.ready_to_run));
    assert!(!device.status().mixer_running);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_fault_then_reset() -> Result<()> {
    let (device, mut mill) = setup();
    mill.close_lid().await?;

    let faulty = Arc::clone(&device);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        faulty.inject_fault();
    });

    let outcome = mill.run_full_cycle(&recipe()?, &CycleOptions::default()).await?;
    assert!(matches!(outcome, CycleOutcome::Faulted(s) if s.mixer_error));

    mill.reset_error().await?;
    let status = mill.read_status().await?;
    assert!(!status.mixer_error);
    assert!(status.ready_to_run);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_manual_polling() -> Result<()> {
    let (device, mut mill) = setup();
    mill.close_lid().await?;
    mill.sequencer().load_program(&recipe()?).await?;
    mill.sequencer().start().await?;

    assert!(matches!(mill.poll_cycle().await?, CycleStep::Running(_)));
    let telemetry = mill.read_telemetry().await?;
    assert_eq!(telemetry.speed, 500);
    assert_eq!(telemetry.position, 1);

    mill.stop_cycle().await?;
    assert!(matches!(
        mill.poll_cycle().await?,
        CycleStep::Finished(CycleOutcome::Completed(_))
    ));
    assert!(!device.status().mixer_running);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_lid_blocked_by_running_cycle() -> Result<()> {
    let (_device, mut mill) = setup();
    mill.close_lid().await?;
    mill.sequencer().load_program(&recipe()?).await?;
    mill.sequencer().start().await?;

    let err = mill.open_lid().await.unwrap_err();
    assert!(matches!(
        err,
        BallMillError::LidTimeout {
            direction: LidDirection::Open,
            ..
        }
    ));
    Ok(())
}
