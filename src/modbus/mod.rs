// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! ## Key Components
//!
//! - [`RegisterTransport`]: the two-primitive contract the driver needs
//! - [`ModbusTcpTransport`]: the Modbus TCP client for the real device
//! - [`MockTransport`]: a scripted transport for tests
//! - [`SimulatedBallMill`]: a device model, reachable in process through
//!   [`SimulatedTransport`] or over the network through [`serve`]

pub mod mock;
pub mod simulator;
pub mod transport;

pub use mock::MockTransport;
pub use simulator::{serve, BallMillModbusServer, SimulatedBallMill, SimulatedTransport};
pub use transport::{ModbusTcpTransport, RegisterTransport, TransportError};
