// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register transport abstraction and the Modbus TCP client
//!
//! The ball mill logic only needs two primitives: read a block of holding
//! registers and write a block of holding registers. [`RegisterTransport`]
//! captures that contract so the controller can run against the real
//! device, the in-process simulator or a scripted mock.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use thiserror::Error;
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use crate::config::ModbusClientConfig;

/// Failure of a single register round trip.
///
/// The driver never retries; the caller decides whether to reconnect.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to Modbus device at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid Modbus device address '{address}'")]
    InvalidAddress { address: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Connection error: {0}")]
    Io(#[from] io::Error),

    #[error("Modbus request failed: {0}")]
    Modbus(#[from] tokio_modbus::Error),

    #[error("Device rejected the request with exception {0:?}")]
    Exception(ExceptionCode),

    #[error("Expected {expected} registers from address {address}, got {got}")]
    ShortRead {
        address: u16,
        expected: u16,
        got: usize,
    },

    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Mock transport failure: {0}")]
    Mock(String),
}

/// Synchronous-in-spirit register access: every call is one awaited round
/// trip, and callers issue them strictly one after another.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Read `count` consecutive holding registers starting at `address`.
    async fn read_registers(&mut self, address: u16, count: u16)
        -> Result<Vec<u16>, TransportError>;

    /// Write `values` to consecutive holding registers starting at `address`.
    async fn write_registers(&mut self, address: u16, values: &[u16])
        -> Result<(), TransportError>;

    /// Release the underlying connection.
    async fn disconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Modbus TCP client for the physical ball mill.
pub struct ModbusTcpTransport {
    ctx: Option<Context>,
    request_timeout: Duration,
}

impl ModbusTcpTransport {
    /// Open a TCP connection to the device described by `config`.
    ///
    /// ### Errors
    ///
    /// * [`TransportError::InvalidAddress`] if `address:port` is not a socket address
    /// * [`TransportError::Timeout`] if the connection is not established in time
    /// * [`TransportError::Connect`] if the TCP connection is refused
    pub async fn connect(config: &ModbusClientConfig) -> Result<Self, TransportError> {
        let address = format!("{}:{}", config.address, config.port);
        let socket_addr: SocketAddr = address
            .parse()
            .map_err(|_| TransportError::InvalidAddress {
                address: address.clone(),
            })?;
        let request_timeout = Duration::from_millis(config.timeout_ms);

        info!(
            "Connecting to ball mill at {} (unit id {})",
            address, config.unit_id
        );
        let ctx = timeout(
            request_timeout,
            tcp::connect_slave(socket_addr, Slave(config.unit_id)),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            operation: format!("Connection to {}", address),
            timeout: request_timeout,
        })?
        .map_err(|source| TransportError::Connect {
            address: address.clone(),
            source,
        })?;

        Ok(Self {
            ctx: Some(ctx),
            request_timeout,
        })
    }

    fn context(&mut self) -> Result<&mut Context, TransportError> {
        self.ctx.as_mut().ok_or(TransportError::Disconnected)
    }
}

#[async_trait]
impl RegisterTransport for ModbusTcpTransport {
    async fn read_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let request_timeout = self.request_timeout;
        let ctx = self.context()?;
        debug!("Reading {} holding registers from {}", count, address);

        let values = timeout(request_timeout, ctx.read_holding_registers(address, count))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: format!("Read of register {}", address),
                timeout: request_timeout,
            })??
            .map_err(TransportError::Exception)?;

        if values.len() < usize::from(count) {
            return Err(TransportError::ShortRead {
                address,
                expected: count,
                got: values.len(),
            });
        }
        Ok(values)
    }

    async fn write_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), TransportError> {
        let request_timeout = self.request_timeout;
        let ctx = self.context()?;
        debug!("Writing {:?} to holding registers from {}", values, address);

        timeout(request_timeout, ctx.write_multiple_registers(address, values))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: format!("Write of register {}", address),
                timeout: request_timeout,
            })??
            .map_err(TransportError::Exception)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut ctx) = self.ctx.take() {
            info!("Disconnecting from ball mill");
            ctx.disconnect().await?;
        }
        Ok(())
    }
}
