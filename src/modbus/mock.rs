// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-ballmill project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Scripted mock transport
//!
//! [`MockTransport`] answers status reads from a script of raw status words
//! and records every request with the (tokio) instant it was issued. Cloning
//! shares the same state, so a test can keep a handle after moving the
//! transport into a controller.
//!
//! - Status reads pop the next scripted word; once the script is exhausted
//!   the last word is repeated.
//! - Other reads return whatever was last written (or set) at that address,
//!   defaulting to zero.
//! - A failure can be armed on the n-th request to exercise error paths.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::debug;
use tokio::time::Instant;

use super::transport::{RegisterTransport, TransportError};
use crate::ballmill::registers::STATUS;

/// One request seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterRequest {
    Read { address: u16, count: u16 },
    Write { address: u16, values: Vec<u16> },
}

/// A request and the instant it reached the transport
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub at: Instant,
    pub request: RegisterRequest,
}

#[derive(Debug, Default)]
struct MockState {
    status_script: VecDeque<u16>,
    last_status: u16,
    registers: HashMap<u16, u16>,
    requests: Vec<RecordedRequest>,
    fail_on_request: Option<usize>,
    disconnected: bool,
}

/// In-memory transport driven by a status script.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose status reads return `words` in order.
    pub fn with_status_sequence(words: impl IntoIterator<Item = u16>) -> Self {
        let mock = Self::new();
        mock.push_status(words);
        mock
    }

    /// Append raw status words to the script.
    pub fn push_status(&self, words: impl IntoIterator<Item = u16>) {
        self.lock().status_script.extend(words);
    }

    /// Preset a non-status register value.
    pub fn set_register(&self, address: u16, value: u16) {
        self.lock().registers.insert(address, value);
    }

    /// Make the `n`-th request (0-based, counting reads and writes) fail.
    pub fn fail_on_request(&self, n: usize) {
        self.lock().fail_on_request = Some(n);
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// Values of every write to `address`, in order.
    pub fn writes_to(&self, address: u16) -> Vec<Vec<u16>> {
        self.lock()
            .requests
            .iter()
            .filter_map(|r| match &r.request {
                RegisterRequest::Write { address: a, values } if *a == address => {
                    Some(values.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Number of reads that covered the status word.
    pub fn status_reads(&self) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| matches!(r.request, RegisterRequest::Read { address, .. } if address == STATUS))
            .count()
    }

    pub fn is_disconnected(&self) -> bool {
        self.lock().disconnected
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, request: RegisterRequest) -> Result<MutexGuard<'_, MockState>, TransportError> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(TransportError::Disconnected);
        }
        let index = state.requests.len();
        debug!("Mock request #{}: {:?}", index, request);
        state.requests.push(RecordedRequest {
            at: Instant::now(),
            request,
        });
        if state.fail_on_request == Some(index) {
            return Err(TransportError::Mock(format!(
                "injected failure on request #{}",
                index
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl RegisterTransport for MockTransport {
    async fn read_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let mut state = self.record(RegisterRequest::Read { address, count })?;
        let mut values = Vec::with_capacity(usize::from(count));
        for offset in 0..count {
            let register = address + offset;
            let value = if register == STATUS {
                if let Some(next) = state.status_script.pop_front() {
                    state.last_status = next;
                }
                state.last_status
            } else {
                state.registers.get(&register).copied().unwrap_or(0)
            };
            values.push(value);
        }
        Ok(values)
    }

    async fn write_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), TransportError> {
        let mut state = self.record(RegisterRequest::Write {
            address,
            values: values.to_vec(),
        })?;
        for (offset, value) in values.iter().enumerate() {
            state.registers.insert(address + offset as u16, *value);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.lock().disconnected = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_script_repeats_last_word() {
        let mut mock = MockTransport::with_status_sequence([1, 2]);
        assert_eq!(mock.read_registers(STATUS, 1).await.unwrap(), vec![1]);
        assert_eq!(mock.read_registers(STATUS, 1).await.unwrap(), vec![2]);
        assert_eq!(mock.read_registers(STATUS, 1).await.unwrap(), vec![2]);
        assert_eq!(mock.status_reads(), 3);
    }

    #[tokio::test]
    async fn writes_are_recorded_and_readable() {
        let mut mock = MockTransport::new();
        mock.write_registers(3013, &[500, 0]).await.unwrap();
        assert_eq!(mock.read_registers(3013, 2).await.unwrap(), vec![500, 0]);
        assert_eq!(mock.writes_to(3013), vec![vec![500, 0]]);
    }

    #[tokio::test]
    async fn injected_failure_and_disconnect() {
        let mut mock = MockTransport::new();
        mock.fail_on_request(1);
        assert!(mock.write_registers(3053, &[0]).await.is_ok());
        assert!(matches!(
            mock.write_registers(3053, &[1]).await,
            Err(TransportError::Mock(_))
        ));
        mock.disconnect().await.unwrap();
        assert!(matches!(
            mock.read_registers(STATUS, 1).await,
            Err(TransportError::Disconnected)
        ));
    }
}
