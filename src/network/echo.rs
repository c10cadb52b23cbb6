//! Echo request correlation
//!
//! Callers that ping block on their own [`EchoWaiter`]; the receive path finds
//! the waiter by `(identifier, sequence)` and posts it once. The list lock is
//! only held to insert, scan and remove records, never across the wait, so a
//! blocked caller cannot stall the thread delivering replies.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{NetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EchoState {
    Pending,
    Matched,
    MismatchedData,
}

/// One outstanding echo request
#[derive(Debug)]
pub struct EchoWaiter {
    id: u16,
    sequence: u16,
    data: Vec<u8>,
    state: Mutex<EchoState>,
    cond: Condvar,
}

impl EchoWaiter {
    fn new(id: u16, sequence: u16, data: &[u8]) -> Self {
        EchoWaiter {
            id,
            sequence,
            data: data.to_vec(),
            state: Mutex::new(EchoState::Pending),
            cond: Condvar::new(),
        }
    }

    /// Record the outcome and wake the caller. Only the first post counts.
    fn post(&self, reply: &[u8]) -> bool {
        let mut state = self.state.lock();
        if *state != EchoState::Pending {
            return false;
        }
        *state = if reply == self.data.as_slice() {
            EchoState::Matched
        } else {
            EchoState::MismatchedData
        };
        self.cond.notify_one();
        true
    }

    /// Block until posted or `deadline`; `None` waits for the post alone.
    fn wait(&self, deadline: Option<Instant>) -> EchoState {
        let mut state = self.state.lock();
        while *state == EchoState::Pending {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut state),
            }
        }
        *state
    }
}

/// Result of an answered echo request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub sequence: u16,
    /// Reply payload equals the request payload
    pub matched: bool,
}

/// Outstanding echo requests plus the global sequence counter
#[derive(Debug)]
pub struct EchoTracker {
    requests: Mutex<Vec<Arc<EchoWaiter>>>,
    seq: AtomicU16,
}

impl Default for EchoTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoTracker {
    pub fn new() -> Self {
        EchoTracker {
            requests: Mutex::new(Vec::new()),
            seq: AtomicU16::new(1),
        }
    }

    /// Next request sequence number; wraps at 16 bits
    pub fn next_sequence(&self) -> u16 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of requests still waiting for a reply
    pub fn pending(&self) -> usize {
        self.requests.lock().len()
    }

    /// Register a request, transmit it and block until the reply or `timeout`.
    ///
    /// `transmit` receives the assigned sequence number and runs outside the
    /// list lock. The record is removed on every exit path.
    pub fn send_echo_request<F>(
        &self,
        id: u16,
        data: &[u8],
        timeout: Duration,
        transmit: F,
    ) -> Result<EchoReply>
    where
        F: FnOnce(u16) -> Result<()>,
    {
        // a timeout too large to represent never expires
        let deadline = Instant::now().checked_add(timeout);
        let sequence = self.next_sequence();
        let waiter = Arc::new(EchoWaiter::new(id, sequence, data));
        self.requests.lock().push(waiter.clone());

        if let Err(err) = transmit(sequence) {
            self.remove(&waiter);
            return Err(err);
        }

        let outcome = waiter.wait(deadline);
        self.remove(&waiter);

        match outcome {
            EchoState::Matched => Ok(EchoReply {
                sequence,
                matched: true,
            }),
            EchoState::MismatchedData => Ok(EchoReply {
                sequence,
                matched: false,
            }),
            EchoState::Pending => {
                log::info!("echo request id={} seq={} timed out", id, sequence);
                Err(NetError::EchoTimeout { sequence })
            }
        }
    }

    /// Match a received echo reply against the outstanding requests
    pub fn on_echo_reply(&self, id: u16, sequence: u16, data: &[u8]) -> Result<()> {
        let requests = self.requests.lock();
        let waiter = requests
            .iter()
            .find(|w| w.id == id && w.sequence == sequence)
            .ok_or(NetError::EchoNoMatch { id, sequence })?;
        if !waiter.post(data) {
            // duplicate reply for an already answered request
            return Err(NetError::EchoNoMatch { id, sequence });
        }
        log::info!("echo reply id={} seq={} len={}", id, sequence, data.len());
        Ok(())
    }

    fn remove(&self, waiter: &Arc<EchoWaiter>) {
        self.requests.lock().retain(|w| !Arc::ptr_eq(w, waiter));
    }
}
