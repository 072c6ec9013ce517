//! Bounded in-process byte conduit between the transform and delivery threads
//!
//! [`transfer_coupler`] returns a write half and a read half sharing one
//! bounded FIFO buffer. A write blocks while the buffer is full; a read blocks
//! while it is empty. Closing the write half ends the stream once buffered
//! bytes are drained, aborting it makes the reader fail instead, and dropping
//! the read half makes every later write fail. A raised [`CancelToken`]
//! unblocks both halves within [`CANCEL_POLL_INTERVAL`].

use cfgsnap_format::{CancelToken, StreamFault};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Upper bound on how long a blocked half waits before re-checking cancellation
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
enum WriterState {
    Open,
    Closed,
    Aborted(String),
}

#[derive(Debug)]
struct State {
    buf: VecDeque<u8>,
    writer: WriterState,
    reader_open: bool,
    high_water: usize,
    total_written: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
    cancel: CancelToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Every critical section leaves State consistent, so a poisoned lock
        // is still safe to use.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn close_writer(&self, outcome: WriterState) {
        let mut state = self.lock();
        if matches!(state.writer, WriterState::Open) {
            state.writer = outcome;
        }
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

/// Create a coupler holding at most `capacity` bytes in flight.
pub fn transfer_coupler(capacity: usize, cancel: CancelToken) -> (CouplerWriter, CouplerReader) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buf: VecDeque::with_capacity(capacity),
            writer: WriterState::Open,
            reader_open: true,
            high_water: 0,
            total_written: 0,
        }),
        readable: Condvar::new(),
        writable: Condvar::new(),
        capacity,
        cancel,
    });

    (
        CouplerWriter {
            shared: Arc::clone(&shared),
            finished: false,
        },
        CouplerReader { shared },
    )
}

/// Snapshot of coupler counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CouplerStats {
    /// Largest number of bytes buffered at once
    pub high_water: usize,
    /// Total bytes accepted from the writer
    pub total_written: u64,
    /// Configured capacity
    pub capacity: usize,
}

/// Handle that can observe or abort a coupler from outside its halves
#[derive(Debug, Clone)]
pub struct CouplerHandle {
    shared: Arc<Shared>,
}

impl CouplerHandle {
    /// Abort the write side: readers observe `reason` instead of end-of-stream.
    /// Has no effect once the writer has already closed.
    pub fn abort(&self, reason: impl Into<String>) {
        self.shared.close_writer(WriterState::Aborted(reason.into()));
    }

    /// Current counters
    pub fn stats(&self) -> CouplerStats {
        let state = self.shared.lock();
        CouplerStats {
            high_water: state.high_water,
            total_written: state.total_written,
            capacity: self.shared.capacity,
        }
    }
}

/// Write half of a transfer coupler
#[derive(Debug)]
pub struct CouplerWriter {
    shared: Arc<Shared>,
    finished: bool,
}

impl CouplerWriter {
    /// Handle for aborting or inspecting this coupler
    pub fn handle(&self) -> CouplerHandle {
        CouplerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Close cleanly: the reader sees end-of-stream after draining
    pub fn close(mut self) {
        self.finished = true;
        self.shared.close_writer(WriterState::Closed);
        debug!("coupler writer closed");
    }

    /// Close with an error the reader will observe
    pub fn close_with_error(mut self, reason: impl Into<String>) {
        self.finished = true;
        self.shared.close_writer(WriterState::Aborted(reason.into()));
    }
}

impl Write for CouplerWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let shared = &*self.shared;
        let mut state = shared.lock();
        loop {
            if !matches!(state.writer, WriterState::Open) {
                return Err(StreamFault::Closed.into_io(io::ErrorKind::BrokenPipe));
            }
            if !state.reader_open {
                return Err(StreamFault::Closed.into_io(io::ErrorKind::BrokenPipe));
            }
            if shared.cancel.is_cancelled() {
                return Err(StreamFault::Cancelled.into_io(io::ErrorKind::Other));
            }

            let room = shared.capacity - state.buf.len();
            if room > 0 {
                let n = room.min(data.len());
                state.buf.extend(&data[..n]);
                state.high_water = state.high_water.max(state.buf.len());
                state.total_written += n as u64;
                drop(state);
                shared.readable.notify_one();
                return Ok(n);
            }

            state = shared
                .writable
                .wait_timeout(state, CANCEL_POLL_INTERVAL)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for CouplerWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.shared.close_writer(WriterState::Aborted(
                "writer dropped before the stream was closed".to_string(),
            ));
        }
    }
}

/// Read half of a transfer coupler
#[derive(Debug)]
pub struct CouplerReader {
    shared: Arc<Shared>,
}

impl CouplerReader {
    /// Handle for aborting or inspecting this coupler
    pub fn handle(&self) -> CouplerHandle {
        CouplerHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Read for CouplerReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        let shared = &*self.shared;
        let mut state = shared.lock();
        loop {
            if let WriterState::Aborted(reason) = &state.writer {
                return Err(StreamFault::Aborted(reason.clone()).into_io(io::ErrorKind::Other));
            }
            if shared.cancel.is_cancelled() {
                return Err(StreamFault::Cancelled.into_io(io::ErrorKind::Other));
            }

            if !state.buf.is_empty() {
                let n = out.len().min(state.buf.len());
                for (slot, byte) in out.iter_mut().zip(state.buf.drain(..n)) {
                    *slot = byte;
                }
                drop(state);
                shared.writable.notify_one();
                return Ok(n);
            }

            if matches!(state.writer, WriterState::Closed) {
                return Ok(0);
            }

            state = shared
                .readable
                .wait_timeout(state, CANCEL_POLL_INTERVAL)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }
}

impl Drop for CouplerReader {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.reader_open = false;
        state.buf.clear();
        drop(state);
        self.shared.writable.notify_all();
    }
}
