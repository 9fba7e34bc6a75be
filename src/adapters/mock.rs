//! Scripted in-memory transport.
//!
//! Clones share state, so a test can hand one clone to a session (as the opener) and
//! keep another to queue responses and inspect what was written.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{PortSettings, SerialTransport, TransportOpener};

#[derive(Debug, Default)]
struct MockState {
    opened_with: Option<PortSettings>,
    open_error: Option<io::ErrorKind>,
    writes: Vec<Vec<u8>>,
    write_error: Option<io::ErrorKind>,
    input: VecDeque<u8>,
    read_timeouts: usize,
    reads: usize,
    dsr_script: VecDeque<io::Result<bool>>,
    dsr_default: bool,
    dsr_polls: usize,
    resets: usize,
    closed: bool,
}

/// Mock serial port
#[derive(Clone, Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A ready port (DSR asserted) with nothing to read.
    pub fn new() -> Self {
        let state = MockState {
            dsr_default: true,
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// An opener whose `open` fails with `kind`.
    pub fn failing_open(kind: io::ErrorKind) -> Self {
        let mock = Self::new();
        mock.lock().open_error = Some(kind);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue bytes for the session to read.
    pub fn push_input(&self, bytes: &[u8]) {
        self.lock().input.extend(bytes.iter().copied());
    }

    /// Make the next `count` reads fail with `ErrorKind::TimedOut`.
    pub fn push_read_timeouts(&self, count: usize) {
        self.lock().read_timeouts += count;
    }

    /// Make every write fail with `kind` until cleared with `None`.
    pub fn set_write_error(&self, kind: Option<io::ErrorKind>) {
        self.lock().write_error = kind;
    }

    /// DSR reading returned once the script is exhausted.
    pub fn set_dsr(&self, ready: bool) {
        self.lock().dsr_default = ready;
    }

    /// Queue DSR readings returned before the default.
    pub fn script_dsr(&self, readings: impl IntoIterator<Item = io::Result<bool>>) {
        self.lock().dsr_script.extend(readings);
    }

    /// Settings passed to the last successful `open`.
    pub fn opened_with(&self) -> Option<PortSettings> {
        self.lock().opened_with.clone()
    }

    /// Every write call, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Number of read calls, including timed out ones.
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    /// Bytes still waiting to be read.
    pub fn pending_input(&self) -> Vec<u8> {
        self.lock().input.iter().copied().collect()
    }

    /// Number of DSR polls.
    pub fn dsr_polls(&self) -> usize {
        self.lock().dsr_polls
    }

    /// Number of buffer resets.
    pub fn resets(&self) -> usize {
        self.lock().resets
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl TransportOpener for MockTransport {
    type Transport = MockTransport;

    fn open(&self, settings: &PortSettings) -> io::Result<Self::Transport> {
        let mut state = self.lock();
        if let Some(kind) = state.open_error {
            return Err(io::Error::new(kind, format!("cannot open {}", settings.path)));
        }
        state.opened_with = Some(settings.clone());
        state.closed = false;
        Ok(self.clone())
    }
}

impl SerialTransport for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if let Some(kind) = state.write_error {
            return Err(io::Error::new(kind, "mock write failure"));
        }
        state.writes.push(buf.to_vec());
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        state.reads += 1;
        if state.read_timeouts > 0 {
            state.read_timeouts -= 1;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "mock read timeout"));
        }
        let count = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn data_set_ready(&mut self) -> io::Result<bool> {
        let mut state = self.lock();
        state.dsr_polls += 1;
        let default = state.dsr_default;
        state.dsr_script.pop_front().unwrap_or(Ok(default))
    }

    fn reset_buffers(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        state.resets += 1;
        state.input.clear();
        Ok(())
    }

    fn close(self) -> io::Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_drain_queued_input() {
        let mut mock = MockTransport::new();
        mock.push_input(b"abc");
        let mut buf = [0u8; 2];
        assert_eq!(mock.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(mock.pending_input(), b"c");
    }

    #[test]
    fn test_dsr_script_then_default() {
        let mut mock = MockTransport::new();
        mock.script_dsr([Ok(false)]);
        assert!(!mock.data_set_ready().unwrap());
        assert!(mock.data_set_ready().unwrap());
        assert_eq!(mock.dsr_polls(), 2);
    }
}
