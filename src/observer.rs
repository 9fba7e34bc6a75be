//! Trace points for watching a session's traffic.
//!
//! Sessions always emit `tracing` events; an observer is an additional, optional hook
//! for callers that want the raw bytes (protocol sniffers, test recorders). Any
//! `FnMut(&TraceEvent)` closure is an observer.

use std::fmt;

/// Something that happened on the serial line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceEvent<'a> {
    /// About to write `bytes`
    BeforeWrite {
        /// Bytes handed to the transport
        bytes: &'a [u8],
    },
    /// A write finished
    AfterWrite {
        /// Bytes accepted by the transport
        written: usize,
    },
    /// About to read a response
    BeforeRead,
    /// A response read finished
    AfterRead {
        /// Bytes read, including the delimiter when one was seen; partial if the read failed
        bytes: &'a [u8],
    },
    /// One DSR poll of the readiness wait
    Poll {
        /// 1-based poll count within the current wait
        attempt: u32,
        /// DSR state, or `None` if the status query failed
        ready: Option<bool>,
    },
}

impl fmt::Display for TraceEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::BeforeWrite { bytes } => {
                write!(f, "write {:?}", String::from_utf8_lossy(bytes))
            }
            TraceEvent::AfterWrite { written } => write!(f, "wrote {written}"),
            TraceEvent::BeforeRead => f.write_str("read"),
            TraceEvent::AfterRead { bytes } => {
                write!(f, "read {:?}", String::from_utf8_lossy(bytes))
            }
            TraceEvent::Poll { attempt, ready } => match ready {
                Some(ready) => write!(f, "poll {attempt} dsr={ready}"),
                None => write!(f, "poll {attempt} dsr=error"),
            },
        }
    }
}

/// Receives [`TraceEvent`]s from a session.
pub trait SessionObserver: Send {
    /// Called synchronously at each trace point.
    fn on_event(&mut self, event: &TraceEvent<'_>);
}

impl<F> SessionObserver for F
where
    F: FnMut(&TraceEvent<'_>) + Send,
{
    fn on_event(&mut self, event: &TraceEvent<'_>) {
        self(event)
    }
}
