//! The in-flight request record and its FIFO home (component E).
//!
//! Every request written to the wire gets exactly one [`PendingRequest`] pushed onto the
//! connection's pending queue, in write order. The decoder drains replies against the
//! queue's front in the same order, which is what gives the multiplexer its strict
//! request/reply binding without any wire-level correlation id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::decoder::ReplyTarget;

/// One write's worth of command bytes plus the sink that will receive its reply.
pub struct PendingRequest {
    pub(crate) sink: Mutex<Box<dyn ReplyTarget>>,
    /// The fully encoded request, kept so the reconnection supervisor can rewrite it to
    /// a fresh channel without re-deriving it from the caller's original arguments.
    bytes: Vec<u8>,
    /// Set once the caller's `await_timeout` has elapsed. The request stays in the queue
    /// (its reply must still be decoded to keep the stream position correct) but is
    /// skipped by the replay-on-reconnect path, since nobody is listening anymore.
    cancelled: AtomicBool,
}

impl PendingRequest {
    pub fn new(bytes: Vec<u8>, sink: Box<dyn ReplyTarget>) -> Self {
        Self {
            sink: Mutex::new(sink),
            bytes,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[cfg(test)]
    pub fn for_test(sink: Box<dyn ReplyTarget>) -> Self {
        Self::new(Vec::new(), sink)
    }

    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
