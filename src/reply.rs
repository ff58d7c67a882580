//! The universal decode target: a tree mirroring the wire protocol's own shape.
//!
//! Every typed output sink is a thin adapter over a [`RawSink`] that builds one of these
//! trees and converts it at `complete()` time. This keeps the recursive, resumable parse
//! in the decoder single-shaped regardless of which typed sink a request ultimately wants.

use crate::error::{Error, Result};

/// A decoded reply, structurally unconverted. Corresponds to the "nested-multi" output
/// sink variant in the component design.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Integer(i64),
    /// A `+` simple status line, e.g. `OK`, `QUEUED`.
    Status(String),
    /// A `$` bulk string's bytes.
    Bulk(Vec<u8>),
    /// A `*` multi-bulk's elements, in wire order.
    Array(Vec<Reply>),
    /// A `-` error line, recorded as a tree node rather than rejecting outright. Only
    /// used when the error is nested inside an array; a top-level error rejects the
    /// owning completion directly (see `decoder.rs`).
    Error(String),
}

impl Reply {
    pub fn as_bulk(&self) -> Option<&[u8]> {
        match self {
            Reply::Bulk(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_bulk(self) -> Result<Vec<u8>> {
        match self {
            Reply::Bulk(b) => Ok(b),
            other => Err(Error::InvalidReply(format!("expected bulk string, got {other:?}"))),
        }
    }

    pub fn into_status(self) -> Result<String> {
        match self {
            Reply::Status(s) => Ok(s),
            Reply::Bulk(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
            other => Err(Error::InvalidReply(format!("expected status, got {other:?}"))),
        }
    }

    pub fn into_integer(self) -> Result<i64> {
        match self {
            Reply::Integer(n) => Ok(n),
            other => Err(Error::InvalidReply(format!("expected integer, got {other:?}"))),
        }
    }

    pub fn into_array(self) -> Result<Vec<Reply>> {
        match self {
            Reply::Array(items) => Ok(items),
            Reply::Nil => Ok(Vec::new()),
            other => Err(Error::InvalidReply(format!("expected array, got {other:?}"))),
        }
    }
}

/// A single stack frame while building a nested array.
struct Frame {
    remaining: i64,
    items: Vec<Reply>,
}

/// Builds a [`Reply`] tree by accumulating the flat sequence of decoder callbacks
/// (`bulk`/`integer`/`multi`/`nested_error`) into nested arrays.
///
/// Mirrors the "stack of frames, push on `multi`, pop on exhaustion" discipline the
/// component design calls for.
#[derive(Default)]
pub struct RawSink {
    stack: Vec<Frame>,
    root: Option<Reply>,
}

impl RawSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_value(&mut self, value: Reply) {
        if let Some(frame) = self.stack.last_mut() {
            frame.items.push(value);
            frame.remaining -= 1;
            self.pop_exhausted_frames();
        } else {
            self.root = Some(value);
        }
    }

    fn pop_exhausted_frames(&mut self) {
        while matches!(self.stack.last(), Some(f) if f.remaining <= 0) {
            let frame = self.stack.pop().expect("checked non-empty above");
            self.push_value(Reply::Array(frame.items));
        }
    }

    pub fn bulk(&mut self, bytes: &[u8]) {
        self.push_value(Reply::Bulk(bytes.to_vec()));
    }

    pub fn integer(&mut self, n: i64) {
        self.push_value(Reply::Integer(n));
    }

    pub fn status(&mut self, bytes: &[u8]) {
        self.push_value(Reply::Status(String::from_utf8_lossy(bytes).into_owned()));
    }

    pub fn nested_error(&mut self, message: String) {
        self.push_value(Reply::Error(message));
    }

    /// `n = -1` means a nil bulk or nil array; `n = 0` is an empty array that resolves
    /// immediately without further calls.
    pub fn multi(&mut self, n: i64) {
        if n < 0 {
            self.push_value(Reply::Nil);
            return;
        }
        if n == 0 {
            self.push_value(Reply::Array(Vec::new()));
            return;
        }
        self.stack.push(Frame {
            remaining: n,
            items: Vec::with_capacity(n as usize),
        });
    }

    /// Consumes the sink, returning the fully built tree. `Reply::Nil` if nothing was
    /// ever fed to it (the top-level reply was a nil bulk/array consumed via `multi(-1)`
    /// before any scalar call).
    pub fn into_reply(self) -> Reply {
        self.root.unwrap_or(Reply::Nil)
    }
}
