//! Transaction scope (component G): tracks an active `MULTI` batch and its aggregated
//! `EXEC` output.
//!
//! A command dispatched while a scope is active gets two sinks, not one: a
//! [`QueuedAckSink`] that consumes the immediate `+QUEUED` reply on the ordinary pending
//! queue, and a [`QueuedChild`] that the scope holds onto and later resolves from the
//! corresponding slot of `EXEC`'s multi-bulk reply. This mirrors the two-phase
//! `completion_budget` the design calls for without needing an explicit counter: the
//! caller's typed `Completion` is single-assignment, so whichever path actually fires —
//! an ack-time error, a `DISCARD`, or the real `EXEC` slot — wins exactly once.

use std::sync::{Arc, Mutex};

use crate::completion::Completion;
use crate::decoder::ReplyTarget;
use crate::error::{Error, Result};
use crate::reply::{RawSink, Reply};

/// A command queued inside an active transaction, waiting for its `EXEC` slot.
pub trait QueuedChild: Send {
    fn resolve_from(self: Box<Self>, reply: Reply);
    fn reject(self: Box<Self>, err: Error);
}

struct TypedChild<T> {
    completion: Completion<T>,
    convert: Box<dyn FnOnce(Reply) -> Result<T> + Send>,
}

impl<T: Clone + Send + 'static> QueuedChild for TypedChild<T> {
    fn resolve_from(self: Box<Self>, reply: Reply) {
        if let Reply::Error(message) = reply {
            self.completion.reject(Error::ServerError(message));
            return;
        }
        match (self.convert)(reply) {
            Ok(value) => self.completion.resolve(value),
            Err(err) => self.completion.reject(err),
        }
    }

    fn reject(self: Box<Self>, err: Error) {
        self.completion.reject(err);
    }
}

/// Wraps a typed completion and its reply conversion into a [`QueuedChild`].
pub fn queued_child<T: Clone + Send + 'static>(
    completion: Completion<T>,
    convert: impl FnOnce(Reply) -> Result<T> + Send + 'static,
) -> Box<dyn QueuedChild> {
    Box::new(TypedChild {
        completion,
        convert: Box::new(convert),
    })
}

/// State for one active `MULTI`...`EXEC`/`DISCARD` batch, owned by the connection context.
#[derive(Default)]
pub struct TransactionScope {
    children: Mutex<Vec<Box<dyn QueuedChild>>>,
}

impl TransactionScope {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push_child(&self, child: Box<dyn QueuedChild>) {
        self.children.lock().unwrap_or_else(|e| e.into_inner()).push(child);
    }

    pub(crate) fn take_children(&self) -> Vec<Box<dyn QueuedChild>> {
        std::mem::take(&mut *self.children.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.children.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `DISCARD`: every still-queued child is rejected with [`Error::TransactionDiscarded`]
    /// and never appears in any `EXEC` reply, since discard happens before `EXEC` is ever
    /// dispatched.
    pub fn discard(&self) {
        for child in self.take_children() {
            child.reject(Error::TransactionDiscarded);
        }
    }
}

/// Consumes the `+QUEUED` acknowledgement for one in-transaction command. On success,
/// registers the real child with the scope so `EXEC` can resolve it later; on an
/// immediate server error (e.g. the command itself was malformed), rejects the caller's
/// completion directly and the child never enters the scope at all.
pub struct QueuedAckSink {
    raw: RawSink,
    child: Option<Box<dyn QueuedChild>>,
    scope: Arc<TransactionScope>,
}

impl QueuedAckSink {
    pub fn new(scope: Arc<TransactionScope>, child: Box<dyn QueuedChild>) -> Self {
        Self {
            raw: RawSink::new(),
            child: Some(child),
            scope,
        }
    }
}

impl ReplyTarget for QueuedAckSink {
    fn status(&mut self, bytes: &[u8]) {
        self.raw.status(bytes);
    }

    fn integer(&mut self, n: i64) {
        self.raw.integer(n);
    }

    fn bulk(&mut self, bytes: &[u8]) {
        self.raw.bulk(bytes);
    }

    fn multi(&mut self, n: i64) {
        self.raw.multi(n);
    }

    fn nested_error(&mut self, message: String) {
        self.raw.nested_error(message);
    }

    fn top_error(&mut self, message: String) {
        if let Some(child) = self.child.take() {
            child.reject(Error::ServerError(message));
        }
    }

    fn complete(&mut self) {
        let _ = std::mem::replace(&mut self.raw, RawSink::new());
        if let Some(child) = self.child.take() {
            self.scope.push_child(child);
        }
    }

    fn abort(&mut self, err: Error) {
        if let Some(child) = self.child.take() {
            child.reject(err);
        }
    }
}

/// `EXEC`'s own output sink: the server's multi-bulk reply is the real result set for
/// every successfully queued command, in order.
pub struct TransactionAggregateSink {
    raw: RawSink,
    children: Vec<Box<dyn QueuedChild>>,
    exec_completion: Completion<Vec<Reply>>,
}

impl TransactionAggregateSink {
    pub fn new(children: Vec<Box<dyn QueuedChild>>) -> (Self, Completion<Vec<Reply>>) {
        let exec_completion = Completion::new();
        (
            Self {
                raw: RawSink::new(),
                children,
                exec_completion: exec_completion.clone(),
            },
            exec_completion,
        )
    }

    fn fail_all(&mut self, err: Error) {
        for child in std::mem::take(&mut self.children) {
            child.reject(err.clone());
        }
        self.exec_completion.reject(err);
    }
}

impl ReplyTarget for TransactionAggregateSink {
    fn status(&mut self, bytes: &[u8]) {
        self.raw.status(bytes);
    }

    fn integer(&mut self, n: i64) {
        self.raw.integer(n);
    }

    fn bulk(&mut self, bytes: &[u8]) {
        self.raw.bulk(bytes);
    }

    fn multi(&mut self, n: i64) {
        self.raw.multi(n);
    }

    fn nested_error(&mut self, message: String) {
        self.raw.nested_error(message);
    }

    fn top_error(&mut self, message: String) {
        self.fail_all(Error::ServerError(message));
    }

    fn complete(&mut self) {
        let reply = std::mem::replace(&mut self.raw, RawSink::new()).into_reply();
        match reply {
            Reply::Nil => {
                self.fail_all(Error::ServerError(
                    "EXEC aborted: a watched key was modified".to_string(),
                ));
            }
            Reply::Array(items) => {
                if items.len() != self.children.len() {
                    self.fail_all(Error::from_debug(format!(
                        "EXEC reply had {} elements but {} commands were queued",
                        items.len(),
                        self.children.len()
                    )));
                    return;
                }
                let children = std::mem::take(&mut self.children);
                for (child, item) in children.into_iter().zip(items.iter().cloned()) {
                    child.resolve_from(item);
                }
                self.exec_completion.resolve(items);
            }
            other => {
                self.fail_all(Error::InvalidReply(format!(
                    "expected EXEC array reply, got {other:?}"
                )));
            }
        }
    }

    fn abort(&mut self, err: Error) {
        self.fail_all(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::Reply as R;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn queued_ack_registers_child_on_success() {
        let scope = TransactionScope::new();
        let completion = Completion::<String>::new();
        let child = queued_child(completion, Reply::into_status);
        let mut ack = QueuedAckSink::new(Arc::clone(&scope), child);
        ack.status(b"QUEUED");
        ack.complete();
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn queued_ack_rejects_completion_on_immediate_error_without_registering() {
        let scope = TransactionScope::new();
        let completion = Completion::<String>::new();
        let child = queued_child(completion.clone(), Reply::into_status);
        let mut ack = QueuedAckSink::new(Arc::clone(&scope), child);
        ack.top_error("ERR bad arity".to_string());
        assert_eq!(scope.len(), 0);
        assert!(matches!(
            completion.await_timeout(Duration::from_millis(10)).unwrap_err(),
            Error::ServerError(_)
        ));
    }

    #[test]
    fn exec_resolves_each_child_and_the_aggregate() {
        let set_completion = Completion::<String>::new();
        let incr_completion = Completion::<i64>::new();
        let children: Vec<Box<dyn QueuedChild>> = vec![
            queued_child(set_completion.clone(), Reply::into_status),
            queued_child(incr_completion.clone(), Reply::into_integer),
        ];
        let (mut aggregate, exec_completion) = TransactionAggregateSink::new(children);
        aggregate.multi(2);
        aggregate.status(b"OK");
        aggregate.integer(2);
        aggregate.complete();

        assert_eq!(set_completion.await_timeout(Duration::from_millis(10)).unwrap(), "OK");
        assert_eq!(incr_completion.await_timeout(Duration::from_millis(10)).unwrap(), 2);
        assert_eq!(
            exec_completion.await_timeout(Duration::from_millis(10)).unwrap(),
            vec![R::Status("OK".to_string()), R::Integer(2)]
        );
    }

    #[test]
    fn discard_rejects_queued_children_without_touching_exec() {
        let scope = TransactionScope::new();
        let completion = Completion::<String>::new();
        scope.push_child(queued_child(completion.clone(), Reply::into_status));
        scope.discard();
        assert!(matches!(
            completion.await_timeout(Duration::from_millis(10)).unwrap_err(),
            Error::TransactionDiscarded
        ));
        assert!(scope.is_empty());
    }

    #[test]
    fn watch_abort_rejects_every_child_with_nil_array() {
        let completion = Completion::<String>::new();
        let children: Vec<Box<dyn QueuedChild>> = vec![queued_child(completion.clone(), Reply::into_status)];
        let (mut aggregate, exec_completion) = TransactionAggregateSink::new(children);
        aggregate.multi(-1);
        aggregate.complete();
        assert!(completion.await_timeout(Duration::from_millis(10)).is_err());
        assert!(exec_completion.await_timeout(Duration::from_millis(10)).is_err());
    }
}
