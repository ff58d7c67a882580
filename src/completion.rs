//! The single-assignment result carrier used to deliver replies to callers.
//!
//! A `Completion<T>` starts pending and transitions at most once, to either resolved or
//! rejected. Callbacks registered before the transition fire in registration order once it
//! happens; callbacks registered after a transition fire immediately. `Completion` is the
//! crate's replacement for "promise/future" — it supports blocking `await`, listener-style
//! `then`/`fail`, and sequential composition via `then_pipe`, matching the three usage
//! patterns the source protocol relies on (see DESIGN.md).

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

enum State<T> {
    Pending,
    Resolved(T),
    Rejected(Error),
}

type DoneCallback<T> = Box<dyn FnOnce(T) + Send>;
type FailCallback = Box<dyn FnOnce(Error) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

struct Inner<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
    dones: Mutex<Vec<DoneCallback<T>>>,
    fails: Mutex<Vec<FailCallback>>,
    /// Invoked once, at most, if `await_timeout` elapses. Lets the dispatcher mark the
    /// owning request cancelled without `Completion` knowing anything about requests.
    cancel_hook: Mutex<Option<CancelHook>>,
}

/// A single-assignment carrier for a future value or error.
pub struct Completion<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Completion<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending),
                condvar: Condvar::new(),
                dones: Mutex::new(Vec::new()),
                fails: Mutex::new(Vec::new()),
                cancel_hook: Mutex::new(None),
            }),
        }
    }

    pub fn is_done(&self) -> bool {
        !matches!(
            *self.inner.state.lock().unwrap_or_else(|e| e.into_inner()),
            State::Pending
        )
    }

    /// Registers a hook fired at most once, only if a blocking `await_timeout` elapses.
    pub(crate) fn set_cancel_hook(&self, hook: impl FnOnce() + Send + 'static) {
        *self.inner.cancel_hook.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(hook));
    }

    /// Resolves the completion. A no-op if already resolved or rejected.
    pub(crate) fn resolve(&self, value: T) {
        {
            let mut guard = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if !matches!(*guard, State::Pending) {
                return;
            }
            *guard = State::Resolved(value.clone());
        }
        self.inner.condvar.notify_all();
        let dones = std::mem::take(&mut *self.inner.dones.lock().unwrap_or_else(|e| e.into_inner()));
        for cb in dones {
            let v = value.clone();
            fire(move || cb(v));
        }
    }

    /// Rejects the completion. A no-op if already resolved or rejected.
    pub(crate) fn reject(&self, err: Error) {
        {
            let mut guard = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if !matches!(*guard, State::Pending) {
                return;
            }
            *guard = State::Rejected(err.clone());
        }
        self.inner.condvar.notify_all();
        let fails = std::mem::take(&mut *self.inner.fails.lock().unwrap_or_else(|e| e.into_inner()));
        for cb in fails {
            let e = err.clone();
            fire(move || cb(e));
        }
    }

    /// Subscribes to the resolved value. Fires immediately, synchronously, if the
    /// completion is already resolved.
    pub fn then<F>(&self, done: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        let guard = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*guard {
            State::Pending => {
                drop(guard);
                self.inner.dones.lock().unwrap_or_else(|e| e.into_inner()).push(Box::new(done));
            }
            State::Resolved(v) => {
                let v = v.clone();
                drop(guard);
                fire(move || done(v));
            }
            State::Rejected(_) => {}
        }
    }

    /// Subscribes to the rejection. Fires immediately, synchronously, if already rejected.
    pub fn fail<F>(&self, fail: F)
    where
        F: FnOnce(Error) + Send + 'static,
    {
        let guard = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        match &*guard {
            State::Pending => {
                drop(guard);
                self.inner.fails.lock().unwrap_or_else(|e| e.into_inner()).push(Box::new(fail));
            }
            State::Rejected(e) => {
                let e = e.clone();
                drop(guard);
                fire(move || fail(e));
            }
            State::Resolved(_) => {}
        }
    }

    /// Convenience combining [`then`](Self::then) and [`fail`](Self::fail).
    pub fn then_or_fail<D, F>(&self, done: D, fail: F)
    where
        D: FnOnce(T) + Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        self.then(done);
        self.fail(fail);
    }

    /// Sequential composition: when this completion resolves, invokes `pipe` with the
    /// value and forwards the resulting completion's outcome. Rejection short-circuits.
    pub fn then_pipe<U, F>(&self, pipe: F) -> Completion<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Completion<U> + Send + 'static,
    {
        let out = Completion::<U>::new();
        let forward_resolve = out.clone();
        self.then(move |value| {
            let next = pipe(value);
            let a = forward_resolve.clone();
            next.then(move |v| a.resolve(v));
            let b = forward_resolve;
            next.fail(move |e| b.reject(e));
        });
        let forward_reject = out.clone();
        self.fail(move |e| forward_reject.reject(e));
        out
    }

    /// Blocks the calling thread until resolved, rejected, or `timeout` elapses. On
    /// elapse, runs the cancel hook (if any) and returns [`Error::Timeout`].
    pub fn await_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            match &*guard {
                State::Resolved(v) => return Ok(v.clone()),
                State::Rejected(e) => return Err(e.clone()),
                State::Pending => {}
            }
            let now = Instant::now();
            if now >= deadline {
                drop(guard);
                if let Some(hook) = self.inner.cancel_hook.lock().unwrap_or_else(|e| e.into_inner()).take() {
                    hook();
                }
                return Err(Error::Timeout);
            }
            let (next_guard, _) = self
                .inner
                .condvar
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            guard = next_guard;
        }
    }

    /// Waits for every completion in `completions` to finish (resolved or rejected),
    /// deducting elapsed time from a single shared `timeout` budget. Returns `Ok(false)`
    /// as soon as the budget is exhausted, `Ok(true)` once all have finished.
    ///
    /// Rust has no portable equivalent of cooperative thread interruption, so unlike the
    /// source protocol this never raises [`Error::CommandInterrupted`]; the variant is
    /// kept on [`Error`] for API parity and possible future use (see DESIGN.md).
    pub fn await_all(timeout: Duration, completions: &[Completion<T>]) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        for completion in completions {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            match completion.await_timeout(deadline - now) {
                Ok(_) => {}
                Err(Error::Timeout) => return Ok(false),
                Err(_other) => {}
            }
        }
        Ok(true)
    }
}

fn fire(cb: impl FnOnce() + std::panic::UnwindSafe) {
    if let Err(panic) = std::panic::catch_unwind(cb) {
        let msg = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::warn!(panic = %msg, "completion callback panicked; dropping it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn then_fires_once_on_resolve() {
        let completion: Completion<i64> = Completion::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        completion.then(move |v| seen2.lock().unwrap().push(v));
        completion.resolve(42);
        completion.resolve(99); // second transition is a no-op
        assert_eq!(*seen.lock().unwrap(), vec![42]);
    }

    #[test]
    fn then_fires_immediately_if_already_resolved() {
        let completion: Completion<i64> = Completion::new();
        completion.resolve(7);
        let got = Arc::new(AtomicBool::new(false));
        let got2 = Arc::clone(&got);
        completion.then(move |v| {
            assert_eq!(v, 7);
            got2.store(true, Ordering::SeqCst);
        });
        assert!(got.load(Ordering::SeqCst));
    }

    #[test]
    fn fail_does_not_fire_then() {
        let completion: Completion<i64> = Completion::new();
        let done_fired = Arc::new(AtomicBool::new(false));
        let fail_fired = Arc::new(AtomicBool::new(false));
        let d = Arc::clone(&done_fired);
        let f = Arc::clone(&fail_fired);
        completion.then(move |_| d.store(true, Ordering::SeqCst));
        completion.fail(move |_| f.store(true, Ordering::SeqCst));
        completion.reject(Error::ConnectionClosed);
        assert!(!done_fired.load(Ordering::SeqCst));
        assert!(fail_fired.load(Ordering::SeqCst));
    }

    #[test]
    fn await_timeout_resolves() {
        let completion: Completion<i64> = Completion::new();
        completion.resolve(5);
        assert_eq!(completion.await_timeout(Duration::from_millis(10)).unwrap(), 5);
    }

    #[test]
    fn await_timeout_elapses_and_runs_cancel_hook() {
        let completion: Completion<i64> = Completion::new();
        let cancelled = Arc::new(AtomicBool::new(false));
        let c2 = Arc::clone(&cancelled);
        completion.set_cancel_hook(move || c2.store(true, Ordering::SeqCst));
        let err = completion.await_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn then_pipe_forwards_resolution() {
        let first: Completion<i64> = Completion::new();
        let piped = first.then_pipe(|v| {
            let next = Completion::<String>::new();
            next.resolve(format!("value={v}"));
            next
        });
        first.resolve(3);
        assert_eq!(piped.await_timeout(Duration::from_millis(10)).unwrap(), "value=3");
    }

    #[test]
    fn await_all_collect_semantics_reports_done_even_with_rejections() {
        let a: Completion<i64> = Completion::new();
        let b: Completion<i64> = Completion::new();
        a.resolve(1);
        b.reject(Error::ConnectionClosed);
        let ok = Completion::await_all(Duration::from_millis(50), &[a, b]).unwrap();
        assert!(ok);
    }

    #[test]
    fn await_all_times_out() {
        let a: Completion<i64> = Completion::new();
        let ok = Completion::await_all(Duration::from_millis(5), &[a]).unwrap();
        assert!(!ok);
    }
}
