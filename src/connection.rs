//! The connection context: owns the pending queue, the transaction scope, remembered
//! session state, and the channel lifecycle (components E and F).
//!
//! Dispatch is synchronous with respect to the caller — it never blocks on the network,
//! because writing to the wire is handed off to a dedicated writer task via an unbounded
//! channel. It only ever blocks on the connection mutex, plus (when a bounded pending-queue
//! capacity is configured) a condvar wait for room to free up, matching §5's "bounded
//! `queue.put` may block". This keeps the FIFO invariant (push onto the pending queue and
//! hand the same bytes to the writer under one lock acquisition) while letting "any thread
//! may call a dispatch entry" hold without an async runtime requirement at the call site.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::instrument;

use crate::codec::{BytesCodec, CommandArgs, ValueCodec};
use crate::completion::Completion;
use crate::constant;
use crate::decoder::{ReplyDecoder, ReplyTarget};
use crate::error::{Error, Result};
use crate::opts::ConnectionOpts;
use crate::reply::Reply;
use crate::request::PendingRequest;
use crate::sink::StatusSink;
use crate::transaction::{QueuedAckSink, QueuedChild, TransactionAggregateSink, TransactionScope, queued_child};

struct ConnState {
    pending: VecDeque<Arc<PendingRequest>>,
    write_tx: Option<UnboundedSender<Vec<u8>>>,
    transaction: Option<Arc<TransactionScope>>,
    password: Option<String>,
    db: u64,
    closed: bool,
    /// Bumped on every successful `open_channel`, so a reader/writer task from a stale
    /// channel generation can tell it has been superseded and exit quietly.
    generation: u64,
}

struct Shared<C> {
    state: Mutex<ConnState>,
    /// Signalled every time a request leaves the pending queue, so a dispatcher blocked
    /// in `dispatch` on a full bounded queue (§5, "bounded `queue.put` may block") can
    /// recheck its capacity.
    queue_not_full: Condvar,
    queue_capacity: Option<usize>,
    codec: C,
    default_timeout: Duration,
    host: String,
    port: u16,
}

/// A multiplexed connection to a RESP-family server, generic over the injected
/// key/value codec. Defaults to [`BytesCodec`] (no translation).
pub struct Connection<C: ValueCodec = BytesCodec> {
    shared: Arc<Shared<C>>,
}

impl<C: ValueCodec> Clone for Connection<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Connection<BytesCodec> {
    pub async fn connect(opts: ConnectionOpts) -> Result<Self> {
        Self::connect_with_codec(opts, BytesCodec).await
    }
}

impl<C: ValueCodec + Send + Sync + 'static> Connection<C> {
    pub async fn connect_with_codec(opts: ConnectionOpts, codec: C) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(ConnState {
                pending: VecDeque::new(),
                write_tx: None,
                transaction: None,
                password: opts.password,
                db: opts.db,
                closed: false,
                generation: 0,
            }),
            queue_not_full: Condvar::new(),
            queue_capacity: opts.pending_queue_capacity,
            codec,
            default_timeout: opts.default_timeout,
            host: opts.host,
            port: opts.port,
        });
        let conn = Self { shared };
        conn.open_channel().await?;
        conn.spawn_supervisor();
        Ok(conn)
    }

    #[instrument(skip(self), fields(host = %self.shared.host, port = self.shared.port))]
    async fn open_channel(&self) -> Result<()> {
        let addr = format!("{}:{}", self.shared.host, self.shared.port);
        let stream = tokio::net::TcpStream::connect(&addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let generation = {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            state.generation += 1;
            state.generation
        };
        tokio::spawn(writer_task(write_half, rx));
        tokio::spawn(reader_task(Arc::clone(&self.shared), read_half, generation));
        self.channel_active(tx);
        Ok(())
    }

    /// Retries `open_channel` with a fixed backoff until it succeeds or the connection
    /// has been closed by the caller. Spawned once per `Connection` and left running.
    fn spawn_supervisor(&self) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let (closed, disconnected) = {
                    let state = shared.state.lock().unwrap_or_else(|e| e.into_inner());
                    (state.closed, state.write_tx.is_none())
                };
                if closed {
                    return;
                }
                if !disconnected {
                    continue;
                }
                let conn = Connection { shared: Arc::clone(&shared) };
                if conn.open_channel().await.is_err() {
                    tracing::warn!("reconnect attempt failed, retrying");
                }
            }
        });
    }

    /// `channel_active`: replays remembered session state, then every still-pending,
    /// non-cancelled request, onto the freshly opened channel (§4.F).
    fn channel_active(&self, tx: UnboundedSender<Vec<u8>>) {
        let mut outbound = Vec::new();
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            // Pull out whatever was already queued *before* synthesizing AUTH/SELECT, so
            // the synthetic requests below aren't re-collected and replayed a second time.
            let already_pending: Vec<_> = state.pending.drain(..).collect();

            if let Some(password) = state.password.clone() {
                let bytes = CommandArgs::new(constant::AUTH).arg_bytes(password.into_bytes()).encode();
                let (sink, _unused_completion) = StatusSink::new();
                state.pending.push_back(Arc::new(PendingRequest::new(bytes.clone(), Box::new(sink))));
                outbound.push(bytes);
            }
            if state.db != 0 {
                let bytes = CommandArgs::new(constant::SELECT).arg_i64(state.db as i64).encode();
                let (sink, _unused_completion) = StatusSink::new();
                state.pending.push_back(Arc::new(PendingRequest::new(bytes.clone(), Box::new(sink))));
                outbound.push(bytes);
            }
            for request in already_pending {
                if request.is_cancelled() {
                    continue;
                }
                outbound.push(request.bytes().to_vec());
                state.pending.push_back(request);
            }
            state.write_tx = Some(tx.clone());
        }
        for bytes in outbound {
            tracing::debug!(len = bytes.len(), "replaying request to new channel");
            let _ = tx.send(bytes);
        }
    }

    /// `channel_inactive`: drains the pending queue with a connection-closed error if the
    /// caller already closed the connection; otherwise leaves it intact for replay.
    fn channel_inactive(&self) {
        let drained = {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            state.write_tx = None;
            if state.closed {
                state.pending.drain(..).collect::<Vec<_>>()
            } else {
                Vec::new()
            }
        };
        for request in drained {
            let mut sink = request.sink.lock().unwrap_or_else(|e| e.into_inner());
            sink.abort(Error::ConnectionClosed);
        }
        self.shared.queue_not_full.notify_all();
    }

    /// Idempotently tears down the channel and fails every queued request.
    pub fn close(&self) {
        let was_closed = {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            let was_closed = state.closed;
            state.closed = true;
            state.write_tx = None;
            was_closed
        };
        self.shared.queue_not_full.notify_all();
        if was_closed {
            return;
        }
        self.channel_inactive();
    }

    /// The shared enqueue-and-write protocol of §4.E steps 2-4, used by every dispatch
    /// path (`dispatch`, `multi`, `exec`) so none of them can drift from the others on
    /// the closed-connection check or the bounded-queue backpressure wait.
    ///
    /// `build_sink` runs under the connection lock, after the closed check has already
    /// passed once but before the bounded-queue wait, so it can read `state.transaction`
    /// (or anything else in `ConnState`) atomically with the enqueue that follows. If the
    /// connection turns out to be closed (either immediately or after waiting on a full
    /// bounded queue), the built sink is aborted with `ConnectionClosed` instead of being
    /// silently dropped, so any completions it owns (including, for the transaction
    /// aggregate sink, every queued child) still resolve instead of hanging forever.
    /// `on_enqueue` runs once the request has actually been pushed onto the pending
    /// queue, still under the same lock — `multi()` uses it to install the new
    /// transaction scope atomically with its own `MULTI` request's enqueue.
    fn write_request<T: Clone + Send + 'static>(
        &self,
        args: CommandArgs,
        completion: Completion<T>,
        build_sink: impl FnOnce(&ConnState) -> Box<dyn ReplyTarget>,
        on_enqueue: impl FnOnce(&mut ConnState),
    ) -> Completion<T> {
        let bytes = args.encode();

        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut sink = build_sink(&state);
        if state.closed {
            sink.abort(Error::ConnectionClosed);
            return completion;
        }

        if let Some(capacity) = self.shared.queue_capacity {
            while state.pending.len() >= capacity && !state.closed {
                state = self
                    .shared
                    .queue_not_full
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
            }
            if state.closed {
                sink.abort(Error::ConnectionClosed);
                return completion;
            }
        }

        let request = Arc::new(PendingRequest::new(bytes.clone(), sink));
        let request_for_hook = Arc::clone(&request);
        completion.set_cancel_hook(move || request_for_hook.mark_cancelled());

        state.pending.push_back(request);
        on_enqueue(&mut state);
        if let Some(tx) = &state.write_tx {
            let _ = tx.send(bytes);
        }
        completion
    }

    /// The dispatch protocol of §4.E: attach to an active transaction if any, enqueue,
    /// and hand the encoded bytes to the writer task if connected.
    pub(crate) fn dispatch<T: Clone + Send + 'static>(
        &self,
        args: CommandArgs,
        convert: impl FnOnce(Reply) -> Result<T> + Send + 'static,
    ) -> Completion<T> {
        let completion = Completion::<T>::new();
        let out = completion.clone();
        self.write_request(
            args,
            completion,
            move |state| -> Box<dyn ReplyTarget> {
                if let Some(scope) = state.transaction.clone() {
                    let child = queued_child(out, convert);
                    Box::new(QueuedAckSink::new(scope, child))
                } else {
                    Box::new(crate::sink::GenericSink::with_completion(out, convert))
                }
            },
            |_state| {},
        )
    }

    /// Waits up to the connection's default timeout; convenience over `Completion::await_timeout`.
    pub fn await_default<T: Clone + Send + 'static>(&self, completion: &Completion<T>) -> Result<T> {
        completion.await_timeout(self.shared.default_timeout)
    }

    pub fn codec(&self) -> &C {
        &self.shared.codec
    }

    /// Issues `AUTH` synchronously; on success, remembers the password for replay.
    pub fn auth(&self, password: &str) -> Result<()> {
        let completion = self.dispatch(
            CommandArgs::new(constant::AUTH).arg_bytes(password.as_bytes().to_vec()),
            Reply::into_status,
        );
        let reply = self.await_default(&completion)?;
        if reply == "OK" {
            self.shared.state.lock().unwrap_or_else(|e| e.into_inner()).password = Some(password.to_string());
        }
        Ok(())
    }

    /// Issues `SELECT` synchronously; on success, remembers the database for replay.
    pub fn select(&self, db: u64) -> Result<()> {
        let completion = self.dispatch(CommandArgs::new(constant::SELECT).arg_i64(db as i64), Reply::into_status);
        let reply = self.await_default(&completion)?;
        if reply == "OK" {
            self.shared.state.lock().unwrap_or_else(|e| e.into_inner()).db = db;
        }
        Ok(())
    }

    /// `MULTI`: opens a transaction scope. Subsequent dispatches attach to it until
    /// `EXEC` or `DISCARD`.
    ///
    /// `MULTI`'s own request is dispatched as a plain status command rather than through
    /// the transaction-attach branch of `dispatch()` — the new scope is only installed
    /// (atomically, under the same lock as the enqueue, via `on_enqueue`) once `MULTI`
    /// itself is already on the wire. A real server never includes `MULTI` itself as an
    /// element of the later `EXEC` reply, so attaching it to its own scope as a queued
    /// child would make `EXEC`'s element count permanently one too many.
    pub fn multi(&self) -> Result<Completion<String>> {
        let scope = TransactionScope::new();
        let completion = Completion::<String>::new();
        let out = completion.clone();
        let result = self.write_request(
            CommandArgs::new(constant::MULTI),
            completion,
            move |_state| -> Box<dyn ReplyTarget> {
                Box::new(crate::sink::GenericSink::with_completion(out, Reply::into_status))
            },
            move |state| {
                state.transaction = Some(scope);
            },
        );
        Ok(result)
    }

    /// `EXEC`: closes the scope and dispatches a request whose sink is the transaction
    /// aggregate, through the same `write_request` protocol every other command uses —
    /// so a closed connection or a full bounded queue reject it (and, via
    /// `TransactionAggregateSink::abort`, every still-queued child) exactly like any
    /// other dispatch, instead of silently queuing a request nobody will ever write.
    pub fn exec(&self) -> Completion<Vec<Reply>> {
        let scope = self.shared.state.lock().unwrap_or_else(|e| e.into_inner()).transaction.take();
        let children: Vec<Box<dyn QueuedChild>> = match scope {
            Some(scope) => scope.take_children(),
            None => Vec::new(),
        };
        let (sink, completion) = TransactionAggregateSink::new(children);
        self.write_request(
            CommandArgs::new(constant::EXEC),
            completion,
            move |_state| Box::new(sink) as Box<dyn ReplyTarget>,
            |_state| {},
        )
    }

    /// `DISCARD`: cancels the scope's queued children, then dispatches a plain `DISCARD`.
    /// Silently a no-op (besides the wire round trip) if no `MULTI` was active, matching
    /// the source's behavior.
    pub fn discard(&self) -> Completion<String> {
        let scope = self.shared.state.lock().unwrap_or_else(|e| e.into_inner()).transaction.take();
        if let Some(scope) = scope {
            scope.discard();
        }
        self.dispatch(CommandArgs::new(constant::DISCARD), Reply::into_status)
    }
}

async fn writer_task(mut write_half: OwnedWriteHalf, mut rx: UnboundedReceiver<Vec<u8>>) {
    use tokio::io::AsyncWriteExt;
    while let Some(bytes) = rx.recv().await {
        if write_half.write_all(&bytes).await.is_err() {
            return;
        }
        if write_half.flush().await.is_err() {
            return;
        }
    }
}

#[instrument(skip(shared, read_half))]
async fn reader_task<C: ValueCodec + Send + Sync + 'static>(
    shared: Arc<Shared<C>>,
    mut read_half: OwnedReadHalf,
    generation: u64,
) {
    let mut decoder = ReplyDecoder::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        decoder.feed(&buf[..n]);
        let mut state = shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.generation != generation {
            return;
        }
        if let Err(err) = decoder.drive(&mut state.pending) {
            tracing::warn!(error = %err, "reply decode error, dropping channel");
            break;
        }
        drop(state);
        shared.queue_not_full.notify_all();
    }
    let conn = Connection { shared };
    {
        let state = conn.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.generation != generation {
            return;
        }
    }
    conn.channel_inactive();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ValueSink;

    fn test_shared(password: Option<&str>, db: u64) -> Arc<Shared<BytesCodec>> {
        Arc::new(Shared {
            state: Mutex::new(ConnState {
                pending: VecDeque::new(),
                write_tx: None,
                transaction: None,
                password: password.map(ToString::to_string),
                db,
                closed: false,
                generation: 0,
            }),
            queue_not_full: Condvar::new(),
            queue_capacity: None,
            codec: BytesCodec,
            default_timeout: Duration::from_secs(5),
            host: "127.0.0.1".to_string(),
            port: 6379,
        })
    }

    /// Scenario 6 (spec.md §8): with one pending `GET k` unsent, a remembered password and
    /// db, `channel_active` must write `AUTH`, then `SELECT`, then `GET k` — each exactly
    /// once — and leave the pending queue holding exactly those three requests in that order.
    #[test]
    fn reconnect_replay_writes_auth_select_then_pending_exactly_once() {
        let shared = test_shared(Some("hunter2"), 3);
        let (value_sink, _completion) = ValueSink::new();
        {
            let mut state = shared.state.lock().unwrap();
            state
                .pending
                .push_back(Arc::new(PendingRequest::new(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n".to_vec(), Box::new(value_sink))));
        }
        let conn = Connection { shared: Arc::clone(&shared) };
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        conn.channel_active(tx);
        drop(conn);

        let mut written = Vec::new();
        while let Ok(bytes) = rx.try_recv() {
            written.push(bytes);
        }
        assert_eq!(written.len(), 3, "AUTH, SELECT, and GET must each be written exactly once");
        assert_eq!(written[0], CommandArgs::new(constant::AUTH).arg_bytes(b"hunter2".to_vec()).encode());
        assert_eq!(written[1], CommandArgs::new(constant::SELECT).arg_i64(3).encode());
        assert_eq!(written[2], b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n".to_vec());

        let state = shared.state.lock().unwrap();
        assert_eq!(state.pending.len(), 3, "pending queue must hold exactly one entry per replayed write");
    }

    #[test]
    fn reconnect_replay_drops_cancelled_requests_from_wire_and_queue() {
        let shared = test_shared(None, 0);
        let (value_sink, _completion) = ValueSink::new();
        let cancelled = Arc::new(PendingRequest::new(b"*1\r\n$4\r\nPING\r\n".to_vec(), Box::new(value_sink)));
        cancelled.mark_cancelled();
        {
            let mut state = shared.state.lock().unwrap();
            state.pending.push_back(Arc::clone(&cancelled));
        }
        let conn = Connection { shared: Arc::clone(&shared) };
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        conn.channel_active(tx);
        drop(conn);

        assert!(rx.try_recv().is_err(), "a cancelled request must not be rewritten to the wire");
        // Not written to the new channel means no reply will ever arrive for it on this
        // channel either, so it is dropped from the queue rather than left to block the
        // head of the line forever.
        let state = shared.state.lock().unwrap();
        assert_eq!(state.pending.len(), 0);
    }

    /// Scenario 5 (spec.md §8), dispatched through the public `Connection` API rather
    /// than by constructing the transaction sinks directly: `MULTI`'s own request must
    /// not become a queued child of the scope it just opened, or `EXEC`'s two-element
    /// reply would permanently mismatch a three-child scope and reject everything.
    #[test]
    fn multi_exec_round_trip_excludes_multi_itself_from_the_scope() {
        let shared = test_shared(None, 0);
        let conn = Connection { shared: Arc::clone(&shared) };

        let multi_completion = conn.multi().unwrap();
        let set_completion = conn.set(&b"x".to_vec(), &b"1".to_vec());
        let incr_completion = conn.incr(&b"x".to_vec());
        let exec_completion = conn.exec();

        {
            let state = shared.state.lock().unwrap();
            assert_eq!(
                state.pending.len(),
                4,
                "MULTI, SET's ack, INCR's ack, and EXEC itself — one pending entry each"
            );
        }

        let mut decoder = ReplyDecoder::new();
        decoder.feed(b"+OK\r\n+QUEUED\r\n+QUEUED\r\n*2\r\n+OK\r\n:2\r\n");
        {
            let mut state = shared.state.lock().unwrap();
            decoder.drive(&mut state.pending).unwrap();
        }

        assert_eq!(multi_completion.await_timeout(Duration::from_millis(10)).unwrap(), "OK");
        assert_eq!(set_completion.await_timeout(Duration::from_millis(10)).unwrap(), "OK");
        assert_eq!(incr_completion.await_timeout(Duration::from_millis(10)).unwrap(), 2);
        assert_eq!(
            exec_completion.await_timeout(Duration::from_millis(10)).unwrap(),
            vec![Reply::Status("OK".to_string()), Reply::Integer(2)]
        );
    }

    /// `exec()` must go through the same closed-connection check every other dispatch
    /// does, rather than hanging forever because nothing is left to write or decode it.
    #[test]
    fn exec_after_close_rejects_instead_of_hanging() {
        let shared = test_shared(None, 0);
        let conn = Connection { shared: Arc::clone(&shared) };

        let multi_completion = conn.multi().unwrap();
        conn.close();
        assert!(matches!(
            multi_completion.await_timeout(Duration::from_millis(10)).unwrap_err(),
            Error::ConnectionClosed
        ));

        let exec_completion = conn.exec();
        assert!(matches!(
            exec_completion.await_timeout(Duration::from_millis(10)).unwrap_err(),
            Error::ConnectionClosed
        ));
    }
}
