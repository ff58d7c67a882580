//! The resumable reply decoder (component C).
//!
//! Feeds bytes from the transport into a private buffer, then drives as many complete
//! top-level replies as possible against the head of the pending queue. Resumability is
//! achieved by a cheap length-counting dry run (`scan_length`) that never touches the
//! output sink; only once a full frame is confirmed present does a second pass
//! (`emit_into`) replay the same structure against the sink and the buffer get split.
//! This satisfies the "commit cursor advance only on frame completion" design note
//! without needing an explicit saved-position state machine.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{Buf, BytesMut};

use crate::error::{Error, Result};
use crate::request::PendingRequest;

/// Object-safe decode target implemented by every output sink (component B).
pub trait ReplyTarget: Send {
    fn status(&mut self, bytes: &[u8]);
    fn integer(&mut self, n: i64);
    fn bulk(&mut self, bytes: &[u8]);
    fn multi(&mut self, n: i64);
    /// An error nested inside an array (e.g. one element of an `EXEC` reply).
    fn nested_error(&mut self, message: String);
    /// The entire reply for this request was a top-level `-` error line.
    fn top_error(&mut self, message: String);
    /// The outermost frame for this request finished decoding successfully.
    fn complete(&mut self);
    /// The request will never get a reply (connection closed, drained on disconnect).
    fn abort(&mut self, err: Error);
}

fn read_line(buf: &[u8]) -> Result<Option<(&[u8], usize)>> {
    match memchr::memchr(b'\n', buf) {
        None => Ok(None),
        Some(idx) => {
            if idx == 0 || buf[idx - 1] != b'\r' {
                return Err(Error::InvalidReply("line missing CRLF terminator".to_string()));
            }
            Ok(Some((&buf[..idx - 1], idx + 1)))
        }
    }
}

fn read_line_raw(buf: &[u8]) -> (&[u8], usize) {
    let idx = memchr::memchr(b'\n', buf).expect("scan_length already validated this line");
    (&buf[..idx - 1], idx + 1)
}

fn parse_i64(line: &[u8]) -> Result<i64> {
    let s = simdutf8::basic::from_utf8(line)
        .map_err(|_| Error::InvalidReply("integer line is not valid utf-8".to_string()))?;
    s.parse::<i64>()
        .map_err(|_| Error::InvalidReply(format!("invalid integer literal {s:?}")))
}

fn decode_ascii(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

/// Pure, side-effect-free pass: returns the total byte length of one complete reply
/// frame starting at `buf[0]`, or `Ok(None)` if `buf` doesn't yet contain a full frame.
fn scan_length(buf: &[u8]) -> Result<Option<usize>> {
    if buf.is_empty() {
        return Ok(None);
    }
    match buf[0] {
        b'+' | b'-' => match read_line(&buf[1..])? {
            Some((_, used)) => Ok(Some(1 + used)),
            None => Ok(None),
        },
        b':' => match read_line(&buf[1..])? {
            Some((line, used)) => {
                parse_i64(line)?;
                Ok(Some(1 + used))
            }
            None => Ok(None),
        },
        b'$' => match read_line(&buf[1..])? {
            Some((line, used)) => {
                let len = parse_i64(line)?;
                let header = 1 + used;
                if len < 0 {
                    return Ok(Some(header));
                }
                let total = header + len as usize + 2;
                if buf.len() < total {
                    Ok(None)
                } else {
                    Ok(Some(total))
                }
            }
            None => Ok(None),
        },
        b'*' => match read_line(&buf[1..])? {
            Some((line, used)) => {
                let n = parse_i64(line)?;
                let header = 1 + used;
                if n <= 0 {
                    return Ok(Some(header));
                }
                let mut consumed = header;
                for _ in 0..n {
                    match scan_length(&buf[consumed..])? {
                        Some(u) => consumed += u,
                        None => return Ok(None),
                    }
                }
                Ok(Some(consumed))
            }
            None => Ok(None),
        },
        other => Err(Error::InvalidReply(format!(
            "unexpected reply type byte {:?}",
            other as char
        ))),
    }
}

/// Replays the structure `scan_length` just confirmed complete, feeding `target`.
/// Returns the bytes consumed, which always equals the prior `scan_length` result.
fn emit_into(buf: &[u8], target: &mut dyn ReplyTarget) -> usize {
    match buf[0] {
        b'+' => {
            let (line, used) = read_line_raw(&buf[1..]);
            target.status(line);
            1 + used
        }
        b'-' => {
            let (line, used) = read_line_raw(&buf[1..]);
            target.nested_error(decode_ascii(line));
            1 + used
        }
        b':' => {
            let (line, used) = read_line_raw(&buf[1..]);
            target.integer(parse_i64(line).expect("scan_length already validated this integer"));
            1 + used
        }
        b'$' => {
            let (line, used) = read_line_raw(&buf[1..]);
            let len = parse_i64(line).expect("scan_length already validated this length");
            let header = 1 + used;
            if len < 0 {
                target.multi(-1);
                return header;
            }
            let len = len as usize;
            target.bulk(&buf[header..header + len]);
            header + len + 2
        }
        b'*' => {
            let (line, used) = read_line_raw(&buf[1..]);
            let n = parse_i64(line).expect("scan_length already validated this count");
            let header = 1 + used;
            target.multi(n);
            if n <= 0 {
                return header;
            }
            let mut consumed = header;
            for _ in 0..n {
                consumed += emit_into(&buf[consumed..], target);
            }
            consumed
        }
        _ => unreachable!("scan_length would have rejected this byte already"),
    }
}

/// Resumable byte-stream-driven reply decoder. One instance per *channel generation*,
/// not per connection lifetime: `reader_task` (`connection.rs`) constructs a fresh
/// `ReplyDecoder` for each newly opened channel, so any bytes buffered across a
/// disconnect — which belong to a reply that will never arrive, since the supervisor
/// rebuilds the pending queue from scratch on reconnect — are simply dropped along with
/// the old decoder instance rather than explicitly cleared.
#[derive(Default)]
pub struct ReplyDecoder {
    buf: BytesMut,
}

impl ReplyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decodes and dispatches as many complete replies as the buffer currently allows,
    /// popping each fully-decoded request off `pending` in order.
    pub fn drive(&mut self, pending: &mut VecDeque<Arc<PendingRequest>>) -> Result<()> {
        loop {
            let Some(request) = pending.front() else {
                break;
            };
            let consumed = match scan_length(&self.buf)? {
                Some(c) => c,
                None => break,
            };
            let frame = self.buf.split_to(consumed);
            {
                let mut sink = request.sink.lock().unwrap_or_else(|e| e.into_inner());
                if frame[0] == b'-' {
                    let (line, _) = read_line_raw(&frame[1..]);
                    sink.top_error(decode_ascii(line));
                } else {
                    emit_into(&frame, &mut **sink);
                    sink.complete();
                }
            }
            pending.pop_front();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{IntegerSink, ListValuesSink, MapSink, StatusSink, ValueSink};

    fn make_pending<T: ReplyTarget + 'static>(sink: T) -> Arc<PendingRequest> {
        Arc::new(PendingRequest::for_test(Box::new(sink)))
    }

    #[test]
    fn decodes_status_then_bulk_in_one_shot() {
        let (status_sink, status_completion) = StatusSink::new();
        let (value_sink, value_completion) = ValueSink::new();
        let mut pending = VecDeque::new();
        pending.push_back(make_pending(status_sink));
        pending.push_back(make_pending(value_sink));

        let mut decoder = ReplyDecoder::new();
        decoder.feed(b"+OK\r\n$3\r\nbar\r\n");
        decoder.drive(&mut pending).unwrap();

        assert!(pending.is_empty());
        assert_eq!(status_completion.await_timeout(std::time::Duration::from_millis(10)).unwrap(), "OK");
        assert_eq!(
            value_completion.await_timeout(std::time::Duration::from_millis(10)).unwrap(),
            b"bar".to_vec()
        );
    }

    #[test]
    fn resumable_across_arbitrary_split_points() {
        let whole = b"+OK\r\n$3\r\nbar\r\n:42\r\n".to_vec();
        for split in 0..whole.len() {
            let (a, a_done) = StatusSink::new();
            let (b, b_done) = ValueSink::new();
            let (c, c_done) = IntegerSink::new();
            let mut pending = VecDeque::new();
            pending.push_back(make_pending(a));
            pending.push_back(make_pending(b));
            pending.push_back(make_pending(c));

            let mut decoder = ReplyDecoder::new();
            decoder.feed(&whole[..split]);
            decoder.drive(&mut pending).unwrap();
            decoder.feed(&whole[split..]);
            decoder.drive(&mut pending).unwrap();

            assert!(pending.is_empty(), "failed at split {split}");
            assert_eq!(a_done.await_timeout(std::time::Duration::from_millis(10)).unwrap(), "OK");
            assert_eq!(b_done.await_timeout(std::time::Duration::from_millis(10)).unwrap(), b"bar".to_vec());
            assert_eq!(c_done.await_timeout(std::time::Duration::from_millis(10)).unwrap(), 42);
        }
    }

    #[test]
    fn empty_multi_bulk_resolves_to_empty_list() {
        let (sink, completion) = ListValuesSink::new();
        let mut pending = VecDeque::new();
        pending.push_back(make_pending(sink));
        let mut decoder = ReplyDecoder::new();
        decoder.feed(b"*0\r\n");
        decoder.drive(&mut pending).unwrap();
        assert_eq!(completion.await_timeout(std::time::Duration::from_millis(10)).unwrap(), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn map_sink_pairs_successive_bulks() {
        let (sink, completion) = MapSink::new();
        let mut pending = VecDeque::new();
        pending.push_back(make_pending(sink));
        let mut decoder = ReplyDecoder::new();
        decoder.feed(b"*4\r\n$1\r\na\r\n$1\r\n1\r\n$1\r\nb\r\n$1\r\n2\r\n");
        decoder.drive(&mut pending).unwrap();
        let map = completion.await_timeout(std::time::Duration::from_millis(10)).unwrap();
        assert_eq!(map.get(&b"a"[..]).map(Vec::as_slice), Some(&b"1"[..]));
        assert_eq!(map.get(&b"b"[..]).map(Vec::as_slice), Some(&b"2"[..]));
    }

    #[test]
    fn top_level_error_rejects_without_calling_complete() {
        let (sink, completion) = ValueSink::new();
        let mut pending = VecDeque::new();
        pending.push_back(make_pending(sink));
        let mut decoder = ReplyDecoder::new();
        decoder.feed(b"-ERR wrong type\r\n");
        decoder.drive(&mut pending).unwrap();
        let err = completion.await_timeout(std::time::Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::ServerError(_)));
    }
}
