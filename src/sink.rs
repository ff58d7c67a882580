//! Typed output sinks (component B): thin adapters over [`RawSink`] that convert the
//! decoded [`Reply`] tree into the shape a particular command surface wants.
//!
//! Every sink pairs with the [`Completion`] it resolves or rejects once its `complete`
//! (or `top_error`) callback fires. Callers never construct `GenericSink` directly; each
//! public type alias below pins the conversion function for one reply shape.

use std::collections::HashMap;

use crate::completion::Completion;
use crate::decoder::ReplyTarget;
use crate::error::{Error, Result};
use crate::reply::{RawSink, Reply};

type Convert<T> = Box<dyn FnOnce(Reply) -> Result<T> + Send>;

/// Generic decode target: accumulates a [`Reply`] tree via [`RawSink`], then applies a
/// one-shot conversion function when the frame completes.
pub struct GenericSink<T> {
    raw: RawSink,
    completion: Completion<T>,
    convert: Option<Convert<T>>,
}

impl<T: Clone + Send + 'static> GenericSink<T> {
    fn from_convert(convert: impl FnOnce(Reply) -> Result<T> + Send + 'static) -> (Self, Completion<T>) {
        let completion = Completion::new();
        (Self::with_completion(completion.clone(), convert), completion)
    }

    /// Builds a sink around a completion the caller already holds, e.g. one handed out
    /// by the dispatcher before the request is known to be in-transaction or not.
    pub fn with_completion(
        completion: Completion<T>,
        convert: impl FnOnce(Reply) -> Result<T> + Send + 'static,
    ) -> Self {
        Self {
            raw: RawSink::new(),
            completion,
            convert: Some(Box::new(convert)),
        }
    }
}

impl<T: Clone + Send + 'static> ReplyTarget for GenericSink<T> {
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
        self.completion.reject(Error::ServerError(message));
    }

    fn complete(&mut self) {
        let reply = std::mem::replace(&mut self.raw, RawSink::new()).into_reply();
        if let Some(convert) = self.convert.take() {
            match convert(reply) {
                Ok(value) => self.completion.resolve(value),
                Err(err) => self.completion.reject(err),
            }
        }
    }

    fn abort(&mut self, err: Error) {
        self.completion.reject(err);
    }
}

fn parse_double(reply: Reply) -> Result<f64> {
    let bytes = reply.into_bulk()?;
    let s = simdutf8::basic::from_utf8(&bytes)
        .map_err(|_| Error::InvalidReply("double reply is not valid utf-8".to_string()))?;
    s.parse::<f64>()
        .map_err(|_| Error::InvalidReply(format!("invalid double literal {s:?}")))
}

fn parse_list_of_bulks(reply: Reply) -> Result<Vec<Vec<u8>>> {
    reply
        .into_array()?
        .into_iter()
        .map(Reply::into_bulk)
        .collect()
}

fn parse_map(reply: Reply) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
    let items = reply.into_array()?;
    let mut map = HashMap::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let Some(key) = iter.next() {
        let value = iter
            .next()
            .ok_or_else(|| Error::InvalidReply("map reply had an odd number of elements".to_string()))?;
        map.insert(key.into_bulk()?, value.into_bulk()?);
    }
    Ok(map)
}

fn parse_scored_value_list(reply: Reply) -> Result<Vec<(Vec<u8>, f64)>> {
    let items = reply.into_array()?;
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let Some(member) = iter.next() {
        let score = iter
            .next()
            .ok_or_else(|| Error::InvalidReply("scored-value reply had an odd number of elements".to_string()))?;
        let score = match score {
            Reply::Bulk(b) => simdutf8::basic::from_utf8(&b)
                .map_err(|_| Error::InvalidReply("score is not valid utf-8".to_string()))?
                .parse::<f64>()
                .map_err(|_| Error::InvalidReply("score is not a valid float".to_string()))?,
            Reply::Integer(n) => n as f64,
            other => return Err(Error::InvalidReply(format!("expected score, got {other:?}"))),
        };
        out.push((member.into_bulk()?, score));
    }
    Ok(out)
}

fn parse_bool_list(reply: Reply) -> Result<Vec<bool>> {
    reply
        .into_array()?
        .into_iter()
        .map(|r| r.into_integer().map(|n| n != 0))
        .collect()
}

fn parse_string_list(reply: Reply) -> Result<Vec<String>> {
    reply
        .into_array()?
        .into_iter()
        .map(|r| match r {
            Reply::Bulk(b) => Ok(String::from_utf8_lossy(&b).into_owned()),
            Reply::Status(s) => Ok(s),
            other => Err(Error::InvalidReply(format!("expected string, got {other:?}"))),
        })
        .collect()
}

/// Resolves to `true` (integer reply `1`) or `false` (integer reply `0`).
pub type BooleanSink = GenericSink<bool>;
impl BooleanSink {
    pub fn new() -> (Self, Completion<bool>) {
        GenericSink::from_convert(|r| r.into_integer().map(|n| n != 0))
    }
}

/// Resolves to a raw `:` integer reply.
pub type IntegerSink = GenericSink<i64>;
impl IntegerSink {
    pub fn new() -> (Self, Completion<i64>) {
        GenericSink::from_convert(Reply::into_integer)
    }
}

/// Resolves to a float encoded as a bulk string (`inf`/`-inf` included).
pub type DoubleSink = GenericSink<f64>;
impl DoubleSink {
    pub fn new() -> (Self, Completion<f64>) {
        GenericSink::from_convert(parse_double)
    }
}

/// Resolves to a `+` status line (or a bulk string used in its place).
pub type StatusSink = GenericSink<String>;
impl StatusSink {
    pub fn new() -> (Self, Completion<String>) {
        GenericSink::from_convert(Reply::into_status)
    }
}

/// Resolves to a key's raw bytes, after codec decoding has already happened at the
/// command layer. This sink only cares that the reply was a bulk string.
pub type KeySink = GenericSink<Vec<u8>>;
impl KeySink {
    pub fn new() -> (Self, Completion<Vec<u8>>) {
        GenericSink::from_convert(Reply::into_bulk)
    }
}

/// Resolves to a single value's raw bytes.
pub type ValueSink = GenericSink<Vec<u8>>;
impl ValueSink {
    pub fn new() -> (Self, Completion<Vec<u8>>) {
        GenericSink::from_convert(Reply::into_bulk)
    }
}

/// Resolves to a nilable value: `Some(bytes)` for a bulk string, `None` for a nil reply.
pub type OptionalValueSink = GenericSink<Option<Vec<u8>>>;
impl OptionalValueSink {
    pub fn new() -> (Self, Completion<Option<Vec<u8>>>) {
        GenericSink::from_convert(|r| match r {
            Reply::Nil => Ok(None),
            other => other.into_bulk().map(Some),
        })
    }
}

/// Resolves to a list of keys (e.g. `KEYS`, `SCAN`'s cursor body).
pub type ListKeysSink = GenericSink<Vec<Vec<u8>>>;
impl ListKeysSink {
    pub fn new() -> (Self, Completion<Vec<Vec<u8>>>) {
        GenericSink::from_convert(parse_list_of_bulks)
    }
}

/// Resolves to an ordered list of values (e.g. `MGET`, `LRANGE`).
pub type ListValuesSink = GenericSink<Vec<Vec<u8>>>;
impl ListValuesSink {
    pub fn new() -> (Self, Completion<Vec<Vec<u8>>>) {
        GenericSink::from_convert(parse_list_of_bulks)
    }
}

/// Resolves to an unordered set of values (e.g. `SMEMBERS`).
pub type SetValuesSink = GenericSink<Vec<Vec<u8>>>;
impl SetValuesSink {
    pub fn new() -> (Self, Completion<Vec<Vec<u8>>>) {
        GenericSink::from_convert(parse_list_of_bulks)
    }
}

/// Resolves to a key/value map (e.g. `HGETALL`).
pub type MapSink = GenericSink<HashMap<Vec<u8>, Vec<u8>>>;
impl MapSink {
    pub fn new() -> (Self, Completion<HashMap<Vec<u8>, Vec<u8>>>) {
        GenericSink::from_convert(parse_map)
    }
}

/// Resolves to a list of (member, score) pairs (e.g. `ZRANGE ... WITHSCORES`).
pub type ScoredValueListSink = GenericSink<Vec<(Vec<u8>, f64)>>;
impl ScoredValueListSink {
    pub fn new() -> (Self, Completion<Vec<(Vec<u8>, f64)>>) {
        GenericSink::from_convert(parse_scored_value_list)
    }
}

/// Resolves to a list of booleans (e.g. multi-key `EXPIRE` replies).
pub type BoolListSink = GenericSink<Vec<bool>>;
impl BoolListSink {
    pub fn new() -> (Self, Completion<Vec<bool>>) {
        GenericSink::from_convert(parse_bool_list)
    }
}

/// Resolves to a list of UTF-8 strings (e.g. `CLIENT LIST` lines, `CONFIG GET`).
pub type StringListSink = GenericSink<Vec<String>>;
impl StringListSink {
    pub fn new() -> (Self, Completion<Vec<String>>) {
        GenericSink::from_convert(parse_string_list)
    }
}

/// Resolves to the unconverted [`Reply`] tree, for callers that want the raw shape
/// (nested-multi replies such as `EVAL` scripts with unpredictable return types).
pub type RawReplySink = GenericSink<Reply>;
impl RawReplySink {
    pub fn new() -> (Self, Completion<Reply>) {
        GenericSink::from_convert(Ok)
    }
}

#[cfg(feature = "with-chrono")]
pub type DateSink = GenericSink<chrono::DateTime<chrono::Utc>>;
#[cfg(feature = "with-chrono")]
impl DateSink {
    pub fn new() -> (Self, Completion<chrono::DateTime<chrono::Utc>>) {
        GenericSink::from_convert(|r| {
            let bytes = r.into_bulk()?;
            let s = simdutf8::basic::from_utf8(&bytes)
                .map_err(|_| Error::InvalidReply("date reply is not valid utf-8".to_string()))?;
            let millis: i64 = s
                .parse()
                .map_err(|_| Error::InvalidReply(format!("invalid unix-millis timestamp {s:?}")))?;
            chrono::DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| Error::InvalidReply(format!("timestamp out of range: {millis}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn map_sink_rejects_odd_element_count() {
        let (mut sink, completion) = MapSink::new();
        sink.multi(1);
        sink.bulk(b"only-key");
        sink.complete();
        let err = completion.await_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::InvalidReply(_)));
    }

    #[test]
    fn boolean_sink_converts_integer() {
        let (mut sink, completion) = BooleanSink::new();
        sink.integer(1);
        sink.complete();
        assert!(completion.await_timeout(Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn double_sink_parses_infinities() {
        let (mut sink, completion) = DoubleSink::new();
        sink.bulk(b"-inf");
        sink.complete();
        assert_eq!(
            completion.await_timeout(Duration::from_millis(10)).unwrap(),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn optional_value_sink_handles_nil() {
        let (mut sink, completion) = OptionalValueSink::new();
        sink.multi(-1);
        sink.complete();
        assert_eq!(completion.await_timeout(Duration::from_millis(10)).unwrap(), None);
    }
}
