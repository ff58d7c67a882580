//! The public request surface (component H): one entry point per command, each
//! assembling a [`CommandArgs`], picking the reply conversion the command table dictates,
//! and handing both to [`Connection::dispatch`].
//!
//! Every entry here is a thin wrapper; none of them touch the pending queue, the
//! transaction scope, or the wire directly — that discipline lives entirely in
//! `connection.rs` and is shared by every command regardless of whether a `MULTI` is
//! currently open.

use std::collections::HashMap;

use crate::codec::{CommandArgs, ValueCodec};
use crate::completion::Completion;
use crate::connection::Connection;
use crate::constant;
use crate::error::{Error, Result};
use crate::reply::Reply;

fn decode_optional_value<C: ValueCodec>(codec: &C, reply: Reply) -> Result<Option<C::Value>> {
    match reply {
        Reply::Nil => Ok(None),
        other => codec.decode_value(&other.into_bulk()?).map(Some),
    }
}

fn decode_value_list<C: ValueCodec>(codec: &C, reply: Reply) -> Result<Vec<C::Value>> {
    reply
        .into_array()?
        .into_iter()
        .map(|item| codec.decode_value(&item.into_bulk()?))
        .collect()
}

fn decode_optional_value_list<C: ValueCodec>(codec: &C, reply: Reply) -> Result<Vec<Option<C::Value>>> {
    reply
        .into_array()?
        .into_iter()
        .map(|item| decode_optional_value(codec, item))
        .collect()
}

fn decode_scored_value_list<C: ValueCodec>(codec: &C, reply: Reply) -> Result<Vec<(C::Value, f64)>> {
    let items = reply.into_array()?;
    let mut out = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let Some(member) = iter.next() {
        let score_item = iter
            .next()
            .ok_or_else(|| Error::InvalidReply("scored-value reply had an odd number of elements".to_string()))?;
        let score = parse_score(score_item)?;
        out.push((codec.decode_value(&member.into_bulk()?)?, score));
    }
    Ok(out)
}

fn parse_score(reply: Reply) -> Result<f64> {
    match reply {
        Reply::Bulk(bytes) => simdutf8::basic::from_utf8(&bytes)
            .map_err(|_| Error::InvalidReply("score is not valid utf-8".to_string()))?
            .parse::<f64>()
            .map_err(|_| Error::InvalidReply("score is not a valid float".to_string())),
        Reply::Integer(n) => Ok(n as f64),
        other => Err(Error::InvalidReply(format!("expected score, got {other:?}"))),
    }
}

impl<C: ValueCodec + Send + Sync + 'static> Connection<C> {
    pub fn get(&self, key: &C::Key) -> Completion<Option<C::Value>> {
        let codec = self.codec().clone();
        let args = CommandArgs::new(constant::GET).arg_key(self.codec(), key);
        self.dispatch(args, move |reply| decode_optional_value(&codec, reply))
    }

    pub fn set(&self, key: &C::Key, value: &C::Value) -> Completion<String> {
        let args = CommandArgs::new(constant::SET)
            .arg_key(self.codec(), key)
            .arg_value(self.codec(), value);
        self.dispatch(args, Reply::into_status)
    }

    pub fn del(&self, keys: &[C::Key]) -> Completion<i64> {
        let mut args = CommandArgs::new(constant::DEL);
        for key in keys {
            args = args.arg_key(self.codec(), key);
        }
        self.dispatch(args, Reply::into_integer)
    }

    pub fn exists(&self, key: &C::Key) -> Completion<bool> {
        let args = CommandArgs::new(constant::EXISTS).arg_key(self.codec(), key);
        self.dispatch(args, |reply| reply.into_integer().map(|n| n != 0))
    }

    pub fn expire(&self, key: &C::Key, seconds: i64) -> Completion<bool> {
        let args = CommandArgs::new(constant::EXPIRE).arg_key(self.codec(), key).arg_i64(seconds);
        self.dispatch(args, |reply| reply.into_integer().map(|n| n != 0))
    }

    pub fn ttl(&self, key: &C::Key) -> Completion<i64> {
        let args = CommandArgs::new(constant::TTL).arg_key(self.codec(), key);
        self.dispatch(args, Reply::into_integer)
    }

    pub fn incr(&self, key: &C::Key) -> Completion<i64> {
        let args = CommandArgs::new(constant::INCR).arg_key(self.codec(), key);
        self.dispatch(args, Reply::into_integer)
    }

    pub fn incrby(&self, key: &C::Key, delta: i64) -> Completion<i64> {
        let args = CommandArgs::new(constant::INCRBY).arg_key(self.codec(), key).arg_i64(delta);
        self.dispatch(args, Reply::into_integer)
    }

    pub fn mget(&self, keys: &[C::Key]) -> Completion<Vec<Option<C::Value>>> {
        let codec = self.codec().clone();
        let mut args = CommandArgs::new(constant::MGET);
        for key in keys {
            args = args.arg_key(self.codec(), key);
        }
        self.dispatch(args, move |reply| decode_optional_value_list(&codec, reply))
    }

    pub fn mset(&self, entries: &[(C::Key, C::Value)]) -> Completion<String> {
        let args = CommandArgs::new(constant::MSET).arg_map(self.codec(), entries);
        self.dispatch(args, Reply::into_status)
    }

    pub fn lpush(&self, key: &C::Key, values: &[C::Value]) -> Completion<i64> {
        let mut args = CommandArgs::new(constant::LPUSH).arg_key(self.codec(), key);
        for value in values {
            args = args.arg_value(self.codec(), value);
        }
        self.dispatch(args, Reply::into_integer)
    }

    pub fn rpush(&self, key: &C::Key, values: &[C::Value]) -> Completion<i64> {
        let mut args = CommandArgs::new(constant::RPUSH).arg_key(self.codec(), key);
        for value in values {
            args = args.arg_value(self.codec(), value);
        }
        self.dispatch(args, Reply::into_integer)
    }

    pub fn lrange(&self, key: &C::Key, start: i64, stop: i64) -> Completion<Vec<C::Value>> {
        let codec = self.codec().clone();
        let args = CommandArgs::new(constant::LRANGE)
            .arg_key(self.codec(), key)
            .arg_i64(start)
            .arg_i64(stop);
        self.dispatch(args, move |reply| decode_value_list(&codec, reply))
    }

    pub fn llen(&self, key: &C::Key) -> Completion<i64> {
        let args = CommandArgs::new(constant::LLEN).arg_key(self.codec(), key);
        self.dispatch(args, Reply::into_integer)
    }

    pub fn sadd(&self, key: &C::Key, members: &[C::Value]) -> Completion<i64> {
        let mut args = CommandArgs::new(constant::SADD).arg_key(self.codec(), key);
        for member in members {
            args = args.arg_value(self.codec(), member);
        }
        self.dispatch(args, Reply::into_integer)
    }

    pub fn smembers(&self, key: &C::Key) -> Completion<Vec<C::Value>> {
        let codec = self.codec().clone();
        let args = CommandArgs::new(constant::SMEMBERS).arg_key(self.codec(), key);
        self.dispatch(args, move |reply| decode_value_list(&codec, reply))
    }

    pub fn sismember(&self, key: &C::Key, member: &C::Value) -> Completion<bool> {
        let args = CommandArgs::new(constant::SISMEMBER)
            .arg_key(self.codec(), key)
            .arg_value(self.codec(), member);
        self.dispatch(args, |reply| reply.into_integer().map(|n| n != 0))
    }

    pub fn hset(&self, key: &C::Key, field: &C::Key, value: &C::Value) -> Completion<i64> {
        let args = CommandArgs::new(constant::HSET)
            .arg_key(self.codec(), key)
            .arg_key(self.codec(), field)
            .arg_value(self.codec(), value);
        self.dispatch(args, Reply::into_integer)
    }

    pub fn hget(&self, key: &C::Key, field: &C::Key) -> Completion<Option<C::Value>> {
        let codec = self.codec().clone();
        let args = CommandArgs::new(constant::HGET)
            .arg_key(self.codec(), key)
            .arg_key(self.codec(), field);
        self.dispatch(args, move |reply| decode_optional_value(&codec, reply))
    }

    pub fn hgetall(&self, key: &C::Key) -> Completion<HashMap<Vec<u8>, C::Value>> {
        let codec = self.codec().clone();
        let args = CommandArgs::new(constant::HGETALL).arg_key(self.codec(), key);
        self.dispatch(args, move |reply| {
            let items = reply.into_array()?;
            let mut map = HashMap::with_capacity(items.len() / 2);
            let mut iter = items.into_iter();
            while let Some(field) = iter.next() {
                let value = iter
                    .next()
                    .ok_or_else(|| Error::InvalidReply("HGETALL reply had an odd number of elements".to_string()))?;
                map.insert(field.into_bulk()?, codec.decode_value(&value.into_bulk()?)?);
            }
            Ok(map)
        })
    }

    pub fn hdel(&self, key: &C::Key, fields: &[C::Key]) -> Completion<i64> {
        let mut args = CommandArgs::new(constant::HDEL).arg_key(self.codec(), key);
        for field in fields {
            args = args.arg_key(self.codec(), field);
        }
        self.dispatch(args, Reply::into_integer)
    }

    pub fn zadd(&self, key: &C::Key, score: f64, member: &C::Value) -> Completion<i64> {
        let args = CommandArgs::new(constant::ZADD)
            .arg_key(self.codec(), key)
            .arg_double(score)
            .arg_value(self.codec(), member);
        self.dispatch(args, Reply::into_integer)
    }

    pub fn zrange(&self, key: &C::Key, start: i64, stop: i64) -> Completion<Vec<C::Value>> {
        let codec = self.codec().clone();
        let args = CommandArgs::new(constant::ZRANGE)
            .arg_key(self.codec(), key)
            .arg_i64(start)
            .arg_i64(stop);
        self.dispatch(args, move |reply| decode_value_list(&codec, reply))
    }

    pub fn zrange_withscores(&self, key: &C::Key, start: i64, stop: i64) -> Completion<Vec<(C::Value, f64)>> {
        let codec = self.codec().clone();
        let args = CommandArgs::new(constant::ZRANGE)
            .arg_key(self.codec(), key)
            .arg_i64(start)
            .arg_i64(stop)
            .arg_keyword(constant::KW_WITHSCORES);
        self.dispatch(args, move |reply| decode_scored_value_list(&codec, reply))
    }

    pub fn zscore(&self, key: &C::Key, member: &C::Value) -> Completion<Option<f64>> {
        let args = CommandArgs::new(constant::ZSCORE)
            .arg_key(self.codec(), key)
            .arg_value(self.codec(), member);
        self.dispatch(args, |reply| match reply {
            Reply::Nil => Ok(None),
            other => parse_score(other).map(Some),
        })
    }

    /// `PUBLISH`'s synchronous integer reply (the number of subscribers that received the
    /// message). Pub/sub message delivery itself is out of scope.
    pub fn publish(&self, channel: &C::Key, message: &C::Value) -> Completion<i64> {
        let args = CommandArgs::new(constant::PUBLISH)
            .arg_key(self.codec(), channel)
            .arg_value(self.codec(), message);
        self.dispatch(args, Reply::into_integer)
    }

    /// Evaluates a script. The reply shape is whatever the script returns, so callers get
    /// the unconverted tree back.
    pub fn eval(&self, script: &C::Value, keys: &[C::Key], script_args: &[C::Value]) -> Completion<Reply> {
        let mut args = CommandArgs::new(constant::EVAL)
            .arg_value(self.codec(), script)
            .arg_i64(keys.len() as i64);
        for key in keys {
            args = args.arg_key(self.codec(), key);
        }
        for arg in script_args {
            args = args.arg_value(self.codec(), arg);
        }
        self.dispatch(args, Ok)
    }

    /// Digest a script the way `EVALSHA` expects it: lowercase hex SHA-1 of the script's
    /// wire-encoded bytes (§6, "Script digest"). Callers typically cache the result and
    /// try [`evalsha`](Self::evalsha) first, falling back to [`eval`](Self::eval) on a
    /// `NOSCRIPT` server error.
    pub fn script_digest(&self, script: &C::Value) -> String {
        crate::codec::sha1_hex_digest(&self.codec().encode_value(script))
    }

    /// `EVALSHA`, keyed by the SHA-1 digest of the script's encoded bytes (see
    /// [`crate::codec::sha1_hex_digest`] and [`script_digest`](Self::script_digest)).
    pub fn evalsha(&self, sha: &str, keys: &[C::Key], script_args: &[C::Value]) -> Completion<Reply> {
        let mut args = CommandArgs::new(constant::EVALSHA)
            .arg_bytes(sha.as_bytes().to_vec())
            .arg_i64(keys.len() as i64);
        for key in keys {
            args = args.arg_key(self.codec(), key);
        }
        for arg in script_args {
            args = args.arg_value(self.codec(), arg);
        }
        self.dispatch(args, Ok)
    }

    pub fn ping(&self) -> Completion<String> {
        self.dispatch(CommandArgs::new(constant::PING), Reply::into_status)
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{BytesCodec, sha1_hex_digest};

    #[test]
    fn script_digest_matches_raw_sha1_of_encoded_bytes() {
        let codec = BytesCodec;
        let script = b"return 1".to_vec();
        let encoded = {
            use crate::codec::ValueCodec;
            codec.encode_value(&script)
        };
        assert_eq!(sha1_hex_digest(&encoded), sha1_hex_digest(b"return 1"));
    }
}
