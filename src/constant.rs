//! Canonical command-name byte tables.
//!
//! Out of scope per the component design ("command-name and keyword byte tables" are an
//! external collaborator), but the connection core still needs the handful of commands it
//! issues itself: the synthetic `AUTH`/`SELECT` replayed on reconnect, and `MULTI`/`EXEC`/
//! `DISCARD` for transaction scoping. Everything else lives in `commands.rs`, one constant
//! per public entry point, so a reader can see the wire name next to its call site.

pub const AUTH: &[u8] = b"AUTH";
pub const SELECT: &[u8] = b"SELECT";
pub const MULTI: &[u8] = b"MULTI";
pub const EXEC: &[u8] = b"EXEC";
pub const DISCARD: &[u8] = b"DISCARD";

pub const GET: &[u8] = b"GET";
pub const SET: &[u8] = b"SET";
pub const DEL: &[u8] = b"DEL";
pub const EXISTS: &[u8] = b"EXISTS";
pub const EXPIRE: &[u8] = b"EXPIRE";
pub const TTL: &[u8] = b"TTL";
pub const INCR: &[u8] = b"INCR";
pub const INCRBY: &[u8] = b"INCRBY";
pub const MGET: &[u8] = b"MGET";
pub const MSET: &[u8] = b"MSET";

pub const LPUSH: &[u8] = b"LPUSH";
pub const RPUSH: &[u8] = b"RPUSH";
pub const LRANGE: &[u8] = b"LRANGE";
pub const LLEN: &[u8] = b"LLEN";

pub const SADD: &[u8] = b"SADD";
pub const SMEMBERS: &[u8] = b"SMEMBERS";
pub const SISMEMBER: &[u8] = b"SISMEMBER";

pub const HSET: &[u8] = b"HSET";
pub const HGET: &[u8] = b"HGET";
pub const HGETALL: &[u8] = b"HGETALL";
pub const HDEL: &[u8] = b"HDEL";

pub const ZADD: &[u8] = b"ZADD";
pub const ZRANGE: &[u8] = b"ZRANGE";
pub const ZSCORE: &[u8] = b"ZSCORE";

pub const PUBLISH: &[u8] = b"PUBLISH";
pub const EVAL: &[u8] = b"EVAL";
pub const EVALSHA: &[u8] = b"EVALSHA";

pub const PING: &[u8] = b"PING";

pub const KW_WITHSCORES: &[u8] = b"WITHSCORES";
pub const KW_NX: &[u8] = b"NX";
pub const KW_XX: &[u8] = b"XX";
pub const KW_EX: &[u8] = b"EX";
pub const KW_PX: &[u8] = b"PX";
