//! The wire codec (component A): request-side framing, and the injected user codec
//! that translates caller types to and from byte strings.

use sha1::{Digest, Sha1};

use crate::error::Result;

/// Translates caller key/value types to and from wire bytes. The core never interprets
/// the bytes it sends or receives through this trait — it only frames them.
pub trait ValueCodec: Send + Sync + Clone {
    type Key;
    type Value;

    fn encode_key(&self, key: &Self::Key) -> Vec<u8>;
    fn encode_value(&self, value: &Self::Value) -> Vec<u8>;
    fn decode_key(&self, bytes: &[u8]) -> Result<Self::Key>;
    fn decode_value(&self, bytes: &[u8]) -> Result<Self::Value>;
}

/// The identity codec: keys and values are already `Vec<u8>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl ValueCodec for BytesCodec {
    type Key = Vec<u8>;
    type Value = Vec<u8>;

    fn encode_key(&self, key: &Vec<u8>) -> Vec<u8> {
        key.clone()
    }

    fn encode_value(&self, value: &Vec<u8>) -> Vec<u8> {
        value.clone()
    }

    fn decode_key(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Renders a double the way the wire protocol expects: non-finite values as `+inf`/`-inf`,
/// everything else via Rust's own shortest-round-trip `Display` impl for `f64`, which is
/// deterministic across platforms and satisfies the "pin an algorithm" design note without
/// hand-rolling one.
pub fn render_double(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value == f64::INFINITY {
        "+inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        value.to_string()
    }
}

/// Lowercase hex SHA-1 digest of a script's encoded bytes, for `EVALSHA`.
pub fn sha1_hex_digest(script_bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(script_bytes);
    let digest = hasher.finalize();
    digest.iter().fold(String::with_capacity(40), |mut acc, byte| {
        acc.push_str(&format!("{byte:02x}"));
        acc
    })
}

/// Builds one request's argument vector and frames it as `*N\r\n` followed by N
/// `$len\r\n<bytes>\r\n` bulk strings. Element 0 is always the command name.
#[derive(Debug, Clone)]
pub struct CommandArgs {
    parts: Vec<Vec<u8>>,
}

impl CommandArgs {
    pub fn new(command: &'static [u8]) -> Self {
        Self {
            parts: vec![command.to_vec()],
        }
    }

    pub fn arg_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.parts.push(bytes.into());
        self
    }

    pub fn arg_keyword(self, keyword: &'static [u8]) -> Self {
        self.arg_bytes(keyword.to_vec())
    }

    pub fn arg_key<C: ValueCodec>(self, codec: &C, key: &C::Key) -> Self {
        self.arg_bytes(codec.encode_key(key))
    }

    pub fn arg_value<C: ValueCodec>(self, codec: &C, value: &C::Value) -> Self {
        self.arg_bytes(codec.encode_value(value))
    }

    pub fn arg_i64(self, n: i64) -> Self {
        self.arg_bytes(n.to_string().into_bytes())
    }

    pub fn arg_double(self, value: f64) -> Self {
        self.arg_bytes(render_double(value).into_bytes())
    }

    /// Appends a map as alternating key/value bulk strings, insertion order preserved.
    pub fn arg_map<C: ValueCodec>(mut self, codec: &C, entries: &[(C::Key, C::Value)]) -> Self {
        for (key, value) in entries {
            self = self.arg_key(codec, key).arg_value(codec, value);
        }
        self
    }

    pub fn arity(&self) -> usize {
        self.parts.len()
    }

    /// Frames the accumulated parts as one RESP request.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.parts.iter().map(|p| p.len() + 16).sum::<usize>() + 16);
        out.extend_from_slice(format!("*{}\r\n", self.parts.len()).as_bytes());
        for part in &self.parts {
            out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
            out.extend_from_slice(part);
            out.extend_from_slice(b"\r\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_array_of_bulk_strings() {
        let bytes = CommandArgs::new(b"SET")
            .arg_key(&BytesCodec, &b"foo".to_vec())
            .arg_value(&BytesCodec, &b"bar".to_vec())
            .encode();
        assert_eq!(bytes, b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
    }

    #[test]
    fn renders_non_finite_doubles() {
        assert_eq!(render_double(f64::INFINITY), "+inf");
        assert_eq!(render_double(f64::NEG_INFINITY), "-inf");
        assert_eq!(render_double(1.5), "1.5");
    }

    #[test]
    fn sha1_digest_is_lowercase_hex_and_forty_chars() {
        let digest = sha1_hex_digest(b"return 1");
        assert_eq!(digest.len(), 40);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
