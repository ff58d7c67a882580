use crate::error::Error;

/// A configuration for a connection.
///
/// ```rs
/// let mut opts1 = ConnectionOpts::default();
/// opts1.port = 6400;
///
/// let opts2 = ConnectionOpts::try_from("resp://:password@localhost:6379/3")?;
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionOpts {
    /// Enable `TCP_NODELAY` to disable Nagle's algorithm.
    pub tcp_nodelay: bool,

    /// Hostname or IP address.
    pub host: String,

    /// Port number for the server.
    pub port: u16,

    /// Password used for a synthetic `AUTH` issued on connect and replayed on reconnect.
    pub password: Option<String>,

    /// Logical database number selected with `SELECT` on connect and replayed on reconnect.
    pub db: u64,

    /// Default timeout applied to blocking `await_timeout` calls when a caller doesn't
    /// specify one.
    pub default_timeout: std::time::Duration,

    /// Capacity hint for the pending queue. `None` means unbounded.
    pub pending_queue_capacity: Option<usize>,
}

impl Default for ConnectionOpts {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            default_timeout: std::time::Duration::from_secs(5),
            pending_queue_capacity: None,
        }
    }
}

impl TryFrom<&str> for ConnectionOpts {
    type Error = Error;

    fn try_from(url: &str) -> Result<Self, Self::Error> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::BadConfigError(format!("failed to parse connection URL: {e}")))?;

        if parsed.scheme() != "resp" && parsed.scheme() != "redis" {
            return Err(Error::BadConfigError(format!(
                "invalid URL scheme '{}', expected 'resp' or 'redis'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::BadConfigError("connection URL is missing a host".to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or(6379);
        let password = parsed.password().map(ToString::to_string);

        let db = match parsed.path().strip_prefix('/').filter(|s| !s.is_empty()) {
            Some(segment) => segment
                .parse::<u64>()
                .map_err(|_| Error::BadConfigError(format!("invalid database index '{segment}'")))?,
            None => 0,
        };

        Ok(Self {
            tcp_nodelay: true,
            host,
            port,
            password,
            db,
            default_timeout: std::time::Duration::from_secs(5),
            pending_queue_capacity: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_password_and_db() {
        let opts = ConnectionOpts::try_from("resp://:hunter2@cache.internal:6400/3").unwrap();
        assert_eq!(opts.host, "cache.internal");
        assert_eq!(opts.port, 6400);
        assert_eq!(opts.password.as_deref(), Some("hunter2"));
        assert_eq!(opts.db, 3);
    }

    #[test]
    fn defaults_port_and_db_when_absent() {
        let opts = ConnectionOpts::try_from("redis://localhost").unwrap();
        assert_eq!(opts.port, 6379);
        assert_eq!(opts.db, 0);
        assert!(opts.password.is_none());
    }

    #[test]
    fn rejects_wrong_scheme() {
        let err = ConnectionOpts::try_from("mysql://localhost").unwrap_err();
        assert!(matches!(err, Error::BadConfigError(_)));
    }
}
