// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
//! Connection configuration (spec.md §6 "External interfaces"), in the
//! shape of `glide-core`'s `client::types::ConnectionRequest`: a plain
//! struct the caller builds up field by field, with `Default` covering
//! every value that has a sane default.

use std::time::Duration;

/// Network endpoint to resolve and connect to.
#[derive(Debug, Clone)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthenticationInfo {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Default maximum nesting depth a connection's parser will accept before
/// failing with `ParserError::ExceedsMaxNestedDepth` (spec.md §3
/// "Invariants").
pub const DEFAULT_MAX_NESTED_DEPTH: usize = 5;

/// Default maximum number of bytes a single response may occupy before the
/// connection is torn down, guarding against an unbounded-length header on
/// an otherwise well-formed stream.
pub const DEFAULT_MAX_READ_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub address: NodeAddress,
    pub authentication: Option<AuthenticationInfo>,
    pub database_index: i64,
    pub client_name: Option<String>,
    pub use_tls: bool,

    /// Identifier embedded in the health-check PING payload so a stray
    /// PONG from a previous health check can't be mistaken for the current
    /// one's (spec.md §4.7).
    pub health_check_id: String,
    pub health_check_interval: Duration,
    pub health_check_timeout: Duration,

    pub reconnect_base_interval: Duration,
    pub reconnect_max_interval: Duration,

    pub resolve_timeout: Duration,
    pub connect_timeout: Duration,
    pub ssl_handshake_timeout: Duration,
    pub hello_timeout: Duration,

    /// Bounds a single socket read while a response is outstanding
    /// (spec.md §5, §7). Does not apply while the connection is idle; see
    /// `idle_timeout`.
    pub read_timeout: Duration,
    /// Bounds a single socket write (spec.md §5, §7).
    pub write_timeout: Duration,
    /// Bounds a socket read while nothing is outstanding, so a
    /// pub/sub-only connection with no pending responses isn't torn down
    /// by `read_timeout` just for sitting quietly (spec.md §5, §7).
    pub idle_timeout: Duration,

    pub max_read_size: usize,
    pub max_nested_depth: usize,

    /// Caller-supplied TLS trust store and cipher configuration; this crate
    /// never picks a certificate store on the caller's behalf.
    #[cfg(feature = "tls")]
    pub tls_client_config: Option<std::sync::Arc<rustls::ClientConfig>>,

    /// UNIX domain socket path; when set, takes precedence over
    /// `address` for the transport connection (spec.md §1). TLS over a
    /// UNIX socket is not supported.
    #[cfg(unix)]
    pub unix_path: Option<std::path::PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: NodeAddress {
                host: "localhost".to_string(),
                port: 6379,
            },
            authentication: None,
            database_index: 0,
            client_name: None,
            use_tls: false,
            health_check_id: nanoid::nanoid!(8),
            health_check_interval: Duration::from_secs(15),
            health_check_timeout: Duration::from_secs(3),
            reconnect_base_interval: Duration::from_millis(crate::retry::DEFAULT_BASE_MILLIS),
            reconnect_max_interval: crate::retry::DEFAULT_MAX_INTERVAL,
            resolve_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            ssl_handshake_timeout: Duration::from_secs(5),
            hello_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            max_read_size: DEFAULT_MAX_READ_SIZE,
            max_nested_depth: DEFAULT_MAX_NESTED_DEPTH,
            #[cfg(feature = "tls")]
            tls_client_config: None,
            #[cfg(unix)]
            unix_path: None,
        }
    }
}

impl Config {
    pub fn new(host: impl Into<String>, port: u16) -> Config {
        Config {
            address: NodeAddress {
                host: host.into(),
                port,
            },
            ..Config::default()
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.authentication = Some(AuthenticationInfo { username, password });
        self
    }

    pub fn with_database_index(mut self, database_index: i64) -> Self {
        self.database_index = database_index;
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    #[cfg(feature = "tls")]
    pub fn with_tls_client_config(mut self, client_config: std::sync::Arc<rustls::ClientConfig>) -> Self {
        self.tls_client_config = Some(client_config);
        self.use_tls = true;
        self
    }

    #[cfg(unix)]
    pub fn with_unix_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.unix_path = Some(path.into());
        self
    }
}
