// Copyright resp3-client contributors - SPDX-Identifier: Apache-2.0
//! Transport establishment: resolve + TCP connect, with an optional TLS
//! handshake layered on top behind the `tls` feature. The runner only ever
//! sees a `Box<dyn Transport>`, so the ready-loop doesn't care which one it
//! got (spec.md §4.6 "resolve", "connect").

use crate::config::Config;
use crate::errors::{RespError, RespResult, TransportTimeout};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Anything the ready-loop can read from and write to. Implemented for
/// `TcpStream` directly and, under `tls`, for `tokio_rustls::client::TlsStream<TcpStream>`.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

pub async fn connect(config: &Config) -> RespResult<Box<dyn Transport>> {
    #[cfg(unix)]
    if let Some(path) = &config.unix_path {
        return connect_unix(path, config).await;
    }

    let addrs = timeout(
        config.resolve_timeout,
        tokio::net::lookup_host((config.address.host.as_str(), config.address.port)),
    )
    .await
    .map_err(|_| transport_timeout(TransportTimeout::Resolve, config.resolve_timeout))?
    .map_err(RespError::from)?;
    let addrs: Vec<_> = addrs.collect();
    if addrs.is_empty() {
        return Err(RespError::Io(format!(
            "no addresses resolved for {}",
            config.address
        )));
    }

    let mut last_err = None;
    for addr in addrs {
        match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                return finish(stream, config).await;
            }
            Ok(Err(err)) => last_err = Some(RespError::from(err)),
            Err(_) => return Err(transport_timeout(TransportTimeout::Connect, config.connect_timeout)),
        }
    }
    Err(last_err.unwrap_or_else(|| RespError::Io("connect failed".to_string())))
}

/// UNIX domain socket transport, mirroring `redis-rs`'s split between
/// `ActualConnection::Tcp` and `ActualConnection::Unix`: same duplex byte
/// stream contract, no handshake differences, just a different `connect`.
/// TLS over a UNIX socket is out of scope — a local IPC channel has no
/// network path to secure.
#[cfg(unix)]
async fn connect_unix(path: &std::path::Path, config: &Config) -> RespResult<Box<dyn Transport>> {
    if config.use_tls {
        return Err(RespError::Io("TLS is not supported over a UNIX domain socket".to_string()));
    }
    let stream = timeout(config.connect_timeout, tokio::net::UnixStream::connect(path))
        .await
        .map_err(|_| transport_timeout(TransportTimeout::Connect, config.connect_timeout))?
        .map_err(RespError::from)?;
    Ok(Box::new(stream))
}

#[cfg(not(feature = "tls"))]
async fn finish(stream: TcpStream, config: &Config) -> RespResult<Box<dyn Transport>> {
    if config.use_tls {
        return Err(RespError::Io(
            "TLS was requested but the `tls` feature is not enabled".to_string(),
        ));
    }
    Ok(Box::new(stream))
}

#[cfg(feature = "tls")]
async fn finish(stream: TcpStream, config: &Config) -> RespResult<Box<dyn Transport>> {
    if !config.use_tls {
        return Ok(Box::new(stream));
    }
    let tls = tls::handshake(stream, config).await?;
    Ok(Box::new(tls))
}

fn transport_timeout(kind: TransportTimeout, duration: std::time::Duration) -> RespError {
    RespError::Transport { kind, duration }
}

#[cfg(feature = "tls")]
mod tls {
    use super::*;
    use rustls_pki_types::ServerName;
    use std::sync::Arc;
    use tokio_rustls::client::TlsStream;
    use tokio_rustls::TlsConnector;

    /// The TLS trust store and cipher configuration are an external
    /// collaborator's concern: the caller supplies a ready-built
    /// `rustls::ClientConfig` via `Config::tls_client_config` rather than
    /// this crate picking a certificate store for them.
    pub(super) async fn handshake(
        stream: TcpStream,
        config: &Config,
    ) -> RespResult<TlsStream<TcpStream>> {
        let client_config = config
            .tls_client_config
            .clone()
            .ok_or_else(|| RespError::Io("use_tls is set but no rustls::ClientConfig was supplied".to_string()))?;
        let connector = TlsConnector::from(client_config);
        let server_name = ServerName::try_from(config.address.host.clone())
            .map_err(|_| RespError::Io(format!("invalid TLS server name: {}", config.address.host)))?;
        tokio::time::timeout(config.ssl_handshake_timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| transport_timeout(crate::errors::TransportTimeout::SslHandshake, config.ssl_handshake_timeout))?
            .map_err(|err| RespError::Io(err.to_string()))
    }
}
