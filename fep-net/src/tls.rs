//! Optional TLS wrapping for a Channel's two sockets (spec §6 "SSL
//! on/off"). Plain TCP and TLS sockets are boxed behind the same
//! `AsyncRead`/`AsyncWrite` object so the rest of [`crate::channel`]
//! doesn't need to know which one it holds.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{ChannelError, FramingError};

pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

fn io_err(msg: impl std::fmt::Display) -> ChannelError {
    ChannelError::Framing(FramingError::from(std::io::Error::new(std::io::ErrorKind::InvalidInput, msg.to_string())))
}

fn connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Wrap `stream` in a TLS client session against `host`, if `enabled`;
/// otherwise pass it through unwrapped. Returns the same boxed stream used
/// for both directions (a `TlsStream` implements both halves itself).
pub async fn wrap(stream: TcpStream, host: &str, enabled: bool) -> Result<(BoxedReader, BoxedWriter), ChannelError> {
    if !enabled {
        let (read_half, write_half) = tokio::io::split(stream);
        return Ok((Box::new(read_half), Box::new(write_half)));
    }

    let domain = ServerName::try_from(host.to_string()).map_err(io_err)?;
    let tls_stream =
        connector().connect(domain, stream).await.map_err(|e| ChannelError::Framing(FramingError::from(e)))?;
    let (read_half, write_half) = tokio::io::split(tls_stream);
    Ok((Box::new(read_half), Box::new(write_half)))
}
