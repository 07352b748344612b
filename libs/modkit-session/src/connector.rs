//! Connection establishment for a session's pools.
//!
//! [`ProxyConnector`] sits under the rustls layer and decides where the TCP
//! connection goes:
//! - no proxy: straight to the destination;
//! - `https` destination behind a proxy: `CONNECT` tunnel, TLS runs inside it;
//! - `http` destination behind a proxy: plain connection to the proxy, and
//!   the connection is marked as proxied so hyper sends absolute-form URIs.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioIo;
use pin_project_lite::pin_project;
use tokio::net::TcpStream;
use tower::{Service, ServiceExt};

use crate::config::{SessionOptions, TlsRootConfig};
use crate::error::{BoxError, HttpError};
use crate::proxy::ProxyTarget;
use crate::tls;

pin_project! {
    /// Stream returned by [`ProxyConnector`].
    pub struct ProxyStream<T> {
        #[pin]
        inner: T,
        forwarded: bool,
    }
}

impl<T> ProxyStream<T> {
    fn direct(inner: T) -> Self {
        Self {
            inner,
            forwarded: false,
        }
    }

    fn forwarded(inner: T) -> Self {
        Self {
            inner,
            forwarded: true,
        }
    }
}

impl<T: Read> Read for ProxyStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl<T: Write> Write for ProxyStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write_vectored(cx, bufs)
    }
}

impl<T: Connection> Connection for ProxyStream<T> {
    fn connected(&self) -> Connected {
        let connected = self.inner.connected();
        if self.forwarded {
            connected.proxy(true)
        } else {
            connected
        }
    }
}

/// TCP connector that optionally routes through an HTTP proxy.
#[derive(Clone, Debug)]
pub struct ProxyConnector {
    http: HttpConnector,
    proxy: Option<ProxyTarget>,
}

impl ProxyConnector {
    #[must_use]
    pub fn new(options: &SessionOptions, proxy: Option<ProxyTarget>) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(options.dial_timeout));
        http.set_keepalive(options.dial_keep_alive);
        http.set_nodelay(true);
        Self { http, proxy }
    }
}

type Connecting =
    Pin<Box<dyn Future<Output = Result<ProxyStream<TokioIo<TcpStream>>, BoxError>> + Send>>;

impl Service<Uri> for ProxyConnector {
    type Response = ProxyStream<TokioIo<TcpStream>>;
    type Error = BoxError;
    type Future = Connecting;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.http.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let mut tcp = self.http.clone();
        let proxy = self.proxy.clone();

        Box::pin(async move {
            let Some(proxy) = proxy else {
                return Ok(ProxyStream::direct(tcp.call(dst).await?));
            };

            if dst.scheme() == Some(&http::uri::Scheme::HTTPS) {
                let mut tunnel = Tunnel::new(proxy.uri, tcp);
                if let Some(auth) = proxy.auth {
                    tunnel = tunnel.with_auth(auth);
                }
                let io = tunnel.oneshot(dst).await.map_err(Into::<BoxError>::into)?;
                Ok(ProxyStream::direct(io))
            } else {
                Ok(ProxyStream::forwarded(tcp.call(proxy.uri).await?))
            }
        })
    }
}

/// Build the TLS-capable connector for one pool.
///
/// `insecure_skip_verify` takes precedence over the root configuration.
///
/// # Errors
/// Returns [`HttpError::Tls`] if the TLS configuration cannot be built.
pub fn build_https_connector(
    options: &SessionOptions,
    proxy: Option<ProxyTarget>,
) -> Result<HttpsConnector<ProxyConnector>, HttpError> {
    let connector = ProxyConnector::new(options, proxy);

    if options.insecure_skip_verify {
        let client_config = tls::insecure_client_config().map_err(|e| HttpError::Tls(e.into()))?;
        return Ok(hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(client_config)
            .https_or_http()
            .enable_all_versions()
            .wrap_connector(connector));
    }

    match options.tls_roots {
        TlsRootConfig::WebPki => {
            let provider = tls::get_crypto_provider();
            let builder = hyper_rustls::HttpsConnectorBuilder::new()
                .with_provider_and_webpki_roots(provider)
                .map_err(|e| HttpError::Tls(Box::new(e)))?;
            Ok(builder
                .https_or_http()
                .enable_all_versions()
                .wrap_connector(connector))
        }
        TlsRootConfig::Native => {
            let client_config =
                tls::native_roots_client_config().map_err(|e| HttpError::Tls(e.into()))?;
            Ok(hyper_rustls::HttpsConnectorBuilder::new()
                .with_tls_config(client_config)
                .https_or_http()
                .enable_all_versions()
                .wrap_connector(connector))
        }
    }
}
