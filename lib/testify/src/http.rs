use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::temp::temp_file;
use crate::tls::self_signed;

pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Full::new(body.into()))
        .unwrap()
}

pub fn json(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(body.into()))
        .unwrap()
}

/// HTTP status code 404
pub fn not_found() -> Response<Full<Bytes>> {
    text(StatusCode::NOT_FOUND, "Not Found")
}

/// A mock HTTP(S) server running in the background, it stops when dropped.
pub struct Server {
    addr: SocketAddr,
    ca_file: Option<PathBuf>,
    requests: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl Server {
    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The PEM file of the CA which signed the server certificate.
    pub fn ca_file(&self) -> &Path {
        self.ca_file
            .as_deref()
            .expect("plain HTTP server has no CA file")
    }

    /// How many requests have been served.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();

        if let Some(path) = &self.ca_file {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Serve `handler` over plain HTTP/1.1 on a random local port.
pub async fn serve<F, Fut>(handler: F) -> Server
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("get local address");
    let requests = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&requests);
    let handle = tokio::spawn(async move {
        loop {
            let Ok((conn, _peer)) = listener.accept().await else {
                break;
            };

            tokio::spawn(serve_connection(conn, handler.clone(), Arc::clone(&counter)));
        }
    });

    Server {
        addr,
        ca_file: None,
        requests,
        handle,
    }
}

/// Serve `handler` over HTTPS on a random local port. The certificate is
/// self-signed and valid for `localhost` and `127.0.0.1`, clients trust it
/// with [`Server::ca_file`].
pub async fn serve_tls<F, Fut>(handler: F) -> Server
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let identity = self_signed(&["localhost", "127.0.0.1"]);
    let ca_file = temp_file();
    std::fs::write(&ca_file, &identity.cert_pem).expect("write CA file");

    let acceptor = TlsAcceptor::from(Arc::new(identity.server_config()));
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("get local address");
    let requests = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&requests);
    let handle = tokio::spawn(async move {
        loop {
            let Ok((conn, _peer)) = listener.accept().await else {
                break;
            };

            let acceptor = acceptor.clone();
            let handler = handler.clone();
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                match acceptor.accept(conn).await {
                    Ok(stream) => serve_connection(stream, handler, counter).await,
                    Err(err) => {
                        tracing::debug!(message = "TLS handshake failed", %err);
                    }
                }
            });
        }
    });

    Server {
        addr,
        ca_file: Some(ca_file),
        requests,
        handle,
    }
}

async fn serve_connection<S, F, Fut>(stream: S, handler: F, counter: Arc<AtomicUsize>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: Fn(Request<Incoming>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let service = service_fn(move |req| {
        counter.fetch_add(1, Ordering::SeqCst);
        let fut = handler(req);
        async move { Ok::<_, Infallible>(fut.await) }
    });

    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        tracing::debug!(message = "serve connection failed", %err);
    }
}
