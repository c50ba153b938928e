use std::fmt;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{
    ACCEPT_ENCODING, AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION, SET_COOKIE, USER_AGENT,
};
use http::{HeaderMap, Request, Response, header::HeaderValue};
use http_body_util::Full;
use hyper::body::{Body, Incoming};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tracing::Instrument;

use crate::tls::{TlsConfig, TlsError};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Failed to build TLS connector: {0}")]
    BuildTlsConnector(#[from] TlsError),
    #[error("Failed to make HTTP(S) request: {0}")]
    CallRequest(#[from] hyper_util::client::legacy::Error),
    #[error("Failed to reading response: {0}")]
    ReadIncoming(#[from] hyper::Error),
    #[error("Failed to build HTTP request: {0}")]
    BuildRequest(#[from] http::Error),
}

/// A pooled HTTP(S) client. Cloning is cheap and clones share the connection
/// pool, so one client can serve concurrent requests.
#[derive(Clone)]
pub struct HttpClient<B = Full<Bytes>> {
    client: Client<HttpsConnector<HttpConnector>, B>,
    user_agent: HeaderValue,
}

impl<B> HttpClient<B>
where
    B: Body + Send + Unpin + 'static,
    B::Data: Send,
    B::Error: Into<crate::Error>,
{
    /// Build a client, `None` means the system's native roots are trusted
    /// and no client certificate is presented.
    pub fn new(tls_config: Option<&TlsConfig>) -> Result<HttpClient<B>, HttpError> {
        HttpClient::new_with_custom_client(tls_config, &mut Client::builder(TokioExecutor::new()))
    }

    pub fn new_with_custom_client(
        tls_config: Option<&TlsConfig>,
        client_builder: &mut hyper_util::client::legacy::Builder,
    ) -> Result<HttpClient<B>, HttpError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let config = match tls_config {
            Some(config) => config.client_config()?,
            None => TlsConfig::default().client_config()?,
        };

        let https = HttpsConnector::from((http, config));
        let client = client_builder.build(https);
        let user_agent = HeaderValue::from_static(crate::USER_AGENT);

        Ok(HttpClient { client, user_agent })
    }

    pub fn send(
        &self,
        mut req: Request<B>,
    ) -> BoxFuture<'static, Result<Response<Incoming>, HttpError>> {
        let span = info_span!("http", method = %req.method(), uri = %req.uri());

        default_request_headers(&mut req, &self.user_agent);

        let resp = self.client.request(req);

        let fut = async move {
            // Capture the time right before we issue the request.
            // Request doesn't start the processing until we start polling it.
            let before = std::time::Instant::now();

            let resp = resp.await.inspect_err(|err| {
                debug!(
                    message = "HTTP request failed",
                    %err,
                    elapsed = ?before.elapsed(),
                );
            })?;

            debug!(
                message = "HTTP response received",
                status = %resp.status(),
                version = ?resp.version(),
                headers = ?remove_sensitive(resp.headers()),
                body = %FormatBody(resp.body()),
                elapsed = ?before.elapsed(),
            );

            Ok(resp)
        }
        .instrument(span);

        Box::pin(fut)
    }
}

fn default_request_headers<B>(request: &mut Request<B>, user_agent: &HeaderValue) {
    if !request.headers().contains_key(USER_AGENT) {
        request.headers_mut().insert(USER_AGENT, user_agent.clone());
    }

    if !request.headers().contains_key(ACCEPT_ENCODING) {
        // compressed responses are not supported
        request
            .headers_mut()
            .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }
}

/// Newtype placeholder to provide a formatter for the request and response body.
struct FormatBody<'a, B>(&'a B);

impl<B: Body> fmt::Display for FormatBody<'_, B> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let size = self.0.size_hint();
        match (size.lower(), size.upper()) {
            (0, None) => write!(fmt, "[unknown]"),
            (lower, None) => write!(fmt, "[>={} bytes]", lower),

            (0, Some(0)) => write!(fmt, "[empty]"),
            (0, Some(upper)) => write!(fmt, "[<={} bytes]", upper),

            (lower, Some(upper)) if lower == upper => write!(fmt, "[{} bytes]", lower),
            (lower, Some(upper)) => write!(fmt, "[{}..={} bytes]", lower, upper),
        }
    }
}

fn remove_sensitive(headers: &HeaderMap<HeaderValue>) -> HeaderMap<HeaderValue> {
    let mut headers = headers.clone();
    for name in &[AUTHORIZATION, PROXY_AUTHORIZATION, COOKIE, SET_COOKIE] {
        if let Some(value) = headers.get_mut(name) {
            value.set_sensitive(true);
        }
    }

    headers
}

impl<B> fmt::Debug for HttpClient<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}
