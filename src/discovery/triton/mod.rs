mod config;
mod response;

use bytes::Bytes;
use framework::context::{Context, ContextError};
use framework::discovery::TargetGroup;
use framework::http::{HttpClient, HttpError};
use http::{Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};

pub use config::{Config, ConfigError, ServerType};

/// The class of a refresh failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing configuration, it won't go away by retrying.
    Config,
    /// The discovery endpoint is unreachable, or the request is cancelled.
    Network,
    /// The endpoint responded, but not with a usable response.
    Protocol,
    /// The response body is not the expected JSON.
    Decode,
}

fn response_name(server_type: &ServerType) -> &'static str {
    match server_type {
        ServerType::Vm => "discovery",
        ServerType::Gz => "gz discovery",
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("build http client failed, {0}")]
    Http(#[source] HttpError),

    #[error("an error occurred when requesting targets from the discovery endpoint: {0}")]
    Request(#[source] HttpError),
    #[error("an error occurred when requesting targets from the discovery endpoint: {0}")]
    Cancelled(#[from] ContextError),

    // The message doesn't tell the status code, an endpoint which is down and
    // a plain HTTP server listening on the port look the same.
    #[error("an error occurred when requesting targets from the discovery endpoint")]
    UnexpectedStatus(StatusCode),
    #[error("an error occurred when reading the response body: {0}")]
    ReadBody(#[source] HttpError),

    #[error(
        "an error occurred unmarshaling the {} response json: {err}",
        response_name(.server_type)
    )]
    Decode {
        server_type: ServerType,
        #[source]
        err: serde_json::Error,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::Http(_) => ErrorKind::Config,
            Error::Request(_) | Error::Cancelled(_) => ErrorKind::Network,
            Error::UnexpectedStatus(_) | Error::ReadBody(_) => ErrorKind::Protocol,
            Error::Decode { .. } => ErrorKind::Decode,
        }
    }
}

/// Discovery retrieves scrape targets from a Triton discovery endpoint,
/// one [`TargetGroup`] per refresh.
///
/// It holds no state between refreshes, so `refresh` can be called
/// concurrently, the connection pool of the HTTP client is shared.
#[derive(Clone, Debug)]
pub struct Discovery {
    server_type: ServerType,
    dns_suffix: String,
    port: u16,

    source: String,
    uri: Uri,
    client: HttpClient,
}

impl Discovery {
    /// Validate the config and build the HTTP client, nothing is sent yet.
    pub fn new(config: &Config) -> Result<Self, Error> {
        config.validate()?;

        let client = HttpClient::new(config.tls.as_ref()).map_err(Error::Http)?;

        Self::with_client(config, client)
    }

    /// Like [`Discovery::new`], but requests are sent by `client`.
    pub fn with_client(config: &Config, client: HttpClient) -> Result<Self, Error> {
        config.validate()?;

        let server_type = config.server_type()?;
        let source = config.discovery_url(server_type);
        let uri = source
            .parse::<Uri>()
            .map_err(|err| ConfigError::InvalidUrl {
                url: source.clone(),
                reason: err.to_string(),
            })?;

        Ok(Discovery {
            server_type,
            dns_suffix: config.dns_suffix.clone(),
            port: config.port,
            source,
            uri,
            client,
        })
    }

    #[inline]
    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// The requested URL, which is the source of returned target groups too.
    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Fetch the targets and build one target group from them.
    ///
    /// The request is abandoned once `cx` is cancelled or its deadline
    /// elapses. Nothing is returned on failure, an empty target group means
    /// there are no targets at all.
    pub async fn refresh(&self, cx: &Context) -> Result<Vec<TargetGroup>, Error> {
        let data = self.fetch(cx).await?;

        let group = match self.server_type {
            ServerType::Vm => {
                response::process_vm(&data, &self.source, &self.dns_suffix, self.port)
            }
            ServerType::Gz => {
                response::process_gz(&data, &self.source, &self.dns_suffix, self.port)
            }
        }
        .map_err(|err| Error::Decode {
            server_type: self.server_type,
            err,
        })?;

        debug!(
            message = "triton targets discovered",
            source = %self.source,
            targets = group.len(),
        );

        Ok(vec![group])
    }

    async fn fetch(&self, cx: &Context) -> Result<Bytes, Error> {
        let req = Request::get(self.uri.clone())
            .body(Full::<Bytes>::default())
            .map_err(|err| Error::Request(err.into()))?;

        let resp = cx.run(self.client.send(req)).await?.map_err(Error::Request)?;

        // the body is always read to the end, so the connection can be reused
        let (parts, incoming) = resp.into_parts();
        let collected = cx.run(incoming.collect()).await?;

        if !parts.status.is_success() {
            debug!(
                message = "unexpected status code",
                status = %parts.status,
                source = %self.source,
            );

            return Err(Error::UnexpectedStatus(parts.status));
        }

        collected
            .map(|body| body.to_bytes())
            .map_err(|err| Error::ReadBody(HttpError::from(err)))
    }
}

#[cfg(test)]
mod tests {
    use framework::tls::TlsConfig;

    use super::*;

    fn config() -> Config {
        let identity = testify::tls::self_signed(&["localhost"]);
        let ca = testify::temp::temp_file();
        std::fs::write(&ca, &identity.cert_pem).unwrap();

        Config {
            account: "testAccount".into(),
            dns_suffix: "triton.example.com".into(),
            endpoint: "127.0.0.1".into(),
            tls: Some(TlsConfig {
                ca: Some(ca),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn new() {
        let discovery = Discovery::new(&config()).unwrap();
        assert_eq!(discovery.server_type(), ServerType::Vm);
        assert_eq!(discovery.source(), "https://127.0.0.1:9163/v1/discover");

        let discovery = Discovery::new(&Config {
            server_type: "gz".into(),
            groups: vec!["ignored".into()],
            ..config()
        })
        .unwrap();
        assert_eq!(discovery.server_type(), ServerType::Gz);
        assert!(discovery.source().ends_with("/v1/gz/discover?groups=ignored"));
    }

    #[test]
    fn new_with_invalid_config() {
        let err = Discovery::new(&Config {
            server_type: "container".into(),
            ..config()
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(matches!(err, Error::Config(ConfigError::ServerType(_))));

        let err = Discovery::new(&Config {
            endpoint: "bad host".into(),
            ..config()
        })
        .unwrap_err();
        assert!(
            matches!(err, Error::Config(ConfigError::InvalidUrl { .. })),
            "{err:?}"
        );
    }

    #[test]
    fn new_with_invalid_tls() {
        let err = Discovery::new(&Config {
            tls: Some(TlsConfig {
                ca: Some("/path/not/exists/ca.pem".into()),
                ..Default::default()
            }),
            ..config()
        })
        .unwrap_err();

        assert!(matches!(err, Error::Http(_)), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn error_messages() {
        // the status code is not part of the message
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            let err = Error::UnexpectedStatus(status);
            assert_eq!(
                err.to_string(),
                "an error occurred when requesting targets from the discovery endpoint"
            );
            assert_eq!(err.kind(), ErrorKind::Protocol);
        }

        let err = Error::Cancelled(ContextError::Cancelled);
        assert_eq!(
            err.to_string(),
            "an error occurred when requesting targets from the discovery endpoint: context canceled"
        );
        assert_eq!(err.kind(), ErrorKind::Network);

        let err = Error::Decode {
            server_type: ServerType::Vm,
            err: serde_json::from_str::<()>("{").unwrap_err(),
        };
        assert!(
            err.to_string()
                .starts_with("an error occurred unmarshaling the discovery response json: ")
        );
        assert_eq!(err.kind(), ErrorKind::Decode);

        let err = Error::Decode {
            server_type: ServerType::Gz,
            err: serde_json::from_str::<()>("{").unwrap_err(),
        };
        assert!(
            err.to_string()
                .starts_with("an error occurred unmarshaling the gz discovery response json: ")
        );
    }

    #[tokio::test]
    async fn refresh_cancelled() {
        let discovery = Discovery::new(&config()).unwrap();
        let cx = Context::new();
        cx.cancel();

        let err = discovery.refresh(&cx).await.unwrap_err();
        assert!(
            matches!(err, Error::Cancelled(ContextError::Cancelled)),
            "{err:?}"
        );
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
