use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434/api";

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ByteStream = Pin<Box<dyn Stream<Item = TransportResult<Bytes>> + Send>>;
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("could not connect to {endpoint}: {details}"))]
    ConnectionRefused {
        stage: &'static str,
        endpoint: String,
        details: String,
    },
    #[snafu(display("request to {endpoint} failed on `{stage}`: {details}"))]
    Request {
        stage: &'static str,
        endpoint: String,
        details: String,
    },
    #[snafu(display("server returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to read response body on `{stage}`: {details}"))]
    ReadBody {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to decode response body on `{stage}`: {source}"))]
    DecodeBody {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to build http client: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
}

impl TransportError {
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Self::ConnectionRefused { .. })
    }
}

/// HTTP seam between the chat client and the inference server.
///
/// Implementations must report a refused connection as
/// [`TransportError::ConnectionRefused`] so callers can tell "server not running"
/// apart from every other failure.
pub trait TransportAdapter: Send + Sync {
    fn endpoint(&self) -> &str;

    /// Sends `body` and returns the fully buffered JSON response.
    fn request_json<'a>(
        &'a self,
        path: &'a str,
        body: serde_json::Value,
    ) -> BoxFuture<'a, TransportResult<serde_json::Value>>;

    /// Sends `body` and returns the raw response body as it arrives.
    ///
    /// Dropping the returned stream closes the underlying connection.
    fn open_stream<'a>(
        &'a self,
        path: &'a str,
        body: serde_json::Value,
    ) -> BoxFuture<'a, TransportResult<ByteStream>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransportConfig {
    pub base_url: String,
    /// Upper bound for buffered requests. Streaming reads are not bounded by it.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl HttpTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "http-transport-build-client",
            })?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send(
        &self,
        path: &str,
        body: &serde_json::Value,
        timeout: Option<Duration>,
        stage: &'static str,
    ) -> TransportResult<reqwest::Response> {
        let url = self.url(path);
        let mut request = self.client.post(&url).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|error| classify_send_error(error, &self.config.base_url, stage))?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(error) => {
                    tracing::debug!(
                        url = %url,
                        error = %error,
                        "failed to read error response body"
                    );
                    String::new()
                }
            };
            tracing::warn!(
                url = %url,
                status = status.as_u16(),
                "inference server rejected request"
            );
            return StatusSnafu {
                stage,
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(response)
    }
}

impl TransportAdapter for HttpTransport {
    fn endpoint(&self) -> &str {
        &self.config.base_url
    }

    fn request_json<'a>(
        &'a self,
        path: &'a str,
        body: serde_json::Value,
    ) -> BoxFuture<'a, TransportResult<serde_json::Value>> {
        Box::pin(async move {
            let response = self
                .send(
                    path,
                    &body,
                    Some(self.config.request_timeout),
                    "request-json-send",
                )
                .await?;
            let payload = response
                .bytes()
                .await
                .map_err(|error| TransportError::ReadBody {
                    stage: "request-json-read",
                    details: error.to_string(),
                })?;

            serde_json::from_slice(&payload).context(DecodeBodySnafu {
                stage: "request-json-decode",
            })
        })
    }

    fn open_stream<'a>(
        &'a self,
        path: &'a str,
        body: serde_json::Value,
    ) -> BoxFuture<'a, TransportResult<ByteStream>> {
        Box::pin(async move {
            let response = self.send(path, &body, None, "open-stream-send").await?;
            let stream = response.bytes_stream().map(|fragment| {
                fragment.map_err(|error| TransportError::ReadBody {
                    stage: "open-stream-read-fragment",
                    details: error.to_string(),
                })
            });

            Ok(Box::pin(stream) as ByteStream)
        })
    }
}

fn classify_send_error(
    error: reqwest::Error,
    endpoint: &str,
    stage: &'static str,
) -> TransportError {
    // A local server that is not running shows up as a connect failure; DNS and
    // refused-port errors both mean the same thing to the user here.
    if error.is_connect() || source_chain_has_refused(&error) {
        return TransportError::ConnectionRefused {
            stage,
            endpoint: endpoint.to_string(),
            details: error.to_string(),
        };
    }

    TransportError::Request {
        stage,
        endpoint: endpoint.to_string(),
        details: error.to_string(),
    }
}

fn source_chain_has_refused(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(candidate) = current {
        if let Some(io_error) = candidate.downcast_ref::<std::io::Error>()
            && io_error.kind() == std::io::ErrorKind::ConnectionRefused
        {
            return true;
        }
        current = candidate.source();
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_trims_trailing_slashes() {
        let config = HttpTransportConfig::new(" http://localhost:11434/api/ ");
        assert_eq!(config.base_url, "http://localhost:11434/api");
    }

    #[test]
    fn url_joins_base_and_path_with_one_slash() {
        let transport = HttpTransport::new(HttpTransportConfig::new("http://localhost:11434/api"))
            .expect("build transport");
        assert_eq!(transport.url("chat"), "http://localhost:11434/api/chat");
        assert_eq!(transport.url("/chat"), "http://localhost:11434/api/chat");
    }

    #[test]
    fn refused_io_error_is_found_in_source_chain() {
        #[derive(Debug)]
        struct Wrapper(std::io::Error);

        impl std::fmt::Display for Wrapper {
            fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(formatter, "wrapped: {}", self.0)
            }
        }

        impl std::error::Error for Wrapper {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let refused = Wrapper(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        let reset = Wrapper(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(source_chain_has_refused(&refused));
        assert!(!source_chain_has_refused(&reset));
    }

    #[tokio::test]
    async fn closed_local_port_is_reported_as_connection_refused() {
        // Bind then drop a listener so the port is known to be closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe port");
        let port = listener.local_addr().expect("probe address").port();
        drop(listener);

        let transport = HttpTransport::new(HttpTransportConfig::new(format!(
            "http://127.0.0.1:{port}/api"
        )))
        .expect("build transport");
        let error = transport
            .request_json("chat", serde_json::json!({}))
            .await
            .expect_err("closed port must fail");

        assert!(error.is_connection_refused(), "unexpected error: {error}");
    }
}
