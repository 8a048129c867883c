//! Chunked InfluxQL query client.
//!
//! This module provides the main `Client` type for executing chunked queries
//! against the `/query` endpoint of an InfluxDB 1.x compatible server.

use std::io;
use std::panic;
use std::time::Duration;

use base64::Engine;
use futures::TryStreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, warn};

use crate::config::ClientConfig;
use crate::decoder::ResponseDecoder;
use crate::error::{BoxError, Error, Result};
use crate::types::{QueryResult, QueryStats, Row};

/// InfluxDB 1.x chunked query client.
///
/// A `Client` holds one connection pool for its whole lifetime and can run
/// any number of queries; clones share the pool. Each query is streamed
/// (`chunked=true`) and every row is handed to a caller-supplied parser as
/// soon as its chunk arrives, so the raw response is never buffered whole.
///
/// # Example
///
/// ```ignore
/// use influxql_stream::{CancellationToken, Client, ClientConfig, Value};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::new("http://localhost:8086", "telemetry")
///         .with_credentials("reader", "secret");
///     let client = Client::new(config)?;
///     let cancel = CancellationToken::new();
///
///     let result = client
///         .execute(
///             || "SELECT time, value FROM cpu WHERE time > now() - 1h".to_string(),
///             |row: Vec<Value>| -> Result<Option<(String, f64)>, String> {
///                 let time = row.first().and_then(Value::string);
///                 let value = row.get(1).and_then(Value::as_f64);
///                 Ok(time.zip(value))
///             },
///             &cancel,
///         )
///         .await?;
///
///     println!("{} points", result.len());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    database: String,
    authorization: Option<HeaderValue>,
    timeout: Duration,
    chunk_size: Option<u32>,
    epoch: Option<String>,
}

/// Body of an error response.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl Client {
    /// Create a new client with its own connection pool.
    ///
    /// Responses compressed with gzip or deflate are decompressed
    /// transparently.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder().gzip(true).deflate(true).build()?;
        Self::with_http_client(http, config)
    }

    /// Create a new client with a custom reqwest client.
    ///
    /// This allows you to configure proxies, TLS settings, pool limits, etc.
    /// The request timeout and credentials still come from `config`.
    ///
    /// `Accept-Encoding: gzip, deflate` is sent only if `http` was built with
    /// gzip and deflate enabled, as [`Client::new`] does. A client built with
    /// `no_gzip()` or `no_deflate()` receives uncompressed responses.
    pub fn with_http_client(http: reqwest::Client, config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let base_url = Url::parse(config.url.trim())
            .map_err(|e| Error::Config(format!("invalid url '{}': {}", config.url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("url '{}' cannot be a base", config.url)));
        }

        let authorization = config
            .credentials()
            .map(|(username, password)| basic_auth(username, password))
            .transpose()?;

        Ok(Self {
            http,
            base_url,
            database: config.database,
            authorization,
            timeout: config.timeout,
            chunk_size: config.chunk_size,
            epoch: config.epoch,
        })
    }

    /// Get the base URL.
    pub fn url(&self) -> &Url {
        &self.base_url
    }

    /// Get the database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Get the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build the `/query` URL for a query.
    pub fn query_url(&self, query: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("query");
        }
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("db", &self.database)
                .append_pair("q", query)
                .append_pair("chunked", "true");
            if let Some(size) = self.chunk_size {
                pairs.append_pair("chunk_size", &size.to_string());
            }
            if let Some(epoch) = &self.epoch {
                pairs.append_pair("epoch", epoch);
            }
        }
        url
    }

    /// Execute a query and collect the records produced by `row_parser`.
    ///
    /// `query_builder` is called once to produce the query text. Every row of
    /// every chunk is passed to `row_parser` as it streams in; `Ok(None)`
    /// discards the row, `Err` fails the whole query.
    ///
    /// The query stops with [`Error::Cancelled`] as soon as `cancel` is
    /// triggered, and with [`Error::Timeout`] when the configured timeout
    /// elapses. Any other failure cancels the remaining read and is returned
    /// as is. Records parsed before a failure are dropped.
    ///
    /// The read loop runs on a spawned tokio task, so this must be called from
    /// within a tokio runtime. Dropping the returned future cancels the query.
    pub async fn execute<T, Q, P, E>(
        &self,
        query_builder: Q,
        row_parser: P,
        cancel: &CancellationToken,
    ) -> Result<QueryResult<T>>
    where
        Q: FnOnce() -> String,
        P: FnMut(Row) -> std::result::Result<Option<T>, E> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
        T: Send + 'static,
    {
        self.run(query_builder(), row_parser, cancel).await
    }

    /// Like [`Client::execute`], with extra filter text appended to the query.
    ///
    /// A blank filter adds nothing.
    pub async fn execute_with_filter<T, Q, F, P, E>(
        &self,
        query_builder: Q,
        filter_builder: F,
        row_parser: P,
        cancel: &CancellationToken,
    ) -> Result<QueryResult<T>>
    where
        Q: FnOnce() -> String,
        F: FnOnce() -> String,
        P: FnMut(Row) -> std::result::Result<Option<T>, E> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
        T: Send + 'static,
    {
        let query = compose_query(query_builder(), &filter_builder());
        self.run(query, row_parser, cancel).await
    }

    async fn run<T, P, E>(
        &self,
        query: String,
        row_parser: P,
        cancel: &CancellationToken,
    ) -> Result<QueryResult<T>>
    where
        P: FnMut(Row) -> std::result::Result<Option<T>, E> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
        T: Send + 'static,
    {
        let url = self.query_url(&query);
        let span = debug_span!("influxql_query", database = %self.database);
        debug!(parent: &span, %url, "executing query");

        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .timeout(self.timeout);
        if let Some(value) = &self.authorization {
            request = request.header(AUTHORIZATION, value.clone());
        }

        // Linked to the caller's token; also cancelled by worker failures and
        // when this future is dropped.
        let token = cancel.child_token();
        let guard = token.clone().drop_guard();

        let worker = QueryWorker {
            request,
            token,
            timeout: self.timeout,
        };
        let joined = tokio::spawn(worker.run(row_parser).instrument(span)).await;
        guard.disarm();

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
            Err(_) => Err(Error::Cancelled),
        }
    }
}

/// One query execution, owned by the spawned task.
struct QueryWorker {
    request: RequestBuilder,
    token: CancellationToken,
    timeout: Duration,
}

impl QueryWorker {
    async fn run<T, P, E>(self, row_parser: P) -> Result<QueryResult<T>>
    where
        P: FnMut(Row) -> std::result::Result<Option<T>, E>,
        E: Into<BoxError>,
    {
        let token = self.token.clone();
        let timeout = self.timeout;
        let deadline = Instant::now() + timeout;
        let result = match tokio::time::timeout_at(deadline, self.stream_rows(row_parser, deadline)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        };
        if let Err(e) = &result {
            if !e.is_cancellation() {
                warn!(error = %e, "query failed, abandoning the response stream");
            }
            token.cancel();
        }
        result
    }

    /// Sends the request and feeds every row to `row_parser`. The response
    /// is owned here, so the connection is released when this returns.
    ///
    /// Rows are parsed without yielding, so `deadline` is checked alongside
    /// the token before each row and once more at the end of the body.
    async fn stream_rows<T, P, E>(self, mut row_parser: P, deadline: Instant) -> Result<QueryResult<T>>
    where
        P: FnMut(Row) -> std::result::Result<Option<T>, E>,
        E: Into<BoxError>,
    {
        let QueryWorker {
            request,
            token,
            timeout,
        } = self;

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            response = request.send() => response.map_err(|e| transport_error(e, timeout))?,
        };
        debug!(status = %response.status(), "response headers received");
        let response = check_status(response, &token, timeout).await?;

        let body = response.bytes_stream().map_err(into_io_error);
        let mut decoder = ResponseDecoder::new(StreamReader::new(body));
        let mut records = Vec::new();
        let mut stats = QueryStats::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                next = decoder.next_document() => next.map_err(|e| stream_error(e, timeout))?,
            };
            let Some(document) = next else { break };
            stats.documents += 1;

            for row in document.into_rows()? {
                ensure_running(&token, deadline, timeout)?;
                stats.rows += 1;
                match row_parser(row) {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => stats.discarded += 1,
                    Err(e) => return Err(Error::RowParser(e.into())),
                }
            }
            debug!(documents = stats.documents, rows = stats.rows, "chunk decoded");
        }

        ensure_running(&token, deadline, timeout)?;
        debug!(
            documents = stats.documents,
            rows = stats.rows,
            discarded = stats.discarded,
            bytes = decoder.bytes_read(),
            "query complete"
        );
        Ok(QueryResult::new(records, stats))
    }
}

/// Fails with [`Error::Cancelled`] or [`Error::Timeout`] once either applies.
fn ensure_running(token: &CancellationToken, deadline: Instant, timeout: Duration) -> Result<()> {
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }
    if Instant::now() >= deadline {
        return Err(Error::Timeout(timeout));
    }
    Ok(())
}

/// Turns a non-success response into [`Error::Status`].
async fn check_status(response: Response, token: &CancellationToken, timeout: Duration) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(Error::Cancelled),
        body = response.text() => body.map_err(|e| transport_error(e, timeout))?,
    };
    Err(Error::Status {
        status,
        message: error_message(status, &body),
    })
}

fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.error;
    }
    let body = body.trim();
    if body.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body.to_string()
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> Error {
    if e.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::Http(e)
    }
}

fn into_io_error(e: reqwest::Error) -> io::Error {
    let kind = if e.is_timeout() {
        io::ErrorKind::TimedOut
    } else {
        io::ErrorKind::Other
    };
    io::Error::new(kind, e)
}

/// Body read timeouts surface from the decoder as I/O errors.
fn stream_error(e: Error, timeout: Duration) -> Error {
    match e {
        Error::Io(io) if io.kind() == io::ErrorKind::TimedOut => Error::Timeout(timeout),
        other => other,
    }
}

fn compose_query(query: String, filter: &str) -> String {
    let filter = filter.trim();
    if filter.is_empty() {
        query
    } else {
        format!("{} {}", query.trim_end(), filter)
    }
}

fn basic_auth(username: &str, password: &str) -> Result<HeaderValue> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password));
    let mut value = HeaderValue::from_str(&format!("Basic {}", encoded))
        .map_err(|e| Error::Config(format!("invalid credentials: {}", e)))?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> Client {
        Client::new(ClientConfig::new(url, "telemetry")).unwrap()
    }

    #[test]
    fn test_query_url() {
        let url = client("http://localhost:8086").query_url("SELECT * FROM cpu");
        assert_eq!(
            url.as_str(),
            "http://localhost:8086/query?db=telemetry&q=SELECT+*+FROM+cpu&chunked=true"
        );
    }

    #[test]
    fn test_query_url_encodes_query() {
        let query = r#"SELECT mean("value") FROM "cpu" WHERE host = 'a&b' AND time > now() - 1h"#;
        let url = client("http://localhost:8086").query_url(query);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("db".to_string(), "telemetry".to_string()));
        assert_eq!(pairs[1], ("q".to_string(), query.to_string()));
        assert_eq!(pairs[2], ("chunked".to_string(), "true".to_string()));
    }

    #[test]
    fn test_query_url_keeps_path_prefix() {
        assert_eq!(client("http://proxy/influx").query_url("q").path(), "/influx/query");
        assert_eq!(client("http://proxy/influx/").query_url("q").path(), "/influx/query");
    }

    #[test]
    fn test_query_url_optional_params() {
        let config = ClientConfig::new("http://localhost:8086", "telemetry")
            .with_chunk_size(10_000)
            .with_epoch("ms");
        let url = Client::new(config).unwrap().query_url("SHOW DATABASES");
        assert!(url.as_str().ends_with("&chunked=true&chunk_size=10000&epoch=ms"));
    }

    #[test]
    fn test_invalid_url() {
        let err = Client::new(ClientConfig::new("not a url", "db")).err().unwrap();
        assert!(matches!(err, Error::Config(_)));

        let err = Client::new(ClientConfig::new("mailto:ops@example.com", "db")).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_basic_auth_header() {
        let config = ClientConfig::new("http://localhost:8086", "db").with_credentials("user", "pass");
        let client = Client::new(config).unwrap();
        let value = client.authorization.unwrap();
        assert_eq!(value.to_str().unwrap(), "Basic dXNlcjpwYXNz");
        assert!(value.is_sensitive());

        assert!(client_without_auth().authorization.is_none());
    }

    fn client_without_auth() -> Client {
        let config = ClientConfig::new("http://localhost:8086", "db").with_credentials("", " ");
        Client::new(config).unwrap()
    }

    #[test]
    fn test_compose_query() {
        assert_eq!(compose_query("SELECT * FROM cpu".to_string(), ""), "SELECT * FROM cpu");
        assert_eq!(compose_query("SELECT * FROM cpu".to_string(), "  "), "SELECT * FROM cpu");
        assert_eq!(
            compose_query("SELECT * FROM cpu WHERE time > now() - 1h ".to_string(), "AND host = 'a'"),
            "SELECT * FROM cpu WHERE time > now() - 1h AND host = 'a'"
        );
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            error_message(StatusCode::UNAUTHORIZED, r#"{"error":"authorization failed"}"#),
            "authorization failed"
        );
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, "upstream down\n"), "upstream down");
        assert_eq!(error_message(StatusCode::NOT_FOUND, ""), "Not Found");
    }

    #[test]
    fn test_ensure_running() {
        let token = CancellationToken::new();
        let timeout = Duration::from_secs(1);
        let later = Instant::now() + Duration::from_secs(60);
        assert!(ensure_running(&token, later, timeout).is_ok());

        let passed = Instant::now() - Duration::from_millis(1);
        let err = ensure_running(&token, passed, timeout).unwrap_err();
        assert!(matches!(err, Error::Timeout(d) if d == timeout));

        token.cancel();
        assert!(matches!(ensure_running(&token, later, timeout), Err(Error::Cancelled)));
    }

    #[test]
    fn test_stream_error_maps_timeouts() {
        let e = stream_error(Error::Io(io::Error::from(io::ErrorKind::TimedOut)), Duration::from_secs(3));
        assert!(matches!(e, Error::Timeout(d) if d == Duration::from_secs(3)));

        let e = stream_error(Error::Io(io::Error::from(io::ErrorKind::ConnectionReset)), Duration::from_secs(3));
        assert!(matches!(e, Error::Io(_)));
    }
}
