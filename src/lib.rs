//! # influxql-stream
//!
//! Async client for chunked InfluxQL queries against InfluxDB 1.x.
//!
//! ## Why?
//!
//! With `chunked=true` the `/query` endpoint streams a large result as a
//! sequence of complete JSON documents written back to back on one response
//! body. Buffering the body and parsing it as a single JSON value fails on
//! the second document and holds the whole result in memory twice.
//!
//! `influxql-stream` frames the body into documents as bytes arrive and hands
//! each row straight to your parser:
//!
//! ```ignore
//! let result = client
//!     .execute(|| query, |row| parse_point(row), &cancel)
//!     .await?;
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use influxql_stream::{CancellationToken, Client, ClientConfig, Row};
//!
//! #[derive(Debug)]
//! struct Reading {
//!     time: chrono::DateTime<chrono::FixedOffset>,
//!     host: String,
//!     value: f64,
//! }
//!
//! fn parse_reading(row: Row) -> Result<Option<Reading>, String> {
//!     let time = row[0].as_time().ok_or("bad time")?;
//!     // Rows without a value are skipped.
//!     let Some(value) = row[2].as_f64() else { return Ok(None) };
//!     let host = row[1].string().unwrap_or_default();
//!     Ok(Some(Reading { time, host, value }))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(ClientConfig::from_env()?)?;
//!     let cancel = CancellationToken::new();
//!
//!     let readings = client
//!         .execute_with_filter(
//!             || "SELECT time, host, value FROM cpu WHERE time > now() - 1d".to_string(),
//!             || "AND region = 'eu'".to_string(),
//!             parse_reading,
//!             &cancel,
//!         )
//!         .await?;
//!
//!     for reading in &readings {
//!         println!("{:?}", reading);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Incremental**: rows are parsed as chunks arrive, whatever the transport
//!   chunking
//! - **Cancellable**: a `CancellationToken`, the request timeout, or any
//!   failure mid-stream stops the query and releases the connection
//! - **Fail fast**: a broken stream fails the whole call, never a silent
//!   partial result
//! - **Raw values**: timestamps stay strings until your parser asks for them

pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod types;
pub mod value;

// Re-export main types at crate root
pub use client::Client;
pub use config::ClientConfig;
pub use error::{BoxError, Error, Result};
pub use types::{QueryResult, QueryStats, ResponseDocument, ResultBlock, Row, Series};
pub use value::Value;

// Re-export the decoder for advanced use cases
pub use decoder::ResponseDecoder;

pub use tokio_util::sync::CancellationToken;
