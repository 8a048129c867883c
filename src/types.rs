//! Core types for InfluxQL query responses and results.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::value::Value;

/// One row of a series: positional values matching the series' `columns`.
pub type Row = Vec<Value>;

/// One top-level JSON document of a (possibly chunked) query response.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ResponseDocument {
    /// One block per statement.
    #[serde(default)]
    pub results: Vec<ResultBlock>,
    /// Request-level error, e.g. a query that failed to parse.
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of one statement within a response document.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ResultBlock {
    /// Zero-based position of the statement in the query.
    #[serde(default)]
    pub statement_id: u64,
    /// Series of the statement. Absent when the statement matched nothing.
    #[serde(default)]
    pub series: Option<Vec<Series>>,
    /// Statement-level error.
    #[serde(default)]
    pub error: Option<String>,
    /// More chunks follow for this statement.
    #[serde(default)]
    pub partial: bool,
}

/// A named series of rows.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Series {
    /// Measurement name.
    #[serde(default)]
    pub name: String,
    /// Tag set when the query groups by tags.
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
    /// Column names, in row order.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub columns: Vec<String>,
    /// Rows in arrival order.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub values: Vec<Row>,
    /// More chunks follow for this series.
    #[serde(default)]
    pub partial: bool,
}

/// Reads `null` as an empty list.
fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ResponseDocument {
    /// Returns the first error reported in this document, if any.
    pub fn error(&self) -> Option<Error> {
        if let Some(message) = &self.error {
            return Some(Error::Query {
                message: message.clone(),
                statement_id: None,
            });
        }
        self.results.iter().find_map(|block| {
            block.error.as_ref().map(|message| Error::Query {
                message: message.clone(),
                statement_id: Some(block.statement_id),
            })
        })
    }

    /// Number of rows across all blocks and series.
    pub fn row_count(&self) -> usize {
        self.results
            .iter()
            .filter_map(|block| block.series.as_ref())
            .flatten()
            .map(|series| series.values.len())
            .sum()
    }

    /// Consumes the document, yielding every row of every series in document
    /// order. Fails if the server reported an error in this document.
    pub fn into_rows(self) -> Result<impl Iterator<Item = Row>> {
        if let Some(err) = self.error() {
            return Err(err);
        }
        Ok(self
            .results
            .into_iter()
            .filter_map(|block| block.series)
            .flatten()
            .flat_map(|series| series.values))
    }
}

/// Counters collected while executing one query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryStats {
    /// Response documents (chunks) decoded.
    pub documents: usize,
    /// Rows handed to the row parser.
    pub rows: usize,
    /// Rows the row parser discarded.
    pub discarded: usize,
}

/// Records produced by one query execution.
///
/// No ordering is promised across series or chunks.
#[derive(Clone, Debug)]
pub struct QueryResult<T> {
    records: Vec<T>,
    stats: QueryStats,
}

impl<T> QueryResult<T> {
    pub(crate) fn new(records: Vec<T>, stats: QueryStats) -> Self {
        Self { records, stats }
    }

    /// Parsed records.
    pub fn records(&self) -> &[T] {
        &self.records
    }

    /// Takes ownership of the parsed records.
    pub fn into_records(self) -> Vec<T> {
        self.records
    }

    /// Counters for this execution.
    pub fn stats(&self) -> QueryStats {
        self.stats
    }

    /// Number of parsed records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no records were produced.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over the parsed records.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.records.iter()
    }
}

impl<T> IntoIterator for QueryResult<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a QueryResult<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
