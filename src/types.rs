//! Core types for query results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Variables passed to a query, keyed by name.
pub type Variables = serde_json::Map<String, Value>;

/// Lifecycle of the network request behind a result.
///
/// Codes follow the conventional numbering used by GraphQL clients, so
/// values coming off the wire map onto the enum unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NetworkStatus {
    /// First fetch in flight.
    #[default]
    Loading = 1,
    /// Variables changed, refetching with the new set.
    SetVariables = 2,
    /// `fetch_more` in flight.
    FetchMore = 3,
    /// `refetch` in flight.
    Refetch = 4,
    /// Polling fetch in flight.
    Poll = 6,
    /// No request in flight, last one succeeded.
    Ready = 7,
    /// No request in flight, last one failed.
    Error = 8,
}

impl NetworkStatus {
    /// Numeric status code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a numeric status code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(NetworkStatus::Loading),
            2 => Some(NetworkStatus::SetVariables),
            3 => Some(NetworkStatus::FetchMore),
            4 => Some(NetworkStatus::Refetch),
            6 => Some(NetworkStatus::Poll),
            7 => Some(NetworkStatus::Ready),
            8 => Some(NetworkStatus::Error),
            _ => None,
        }
    }

    /// True when the request is no longer in flight (success or failure).
    pub fn is_settled(self) -> bool {
        matches!(self, NetworkStatus::Ready | NetworkStatus::Error)
    }

    pub fn is_in_flight(self) -> bool {
        !self.is_settled()
    }
}

/// Where a query error originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failure (connection refused, HTTP 5xx, ...).
    Network,
    /// The server answered with errors in the response body.
    #[serde(rename = "graphql")]
    GraphQL,
    /// Failure raised on the client side (cache, bad input, ...).
    Client,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::GraphQL => write!(f, "graphql"),
            ErrorKind::Client => write!(f, "client"),
        }
    }
}

/// An error reported by the engine for a query.
///
/// Carried as data inside a [`QueryResult`]; listeners never see it raised.
#[derive(Clone, Debug, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct QueryError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl QueryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            extensions: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn graphql(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GraphQL, message)
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Client, message)
    }

    /// A stream completed without producing any chunk.
    pub fn empty_stream() -> Self {
        Self::client("delivery stream completed without a result")
    }
}

/// One query result at a point in time.
///
/// Compared by deep structural equality; treat as immutable once delivered.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// Result payload (None while nothing is known).
    #[serde(default)]
    pub data: Option<Value>,

    /// Error reported for the latest request, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryError>,

    pub network_status: NetworkStatus,

    pub loading: bool,

    /// True when `data` is incomplete (cache miss or pending chunks).
    #[serde(default)]
    pub partial: bool,
}

impl QueryResult {
    /// Initial loading result with no data.
    pub fn loading() -> Self {
        Self {
            data: None,
            error: None,
            network_status: NetworkStatus::Loading,
            loading: true,
            partial: true,
        }
    }

    /// Complete successful result.
    pub fn ready(data: Value) -> Self {
        Self {
            data: Some(data),
            error: None,
            network_status: NetworkStatus::Ready,
            loading: false,
            partial: false,
        }
    }

    /// Result that failed with no data.
    pub fn failed(error: QueryError) -> Self {
        Self {
            data: None,
            error: Some(error),
            network_status: NetworkStatus::Error,
            loading: false,
            partial: false,
        }
    }

    pub fn with_status(mut self, status: NetworkStatus) -> Self {
        self.loading = status.is_in_flight();
        self.network_status = status;
        self
    }

    pub fn with_partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    /// True when `data` holds something other than JSON null.
    pub fn has_data(&self) -> bool {
        matches!(&self.data, Some(v) if !v.is_null())
    }

    /// Copy of this result carrying `error`, with status forced to `Error`.
    /// Every other field is kept as-is.
    pub fn with_error(&self, error: QueryError) -> Self {
        Self {
            error: Some(error),
            network_status: NetworkStatus::Error,
            ..self.clone()
        }
    }
}

/// Options for loading an additional page of results.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchMoreOptions {
    /// Variables merged over the original query's variables.
    #[serde(default)]
    pub variables: Option<Variables>,

    /// Alternate document to fetch with (None = the original query).
    #[serde(default)]
    pub query: Option<String>,
}

impl FetchMoreOptions {
    pub fn variables(variables: Variables) -> Self {
        Self {
            variables: Some(variables),
            query: None,
        }
    }
}
