//! The query engine seen from the coordinator.
//!
//! The engine owns fetching, caching and re-execution. The coordinator only
//! reads its current result, subscribes to it, and forwards refetch and
//! fetch-more requests.

use crate::promise::Promise;
use crate::stream::{DeliveryStream, Observer, Subscription};
use crate::types::{FetchMoreOptions, QueryResult, Variables};

/// A live query as exposed by its execution engine.
pub trait QueryEngine: Send + Sync {
    /// Last known result (cache or previous delivery). Must not block.
    fn current_result(&self) -> QueryResult;

    /// Register an observer for results and errors of this query.
    fn subscribe(&self, observer: Observer<QueryResult>) -> Subscription;

    /// Stream for the request currently in flight.
    ///
    /// Must be `Some` once `subscribe` has returned.
    fn delivery_stream(&self) -> Option<DeliveryStream<QueryResult>>;

    /// Re-run the query, optionally with new variables.
    fn refetch(&self, variables: Option<Variables>) -> Promise<QueryResult>;

    /// Load an additional page of results.
    fn fetch_more(&self, options: FetchMoreOptions) -> Promise<QueryResult>;

    /// Whether the query document asks for incremental delivery.
    fn is_incremental(&self) -> bool;
}

const INCREMENTAL_DIRECTIVES: &[&str] = &["defer", "stream"];

const BLOCK_QUOTE: &[u8] = b"\"\"\"";
const ESCAPED_BLOCK_QUOTE: &[u8] = b"\\\"\"\"";

/// True if `document` uses an `@defer` or `@stream` directive.
///
/// Directives inside comments and string literals are ignored.
pub fn has_incremental_directive(document: &str) -> bool {
    let bytes = document.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'"' if bytes[i..].starts_with(BLOCK_QUOTE) => {
                i += 3;
                while i < bytes.len() && !bytes[i..].starts_with(BLOCK_QUOTE) {
                    // \""" is an escaped delimiter inside a block string
                    if bytes[i..].starts_with(ESCAPED_BLOCK_QUOTE) {
                        i += ESCAPED_BLOCK_QUOTE.len();
                    } else {
                        i += 1;
                    }
                }
                i += 3;
            }
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'@' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                if INCREMENTAL_DIRECTIVES.contains(&&document[start..end]) {
                    return true;
                }
                i = end;
            }
            _ => i += 1,
        }
    }

    false
}
