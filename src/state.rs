//! Current-result cell with normalization and equality-gated updates.
//!
//! The decision of whether an incoming result changes what listeners see is
//! kept pure here; fan-out lives in the coordinator.

use crate::types::{NetworkStatus, QueryError, QueryResult};
use tracing::trace;

/// True when `incoming` would blank out data that `previous` already holds.
///
/// Applies only once the request has settled, the previous result carries
/// data, and the incoming result carries none.
pub fn masks_stale_data(previous: &QueryResult, incoming: &QueryResult) -> bool {
    incoming.network_status.is_settled() && previous.has_data() && !incoming.has_data()
}

/// Normalize an incoming result against the previously delivered one.
pub fn normalize(previous: &QueryResult, mut incoming: QueryResult) -> QueryResult {
    if masks_stale_data(previous, &incoming) {
        incoming.data = previous.data.clone();
    }
    incoming
}

/// Single-writer cell holding the last delivered result.
#[derive(Clone, Debug, Default)]
pub struct ResultCell {
    current: QueryResult,
}

impl ResultCell {
    pub fn new(initial: QueryResult) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> &QueryResult {
        &self.current
    }

    /// Normalize `candidate` and store it if it differs from the current
    /// result. Returns true when the cell changed.
    pub fn try_update(&mut self, candidate: QueryResult) -> bool {
        let candidate = normalize(&self.current, candidate);
        if candidate == self.current {
            trace!(status = ?candidate.network_status, "ResultCell::try_update: unchanged");
            return false;
        }
        self.current = candidate;
        true
    }

    /// Fold `error` into the current result. Always changes the cell.
    pub fn apply_error(&mut self, error: QueryError) -> &QueryResult {
        self.current = self.current.with_error(error);
        debug_assert_eq!(self.current.network_status, NetworkStatus::Error);
        &self.current
    }
}
