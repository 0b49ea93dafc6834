//! `RequestInfoSet` (§4.1): a dual-indexed membership of `RequestInfo`,
//! one index ordered by deadline for expiry scans, one keyed by
//! ⟨connection_key, correlation_id⟩ for O(1) point lookups. Every
//! mutator updates both; `debug_assert_consistent` is the cardinality
//! post-condition from spec §8.
//!
//! This type is plain, single-threaded data — like the original's
//! `std::set` pair, it is not internally synchronized. `RequestController`
//! guards one instance with its own lock, per the lock-ordering
//! discipline in spec §5.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use crate::ids::{ConnectionKey, CorrelationId};
use crate::request::info::RequestInfo;

/// Deadline-ordering key. Every tracked entry gets one, so the two
/// indices keep matching membership (spec §8: `|time-ordered| ==
/// |hash-ordered|`); an entry with no timeout sorts last behind a
/// `u128::MAX` sentinel, so the deadline scan still reaches real
/// deadlines first and only ever "skips" (never pops) the untracked
/// ones, per spec §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DeadlineKey {
    end_time_nanos: u128,
    connection_key: ConnectionKey,
    correlation_id: CorrelationId,
}

#[derive(Debug, Default)]
pub struct RequestInfoSet {
    by_key: HashMap<(ConnectionKey, CorrelationId), RequestInfo>,
    by_deadline: BTreeSet<DeadlineKey>,
    epoch: Instant,
}

impl RequestInfoSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_key: HashMap::new(),
            by_deadline: BTreeSet::new(),
            epoch: Instant::now(),
        }
    }

    fn deadline_key(&self, info: &RequestInfo) -> DeadlineKey {
        let end_time_nanos = info
            .end_time()
            .map_or(u128::MAX, |end| end.saturating_duration_since(self.epoch).as_nanos());
        DeadlineKey {
            end_time_nanos,
            connection_key: info.connection_key,
            correlation_id: info.correlation_id,
        }
    }

    /// Inserts a new request. Duplicate inserts (same key already
    /// present) are rejected silently, as spec §4.1 specifies.
    pub fn add(&mut self, info: RequestInfo) -> bool {
        let key = info.key();
        if self.by_key.contains_key(&key) {
            tracing::debug!(connection_key = %key.0, correlation_id = %key.1, "duplicate request insert rejected");
            return false;
        }
        self.by_deadline.insert(self.deadline_key(&info));
        self.by_key.insert(key, info);
        self.debug_assert_consistent();
        true
    }

    /// Removes by point key. Returns `false` if absent.
    pub fn erase(&mut self, connection_key: ConnectionKey, correlation_id: CorrelationId) -> bool {
        let key = (connection_key, correlation_id);
        let Some(info) = self.by_key.remove(&key) else {
            return false;
        };
        self.by_deadline.remove(&self.deadline_key(&info));
        self.debug_assert_consistent();
        true
    }

    #[must_use]
    pub fn find(&self, connection_key: ConnectionKey, correlation_id: CorrelationId) -> Option<&RequestInfo> {
        self.by_key.get(&(connection_key, correlation_id))
    }

    /// The request with the nearest deadline, if any tracked request
    /// actually has one. Untracked entries sort last behind a
    /// sentinel key, so the scan reaches real deadlines first and
    /// reports nothing once only untracked entries remain.
    #[must_use]
    pub fn front(&self) -> Option<&RequestInfo> {
        let dk = self.by_deadline.iter().next()?;
        let info = self.by_key.get(&(dk.connection_key, dk.correlation_id))?;
        info.end_time().is_some().then_some(info)
    }

    /// Removes every request belonging to `connection_key`, mobile or
    /// HMI. Used on app unregistration.
    pub fn remove_by_connection_key(&mut self, connection_key: ConnectionKey) -> usize {
        let keys: Vec<_> = self
            .by_key
            .keys()
            .filter(|(ck, _)| *ck == connection_key)
            .copied()
            .collect();
        let count = keys.len();
        for (ck, cid) in keys {
            self.erase(ck, cid);
        }
        count
    }

    /// Removes every mobile-originated request, regardless of app.
    /// Used on wake-up from low voltage (§4.2).
    pub fn remove_all_mobile(&mut self) -> usize {
        let keys: Vec<_> = self
            .by_key
            .iter()
            .filter(|(_, info)| info.request_type == crate::request::info::RequestType::Mobile)
            .map(|(k, _)| *k)
            .collect();
        let count = keys.len();
        for (ck, cid) in keys {
            self.erase(ck, cid);
        }
        count
    }

    /// Removes every HMI-originated request. Used on wake-up.
    pub fn remove_all_hmi(&mut self) -> usize {
        let keys: Vec<_> = self
            .by_key
            .iter()
            .filter(|(_, info)| info.request_type == crate::request::info::RequestType::Hmi)
            .map(|(k, _)| *k)
            .collect();
        let count = keys.len();
        for (ck, cid) in keys {
            self.erase(ck, cid);
        }
        count
    }

    /// All requests for one connection key, for diagnostics and for
    /// `TerminateAppRequests`'s caller to enumerate before bulk erase.
    #[must_use]
    pub fn by_connection_key(&self, connection_key: ConnectionKey) -> Vec<&RequestInfo> {
        self.by_key
            .values()
            .filter(|info| info.connection_key == connection_key)
            .collect()
    }

    /// Count of requests from `connection_key` with `start_time` within
    /// `window` of `now`, for the rate-limit gate's time-window counters.
    #[must_use]
    pub fn count_in_window(&self, connection_key: ConnectionKey, now: Instant, window: std::time::Duration) -> usize {
        self.by_key
            .values()
            .filter(|info| info.connection_key == connection_key)
            .filter(|info| info.request_type == crate::request::info::RequestType::Mobile)
            .filter(|info| now.saturating_duration_since(info.start_time) <= window)
            .count()
    }

    /// Count of requests from `connection_key` at a given hmi_level,
    /// within `window` of `now` — the NONE-level-specific counter.
    #[must_use]
    pub fn count_in_window_at_level(
        &self,
        connection_key: ConnectionKey,
        hmi_level: crate::model::HmiLevel,
        now: Instant,
        window: std::time::Duration,
    ) -> usize {
        self.by_key
            .values()
            .filter(|info| info.connection_key == connection_key && info.hmi_level == hmi_level)
            .filter(|info| info.request_type == crate::request::info::RequestType::Mobile)
            .filter(|info| now.saturating_duration_since(info.start_time) <= window)
            .count()
    }

    /// All tracked entries, in no particular order. Backs the bulk
    /// termination helpers in `RequestController` (spec §11: the
    /// original's `GetRequestsByConnectionKey`).
    pub fn iter(&self) -> impl Iterator<Item = &RequestInfo> {
        self.by_key.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Cardinality post-condition from spec §8: both indices track
    /// exactly the same membership, so their sizes must always match.
    fn debug_assert_consistent(&self) {
        #[cfg(debug_assertions)]
        {
            debug_assert_eq!(
                self.by_key.len(),
                self.by_deadline.len(),
                "RequestInfoSet index cardinality mismatch"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::request::info::RequestType;
    use std::time::Duration;

    fn mobile(ck: u32, cid: u32, timeout_ms: Option<u64>) -> RequestInfo {
        RequestInfo::new(
            ConnectionKey(ck),
            CorrelationId(cid),
            RequestType::Mobile,
            crate::model::HmiLevel::Full,
            timeout_ms.map(Duration::from_millis),
        )
    }

    #[test]
    fn add_returns_true_for_new_entry() {
        let mut set = RequestInfoSet::new();
        assert!(set.add(mobile(1, 1, Some(1000))));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let mut set = RequestInfoSet::new();
        assert!(set.add(mobile(1, 1, Some(1000))));
        assert!(!set.add(mobile(1, 1, Some(2000))));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn erase_missing_entry_returns_false() {
        let mut set = RequestInfoSet::new();
        assert!(!set.erase(ConnectionKey(1), CorrelationId(1)));
    }

    #[test]
    fn front_returns_nearest_deadline() {
        let mut set = RequestInfoSet::new();
        set.add(mobile(1, 1, Some(5000)));
        set.add(mobile(1, 2, Some(100)));
        set.add(mobile(1, 3, Some(2000)));

        let front = set.front().unwrap();
        assert_eq!(front.correlation_id, CorrelationId(2));
    }

    #[test]
    fn untracked_requests_never_appear_as_front() {
        let mut set = RequestInfoSet::new();
        set.add(mobile(1, 1, None));
        assert!(set.front().is_none());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_by_connection_key_clears_only_that_app() {
        let mut set = RequestInfoSet::new();
        set.add(mobile(1, 1, Some(1000)));
        set.add(mobile(1, 2, Some(1000)));
        set.add(mobile(2, 1, Some(1000)));

        let removed = set.remove_by_connection_key(ConnectionKey(1));
        assert_eq!(removed, 2);
        assert_eq!(set.len(), 1);
        assert!(set.find(ConnectionKey(2), CorrelationId(1)).is_some());
    }

    #[test]
    fn index_cardinality_matches_regardless_of_timeout() {
        let mut set = RequestInfoSet::new();
        set.add(mobile(1, 1, Some(1000)));
        set.add(mobile(1, 2, None));
        set.add(mobile(1, 3, Some(2000)));
        set.debug_assert_consistent();
        assert_eq!(set.by_deadline.len(), 3);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn count_in_window_honors_connection_key_and_window() {
        let mut set = RequestInfoSet::new();
        set.add(mobile(1, 1, Some(1000)));
        set.add(mobile(1, 2, Some(1000)));
        set.add(mobile(2, 3, Some(1000)));

        let now = Instant::now();
        assert_eq!(set.count_in_window(ConnectionKey(1), now, Duration::from_secs(10)), 2);
        assert_eq!(set.count_in_window(ConnectionKey(2), now, Duration::from_secs(10)), 1);
    }
}
