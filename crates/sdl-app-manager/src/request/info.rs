//! `RequestInfo` (§3, §4.1): the unit tracked by `RequestInfoSet`.

use std::time::{Duration, Instant};

use crate::ids::{ConnectionKey, CorrelationId};
use crate::model::HmiLevel;

/// Which side originated the tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// `app_id` (connection_key) is the originating mobile app.
    Mobile,
    /// HMI-originated; `connection_key` is the sentinel `ConnectionKey(0)`.
    Hmi,
    /// An asynchronous one-shot HMI-to-mobile notification. Tracked for
    /// expiry like any other request but excluded from rate-limit
    /// counting (spec §4.2).
    Notification,
}

/// One tracked in-flight request. `timeout == None` means "not tracked
/// for expiry" — the entry still participates in point lookups but the
/// deadline timer skips it forever (spec §3).
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub connection_key: ConnectionKey,
    pub correlation_id: CorrelationId,
    pub request_type: RequestType,
    pub hmi_level: HmiLevel,
    pub start_time: Instant,
    pub timeout: Option<Duration>,
}

impl RequestInfo {
    #[must_use]
    pub fn new(
        connection_key: ConnectionKey,
        correlation_id: CorrelationId,
        request_type: RequestType,
        hmi_level: HmiLevel,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            connection_key,
            correlation_id,
            request_type,
            hmi_level,
            start_time: Instant::now(),
            timeout,
        }
    }

    /// The point-lookup key. Corresponds to the original's
    /// `(app_id << 32) | correlation_id` hash, kept as a tuple instead
    /// of a packed integer since Rust has no need to pack it.
    #[must_use]
    pub fn key(&self) -> (ConnectionKey, CorrelationId) {
        (self.connection_key, self.correlation_id)
    }

    #[must_use]
    pub fn end_time(&self) -> Option<Instant> {
        self.timeout.map(|t| self.start_time + t)
    }

    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.end_time().is_some_and(|end| now >= end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_request_never_expires() {
        let info = RequestInfo::new(
            ConnectionKey(1),
            CorrelationId(1),
            RequestType::Mobile,
            HmiLevel::Full,
            None,
        );
        assert!(info.end_time().is_none());
        assert!(!info.is_expired_at(Instant::now() + Duration::from_secs(1_000_000)));
    }

    #[test]
    fn timed_request_expires_after_its_duration() {
        let info = RequestInfo::new(
            ConnectionKey(1),
            CorrelationId(1),
            RequestType::Mobile,
            HmiLevel::Full,
            Some(Duration::from_millis(10)),
        );
        assert!(!info.is_expired_at(info.start_time));
        assert!(info.is_expired_at(info.start_time + Duration::from_millis(10)));
    }
}
