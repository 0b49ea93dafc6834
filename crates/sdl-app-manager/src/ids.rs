//! Newtype identifiers used throughout the core.
//!
//! Mirrors the 32-bit handles of the original C++ source
//! (`connection_key`, `correlation_id`, `hmi_app_id`) as distinct types
//! instead of bare `u32`, so a connection key can never be passed where
//! a correlation id is expected.

use std::fmt;

/// Handle assigned to a mobile-side application at registration.
/// Doubles as the "app_id" used across the request and state layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ConnectionKey(pub u32);

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ConnectionKey {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifier matching a request to its response. Unique per mobile
/// session; HMI-originated requests reuse the same space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct CorrelationId(pub u32);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CorrelationId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Process-wide unique id used on HMI-side messages for an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct HmiAppId(pub u32);

impl fmt::Display for HmiAppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for HmiAppId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Policy-table application identifier. Stable across reconnects and
/// ignition cycles, unlike `ConnectionKey`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct PolicyAppId(pub String);

impl fmt::Display for PolicyAppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PolicyAppId {
    fn from(v: &str) -> Self {
        Self(v.to_owned())
    }
}

impl From<String> for PolicyAppId {
    fn from(v: String) -> Self {
        Self(v)
    }
}

/// Opaque device handle, mapped to a MAC address via the message router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct DeviceHandle(pub u32);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DeviceHandle {
    fn from(v: u32) -> Self {
        Self(v)
    }
}
