//! The shared `ApplicationSet` (spec §4.6, §5): applications keyed by
//! connection_key under a single reader/writer lock, exposed only
//! through a `DataAccessor` so a caller can never read without holding
//! the lock (spec §4.6: "a pair of <reference, lock guard> that
//! prevents unlocked reads").
//!
//! Spec §5 calls for exactly one lock over the application set, shared
//! by `ApplicationManager`, `StateController`, and `ResumeController`
//! — all three need to walk every application (focus conflict
//! resolution, resumption batch processing). `ApplicationSet` is the
//! `Arc`-cloneable handle all three hold, instead of each subcomponent
//! holding a back-reference to the facade (spec §9's cyclic-ownership
//! note).

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ids::ConnectionKey;
use crate::model::Application;

#[derive(Clone, Default)]
pub struct ApplicationSet {
    inner: Arc<RwLock<HashMap<ConnectionKey, Application>>>,
}

impl ApplicationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self) -> DataAccessor<'_> {
        DataAccessor(self.inner.read().await)
    }

    pub async fn write(&self) -> DataAccessorMut<'_> {
        DataAccessorMut(self.inner.write().await)
    }
}

pub struct DataAccessor<'a>(RwLockReadGuard<'a, HashMap<ConnectionKey, Application>>);

impl Deref for DataAccessor<'_> {
    type Target = HashMap<ConnectionKey, Application>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct DataAccessorMut<'a>(RwLockWriteGuard<'a, HashMap<ConnectionKey, Application>>);

impl Deref for DataAccessorMut<'_> {
    type Target = HashMap<ConnectionKey, Application>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DataAccessorMut<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{DeviceHandle, HmiAppId, PolicyAppId};
    use crate::model::hmi_state::{AppCapabilities, AudioStreamingState, HmiLevel, HmiStateValue, SystemContext};

    #[tokio::test]
    async fn write_then_read_sees_inserted_application() {
        let set = ApplicationSet::new();
        {
            let mut apps = set.write().await;
            apps.insert(
                ConnectionKey(1),
                Application::new(
                    PolicyAppId::from("app-1"),
                    ConnectionKey(1),
                    HmiAppId(10),
                    DeviceHandle(1),
                    AppCapabilities::default(),
                    HmiStateValue::new(HmiLevel::None, AudioStreamingState::NotAudible, SystemContext::Main),
                ),
            );
        }
        let apps = set.read().await;
        assert!(apps.contains_key(&ConnectionKey(1)));
    }
}
