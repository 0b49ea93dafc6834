//! `ResumeController` (§4.5): debounced persistence of dirty apps, and
//! batched, precondition-checked restoration on reconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app_set::ApplicationSet;
use crate::config::ApplicationManagerConfig;
use crate::error::CoreError;
use crate::external::{ConsentStatus, MessageRouter, PolicyEngine, ResumptionDataRestorer};
use crate::ids::ConnectionKey;
use crate::model::hmi_state::{AudioStreamingState, HmiLevel, HmiStateValue, SystemContext};
use crate::resumption::storage::ResumptionStorage;
use crate::state::StateController;

/// One app awaiting the batched restore-timer fire.
struct PendingResumption {
    connection_key: ConnectionKey,
    storage_key: String,
    client_hash: String,
}

pub struct ResumeController {
    apps: ApplicationSet,
    config: ApplicationManagerConfig,
    storage: Arc<dyn ResumptionStorage>,
    state_controller: Arc<StateController>,
    policy: Arc<dyn PolicyEngine>,
    message_router: Arc<dyn MessageRouter>,
    restorer: Arc<dyn ResumptionDataRestorer>,

    pending: Mutex<Vec<PendingResumption>>,
    restore_signal: Notify,
    restore_armed: Mutex<bool>,

    launch_time: Instant,
    suspended: std::sync::atomic::AtomicBool,
}

impl ResumeController {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        apps: ApplicationSet,
        config: ApplicationManagerConfig,
        storage: Arc<dyn ResumptionStorage>,
        state_controller: Arc<StateController>,
        policy: Arc<dyn PolicyEngine>,
        message_router: Arc<dyn MessageRouter>,
        restorer: Arc<dyn ResumptionDataRestorer>,
    ) -> Self {
        Self {
            apps,
            config,
            storage,
            state_controller,
            policy,
            message_router,
            restorer,
            pending: Mutex::new(Vec::new()),
            restore_signal: Notify::new(),
            restore_armed: Mutex::new(false),
            launch_time: Instant::now(),
            suspended: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Spawns the periodic save timer and the batched-restore timer.
    /// Both stop when `cancel` is cancelled.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let save_task = {
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move { this.save_loop(cancel).await })
        };
        let restore_task = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.restore_loop(cancel).await })
        };
        vec![save_task, restore_task]
    }

    // ── Periodic save ─────────────────────────────────────────────

    async fn save_loop(&self, cancel: CancellationToken) {
        let interval = self.config.app_resumption_save_persistent_data_timeout.max(Duration::from_millis(1));
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
            if self.suspended.load(std::sync::atomic::Ordering::SeqCst) {
                continue;
            }
            self.save_dirty_apps().await;
        }
    }

    async fn save_dirty_apps(&self) {
        let keys: Vec<ConnectionKey> = {
            let apps = self.apps.read().await;
            apps.values().filter(|a| a.is_dirty).map(|a| a.connection_key).collect()
        };
        for key in keys {
            if let Err(e) = self.save_one(key).await {
                warn!(%key, error = %e, "failed to persist application resumption record");
            }
        }
    }

    async fn save_one(&self, connection_key: ConnectionKey) -> Result<(), CoreError> {
        let key = {
            let apps = self.apps.read().await;
            let app = apps.get(&connection_key).ok_or(CoreError::AppNotFound(connection_key))?;
            let Some(mac) = self.message_router.device_mac_address(app.device) else {
                return Ok(());
            };
            storage_key(&mac, &app.policy_app_id.0)
        };
        let existing = self.storage.load_application(&key).await?;
        let (ign_off_count, suspend_count) = existing.map_or((0, 0), |r| (r.ign_off_count, r.suspend_count));
        let record = {
            let apps = self.apps.read().await;
            let app = apps.get(&connection_key).ok_or(CoreError::AppNotFound(connection_key))?;
            app.to_persisted_record(ign_off_count, suspend_count, chrono::Utc::now().timestamp())
        };
        self.storage.save_application(&key, record).await?;
        let mut apps = self.apps.write().await;
        if let Some(app) = apps.get_mut(&connection_key) {
            app.is_dirty = false;
        }
        Ok(())
    }

    /// Spec §4.5: stop the save timer, save every app regardless of
    /// dirty flag, and tell storage `OnSuspend`.
    pub async fn on_suspend(&self, now_unix: i64) -> Result<(), CoreError> {
        self.suspended.store(true, std::sync::atomic::Ordering::SeqCst);
        let keys: Vec<ConnectionKey> = self.apps.read().await.keys().copied().collect();
        for key in keys {
            self.save_one(key).await?;
        }
        self.storage.on_suspend(now_unix).await?;
        info!("suspend: all applications persisted");
        Ok(())
    }

    pub fn on_awake(&self) {
        self.suspended.store(false, std::sync::atomic::Ordering::SeqCst);
        info!("awake: resumption save timer resumed");
    }

    // ── Resumption ────────────────────────────────────────────────

    /// Spec §4.5 `StartResumption`: fetch the saved record, queue the
    /// app for the batched restore timer, arm the timer if this is the
    /// first pending app. Returns whether a record exists.
    pub async fn start_resumption(
        &self,
        connection_key: ConnectionKey,
        client_hash: &str,
    ) -> Result<bool, CoreError> {
        let mac = {
            let apps = self.apps.read().await;
            let app = apps.get(&connection_key).ok_or(CoreError::AppNotFound(connection_key))?;
            self.message_router.device_mac_address(app.device)
        };
        let Some(mac) = mac else {
            return Ok(false);
        };
        let policy_app_id = {
            let apps = self.apps.read().await;
            apps.get(&connection_key).ok_or(CoreError::AppNotFound(connection_key))?.policy_app_id.0.clone()
        };
        let key = storage_key(&mac, &policy_app_id);
        let exists = self.storage.load_application(&key).await?.is_some();

        {
            let mut pending = self.pending.lock().await;
            pending.push(PendingResumption {
                connection_key,
                storage_key: key,
                client_hash: client_hash.to_owned(),
            });
        }

        let mut armed = self.restore_armed.lock().await;
        if !*armed {
            *armed = true;
            self.restore_signal.notify_one();
        }
        Ok(exists)
    }

    async fn restore_loop(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = self.restore_signal.notified() => {}
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.app_resuming_timeout) => {}
            }
            self.fire_batched_restoration().await;
            *self.restore_armed.lock().await = false;
        }
    }

    async fn fire_batched_restoration(&self) {
        let batch = std::mem::take(&mut *self.pending.lock().await);
        debug!(count = batch.len(), "restore timer fired");
        for item in batch {
            if let Err(e) = self.restore_one(&item).await {
                warn!(connection_key = %item.connection_key, error = %e, "resumption restore failed");
            }
        }
    }

    async fn restore_one(&self, item: &PendingResumption) -> Result<(), CoreError> {
        let Some(record) = self.storage.load_application(&item.storage_key).await? else {
            return Ok(());
        };
        record.validate().map_err(CoreError::ResumptionDataCorrupt)?;

        let meta = self.storage.meta().await?;
        if record.ign_off_count != 0 {
            let after_ign_ok = self.launch_time.elapsed() <= self.config.resumption_delay_after_ign;
            let before_ign_ok = meta.last_ign_off_time.is_none_or(|last_off| {
                (last_off - record.time_stamp).unsigned_abs()
                    <= self.config.resumption_delay_before_ign.as_secs()
            });
            if !after_ign_ok || !before_ign_ok {
                self.apply_default_level(item.connection_key).await?;
                return Ok(());
            }
        }

        if !matches!(record.hmi_level, HmiLevel::Full | HmiLevel::Limited) {
            self.apply_default_level(item.connection_key).await?;
            return Ok(());
        }

        let mac = {
            let apps = self.apps.read().await;
            apps.get(&item.connection_key).and_then(|a| self.message_router.device_mac_address(a.device))
        };
        let consented = mac.is_some_and(|mac| self.policy.get_user_consent_for_device(&mac) == ConsentStatus::Allowed);
        if !consented {
            self.apply_default_level(item.connection_key).await?;
            return Ok(());
        }

        if !self
            .state_controller
            .is_state_available_for_resumption(item.connection_key, record.hmi_level)
            .await?
        {
            self.apply_default_level(item.connection_key).await?;
            return Ok(());
        }

        let audio = default_audio_for_level(record.hmi_level, record.is_media);
        let new_regular = HmiStateValue::new(record.hmi_level, audio, SystemContext::Main);
        self.state_controller
            .set_regular_state(item.connection_key, new_regular, false, None)
            .await?;
        self.storage.remove_application(&item.storage_key).await?;

        if item.client_hash == record.hash {
            if self.restorer.icons_present(&record) {
                self.restorer.restore_application_data(item.connection_key, &record).await;
            } else {
                warn!(connection_key = %item.connection_key, "resumption data restore aborted: missing icon file");
            }
        } else {
            debug!(connection_key = %item.connection_key, "client hash mismatch; HMI level restored, data left untouched");
        }
        Ok(())
    }

    async fn apply_default_level(&self, connection_key: ConnectionKey) -> Result<(), CoreError> {
        let level = self.config.default_not_resumed_hmi_level;
        let value = HmiStateValue::new(level, AudioStreamingState::NotAudible, SystemContext::Main);
        self.state_controller.set_regular_state(connection_key, value, false, None).await
    }
}

fn storage_key(device_mac: &str, policy_app_id: &str) -> String {
    format!("{device_mac}:{policy_app_id}")
}

fn default_audio_for_level(level: HmiLevel, is_media: bool) -> AudioStreamingState {
    match level {
        HmiLevel::Full | HmiLevel::Limited if is_media => AudioStreamingState::Audible,
        _ => AudioStreamingState::NotAudible,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::external::{HmiCapabilities, MessageRouter, PermissionResult};
    use crate::ids::{DeviceHandle, HmiAppId, PolicyAppId};
    use crate::model::hmi_state::AppCapabilities;
    use crate::model::persisted::{GlobalProperties, PersistedAppRecord, Subscriptions};
    use crate::model::Application;
    use crate::resumption::storage::InMemoryResumptionStorage;
    use async_trait::async_trait;

    struct NoopRouter;
    #[async_trait]
    impl MessageRouter for NoopRouter {
        async fn manage_mobile_command(&self, _request: crate::request::RequestPtr) {}
        async fn manage_hmi_command(&self, _request: crate::request::RequestPtr) {}
        async fn send_hmi_status_notification(&self, _connection_key: ConnectionKey, _state: HmiStateValue) {}
        async fn request_app_activation(&self, _hmi_app_id: HmiAppId, _correlation_id: crate::ids::CorrelationId) {}
        async fn send_resume_audio_source(&self, _connection_key: ConnectionKey) {}
        fn device_mac_address(&self, _handle: DeviceHandle) -> Option<String> {
            Some("00:11:22:33:44:55".to_owned())
        }
    }

    struct AlwaysAllow;
    impl PolicyEngine for AlwaysAllow {
        fn is_request_type_allowed(&self, _policy_app_id: &PolicyAppId, _request_type: &str) -> bool {
            true
        }
        fn get_user_consent_for_device(&self, _device_mac: &str) -> ConsentStatus {
            ConsentStatus::Allowed
        }
        fn check_permissions(&self, _policy_app_id: &PolicyAppId, _hmi_level: HmiLevel, _rpc: &str) -> PermissionResult {
            PermissionResult { allowed: true }
        }
    }

    struct NoAttenuation;
    impl HmiCapabilities for NoAttenuation {
        fn attenuated_supported(&self) -> bool {
            false
        }
    }

    struct NoopRestorer;
    #[async_trait]
    impl ResumptionDataRestorer for NoopRestorer {
        fn icons_present(&self, _record: &PersistedAppRecord) -> bool {
            true
        }
        async fn restore_application_data(&self, _connection_key: ConnectionKey, _record: &PersistedAppRecord) {}
    }

    fn sample_record(hmi_level: HmiLevel, ign_off_count: u32, time_stamp: i64) -> PersistedAppRecord {
        PersistedAppRecord {
            hmi_app_id: 10,
            hmi_level,
            is_media: true,
            grammar_id: None,
            hash: "h1".into(),
            ign_off_count,
            suspend_count: 0,
            time_stamp,
            commands: vec![],
            submenus: vec![],
            choice_sets: vec![],
            global_properties: GlobalProperties::default(),
            subscriptions: Subscriptions::default(),
            files: vec![],
        }
    }

    async fn harness() -> (Arc<ResumeController>, ApplicationSet, Arc<InMemoryResumptionStorage>) {
        let apps = ApplicationSet::new();
        {
            let mut guard = apps.write().await;
            guard.insert(
                ConnectionKey(1),
                Application::new(
                    PolicyAppId::from("app-1"),
                    ConnectionKey(1),
                    HmiAppId(10),
                    DeviceHandle(1),
                    AppCapabilities {
                        is_media: true,
                        is_navi: false,
                        is_voice_communication: false,
                    },
                    HmiStateValue::new(HmiLevel::None, AudioStreamingState::NotAudible, SystemContext::Main),
                ),
            );
        }
        let router = Arc::new(NoopRouter);
        let sc = Arc::new(StateController::new(apps.clone(), router.clone(), Arc::new(NoAttenuation), None));
        let storage = Arc::new(InMemoryResumptionStorage::new());
        let rc = Arc::new(ResumeController::new(
            apps.clone(),
            ApplicationManagerConfig::default(),
            storage.clone(),
            sc,
            Arc::new(AlwaysAllow),
            router,
            Arc::new(NoopRestorer),
        ));
        (rc, apps, storage)
    }

    #[tokio::test]
    async fn start_resumption_returns_false_without_a_saved_record() {
        let (rc, _apps, _storage) = harness().await;
        assert!(!rc.start_resumption(ConnectionKey(1), "h1").await.unwrap());
    }

    #[tokio::test]
    async fn same_ignition_cycle_restores_immediately_on_timer_fire() {
        let (rc, apps, storage) = harness().await;
        storage
            .save_application("00:11:22:33:44:55:app-1", sample_record(HmiLevel::Full, 0, 100))
            .await
            .unwrap();

        assert!(rc.start_resumption(ConnectionKey(1), "h1").await.unwrap());
        rc.fire_batched_restoration().await;

        let app = apps.read().await;
        let value = app.get(&ConnectionKey(1)).unwrap().state.regular_value();
        assert_eq!(value.hmi_level, HmiLevel::Full);
    }

    #[tokio::test]
    async fn stale_disconnect_before_ign_falls_back_to_default_level() {
        let (rc, apps, storage) = harness().await;
        storage.set_meta(crate::model::ResumptionMeta {
            last_ign_off_time: Some(10_000),
            ..Default::default()
        }).await.unwrap();
        storage
            .save_application("00:11:22:33:44:55:app-1", sample_record(HmiLevel::Full, 1, 100))
            .await
            .unwrap();

        assert!(rc.start_resumption(ConnectionKey(1), "h1").await.unwrap());
        rc.fire_batched_restoration().await;

        let app = apps.read().await;
        let value = app.get(&ConnectionKey(1)).unwrap().state.regular_value();
        assert_eq!(value.hmi_level, HmiLevel::None);
        assert!(storage.load_application("00:11:22:33:44:55:app-1").await.unwrap().is_some());
    }
}
