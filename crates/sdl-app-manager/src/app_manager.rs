//! `ApplicationManager` (§4.6): the facade wiring the three
//! subsystems around one shared [`ApplicationSet`]. Owns application
//! registration, id generation, and message routing; the worker pool,
//! deadline timer, state machine, and persistence machinery all live
//! in the subcomponents it holds handles to.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, info, instrument};

use crate::app_set::ApplicationSet;
use crate::config::ApplicationManagerConfig;
use crate::error::CoreError;
use crate::external::{HmiCommandFactory, HmiMessage, MessageRouter, MobileCommandFactory, MobileMessage, PolicyEngine};
use crate::ids::{ConnectionKey, CorrelationId, DeviceHandle, HmiAppId, PolicyAppId};
use crate::model::hmi_state::{AppCapabilities, AudioStreamingState, HmiStateValue, SystemContext};
use crate::model::{Application, HmiLevel};
use crate::request::{RequestControllerHandle, RequestPtr};
use crate::resumption::ResumeController;
use crate::state::StateController;

/// Central facade. Cheaply `Clone`-able: every field is itself an
/// `Arc`-backed handle, so the same instance can be shared across the
/// message-pump threads that call into it (spec §5, out-of-scope
/// thread inventory items 5 and 6).
#[derive(Clone)]
pub struct ApplicationManager {
    apps: ApplicationSet,
    config: ApplicationManagerConfig,
    request_controller: RequestControllerHandle,
    state_controller: Arc<StateController>,
    resume_controller: Arc<ResumeController>,
    mobile_factory: Arc<dyn MobileCommandFactory>,
    hmi_factory: Arc<dyn HmiCommandFactory>,
    policy: Arc<dyn PolicyEngine>,
    message_router: Arc<dyn MessageRouter>,
    next_correlation_id: Arc<AtomicU32>,
    next_hmi_app_id: Arc<AtomicU32>,
}

impl ApplicationManager {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        apps: ApplicationSet,
        config: ApplicationManagerConfig,
        request_controller: RequestControllerHandle,
        state_controller: Arc<StateController>,
        resume_controller: Arc<ResumeController>,
        mobile_factory: Arc<dyn MobileCommandFactory>,
        hmi_factory: Arc<dyn HmiCommandFactory>,
        policy: Arc<dyn PolicyEngine>,
        message_router: Arc<dyn MessageRouter>,
    ) -> Self {
        Self {
            apps,
            config,
            request_controller,
            state_controller,
            resume_controller,
            mobile_factory,
            hmi_factory,
            policy,
            message_router,
            next_correlation_id: Arc::new(AtomicU32::new(1)),
            next_hmi_app_id: Arc::new(AtomicU32::new(1)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ApplicationManagerConfig {
        &self.config
    }

    #[must_use]
    pub fn state_controller(&self) -> &Arc<StateController> {
        &self.state_controller
    }

    #[must_use]
    pub fn resume_controller(&self) -> &Arc<ResumeController> {
        &self.resume_controller
    }

    /// Next HMI-side correlation id (spec §4.6), unique for the
    /// lifetime of this facade.
    pub fn next_correlation_id(&self) -> CorrelationId {
        CorrelationId(self.next_correlation_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Next process-wide-unique `hmi_app_id` (spec §3).
    fn next_hmi_app_id(&self) -> HmiAppId {
        HmiAppId(self.next_hmi_app_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a new application at `NONE`/`NOT_AUDIBLE`/`MAIN`
    /// (spec §3: "applications are created at Register"). Returns the
    /// freshly-assigned `hmi_app_id`.
    #[instrument(skip(self, capabilities), fields(%connection_key))]
    pub async fn register_application(
        &self,
        policy_app_id: PolicyAppId,
        connection_key: ConnectionKey,
        device: DeviceHandle,
        capabilities: AppCapabilities,
    ) -> HmiAppId {
        let hmi_app_id = self.next_hmi_app_id();
        let initial = HmiStateValue::new(HmiLevel::None, AudioStreamingState::NotAudible, SystemContext::Main);
        let app = Application::new(policy_app_id, connection_key, hmi_app_id, device, capabilities, initial);
        self.apps.write().await.insert(connection_key, app);
        info!(%hmi_app_id, "application registered");
        hmi_app_id
    }

    /// Tears down an application at Unregister or transport loss (spec
    /// §3): drops it from the set and purges its tracked requests.
    #[instrument(skip(self))]
    pub async fn unregister_application(&self, connection_key: ConnectionKey) {
        self.apps.write().await.remove(&connection_key);
        let purged = self.request_controller.terminate_app_requests(connection_key).await;
        debug!(purged, "application unregistered; tracked requests purged");
    }

    /// Marks an application's resumable data dirty (spec §3: "Set
    /// whenever resumable data changes"), so the next periodic save
    /// picks it up.
    pub async fn mark_dirty(&self, connection_key: ConnectionKey) {
        if let Some(app) = self.apps.write().await.get_mut(&connection_key) {
            app.is_dirty = true;
        }
    }

    /// Routes a mobile-origin message into the request pipeline (spec
    /// §4.6, §2 data flow): builds the command via the mobile factory,
    /// reads the app's current `hmi_level` for the rate-limit gate, and
    /// hands it to `RequestController::add_mobile_request`.
    #[instrument(skip(self, message), fields(connection_key = %message.connection_key, function_id = message.function_id))]
    pub async fn handle_mobile_message(&self, message: MobileMessage) -> Result<(), CoreError> {
        let connection_key = message.connection_key;
        let hmi_level = {
            let apps = self.apps.read().await;
            apps.get(&connection_key).ok_or(CoreError::AppNotFound(connection_key))?.state.regular_value().hmi_level
        };
        let Some(request) = self.mobile_factory.build(message) else {
            return Err(CoreError::InvalidData("mobile command factory produced no command".to_owned()));
        };
        self.request_controller.add_mobile_request(request, hmi_level).await
    }

    /// Routes an HMI-origin message (spec §4.6): built commands are
    /// untracked-gate, tracked, and run immediately (spec §4.2).
    #[instrument(skip(self, message), fields(function_id = message.function_id))]
    pub async fn handle_hmi_message(&self, message: HmiMessage) {
        let Some(request) = self.hmi_factory.build(message) else {
            debug!("HMI command factory produced no command; dropping message");
            return;
        };
        self.request_controller.add_hmi_request(request).await;
    }

    /// Broadcasts the current effective state for one application
    /// (spec §4.6: "Broadcast HMI-status notifications per
    /// application").
    pub async fn broadcast_hmi_status(&self, connection_key: ConnectionKey) -> Result<(), CoreError> {
        let value = self.state_controller.effective_state(connection_key).await?;
        self.message_router.send_hmi_status_notification(connection_key, value).await;
        Ok(())
    }

    /// Proxies the consent query a resumption or activation caller
    /// needs from the policy engine (spec §4.6: "Proxy resumption
    /// queries ... that the core subcomponents need from policy").
    pub async fn device_consent(&self, connection_key: ConnectionKey) -> Option<crate::external::ConsentStatus> {
        let apps = self.apps.read().await;
        let app = apps.get(&connection_key)?;
        let mac = self.message_router.device_mac_address(app.device)?;
        Some(self.policy.get_user_consent_for_device(&mac))
    }

    /// Delegates to `ResumeController::start_resumption` (spec §4.5).
    pub async fn start_resumption(&self, connection_key: ConnectionKey, client_hash: &str) -> Result<bool, CoreError> {
        self.resume_controller.start_resumption(connection_key, client_hash).await
    }

    #[cfg(test)]
    async fn test_queue_len(&self) -> usize {
        self.apps.read().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::external::{ConsentStatus, HmiMessage, MobileMessage, PermissionResult};
    use crate::ids::DeviceHandle;
    use crate::model::hmi_state::HmiLevel as HL;
    use crate::request::command::{Command, HmiEvent};
    use crate::request::info::RequestType;
    use crate::resumption::InMemoryResumptionStorage;
    use crate::state::StateController as SC;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32 as StdAtomicU32;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct RecordingCommand {
        connection_key: ConnectionKey,
        correlation_id: CorrelationId,
        runs: Arc<StdAtomicU32>,
    }

    #[async_trait]
    impl Command for RecordingCommand {
        fn connection_key(&self) -> ConnectionKey {
            self.connection_key
        }
        fn correlation_id(&self) -> CorrelationId {
            self.correlation_id
        }
        fn request_type(&self) -> RequestType {
            RequestType::Mobile
        }
        fn default_timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
        async fn init(&self) -> bool {
            true
        }
        async fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_event(&self, _event: HmiEvent) {}
        async fn on_timeout(&self) {}
        async fn clean_up(&self) {}
        fn check_permissions(&self) -> bool {
            true
        }
    }

    struct StubMobileFactory {
        runs: Arc<StdAtomicU32>,
    }
    impl MobileCommandFactory for StubMobileFactory {
        fn build(&self, message: MobileMessage) -> Option<RequestPtr> {
            Some(Arc::new(RecordingCommand {
                connection_key: message.connection_key,
                correlation_id: message.correlation_id,
                runs: Arc::clone(&self.runs),
            }))
        }
    }

    struct StubHmiFactory;
    impl HmiCommandFactory for StubHmiFactory {
        fn build(&self, _message: HmiMessage) -> Option<RequestPtr> {
            None
        }
    }

    struct NoopRouter;
    #[async_trait]
    impl MessageRouter for NoopRouter {
        async fn manage_mobile_command(&self, _request: RequestPtr) {}
        async fn manage_hmi_command(&self, _request: RequestPtr) {}
        async fn send_hmi_status_notification(&self, _connection_key: ConnectionKey, _state: HmiStateValue) {}
        async fn request_app_activation(&self, _hmi_app_id: HmiAppId, _correlation_id: CorrelationId) {}
        async fn send_resume_audio_source(&self, _connection_key: ConnectionKey) {}
        fn device_mac_address(&self, _handle: DeviceHandle) -> Option<String> {
            Some("aa:bb:cc:dd:ee:ff".to_owned())
        }
    }

    struct AllowAll;
    impl PolicyEngine for AllowAll {
        fn is_request_type_allowed(&self, _policy_app_id: &PolicyAppId, _request_type: &str) -> bool {
            true
        }
        fn get_user_consent_for_device(&self, _device_mac: &str) -> ConsentStatus {
            ConsentStatus::Allowed
        }
        fn check_permissions(&self, _policy_app_id: &PolicyAppId, _hmi_level: HL, _rpc: &str) -> PermissionResult {
            PermissionResult { allowed: true }
        }
    }

    struct NoAttenuation;
    impl crate::external::HmiCapabilities for NoAttenuation {
        fn attenuated_supported(&self) -> bool {
            false
        }
    }

    struct NoopRestorer;
    #[async_trait]
    impl crate::external::ResumptionDataRestorer for NoopRestorer {
        fn icons_present(&self, _record: &crate::model::PersistedAppRecord) -> bool {
            true
        }
        async fn restore_application_data(&self, _connection_key: ConnectionKey, _record: &crate::model::PersistedAppRecord) {}
    }

    async fn harness(runs: Arc<StdAtomicU32>) -> ApplicationManager {
        let apps = ApplicationSet::new();
        let config = ApplicationManagerConfig::default();
        let cancel = CancellationToken::new();
        let (request_controller, _handles) = crate::request::RequestController::spawn(config.clone(), cancel);
        let router = Arc::new(NoopRouter);
        let state_controller = Arc::new(SC::new(apps.clone(), router.clone(), Arc::new(NoAttenuation), None));
        let storage = Arc::new(InMemoryResumptionStorage::new());
        let resume_controller = Arc::new(ResumeController::new(
            apps.clone(),
            config.clone(),
            storage,
            Arc::clone(&state_controller),
            Arc::new(AllowAll),
            router.clone(),
            Arc::new(NoopRestorer),
        ));

        ApplicationManager::new(
            apps,
            config,
            request_controller,
            state_controller,
            resume_controller,
            Arc::new(StubMobileFactory { runs }),
            Arc::new(StubHmiFactory),
            Arc::new(AllowAll),
            router,
        )
    }

    #[tokio::test]
    async fn register_then_unregister_removes_app_from_set() {
        let am = harness(Arc::new(StdAtomicU32::new(0))).await;
        let key = ConnectionKey(1);
        am.register_application(PolicyAppId::from("app-1"), key, DeviceHandle(1), AppCapabilities::default())
            .await;
        assert_eq!(am.test_queue_len().await, 1);

        am.unregister_application(key).await;
        assert_eq!(am.test_queue_len().await, 0);
    }

    #[tokio::test]
    async fn mobile_message_for_unknown_app_is_rejected() {
        let am = harness(Arc::new(StdAtomicU32::new(0))).await;
        let result = am
            .handle_mobile_message(MobileMessage {
                function_id: 1,
                correlation_id: CorrelationId(1),
                connection_key: ConnectionKey(99),
                params: serde_json::json!({}),
                binary_payload: None,
            })
            .await;
        assert!(matches!(result, Err(CoreError::AppNotFound(_))));
    }

    #[tokio::test]
    async fn mobile_message_for_registered_app_reaches_run() {
        let runs = Arc::new(StdAtomicU32::new(0));
        let am = harness(Arc::clone(&runs)).await;
        let key = ConnectionKey(1);
        am.register_application(PolicyAppId::from("app-1"), key, DeviceHandle(1), AppCapabilities::default())
            .await;

        am.handle_mobile_message(MobileMessage {
            function_id: 1,
            correlation_id: CorrelationId(1),
            connection_key: key,
            params: serde_json::json!({}),
            binary_payload: None,
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn correlation_ids_are_unique_and_increasing() {
        let am = harness(Arc::new(StdAtomicU32::new(0))).await;
        let a = am.next_correlation_id();
        let b = am.next_correlation_id();
        assert!(b.0 > a.0);
    }
}
