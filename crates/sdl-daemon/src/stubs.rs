//! Minimal collaborator implementations standing in for the
//! transport/protocol/policy machinery the core consumes but does not
//! implement (spec §6, §1 out-of-scope list). Enough to drive the demo
//! scenario in `main`; a production deployment replaces every type in
//! this file.

use std::sync::Arc;

use async_trait::async_trait;
use sdl_app_manager::external::{
    ConsentStatus, HmiCapabilities, HmiMessage, MessageRouter, MobileCommandFactory,
    MobileMessage, PermissionResult, PolicyEngine, ResumptionDataRestorer,
};
use sdl_app_manager::ids::{ConnectionKey, CorrelationId, DeviceHandle, HmiAppId, PolicyAppId};
use sdl_app_manager::model::{HmiLevel, HmiStateValue, PersistedAppRecord};
use sdl_app_manager::request::command::{Command, HmiEvent};
use sdl_app_manager::request::info::RequestType;
use sdl_app_manager::request::RequestPtr;
use tracing::info;

/// Logs and immediately completes; stands in for the whole family of
/// out-of-scope RPC command classes (spec §1).
struct LoggingCommand {
    connection_key: ConnectionKey,
    correlation_id: CorrelationId,
    label: &'static str,
}

#[async_trait]
impl Command for LoggingCommand {
    fn connection_key(&self) -> ConnectionKey {
        self.connection_key
    }
    fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }
    fn request_type(&self) -> RequestType {
        RequestType::Mobile
    }
    fn default_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(10)
    }
    async fn init(&self) -> bool {
        true
    }
    async fn run(&self) {
        info!(label = self.label, connection_key = %self.connection_key, "demo command ran");
    }
    async fn on_event(&self, _event: HmiEvent) {}
    async fn on_timeout(&self) {}
    async fn clean_up(&self) {}
    fn check_permissions(&self) -> bool {
        true
    }
}

pub struct DemoMobileFactory;

impl MobileCommandFactory for DemoMobileFactory {
    fn build(&self, message: MobileMessage) -> Option<RequestPtr> {
        Some(Arc::new(LoggingCommand {
            connection_key: message.connection_key,
            correlation_id: message.correlation_id,
            label: "mobile",
        }))
    }
}

pub struct DemoHmiFactory;

impl sdl_app_manager::external::HmiCommandFactory for DemoHmiFactory {
    fn build(&self, _message: HmiMessage) -> Option<RequestPtr> {
        None
    }
}

/// Logs every send-path call instead of touching a real transport.
#[derive(Default)]
pub struct LoggingMessageRouter;

#[async_trait]
impl MessageRouter for LoggingMessageRouter {
    async fn manage_mobile_command(&self, request: RequestPtr) {
        info!(connection_key = %request.connection_key(), "routing mobile command to HMI");
    }

    async fn manage_hmi_command(&self, request: RequestPtr) {
        info!(connection_key = %request.connection_key(), "routing HMI command");
    }

    async fn send_hmi_status_notification(&self, connection_key: ConnectionKey, state: HmiStateValue) {
        info!(%connection_key, ?state, "OnHMIStatus");
    }

    async fn request_app_activation(&self, hmi_app_id: HmiAppId, correlation_id: CorrelationId) {
        info!(%hmi_app_id, %correlation_id, "BasicCommunication.ActivateApp requested");
    }

    async fn send_resume_audio_source(&self, connection_key: ConnectionKey) {
        info!(%connection_key, "OnResumeAudioSource");
    }

    fn device_mac_address(&self, handle: DeviceHandle) -> Option<String> {
        Some(format!("02:00:00:00:00:{:02x}", handle.0 & 0xff))
    }
}

/// Grants every permission and consent query unconditionally; the PT
/// snapshot and consent-prompt machinery behind a real policy engine
/// are out of scope (spec §1).
pub struct AllowAllPolicy;

impl PolicyEngine for AllowAllPolicy {
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

pub struct NoAttenuationCapabilities;

impl HmiCapabilities for NoAttenuationCapabilities {
    fn attenuated_supported(&self) -> bool {
        false
    }
}

/// Treats every resumed app as having its icon set present and logs
/// instead of replaying HMI AddCommand/AddSubMenu requests.
pub struct LoggingResumptionDataRestorer;

#[async_trait]
impl ResumptionDataRestorer for LoggingResumptionDataRestorer {
    fn icons_present(&self, _record: &PersistedAppRecord) -> bool {
        true
    }

    async fn restore_application_data(&self, connection_key: ConnectionKey, record: &PersistedAppRecord) {
        info!(%connection_key, hmi_level = ?record.hmi_level, "replaying resumption data onto HMI");
    }
}
