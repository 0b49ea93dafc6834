//! Collaborator contracts the core consumes but does not implement
//! (spec §6). The RPC command factories, transport manager, protocol
//! handler, media manager, policy decision engine, and configuration
//! profile loader are all explicitly out of scope (§1); this module is
//! only the seam the core dispatches through.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionKey, CorrelationId, DeviceHandle, HmiAppId, PolicyAppId};
use crate::model::{HmiLevel, HmiStateValue, PersistedAppRecord};
use crate::request::command::RequestPtr;

/// A mobile-origin message as routed in off the transport/protocol
/// layers (both out of scope). `binary_payload` carries bulk data such
/// as an uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileMessage {
    pub function_id: u32,
    pub correlation_id: CorrelationId,
    pub connection_key: ConnectionKey,
    pub params: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_payload: Option<Vec<u8>>,
}

/// An HMI-origin message. `correlation_id` is absent for
/// notifications (no response is expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HmiMessage {
    pub function_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    pub params: serde_json::Value,
}

/// Produces a `Command` object for a mobile-origin message (spec §6).
/// The individual RPC command classes themselves are out of scope;
/// only this factory seam is.
pub trait MobileCommandFactory: Send + Sync {
    fn build(&self, message: MobileMessage) -> Option<RequestPtr>;
}

/// Produces a `Command` object for an HMI-origin message.
pub trait HmiCommandFactory: Send + Sync {
    fn build(&self, message: HmiMessage) -> Option<RequestPtr>;
}

/// Result of the policy engine's device-consent query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentStatus {
    Allowed,
    Disallowed,
    NotRequested,
}

/// Result of a permission check for one RPC at one HMI level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionResult {
    pub allowed: bool,
}

/// The policy engine (spec §6): decides whether RPCs are permitted,
/// queries device consent. The PT-snapshot mechanics behind it are out
/// of scope (§1) — the core only queries, never decides.
pub trait PolicyEngine: Send + Sync {
    fn is_request_type_allowed(&self, policy_app_id: &PolicyAppId, request_type: &str) -> bool;
    fn get_user_consent_for_device(&self, device_mac: &str) -> ConsentStatus;
    fn check_permissions(&self, policy_app_id: &PolicyAppId, hmi_level: HmiLevel, rpc: &str) -> PermissionResult;
}

/// The message router (spec §6): dispatches built commands onward and
/// carries HMI-status notifications and activation requests. Building
/// the wire message itself is the command factories' job; this trait
/// is the send-path seam.
#[async_trait]
pub trait MessageRouter: Send + Sync {
    async fn manage_mobile_command(&self, request: RequestPtr);
    async fn manage_hmi_command(&self, request: RequestPtr);

    /// Sends an `OnHMIStatus` notification reflecting `state` for one
    /// application (spec §4.4: every applied state change broadcasts
    /// this).
    async fn send_hmi_status_notification(&self, connection_key: ConnectionKey, state: HmiStateValue);

    /// Issues the `BasicCommunication.ActivateApp` HMI request tracked
    /// under `correlation_id`; the response re-enters via
    /// `StateController::on_activate_app_response`.
    async fn request_app_activation(&self, hmi_app_id: HmiAppId, correlation_id: CorrelationId);

    /// `OnResumeAudioSource` notification (spec §11, from
    /// `state_controller.cc`'s `SetupRegularHmiState`): sent when an
    /// app resumes directly into LIMITED.
    async fn send_resume_audio_source(&self, connection_key: ConnectionKey);

    fn device_mac_address(&self, handle: DeviceHandle) -> Option<String>;
}

/// HMI capability query (spec §6): only `attenuated_supported` affects
/// core behavior (the TTS overlay's audio choice).
pub trait HmiCapabilities: Send + Sync {
    fn attenuated_supported(&self) -> bool;
}

/// Usage-statistics hook (spec §11, from
/// `app->usage_report().RecordHmiStateChanged()` in
/// `state_controller.cc`). Not itself specified, but the call site is;
/// a no-op implementation is provided for harnesses that don't need it.
pub trait UsageStatsSink: Send + Sync {
    fn record_hmi_state_changed(&self, connection_key: ConnectionKey, new_level: HmiLevel);
}

/// A `UsageStatsSink` that discards every event.
pub struct NoopUsageStatsSink;

impl UsageStatsSink for NoopUsageStatsSink {
    fn record_hmi_state_changed(&self, _connection_key: ConnectionKey, _new_level: HmiLevel) {}
}

/// Requests process shutdown (spec §6: "the core-level requirement is
/// merely 'request process shutdown'"). The POSIX message queue used
/// by the deployed build to signal `EXIT_ALL_APPS` upstream is out of
/// scope; this trait is the seam a harness implements however it
/// likes (an atomic flag, a `CancellationToken`, ...).
pub trait ShutdownRequester: Send + Sync {
    fn request_shutdown(&self);
}

/// Replays a resumed application's RPC-visible data onto the HMI (spec
/// §4.5: AddSubMenu/AddCommand/AddVRCommand-from-choice, global
/// properties, IVI subscriptions). Building those individual HMI
/// requests is exactly the out-of-scope command-factory machinery this
/// trait stands in for.
#[async_trait]
pub trait ResumptionDataRestorer: Send + Sync {
    /// Verifies every icon file `record`'s commands and choice sets
    /// reference is present on disk. A missing image aborts
    /// restoration (spec §4.5).
    fn icons_present(&self, record: &PersistedAppRecord) -> bool;

    async fn restore_application_data(&self, connection_key: ConnectionKey, record: &PersistedAppRecord);
}

pub type SharedPolicyEngine = Arc<dyn PolicyEngine>;
pub type SharedMessageRouter = Arc<dyn MessageRouter>;
pub type SharedHmiCapabilities = Arc<dyn HmiCapabilities>;
pub type SharedUsageStatsSink = Arc<dyn UsageStatsSink>;
pub type SharedMobileCommandFactory = Arc<dyn MobileCommandFactory>;
pub type SharedHmiCommandFactory = Arc<dyn HmiCommandFactory>;
pub type SharedShutdownRequester = Arc<dyn ShutdownRequester>;
pub type SharedResumptionDataRestorer = Arc<dyn ResumptionDataRestorer>;
