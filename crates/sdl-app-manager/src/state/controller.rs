//! `StateController` (§4.4): computes and applies effective HMI state;
//! resolves focus conflicts between applications; dispatches
//! HMI-origin events that drive state transitions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::app_set::ApplicationSet;
use crate::error::CoreError;
use crate::external::{HmiCapabilities, MessageRouter, NoopUsageStatsSink, UsageStatsSink};
use crate::ids::{ConnectionKey, CorrelationId};
use crate::model::hmi_state::{AppCapabilities, AppTypeClass, AudioStreamingState, HmiLevel, HmiStateValue, StateId};

/// The reason an app is being deactivated (spec §11, from
/// `Common_DeactivateReason` in `state_controller.cc`). `spec.md`
/// describes only a generic deactivate event; the original's
/// reason-specific handling is carried here as a hint to
/// `on_app_deactivated` callers, not separately enforced by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivationReason {
    Audio,
    NaviMap,
    General,
}

struct PendingActivation {
    new_regular: HmiStateValue,
    old_regular: HmiStateValue,
    old_effective: HmiStateValue,
}

pub struct StateController {
    apps: ApplicationSet,
    active_states: Mutex<HashSet<StateId>>,
    waiting_for_activate: Mutex<HashMap<ConnectionKey, PendingActivation>>,
    message_router: Arc<dyn MessageRouter>,
    hmi_capabilities: Arc<dyn HmiCapabilities>,
    usage_stats: Arc<dyn UsageStatsSink>,
}

impl StateController {
    #[must_use]
    pub fn new(
        apps: ApplicationSet,
        message_router: Arc<dyn MessageRouter>,
        hmi_capabilities: Arc<dyn HmiCapabilities>,
        usage_stats: Option<Arc<dyn UsageStatsSink>>,
    ) -> Self {
        Self {
            apps,
            active_states: Mutex::new(HashSet::new()),
            waiting_for_activate: Mutex::new(HashMap::new()),
            message_router,
            hmi_capabilities,
            usage_stats: usage_stats.unwrap_or_else(|| Arc::new(NoopUsageStatsSink)),
        }
    }

    fn attenuated_supported(&self) -> bool {
        self.hmi_capabilities.attenuated_supported()
    }

    /// The effective (topmost) state for one app (spec §3), with the
    /// cross-application nav-streaming attenuation rule applied
    /// (spec §4.3: "audio → ATTENUATED when an unrelated audio app
    /// holds LIMITED/FULL during nav streaming" — this cannot be
    /// computed by a single `HmiState` in isolation, so it is layered
    /// on here rather than inside `HmiState::compute`).
    pub async fn effective_state(&self, connection_key: ConnectionKey) -> Result<HmiStateValue, CoreError> {
        let apps = self.apps.read().await;
        let app = apps.get(&connection_key).ok_or(CoreError::AppNotFound(connection_key))?;
        let mut value = app.state.effective(app.capabilities, self.attenuated_supported());

        if app.state.contains(StateId::NaviStreaming)
            && value.audio_streaming_state == AudioStreamingState::Audible
        {
            let this_class = app.capabilities.type_class();
            let contested = apps.values().any(|other| {
                other.connection_key != connection_key
                    && other.capabilities.type_class() != this_class
                    && other.capabilities.is_audio()
                    && matches!(
                        other.state.effective(other.capabilities, self.attenuated_supported()).hmi_level,
                        HmiLevel::Full | HmiLevel::Limited
                    )
            });
            if contested {
                value.audio_streaming_state = AudioStreamingState::Attenuated;
            }
        }
        Ok(value)
    }

    /// Spec §4.4 `SetRegularState`. When `send_activate_hmi` is true
    /// the new regular value is staged in `waiting_for_activate` and
    /// only takes external effect once `on_activate_app_response`
    /// reports success; otherwise it applies immediately.
    pub async fn set_regular_state(
        &self,
        connection_key: ConnectionKey,
        new_regular: HmiStateValue,
        send_activate_hmi: bool,
        correlation_id: Option<CorrelationId>,
    ) -> Result<(), CoreError> {
        let (old_effective, old_regular, hmi_app_id) = {
            let apps = self.apps.read().await;
            let app = apps.get(&connection_key).ok_or(CoreError::AppNotFound(connection_key))?;
            (
                app.state.effective(app.capabilities, self.attenuated_supported()),
                app.state.regular_value(),
                app.hmi_app_id,
            )
        };

        {
            let mut apps = self.apps.write().await;
            let app = apps.get_mut(&connection_key).ok_or(CoreError::AppNotFound(connection_key))?;
            app.state.set_regular(new_regular);
        }

        if send_activate_hmi {
            let correlation_id = correlation_id
                .ok_or_else(|| CoreError::InvalidData("HMI activation requires a correlation id".to_owned()))?;
            self.waiting_for_activate.lock().await.insert(
                connection_key,
                PendingActivation {
                    new_regular,
                    old_regular,
                    old_effective,
                },
            );
            self.message_router.request_app_activation(hmi_app_id, correlation_id).await;
            debug!(%connection_key, %correlation_id, "activation requested; state change staged");
            return Ok(());
        }

        self.apply_and_resolve(connection_key, old_effective, new_regular).await
    }

    /// Response to the HMI activation request issued above. On
    /// success the staged state takes effect and focus conflicts are
    /// resolved; on failure the previous regular state is restored
    /// (spec §4.4: "On failure leave the previous regular state in
    /// place").
    pub async fn on_activate_app_response(&self, connection_key: ConnectionKey, success: bool) -> Result<(), CoreError> {
        let Some(pending) = self.waiting_for_activate.lock().await.remove(&connection_key) else {
            return Ok(());
        };

        if !success {
            let mut apps = self.apps.write().await;
            if let Some(app) = apps.get_mut(&connection_key) {
                app.state.set_regular(pending.old_regular);
            }
            warn!(%connection_key, "HMI activation failed; restored previous regular state");
            return Ok(());
        }

        self.apply_and_resolve(connection_key, pending.old_effective, pending.new_regular)
            .await?;

        if pending.new_regular.hmi_level == HmiLevel::Limited {
            self.message_router.send_resume_audio_source(connection_key).await;
        }
        Ok(())
    }

    async fn apply_and_resolve(
        &self,
        connection_key: ConnectionKey,
        old_effective: HmiStateValue,
        applied_regular: HmiStateValue,
    ) -> Result<(), CoreError> {
        let new_effective = self.effective_state(connection_key).await?;
        if old_effective != new_effective {
            self.message_router.send_hmi_status_notification(connection_key, new_effective).await;
            self.usage_stats.record_hmi_state_changed(connection_key, new_effective.hmi_level);
            if new_effective.hmi_level == HmiLevel::None {
                self.reset_app_data(connection_key).await;
            }
        }
        self.resolve_conflicts(connection_key, applied_regular).await;
        Ok(())
    }

    async fn reset_app_data(&self, connection_key: ConnectionKey) {
        let mut apps = self.apps.write().await;
        if let Some(app) = apps.get_mut(&connection_key) {
            app.commands.clear();
            app.submenus.clear();
            app.choice_sets.clear();
        }
    }

    /// `HmiLevelConflictResolver` (spec §4.4): walks every other
    /// application and demotes it per the rule set, using `applied`
    /// (the app that just changed) as the reference.
    async fn resolve_conflicts(&self, applied_app: ConnectionKey, applied: HmiStateValue) {
        let attenuated_supported = self.attenuated_supported();
        let applied_class = {
            let apps = self.apps.read().await;
            let Some(app) = apps.get(&applied_app) else { return };
            app.capabilities.type_class()
        };

        let mut notify = Vec::new();
        {
            let mut apps = self.apps.write().await;
            let other_keys: Vec<ConnectionKey> = apps.keys().copied().filter(|k| *k != applied_app).collect();

            for other_key in other_keys {
                let (other_caps, other_effective) = {
                    let Some(other) = apps.get(&other_key) else { continue };
                    (other.capabilities, other.state.effective(other.capabilities, attenuated_supported))
                };
                let other_class = other_caps.type_class();

                let demotion = demotion_for(applied.hmi_level, applied_class, other_class, other_effective.hmi_level);
                let Some(new_level) = demotion else { continue };

                let audio = if new_level == HmiLevel::Limited && other_caps.is_audio() {
                    AudioStreamingState::Audible
                } else {
                    AudioStreamingState::NotAudible
                };
                let new_regular = HmiStateValue::new(new_level, audio, other_effective.system_context);

                if let Some(other_app) = apps.get_mut(&other_key) {
                    other_app.state.set_regular(new_regular);
                    let after = other_app.state.effective(other_app.capabilities, attenuated_supported);
                    if after != other_effective {
                        notify.push((other_key, after));
                    }
                }
            }
        }

        for (key, state) in notify {
            self.message_router.send_hmi_status_notification(key, state).await;
            self.usage_stats.record_hmi_state_changed(key, state.hmi_level);
        }
    }

    // ── Transient/overlay state push & pop (spec §4.3, §4.4) ──────

    /// Pushes a transient overlay onto every registered app's stack.
    /// A no-op if this `state_id` is already active (spec §4.4:
    /// `active_states_` holds at most one of each kind).
    pub async fn push_state(&self, state_id: StateId) {
        debug_assert!(!matches!(state_id, StateId::Regular));
        {
            let mut active = self.active_states.lock().await;
            if !active.insert(state_id) {
                debug!(?state_id, "overlay already active; push is a no-op");
                return;
            }
        }

        let attenuated_supported = self.attenuated_supported();
        let mut notify = Vec::new();
        {
            let mut apps = self.apps.write().await;
            for (key, app) in apps.iter_mut() {
                let before = app.state.effective(app.capabilities, attenuated_supported);
                app.state.push(state_id);
                let after = app.state.effective(app.capabilities, attenuated_supported);
                if before != after {
                    notify.push((*key, after));
                }
            }
        }
        for (key, state) in notify {
            self.message_router.send_hmi_status_notification(key, state).await;
        }
        info!(?state_id, "overlay pushed across all applications");
    }

    /// Pops a transient overlay from every registered app's stack.
    pub async fn pop_state(&self, state_id: StateId) {
        {
            let mut active = self.active_states.lock().await;
            if !active.remove(&state_id) {
                debug!(?state_id, "overlay was not active; pop is a no-op");
                return;
            }
        }

        let attenuated_supported = self.attenuated_supported();
        let mut notify = Vec::new();
        {
            let mut apps = self.apps.write().await;
            for (key, app) in apps.iter_mut() {
                let before = app.state.effective(app.capabilities, attenuated_supported);
                app.state.pop(state_id);
                let after = app.state.effective(app.capabilities, attenuated_supported);
                if before != after {
                    notify.push((*key, after));
                }
            }
        }
        for (key, state) in notify {
            self.message_router.send_hmi_status_notification(key, state).await;
        }
        info!(?state_id, "overlay popped across all applications");
    }

    /// Deactivates one application for the named reason (spec §11).
    /// All three reasons currently demote identically to BACKGROUND;
    /// the reason is threaded through for `UsageStatsSink` and future
    /// reason-specific policy, matching the original's
    /// `DeactivateAppWithAudioReason` / `...NaviReason` /
    /// `...GeneralReason` trio which share behavior today.
    pub async fn on_app_deactivated(
        &self,
        connection_key: ConnectionKey,
        reason: DeactivationReason,
    ) -> Result<(), CoreError> {
        let current = self.effective_state(connection_key).await?;
        let background = HmiStateValue::new(HmiLevel::Background, AudioStreamingState::NotAudible, current.system_context);
        debug!(%connection_key, ?reason, "deactivating application");
        self.set_regular_state(connection_key, background, false, None).await
    }

    /// Whether `hmi_level` may be restored for a resuming app right
    /// now (spec §4.4 "State availability check"): phone calls only
    /// block media-app resumption; VR and safety mode block any app.
    pub async fn is_state_available_for_resumption(
        &self,
        connection_key: ConnectionKey,
        hmi_level: HmiLevel,
    ) -> Result<bool, CoreError> {
        if !matches!(hmi_level, HmiLevel::Full | HmiLevel::Limited) {
            return Ok(true);
        }
        let active = self.active_states.lock().await;
        if active.contains(&StateId::VrSession) || active.contains(&StateId::SafetyMode) {
            return Ok(false);
        }
        if active.contains(&StateId::PhoneCall) {
            let apps = self.apps.read().await;
            let is_media = apps.get(&connection_key).is_some_and(|a| a.capabilities.is_media);
            return Ok(!is_media);
        }
        Ok(true)
    }
}

/// Pure decision table for `HmiLevelConflictResolver` (spec §4.4).
/// Returns the new level `other` should demote to, or `None` to leave
/// it unchanged.
fn demotion_for(
    applied_level: HmiLevel,
    applied_class: AppTypeClass,
    other_class: AppTypeClass,
    other_level: HmiLevel,
) -> Option<HmiLevel> {
    match applied_level {
        HmiLevel::Full => {
            if other_class == AppTypeClass::NonAudio {
                if other_level == HmiLevel::Full {
                    return Some(HmiLevel::Background);
                }
                return None;
            }
            if applied_class == other_class {
                if matches!(other_level, HmiLevel::Full | HmiLevel::Limited) {
                    return Some(HmiLevel::Background);
                }
                None
            } else if matches!(other_level, HmiLevel::Full | HmiLevel::Limited) {
                Some(HmiLevel::Limited)
            } else {
                None
            }
        }
        HmiLevel::Limited => {
            if applied_class == other_class && matches!(other_level, HmiLevel::Full | HmiLevel::Limited) {
                Some(HmiLevel::Background)
            } else {
                None
            }
        }
        _ => None,
    }
}
