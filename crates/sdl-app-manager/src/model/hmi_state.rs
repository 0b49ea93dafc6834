//! The HMI state triple and the tagged-variant overlay hierarchy.
//!
//! The original source models `HmiState` as a C++ inheritance
//! hierarchy (`PhoneCallHmiState`, `SafetyModeHmiState`, ...). Per the
//! redesign notes this becomes a sum type: [`StateId`] tags which
//! overlay policy applies, and [`HmiState::compute`] is a pure
//! function over `(self, parent)`.

use strum::Display as StrumDisplay;

/// Coarse foreground status of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, serde::Serialize, serde::Deserialize)]
pub enum HmiLevel {
    Full,
    Limited,
    Background,
    None,
}

/// Audio focus of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, serde::Serialize, serde::Deserialize)]
pub enum AudioStreamingState {
    Audible,
    Attenuated,
    NotAudible,
}

/// Modal overlay active on the HMI from this application's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, serde::Serialize, serde::Deserialize)]
pub enum SystemContext {
    Main,
    VrSession,
    Menu,
    HmiObscured,
    Alert,
}

/// Which overlay policy a stack entry represents. At most one of each
/// kind (other than `Regular`, which is always exactly one) may be
/// present across `active_states_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, serde::Serialize, serde::Deserialize)]
pub enum StateId {
    Regular,
    PhoneCall,
    SafetyMode,
    VrSession,
    TtsSession,
    NaviStreaming,
}

/// App type class used by the conflict resolver and by audio overlay
/// policies to decide whether two applications "compete" for focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppTypeClass {
    Media,
    Navi,
    VoiceComm,
    NonAudio,
}

/// Capability flags carried on an application, used to classify it for
/// conflict resolution and overlay policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppCapabilities {
    pub is_media: bool,
    pub is_navi: bool,
    pub is_voice_communication: bool,
}

impl AppCapabilities {
    #[must_use]
    pub fn is_audio(&self) -> bool {
        self.is_media || self.is_navi || self.is_voice_communication
    }

    /// The type class used for same-vs-different-class comparisons in
    /// `HmiLevelConflictResolver`. Corresponds to `IsSameAppType` in
    /// `state_controller.cc`.
    #[must_use]
    pub fn type_class(&self) -> AppTypeClass {
        if self.is_media {
            AppTypeClass::Media
        } else if self.is_navi {
            AppTypeClass::Navi
        } else if self.is_voice_communication {
            AppTypeClass::VoiceComm
        } else {
            AppTypeClass::NonAudio
        }
    }
}

/// The effective ⟨hmi_level, audio_streaming_state, system_context⟩
/// triple, computed for a single stack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HmiStateValue {
    pub hmi_level: HmiLevel,
    pub audio_streaming_state: AudioStreamingState,
    pub system_context: SystemContext,
}

impl HmiStateValue {
    #[must_use]
    pub fn new(
        hmi_level: HmiLevel,
        audio_streaming_state: AudioStreamingState,
        system_context: SystemContext,
    ) -> Self {
        Self {
            hmi_level,
            audio_streaming_state,
            system_context,
        }
    }

    /// Checks the validity table in spec §3. Non-audio apps may never
    /// be audible and may never sit at LIMITED.
    #[must_use]
    pub fn is_valid_for(&self, caps: AppCapabilities) -> bool {
        if caps.is_audio() {
            matches!(
                (self.hmi_level, self.audio_streaming_state),
                (HmiLevel::Full, AudioStreamingState::Audible)
                    | (HmiLevel::Full, AudioStreamingState::NotAudible)
                    | (HmiLevel::Limited, AudioStreamingState::Audible)
                    | (HmiLevel::Limited, AudioStreamingState::Attenuated)
                    | (HmiLevel::Background, AudioStreamingState::NotAudible)
                    | (HmiLevel::None, AudioStreamingState::NotAudible)
            )
        } else {
            self.hmi_level != HmiLevel::Limited
                && self.audio_streaming_state == AudioStreamingState::NotAudible
        }
    }
}

/// One entry of an application's state stack. `Regular` is always the
/// bottom; overlays above it compute their value from their own policy
/// and a reference to the entry below.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HmiState {
    pub state_id: StateId,
    /// For the `Regular` entry this is the value set directly by
    /// `SetRegularState`. Overlay entries ignore this field and
    /// compute their effective value in `StateStack::effective`.
    pub regular_value: HmiStateValue,
}

impl HmiState {
    #[must_use]
    pub fn regular(value: HmiStateValue) -> Self {
        Self {
            state_id: StateId::Regular,
            regular_value: value,
        }
    }

    #[must_use]
    pub fn overlay(state_id: StateId) -> Self {
        debug_assert!(!matches!(state_id, StateId::Regular));
        Self {
            state_id,
            // Unused for overlays; `StateStack::effective` recomputes
            // from the parent every time.
            regular_value: HmiStateValue::new(
                HmiLevel::None,
                AudioStreamingState::NotAudible,
                SystemContext::Main,
            ),
        }
    }

    /// Computes this entry's effective value given the parent (the
    /// entry directly beneath it on the stack). Mirrors the
    /// `CalcHmiLevel` / `audio_streaming_state` getters of each
    /// `HmiState` subclass in the original source.
    #[must_use]
    pub fn compute(&self, parent: HmiStateValue, caps: AppCapabilities, attenuated_supported: bool) -> HmiStateValue {
        match self.state_id {
            StateId::Regular => self.regular_value,
            StateId::PhoneCall => {
                let hmi_level = if caps.is_media {
                    HmiLevel::Background
                } else {
                    parent.hmi_level
                };
                HmiStateValue::new(hmi_level, AudioStreamingState::NotAudible, parent.system_context)
            }
            StateId::SafetyMode => {
                HmiStateValue::new(HmiLevel::None, AudioStreamingState::NotAudible, parent.system_context)
            }
            StateId::VrSession => {
                HmiStateValue::new(parent.hmi_level, AudioStreamingState::NotAudible, SystemContext::VrSession)
            }
            StateId::TtsSession => {
                let audio = if caps.is_audio() {
                    if attenuated_supported {
                        AudioStreamingState::Attenuated
                    } else {
                        AudioStreamingState::NotAudible
                    }
                } else {
                    AudioStreamingState::NotAudible
                };
                HmiStateValue::new(parent.hmi_level, audio, parent.system_context)
            }
            StateId::NaviStreaming => {
                // Attenuate only when this app does not itself hold
                // the audio focus it would otherwise keep; the actual
                // "unrelated audio app holds LIMITED/FULL" condition is
                // cross-application and is applied by the StateController
                // when it walks all apps for nav-streaming activation,
                // not here. At the single-app level the overlay is
                // transparent to hmi_level and keeps parent's audio.
                HmiStateValue::new(parent.hmi_level, parent.audio_streaming_state, parent.system_context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(media: bool, navi: bool, vc: bool) -> AppCapabilities {
        AppCapabilities {
            is_media: media,
            is_navi: navi,
            is_voice_communication: vc,
        }
    }

    #[test]
    fn non_audio_cannot_be_limited() {
        let v = HmiStateValue::new(HmiLevel::Limited, AudioStreamingState::NotAudible, SystemContext::Main);
        assert!(!v.is_valid_for(caps(false, false, false)));
    }

    #[test]
    fn audio_full_audible_is_valid() {
        let v = HmiStateValue::new(HmiLevel::Full, AudioStreamingState::Audible, SystemContext::Main);
        assert!(v.is_valid_for(caps(true, false, false)));
    }

    #[test]
    fn phone_call_clamps_media_app_to_background() {
        let parent = HmiStateValue::new(HmiLevel::Full, AudioStreamingState::Audible, SystemContext::Main);
        let overlay = HmiState::overlay(StateId::PhoneCall);
        let effective = overlay.compute(parent, caps(true, false, false), false);
        assert_eq!(effective.hmi_level, HmiLevel::Background);
        assert_eq!(effective.audio_streaming_state, AudioStreamingState::NotAudible);
    }

    #[test]
    fn phone_call_leaves_non_media_hmi_level_unchanged() {
        let parent = HmiStateValue::new(HmiLevel::Full, AudioStreamingState::NotAudible, SystemContext::Main);
        let overlay = HmiState::overlay(StateId::PhoneCall);
        let effective = overlay.compute(parent, caps(false, false, false), false);
        assert_eq!(effective.hmi_level, HmiLevel::Full);
    }

    #[test]
    fn safety_mode_always_drops_to_none() {
        let parent = HmiStateValue::new(HmiLevel::Full, AudioStreamingState::Audible, SystemContext::Main);
        let overlay = HmiState::overlay(StateId::SafetyMode);
        let effective = overlay.compute(parent, caps(true, false, false), false);
        assert_eq!(effective.hmi_level, HmiLevel::None);
        assert_eq!(effective.audio_streaming_state, AudioStreamingState::NotAudible);
    }

    #[test]
    fn tts_attenuates_audio_apps_when_supported() {
        let parent = HmiStateValue::new(HmiLevel::Full, AudioStreamingState::Audible, SystemContext::Main);
        let overlay = HmiState::overlay(StateId::TtsSession);
        let effective = overlay.compute(parent, caps(true, false, false), true);
        assert_eq!(effective.audio_streaming_state, AudioStreamingState::Attenuated);
    }

    #[test]
    fn tts_mutes_audio_apps_when_attenuation_unsupported() {
        let parent = HmiStateValue::new(HmiLevel::Full, AudioStreamingState::Audible, SystemContext::Main);
        let overlay = HmiState::overlay(StateId::TtsSession);
        let effective = overlay.compute(parent, caps(true, false, false), false);
        assert_eq!(effective.audio_streaming_state, AudioStreamingState::NotAudible);
    }

    #[test]
    fn type_class_prefers_media_then_navi_then_voice() {
        assert_eq!(caps(true, true, true).type_class(), AppTypeClass::Media);
        assert_eq!(caps(false, true, true).type_class(), AppTypeClass::Navi);
        assert_eq!(caps(false, false, true).type_class(), AppTypeClass::VoiceComm);
        assert_eq!(caps(false, false, false).type_class(), AppTypeClass::NonAudio);
    }
}
