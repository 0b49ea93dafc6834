//! Per-application stack of regular + overlay `HmiState` entries (§3,
//! §4.3). The bottom entry is always `Regular`; overlays are pushed on
//! top and the effective state is the top.

use crate::model::hmi_state::{AppCapabilities, HmiState, HmiStateValue, StateId};

/// Owns one application's state chain. `StateController` holds one of
/// these per registered app.
#[derive(Debug, Clone)]
pub struct StateStack {
    /// Index 0 is the regular state; later entries are overlays in
    /// push order, each computed against the one before it.
    entries: Vec<HmiState>,
}

impl StateStack {
    #[must_use]
    pub fn new(initial_regular: HmiStateValue) -> Self {
        Self {
            entries: vec![HmiState::regular(initial_regular)],
        }
    }

    /// The current regular value, whether or not it is visible.
    #[must_use]
    pub fn regular_value(&self) -> HmiStateValue {
        self.entries[0].regular_value
    }

    /// Replaces the bottom (regular) entry. If any overlay is above
    /// it, the change is invisible until the overlays are popped.
    pub fn set_regular(&mut self, value: HmiStateValue) {
        self.entries[0] = HmiState::regular(value);
    }

    /// True if any overlay is currently pushed.
    #[must_use]
    pub fn has_overlays(&self) -> bool {
        self.entries.len() > 1
    }

    /// True if the given overlay kind is anywhere on the stack.
    #[must_use]
    pub fn contains(&self, state_id: StateId) -> bool {
        self.entries.iter().any(|e| e.state_id == state_id)
    }

    /// Pushes a new overlay on top of the stack.
    pub fn push(&mut self, state_id: StateId) {
        debug_assert!(!matches!(state_id, StateId::Regular));
        self.entries.push(HmiState::overlay(state_id));
    }

    /// Pops the named overlay wherever it sits on the stack (overlays
    /// may be popped out of push order, e.g. VR ending while a phone
    /// call is still active). Returns `true` if found and removed.
    pub fn pop(&mut self, state_id: StateId) -> bool {
        let Some(idx) = self.entries.iter().position(|e| e.state_id == state_id) else {
            return false;
        };
        self.entries.remove(idx);
        true
    }

    /// Computes the effective (topmost) state by folding from the
    /// bottom up, each overlay consuming the one below as its parent.
    #[must_use]
    pub fn effective(&self, caps: AppCapabilities, attenuated_supported: bool) -> HmiStateValue {
        let mut value = self.entries[0].regular_value;
        for entry in &self.entries[1..] {
            value = entry.compute(value, caps, attenuated_supported);
        }
        value
    }

    /// Number of stack entries, including the regular one. Exposed for
    /// the invariant check "exactly one REGULAR, at the bottom".
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false // the regular entry always exists
    }

    #[must_use]
    pub fn bottom_is_regular(&self) -> bool {
        self.entries[0].state_id == StateId::Regular
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::hmi_state::{AudioStreamingState, HmiLevel, SystemContext};

    fn caps_media() -> AppCapabilities {
        AppCapabilities {
            is_media: true,
            is_navi: false,
            is_voice_communication: false,
        }
    }

    fn full_audible() -> HmiStateValue {
        HmiStateValue::new(HmiLevel::Full, AudioStreamingState::Audible, SystemContext::Main)
    }

    #[test]
    fn new_stack_has_single_regular_entry() {
        let stack = StateStack::new(full_audible());
        assert_eq!(stack.len(), 1);
        assert!(stack.bottom_is_regular());
        assert!(!stack.has_overlays());
    }

    #[test]
    fn push_pop_is_a_no_op_on_effective_state() {
        let mut stack = StateStack::new(full_audible());
        let before = stack.effective(caps_media(), false);

        stack.push(StateId::PhoneCall);
        assert!(stack.has_overlays());
        stack.pop(StateId::PhoneCall);

        let after = stack.effective(caps_media(), false);
        assert_eq!(before, after);
        assert!(!stack.has_overlays());
    }

    #[test]
    fn phone_call_overlay_changes_effective_state_for_media_app() {
        let mut stack = StateStack::new(full_audible());
        stack.push(StateId::PhoneCall);
        let effective = stack.effective(caps_media(), false);
        assert_eq!(effective.hmi_level, HmiLevel::Background);
        assert_eq!(effective.audio_streaming_state, AudioStreamingState::NotAudible);
    }

    #[test]
    fn pop_of_absent_overlay_returns_false() {
        let mut stack = StateStack::new(full_audible());
        assert!(!stack.pop(StateId::VrSession));
    }

    #[test]
    fn overlays_can_be_popped_out_of_push_order() {
        let mut stack = StateStack::new(full_audible());
        stack.push(StateId::PhoneCall);
        stack.push(StateId::VrSession);
        assert!(stack.pop(StateId::PhoneCall));
        assert_eq!(stack.len(), 2);
        assert!(stack.pop(StateId::VrSession));
        assert!(!stack.has_overlays());
    }
}
