//! The registered-application record (§3).

use std::collections::HashMap;

use crate::ids::{ConnectionKey, DeviceHandle, HmiAppId, PolicyAppId};
use crate::model::hmi_state::AppCapabilities;
use crate::model::persisted::{GlobalProperties, PersistedAppRecord, PersistedFile, Subscriptions};
use crate::state::stack::StateStack;

/// A registered mobile application, identified by ⟨policy_app_id,
/// connection_key⟩. Owns its own state stack (the facade owns the
/// application; the application exclusively owns its state chain, per
/// the ownership strategy in spec §9).
pub struct Application {
    pub policy_app_id: PolicyAppId,
    pub connection_key: ConnectionKey,
    pub hmi_app_id: HmiAppId,
    pub device: DeviceHandle,
    pub capabilities: AppCapabilities,
    pub state: StateStack,

    pub commands: HashMap<u32, serde_json::Value>,
    pub submenus: HashMap<u32, serde_json::Value>,
    pub choice_sets: HashMap<u32, serde_json::Value>,
    pub files: HashMap<String, PersistedFile>,
    pub subscriptions: Subscriptions,
    pub global_properties: GlobalProperties,

    pub grammar_id: Option<u32>,
    pub hash: String,
    pub is_resuming: bool,
    /// Set whenever resumable data changes; cleared by the periodic
    /// save timer after `ResumptionStorage::save_application` succeeds.
    pub is_dirty: bool,
}

impl Application {
    #[must_use]
    pub fn new(
        policy_app_id: PolicyAppId,
        connection_key: ConnectionKey,
        hmi_app_id: HmiAppId,
        device: DeviceHandle,
        capabilities: AppCapabilities,
        initial_regular: crate::model::hmi_state::HmiStateValue,
    ) -> Self {
        Self {
            policy_app_id,
            connection_key,
            hmi_app_id,
            device,
            capabilities,
            state: StateStack::new(initial_regular),
            commands: HashMap::new(),
            submenus: HashMap::new(),
            choice_sets: HashMap::new(),
            files: HashMap::new(),
            subscriptions: Subscriptions::default(),
            global_properties: GlobalProperties::default(),
            grammar_id: None,
            hash: String::new(),
            is_resuming: false,
            is_dirty: false,
        }
    }

    /// Recomputes `hash` over the resumable fields. A simplified stand-in
    /// for the original's `CalculateHash`: deterministic over exactly
    /// the fields persisted by `ResumptionStorage`, truncated to
    /// `hash_string_size` the way the original's hex digest is.
    pub fn update_hash(&mut self, hash_string_size: usize) {
        use std::fmt::Write as _;

        let mut acc: u64 = 0xcbf2_9ce4_8422_2325;
        let mut mix = |bytes: &[u8]| {
            for b in bytes {
                acc ^= u64::from(*b);
                acc = acc.wrapping_mul(0x0000_0100_0000_01B3);
            }
        };
        mix(self.policy_app_id.0.as_bytes());
        mix(&self.grammar_id.unwrap_or(0).to_le_bytes());
        for (id, _) in &self.commands {
            mix(&id.to_le_bytes());
        }
        for (id, _) in &self.submenus {
            mix(&id.to_le_bytes());
        }
        for (id, _) in &self.choice_sets {
            mix(&id.to_le_bytes());
        }

        let mut hex = String::new();
        let _ = write!(hex, "{acc:016x}");
        hex.truncate(hash_string_size.min(hex.len()));
        self.hash = hex;
    }

    /// Snapshots the resumable fields into the on-disk record shape
    /// (spec §3, §6). `ign_off_count`/`suspend_count`/`time_stamp` are
    /// not tracked on the live `Application` — they belong to the
    /// storage-cycle lifecycle (`ResumptionStorage::on_suspend`) and
    /// are threaded in by the caller from the previously-saved record.
    #[must_use]
    pub fn to_persisted_record(&self, ign_off_count: u32, suspend_count: u32, time_stamp: i64) -> PersistedAppRecord {
        PersistedAppRecord {
            hmi_app_id: self.hmi_app_id.0,
            hmi_level: self.state.regular_value().hmi_level,
            is_media: self.capabilities.is_media,
            grammar_id: self.grammar_id,
            hash: self.hash.clone(),
            ign_off_count,
            suspend_count,
            time_stamp,
            commands: self.commands.values().cloned().collect(),
            submenus: self.submenus.values().cloned().collect(),
            choice_sets: self.choice_sets.values().cloned().collect(),
            global_properties: self.global_properties.clone(),
            subscriptions: self.subscriptions.clone(),
            files: self.files.values().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::hmi_state::{AudioStreamingState, HmiLevel, SystemContext};

    fn sample_app() -> Application {
        Application::new(
            PolicyAppId::from("app-1"),
            ConnectionKey(1),
            HmiAppId(100),
            DeviceHandle(1),
            AppCapabilities {
                is_media: true,
                is_navi: false,
                is_voice_communication: false,
            },
            crate::model::hmi_state::HmiStateValue::new(
                HmiLevel::None,
                AudioStreamingState::NotAudible,
                SystemContext::Main,
            ),
        )
    }

    #[test]
    fn update_hash_is_deterministic() {
        let mut a = sample_app();
        let mut b = sample_app();
        a.update_hash(32);
        b.update_hash(32);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn update_hash_changes_when_commands_change() {
        let mut a = sample_app();
        a.update_hash(32);
        let before = a.hash.clone();
        a.commands.insert(1, serde_json::json!({"name": "foo"}));
        a.update_hash(32);
        assert_ne!(before, a.hash);
    }

    #[test]
    fn update_hash_respects_truncation_length() {
        let mut a = sample_app();
        a.update_hash(4);
        assert_eq!(a.hash.len(), 4);
    }
}
