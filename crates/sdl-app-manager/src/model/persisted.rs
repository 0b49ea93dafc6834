//! Persisted application records (§3, §6): the on-disk shape of what
//! survives an ignition cycle, independent of which `ResumptionStorage`
//! backend stores it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::hmi_state::HmiLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalProperties {
    pub help_prompt: Option<String>,
    pub timeout_prompt: Option<String>,
    pub vr_help: Option<String>,
    pub menu_title: Option<String>,
    pub menu_icon: Option<String>,
    pub keyboard_properties: Option<String>,
}

impl Default for GlobalProperties {
    fn default() -> Self {
        Self {
            help_prompt: None,
            timeout_prompt: None,
            vr_help: None,
            menu_title: None,
            menu_icon: None,
            keyboard_properties: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subscriptions {
    pub buttons: Vec<String>,
    pub vehicle_info_items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedFile {
    pub file_name: String,
    pub is_persistent: bool,
}

/// One saved per-app record, keyed externally by ⟨device_mac,
/// policy_app_id⟩. Field names mirror spec §3 exactly so serialization
/// round-trips are easy to reason about against the original format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedAppRecord {
    pub hmi_app_id: u32,
    pub hmi_level: HmiLevel,
    pub is_media: bool,
    pub grammar_id: Option<u32>,
    pub hash: String,
    pub ign_off_count: u32,
    pub suspend_count: u32,
    pub time_stamp: i64,
    pub commands: Vec<serde_json::Value>,
    pub submenus: Vec<serde_json::Value>,
    pub choice_sets: Vec<serde_json::Value>,
    pub global_properties: GlobalProperties,
    pub subscriptions: Subscriptions,
    pub files: Vec<PersistedFile>,
}

impl PersistedAppRecord {
    /// Structural validation per spec §7 `ResumptionDataCorrupt`: a
    /// record missing any of these fields, or with a non-positive
    /// `hmi_app_id`, is unusable and must be skipped rather than
    /// partially trusted.
    pub fn validate(&self) -> Result<(), String> {
        if self.hmi_app_id == 0 {
            return Err("hmi_app_id must be positive".to_owned());
        }
        Ok(())
    }

    /// Only files marked persistent survive resumption (`AddFiles` in
    /// the original only restores `is_persistent` entries).
    #[must_use]
    pub fn persistent_files(&self) -> Vec<&PersistedFile> {
        self.files.iter().filter(|f| f.is_persistent).collect()
    }
}

/// Module-wide metadata that is not per-app (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumptionMeta {
    pub last_ign_off_time: Option<i64>,
    pub preloaded: bool,
    pub ccpu_version: Option<String>,
    pub wers_country_code: Option<String>,
    pub language: Option<String>,
    pub vin: Option<String>,
}

/// The full on-disk document for one `ResumptionStorage` backend:
/// all per-app records keyed by `"{device_mac}:{policy_app_id}"`, plus
/// the shared meta block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumptionDocument {
    pub apps: HashMap<String, PersistedAppRecord>,
    pub meta: ResumptionMeta,
}
