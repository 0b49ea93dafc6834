//! Configuration values consumed by the core (§6). Loading these from
//! TOML/env is the job of the `sdl-config` crate; this type is simply
//! the shape the core agrees to accept, with the same defaults as the
//! original profile (named in parens in spec §6).

use std::time::Duration;

use crate::model::hmi_state::HmiLevel;

#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationManagerConfig {
    pub thread_pool_size: usize,
    /// 0 means unbounded.
    pub pending_requests_amount: u32,

    pub app_time_scale: Duration,
    /// 0 disables this gate.
    pub app_time_scale_max_requests: u32,

    pub app_hmi_level_none_time_scale: Duration,
    pub app_hmi_level_none_time_scale_max_requests: u32,

    pub default_timeout: Duration,
    /// `None` means heartbeat is off.
    pub heart_beat_timeout: Option<Duration>,

    pub app_resumption_save_persistent_data_timeout: Duration,
    pub app_resuming_timeout: Duration,
    pub resumption_delay_before_ign: Duration,
    pub resumption_delay_after_ign: Duration,

    pub hash_string_size: usize,
    pub is_mixing_audio_supported: bool,

    /// HMI level assigned when a resumption candidate fails its
    /// temporal/policy preconditions (spec §4.5: "set the app to the
    /// HMI's default HMI level"). Not named in §6's enumerated option
    /// list; added here since the core needs a concrete value to apply.
    pub default_not_resumed_hmi_level: HmiLevel,
}

impl Default for ApplicationManagerConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: 2,
            pending_requests_amount: 0,
            app_time_scale: Duration::ZERO,
            app_time_scale_max_requests: 0,
            app_hmi_level_none_time_scale: Duration::from_secs(10),
            app_hmi_level_none_time_scale_max_requests: 100,
            default_timeout: Duration::from_millis(10_000),
            heart_beat_timeout: None,
            app_resumption_save_persistent_data_timeout: Duration::from_secs(30),
            app_resuming_timeout: Duration::from_secs(3),
            resumption_delay_before_ign: Duration::from_secs(30),
            resumption_delay_after_ign: Duration::from_secs(30),
            hash_string_size: 32,
            is_mixing_audio_supported: false,
            default_not_resumed_hmi_level: HmiLevel::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_parenthesized_values() {
        let cfg = ApplicationManagerConfig::default();
        assert_eq!(cfg.thread_pool_size, 2);
        assert_eq!(cfg.pending_requests_amount, 0);
        assert_eq!(cfg.app_hmi_level_none_time_scale, Duration::from_secs(10));
        assert_eq!(cfg.app_hmi_level_none_time_scale_max_requests, 100);
        assert_eq!(cfg.default_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.app_resuming_timeout, Duration::from_secs(3));
        assert_eq!(cfg.resumption_delay_before_ign, Duration::from_secs(30));
        assert_eq!(cfg.resumption_delay_after_ign, Duration::from_secs(30));
        assert_eq!(cfg.hash_string_size, 32);
        assert!(!cfg.is_mixing_audio_supported);
    }
}
