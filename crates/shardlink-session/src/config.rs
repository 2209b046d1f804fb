//! Session policy configuration.
//!
//! All the numeric policy knobs of the session core live in one struct,
//! [`SessionConfig`], with documented defaults. Every field is public, so
//! callers can start from `SessionConfig::default()` and override just what
//! they need:
//!
//! ```
//! use shardlink_session::SessionConfig;
//!
//! let mut config = SessionConfig::default();
//! config.voice.max_listen_list_size = Some(8);
//! ```
//!
//! With the `json` feature (on by default) a config can also be loaded from
//! a JSON document. Missing fields keep their defaults, so a file only has
//! to mention what it changes:
//!
//! ```
//! # #[cfg(feature = "json")] {
//! use shardlink_session::SessionConfig;
//!
//! let config = SessionConfig::from_json(r#"{ "pending": { "max_age": 60.0 } }"#).unwrap();
//! assert_eq!(config.pending.max_age, 60.0);
//! assert_eq!(config.pending.max_queue_resets, 1800);
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// VoiceConfig
// ---------------------------------------------------------------------------

/// Policy for the proximity voice router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Most participants the listen list may hold. `None` means unlimited.
    ///
    /// Default: `None`.
    pub max_listen_list_size: Option<usize>,

    /// Squared distance (world units²) beyond which a participant can't be
    /// heard. Compared inclusively: a participant exactly at the limit is
    /// in range.
    ///
    /// Default: `75² = 5625`.
    pub max_listen_dist_sq: f32,

    /// Minimum spacing between two proximity samples, in seconds. Ticks
    /// that arrive sooner don't sample at all.
    ///
    /// Default: `0.5`.
    pub update_interval: f64,

    /// Seconds after which the next sample rebuilds and retransmits the
    /// whole listen list instead of sending a diff.
    ///
    /// Default: `5.0`.
    pub force_resync_interval: f64,

    /// Number of incremental samples after which the next one is forced to
    /// be a full rebuild.
    ///
    /// Default: `10`.
    pub max_updates_before_force: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            max_listen_list_size: None,
            max_listen_dist_sq: 75.0 * 75.0,
            update_interval: 0.5,
            force_resync_interval: 5.0,
            max_updates_before_force: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// PendingConfig
// ---------------------------------------------------------------------------

/// Policy for the pending state-load queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingConfig {
    /// How many failed placement attempts a record survives. The attempt
    /// that pushes the count past this value drops the record.
    ///
    /// Default: `1800` (one minute of attempts at 30 Hz).
    pub max_queue_resets: u32,

    /// Absolute age limit in seconds, measured from the first time the
    /// record was queued.
    ///
    /// Default: `300.0`.
    pub max_age: f64,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            max_queue_resets: 1800,
            max_age: 300.0,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Everything configurable about one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub voice: VoiceConfig,
    pub pending: PendingConfig,
}

impl SessionConfig {
    /// Parses a JSON document and validates it.
    ///
    /// # Errors
    /// Returns the `serde_json` error if the document is malformed or a
    /// field has the wrong type.
    #[cfg(feature = "json")]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Self>(json).map(Self::validated)
    }

    /// Replaces values that make no sense with their defaults.
    ///
    /// Rules:
    /// - `max_listen_dist_sq` must be a finite, non-negative number.
    /// - `update_interval` must be finite and non-negative.
    /// - `force_resync_interval` and `max_age` must be finite and positive.
    ///
    /// Each replacement logs a warning.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        if !(self.voice.max_listen_dist_sq.is_finite() && self.voice.max_listen_dist_sq >= 0.0) {
            warn!(
                value = self.voice.max_listen_dist_sq,
                "max_listen_dist_sq must be finite and non-negative, using default"
            );
            self.voice.max_listen_dist_sq = defaults.voice.max_listen_dist_sq;
        }
        if !(self.voice.update_interval.is_finite() && self.voice.update_interval >= 0.0) {
            warn!(
                value = self.voice.update_interval,
                "update_interval must be finite and non-negative, using default"
            );
            self.voice.update_interval = defaults.voice.update_interval;
        }
        if !(self.voice.force_resync_interval.is_finite() && self.voice.force_resync_interval > 0.0)
        {
            warn!(
                value = self.voice.force_resync_interval,
                "force_resync_interval must be positive, using default"
            );
            self.voice.force_resync_interval = defaults.voice.force_resync_interval;
        }
        if !(self.pending.max_age.is_finite() && self.pending.max_age > 0.0) {
            warn!(
                value = self.pending.max_age,
                "pending max_age must be positive, using default"
            );
            self.pending.max_age = defaults.pending.max_age;
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values_match_documentation() {
        let config = SessionConfig::default();
        assert_eq!(config.voice.max_listen_list_size, None);
        assert_eq!(config.voice.max_listen_dist_sq, 5625.0);
        assert_eq!(config.voice.update_interval, 0.5);
        assert_eq!(config.voice.force_resync_interval, 5.0);
        assert_eq!(config.voice.max_updates_before_force, 10);
        assert_eq!(config.pending.max_queue_resets, 1800);
        assert_eq!(config.pending.max_age, 300.0);
    }

    #[test]
    fn test_validated_replaces_negative_distance_and_zero_intervals() {
        let mut config = SessionConfig::default();
        config.voice.max_listen_dist_sq = -1.0;
        config.voice.force_resync_interval = 0.0;
        config.voice.update_interval = f64::NAN;
        config.pending.max_age = -5.0;

        let config = config.validated();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_validated_keeps_sane_values() {
        let mut config = SessionConfig::default();
        config.voice.max_listen_list_size = Some(0);
        config.voice.update_interval = 0.0;
        config.pending.max_queue_resets = 0;

        assert_eq!(config.clone().validated(), config);
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_from_json_partial_document_keeps_defaults() {
        let config =
            SessionConfig::from_json(r#"{"voice":{"max_listen_list_size":3}}"#).unwrap();
        assert_eq!(config.voice.max_listen_list_size, Some(3));
        assert_eq!(config.voice.max_listen_dist_sq, 5625.0);
        assert_eq!(config.pending, PendingConfig::default());
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_from_json_validates() {
        let config = SessionConfig::from_json(r#"{"pending":{"max_age":0}}"#).unwrap();
        assert_eq!(config.pending.max_age, 300.0);
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_from_json_wrong_type_is_error() {
        assert!(SessionConfig::from_json(r#"{"voice":{"max_listen_dist_sq":"far"}}"#).is_err());
    }
}
