//! Layered configuration for the gateway, per SPEC_FULL.md §3 and §6.
//!
//! Resolution order, lowest to highest precedence: built-in defaults, a TOML
//! file, environment variables prefixed `GATEWAY_`, then CLI flags (the
//! `gateway` binary applies CLI overrides after loading this struct).

use crate::error::{ConfigError, PreserverError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// *audio settings* parameter file contents, per SPEC_FULL.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub sample_length_secs: f64,
    pub channel_count: u16,
    pub channel_index: u16,
    pub max_queue_length: usize,
    pub max_missed_attempts: u32,
    pub max_required_proc_freq: f64,
    pub trans_width_proc: f64,
    pub trans_width_rec: f64,
    pub main_thread_cycle_time_ms: u64,
    pub candidate_sampling_freqs: Vec<u32>,
    /// `None` means recording is disabled; only the processing branch runs.
    pub recording_sample_rate: Option<u32>,
    /// Seconds the capture device may go without producing a buffer before
    /// the watchdog flags it. `None` disables the watchdog.
    pub watchdog_timeout_secs: Option<u64>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_length_secs: 0.05,
            channel_count: 1,
            channel_index: 0,
            max_queue_length: 256,
            max_missed_attempts: 8,
            max_required_proc_freq: 3_000.0,
            trans_width_proc: 400.0,
            trans_width_rec: 400.0,
            main_thread_cycle_time_ms: 20,
            candidate_sampling_freqs: vec![8_000, 16_000, 22_050, 44_100, 48_000],
            recording_sample_rate: Some(8_000),
            watchdog_timeout_secs: Some(30),
        }
    }
}

/// *detection parameters* parameter file contents, per SPEC_FULL.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    pub sample_length_ms: f64,
    pub sample_length_coarse_ms: f64,
    pub max_num_peaks: usize,
    pub max_num_peaks_coarse: usize,
    pub freq_resolution: usize,
    pub freq_resolution_coarse: usize,
    pub max_delta_f: f64,
    pub overlap: f64,
    pub overlap_coarse: f64,
    pub delta: f64,
    pub delta_coarse: f64,
    pub max_freq_dev_constrained: f64,
    pub max_freq_dev_unconstrained: f64,
    pub num_neighbours: usize,
    pub eval_tone_length_ms: f64,
    pub search_timestep_ms: u64,
    /// The 10 nominal TR-BOS/ZVEI tone frequencies, ordered digits 1-9 then
    /// 0 (so index 9, the 10th entry, is digit 0 per spec), followed by the
    /// repetition tone's nominal frequency as the 11th entry.
    pub search_freqs: Vec<f64>,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            sample_length_ms: 40.0,
            sample_length_coarse_ms: 160.0,
            max_num_peaks: 4,
            max_num_peaks_coarse: 4,
            freq_resolution: 512,
            freq_resolution_coarse: 2048,
            max_delta_f: 0.03,
            overlap: 0.5,
            overlap_coarse: 0.75,
            delta: 0.1,
            delta_coarse: 0.1,
            max_freq_dev_constrained: 0.35,
            max_freq_dev_unconstrained: 0.1,
            num_neighbours: 2,
            eval_tone_length_ms: 2_000.0,
            search_timestep_ms: 500,
            search_freqs: vec![
                2_400.0, 1_060.0, 1_160.0, 1_270.0, 1_400.0, 1_530.0, 1_670.0, 1_830.0, 2_000.0,
                // digits 1..9 above, digit 0 below
                2_200.0,
                2_800.0, // repetition tone "R"
            ],
        }
    }
}

/// *FME rules* parameter file contents, per SPEC_FULL.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FmeRules {
    pub code_length: usize,
    pub excess_time_ms: f64,
    pub delta_t_max_twice_ms: f64,
    pub min_length_ms: f64,
    pub max_length_ms: f64,
    pub max_tone_level_ratio: f64,
}

impl Default for FmeRules {
    fn default() -> Self {
        Self {
            code_length: 5,
            excess_time_ms: 15.0,
            delta_t_max_twice_ms: 150.0,
            min_length_ms: 70.0,
            max_length_ms: 100.0,
            max_tone_level_ratio: 3.0,
        }
    }
}

/// Audio Preserver recording window, per SPEC_FULL.md §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingWindow {
    /// Seconds before sequence start; may be negative to record lead-in.
    pub record_lower_secs: f64,
    pub record_upper_secs: f64,
    pub record_buffer_secs: f64,
}

impl Default for RecordingWindow {
    fn default() -> Self {
        Self {
            record_lower_secs: -0.6,
            record_upper_secs: 1.9,
            record_buffer_secs: 1.6,
        }
    }
}

impl RecordingWindow {
    /// The three validation rules from spec.md §4.6.
    pub fn validate(&self) -> Result<(), PreserverError> {
        if self.record_buffer_secs < 0.0 {
            return Err(PreserverError::NegativeBuffer(self.record_buffer_secs));
        }
        if self.record_lower_secs > self.record_upper_secs {
            return Err(PreserverError::LowerExceedsUpper {
                lower: self.record_lower_secs,
                upper: self.record_upper_secs,
            });
        }
        if self.record_lower_secs < 0.0 && self.record_buffer_secs < -self.record_lower_secs {
            return Err(PreserverError::BufferTooSmall {
                buffer: self.record_buffer_secs,
                lower: self.record_lower_secs,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub device: Option<String>,
    pub audio: AudioSettings,
    pub detection: DetectionParams,
    pub fme: FmeRules,
    /// `None` disables the Audio Preserver entirely.
    pub recording: Option<RecordingWindow>,
    pub log_level: String,
    pub metrics_log_interval_secs: u64,
}

impl GatewayConfig {
    /// Loads defaults, layers an optional TOML file, then layers
    /// `GATEWAY_`-prefixed environment variables (double underscore as the
    /// nesting separator, e.g. `GATEWAY_AUDIO__CHANNEL_COUNT=2`).
    pub fn load(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&GatewayConfig::defaults())?);

        if let Some(path) = toml_path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GATEWAY")
                .separator("__")
                .try_parsing(true),
        );

        let resolved: GatewayConfig = builder.build()?.try_deserialize()?;
        Ok(resolved)
    }

    fn defaults() -> Self {
        Self {
            device: None,
            audio: AudioSettings::default(),
            detection: DetectionParams::default(),
            fme: FmeRules::default(),
            recording: Some(RecordingWindow::default()),
            log_level: "info".to_string(),
            metrics_log_interval_secs: 30,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.search_freqs.len() < 11 {
            return Err(ConfigError::Validation {
                field: "detection.search_freqs".to_string(),
                reason: "must list 10 digit frequencies plus the repetition tone".to_string(),
            });
        }
        if self.fme.code_length == 0 {
            return Err(ConfigError::Validation {
                field: "fme.code_length".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        if self.fme.min_length_ms > self.fme.max_length_ms {
            return Err(ConfigError::Validation {
                field: "fme.min_length_ms".to_string(),
                reason: "must be <= max_length_ms".to_string(),
            });
        }
        if self.audio.candidate_sampling_freqs.is_empty() {
            return Err(ConfigError::Validation {
                field: "audio.candidate_sampling_freqs".to_string(),
                reason: "must list at least one candidate rate".to_string(),
            });
        }
        if let Some(recording) = &self.recording {
            recording.validate().map_err(|e| ConfigError::Validation {
                field: "recording".to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let cfg = GatewayConfig::defaults();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn recording_window_rejects_negative_buffer() {
        let w = RecordingWindow {
            record_lower_secs: -0.6,
            record_upper_secs: 1.9,
            record_buffer_secs: -1.0,
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn recording_window_rejects_buffer_smaller_than_lower() {
        let w = RecordingWindow {
            record_lower_secs: -2.0,
            record_upper_secs: 1.0,
            record_buffer_secs: 1.0,
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn recording_window_accepts_spec_scenario_7_values() {
        let w = RecordingWindow {
            record_lower_secs: -0.6,
            record_upper_secs: 1.9,
            record_buffer_secs: 1.6,
        };
        assert!(w.validate().is_ok());
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let cfg = GatewayConfig::load(None).unwrap();
        assert_eq!(cfg.fme.code_length, 5);
    }
}
