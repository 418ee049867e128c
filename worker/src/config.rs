use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::orchestrator::{BatchSettings, FailurePolicy};
use crate::transcoder::FfmpegEncoder;

pub const VALKEY_URL_ENV_VAR: &str = "VALKEY_URL";
pub const INPUT_DIR_ENV_VAR: &str = "INPUT_DIR";
pub const ENCODER_COMMAND_ENV_VAR: &str = "ENCODER_COMMAND";
pub const ENCODE_TIMEOUT_ENV_VAR: &str = "ENCODE_TIMEOUT_SECS";
pub const MAX_PARALLEL_ENV_VAR: &str = "ENCODE_MAX_PARALLEL";
pub const FAILURE_POLICY_ENV_VAR: &str = "FAILURE_POLICY";

pub const DEFAULT_VALKEY_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_INPUT_DIR: &str = "videos/input";
pub const DEFAULT_ENCODER_COMMAND: &str = "ffmpeg";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub valkey_url: String,
    /// Base directory for relative input paths in job payloads.
    pub input_dir: PathBuf,
    pub encoder_command: String,
    pub encode_timeout: Option<Duration>,
    pub max_parallel: usize,
    pub failure_policy: FailurePolicy,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; unset keys take their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let valkey_url =
            lookup(VALKEY_URL_ENV_VAR).unwrap_or_else(|| DEFAULT_VALKEY_URL.to_string());
        let input_dir = PathBuf::from(
            lookup(INPUT_DIR_ENV_VAR).unwrap_or_else(|| DEFAULT_INPUT_DIR.to_string()),
        );

        let encoder_command =
            lookup(ENCODER_COMMAND_ENV_VAR).unwrap_or_else(|| DEFAULT_ENCODER_COMMAND.to_string());
        if encoder_command.trim().is_empty() {
            return Err(invalid(ENCODER_COMMAND_ENV_VAR, encoder_command, "must name a program"));
        }

        let encode_timeout = match lookup(ENCODE_TIMEOUT_ENV_VAR) {
            None => None,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(e) => return Err(invalid(ENCODE_TIMEOUT_ENV_VAR, raw, e.to_string())),
            },
        };

        let max_parallel = match lookup(MAX_PARALLEL_ENV_VAR) {
            None => 1,
            Some(raw) if raw.trim().eq_ignore_ascii_case("auto") => {
                std::thread::available_parallelism().map_or(1, |n| n.get())
            }
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(0) => return Err(invalid(MAX_PARALLEL_ENV_VAR, raw, "must be at least 1")),
                Ok(n) => n,
                Err(e) => return Err(invalid(MAX_PARALLEL_ENV_VAR, raw, e.to_string())),
            },
        };

        let failure_policy = match lookup(FAILURE_POLICY_ENV_VAR) {
            None => FailurePolicy::Isolate,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "isolate" => FailurePolicy::Isolate,
                "abort" => FailurePolicy::AbortOnFirstFailure,
                _ => return Err(invalid(FAILURE_POLICY_ENV_VAR, raw, "expected isolate or abort")),
            },
        };

        Ok(WorkerConfig {
            valkey_url,
            input_dir,
            encoder_command,
            encode_timeout,
            max_parallel,
            failure_policy,
        })
    }

    pub fn encoder(&self) -> FfmpegEncoder {
        FfmpegEncoder::from_command_line(&self.encoder_command)
            .unwrap_or_default()
            .with_timeout(self.encode_timeout)
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            max_parallel: self.max_parallel,
            failure_policy: self.failure_policy,
        }
    }

    /// Absolute and already-rooted paths pass through; others are joined to
    /// `input_dir`.
    pub fn input_path(&self, requested: &str) -> PathBuf {
        let path = Path::new(requested);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.input_dir.join(path)
        }
    }
}

fn invalid(var: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.valkey_url, DEFAULT_VALKEY_URL);
        assert_eq!(config.input_dir, PathBuf::from(DEFAULT_INPUT_DIR));
        assert_eq!(config.encode_timeout, None);
        assert_eq!(config.batch_settings(), BatchSettings::default());
        assert_eq!(config.encoder().program(), "ffmpeg");
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            (ENCODE_TIMEOUT_ENV_VAR, "600"),
            (MAX_PARALLEL_ENV_VAR, "3"),
            (FAILURE_POLICY_ENV_VAR, "Abort"),
            (ENCODER_COMMAND_ENV_VAR, "nice -n 5 ffmpeg"),
        ])
        .unwrap();
        assert_eq!(config.encode_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.max_parallel, 3);
        assert_eq!(config.failure_policy, FailurePolicy::AbortOnFirstFailure);
        let encoder = config.encoder();
        assert_eq!(encoder.program(), "nice");
        assert_eq!(encoder.timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn zero_timeout_disables_it() {
        let config = config_from(&[(ENCODE_TIMEOUT_ENV_VAR, "0")]).unwrap();
        assert_eq!(config.encode_timeout, None);
    }

    #[test]
    fn auto_parallelism_is_positive() {
        let config = config_from(&[(MAX_PARALLEL_ENV_VAR, "auto")]).unwrap();
        assert!(config.max_parallel >= 1);
    }

    #[test]
    fn rejects_bad_values() {
        for (var, value) in [
            (MAX_PARALLEL_ENV_VAR, "0"),
            (MAX_PARALLEL_ENV_VAR, "many"),
            (ENCODE_TIMEOUT_ENV_VAR, "-1"),
            (FAILURE_POLICY_ENV_VAR, "retry"),
            (ENCODER_COMMAND_ENV_VAR, "  "),
        ] {
            match config_from(&[(var, value)]) {
                Err(ConfigError::Invalid { var: got, .. }) => assert_eq!(got, var),
                Ok(_) => panic!("{var}={value} should be rejected"),
            }
        }
    }

    #[test]
    fn relative_inputs_join_input_dir() {
        let config = config_from(&[(INPUT_DIR_ENV_VAR, "/srv/input")]).unwrap();
        assert_eq!(config.input_path("movie.mp4"), PathBuf::from("/srv/input/movie.mp4"));
        assert_eq!(config.input_path("/data/clip.mp4"), PathBuf::from("/data/clip.mp4"));
    }
}
