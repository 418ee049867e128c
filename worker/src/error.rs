//! Error types for the encode worker.

use std::path::PathBuf;

/// Errors produced while turning a profile request into an [`EncodeSpec`].
///
/// [`EncodeSpec`]: crate::options::EncodeSpec
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// The codec name is not in the resolver table.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A ladder rung whose resolution or bitrate is malformed.
    #[error("invalid ladder rung {resolution}@{bitrate}: {reason}")]
    InvalidRung {
        resolution: String,
        bitrate: String,
        reason: String,
    },
}

/// Errors that reject a whole batch. Per-task encode failures are recorded in
/// the [`JobResult`](crate::manifest::JobResult) instead, except in
/// strict-abort mode where the first one surfaces as [`JobError::EncodeFailure`].
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The source file does not exist.
    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// A requested codec name is not supported.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A requested ladder rung could not be parsed.
    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    /// Two requested profiles would write the same output or manifest key.
    #[error("duplicate profile in request: {0}")]
    DuplicateProfile(String),

    /// The output directory could not be created.
    #[error("failed to create output directory {}: {source}", path.display())]
    OutputDirCreateFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An encode failed while running under the strict-abort policy.
    #[error("Error during conversion to {profile}: {diagnostic}")]
    EncodeFailure { profile: String, diagnostic: String },
}

impl JobError {
    /// HTTP-style status class for transport bindings.
    pub fn status_code(&self) -> u16 {
        match self {
            JobError::InputNotFound(_) => 404,
            JobError::UnsupportedFormat(_)
            | JobError::InvalidProfile(_)
            | JobError::DuplicateProfile(_) => 400,
            JobError::OutputDirCreateFailure { .. } | JobError::EncodeFailure { .. } => 500,
        }
    }
}

impl From<ResolutionError> for JobError {
    fn from(err: ResolutionError) -> Self {
        match err {
            ResolutionError::UnsupportedFormat(name) => JobError::UnsupportedFormat(name),
            other @ ResolutionError::InvalidRung { .. } => {
                JobError::InvalidProfile(other.to_string())
            }
        }
    }
}

/// Invalid worker configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_class() {
        assert_eq!(JobError::InputNotFound(PathBuf::from("a.mp4")).status_code(), 404);
        assert_eq!(JobError::UnsupportedFormat("vp10".into()).status_code(), 400);
        assert_eq!(JobError::DuplicateProfile("vp8".into()).status_code(), 400);
        let err = JobError::EncodeFailure {
            profile: "vp9".into(),
            diagnostic: "boom".into(),
        };
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn resolution_error_maps_to_job_error() {
        let err: JobError = ResolutionError::UnsupportedFormat("vp10".into()).into();
        assert!(matches!(err, JobError::UnsupportedFormat(ref n) if n == "vp10"));

        let err: JobError = ResolutionError::InvalidRung {
            resolution: "big".into(),
            bitrate: "4M".into(),
            reason: "expected WIDTHxHEIGHT".into(),
        }
        .into();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("big@4M"));
    }
}
