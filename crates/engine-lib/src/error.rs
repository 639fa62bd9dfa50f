//! Fatal error taxonomy for a pipeline run
//!
//! Recoverable conditions never surface here; they are recorded as
//! [`crate::models::Recovered`] and the run continues.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage, used to tell operators where a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Metrics,
    Policy,
    Artifact,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Config => write!(f, "configuration"),
            Stage::Metrics => write!(f, "metrics"),
            Stage::Policy => write!(f, "policy"),
            Stage::Artifact => write!(f, "artifact"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("monitoring backend query failed ({query}): {reason}")]
    MetricBackendFailure { query: String, reason: String },

    #[error("policy evaluation call to {url} failed: {reason}")]
    PolicyCallFailure { url: String, reason: String },

    #[error("failed to write allocation artifact {path:?}: {source}")]
    ArtifactWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::MetricBackendFailure { .. } => Stage::Metrics,
            PipelineError::PolicyCallFailure { .. } => Stage::Policy,
            PipelineError::ArtifactWriteFailure { .. } => Stage::Artifact,
            PipelineError::Config(_) => Stage::Config,
        }
    }

    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self.stage() {
            Stage::Config => 1,
            Stage::Metrics => 2,
            Stage::Policy => 3,
            Stage::Artifact => 4,
        }
    }
}

impl From<::config::ConfigError> for PipelineError {
    fn from(err: ::config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_stage() {
        let metrics = PipelineError::MetricBackendFailure {
            query: "up".into(),
            reason: "connection refused".into(),
        };
        let policy = PipelineError::PolicyCallFailure {
            url: "http://opa".into(),
            reason: "503".into(),
        };
        let artifact = PipelineError::ArtifactWriteFailure {
            path: PathBuf::from("/nope/inputs.yaml"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };

        assert_eq!(metrics.exit_code(), 2);
        assert_eq!(policy.exit_code(), 3);
        assert_eq!(artifact.exit_code(), 4);
        assert_eq!(PipelineError::Config("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_message_names_failing_stage() {
        let err = PipelineError::PolicyCallFailure {
            url: "http://localhost:8181/v1/data".into(),
            reason: "timed out".into(),
        };
        assert_eq!(err.stage(), Stage::Policy);
        assert!(err.to_string().contains("policy evaluation call"));
    }
}
