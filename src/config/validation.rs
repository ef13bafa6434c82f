//! Configuration validation module

use crate::config::{BrowserConfig, SandboxConfig, SchedulerConfig};

/// Trait for validating configuration sections
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Scheduler configuration error: {message}")]
    Scheduler { message: String },

    #[error("Sandbox configuration error: {message}")]
    Sandbox { message: String },

    #[error("Browser configuration error: {message}")]
    Browser { message: String },
}

impl ValidationError {
    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler {
            message: message.into(),
        }
    }

    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::Sandbox {
            message: message.into(),
        }
    }

    pub fn browser(message: impl Into<String>) -> Self {
        Self::Browser {
            message: message.into(),
        }
    }
}

impl Validate for SchedulerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrency == 0 {
            return Err(ValidationError::scheduler("max_concurrency must be >= 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ValidationError::scheduler("poll_interval_ms must be > 0"));
        }
        if self.processing_timeout_ms < 1_000 {
            return Err(ValidationError::scheduler(
                "processing_timeout_ms must be at least 1000",
            ));
        }
        if self.retry_backoff_ms == 0 {
            return Err(ValidationError::scheduler("retry_backoff_ms must be > 0"));
        }
        if self.default_max_retries > 10 {
            return Err(ValidationError::scheduler(
                "default_max_retries must be <= 10",
            ));
        }
        Ok(())
    }
}

impl Validate for SandboxConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.image.is_empty() {
            return Err(ValidationError::sandbox("image must not be empty"));
        }
        if self.memory_mb < 64 {
            return Err(ValidationError::sandbox("memory_mb must be at least 64"));
        }
        if self.cpu_quota <= 0.0 {
            return Err(ValidationError::sandbox("cpu_quota must be positive"));
        }
        if self.pids_limit == 0 {
            return Err(ValidationError::sandbox("pids_limit must be > 0"));
        }
        if self.timeout_ms < 10_000 {
            return Err(ValidationError::sandbox(
                "timeout_ms must be at least 10000",
            ));
        }
        if self.run_as_user.trim().is_empty() || self.run_as_user.starts_with("0:") {
            return Err(ValidationError::sandbox(
                "run_as_user must be a non-root uid:gid",
            ));
        }
        Ok(())
    }
}

impl Validate for BrowserConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.executable.is_empty() {
            return Err(ValidationError::browser("executable must not be empty"));
        }
        if self.navigation_timeout_ms < 1_000 {
            return Err(ValidationError::browser(
                "navigation_timeout_ms must be at least 1000",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_concurrency() {
        let config = SchedulerConfig {
            max_concurrency: 0,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_root_sandbox_user() {
        let config = SandboxConfig {
            run_as_user: "0:0".to_string(),
            ..SandboxConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_tiny_memory_ceiling() {
        let config = SandboxConfig {
            memory_mb: 16,
            ..SandboxConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
