//! Provider settings: credentials, parallelism ceiling, poll timings.
//!
//! Loaded once per provider instance from TOML; credentials fall back to
//! environment variables so they can stay out of checked-in files.

use std::path::Path;
use std::time::Duration;

use facet::Facet;

use crate::error::RudderError;

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct Settings {
    /// Base URL of the remote compute API.
    pub api_url: String,
    /// Team/tenant to deploy into; falls back to `RUDDER_TEAM_ID`.
    #[facet(default)]
    pub team_id: String,
    /// API token; falls back to `RUDDER_API_TOKEN`.
    #[facet(default)]
    pub api_token: String,
    /// Ceiling on concurrently running backend operations. Must be ≥ 1 —
    /// a zero ceiling would block every operation forever.
    #[facet(default = 4)]
    pub max_parallel: usize,
    /// Fixed sleep between poll attempts (agent wait, address wait,
    /// resize retry).
    #[facet(default = 10)]
    pub poll_interval_secs: u64,
    /// Deadline for guest-agent discovery after a boot.
    #[facet(default = 600)]
    pub create_timeout_secs: u64,
    /// Ceiling on waiting for a VM to reach "stopped" before delete.
    #[facet(default = 300)]
    pub stop_timeout_secs: u64,
    /// Settle time after a clone before reading the result back.
    #[facet(default = 10)]
    pub clone_wait_secs: u64,
    /// Optional log file, appended to when set.
    #[facet(default)]
    pub log_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            team_id: String::new(),
            api_token: String::new(),
            max_parallel: 4,
            poll_interval_secs: 10,
            create_timeout_secs: 600,
            stop_timeout_secs: 300,
            clone_wait_secs: 10,
            log_file: String::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, RudderError> {
        let contents = std::fs::read_to_string(path).map_err(|source| RudderError::ConfigLoad {
            path: path.display().to_string(),
            source,
        })?;

        let mut settings: Settings =
            facet_toml::from_str(&contents).map_err(|e| RudderError::ConfigParse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        if settings.team_id.is_empty()
            && let Ok(team) = std::env::var("RUDDER_TEAM_ID")
        {
            settings.team_id = team;
        }
        if settings.api_token.is_empty()
            && let Ok(token) = std::env::var("RUDDER_API_TOKEN")
        {
            settings.api_token = token;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings a session cannot safely run with. A non-positive
    /// parallelism ceiling is a configuration error, not a runtime hang.
    pub fn validate(&self) -> Result<(), RudderError> {
        if self.api_url.is_empty() {
            return Err(RudderError::Validation {
                message: "api_url must be set".into(),
            });
        }
        if self.team_id.is_empty() {
            return Err(RudderError::Validation {
                message: "team_id must be set (or RUDDER_TEAM_ID exported)".into(),
            });
        }
        if self.api_token.is_empty() {
            return Err(RudderError::Validation {
                message: "api_token must be set (or RUDDER_API_TOKEN exported)".into(),
            });
        }
        if self.max_parallel < 1 {
            return Err(RudderError::Validation {
                message: format!(
                    "max_parallel must be at least 1, got {}",
                    self.max_parallel
                ),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }

    pub fn clone_wait(&self) -> Duration {
        Duration::from_secs(self.clone_wait_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_settings(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("rudder.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{body}").unwrap();
        path
    }

    #[test]
    fn load_parses_and_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(
            &dir,
            r#"
api_url = "https://compute.example/api/v1"
team_id = "team-1"
api_token = "secret"
"#,
        );
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.max_parallel, 4);
        assert_eq!(settings.poll_interval(), Duration::from_secs(10));
        assert_eq!(settings.stop_timeout_secs, 300);
    }

    #[test]
    fn zero_parallelism_is_rejected_at_load_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_settings(
            &dir,
            r#"
api_url = "https://compute.example/api/v1"
team_id = "team-1"
api_token = "secret"
max_parallel = 0
"#,
        );
        let err = Settings::load(&path).unwrap_err();
        assert!(matches!(err, RudderError::Validation { .. }));
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let settings = Settings {
            api_url: "https://compute.example".into(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn load_missing_file_is_config_load_error() {
        let err = Settings::load(Path::new("/nonexistent/rudder.toml")).unwrap_err();
        assert!(matches!(err, RudderError::ConfigLoad { .. }));
    }
}
