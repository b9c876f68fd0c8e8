//! Configuration loading via `ortho-config`.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::orchestrator::{DEFAULT_API_PORT, DEFAULT_TOOL};
use crate::provider::DEFAULT_API_BASE;

/// Provider credentials and endpoint settings, merged from environment
/// variables, configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "DO")]
pub struct ProviderConfig {
    /// API token used to authenticate control-plane calls. Required.
    pub api_token: String,
    /// Base URL of the provider API.
    #[ortho_config(default = DEFAULT_API_BASE.to_owned())]
    pub api_url: String,
    /// Comma-separated names of registered SSH keys to install on new
    /// instances. When unset, every registered key is installed.
    pub ssh_keys: Option<String>,
}

/// Cluster-side settings for the orchestrator and its descriptor file.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "CAPSTAN")]
pub struct ClusterConfig {
    /// Path to the cluster descriptor. Defaults to
    /// `$HOME/.juju/environments.yaml`.
    pub descriptor_path: Option<String>,
    /// Orchestrator CLI binary.
    #[ortho_config(default = DEFAULT_TOOL.to_owned())]
    pub orchestrator_tool: String,
    /// TCP port the orchestrator's API server listens on.
    #[ortho_config(default = DEFAULT_API_PORT)]
    pub api_port: u16,
    /// Distribution series installed on new machines.
    #[ortho_config(default = "noble".to_owned())]
    pub default_series: String,
    /// User the reachability probe and registration connect as.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in capstan.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

impl ProviderConfig {
    /// Loads provider configuration, merging defaults, configuration files,
    /// and environment variables without consuming CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("capstan")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the API token is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.api_token,
            &FieldMetadata::new("provider API token", "DO_API_TOKEN", "api_token", "provider"),
        )
    }

    /// Splits the configured SSH key names, if any were given.
    #[must_use]
    pub fn ssh_key_names(&self) -> Option<Vec<String>> {
        self.ssh_keys.as_ref().map(|names| {
            names
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect()
        })
    }
}

impl ClusterConfig {
    /// Loads cluster configuration, merging defaults, configuration files,
    /// and environment variables without consuming CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("capstan")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Resolves the descriptor path, falling back to the conventional
    /// location under the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no path is configured and
    /// `HOME` is unset.
    pub fn resolved_descriptor_path(&self) -> Result<Utf8PathBuf, ConfigError> {
        if let Some(path) = &self.descriptor_path {
            return Ok(Utf8PathBuf::from(path));
        }
        let home = std::env::var("HOME").map_err(|_| {
            ConfigError::MissingField(String::from(
                "missing descriptor path: set CAPSTAN_DESCRIPTOR_PATH or add \
                 descriptor_path to [cluster] in capstan.toml",
            ))
        })?;
        Ok(Utf8PathBuf::from(home).join(".juju").join("environments.yaml"))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
