//! Cluster descriptor file handling.
//!
//! The orchestrator reads its environments from a YAML descriptor keyed by
//! cluster name. This module loads the descriptor, validates that the
//! selected cluster uses a manually provisioned provider type, and updates
//! the `bootstrap-host` entry while leaving every other key untouched.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde_yaml::{Mapping, Value};
use thiserror::Error;

const DEFAULT_KEY: &str = "default";
const ENVIRONMENTS_KEY: &str = "environments";
const TYPE_KEY: &str = "type";
const BOOTSTRAP_HOST_KEY: &str = "bootstrap-host";

/// Provider types the descriptor may declare for a managed cluster.
const SUPPORTED_TYPES: [&str; 2] = ["null", "manual"];

/// Errors raised while reading or updating the cluster descriptor.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the descriptor is not valid YAML.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the descriptor has an unexpected shape.
    #[error("invalid descriptor {path}: {message}")]
    InvalidStructure {
        /// Path with the invalid content.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when no cluster was named and the descriptor has no default.
    #[error("no cluster named and the descriptor declares no default")]
    NoDefault,
    /// Raised when the named cluster is absent from the descriptor.
    #[error("cluster {name} is not defined in the descriptor")]
    MissingCluster {
        /// Cluster that was requested.
        name: String,
    },
    /// Raised when the cluster's provider type cannot be managed here.
    #[error("cluster {name} has type {kind:?}; only null or manual clusters are supported")]
    UnsupportedType {
        /// Cluster with the unsupported type.
        name: String,
        /// Declared provider type.
        kind: String,
    },
}

/// A loaded cluster descriptor bound to one named cluster.
///
/// Unrecognised keys survive a load and save cycle unchanged.
#[derive(Clone, Debug)]
pub struct ClusterDescriptor {
    path: Utf8PathBuf,
    cluster: String,
    doc: Value,
}

impl ClusterDescriptor {
    /// Loads the descriptor at `path` and binds it to `cluster`, or to the
    /// descriptor's declared default when `cluster` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when the file cannot be read or parsed,
    /// the cluster is missing, or its provider type is not `null`/`manual`.
    pub fn load(path: &Utf8Path, cluster: Option<&str>) -> Result<Self, DescriptorError> {
        let contents = read_file(path)?;
        let doc: Value = serde_yaml::from_str(&contents).map_err(|err| DescriptorError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;

        let bound = match cluster {
            Some(name) => name.to_owned(),
            None => doc
                .get(DEFAULT_KEY)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or(DescriptorError::NoDefault)?,
        };

        let descriptor = Self {
            path: path.to_path_buf(),
            cluster: bound,
            doc,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<(), DescriptorError> {
        let entry = self.entry().ok_or_else(|| DescriptorError::MissingCluster {
            name: self.cluster.clone(),
        })?;
        // An unquoted `type: null` parses as YAML null rather than the
        // string "null"; accept both spellings.
        let kind = match entry.get(Value::from(TYPE_KEY)) {
            Some(Value::Null) => String::from("null"),
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => format!("{other:?}"),
            None => String::new(),
        };
        if SUPPORTED_TYPES.contains(&kind.as_str()) {
            Ok(())
        } else {
            Err(DescriptorError::UnsupportedType {
                name: self.cluster.clone(),
                kind,
            })
        }
    }

    /// Name of the cluster this descriptor is bound to.
    #[must_use]
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Path the descriptor was loaded from.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the recorded bootstrap host, if one is set.
    #[must_use]
    pub fn bootstrap_host(&self) -> Option<String> {
        self.entry()
            .and_then(|entry| entry.get(Value::from(BOOTSTRAP_HOST_KEY)))
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    /// Records `host` as the cluster's bootstrap host.
    pub fn set_bootstrap_host(&mut self, host: &str) {
        if let Some(entry) = self.entry_mut() {
            entry.insert(Value::from(BOOTSTRAP_HOST_KEY), Value::from(host));
        }
    }

    /// Removes the cluster's bootstrap host entry, if present.
    pub fn clear_bootstrap_host(&mut self) {
        if let Some(entry) = self.entry_mut() {
            entry.remove(Value::from(BOOTSTRAP_HOST_KEY));
        }
    }

    /// Writes the descriptor back to the path it was loaded from.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Io`] when the file cannot be written.
    pub fn save(&self) -> Result<(), DescriptorError> {
        let rendered =
            serde_yaml::to_string(&self.doc).map_err(|err| DescriptorError::InvalidStructure {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        write_file(&self.path, &rendered)
    }

    fn entry(&self) -> Option<&Mapping> {
        self.doc
            .get(ENVIRONMENTS_KEY)?
            .get(self.cluster.as_str())?
            .as_mapping()
    }

    fn entry_mut(&mut self) -> Option<&mut Mapping> {
        self.doc
            .get_mut(ENVIRONMENTS_KEY)?
            .get_mut(self.cluster.as_str())?
            .as_mapping_mut()
    }
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), DescriptorError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| DescriptorError::InvalidStructure {
            path: path.to_path_buf(),
            message: String::from("descriptor path is missing a filename"),
        })?;
    Ok((parent, file_name))
}

fn read_file(path: &Utf8Path) -> Result<String, DescriptorError> {
    let (parent, file_name) = split(path)?;
    let dir = open_dir(parent, path)?;
    dir.read_to_string(file_name)
        .map_err(|err| DescriptorError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

fn write_file(path: &Utf8Path, contents: &str) -> Result<(), DescriptorError> {
    let (parent, file_name) = split(path)?;
    let dir = open_dir(parent, path)?;
    dir.write(file_name, contents)
        .map_err(|err| DescriptorError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

fn open_dir(parent: &Utf8Path, target: &Utf8Path) -> Result<Dir, DescriptorError> {
    Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| {
        let path = if err.kind() == io::ErrorKind::NotFound {
            target.to_path_buf()
        } else {
            parent.to_path_buf()
        };
        DescriptorError::Io {
            path,
            message: err.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = concat!(
        "default: staging\n",
        "environments:\n",
        "  staging:\n",
        "    type: \"null\"\n",
        "    admin-secret: sekrit\n",
        "  ec2:\n",
        "    type: ec2\n",
    );

    fn write_sample(contents: &str) -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir failed: {err}"));
        let path = Utf8PathBuf::from_path_buf(dir.path().join("environments.yaml"))
            .unwrap_or_else(|path| panic!("non-utf8 temp path: {}", path.display()));
        std::fs::write(&path, contents)
            .unwrap_or_else(|err| panic!("write sample failed: {err}"));
        (dir, path)
    }

    #[test]
    fn load_uses_the_declared_default() {
        let (_dir, path) = write_sample(SAMPLE);
        let descriptor = ClusterDescriptor::load(&path, None)
            .unwrap_or_else(|err| panic!("load failed: {err}"));
        assert_eq!(descriptor.cluster(), "staging");
        assert_eq!(descriptor.bootstrap_host(), None);
    }

    #[test]
    fn load_rejects_unmanaged_provider_types() {
        let (_dir, path) = write_sample(SAMPLE);
        let result = ClusterDescriptor::load(&path, Some("ec2"));
        assert!(
            matches!(
                result,
                Err(DescriptorError::UnsupportedType { ref kind, .. }) if kind == "ec2"
            ),
            "unexpected outcome: {result:?}"
        );
    }

    #[test]
    fn load_accepts_an_unquoted_null_type() {
        let (_dir, path) = write_sample(concat!(
            "environments:\n",
            "  staging:\n",
            "    type: null\n",
        ));
        let descriptor = ClusterDescriptor::load(&path, Some("staging"))
            .unwrap_or_else(|err| panic!("load failed: {err}"));
        assert_eq!(descriptor.cluster(), "staging");
    }

    #[test]
    fn load_reports_a_missing_cluster() {
        let (_dir, path) = write_sample(SAMPLE);
        let result = ClusterDescriptor::load(&path, Some("absent"));
        assert!(
            matches!(
                result,
                Err(DescriptorError::MissingCluster { ref name }) if name == "absent"
            ),
            "unexpected outcome: {result:?}"
        );
    }

    #[test]
    fn bootstrap_host_round_trips_and_preserves_other_keys() {
        let (_dir, path) = write_sample(SAMPLE);
        let mut descriptor = ClusterDescriptor::load(&path, None)
            .unwrap_or_else(|err| panic!("load failed: {err}"));

        descriptor.set_bootstrap_host("10.0.0.5");
        descriptor
            .save()
            .unwrap_or_else(|err| panic!("save failed: {err}"));

        let reloaded = ClusterDescriptor::load(&path, None)
            .unwrap_or_else(|err| panic!("reload failed: {err}"));
        assert_eq!(reloaded.bootstrap_host().as_deref(), Some("10.0.0.5"));

        let raw = std::fs::read_to_string(&path)
            .unwrap_or_else(|err| panic!("read back failed: {err}"));
        assert!(raw.contains("admin-secret: sekrit"));
        assert!(raw.contains("type: ec2"));
    }

    #[test]
    fn clear_bootstrap_host_removes_the_entry() {
        let (_dir, path) = write_sample(SAMPLE);
        let mut descriptor = ClusterDescriptor::load(&path, None)
            .unwrap_or_else(|err| panic!("load failed: {err}"));
        descriptor.set_bootstrap_host("10.0.0.5");
        descriptor.clear_bootstrap_host();
        descriptor
            .save()
            .unwrap_or_else(|err| panic!("save failed: {err}"));

        let reloaded = ClusterDescriptor::load(&path, None)
            .unwrap_or_else(|err| panic!("reload failed: {err}"));
        assert_eq!(reloaded.bootstrap_host(), None);
    }
}
