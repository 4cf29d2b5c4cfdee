// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter resolution: project -> user -> built-in, first hit wins
//! (spec.md §4.B). Built-in manifests are embedded in the binary by
//! `build.rs`, scanning `builtin/<name>/adapter.toml` at compile time, so
//! they cannot be shadowed out of existence by a missing directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter '{0}' not found in project, user, or built-in sources")]
    NotFound(String),
    #[error("failed to parse adapter manifest '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("io error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionMethod {
    Literal,
    PasteBuffer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnSpec {
    pub command: String,
    #[serde(default)]
    pub resume_command: Option<String>,
    #[serde(default)]
    pub startup_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    #[serde(flatten)]
    pub vars: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptInjectionSpec {
    #[serde(default)]
    pub pre_keys: Vec<String>,
    #[serde(default)]
    pub pre_delay_ms: u64,
    pub method: InjectionMethod,
    #[serde(default)]
    pub post_keys: Vec<String>,
    #[serde(default)]
    pub post_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GracefulStopSpec {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub wait_ms: u64,
}

/// A fully parsed `adapter.toml` (spec.md §6 shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterManifest {
    pub adapter: AdapterSpec,
    pub spawn: SpawnSpec,
    #[serde(default)]
    pub environment: EnvironmentSpec,
    pub prompt_injection: PromptInjectionSpec,
    pub graceful_stop: GracefulStopSpec,
}

impl AdapterManifest {
    fn from_toml_str(path: &Path, raw: &str) -> Result<Self, AdapterError> {
        toml::from_str(raw).map_err(|source| AdapterError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Metadata about where an adapter was resolved from, useful for `meow
/// status`-style introspection.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub manifest: AdapterManifest,
    pub source: AdapterSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterSource {
    Project,
    User,
    BuiltIn,
}

struct BuiltinAdapter {
    name: &'static str,
    manifest_toml: &'static str,
}

include!(concat!(env!("OUT_DIR"), "/builtin_adapters.rs"));

/// Resolves adapter names to manifests: project dir -> user dir -> built-in.
pub struct AdapterRegistry {
    project_dir: Option<PathBuf>,
    user_dir: Option<PathBuf>,
}

impl AdapterRegistry {
    /// `project_dir` is typically the run's working directory; `user_dir`
    /// defaults to `~/.meow/adapters` when `None`.
    pub fn new(project_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir: dirs::home_dir().map(|h| h.join(".meow").join("adapters")),
        }
    }

    fn candidate_dir(root: &Path, name: &str) -> PathBuf {
        root.join(name)
    }

    fn try_load_dir(dir: &Path, name: &str) -> Result<Option<AdapterManifest>, AdapterError> {
        let manifest_path = Self::candidate_dir(dir, name).join("adapter.toml");
        if !manifest_path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&manifest_path).map_err(|source| AdapterError::Io {
            path: manifest_path.clone(),
            source,
        })?;
        Ok(Some(AdapterManifest::from_toml_str(&manifest_path, &raw)?))
    }

    fn try_load_builtin(name: &str) -> Result<Option<AdapterManifest>, AdapterError> {
        for adapter in BUILTIN_ADAPTERS {
            if adapter.name == name {
                let manifest = AdapterManifest::from_toml_str(
                    Path::new(adapter.name),
                    adapter.manifest_toml,
                )?;
                return Ok(Some(manifest));
            }
        }
        Ok(None)
    }

    /// Resolve `name` following project -> user -> built-in precedence.
    pub fn resolve(&self, name: &str) -> Result<AdapterInfo, AdapterError> {
        if let Some(dir) = &self.project_dir {
            if let Some(manifest) = Self::try_load_dir(dir, name)? {
                return Ok(AdapterInfo {
                    manifest,
                    source: AdapterSource::Project,
                });
            }
        }
        if let Some(dir) = &self.user_dir {
            if let Some(manifest) = Self::try_load_dir(dir, name)? {
                return Ok(AdapterInfo {
                    manifest,
                    source: AdapterSource::User,
                });
            }
        }
        if let Some(manifest) = Self::try_load_builtin(name)? {
            return Ok(AdapterInfo {
                manifest,
                source: AdapterSource::BuiltIn,
            });
        }
        Err(AdapterError::NotFound(name.to_string()))
    }

    /// Names of every built-in adapter, for `meow`'s help/listing surface.
    pub fn builtin_names() -> Vec<&'static str> {
        BUILTIN_ADAPTERS.iter().map(|a| a.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolves_builtin_claude() {
        let registry = AdapterRegistry {
            project_dir: None,
            user_dir: None,
        };
        let info = registry.resolve("claude").expect("resolve");
        assert_eq!(info.source, AdapterSource::BuiltIn);
        assert_eq!(info.manifest.adapter.name, "claude");
        assert_eq!(info.manifest.prompt_injection.method, InjectionMethod::PasteBuffer);
    }

    #[test]
    fn unknown_adapter_not_found() {
        let registry = AdapterRegistry {
            project_dir: None,
            user_dir: None,
        };
        assert!(matches!(registry.resolve("ghost"), Err(AdapterError::NotFound(_))));
    }

    #[test]
    fn project_adapter_shadows_builtin() {
        let dir = tempdir().expect("tempdir");
        let adapter_dir = dir.path().join("claude");
        std::fs::create_dir_all(&adapter_dir).expect("mkdir");
        std::fs::write(
            adapter_dir.join("adapter.toml"),
            r#"
[adapter]
name = "claude"
description = "project override"

[spawn]
command = "echo custom"

[prompt_injection]
method = "literal"

[graceful_stop]
keys = []
wait_ms = 0
"#,
        )
        .expect("write manifest");

        let registry = AdapterRegistry {
            project_dir: Some(dir.path().to_path_buf()),
            user_dir: None,
        };
        let info = registry.resolve("claude").expect("resolve");
        assert_eq!(info.source, AdapterSource::Project);
        assert_eq!(info.manifest.spawn.command, "echo custom");
    }

    #[test]
    fn builtin_names_include_both_defaults() {
        let names = AdapterRegistry::builtin_names();
        assert!(names.contains(&"claude"));
        assert!(names.contains(&"shell-agent"));
    }
}
