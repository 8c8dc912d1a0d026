//! Skill bundle catalog.
//!
//! A bundle is a directory with a `SKILL.md` whose YAML frontmatter declares
//! the skill:
//!
//! ```text
//! ---
//! name: hello-world
//! version: 1.0.0
//! entrypoint: scripts/main.py:run
//! description: Greets the caller
//! timeout_seconds: 30
//! inputs:
//!   - name: name
//!     type: text
//!     description: Who to greet
//! outputs:
//!   - name: greeting
//!     type: text
//! tags: [demo]
//! ---
//! Free-form documentation...
//! ```
//!
//! [`BundleCatalog`] registers bundles in memory, assigning each a version id,
//! and serves them to the engine through [`SkillVersionRepository`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use skillhost_core::repository::SkillVersionRepository;
use skillhost_types::error::RepositoryError;
use skillhost_types::skill::{IoField, SkillVersion};
use thiserror::Error;
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "SKILL.md";

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("no SKILL.md in {}", .0.display())]
    MissingManifest(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid manifest in {}: {reason}", .path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("{name}@{version} is already registered from {}", .existing.display())]
    Duplicate {
        name: String,
        version: semver::Version,
        existing: PathBuf,
    },

    #[error("unknown skill: {0}")]
    UnknownSkill(String),
}

/// SKILL.md frontmatter.
#[derive(Debug, Clone, Deserialize)]
pub struct BundleManifest {
    pub name: String,
    pub version: String,
    pub entrypoint: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub inputs: Vec<IoField>,
    #[serde(default)]
    pub outputs: Vec<IoField>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// JSON Schema for the input payload, written as YAML.
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
}

/// Split `---`-delimited YAML frontmatter from the markdown body.
pub fn extract_frontmatter(content: &str) -> Result<&str, String> {
    let Some(after_open) = content.strip_prefix("---") else {
        return Err("must start with YAML frontmatter delimiter '---'".to_string());
    };
    let after_open = after_open
        .strip_prefix("\r\n")
        .or_else(|| after_open.strip_prefix('\n'))
        .unwrap_or(after_open);

    let closing = after_open
        .find("\n---")
        .ok_or_else(|| "missing closing frontmatter delimiter '---'".to_string())?;
    Ok(&after_open[..closing])
}

/// Parse and validate SKILL.md content.
pub fn parse_manifest(content: &str) -> Result<(BundleManifest, semver::Version), String> {
    let yaml = extract_frontmatter(content)?;
    let manifest: BundleManifest =
        serde_yaml_ng::from_str(yaml).map_err(|e| format!("frontmatter: {e}"))?;

    if manifest.name.trim().is_empty() {
        return Err("'name' must not be empty".to_string());
    }
    if manifest.entrypoint.trim().is_empty() {
        return Err("'entrypoint' must not be empty".to_string());
    }
    let version = semver::Version::parse(manifest.version.trim())
        .map_err(|e| format!("'version' is not semver ({}): {e}", manifest.version))?;
    if manifest
        .input_schema
        .as_ref()
        .is_some_and(|schema| !schema.is_object())
    {
        return Err("'input_schema' must be a mapping".to_string());
    }

    Ok((manifest, version))
}

/// In-memory index of registered bundles.
#[derive(Debug, Clone, Default)]
pub struct BundleCatalog {
    versions: Arc<DashMap<Uuid, SkillVersion>>,
}

impl BundleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Register the bundle at `dir`, returning its version record.
    ///
    /// Registering the same directory twice returns the existing record;
    /// registering a different directory with the same name and version is
    /// an error.
    pub async fn register_dir(&self, dir: &Path) -> Result<SkillVersion, BundleError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let content = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BundleError::MissingManifest(dir.to_path_buf()));
            }
            Err(source) => {
                return Err(BundleError::Io {
                    path: manifest_path,
                    source,
                });
            }
        };

        let (manifest, version) =
            parse_manifest(&content).map_err(|reason| BundleError::InvalidManifest {
                path: manifest_path.clone(),
                reason,
            })?;

        let bundle_root = tokio::fs::canonicalize(dir)
            .await
            .map_err(|source| BundleError::Io {
                path: dir.to_path_buf(),
                source,
            })?;

        if let Some(existing) = self.find_version(&manifest.name, &version) {
            if existing.bundle_root == bundle_root {
                return Ok(existing);
            }
            return Err(BundleError::Duplicate {
                name: manifest.name,
                version,
                existing: existing.bundle_root,
            });
        }

        let record = SkillVersion {
            id: Uuid::now_v7(),
            skill_name: manifest.name,
            version,
            entrypoint: manifest.entrypoint.trim().to_string(),
            bundle_root,
            timeout_hint_secs: manifest.timeout_seconds.filter(|secs| *secs > 0),
            description: manifest.description,
            inputs: manifest.inputs,
            outputs: manifest.outputs,
            tags: manifest.tags,
            input_schema: manifest.input_schema,
        };
        tracing::info!(
            skill = %record.label(),
            id = %record.id,
            root = %record.bundle_root.display(),
            "registered skill bundle"
        );
        self.versions.insert(record.id, record.clone());
        Ok(record)
    }

    /// Register every immediate subdirectory of `root` that holds a SKILL.md.
    ///
    /// Invalid bundles are logged and skipped.
    pub async fn scan(&self, root: &Path) -> Result<Vec<SkillVersion>, BundleError> {
        let mut entries = tokio::fs::read_dir(root)
            .await
            .map_err(|source| BundleError::Io {
                path: root.to_path_buf(),
                source,
            })?;

        let mut dirs = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if path.join(MANIFEST_FILE).is_file() {
                        dirs.push(path);
                    }
                }
                Ok(None) => break,
                Err(source) => {
                    return Err(BundleError::Io {
                        path: root.to_path_buf(),
                        source,
                    });
                }
            }
        }
        dirs.sort();

        let mut registered = Vec::with_capacity(dirs.len());
        for dir in dirs {
            match self.register_dir(&dir).await {
                Ok(version) => registered.push(version),
                Err(e) => tracing::warn!("skipping bundle {}: {e}", dir.display()),
            }
        }
        Ok(registered)
    }

    fn find_version(&self, name: &str, version: &semver::Version) -> Option<SkillVersion> {
        self.versions
            .iter()
            .find(|entry| entry.skill_name == name && entry.version == *version)
            .map(|entry| entry.value().clone())
    }

    /// Highest registered version of `name`.
    pub fn find(&self, name: &str) -> Option<SkillVersion> {
        self.versions
            .iter()
            .filter(|entry| entry.skill_name == name)
            .max_by(|a, b| a.version.cmp(&b.version))
            .map(|entry| entry.value().clone())
    }

    pub fn get(&self, id: &Uuid) -> Option<SkillVersion> {
        self.versions.get(id).map(|entry| entry.value().clone())
    }

    /// Resolve a user-facing reference: a version id, `name@version`, or `name`
    /// (latest version).
    pub fn resolve_ref(&self, reference: &str) -> Result<SkillVersion, BundleError> {
        let unknown = || BundleError::UnknownSkill(reference.to_string());

        if let Ok(id) = reference.parse::<Uuid>() {
            return self.get(&id).ok_or_else(unknown);
        }
        match reference.split_once('@') {
            Some((name, version)) => {
                let version = semver::Version::parse(version).map_err(|_| unknown())?;
                self.find_version(name, &version).ok_or_else(unknown)
            }
            None => self.find(reference).ok_or_else(unknown),
        }
    }

    /// All registered versions, sorted by name then version.
    pub fn list(&self) -> Vec<SkillVersion> {
        let mut all: Vec<SkillVersion> =
            self.versions.iter().map(|entry| entry.value().clone()).collect();
        all.sort_by(|a, b| {
            a.skill_name
                .cmp(&b.skill_name)
                .then_with(|| a.version.cmp(&b.version))
        });
        all
    }
}

impl SkillVersionRepository for BundleCatalog {
    async fn get_version(&self, id: &Uuid) -> Result<Option<SkillVersion>, RepositoryError> {
        Ok(self.get(id))
    }

    async fn list_versions(&self) -> Result<Vec<SkillVersion>, RepositoryError> {
        Ok(self.list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_bundle(root: &Path, dir: &str, name: &str, version: &str, extra: &str) -> PathBuf {
        let path = root.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(
            path.join(MANIFEST_FILE),
            format!(
                "---\nname: {name}\nversion: {version}\nentrypoint: scripts/main.py:run\n{extra}---\n# {name}\n"
            ),
        )
        .unwrap();
        path
    }

    #[test]
    fn parses_frontmatter() {
        let content = "---\nname: hello\nversion: 1.2.3\nentrypoint: main.py\ntimeout_seconds: 5\n---\nBody\n";
        let (manifest, version) = parse_manifest(content).unwrap();
        assert_eq!(manifest.name, "hello");
        assert_eq!(version, semver::Version::new(1, 2, 3));
        assert_eq!(manifest.entrypoint, "main.py");
        assert_eq!(manifest.timeout_seconds, Some(5));
        assert!(manifest.description.is_none());
    }

    #[test]
    fn parses_declared_io_and_schema() {
        let content = "---\nname: sum\nversion: 0.1.0\nentrypoint: main.py\ninputs:\n  - name: values\n    type: array\n  - type: text\n    optional: true\noutputs:\n  - name: total\n    type: number\ntags: [math, demo]\ninput_schema:\n  type: object\n  properties:\n    values:\n      type: array\n---\n";
        let (manifest, _) = parse_manifest(content).unwrap();
        assert_eq!(manifest.inputs.len(), 2);
        assert_eq!(manifest.inputs[0].name(), "values");
        assert_eq!(manifest.inputs[1].name(), "text");
        assert!(manifest.inputs[1].optional);
        assert_eq!(manifest.outputs[0].json_type(), "number");
        assert_eq!(manifest.tags, vec!["math", "demo"]);
        let schema = manifest.input_schema.unwrap();
        assert_eq!(schema["properties"]["values"]["type"], "array");

        let bad = "---\nname: x\nversion: 1.0.0\nentrypoint: a.py\ninput_schema: [1]\n---\n";
        assert!(parse_manifest(bad).unwrap_err().contains("input_schema"));
    }

    #[test]
    fn rejects_bad_manifests() {
        assert!(parse_manifest("name: x\n").unwrap_err().contains("'---'"));
        assert!(parse_manifest("---\nname: x\n").unwrap_err().contains("closing"));
        assert!(
            parse_manifest("---\nname: x\nversion: one\nentrypoint: a.py\n---\n")
                .unwrap_err()
                .contains("semver")
        );
        assert!(
            parse_manifest("---\nname: x\nversion: 1.0.0\n---\n")
                .unwrap_err()
                .contains("entrypoint")
        );
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let tmp = TempDir::new().unwrap();
        let dir = write_bundle(tmp.path(), "hello", "hello", "1.0.0", "timeout_seconds: 0\n");
        let catalog = BundleCatalog::new();

        let version = catalog.register_dir(&dir).await.unwrap();

        assert_eq!(version.skill_name, "hello");
        assert_eq!(version.entrypoint, "scripts/main.py:run");
        assert_eq!(version.bundle_root, std::fs::canonicalize(&dir).unwrap());
        assert!(version.timeout_hint_secs.is_none());
        assert_eq!(
            catalog.get_version(&version.id).await.unwrap().unwrap().id,
            version.id
        );
        assert!(catalog.get_version(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn re_registering_same_dir_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let dir = write_bundle(tmp.path(), "hello", "hello", "1.0.0", "");
        let other = write_bundle(tmp.path(), "copy", "hello", "1.0.0", "");
        let catalog = BundleCatalog::new();

        let first = catalog.register_dir(&dir).await.unwrap();
        let second = catalog.register_dir(&dir).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(catalog.len(), 1);

        let err = catalog.register_dir(&other).await.unwrap_err();
        assert!(matches!(err, BundleError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn missing_manifest() {
        let tmp = TempDir::new().unwrap();
        let err = BundleCatalog::new().register_dir(tmp.path()).await.unwrap_err();
        assert!(matches!(err, BundleError::MissingManifest(_)));
    }

    #[tokio::test]
    async fn scan_skips_invalid_bundles() {
        let tmp = TempDir::new().unwrap();
        write_bundle(tmp.path(), "a", "alpha", "1.0.0", "");
        write_bundle(tmp.path(), "b", "alpha", "2.1.0", "");
        write_bundle(tmp.path(), "c", "broken", "not-a-version", "");
        std::fs::create_dir_all(tmp.path().join("no-manifest")).unwrap();

        let catalog = BundleCatalog::new();
        let registered = catalog.scan(tmp.path()).await.unwrap();

        assert_eq!(registered.len(), 2);
        assert_eq!(catalog.find("alpha").unwrap().version, semver::Version::new(2, 1, 0));
        assert!(catalog.find("broken").is_none());
    }

    #[tokio::test]
    async fn resolve_references() {
        let tmp = TempDir::new().unwrap();
        let catalog = BundleCatalog::new();
        let v1 = catalog
            .register_dir(&write_bundle(tmp.path(), "a", "alpha", "1.0.0", ""))
            .await
            .unwrap();
        let v2 = catalog
            .register_dir(&write_bundle(tmp.path(), "b", "alpha", "1.5.0", ""))
            .await
            .unwrap();

        assert_eq!(catalog.resolve_ref("alpha").unwrap().id, v2.id);
        assert_eq!(catalog.resolve_ref("alpha@1.0.0").unwrap().id, v1.id);
        assert_eq!(catalog.resolve_ref(&v1.id.to_string()).unwrap().id, v1.id);
        assert!(matches!(
            catalog.resolve_ref("alpha@9.9.9"),
            Err(BundleError::UnknownSkill(_))
        ));
        assert!(catalog.resolve_ref("beta").is_err());

        let listed: Vec<String> = catalog.list().iter().map(|v| v.label()).collect();
        assert_eq!(listed, vec!["alpha@1.0.0", "alpha@1.5.0"]);
    }
}
