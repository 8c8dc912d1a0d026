//! Local filesystem artifact store.
//!
//! Artifact bytes are copied out of the run's working directory into
//! `{base_dir}/runs/{run_id}/{relative_path}` before the working directory is
//! released. The returned record carries a SHA-256 checksum, a `file://`
//! locator and a media type guessed from the file extension.

use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use mime::Mime;
use sha2::{Digest, Sha256};
use skillhost_core::execution::sandbox::ArtifactFile;
use skillhost_core::repository::ArtifactStore;
use skillhost_types::error::RepositoryError;
use skillhost_types::run::Artifact;
use uuid::Uuid;

pub struct LocalArtifactStore {
    base_dir: PathBuf,
}

impl LocalArtifactStore {
    /// Create a store rooted at `base_dir` (usually `~/.skillhost/artifacts`).
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.base_dir.join("runs").join(run_id.to_string())
    }

    /// Destination for `relative_path`, rejecting anything that would leave the run directory.
    fn destination(&self, run_id: Uuid, relative_path: &str) -> Result<PathBuf, RepositoryError> {
        let rel = Path::new(relative_path);
        let contained = !relative_path.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !contained {
            return Err(RepositoryError::Storage(format!(
                "artifact path escapes run directory: {relative_path}"
            )));
        }
        Ok(self.run_dir(run_id).join(rel))
    }
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Extensions without a constant in [`mime`].
const EXTRA_MIME_TYPES: &[(&str, &str)] = &[
    ("md", "text/markdown"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
    ("webp", "image/webp"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("mp4", "video/mp4"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
];

/// Media type for `filename`, from its extension. `None` when unknown.
pub fn guess_mime_type(filename: &str) -> Option<Mime> {
    let ext = Path::new(filename)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    let known = match ext.as_str() {
        "txt" | "log" => mime::TEXT_PLAIN,
        "csv" => mime::TEXT_CSV,
        "tsv" => mime::TEXT_TAB_SEPARATED_VALUES,
        "html" | "htm" => mime::TEXT_HTML,
        "css" => mime::TEXT_CSS,
        "xml" => mime::TEXT_XML,
        "js" | "mjs" => mime::TEXT_JAVASCRIPT,
        "json" => mime::APPLICATION_JSON,
        "pdf" => mime::APPLICATION_PDF,
        "bin" => mime::APPLICATION_OCTET_STREAM,
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "bmp" => mime::IMAGE_BMP,
        "svg" => mime::IMAGE_SVG,
        other => {
            return EXTRA_MIME_TYPES
                .iter()
                .find(|(extension, _)| *extension == other)
                .and_then(|(_, essence)| essence.parse().ok());
        }
    };
    Some(known)
}

impl ArtifactStore for LocalArtifactStore {
    async fn store(&self, run_id: Uuid, file: &ArtifactFile) -> Result<Artifact, RepositoryError> {
        let relative = if file.relative_path.is_empty() {
            file.filename.as_str()
        } else {
            file.relative_path.as_str()
        };
        let dest = self.destination(run_id, relative)?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                RepositoryError::Storage(format!("create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&dest, &file.bytes)
            .await
            .map_err(|e| RepositoryError::Storage(format!("write {}: {e}", dest.display())))?;

        tracing::debug!(
            %run_id,
            filename = %file.filename,
            size = file.size_bytes(),
            "stored artifact"
        );

        Ok(Artifact {
            id: Uuid::now_v7(),
            run_id,
            filename: file.filename.clone(),
            size_bytes: file.size_bytes(),
            checksum: checksum(&file.bytes),
            locator: Some(format!("file://{}", dest.display())),
            mime_type: guess_mime_type(&file.filename).map(|m| m.to_string()),
            created_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file(relative_path: &str, bytes: &[u8]) -> ArtifactFile {
        ArtifactFile {
            filename: Path::new(relative_path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            relative_path: relative_path.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn mime_type_follows_extension() {
        let guess = |name: &str| guess_mime_type(name).map(|m| m.to_string());
        assert_eq!(guess("report.TXT").as_deref(), Some("text/plain"));
        assert_eq!(guess("data.json").as_deref(), Some("application/json"));
        assert_eq!(guess("chart.png").as_deref(), Some("image/png"));
        assert_eq!(guess("notes.md").as_deref(), Some("text/markdown"));
        assert_eq!(
            guess("deck.pptx").as_deref(),
            Some("application/vnd.openxmlformats-officedocument.presentationml.presentation")
        );
        assert_eq!(guess("Makefile"), None);
        assert_eq!(guess("archive.unknownext"), None);
    }

    #[tokio::test]
    async fn store_copies_bytes_under_run_dir() {
        let tmp = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(tmp.path().to_path_buf());
        let run_id = Uuid::now_v7();

        let artifact = store.store(run_id, &file("report.txt", b"hello")).await.unwrap();

        let expected = tmp
            .path()
            .join("runs")
            .join(run_id.to_string())
            .join("report.txt");
        assert_eq!(tokio::fs::read(&expected).await.unwrap(), b"hello");
        assert_eq!(artifact.run_id, run_id);
        assert_eq!(artifact.filename, "report.txt");
        assert_eq!(artifact.size_bytes, 5);
        assert_eq!(artifact.checksum, checksum(b"hello"));
        assert_eq!(artifact.mime_type.as_deref(), Some("text/plain"));
        assert_eq!(
            artifact.locator,
            Some(format!("file://{}", expected.display()))
        );
    }

    #[tokio::test]
    async fn nested_paths_keep_their_directories() {
        let tmp = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(tmp.path().to_path_buf());
        let run_id = Uuid::now_v7();

        store.store(run_id, &file("out/a/data.csv", b"1,2")).await.unwrap();
        store.store(run_id, &file("out/b/data.csv", b"3,4")).await.unwrap();

        let run_dir = tmp.path().join("runs").join(run_id.to_string());
        assert_eq!(tokio::fs::read(run_dir.join("out/a/data.csv")).await.unwrap(), b"1,2");
        assert_eq!(tokio::fs::read(run_dir.join("out/b/data.csv")).await.unwrap(), b"3,4");
    }

    #[tokio::test]
    async fn escaping_path_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(tmp.path().join("store"));

        let err = store
            .store(Uuid::now_v7(), &file("../outside.txt", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Storage(_)));
        assert!(!tmp.path().join("outside.txt").exists());
    }
}
