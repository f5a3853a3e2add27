//! File stores for uploads and conversion output.
//!
//! Callers never address stored files by raw filesystem path. A [`Handle`]
//! names a file relative to a store root and is validated on construction,
//! so a handle received from the network cannot climb out of its store.
//!
//! With [`StorageLayout::PerJob`] every request gets a [`Job`] whose UUID
//! becomes a sub-directory; two requests uploading `report.pdf` at the same
//! time then write `…/<uuid-a>/report.pdf` and `…/<uuid-b>/report.pdf`.
//! [`StorageLayout::Flat`] keys files by name alone and reproduces the
//! last-writer-wins behaviour of a shared directory.

use crate::config::StorageLayout;
use crate::error::ConvertError;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

// ── File names ───────────────────────────────────────────────────────────

/// Reduce a client-supplied filename to a safe, single path component.
///
/// Directory parts (either separator style) are dropped. Returns `None`
/// when nothing usable is left or the name holds control characters.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if is_plain_segment(last) {
        Some(last.to_string())
    } else {
        None
    }
}

fn is_plain_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && !s.contains(['/', '\\'])
        && !s.chars().any(char::is_control)
}

// ── Handles ──────────────────────────────────────────────────────────────

/// A validated, store-relative file name: `<job-id>/<name>` or `<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle(String);

impl Handle {
    /// Validate a handle string received from a client.
    pub fn parse(raw: &str, layout: StorageLayout) -> Option<Self> {
        let segments: Vec<&str> = raw.split('/').collect();
        let valid = match (layout, segments.as_slice()) {
            (StorageLayout::PerJob, [job, name]) => {
                Uuid::parse_str(job).is_ok() && is_plain_segment(name)
            }
            (StorageLayout::Flat, [name]) => is_plain_segment(name),
            _ => false,
        };
        valid.then(|| Handle(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final component, i.e. the filename a download should carry.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    fn relative_path(&self) -> PathBuf {
        self.0.split('/').collect()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Jobs ─────────────────────────────────────────────────────────────────

/// One conversion request's slot in the stores.
#[derive(Debug, Clone)]
pub struct Job {
    id: Uuid,
    layout: StorageLayout,
}

impl Job {
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            id: Uuid::new_v4(),
            layout,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Handle for `name` inside this job. `name` must already be a plain
    /// file name (see [`sanitize_file_name`]).
    pub fn handle(&self, name: &str) -> Option<Handle> {
        if !is_plain_segment(name) {
            return None;
        }
        Some(match self.layout {
            StorageLayout::PerJob => Handle(format!("{}/{}", self.id, name)),
            StorageLayout::Flat => Handle(name.to_string()),
        })
    }

    fn relative_dir(&self) -> PathBuf {
        match self.layout {
            StorageLayout::PerJob => PathBuf::from(self.id.to_string()),
            StorageLayout::Flat => PathBuf::new(),
        }
    }
}

// ── Store trait ──────────────────────────────────────────────────────────

/// Backend holding uploaded or converted files.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Root directory of the store.
    fn root(&self) -> &Path;

    /// Filesystem location of `handle`. The file need not exist.
    fn path_of(&self, handle: &Handle) -> PathBuf;

    /// Directory that holds every file of `job`, created if absent.
    async fn job_dir(&self, job: &Job) -> Result<PathBuf, ConvertError>;

    /// Write `bytes` under `handle`, replacing any previous content.
    async fn put(&self, handle: &Handle, bytes: &[u8]) -> Result<PathBuf, ConvertError>;

    /// Read the file named by `handle`.
    async fn get(&self, handle: &Handle) -> Result<Vec<u8>, ConvertError>;

    /// Whether a regular file exists under `handle`.
    async fn exists(&self, handle: &Handle) -> bool;

    /// Whether the store's root directory exists.
    async fn is_available(&self) -> bool;
}

/// [`ArtifactStore`] backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open a store at `root`, creating the directory if absent.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ConvertError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| ConvertError::io(&root, e))?;
        debug!("Opened store at {}", root.display());
        Ok(Self { root })
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, handle: &Handle) -> PathBuf {
        self.root.join(handle.relative_path())
    }

    async fn job_dir(&self, job: &Job) -> Result<PathBuf, ConvertError> {
        let dir = self.root.join(job.relative_dir());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ConvertError::io(&dir, e))?;
        Ok(dir)
    }

    async fn put(&self, handle: &Handle, bytes: &[u8]) -> Result<PathBuf, ConvertError> {
        let path = self.path_of(handle);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConvertError::io(parent, e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ConvertError::io(&path, e))?;
        debug!("Stored {} ({} bytes)", handle, bytes.len());
        Ok(path)
    }

    async fn get(&self, handle: &Handle) -> Result<Vec<u8>, ConvertError> {
        let path = self.path_of(handle);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ConvertError::FileNotFound { path })
            }
            Err(e) => Err(ConvertError::io(path, e)),
        }
    }

    async fn exists(&self, handle: &Handle) -> bool {
        tokio::fs::metadata(self.path_of(handle))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn is_available(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(
            sanitize_file_name("../../etc/passwd").as_deref(),
            Some("passwd")
        );
        assert_eq!(
            sanitize_file_name(r"C:\Users\me\scan.png").as_deref(),
            Some("scan.png")
        );
    }

    #[test]
    fn sanitize_rejects_empty_and_dots() {
        assert_eq!(sanitize_file_name(""), None);
        assert_eq!(sanitize_file_name("   "), None);
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("dir/"), None);
        assert_eq!(sanitize_file_name("a\0b"), None);
        assert_eq!(sanitize_file_name("a\nb.pdf"), None);
    }

    #[test]
    fn handle_parse_per_job() {
        let id = Uuid::new_v4();
        let raw = format!("{id}/report.docx");
        let h = Handle::parse(&raw, StorageLayout::PerJob).expect("valid handle");
        assert_eq!(h.file_name(), "report.docx");
        assert_eq!(h.as_str(), raw);

        assert!(Handle::parse("report.docx", StorageLayout::PerJob).is_none());
        assert!(Handle::parse("not-a-uuid/report.docx", StorageLayout::PerJob).is_none());
        assert!(Handle::parse(&format!("{id}/../x"), StorageLayout::PerJob).is_none());
        assert!(Handle::parse(&format!("{id}/.."), StorageLayout::PerJob).is_none());
    }

    #[test]
    fn handle_parse_flat() {
        assert!(Handle::parse("report.docx", StorageLayout::Flat).is_some());
        assert!(Handle::parse("../Cargo.toml", StorageLayout::Flat).is_none());
        assert!(Handle::parse("/etc/passwd", StorageLayout::Flat).is_none());
        assert!(Handle::parse("", StorageLayout::Flat).is_none());
    }

    #[test]
    fn jobs_with_same_name_get_distinct_handles() {
        let a = Job::new(StorageLayout::PerJob).handle("x.pdf").unwrap();
        let b = Job::new(StorageLayout::PerJob).handle("x.pdf").unwrap();
        assert_ne!(a, b);

        let a = Job::new(StorageLayout::Flat).handle("x.pdf").unwrap();
        let b = Job::new(StorageLayout::Flat).handle("x.pdf").unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn put_get_and_exists() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("converted")).await.unwrap();
        assert!(store.is_available().await);

        let job = Job::new(StorageLayout::PerJob);
        let handle = job.handle("a.txt").unwrap();
        assert!(!store.exists(&handle).await);

        let path = store.put(&handle, b"hello").await.unwrap();
        assert!(path.starts_with(store.root()));
        assert!(path.ends_with(format!("{}/a.txt", job.id())));
        assert!(store.exists(&handle).await);
        assert_eq!(store.get(&handle).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).await.unwrap();
        let handle = Handle::parse("missing.pdf", StorageLayout::Flat).unwrap();
        match store.get(&handle).await {
            Err(ConvertError::FileNotFound { .. }) => {}
            other => panic!("expected FileNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn flat_layout_overwrites() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).await.unwrap();
        let first = Job::new(StorageLayout::Flat).handle("same.pdf").unwrap();
        let second = Job::new(StorageLayout::Flat).handle("same.pdf").unwrap();
        store.put(&first, b"one").await.unwrap();
        store.put(&second, b"two").await.unwrap();
        assert_eq!(store.get(&first).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn job_dir_is_created() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).await.unwrap();
        let job = Job::new(StorageLayout::PerJob);
        let jd = store.job_dir(&job).await.unwrap();
        assert!(jd.is_dir());
        assert_eq!(jd, dir.path().join(job.id().to_string()));
    }
}
