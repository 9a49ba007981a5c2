//! Transactional staging for a single artifact inside a sandbox root.
//!
//! The artifact on disk only ever holds committed content. Candidates are
//! written to a staging file first and reach the artifact through one
//! `rename`, after both sides were checked against their recorded checksums.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::checksum::Checksum;
use crate::core::sandbox::resolve_within;
use crate::error::SwarmError;

static NEXT_GUARD_ID: AtomicU64 = AtomicU64::new(1);

/// Immutable view of the committed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSnapshot {
    pub path: PathBuf,
    pub content: String,
    pub checksum: Checksum,
}

/// Proof that a candidate was staged. Consumed by `commit` or `rollback`.
#[derive(Debug)]
pub struct StagedHandle {
    guard_id: u64,
    id: u64,
    staged_path: PathBuf,
    content: String,
    checksum: Checksum,
    base: Checksum,
}

impl StagedHandle {
    pub fn staged_path(&self) -> &Path {
        &self.staged_path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Checksum of the committed artifact the candidate was staged against.
    pub fn base(&self) -> &Checksum {
        &self.base
    }
}

#[derive(Debug)]
pub struct FileGuard {
    id: u64,
    root: PathBuf,
    artifact: PathBuf,
    staging_dir: PathBuf,
    label: String,
    committed: Checksum,
    next_stage: u64,
    outstanding: HashMap<u64, PathBuf>,
}

impl FileGuard {
    /// Open a guard for `artifact` (relative to `root` unless absolute).
    ///
    /// Both the artifact and `staging_dir` must resolve inside `root`, after
    /// symlinks are followed.
    #[instrument(skip_all, fields(artifact = %artifact.display()))]
    pub fn open(root: &Path, artifact: &Path, staging_dir: &Path, label: &str) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve sandbox root {}", root.display()))?;

        let lexical = resolve_within(&root, artifact)?;
        let artifact = lexical
            .canonicalize()
            .with_context(|| format!("resolve artifact {}", lexical.display()))?;
        ensure_inside(&root, &artifact)?;
        if !artifact.is_file() {
            return Err(SwarmError::PatchApplication(format!(
                "artifact {} is not a regular file",
                artifact.display()
            ))
            .into());
        }

        let staging_lexical = resolve_within(&root, staging_dir)?;
        fs::create_dir_all(&staging_lexical)
            .with_context(|| format!("create staging dir {}", staging_lexical.display()))?;
        let staging_dir = staging_lexical
            .canonicalize()
            .with_context(|| format!("resolve staging dir {}", staging_lexical.display()))?;
        ensure_inside(&root, &staging_dir)?;

        let committed = Checksum::of(&read_bytes(&artifact)?);
        debug!(checksum = committed.short(), "guard opened");
        Ok(Self {
            id: NEXT_GUARD_ID.fetch_add(1, Ordering::Relaxed),
            root,
            artifact,
            staging_dir,
            label: sanitize_label(label),
            committed,
            next_stage: 1,
            outstanding: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact
    }

    /// Artifact path relative to the sandbox root.
    pub fn relative_artifact_path(&self) -> &Path {
        self.artifact
            .strip_prefix(&self.root)
            .unwrap_or(&self.artifact)
    }

    pub fn committed_checksum(&self) -> &Checksum {
        &self.committed
    }

    /// Read the committed artifact, verifying nobody changed it behind the guard.
    pub fn snapshot(&self) -> Result<ArtifactSnapshot> {
        let bytes = read_bytes(&self.artifact)?;
        let checksum = Checksum::of(&bytes);
        self.ensure_committed(&checksum)?;
        let content = String::from_utf8(bytes)
            .with_context(|| format!("artifact {} is not UTF-8", self.artifact.display()))?;
        Ok(ArtifactSnapshot {
            path: self.artifact.clone(),
            content,
            checksum,
        })
    }

    /// Write `content` to a fresh staging file. The artifact is untouched.
    #[instrument(skip_all, fields(label = %self.label, bytes = content.len()))]
    pub fn stage(&mut self, content: &str) -> Result<StagedHandle> {
        if content.is_empty() {
            return Err(SwarmError::PatchApplication("candidate content is empty".to_string()).into());
        }
        let id = self.next_stage;
        self.next_stage += 1;

        let staged_path = self
            .staging_dir
            .join(format!("{}.{}.{}.stage", self.label, self.id, id));
        ensure_inside(&self.root, &staged_path)?;

        let mut file = File::create(&staged_path)
            .with_context(|| format!("create staged file {}", staged_path.display()))?;
        self.outstanding.insert(id, staged_path.clone());
        file.write_all(content.as_bytes())
            .with_context(|| format!("write staged file {}", staged_path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync staged file {}", staged_path.display()))?;

        let checksum = Checksum::of(content.as_bytes());
        debug!(stage = id, checksum = checksum.short(), "candidate staged");
        Ok(StagedHandle {
            guard_id: self.id,
            id,
            staged_path,
            content: content.to_string(),
            checksum,
            base: self.committed.clone(),
        })
    }

    /// Atomically replace the artifact with the staged candidate.
    ///
    /// Committing content identical to the current artifact leaves the file untouched.
    #[instrument(skip_all, fields(label = %self.label, stage = handle.id))]
    pub fn commit(&mut self, handle: StagedHandle) -> Result<()> {
        self.claim(&handle)?;
        let result = self.commit_claimed(&handle);
        if result.is_err() {
            remove_staged(&handle.staged_path);
        }
        result
    }

    fn commit_claimed(&mut self, handle: &StagedHandle) -> Result<()> {
        self.verify_artifact()?;

        let staged = read_bytes(&handle.staged_path)?;
        let staged_checksum = Checksum::of(&staged);
        if staged_checksum != handle.checksum {
            return Err(SwarmError::CorruptedArtifact {
                path: handle.staged_path.clone(),
                expected: handle.checksum.to_string(),
                actual: staged_checksum.to_string(),
            }
            .into());
        }

        if handle.checksum == self.committed {
            remove_staged(&handle.staged_path);
            debug!("candidate identical to artifact, commit is a no-op");
            return Ok(());
        }

        let permissions = fs::metadata(&self.artifact)
            .with_context(|| format!("stat {}", self.artifact.display()))?
            .permissions();
        fs::set_permissions(&handle.staged_path, permissions)
            .with_context(|| format!("copy permissions to {}", handle.staged_path.display()))?;
        fs::rename(&handle.staged_path, &self.artifact).with_context(|| {
            format!(
                "rename {} over {}",
                handle.staged_path.display(),
                self.artifact.display()
            )
        })?;
        sync_parent(&self.artifact)?;

        info!(
            from = self.committed.short(),
            to = handle.checksum.short(),
            "artifact committed"
        );
        self.committed = handle.checksum.clone();
        Ok(())
    }

    /// Discard the staged candidate and confirm the artifact is unchanged.
    #[instrument(skip_all, fields(label = %self.label, stage = handle.id))]
    pub fn rollback(&mut self, handle: StagedHandle) -> Result<()> {
        self.claim(&handle)?;
        match fs::remove_file(&handle.staged_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("remove staged {}", handle.staged_path.display()));
            }
        }
        self.verify_artifact()?;
        debug!("candidate rolled back");
        Ok(())
    }

    fn claim(&mut self, handle: &StagedHandle) -> Result<()> {
        if handle.guard_id != self.id || self.outstanding.remove(&handle.id).is_none() {
            return Err(SwarmError::PatchApplication(format!(
                "staged handle {} was not issued by this guard",
                handle.staged_path.display()
            ))
            .into());
        }
        Ok(())
    }

    fn verify_artifact(&self) -> Result<()> {
        let actual = Checksum::of(&read_bytes(&self.artifact)?);
        self.ensure_committed(&actual)
    }

    fn ensure_committed(&self, actual: &Checksum) -> Result<()> {
        if *actual != self.committed {
            warn!(
                expected = self.committed.short(),
                actual = actual.short(),
                "artifact changed outside the guard"
            );
            return Err(SwarmError::CorruptedArtifact {
                path: self.artifact.clone(),
                expected: self.committed.to_string(),
                actual: actual.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        for path in self.outstanding.values() {
            remove_staged(path);
        }
    }
}

fn ensure_inside(root: &Path, path: &Path) -> Result<()> {
    if path.starts_with(root) {
        Ok(())
    } else {
        Err(SwarmError::SandboxViolation {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        }
        .into())
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("read {}", path.display()))
}

fn remove_staged(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), err = %err, "failed to remove staged file");
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "artifact".to_string()
    } else {
        cleaned
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        File::open(parent)
            .and_then(|dir| dir.sync_all())
            .with_context(|| format!("sync directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> Result<()> {
    Ok(())
}
