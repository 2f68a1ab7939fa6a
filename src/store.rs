//! On-disk artifacts, named by shader identity.
//!
//! Two roots are involved. The fixes directory holds what a user wants live: HLSL or assembly
//! sources plus the binaries compiled from them. The cache directory only ever receives exports
//! for reference. Every cached binary carries the exact modification time of the source it was
//! built from, which is how staleness is detected later.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{info, warn};

use crate::stage::ShaderStage;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The kinds of per-shader files, distinguished by suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// `{H}-{T}_replace.bin`
    HlslBinary,
    /// `{H}-{T}.bin`
    AsmBinary,
    /// `{H}-{T}_replace.txt`
    HlslSource,
    /// `{H}-{T}.txt`
    AsmSource,
    /// `{H}-{T}_bad.txt`
    BadMarker,
}

impl ArtifactKind {
    fn suffix(self) -> &'static str {
        match self {
            ArtifactKind::HlslBinary => "_replace.bin",
            ArtifactKind::AsmBinary => ".bin",
            ArtifactKind::HlslSource => "_replace.txt",
            ArtifactKind::AsmSource => ".txt",
            ArtifactKind::BadMarker => "_bad.txt",
        }
    }

    pub fn file_name(self, hash: u64, stage: ShaderStage) -> String {
        format!("{hash:016x}-{}{}", stage.tag(), self.suffix())
    }

    /// The text a cached binary was built from.
    pub fn companion_source(self) -> Option<ArtifactKind> {
        match self {
            ArtifactKind::HlslBinary => Some(ArtifactKind::HlslSource),
            ArtifactKind::AsmBinary => Some(ArtifactKind::AsmSource),
            _ => None,
        }
    }

    // HLSL and assembly fixes for the same shader should never coexist.
    fn conflicting(self) -> &'static [ArtifactKind] {
        match self {
            ArtifactKind::HlslBinary | ArtifactKind::HlslSource => {
                &[ArtifactKind::AsmSource, ArtifactKind::AsmBinary]
            }
            ArtifactKind::AsmBinary | ArtifactKind::AsmSource => {
                &[ArtifactKind::HlslSource, ArtifactKind::HlslBinary]
            }
            ArtifactKind::BadMarker => &[],
        }
    }
}

/// Outcome of looking for a cached binary in the fixes directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedBinary {
    Missing,
    /// Present, but its timestamp does not match its source.
    Stale(PathBuf),
    Hit {
        path: PathBuf,
        bytes: Vec<u8>,
        /// Source modification time. `None` when the binary shipped without its source.
        timestamp: Option<SystemTime>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
    pub modified: SystemTime,
    /// Set when the file was not valid UTF-8 and invalid sequences were replaced in `text`.
    pub lossy: bool,
}

#[derive(Debug, Clone)]
pub struct ShaderStore {
    fixes_dir: PathBuf,
    cache_dir: PathBuf,
}

impl ShaderStore {
    pub fn new(fixes_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            fixes_dir: fixes_dir.into(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn fixes_dir(&self) -> &Path {
        &self.fixes_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn fixes_path(&self, hash: u64, stage: ShaderStage, kind: ArtifactKind) -> PathBuf {
        self.fixes_dir.join(kind.file_name(hash, stage))
    }

    pub fn cache_path(&self, hash: u64, stage: ShaderStage, kind: ArtifactKind) -> PathBuf {
        self.cache_dir.join(kind.file_name(hash, stage))
    }

    /// Loads `{fixes}/{H}-{T}{kind}` if it is present and not stale.
    ///
    /// The binary is valid only when its modification time equals its companion source's
    /// exactly. A newer binary is not good enough: distributed fix archives can carry source
    /// timestamps older than binaries generated locally.
    pub fn load_cached_binary(
        &self,
        hash: u64,
        stage: ShaderStage,
        kind: ArtifactKind,
    ) -> Result<CachedBinary, StoreError> {
        let path = self.fixes_path(hash, stage, kind);
        let bin_time = match fs::metadata(&path) {
            Ok(meta) => meta.modified().map_err(|e| StoreError::io(&path, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CachedBinary::Missing),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let timestamp = match kind.companion_source() {
            Some(source_kind) => {
                let source = self.fixes_path(hash, stage, source_kind);
                match fs::metadata(&source).and_then(|meta| meta.modified()) {
                    Ok(source_time) if source_time == bin_time => Some(source_time),
                    Ok(_) => {
                        info!(path = %path.display(), "discarding stale cached shader");
                        return Ok(CachedBinary::Stale(path));
                    }
                    Err(_) => {
                        warn!(
                            path = %path.display(),
                            "unable to validate timestamp, no corresponding .txt file"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let bytes = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        info!(path = %path.display(), size = bytes.len(), "replacement binary shader found");
        self.warn_if_conflicting(hash, stage, kind);
        Ok(CachedBinary::Hit {
            path,
            bytes,
            timestamp,
        })
    }

    /// Reads a source file, or `None` if it does not exist.
    pub fn read_source(&self, path: &Path) -> Result<Option<SourceFile>, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(|e| StoreError::io(path, e))?;
        let (text, lossy) = match String::from_utf8(bytes) {
            Ok(text) => (text, false),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    offset = err.utf8_error().valid_up_to(),
                    "source is not valid UTF-8, replacing invalid bytes"
                );
                (String::from_utf8_lossy(err.as_bytes()).into_owned(), true)
            }
        };
        Ok(Some(SourceFile {
            path: path.to_path_buf(),
            text,
            modified,
            lossy,
        }))
    }

    /// Writes a cached binary and stamps it with its source's modification time.
    pub fn write_cached_binary(
        &self,
        path: &Path,
        bytes: &[u8],
        source_modified: SystemTime,
    ) -> Result<(), StoreError> {
        let mut file = File::create(path).map_err(|e| StoreError::io(path, e))?;
        file.write_all(bytes).map_err(|e| StoreError::io(path, e))?;
        file.set_modified(source_modified)
            .map_err(|e| StoreError::io(path, e))?;
        info!(path = %path.display(), size = bytes.len(), "stored cached shader");
        Ok(())
    }

    /// Creates `path` with `text`. Returns `false` without touching it if it already exists.
    pub fn write_new_text(&self, path: &Path, text: &str) -> Result<bool, StoreError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        file.write_all(text.as_bytes())
            .map_err(|e| StoreError::io(path, e))?;
        Ok(true)
    }

    /// Exports an application's original blob to `{cache}/{H}-{T}.bin`.
    ///
    /// Distinct blobs sharing a hash land in `{H}-{T}_1.bin`, `{H}-{T}_2.bin` and so on. An
    /// identical blob already on disk is left alone. Returns the path holding `bytecode`.
    pub fn export_original_binary(
        &self,
        hash: u64,
        stage: ShaderStage,
        bytecode: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let mut path = self.cache_path(hash, stage, ArtifactKind::AsmBinary);
        let mut counter = 0u32;
        loop {
            match fs::read(&path) {
                Ok(existing) if existing == bytecode => return Ok(path),
                Ok(_) => {
                    counter += 1;
                    path = self
                        .cache_dir
                        .join(format!("{hash:016x}-{}_{counter}.bin", stage.tag()));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
        fs::write(&path, bytecode).map_err(|e| StoreError::io(&path, e))?;
        info!(path = %path.display(), "stored original binary shader");
        Ok(path)
    }

    /// Logs a warning for every artifact that competes with the one in use.
    pub fn warn_if_conflicting(&self, hash: u64, stage: ShaderStage, used: ArtifactKind) {
        let used_path = self.fixes_path(hash, stage, used);
        for &other in used.conflicting() {
            let other_path = self.fixes_path(hash, stage, other);
            if other_path.exists() {
                warn!(
                    used = %used_path.display(),
                    conflicting = %other_path.display(),
                    "conflicting shader fix files, remove one of them"
                );
            }
        }
    }
}
