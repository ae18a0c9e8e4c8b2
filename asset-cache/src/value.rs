//! Cached artifact values.
//!
//! A [`CacheValue`] is an ordered list of named binary blobs. One asset
//! conversion typically produces several files (a texture plus its mip
//! descriptors, a mesh plus its material table), and they are cached and
//! restored together under a single key.
//!
//! A value with zero blobs is *empty*. It is a valid value, distinct from a
//! key being absent from the cache.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;

/// Errors from moving values between the file system and memory.
#[derive(Debug, Error)]
pub enum ValueError {
    /// Failed to read a source file.
    #[error("failed to read {path}: {source}")]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write an exported file.
    #[error("failed to write {path}: {source}")]
    WriteFailed { path: PathBuf, source: io::Error },

    /// The path has no usable file name to store the blob under.
    #[error("path has no file name: {0}")]
    NoFileName(PathBuf),

    /// A blob name would escape the export directory.
    #[error("unsafe blob name: {0}")]
    UnsafeName(String),
}

/// One named blob inside a [`CacheValue`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheFile {
    name: String,
    data: Bytes,
}

impl CacheFile {
    /// The blob name (usually a file name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The blob contents.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// An ordered collection of named blobs cached under one key.
///
/// The total size is maintained on every mutation and always equals the sum
/// of the blob lengths. The optional description is local metadata for logs
/// and tooling; it does not travel over the wire and does not take part in
/// equality.
#[derive(Clone, Debug, Default)]
pub struct CacheValue {
    files: Vec<CacheFile>,
    size: u64,
    description: Option<String>,
}

impl CacheValue {
    /// Creates an empty value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a blob, builder style.
    pub fn with_file(mut self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(name, data);
        self
    }

    /// Inserts a blob.
    ///
    /// A blob with the same name is replaced in place, keeping its position.
    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Bytes>) {
        let name = name.into();
        let data = data.into();
        self.size += data.len() as u64;

        if let Some(existing) = self.files.iter_mut().find(|f| f.name == name) {
            self.size -= existing.data.len() as u64;
            existing.data = data;
        } else {
            self.files.push(CacheFile { name, data });
        }
    }

    /// Looks up a blob by name.
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.files.iter().find(|f| f.name == name).map(|f| &f.data)
    }

    /// Iterates the blobs in insertion order.
    pub fn files(&self) -> impl Iterator<Item = &CacheFile> {
        self.files.iter()
    }

    /// Number of blobs.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if the value holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total size of all blobs in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The description, if one was set.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Builds a value from files on disk, storing each under its file name.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ValueError> {
        let mut value = Self::new();
        for path in paths {
            let path = path.as_ref();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| ValueError::NoFileName(path.to_path_buf()))?;
            let data = fs::read(path).map_err(|e| ValueError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
            value.insert(name, data);
        }
        Ok(value)
    }

    /// Writes every blob into `dir` as a file named after the blob.
    ///
    /// Returns the paths written, in blob order.
    pub fn export(&self, dir: &Path) -> Result<Vec<PathBuf>, ValueError> {
        fs::create_dir_all(dir).map_err(|e| ValueError::WriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let mut written = Vec::with_capacity(self.files.len());
        for file in &self.files {
            if !is_safe_name(&file.name) {
                return Err(ValueError::UnsafeName(file.name.clone()));
            }
            let path = dir.join(&file.name);
            fs::write(&path, &file.data).map_err(|e| ValueError::WriteFailed {
                path: path.clone(),
                source: e,
            })?;
            written.push(path);
        }
        Ok(written)
    }
}

impl PartialEq for CacheValue {
    fn eq(&self, other: &Self) -> bool {
        self.files == other.files
    }
}

impl Eq for CacheValue {}

/// Blob names come from remote peers; only plain file names may be exported.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}
