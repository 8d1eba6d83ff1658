use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A file or directory discovered during a tree walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the walked root, always `/`-separated. Used for
    /// matching and reporting; non-UTF-8 names are rendered lossily, so two
    /// entries can share it.
    pub relative_path: String,
    /// Path relative to the walked root exactly as found on disk. Unique
    /// within a walk; all filesystem access goes through it.
    pub path: PathBuf,
    pub is_dir: bool,
}

impl FileEntry {
    pub fn new(path: impl Into<PathBuf>, is_dir: bool) -> Self {
        let path = path.into();
        Self {
            relative_path: normalize_relative_path(&path),
            path,
            is_dir,
        }
    }

    /// Whether `relative_path` is an exact rendering of `path`
    pub fn has_exact_name(&self) -> bool {
        self.path.to_str().is_some()
    }
}

/// Classification of a compared path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Present in both trees with identical content
    Ok,
    /// Present in both trees with differing (or unreadable) content
    Modified,
    /// Present only in the reference tree
    Missing,
    /// Present only in the local tree
    Extra,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Modified => "MODIFIED",
            Status::Missing => "MISSING",
            Status::Extra => "EXTRA",
        }
    }

    /// Whether this status belongs in the alert stream
    pub fn is_alert(&self) -> bool {
        !matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified path. Immutable once produced by the comparison engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub path: String,
    pub status: Status,
}

impl ComparisonResult {
    pub fn new(path: impl Into<String>, status: Status) -> Self {
        Self {
            path: path.into(),
            status,
        }
    }
}

impl fmt::Display for ComparisonResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status, self.path)
    }
}

/// Per-status cardinalities of a finished comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub ok: usize,
    pub modified: usize,
    pub missing: usize,
    pub extra: usize,
}

impl Summary {
    pub fn from_results(results: &[ComparisonResult]) -> Self {
        let mut summary = Summary {
            total: results.len(),
            ..Summary::default()
        };
        for result in results {
            match result.status {
                Status::Ok => summary.ok += 1,
                Status::Modified => summary.modified += 1,
                Status::Missing => summary.missing += 1,
                Status::Extra => summary.extra += 1,
            }
        }
        summary
    }

    pub fn alerts(&self) -> usize {
        self.modified + self.missing + self.extra
    }
}

/// BLAKE3 content digest (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<blake3::Hash> for Digest {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

/// Render a relative path with `/` separators regardless of host.
///
/// `.` components are dropped. Non-UTF-8 names are converted lossily.
pub fn normalize_relative_path(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            Component::ParentDir => parts.push("..".to_string()),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    parts.join("/")
}
