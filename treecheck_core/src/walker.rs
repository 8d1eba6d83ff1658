use crate::exclusion::ExclusionMatcher;
use jwalk::{DirEntry, Parallelism, WalkDir};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use treecheck_common::{normalize_relative_path, FileEntry, TreeCheckError};

type RawEntry = Result<DirEntry<((), ())>, jwalk::Error>;

/// Sequential, depth-first directory walker that prunes excluded subtrees
#[derive(Debug, Clone, Default)]
pub struct TreeWalker {
    exclusions: ExclusionMatcher,
}

impl TreeWalker {
    pub fn new(exclusions: ExclusionMatcher) -> Self {
        Self { exclusions }
    }

    pub fn exclusions(&self) -> &ExclusionMatcher {
        &self.exclusions
    }

    /// Start walking `root`. Fails only if the root itself cannot be read;
    /// problems with individual entries are logged and skipped while iterating.
    pub fn walk(&self, root: &Path) -> Result<TreeWalk, TreeCheckError> {
        check_root(root)?;

        let exclusions = self.exclusions.clone();
        let prune_root = root.to_path_buf();

        let walker = WalkDir::new(root)
            .sort(true)
            .skip_hidden(false)
            .follow_links(false)
            .parallelism(Parallelism::Serial)
            .process_read_dir(move |_depth, _dir, _state, children| {
                // Dropping an excluded directory here also stops jwalk from
                // descending into it.
                children.retain(|child| {
                    let Ok(entry) = child else {
                        return true;
                    };
                    let Some(relative) = relative_path(&prune_root, &entry.path()) else {
                        return true;
                    };
                    if exclusions.matches(&relative, entry.file_type().is_dir()) {
                        debug!("Excluding {}", relative);
                        return false;
                    }
                    true
                });
            });

        Ok(TreeWalk {
            root: root.to_path_buf(),
            inner: Box::new(walker.into_iter()),
            skipped: 0,
        })
    }
}

/// Verify that `root` exists and can be listed
pub fn check_root(root: &Path) -> Result<(), TreeCheckError> {
    fs::read_dir(root)
        .map(|_| ())
        .map_err(|source| TreeCheckError::Walk {
            root: root.to_path_buf(),
            source,
        })
}

/// Path of `path` relative to `root`, `/`-separated. `None` if `path` is not
/// under `root`; the empty string for the root itself.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root).ok().map(normalize_relative_path)
}

/// Lazy sequence of the entries under a root, excluding the root itself
pub struct TreeWalk {
    root: PathBuf,
    inner: Box<dyn Iterator<Item = RawEntry>>,
    skipped: usize,
}

impl TreeWalk {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of entries dropped so far because they could not be read
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for TreeWalk {
    type Item = FileEntry;

    fn next(&mut self) -> Option<FileEntry> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {:?}: {}", self.root, e);
                    self.skipped += 1;
                    continue;
                }
            };

            // Skip the synthetic root entry
            if entry.depth == 0 {
                continue;
            }

            let path = entry.path();
            let relative = match path.strip_prefix(&self.root) {
                Ok(relative) if !relative.as_os_str().is_empty() => relative.to_path_buf(),
                Ok(_) => continue,
                Err(_) => {
                    warn!("Entry {:?} is outside of {:?}", path, self.root);
                    self.skipped += 1;
                    continue;
                }
            };

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping {:?}: cannot stat: {}", relative, e);
                    self.skipped += 1;
                    continue;
                }
            };

            return Some(FileEntry::new(relative, metadata.is_dir()));
        }
    }
}
