use crate::exclusion::ExclusionMatcher;
use crate::hasher::{hash_with, ContentSource, LocalSource};
use crate::walker::{check_root, TreeWalker};
use crossbeam::channel;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use treecheck_common::{ComparisonResult, FileEntry, Status, TreeCheckError, DEFAULT_WORKERS};

/// Results of the local pass, plus the on-disk paths that produced one
type LocalPass = (Vec<ComparisonResult>, HashSet<PathBuf>);

/// One local entry waiting for a worker
struct CompareTask {
    entry: FileEntry,
    local: PathBuf,
    reference: PathBuf,
}

/// Comparison engine for checking a local tree against a reference tree
///
/// Local entries are classified on a fixed-size worker pool; the walk that
/// discovers them runs on its own thread and blocks while every worker is
/// busy. Entries only present in the reference tree are found afterwards by
/// walking the reference root.
#[derive(Clone)]
pub struct ComparisonEngine {
    workers: usize,
    source: Arc<dyn ContentSource>,
}

impl Default for ComparisonEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ComparisonEngine {
    pub fn new() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            source: Arc::new(LocalSource),
        }
    }

    /// Set the pool width. Values below 1 are raised to 1.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Read file contents through `source` instead of the local filesystem
    pub fn with_source(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.source = source;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Classify every non-excluded path of both trees.
    ///
    /// Results are in arrival order; sort by path for a stable report.
    pub fn compare(
        &self,
        local_root: &Path,
        reference_root: &Path,
        exclusions: &ExclusionMatcher,
    ) -> Result<Vec<ComparisonResult>, TreeCheckError> {
        self.compare_with_progress(local_root, reference_root, exclusions, |_| {})
    }

    /// Like [`compare`](Self::compare), calling `on_result` for every result
    /// as it is collected.
    pub fn compare_with_progress<F>(
        &self,
        local_root: &Path,
        reference_root: &Path,
        exclusions: &ExclusionMatcher,
        mut on_result: F,
    ) -> Result<Vec<ComparisonResult>, TreeCheckError>
    where
        F: FnMut(&ComparisonResult),
    {
        check_root(local_root)?;
        check_root(reference_root)?;

        info!(
            "Comparing {:?} against {:?} ({} workers, {} exclusion rules)",
            local_root,
            reference_root,
            self.workers,
            exclusions.len()
        );

        let walker = TreeWalker::new(exclusions.clone());

        let (mut results, seen) =
            self.compare_local(&walker, local_root, reference_root, &mut on_result)?;

        let missing = find_missing(&walker, local_root, reference_root, &seen, &mut on_result)?;
        debug!("{} reference entries missing locally", missing.len());
        results.extend(missing);

        info!("Comparison produced {} results", results.len());
        Ok(results)
    }

    /// Walk the local tree and fan its entries out over the worker pool
    fn compare_local(
        &self,
        walker: &TreeWalker,
        local_root: &Path,
        reference_root: &Path,
        on_result: &mut dyn FnMut(&ComparisonResult),
    ) -> Result<LocalPass, TreeCheckError> {
        // Rendezvous channel: the dispatcher blocks until a worker is free
        let (task_tx, task_rx) = channel::bounded::<CompareTask>(0);
        // Every task reports exactly once, with `None` for matched directories
        let (report_tx, report_rx) = channel::unbounded::<(PathBuf, Option<ComparisonResult>)>();
        let source = self.source.as_ref();

        let outcome = crossbeam::thread::scope(|scope| -> Result<LocalPass, TreeCheckError> {
            for _ in 0..self.workers {
                let task_rx = task_rx.clone();
                let report_tx = report_tx.clone();
                scope.spawn(move |_| {
                    for task in task_rx.iter() {
                        let result = compare_entry(source, &task);
                        if report_tx.send((task.entry.path, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(task_rx);
            drop(report_tx);

            let dispatcher = scope.spawn(move |_| -> Result<usize, TreeCheckError> {
                let mut walk = walker.walk(local_root)?;
                let mut dispatched = 0usize;

                for entry in &mut walk {
                    let task = CompareTask {
                        local: local_root.join(&entry.path),
                        reference: reference_root.join(&entry.path),
                        entry,
                    };
                    if task_tx.send(task).is_err() {
                        warn!("All comparison workers exited early");
                        break;
                    }
                    dispatched += 1;
                }

                if walk.skipped() > 0 {
                    warn!("Skipped {} unreadable local entries", walk.skipped());
                }
                debug!("Dispatched {} local entries", dispatched);
                Ok(dispatched)
            });

            let mut results = Vec::new();
            let mut seen = HashSet::new();
            let mut reported = 0usize;
            for (path, report) in report_rx.iter() {
                reported += 1;
                if let Some(result) = report {
                    on_result(&result);
                    results.push(result);
                    seen.insert(path);
                }
            }

            let dispatched = dispatcher.join().map_err(|_| {
                TreeCheckError::Comparison("Dispatcher thread panicked".to_string())
            })??;

            if reported != dispatched {
                return Err(TreeCheckError::Comparison(format!(
                    "{} entries dispatched but {} reported",
                    dispatched, reported
                )));
            }

            Ok((results, seen))
        });

        outcome.map_err(|_| TreeCheckError::Comparison("Comparison worker panicked".to_string()))?
    }
}

/// Classify a single local entry against its reference counterpart
fn compare_entry(source: &dyn ContentSource, task: &CompareTask) -> Option<ComparisonResult> {
    let path = &task.entry.relative_path;
    let counterpart = entry_kind(&task.reference);

    if task.entry.is_dir {
        if counterpart == Some(EntryKind::Dir) {
            return None;
        }
        debug!("{} has no reference directory", path);
        return Some(ComparisonResult::new(path.clone(), Status::Extra));
    }

    if counterpart != Some(EntryKind::File) {
        debug!("{} has no reference file", path);
        return Some(ComparisonResult::new(path.clone(), Status::Extra));
    }

    let status = match hash_with(source, &task.local)
        .and_then(|local| hash_with(source, &task.reference).map(|reference| (local, reference)))
    {
        Ok((local, reference)) if local == reference => Status::Ok,
        Ok(_) => Status::Modified,
        Err(e) => {
            // An unreadable file is never reported as unchanged
            warn!("Treating {} as modified: {}", path, e);
            Status::Modified
        }
    };

    if status == Status::Ok && !task.entry.has_exact_name() {
        // Another entry can be reported under the same lossy name
        warn!("Treating {} as modified: name is not valid UTF-8", path);
        return Some(ComparisonResult::new(path.clone(), Status::Modified));
    }

    Some(ComparisonResult::new(path.clone(), status))
}

/// Walk the reference tree and report entries with no local counterpart
fn find_missing(
    walker: &TreeWalker,
    local_root: &Path,
    reference_root: &Path,
    seen: &HashSet<PathBuf>,
    on_result: &mut dyn FnMut(&ComparisonResult),
) -> Result<Vec<ComparisonResult>, TreeCheckError> {
    let mut missing = Vec::new();
    let mut walk = walker.walk(reference_root)?;

    for entry in &mut walk {
        if seen.contains(&entry.path) {
            continue;
        }

        let expected = if entry.is_dir {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        if entry_kind(&local_root.join(&entry.path)) == Some(expected) {
            continue;
        }

        let result = ComparisonResult::new(entry.relative_path, Status::Missing);
        on_result(&result);
        missing.push(result);
    }

    if walk.skipped() > 0 {
        warn!("Skipped {} unreadable reference entries", walk.skipped());
    }

    Ok(missing)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Dir,
}

/// Kind of the entry at `path` without following symlinks; `None` when it
/// does not exist or cannot be stat-ed.
fn entry_kind(path: &Path) -> Option<EntryKind> {
    let metadata = fs::symlink_metadata(path).ok()?;
    Some(if metadata.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::File
    })
}
