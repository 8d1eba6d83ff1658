//! Reference trees delivered as ZIP archives.

use crate::cleanup::remove_dir_with_retry;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use treecheck_common::TreeCheckError;

/// Resolve the reference root: directories are used as-is, `.zip` archives
/// are extracted below `work_dir` first.
///
/// `local_root` is the tree being verified. Extraction replaces
/// `work_dir/<stem>`, so a destination that overlaps `local_root` is refused.
pub fn prepare_reference(
    path: &Path,
    work_dir: &Path,
    local_root: &Path,
) -> Result<PathBuf, TreeCheckError> {
    if path.is_dir() {
        return Ok(path.to_path_buf());
    }

    if path.is_file() && is_zip(path) {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "reference".to_string());
        let dest = extraction_dir(work_dir, &stem)?;
        check_destination(&dest, path, local_root)?;

        let files = extract_zip(path, &dest)?;
        info!("Extracted {} files from {:?} into {:?}", files, path, dest);
        return find_tree_root(&dest);
    }

    Err(TreeCheckError::Archive(format!(
        "Reference is not a directory or .zip archive: {}",
        path.display()
    )))
}

/// Canonical form of `work_dir/<stem>` without creating anything: the
/// deepest existing ancestor is resolved and the rest appended.
fn extraction_dir(work_dir: &Path, stem: &str) -> Result<PathBuf, TreeCheckError> {
    let dest = std::env::current_dir()?.join(work_dir).join(stem);

    let mut existing = dest.as_path();
    let mut rest = Vec::new();
    while !existing.exists() {
        let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
            break;
        };
        rest.push(name.to_os_string());
        existing = parent;
    }

    let mut resolved = fs::canonicalize(existing)?;
    for name in rest.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Refuse a destination that is, contains, or lies inside the local tree,
/// or that contains the archive itself.
fn check_destination(dest: &Path, archive: &Path, local_root: &Path) -> Result<(), TreeCheckError> {
    let local = fs::canonicalize(local_root).map_err(|source| TreeCheckError::Walk {
        root: local_root.to_path_buf(),
        source,
    })?;
    if dest.starts_with(&local) || local.starts_with(dest) {
        return Err(TreeCheckError::Archive(format!(
            "Extraction directory {} overlaps the local tree {}; choose another work directory",
            dest.display(),
            local.display()
        )));
    }

    let archive = fs::canonicalize(archive)?;
    if archive.starts_with(dest) {
        return Err(TreeCheckError::Archive(format!(
            "Extraction directory {} contains the archive {}",
            dest.display(),
            archive.display()
        )));
    }
    Ok(())
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Extract `archive` into `dest`, replacing any previous extraction.
///
/// Returns the number of files written. Entries whose names would land
/// outside `dest` abort the extraction.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<usize, TreeCheckError> {
    if remove_dir_with_retry(dest)? {
        debug!("Removed stale extraction at {:?}", dest);
    }
    fs::create_dir_all(dest)?;

    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| TreeCheckError::Archive(format!("{}: {}", archive.display(), e)))?;

    let mut files = 0;
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| TreeCheckError::Archive(format!("{}: {}", archive.display(), e)))?;

        let Some(name) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(TreeCheckError::Archive(format!(
                "Entry '{}' escapes the extraction directory",
                entry.name()
            )));
        };
        let out_path = dest.join(name);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        files += 1;
    }

    Ok(files)
}

/// Archives usually wrap their content in a single top-level directory; if
/// so, that directory is the tree root.
pub fn find_tree_root(base: &Path) -> Result<PathBuf, TreeCheckError> {
    let entries: Vec<fs::DirEntry> = fs::read_dir(base)?.collect::<Result<_, _>>()?;

    if let [only] = entries.as_slice() {
        if only.file_type()?.is_dir() {
            let root = only.path();
            debug!("Using nested directory {:?} as tree root", root);
            return Ok(root);
        }
    }

    Ok(base.to_path_buf())
}
