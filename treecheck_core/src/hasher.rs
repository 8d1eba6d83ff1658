use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use treecheck_common::{Digest, ReadError};

const BUFFER_SIZE: usize = 64 * 1024;

/// Opens file contents for hashing.
///
/// The comparison engine reads every file through this trait, which lets
/// callers substitute instrumented or remote sources.
pub trait ContentSource: Send + Sync {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;
}

/// Reads straight from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSource;

impl ContentSource for LocalSource {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }
}

/// BLAKE3 digest of a local file, streamed in fixed-size chunks
pub fn hash_file(path: &Path) -> Result<Digest, ReadError> {
    hash_with(&LocalSource, path)
}

/// Digest of `path` as served by `source`. The reader is closed before returning.
pub fn hash_with(source: &dyn ContentSource, path: &Path) -> Result<Digest, ReadError> {
    let reader = source.open(path).map_err(|source| ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    hash_reader(reader).map_err(|source| ReadError {
        path: path.to_path_buf(),
        source,
    })
}

pub fn hash_reader(mut reader: impl Read) -> io::Result<Digest> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0; BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().into())
}
