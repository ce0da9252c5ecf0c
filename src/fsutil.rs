//! Filesystem helpers shared by the backends
//!
//! Every file this crate writes goes through [`write_atomic`]: bytes land in a
//! temp file next to the destination, are synced, then renamed over the
//! destination. A failed transfer leaves the previous content (or nothing) in
//! place, never a truncated file.

use crate::{Error, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Prefix of in-flight temp files; listings skip these
pub const TEMP_PREFIX: &str = ".blobsync-";

/// Whether a file name belongs to an in-flight write
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

/// Create `dir` and all of its parents
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::at_path(dir, e))
}

/// Write `dest` atomically.
///
/// `fill` receives the temp file to write into. On success the temp file is
/// synced and renamed onto `dest`; on error it is removed and `dest` is left
/// untouched.
pub fn write_atomic<T>(dest: &Path, fill: impl FnOnce(&mut File) -> Result<T>) -> Result<T> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    ensure_dir(&parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(&parent)
        .map_err(|e| Error::at_path(&parent, e))?;

    let value = fill(tmp.as_file_mut())?;
    tmp.as_file().sync_all().map_err(|e| Error::at_path(dest, e))?;
    tmp.persist(dest).map_err(|e| Error::at_path(dest, e.error))?;
    sync_dir(&parent);

    Ok(value)
}

/// Copy `src` to `dest` atomically, returning the number of bytes copied
pub fn copy_file_atomic(src: &Path, dest: &Path) -> Result<u64> {
    let mut source = File::open(src).map_err(|e| Error::at_path(src, e))?;
    write_atomic(dest, |out| {
        io::copy(&mut source, out).map_err(|e| Error::at_path(src, e))
    })
}

/// Recursively collect regular files under `dir`.
///
/// A missing `dir`, or one that is really a file, yields an empty list. Temp
/// files from in-flight writes are skipped. Order follows directory traversal
/// and is not stable.
pub fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if current == dir && (e.kind() == io::ErrorKind::NotFound || !dir.is_dir()) => {
                return Ok(files)
            }
            Err(e) => return Err(Error::at_path(&current, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| Error::at_path(&current, e))?;
            let file_type = entry.file_type().map_err(|e| Error::at_path(entry.path(), e))?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file()
                && !is_temp_name(&entry.file_name().to_string_lossy())
            {
                files.push(entry.path());
            }
        }
    }

    Ok(files)
}

// Persist the rename itself. Failures are ignored: the data is already
// synced and some filesystems refuse fsync on directories.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a/b/c.txt");

        write_atomic(&dest, |f| {
            use std::io::Write;
            f.write_all(b"payload")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn test_write_atomic_failure_keeps_previous_content() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        fs::write(&dest, b"original").unwrap();

        let result: Result<()> = write_atomic(&dest, |f| {
            use std::io::Write;
            f.write_all(b"partial")?;
            Err(Error::Io(io::Error::new(io::ErrorKind::Other, "stream cut")))
        });

        assert!(result.is_err());
        assert_eq!(fs::read(&dest).unwrap(), b"original");
        // No temp file left behind
        assert_eq!(walk_files(dir.path()).unwrap(), vec![dest]);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_walk_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("x/y")).unwrap();
        fs::write(dir.path().join("top.txt"), b"1").unwrap();
        fs::write(dir.path().join("x/y/deep.txt"), b"2").unwrap();
        fs::write(dir.path().join("x/.blobsync-abc"), b"tmp").unwrap();

        let mut files = walk_files(dir.path()).unwrap();
        files.sort();
        assert_eq!(
            files,
            vec![dir.path().join("top.txt"), dir.path().join("x/y/deep.txt")]
        );

        assert!(walk_files(&dir.path().join("missing")).unwrap().is_empty());

        let file = dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();
        assert!(walk_files(&file).unwrap().is_empty());
    }
}
