//! Atomic output files.
//!
//! Output is written to a randomly named sibling of the destination and only
//! renamed into place by [`AtomicFile::commit`]. Dropping an uncommitted file
//! removes the temporary, so a failed decryption never leaves partial
//! plaintext behind.

use getrandom::fill;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// A file that appears at its destination only once committed.
pub struct AtomicFile {
    path: PathBuf,
    tmp_path: PathBuf,
    file: Option<File>,
}

impl AtomicFile {
    /// Creates the temporary file next to `path`.
    ///
    /// Creates parent directories if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(Error::Write)?;
        }

        let tmp_path = random_tmp_path(&path)?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .map_err(Error::Write)?;

        Ok(Self {
            path,
            tmp_path,
            file: Some(file),
        })
    }

    /// The final destination.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Syncs the temporary file and moves it over the destination.
    ///
    /// If a crash occurs during commit, either the old or the new file will be
    /// present, never a partial write.
    pub fn commit(mut self) -> Result<()> {
        let file = self
            .file
            .take()
            .ok_or_else(|| Error::Write(io::Error::other("output file already committed")))?;
        file.sync_all().map_err(Error::Write)?;
        drop(file);

        if let Err(e) = atomic_replace(&self.tmp_path, &self.path) {
            let _ = fs::remove_file(&self.tmp_path);
            return Err(Error::Write(e));
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)
                .and_then(|dir| dir.sync_all())
                .map_err(Error::Write)?;
        }

        debug!(path = %self.path.display(), "output committed");
        Ok(())
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("output file already committed"))
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Writes `data` to `path` atomically.
pub fn write_atomic(path: impl Into<PathBuf>, data: &[u8]) -> Result<()> {
    let mut file = AtomicFile::create(path)?;
    file.write_all(data).map_err(Error::Write)?;
    file.commit()
}

/// `name.tmp.<16 hex digits>` in the destination's directory.
fn random_tmp_path(path: &Path) -> Result<PathBuf> {
    let mut buf = [0u8; 8];
    fill(&mut buf).map_err(|_| Error::RandomSource)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| {
            Error::Write(io::Error::new(
                io::ErrorKind::InvalidInput,
                "output path has no file name",
            ))
        })?
        .to_string_lossy();

    Ok(path.with_file_name(format!("{}.tmp.{}", file_name, hex::encode(buf))))
}

#[cfg(target_os = "windows")]
fn atomic_replace(tmp_path: &Path, path: &Path) -> io::Result<()> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::{REPLACEFILE_WRITE_THROUGH, ReplaceFileW};

    if !path.exists() {
        return fs::rename(tmp_path, path);
    }

    fn to_wide(s: &OsStr) -> Vec<u16> {
        s.encode_wide().chain(std::iter::once(0)).collect()
    }

    let target_w = to_wide(path.as_os_str());
    let tmp_w = to_wide(tmp_path.as_os_str());

    // SAFETY: both buffers are NUL-terminated UTF-16 and outlive the call.
    let result = unsafe {
        ReplaceFileW(
            target_w.as_ptr(),
            tmp_w.as_ptr(),
            std::ptr::null(),
            REPLACEFILE_WRITE_THROUGH,
            std::ptr::null(),
            std::ptr::null(),
        )
    };

    if result == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// `rename()` is atomic when both paths are on the same filesystem.
#[cfg(not(target_os = "windows"))]
fn atomic_replace(tmp_path: &Path, path: &Path) -> io::Result<()> {
    fs::rename(tmp_path, path)
}
