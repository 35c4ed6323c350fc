//! Size-rotated append-only log file
//!
//! `name.log` is written until the next write would push it past the size
//! limit, then shifted to `name.log.1` (older backups move up by one and the
//! oldest is dropped). The sink is cheap to clone and can be handed to
//! `tracing_subscriber` as a writer or fed raw bytes from a child process.

use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// Default size of one log file before rotation (5 MiB)
pub const DEFAULT_ROTATE_BYTES: u64 = 5 * 1024 * 1024;

/// Default number of rotated backups kept
pub const DEFAULT_BACKUPS: usize = 5;

struct Inner {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    backups: usize,
}

impl Inner {
    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.backups == 0 {
            self.file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.written = 0;
            return Ok(());
        }

        let oldest = self.backup_path(self.backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.backups).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;

        self.file = open_append(&self.path)?;
        self.written = 0;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Append-only log file rotated by size
#[derive(Clone)]
pub struct RotatingLog {
    inner: Arc<Mutex<Inner>>,
}

impl RotatingLog {
    /// Open (or create) a log file with default limits
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        Self::with_limits(path, DEFAULT_ROTATE_BYTES, DEFAULT_BACKUPS)
    }

    /// Open (or create) a log file with explicit limits
    ///
    /// The parent directory is created when missing.
    pub fn with_limits(
        path: impl Into<PathBuf>,
        max_bytes: u64,
        backups: usize,
    ) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = open_append(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                path,
                file,
                written,
                max_bytes: max_bytes.max(1),
                backups,
            })),
        })
    }

    /// Path of the active log file
    pub fn path(&self) -> PathBuf {
        self.inner.lock().path.clone()
    }

    /// Append one line, adding the trailing newline when missing
    pub fn append_line(&self, line: &str) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if line.ends_with('\n') {
            inner.write(line.as_bytes())?;
        } else {
            let mut owned = String::with_capacity(line.len() + 1);
            owned.push_str(line);
            owned.push('\n');
            inner.write(owned.as_bytes())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RotatingLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingLog")
            .field("path", &self.path())
            .finish()
    }
}

impl Write for RotatingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingLog {
    type Writer = RotatingLog;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("server.log");
        let log = RotatingLog::open(&path).unwrap();
        log.append_line("hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
        assert_eq!(log.path(), path);
    }

    #[test]
    fn test_rotates_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        let log = RotatingLog::with_limits(&path, 10, 2).unwrap();

        log.append_line("aaaaaaaa").unwrap();
        log.append_line("bbbbbbbb").unwrap();
        log.append_line("cccccccc").unwrap();
        log.append_line("dddddddd").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "dddddddd\n");
        assert_eq!(
            fs::read_to_string(dir.path().join("server.log.1")).unwrap(),
            "cccccccc\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("server.log.2")).unwrap(),
            "bbbbbbbb\n"
        );
        assert!(!dir.path().join("server.log.3").exists());
    }

    #[test]
    fn test_resumes_existing_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        fs::write(&path, "0123456789").unwrap();

        let log = RotatingLog::with_limits(&path, 12, 1).unwrap();
        log.append_line("next").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "next\n");
        assert_eq!(
            fs::read_to_string(dir.path().join("server.log.1")).unwrap(),
            "0123456789"
        );
    }

    #[test]
    fn test_zero_backups_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        let log = RotatingLog::with_limits(&path, 4, 0).unwrap();
        log.append_line("abc").unwrap();
        log.append_line("xyz").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "xyz\n");
    }
}
