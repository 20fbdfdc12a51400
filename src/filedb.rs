//! Filedb: the per-engine append-only write-ahead log.
//!
//! A plain-text, newline-terminated, append-only file. `write_line`
//! appends and relies on OS buffering rather than per-write fsync — the
//! durability point is the next restart of the process; the data-loss
//! window is bounded by the OS page cache flush, not by this module.
//! `tailf` is a poll loop: only complete (`\n`-terminated) lines are ever
//! delivered, partial trailing writes are buffered until completed, and
//! file truncation/rotation triggers a reopen from offset zero.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::mpsc;
use tokio::time::Duration;

#[derive(Debug, Error)]
pub enum FiledbError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> FiledbError {
    FiledbError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Handle to one engine's log file. Cheap to clone the path and open
/// independent read handles — the writer keeps its own open `File`.
pub struct Filedb {
    path: PathBuf,
    writer: File,
}

impl Filedb {
    /// Opens (creating if absent) the log file for append, per
    /// `<data_dir>/filedb/<engine_name>.log` (spec §6).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FiledbError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(&path, e))?;
        }
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_err(&path, e))?;
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `line` followed by `\n`. Returns once the write leaves
    /// user-space buffers (a single `write` syscall via the OS file
    /// handle); no explicit fsync — durability is bounded by the OS page
    /// cache flush, not by this call.
    pub async fn write_line(&mut self, line: &str) -> Result<(), FiledbError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.writer
            .write_all(&buf)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        self.writer.flush().await.map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }

    /// Returns the first non-empty line, or `""` if the file is empty.
    pub async fn read_first_line(&self) -> Result<String, FiledbError> {
        let mut f = File::open(&self.path).await.map_err(|e| io_err(&self.path, e))?;
        let mut buf = Vec::new();
        // A log header line is tiny relative to the file; read in modest
        // chunks until a newline shows up rather than slurping the file.
        let mut chunk = [0u8; 4096];
        loop {
            let n = f.read(&mut chunk).await.map_err(|e| io_err(&self.path, e))?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.contains(&b'\n') {
                break;
            }
        }
        let first = buf.split(|&b| b == b'\n').next().unwrap_or(&[]);
        Ok(String::from_utf8_lossy(first).trim_end().to_string())
    }

    /// Returns the last non-empty line, or `""` if the file is empty.
    /// Reads a trailing window of at least 1 KiB and grows it until a
    /// complete line is found, tolerating files far larger than the
    /// window.
    pub async fn read_last_line(&self) -> Result<String, FiledbError> {
        let mut f = File::open(&self.path).await.map_err(|e| io_err(&self.path, e))?;
        let len = f
            .metadata()
            .await
            .map_err(|e| io_err(&self.path, e))?
            .len();
        if len == 0 {
            return Ok(String::new());
        }

        let mut window: u64 = 1024;
        loop {
            let start = len.saturating_sub(window);
            f.seek(SeekFrom::Start(start))
                .await
                .map_err(|e| io_err(&self.path, e))?;
            let mut buf = vec![0u8; (len - start) as usize];
            f.read_exact(&mut buf).await.map_err(|e| io_err(&self.path, e))?;

            // Drop a dangling partial line at the very end (no trailing \n).
            let trimmed = match buf.iter().rposition(|&b| b == b'\n') {
                Some(pos) => &buf[..pos],
                None if start == 0 => &buf[..],
                None => {
                    // window doesn't even contain one newline yet; grow.
                    window *= 4;
                    continue;
                }
            };

            if let Some(last_nl) = trimmed.iter().rposition(|&b| b == b'\n') {
                let last_line = &trimmed[last_nl + 1..];
                return Ok(String::from_utf8_lossy(last_line).to_string());
            } else if start == 0 {
                return Ok(String::from_utf8_lossy(trimmed).to_string());
            } else {
                window *= 4;
            }
        }
    }

    /// Follows the file, delivering only complete lines in file order on
    /// `tx`. Tolerates truncation/rotation (reopens from offset 0 when the
    /// file's inode changes or its length shrinks). Runs until the
    /// channel's receiver is dropped or an unrecoverable read error
    /// occurs, in which case the error is sent and the loop stops — a
    /// failing line is never silently skipped, since that would desync
    /// downstream `logID` expectations.
    pub async fn tailf(
        path: PathBuf,
        tx: mpsc::Sender<Result<String, FiledbError>>,
        poll_interval: Duration,
    ) {
        let mut offset: u64 = 0;
        let mut ino: Option<u64> = None;
        let mut partial: Vec<u8> = Vec::new();

        loop {
            let meta = match tokio::fs::metadata(&path).await {
                Ok(m) => m,
                Err(_) => {
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
            };
            let cur_ino = meta.ino();
            if ino != Some(cur_ino) || meta.len() < offset {
                ino = Some(cur_ino);
                offset = 0;
                partial.clear();
            }

            let mut f = match File::open(&path).await {
                Ok(f) => f,
                Err(_) => {
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
            };
            if f.seek(SeekFrom::Start(offset)).await.is_err() {
                tokio::time::sleep(poll_interval).await;
                continue;
            }

            let mut chunk = vec![0u8; 64 * 1024];
            match f.read(&mut chunk).await {
                Ok(0) => {
                    tokio::time::sleep(poll_interval).await;
                }
                Ok(n) => {
                    offset += n as u64;
                    partial.extend_from_slice(&chunk[..n]);
                    while let Some(pos) = partial.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = partial.drain(..=pos).collect();
                        let line = &line[..line.len() - 1];
                        let s = String::from_utf8_lossy(line).to_string();
                        if tx.send(Ok(s)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(io_err(&path, e))).await;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn qa_write_then_read_last_line() {
        let dir = tempdir();
        let path = dir.join("test.log");
        let mut db = Filedb::open(&path).await.unwrap();
        assert_eq!(db.read_last_line().await.unwrap(), "");

        db.write_line("{\"logID\":1}").await.unwrap();
        db.write_line("{\"logID\":2}").await.unwrap();
        assert_eq!(db.read_last_line().await.unwrap(), "{\"logID\":2}");
        assert_eq!(db.read_first_line().await.unwrap(), "{\"logID\":1}");
    }

    #[tokio::test]
    async fn qa_read_last_line_large_file() {
        let dir = tempdir();
        let path = dir.join("big.log");
        let mut db = Filedb::open(&path).await.unwrap();
        for i in 0..2000 {
            db.write_line(&format!("{{\"logID\":{i}}}")).await.unwrap();
        }
        assert_eq!(db.read_last_line().await.unwrap(), "{\"logID\":1999}");
    }

    #[tokio::test]
    async fn qa_tailf_delivers_complete_lines_in_order() {
        let dir = tempdir();
        let path = dir.join("tail.log");
        let mut db = Filedb::open(&path).await.unwrap();
        db.write_line("one").await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let tail_path = path.clone();
        let handle = tokio::spawn(Filedb::tailf(tail_path, tx, Duration::from_millis(5)));

        assert_eq!(rx.recv().await.unwrap().unwrap(), "one");

        db.write_line("two").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap(), "two");

        handle.abort();
    }

    fn tempdir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("filedb_test_{}", std::process::id()));
        p.push(uuid_like());
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    fn uuid_like() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        format!(
            "{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }
}
