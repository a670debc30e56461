//! Append-only log (AOL) persistence.
//!
//! Every collection maps to one `<base>/<name>.aev` file holding a
//! concatenation of length-prefixed frames:
//!
//! ```text
//! +------------+------------------+------------+------------------+
//! | len: u32 LE| payload (len B)  | len: u32 LE| payload (len B)  |
//! +------------+------------------+------------+------------------+
//! ```
//!
//! Payloads are UTF-8 JSON: a full document, a tombstone
//! `{"_id": "...", "_deleted": true}`, a schema record, or an index
//! snapshot. There are no in-frame checksums; a frame that fails JSON
//! parsing is rejected during replay, and a truncated tail left by an
//! interrupted append is silently discarded by the reader.
//!
//! Appends are best-effort with the flush as the durability point.
//! Compaction rewrites the live state into `<name>.aev.tmp` and renames it
//! over the log, so the live file is never observed half-written.

pub mod frame;

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use crate::error::Result;

/// File extension for collection logs.
const LOG_EXT: &str = "aev";

/// Per-collection file persistence.
///
/// The engine is stateless between calls: every operation opens, uses, and
/// closes its own file handle. Serialization of concurrent access is the
/// caller's responsibility (the database holds its writer lock across
/// appends and compactions).
#[derive(Debug)]
pub struct Engine {
    base: PathBuf,
}

impl Engine {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Ensures the base directory exists. The only fatal failure in the
    /// storage layer: without a directory there is nothing to recover or
    /// append to.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base)?;
        Ok(())
    }

    /// Full path of a collection's log file.
    pub fn log_path(&self, collection: &str) -> PathBuf {
        self.base.join(format!("{collection}.{LOG_EXT}"))
    }

    /// Names of all collections with a log file on disk.
    pub fn list_collections(&self) -> Vec<String> {
        let mut collections = Vec::new();
        let entries = match fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(_) => return collections,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == LOG_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    collections.push(stem.to_string());
                }
            }
        }
        collections
    }

    /// Replays a collection log, returning frame payloads in file order.
    ///
    /// A missing file is an empty log. Frames with non-UTF-8 payloads are
    /// skipped; a truncated tail ends the iteration silently.
    pub fn load_log(&self, collection: &str) -> Vec<String> {
        let path = self.log_path(collection);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(_) => return Vec::new(),
        };

        let mut reader = BufReader::new(file);
        let mut frames = Vec::new();
        loop {
            match frame::read_frame(&mut reader) {
                Ok(Some(payload)) => match String::from_utf8(payload) {
                    Ok(text) => frames.push(text),
                    Err(_) => {
                        tracing::warn!(collection, "skipping non-UTF-8 frame");
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(collection, error = %e, "log read aborted");
                    break;
                }
            }
        }
        frames
    }

    /// Appends one frame to a collection log, creating the file on first
    /// write. Returns whether the frame reached the write stream intact;
    /// the flush is the durability point.
    pub fn append(&self, collection: &str, payload: &str) -> bool {
        let path = self.log_path(collection);
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(collection, error = %e, "failed to open log for append");
                return false;
            }
        };

        let mut writer = BufWriter::new(file);
        if let Err(e) = frame::write_frame(&mut writer, payload.as_bytes()) {
            tracing::error!(collection, error = %e, "append failed");
            return false;
        }
        match writer.flush() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(collection, error = %e, "append flush failed");
                false
            }
        }
    }

    /// Rewrites a collection log to contain exactly `active` frames.
    ///
    /// Writes into `<name>.aev.tmp` and atomically renames it over the live
    /// file. On any failure the tmp file is removed and the previous log is
    /// left untouched.
    pub fn compact(&self, collection: &str, active: &[String]) -> bool {
        let path = self.log_path(collection);
        let tmp_path = self.base.join(format!("{collection}.{LOG_EXT}.tmp"));

        let result = self.write_snapshot(&tmp_path, active);
        if let Err(e) = result {
            tracing::error!(collection, error = %e, "compaction write failed");
            let _ = fs::remove_file(&tmp_path);
            return false;
        }

        // The rename must stay on one volume so the swap is atomic; both
        // paths live in the base directory.
        match fs::rename(&tmp_path, &path) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(collection, error = %e, "compaction rename failed");
                let _ = fs::remove_file(&tmp_path);
                false
            }
        }
    }

    fn write_snapshot(&self, path: &std::path::Path, active: &[String]) -> std::io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        for payload in active {
            frame::write_frame(&mut writer, payload.as_bytes())?;
        }
        writer.flush()
    }
}
