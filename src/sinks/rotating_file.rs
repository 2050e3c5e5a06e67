//! Size-rotated CSV file sink
//!
//! The live file is `<stem>.<ext>`. Once it grows past `MaxFileSize` it is
//! renamed to `<stem>.<yyyyMMddHHmmssfff>[ (NN)].<ext>`, stamped with its
//! creation time, and a fresh live file is started. Every drained batch runs
//! under a process-local lock plus an advisory lock file, so several
//! processes can share one log file.

use crate::core::config::SinkConfig;
use crate::core::error::{LogError, Result};
use crate::core::event_record::EventRecord;
use crate::core::format::{csv_escape, csv_quote, CompiledFormat, FormatFlavor};
use crate::core::host::HostInfo;
use crate::core::internal;
use crate::core::sink::Sink;
use chrono::{DateTime, Local};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

#[cfg(windows)]
const LINE_END: &str = "\r\n";
#[cfg(not(windows))]
const LINE_END: &str = "\n";

/// Default rotation size (100 MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";
const STAMP_LEN: usize = 17;

/// Expand `%Name%` variables in a configured path.
///
/// `ProcessName`, `ProcessId`, `DomainName` and `BaseDir` come from the
/// host; any other name is looked up in the environment. Unknown names are
/// left as written.
pub fn expand_path(raw: &str, host: &HostInfo) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('%') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        let value = match name.to_ascii_lowercase().as_str() {
            "processname" => Some(host.process_name().to_string()),
            "processid" => Some(host.process_id().to_string()),
            "domainname" => Some(host.context_name().to_string()),
            "basedir" => Some(host.base_dir().display().to_string()),
            "" => None,
            _ => std::env::var(name).ok(),
        };
        match value {
            Some(value) => out.push_str(&value),
            None => {
                out.push('%');
                out.push_str(name);
                out.push('%');
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn text_block(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}{}", text, LINE_END)
    }
}

// 64-bit FNV-1a, stable across processes and builds
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Lock file shared by every process writing `path`
fn lock_file_path(path: &Path) -> PathBuf {
    let key = path.to_string_lossy().to_lowercase();
    std::env::temp_dir().join(format!("sourcelog-{:016x}.lock", fnv1a(key.as_bytes())))
}

/// Process-local lock per absolute path, shared by sink instances
fn local_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let locks = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    Arc::clone(locks.lock().entry(path.to_path_buf()).or_default())
}

#[cfg(unix)]
fn same_file(handle: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (handle.metadata(), fs::metadata(path)) {
        (Ok(open), Ok(on_disk)) => open.dev() == on_disk.dev() && open.ino() == on_disk.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_handle: &File, path: &Path) -> bool {
    path.exists()
}

/// Name of a rotated file: `stem.stamp[ (NN)].ext`
fn rotated_name(stem: &str, ext: Option<&str>, stamp: &str, suffix: u32) -> String {
    let mut name = format!("{}.{}", stem, stamp);
    if suffix > 0 {
        name.push_str(&format!(" ({:02})", suffix));
    }
    if let Some(ext) = ext {
        name.push('.');
        name.push_str(ext);
    }
    name
}

/// Parse a rotated file name back into (stamp, suffix)
fn parse_rotated(name: &str, stem: &str, ext: Option<&str>) -> Option<(String, u32)> {
    let middle = name.strip_prefix(stem)?.strip_prefix('.')?;
    let middle = match ext {
        Some(ext) => middle.strip_suffix(ext)?.strip_suffix('.')?,
        None => middle,
    };
    let stamp = middle.get(..STAMP_LEN)?;
    if !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let suffix = match &middle[STAMP_LEN..] {
        "" => 0,
        tail => tail
            .strip_prefix(" (")?
            .strip_suffix(')')?
            .parse()
            .ok()?,
    };
    Some((stamp.to_string(), suffix))
}

#[derive(Debug, Clone)]
struct FileSettings {
    path: PathBuf,
    max_size: u64,
    max_files: usize,
    header: Option<String>,
    footer: Option<String>,
    lock_path: PathBuf,
    local: Arc<Mutex<()>>,
}

struct BatchLock {
    lock_file: Option<File>,
    _local: ArcMutexGuard<RawMutex, ()>,
}

impl Drop for BatchLock {
    fn drop(&mut self) {
        if let Some(file) = &self.lock_file {
            let _ = fs2::FileExt::unlock(file);
        }
    }
}

#[derive(Default)]
struct FileState {
    writer: Option<BufWriter<File>>,
    size: u64,
    opened_at: Option<DateTime<Local>>,
    held: Option<BatchLock>,
    lock_warned: bool,
}

/// Rotating CSV file sink (`Type=file`).
///
/// | Key | Meaning |
/// |-----|---------|
/// | `FileName` | Live file path, `%Var%` expanded, relative to the base directory |
/// | `MaxFileSize` | Rotation size in bytes, default 100 MB, 0 disables rotation |
/// | `MaxFiles` | Rotated files kept, default 0 (unlimited) |
/// | `Header` / `Footer` | Literal text written at file start / on close |
#[derive(Default)]
pub struct RotatingFileSink {
    settings: Mutex<Option<FileSettings>>,
    state: Mutex<FileState>,
}

impl RotatingFileSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolved live file path, once initialized
    pub fn path(&self) -> Option<PathBuf> {
        self.settings.lock().as_ref().map(|s| s.path.clone())
    }

    fn settings(&self) -> Result<FileSettings> {
        self.settings
            .lock()
            .clone()
            .ok_or_else(|| LogError::file_sink("<unset>", "sink not initialized"))
    }

    fn acquire(&self, settings: &FileSettings, state: &mut FileState) -> BatchLock {
        let local = settings.local.lock_arc();
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&settings.lock_path)
            .and_then(|file| fs2::FileExt::lock_exclusive(&file).map(|()| file));
        let lock_file = match lock_file {
            Ok(file) => Some(file),
            Err(e) => {
                if !state.lock_warned {
                    state.lock_warned = true;
                    internal::report(
                        "file",
                        &LogError::io_operation(
                            "locking",
                            format!(
                                "'{}' unavailable, serializing within this process only",
                                settings.lock_path.display()
                            ),
                            e,
                        ),
                    );
                }
                None
            }
        };
        BatchLock {
            lock_file,
            _local: local,
        }
    }

    /// Open the live file for append, stripping a trailing footer and
    /// writing the header into an empty file
    fn open_live(settings: &FileSettings, state: &mut FileState) -> Result<()> {
        let path = &settings.path;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                LogError::io_operation(
                    "create log directory",
                    format!("Failed to create directory '{}'", parent.display()),
                    e,
                )
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| LogError::file_sink(path.display().to_string(), format!("Failed to open: {}", e)))?;

        let mut len = file
            .metadata()
            .map_err(|e| {
                LogError::file_sink(
                    path.display().to_string(),
                    format!("Cannot access file metadata: {}", e),
                )
            })?
            .len();

        if let Some(footer) = &settings.footer {
            let footer = footer.as_bytes();
            let footer_len = footer.len() as u64;
            if footer_len > 0 && len >= footer_len {
                let mut tail = vec![0u8; footer.len()];
                file.seek(SeekFrom::Start(len - footer_len))?;
                file.read_exact(&mut tail)?;
                if tail == footer {
                    file.set_len(len - footer_len)?;
                    len -= footer_len;
                }
            }
        }

        let mut writer = BufWriter::new(file);
        if len == 0 {
            if let Some(header) = &settings.header {
                writer.write_all(header.as_bytes())?;
                len = header.len() as u64;
            }
        }

        state.writer = Some(writer);
        state.size = len;
        state.opened_at = Some(Local::now());
        Ok(())
    }

    fn close_live(settings: &FileSettings, state: &mut FileState) -> Result<()> {
        if let Some(mut writer) = state.writer.take() {
            if let Some(footer) = &settings.footer {
                writer.write_all(footer.as_bytes())?;
            }
            writer.flush().map_err(|e| {
                LogError::file_sink(
                    settings.path.display().to_string(),
                    format!("Failed to flush on close: {}", e),
                )
            })?;
        }
        Ok(())
    }

    /// Creation time of the live file used in the rotated name
    fn creation_stamp(settings: &FileSettings, state: &FileState) -> String {
        let metadata = fs::metadata(&settings.path).ok();
        let created: DateTime<Local> = metadata
            .as_ref()
            .and_then(|m| m.created().ok())
            .map(DateTime::from)
            .or(state.opened_at)
            .or_else(|| metadata.and_then(|m| m.modified().ok()).map(DateTime::from))
            .unwrap_or_else(Local::now);
        created.format(STAMP_FORMAT).to_string()
    }

    fn rotate(settings: &FileSettings, state: &mut FileState) -> Result<()> {
        let path = &settings.path;
        let stamp = Self::creation_stamp(settings, state);
        Self::close_live(settings, state)?;

        let (stem, ext) = stem_and_ext(path);
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut suffix = 0;
        let mut target = dir.join(rotated_name(&stem, ext.as_deref(), &stamp, suffix));
        while target.exists() {
            suffix += 1;
            target = dir.join(rotated_name(&stem, ext.as_deref(), &stamp, suffix));
        }

        fs::rename(path, &target).map_err(|e| {
            LogError::rotation(
                path.display().to_string(),
                format!("Failed to rename to '{}': {}", target.display(), e),
            )
        })?;

        if settings.max_files > 0 {
            Self::purge(settings);
        }
        Self::open_live(settings, state)
    }

    /// Delete the oldest rotated files beyond `MaxFiles`
    fn purge(settings: &FileSettings) {
        let rotated = rotated_files(&settings.path);
        if rotated.len() <= settings.max_files {
            return;
        }
        let excess = rotated.len() - settings.max_files;
        for (_, _, old) in rotated.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&old) {
                internal::warn(
                    "file",
                    format!("Failed to remove old log file {}: {}", old.display(), e),
                );
            }
        }
    }
}

fn stem_and_ext(path: &Path) -> (String, Option<String>) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    (stem, ext)
}

/// Rotated siblings of `path`, oldest first
pub fn rotated_files(path: &Path) -> Vec<(String, u32, PathBuf)> {
    let (stem, ext) = stem_and_ext(path);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut rotated: Vec<(String, u32, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            parse_rotated(&name, &stem, ext.as_deref())
                .map(|(stamp, suffix)| (stamp, suffix, entry.path()))
        })
        .collect();
    rotated.sort();
    rotated
}

impl Sink for RotatingFileSink {
    type Payload = String;

    fn initialize(&self, config: &SinkConfig, host: &HostInfo) -> Result<()> {
        let raw = match config.get("FileName").or_else(|| config.get("Path")) {
            Some(raw) if !raw.trim().is_empty() => raw.trim(),
            _ => return Err(LogError::config(config.name(), "missing required key 'FileName'")),
        };
        let expanded = PathBuf::from(expand_path(raw, host));
        let path = if expanded.is_absolute() {
            expanded
        } else {
            host.base_dir().join(expanded)
        };

        let settings = FileSettings {
            lock_path: lock_file_path(&path),
            local: local_lock(&path),
            max_size: config.get_u64("MaxFileSize", DEFAULT_MAX_FILE_SIZE)?,
            max_files: config.get_usize("MaxFiles", 0)?,
            header: config.get("Header").filter(|h| !h.is_empty()).map(text_block),
            footer: config.get("Footer").filter(|f| !f.is_empty()).map(text_block),
            path,
        };
        *self.state.lock() = FileState::default();
        *self.settings.lock() = Some(settings);
        Ok(())
    }

    fn format_flavor(&self) -> FormatFlavor {
        FormatFlavor::Csv
    }

    fn format(&self, record: &Arc<EventRecord>, compiled: Option<&CompiledFormat>) -> String {
        match compiled {
            Some(format) => format!("{}{}", format.render(record), LINE_END),
            None => format!(
                "{},{},{},{}{}",
                record.local_date_time().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.severity_string(),
                csv_escape(record.source_name()),
                csv_quote(&record.user_message()),
                LINE_END
            ),
        }
    }

    fn begin_batch(&self) -> Result<()> {
        let settings = self.settings()?;
        let mut state = self.state.lock();
        let lock = self.acquire(&settings, &mut state);
        state.held = Some(lock);

        // Another process may have rotated the file away
        let moved = state
            .writer
            .as_ref()
            .is_some_and(|w| !same_file(w.get_ref(), &settings.path));
        if moved {
            state.writer = None;
        }
        if state.writer.is_none() {
            Self::open_live(&settings, &mut state)?;
        } else if let Ok(metadata) = fs::metadata(&settings.path) {
            state.size = metadata.len();
        }

        // A file holding only its header is never rotated
        let floor = settings.header.as_ref().map_or(0, |h| h.len() as u64);
        if settings.max_size > 0 && state.size > settings.max_size.max(floor) {
            if let Err(e) = Self::rotate(&settings, &mut state) {
                internal::report("file", &e);
                if state.writer.is_none() {
                    Self::open_live(&settings, &mut state)?;
                }
            }
        }
        Ok(())
    }

    fn write_one(&self, line: String) -> Result<()> {
        let mut state = self.state.lock();
        if state.writer.is_none() {
            let settings = self.settings()?;
            Self::open_live(&settings, &mut state)?;
        }
        if let Some(writer) = state.writer.as_mut() {
            writer.write_all(line.as_bytes())?;
        }
        state.size += line.len() as u64;
        Ok(())
    }

    fn end_batch(&self) -> Result<()> {
        let mut state = self.state.lock();
        let flushed = match state.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        };
        state.held = None;
        flushed.map_err(LogError::from)
    }

    fn close(&self) -> Result<()> {
        let Some(settings) = self.settings.lock().clone() else {
            return Ok(());
        };
        let mut state = self.state.lock();
        if state.writer.is_none() {
            return Ok(());
        }
        let lock = match state.held.take() {
            Some(lock) => lock,
            None => self.acquire(&settings, &mut state),
        };
        let result = Self::close_live(&settings, &mut state);
        drop(lock);
        result
    }
}
