//! System event log sink
//!
//! Entries go through an [`EventLogBackend`]. On Unix the default backend
//! is the local syslog daemon (`/dev/log`, RFC 3164 framing). Text longer
//! than one entry can hold is split into continuation entries.

use crate::core::config::SinkConfig;
use crate::core::error::{LogError, Result};
use crate::core::event_record::EventRecord;
use crate::core::format::CompiledFormat;
use crate::core::host::HostInfo;
use crate::core::severity::Severity;
use crate::core::sink::Sink;
use parking_lot::RwLock;
use std::sync::Arc;

/// Longest text of one entry before it is split
pub const MAX_ENTRY_CHARS: usize = 30_000;
pub const CONTINUED_TAIL: &str = "[CONTINUED...]";
pub const CONTINUED_HEAD: &str = "[...CONTINUED]";

/// Entry type understood by system event logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLogKind {
    Error,
    Warning,
    Information,
    SuccessAudit,
    FailureAudit,
}

impl From<Severity> for EventLogKind {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical | Severity::Error => EventLogKind::Error,
            Severity::Warning => EventLogKind::Warning,
            Severity::Information => EventLogKind::Information,
            Severity::Verbose => EventLogKind::SuccessAudit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogEntry {
    pub kind: EventLogKind,
    /// Source index of the originating event
    pub event_id: u32,
    pub text: String,
}

/// Destination of event log entries
pub trait EventLogBackend: Send + Sync {
    /// Prepare to report under `source` (the application name)
    fn open(&self, source: &str) -> Result<()>;

    fn report(&self, entry: &EventLogEntry) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Split `text` into chunks of at most `max` characters, marking
/// continuations at the end of every chunk but the last and at the start of
/// every chunk but the first.
pub fn split_entry(text: &str, max: usize) -> Vec<String> {
    if text.chars().count() <= max {
        return vec![text.to_string()];
    }
    let room = max
        .saturating_sub(CONTINUED_TAIL.len() + CONTINUED_HEAD.len() + 2)
        .max(1);
    let chars: Vec<char> = text.chars().collect();
    let pieces: Vec<String> = chars.chunks(room).map(|c| c.iter().collect()).collect();
    let last = pieces.len() - 1;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let mut chunk = String::with_capacity(piece.len() + 32);
            if i > 0 {
                chunk.push_str(CONTINUED_HEAD);
                chunk.push('\n');
            }
            chunk.push_str(&piece);
            if i < last {
                chunk.push('\n');
                chunk.push_str(CONTINUED_TAIL);
            }
            chunk
        })
        .collect()
}

#[cfg(unix)]
mod syslog {
    use super::{EventLogBackend, EventLogEntry, EventLogKind};
    use crate::core::error::{LogError, Result};
    use chrono::Local;
    use parking_lot::Mutex;
    use std::os::unix::net::UnixDatagram;
    use std::path::PathBuf;

    const SOCKET_PATHS: &[&str] = &["/dev/log", "/var/run/syslog", "/var/run/log"];
    // facility "user"
    const FACILITY: u8 = 1;

    /// Local syslog daemon over a Unix datagram socket
    pub struct SyslogBackend {
        socket_path: Option<PathBuf>,
        state: Mutex<Option<(UnixDatagram, String)>>,
    }

    impl SyslogBackend {
        pub fn new() -> Self {
            Self {
                socket_path: None,
                state: Mutex::new(None),
            }
        }

        /// Use a specific socket instead of the platform default
        pub fn with_socket(path: impl Into<PathBuf>) -> Self {
            Self {
                socket_path: Some(path.into()),
                state: Mutex::new(None),
            }
        }

        fn severity(kind: EventLogKind) -> u8 {
            match kind {
                EventLogKind::Error => 3,
                EventLogKind::Warning | EventLogKind::FailureAudit => 4,
                EventLogKind::SuccessAudit => 5,
                EventLogKind::Information => 6,
            }
        }

        /// RFC 3164 packet for one entry
        pub fn frame(tag: &str, entry: &EventLogEntry) -> String {
            format!(
                "<{}>{} {}[{}]: {}",
                FACILITY * 8 + Self::severity(entry.kind),
                Local::now().format("%b %e %H:%M:%S"),
                tag,
                std::process::id(),
                entry.text
            )
        }
    }

    impl Default for SyslogBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl EventLogBackend for SyslogBackend {
        fn open(&self, source: &str) -> Result<()> {
            let socket = UnixDatagram::unbound()
                .map_err(|e| LogError::io_operation("creating syslog socket", source, e))?;
            let candidates: Vec<PathBuf> = match &self.socket_path {
                Some(path) => vec![path.clone()],
                None => SOCKET_PATHS.iter().map(PathBuf::from).collect(),
            };
            let mut last_error = None;
            for path in &candidates {
                match socket.connect(path) {
                    Ok(()) => {
                        *self.state.lock() = Some((socket, source.to_string()));
                        return Ok(());
                    }
                    Err(e) => last_error = Some(e),
                }
            }
            Err(LogError::event_log(format!(
                "no syslog socket available: {}",
                last_error.map_or_else(|| "none configured".to_string(), |e| e.to_string())
            )))
        }

        fn report(&self, entry: &EventLogEntry) -> Result<()> {
            let state = self.state.lock();
            let (socket, tag) = state
                .as_ref()
                .ok_or_else(|| LogError::event_log("syslog backend not open"))?;
            socket
                .send(Self::frame(tag, entry).as_bytes())
                .map_err(|e| LogError::io_operation("sending to syslog", tag.clone(), e))?;
            Ok(())
        }

        fn close(&self) -> Result<()> {
            self.state.lock().take();
            Ok(())
        }
    }
}

#[cfg(unix)]
pub use syslog::SyslogBackend;

fn default_backend() -> Option<Arc<dyn EventLogBackend>> {
    #[cfg(unix)]
    {
        Some(Arc::new(SyslogBackend::new()))
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// System event log sink (`Type=eventlog`).
///
/// `Source` names the application in the log, defaulting to the context name.
pub struct EventLogSink {
    backend: RwLock<Option<Arc<dyn EventLogBackend>>>,
}

impl EventLogSink {
    /// Sink using the platform backend
    pub fn new() -> Self {
        Self {
            backend: RwLock::new(default_backend()),
        }
    }

    pub fn with_backend(backend: Arc<dyn EventLogBackend>) -> Self {
        Self {
            backend: RwLock::new(Some(backend)),
        }
    }

    fn backend(&self) -> Result<Arc<dyn EventLogBackend>> {
        self.backend
            .read()
            .clone()
            .ok_or_else(|| LogError::event_log("no event log backend on this platform"))
    }

    /// Default entry text: source line, message, then the error text or, for
    /// errors without one, the call stack
    fn default_text(record: &EventRecord) -> String {
        let mut text = format!("{}\n{}", record.source_name(), record.user_message());
        let detail = match record.exception() {
            Some(exception) => Some(exception),
            None if record.activity().is_none() && record.severity() >= Severity::Error => {
                Some(record.call_stack()).filter(|s| !s.is_empty())
            }
            None => None,
        };
        if let Some(detail) = detail {
            text.push('\n');
            text.push_str(&detail);
        }
        text
    }
}

impl Default for EventLogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for EventLogSink {
    type Payload = Vec<EventLogEntry>;

    fn initialize(&self, config: &SinkConfig, host: &HostInfo) -> Result<()> {
        let source = config
            .get("Source")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(host.context_name());
        self.backend()?.open(source)
    }

    fn format(&self, record: &Arc<EventRecord>, compiled: Option<&CompiledFormat>) -> Self::Payload {
        let text = match compiled {
            Some(format) => format.render(record),
            None => Self::default_text(record),
        };
        let kind = EventLogKind::from(record.severity());
        split_entry(&text, MAX_ENTRY_CHARS)
            .into_iter()
            .map(|text| EventLogEntry {
                kind,
                event_id: record.source_id(),
                text,
            })
            .collect()
    }

    fn write_one(&self, entries: Self::Payload) -> Result<()> {
        let backend = self.backend()?;
        for entry in &entries {
            backend.report(entry)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        match self.backend.read().clone() {
            Some(backend) => backend.close(),
            None => Ok(()),
        }
    }
}
