//! Console sink

use crate::core::config::SinkConfig;
use crate::core::error::Result;
use crate::core::event_record::EventRecord;
use crate::core::format::CompiledFormat;
use crate::core::host::HostInfo;
use crate::core::severity::Severity;
use crate::core::sink::Sink;
use colored::Colorize;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub to_stderr: bool,
    pub text: String,
}

/// Writes events to stdout, or stderr for Error and Critical (`Type=console`).
///
/// `Colors` (default true) tints the severity tag. Also used as the fallback
/// when a source's configured sinks cannot be built.
pub struct ConsoleSink {
    use_colors: AtomicBool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            use_colors: AtomicBool::new(true),
        }
    }

    pub fn with_colors(use_colors: bool) -> Self {
        Self {
            use_colors: AtomicBool::new(use_colors),
        }
    }

    fn format_text(&self, record: &EventRecord) -> String {
        let tag = format!("{:11}", record.severity_string());
        let tag = if self.use_colors.load(Ordering::Relaxed) {
            tag.color(record.severity().color_code()).to_string()
        } else {
            tag
        };
        let mut line = format!(
            "[{}] [{}] {} - {}",
            record.local_date_time().format("%Y-%m-%d %H:%M:%S%.3f"),
            tag,
            record.source_name(),
            record.with_hints(false, "    ", |r| r.user_message())
        );
        if let Some(data) = record.user_data().filter(|d| !d.is_empty()) {
            line.push(' ');
            line.push_str(&data.format_fields());
        }
        if let Some(exception) = record.exception() {
            line.push_str("\n    ");
            line.push_str(&exception.replace('\n', "\n    "));
        }
        line
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for ConsoleSink {
    type Payload = ConsoleLine;

    fn initialize(&self, config: &SinkConfig, _host: &HostInfo) -> Result<()> {
        let colors = config.get_bool("Colors", self.use_colors.load(Ordering::Relaxed))?;
        self.use_colors.store(colors, Ordering::Relaxed);
        Ok(())
    }

    fn format(&self, record: &Arc<EventRecord>, compiled: Option<&CompiledFormat>) -> ConsoleLine {
        let text = match compiled {
            Some(format) => format.render(record),
            None => self.format_text(record),
        };
        ConsoleLine {
            // Route Error and Critical to stderr
            to_stderr: record.severity() >= Severity::Error && record.activity().is_none(),
            text,
        }
    }

    fn write_one(&self, line: ConsoleLine) -> Result<()> {
        if line.to_stderr {
            writeln!(std::io::stderr().lock(), "{}", line.text)?;
        } else {
            writeln!(std::io::stdout().lock(), "{}", line.text)?;
        }
        Ok(())
    }

    fn end_batch(&self) -> Result<()> {
        std::io::stdout().flush()?;
        std::io::stderr().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_record::ErrorInfo;
    use crate::core::user_data::UserData;

    #[test]
    fn test_plain_line() {
        let sink = ConsoleSink::with_colors(false);
        let record = Arc::new(
            EventRecord::new(Severity::Warning, "APP", 3, Some("low disk".into()))
                .with_user_data(UserData::new().with_field("free_mb", 12i64)),
        );
        let line = sink.format(&record, None);
        assert!(!line.to_stderr);
        assert!(line.text.contains("[Warning    ] APP - low disk"));
        assert!(line.text.ends_with("free_mb=12"));
    }

    #[test]
    fn test_errors_go_to_stderr() {
        let sink = ConsoleSink::with_colors(false);
        let record = Arc::new(
            EventRecord::new(Severity::Critical, "APP", 3, Some("boom".into()))
                .with_error(ErrorInfo::new("out of memory")),
        );
        let line = sink.format(&record, None);
        assert!(line.to_stderr);
        assert!(line.text.ends_with("\n    out of memory"));
    }

    #[test]
    fn test_colors_key() {
        let sink = ConsoleSink::new();
        sink.initialize(&SinkConfig::new("c").with("Colors", "false"), &HostInfo::default())
            .unwrap();
        assert!(!sink.use_colors.load(Ordering::Relaxed));
    }
}
