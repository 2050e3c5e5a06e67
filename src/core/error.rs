//! Error types for the logging pipeline

pub type Result<T> = std::result::Result<T, LogError>;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// IO error with context
    #[error("IO error while {operation}: {message}")]
    IoOperation {
        operation: String,
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or missing configuration for a sink or source
    #[error("Invalid configuration for {component}: {message}")]
    InvalidConfiguration { component: String, message: String },

    /// File sink error with path
    #[error("File sink error for '{path}': {message}")]
    FileSink { path: String, message: String },

    /// File rotation error
    #[error("File rotation failed for '{path}': {message}")]
    Rotation { path: String, message: String },

    /// Cross-process lock error
    #[error("Failed to acquire cross-process lock for '{path}'")]
    Lock { path: String },

    /// Template compilation problem
    #[error("Format error: {message}")]
    Format { message: String },

    /// Mail transport failure
    #[error("Mail error: {0}")]
    Mail(String),

    /// Database execution or connection failure
    #[error("Database error: {0}")]
    Database(String),

    /// System event log failure
    #[error("Event log error: {0}")]
    EventLog(String),

    /// Bounded queue refused an item
    #[error("Sink queue full: {current}/{max} items buffered")]
    QueueFull { current: usize, max: usize },

    /// Write attempted on a writer that has been closed
    #[error("Writer already closed")]
    WriterClosed,

    /// Sink permanently disabled after a fatal error
    #[error("Sink '{sink}' is permanently disabled")]
    SinkDisabled { sink: String },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl LogError {
    /// Create an IO operation error with context
    pub fn io_operation(
        operation: impl Into<String>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        LogError::IoOperation {
            operation: operation.into(),
            message: message.into(),
            source,
        }
    }

    /// Create an invalid configuration error
    pub fn config(component: impl Into<String>, message: impl Into<String>) -> Self {
        LogError::InvalidConfiguration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a file sink error
    pub fn file_sink(path: impl Into<String>, message: impl Into<String>) -> Self {
        LogError::FileSink {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a file rotation error
    pub fn rotation(path: impl Into<String>, message: impl Into<String>) -> Self {
        LogError::Rotation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn lock(path: impl Into<String>) -> Self {
        LogError::Lock { path: path.into() }
    }

    pub fn format<S: Into<String>>(message: S) -> Self {
        LogError::Format {
            message: message.into(),
        }
    }

    pub fn queue_full(current: usize, max: usize) -> Self {
        LogError::QueueFull { current, max }
    }

    pub fn mail<S: Into<String>>(msg: S) -> Self {
        LogError::Mail(msg.into())
    }

    pub fn database<S: Into<String>>(msg: S) -> Self {
        LogError::Database(msg.into())
    }

    pub fn event_log<S: Into<String>>(msg: S) -> Self {
        LogError::EventLog(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        LogError::Other(msg.into())
    }

    /// Whether this error came from configuration rather than a write
    pub fn is_configuration(&self) -> bool {
        matches!(self, LogError::InvalidConfiguration { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = LogError::queue_full(100, 1000);
        assert!(matches!(err, LogError::QueueFull { .. }));

        let err = LogError::config("RotatingFileSink", "missing FileName");
        assert!(err.is_configuration());

        let err = LogError::file_sink("/var/log/app.csv", "Permission denied");
        assert!(matches!(err, LogError::FileSink { .. }));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_error_display() {
        let err = LogError::queue_full(100, 1000);
        assert_eq!(err.to_string(), "Sink queue full: 100/1000 items buffered");

        let err = LogError::rotation("/var/log/app.csv", "Disk full");
        assert_eq!(
            err.to_string(),
            "File rotation failed for '/var/log/app.csv': Disk full"
        );

        let err = LogError::config("EmailSink", "SmtpServer is required");
        assert_eq!(
            err.to_string(),
            "Invalid configuration for EmailSink: SmtpServer is required"
        );
    }

    #[test]
    fn test_io_operation_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = LogError::io_operation("renaming log file", "cannot rename", io_err);

        assert!(matches!(err, LogError::IoOperation { .. }));
        assert!(err.to_string().contains("renaming log file"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
