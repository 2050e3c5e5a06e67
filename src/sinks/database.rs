//! Database sink
//!
//! Drivers are supplied by the host through [`DbConnector`]. The sink binds
//! `@Name` parameters to record fields, keeps one connection open across
//! writes and reconnects lazily. The first failed execution disables the
//! sink for good.

use crate::core::config::SinkConfig;
use crate::core::error::{LogError, Result};
use crate::core::event_record::EventRecord;
use crate::core::format::{resolve_accessor, Accessor, CompiledFormat, Rendered};
use crate::core::host::HostInfo;
use crate::core::sink::Sink;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// How the command text is interpreted by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    #[default]
    Text,
    StoredProcedure,
}

impl std::str::FromStr for CommandKind {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("text") {
            Ok(CommandKind::Text)
        } else if s.eq_ignore_ascii_case("storedprocedure") {
            Ok(CommandKind::StoredProcedure)
        } else {
            Err(LogError::database(format!("unknown command type '{}'", s)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbCommand {
    pub kind: CommandKind,
    pub text: String,
    /// Parameter names without the `@` prefix, in binding order
    pub parameters: Vec<String>,
}

/// One bound parameter value
#[derive(Debug, Clone, PartialEq)]
pub struct DbParam {
    pub name: String,
    pub value: Rendered,
}

/// Opens connections for a connection string
pub trait DbConnector: Send + Sync {
    fn connect(&self, connection_string: &str) -> Result<Box<dyn DbConnection>>;
}

pub trait DbConnection: Send {
    fn is_open(&self) -> bool;

    /// Run `command` with `params`, returning the affected row count
    fn execute(&mut self, command: &DbCommand, params: &[DbParam]) -> Result<u64>;

    fn close(&mut self) {}
}

/// `@Name` tokens outside of single-quoted literals, first occurrence order
pub fn parameter_names(sql: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut chars = sql.chars().peekable();
    let mut quoted = false;
    while let Some(c) = chars.next() {
        match c {
            '\'' => quoted = !quoted,
            '@' if !quoted => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if !name.is_empty() && !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                    names.push(name);
                }
            }
            _ => {}
        }
    }
    names
}

struct Binding {
    command: DbCommand,
    connection_string: String,
    accessors: Vec<Accessor>,
}

/// Database sink (`Type=database`).
///
/// Keys: `ConnectionString` (required), `Command` (required),
/// `CommandType` (`Text` or `StoredProcedure`), `Parameters` (procedure
/// parameter names; text commands take theirs from the `@Name` tokens).
pub struct DatabaseSink {
    connector: Arc<dyn DbConnector>,
    binding: RwLock<Option<Binding>>,
    connection: Mutex<Option<Box<dyn DbConnection>>>,
}

impl DatabaseSink {
    pub fn new(connector: Arc<dyn DbConnector>) -> Self {
        Self {
            connector,
            binding: RwLock::new(None),
            connection: Mutex::new(None),
        }
    }
}

impl Sink for DatabaseSink {
    type Payload = Vec<DbParam>;

    fn initialize(&self, config: &SinkConfig, _host: &HostInfo) -> Result<()> {
        let component = config.name();
        let connection_string = config.require("ConnectionString")?.to_string();
        let text = config.require("Command")?.to_string();
        let kind: CommandKind = config
            .get("CommandType")
            .map(str::parse::<CommandKind>)
            .transpose()
            .map_err(|e| LogError::config(component, e.to_string()))?
            .unwrap_or_default();

        let parameters: Vec<String> = match kind {
            CommandKind::Text => parameter_names(&text),
            CommandKind::StoredProcedure => config
                .get_list("Parameters")
                .into_iter()
                .map(|p| p.trim_start_matches('@').to_string())
                .collect(),
        };
        let accessors = parameters
            .iter()
            .map(|name| {
                resolve_accessor(name).ok_or_else(|| {
                    LogError::config(component, format!("parameter '@{}' matches no record field", name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        *self.binding.write() = Some(Binding {
            command: DbCommand {
                kind,
                text,
                parameters,
            },
            connection_string,
            accessors,
        });
        Ok(())
    }

    // A configured Format has no meaning here; values bind per parameter.
    fn format(&self, record: &Arc<EventRecord>, _compiled: Option<&CompiledFormat>) -> Vec<DbParam> {
        let binding = self.binding.read();
        let Some(binding) = binding.as_ref() else {
            return Vec::new();
        };
        binding
            .command
            .parameters
            .iter()
            .zip(&binding.accessors)
            .map(|(name, accessor)| DbParam {
                name: name.clone(),
                value: accessor(record),
            })
            .collect()
    }

    fn write_one(&self, params: Vec<DbParam>) -> Result<()> {
        let binding = self.binding.read();
        let binding = binding
            .as_ref()
            .ok_or_else(|| LogError::database("database sink not initialized"))?;

        let mut connection = self.connection.lock();
        if !connection.as_ref().is_some_and(|c| c.is_open()) {
            *connection = Some(self.connector.connect(&binding.connection_string)?);
        }
        let conn = connection
            .as_mut()
            .ok_or_else(|| LogError::database("no connection"))?;
        conn.execute(&binding.command, &params)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if let Some(mut connection) = self.connection.lock().take() {
            connection.close();
        }
        Ok(())
    }

    fn write_failure_is_fatal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::severity::Severity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        connects: AtomicUsize,
        rows: Arc<Mutex<Vec<Vec<DbParam>>>>,
    }

    struct Conn {
        open: bool,
        rows: Arc<Mutex<Vec<Vec<DbParam>>>>,
    }

    impl DbConnection for Conn {
        fn is_open(&self) -> bool {
            self.open
        }
        fn execute(&mut self, _command: &DbCommand, params: &[DbParam]) -> Result<u64> {
            self.rows.lock().push(params.to_vec());
            // Simulate the server dropping the connection after each call
            self.open = false;
            Ok(1)
        }
    }

    impl DbConnector for Recorder {
        fn connect(&self, _connection_string: &str) -> Result<Box<dyn DbConnection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Conn {
                open: true,
                rows: Arc::clone(&self.rows),
            }))
        }
    }

    #[test]
    fn test_parameter_names() {
        assert_eq!(
            parameter_names("INSERT INTO log VALUES (@Severity, @sourcename, '@skip', @Severity)"),
            ["Severity", "sourcename"]
        );
        assert!(parameter_names("SELECT 1").is_empty());
    }

    #[test]
    fn test_unknown_parameter_is_config_error() {
        let sink = DatabaseSink::new(Arc::new(Recorder::default()));
        let config = SinkConfig::new("db")
            .with("ConnectionString", "mem")
            .with("Command", "INSERT INTO log VALUES (@Bogus)");
        let err = sink.initialize(&config, &HostInfo::default()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_invalid_command_type_is_config_error() {
        let sink = DatabaseSink::new(Arc::new(Recorder::default()));
        let config = SinkConfig::new("db")
            .with("ConnectionString", "mem")
            .with("Command", "log_event")
            .with("CommandType", "TableDirect");
        let err = sink.initialize(&config, &HostInfo::default()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_stored_procedure_binding_and_reconnect() {
        let connector = Arc::new(Recorder::default());
        let sink = DatabaseSink::new(connector.clone());
        let config = SinkConfig::new("db")
            .with("ConnectionString", "mem")
            .with("Command", "log_event")
            .with("CommandType", "StoredProcedure")
            .with("Parameters", "@SourceName, @UserMessage, @SourceId");
        sink.initialize(&config, &HostInfo::default()).unwrap();

        let record = Arc::new(EventRecord::new(Severity::Warning, "APP", 4, Some("low".into())));
        sink.write_one(sink.format(&record, None)).unwrap();
        sink.write_one(sink.format(&record, None)).unwrap();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        let rows = connector.rows.lock();
        assert_eq!(
            rows[0],
            [
                DbParam { name: "SourceName".into(), value: Rendered::Text("APP".into()) },
                DbParam { name: "UserMessage".into(), value: Rendered::Text("low".into()) },
                DbParam { name: "SourceId".into(), value: Rendered::Int(4) },
            ]
        );
        assert!(sink.write_failure_is_fatal());
    }
}
