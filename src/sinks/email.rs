//! Email sink
//!
//! One mail per event. Sending goes through a [`MailTransport`]; the default
//! is a plain SMTP client ([`SmtpTransport`]). A failed send is reported for
//! that event only and the sink stays usable.

use crate::core::config::SinkConfig;
use crate::core::error::{LogError, Result};
use crate::core::event_record::EventRecord;
use crate::core::format::{CompiledFormat, FormatCompiler, FormatFlavor};
use crate::core::host::HostInfo;
use crate::core::sink::Sink;
use parking_lot::RwLock;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 25;
pub const DEFAULT_SUBJECT: &str = "\"{0}: {1}\", SeverityString, SourceName";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A rendered mail ready for a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl MailMessage {
    /// Every envelope recipient
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to.iter().chain(self.cc.iter()).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub user_name: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

/// Delivers rendered mails
pub trait MailTransport: Send + Sync {
    fn send(&self, settings: &SmtpSettings, message: &MailMessage) -> Result<()>;
}

/// Minimal SMTP client: EHLO, optional AUTH LOGIN, MAIL/RCPT/DATA, QUIT.
///
/// No TLS. A new connection is opened per mail.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmtpTransport;

struct SmtpSession {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl SmtpSession {
    fn connect(settings: &SmtpSettings) -> Result<Self> {
        let address = format!("{}:{}", settings.server, settings.port);
        let target = address
            .to_socket_addrs()
            .map_err(|e| LogError::io_operation("resolving SMTP server", address.clone(), e))?
            .next()
            .ok_or_else(|| LogError::mail(format!("no address for {}", address)))?;
        let stream = TcpStream::connect_timeout(&target, settings.timeout)
            .map_err(|e| LogError::io_operation("connecting to SMTP server", address.clone(), e))?;
        stream.set_read_timeout(Some(settings.timeout))?;
        stream.set_write_timeout(Some(settings.timeout))?;
        let writer = stream.try_clone()?;
        let mut session = Self {
            reader: BufReader::new(stream),
            writer,
        };
        session.expect(220)?;
        Ok(session)
    }

    /// Read a possibly multi-line reply and check its code
    fn expect(&mut self, code: u16) -> Result<String> {
        let mut text = String::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(LogError::mail("connection closed by server"));
            }
            let line = line.trim_end();
            let got: u16 = line
                .get(..3)
                .and_then(|code| code.parse().ok())
                .ok_or_else(|| LogError::mail(format!("malformed reply '{}'", line)))?;
            text.push_str(line.get(4..).unwrap_or(""));
            text.push('\n');
            if line.as_bytes().get(3) != Some(&b'-') {
                if got != code {
                    return Err(LogError::mail(format!(
                        "expected {} but server replied '{}'",
                        code, line
                    )));
                }
                return Ok(text);
            }
        }
    }

    fn command(&mut self, line: &str, code: u16) -> Result<String> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()?;
        self.expect(code)
    }
}

impl MailTransport for SmtpTransport {
    fn send(&self, settings: &SmtpSettings, message: &MailMessage) -> Result<()> {
        let mut session = SmtpSession::connect(settings)?;
        let helo = crate::core::host::process_name();
        session.command(&format!("EHLO {}", helo), 250)?;

        if let (Some(user), Some(password)) = (&settings.user_name, &settings.password) {
            session.command("AUTH LOGIN", 334)?;
            session.command(&base64(user.as_bytes()), 334)?;
            session.command(&base64(password.as_bytes()), 235)?;
        }

        session.command(&format!("MAIL FROM:<{}>", message.from), 250)?;
        for recipient in message.recipients() {
            session.command(&format!("RCPT TO:<{}>", recipient), 250)?;
        }
        session.command("DATA", 354)?;
        session.writer.write_all(render_data(message).as_bytes())?;
        session.command(".", 250)?;
        // Mail is accepted at this point
        let _ = session.command("QUIT", 221);
        Ok(())
    }
}

/// Headers and dot-stuffed body, CRLF line endings, without the final "."
fn render_data(message: &MailMessage) -> String {
    let mut data = String::with_capacity(message.body.len() + 256);
    data.push_str(&format!("From: {}\r\n", message.from));
    data.push_str(&format!("To: {}\r\n", message.to.join(", ")));
    if !message.cc.is_empty() {
        data.push_str(&format!("Cc: {}\r\n", message.cc.join(", ")));
    }
    let subject = message.subject.replace(['\r', '\n'], " ");
    data.push_str(&format!("Subject: {}\r\n", subject));
    data.push_str(&format!("Date: {}\r\n", chrono::Local::now().to_rfc2822()));
    data.push_str("MIME-Version: 1.0\r\n");
    data.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
    for line in message.body.lines() {
        if line.starts_with('.') {
            data.push('.');
        }
        data.push_str(line);
        data.push_str("\r\n");
    }
    data
}

fn base64(input: &[u8]) -> String {
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(input.len().div_ceil(3) * 4);
    for chunk in input.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let n = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
        out.push(TABLE[(n >> 18) as usize & 63] as char);
        out.push(TABLE[(n >> 12) as usize & 63] as char);
        out.push(if chunk.len() > 1 {
            TABLE[(n >> 6) as usize & 63] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            TABLE[n as usize & 63] as char
        } else {
            '='
        });
    }
    out
}

struct Envelope {
    settings: SmtpSettings,
    from: String,
    to: Vec<String>,
    cc: Vec<String>,
    subject: CompiledFormat,
}

/// Email sink (`Type=email`).
///
/// Keys: `SmtpServer` (required), `Port`, `From` (required), `To`
/// (required, `,` or `;` separated), `Cc`, `Subject` (a template),
/// `UserName`, `Password`, `Timeout` (seconds).
pub struct EmailSink {
    transport: Arc<dyn MailTransport>,
    envelope: RwLock<Option<Envelope>>,
}

impl EmailSink {
    pub fn new() -> Self {
        Self::with_transport(Arc::new(SmtpTransport))
    }

    pub fn with_transport(transport: Arc<dyn MailTransport>) -> Self {
        Self {
            transport,
            envelope: RwLock::new(None),
        }
    }

    fn default_body(record: &EventRecord) -> String {
        let mut body = format!(
            "{}\nSource: {}\nSeverity: {}\nProcess: {} ({})\nThread: {}\n\n{}",
            record.local_date_time().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.source_name(),
            record.severity_string(),
            record.process_name(),
            record.process_id(),
            record.thread_name().unwrap_or(record.thread_id()),
            record.user_message()
        );
        let detail = record.exception_or_call_stack();
        if !detail.is_empty() {
            body.push_str("\n\n");
            body.push_str(&detail);
        }
        body
    }
}

impl Default for EmailSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for EmailSink {
    type Payload = MailMessage;

    fn initialize(&self, config: &SinkConfig, _host: &HostInfo) -> Result<()> {
        let component = config.name();
        let port = config.get_u64("Port", u64::from(DEFAULT_PORT))?;
        let port = u16::try_from(port)
            .map_err(|_| LogError::config(component, format!("Port {} out of range", port)))?;
        let to = config.get_list("To");
        if to.is_empty() {
            return Err(LogError::config(component, "'To' lists no recipients"));
        }
        let subject = FormatCompiler::compile(
            Some(config.get("Subject").unwrap_or(DEFAULT_SUBJECT)),
            FormatFlavor::Plain,
        )
        .or_else(|| FormatCompiler::compile(Some(DEFAULT_SUBJECT), FormatFlavor::Plain))
        .ok_or_else(|| LogError::config(component, "invalid Subject"))?;

        let envelope = Envelope {
            settings: SmtpSettings {
                server: config.require("SmtpServer")?.to_string(),
                port,
                user_name: config.get("UserName").map(String::from),
                password: config.get("Password").map(String::from),
                timeout: config.get_duration_secs("Timeout", DEFAULT_TIMEOUT)?,
            },
            from: config.require("From")?.to_string(),
            to,
            cc: config.get_list("Cc"),
            subject,
        };
        *self.envelope.write() = Some(envelope);
        Ok(())
    }

    fn format(&self, record: &Arc<EventRecord>, compiled: Option<&CompiledFormat>) -> MailMessage {
        let body = match compiled {
            Some(format) => format.render(record),
            None => Self::default_body(record),
        };
        let envelope = self.envelope.read();
        match envelope.as_ref() {
            Some(env) => MailMessage {
                from: env.from.clone(),
                to: env.to.clone(),
                cc: env.cc.clone(),
                subject: record.with_hints(true, "", |r| env.subject.render(r)),
                body,
            },
            None => MailMessage {
                from: String::new(),
                to: Vec::new(),
                cc: Vec::new(),
                subject: String::new(),
                body,
            },
        }
    }

    fn write_one(&self, message: MailMessage) -> Result<()> {
        let settings = self
            .envelope
            .read()
            .as_ref()
            .map(|env| env.settings.clone())
            .ok_or_else(|| LogError::mail("email sink not initialized"))?;
        self.transport.send(&settings, &message)
    }

    fn close(&self) -> Result<()> {
        self.envelope.write().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::severity::Severity;
    use parking_lot::Mutex;
    use std::net::TcpListener;
    use std::thread;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<MailMessage>>,
        fail_next: Mutex<bool>,
    }

    impl MailTransport for Outbox {
        fn send(&self, _settings: &SmtpSettings, message: &MailMessage) -> Result<()> {
            let mut fail = self.fail_next.lock();
            if *fail {
                *fail = false;
                return Err(LogError::mail("relay refused"));
            }
            self.sent.lock().push(message.clone());
            Ok(())
        }
    }

    fn config() -> SinkConfig {
        SinkConfig::new("mail")
            .with("SmtpServer", "localhost")
            .with("From", "app@example.com")
            .with("To", "ops@example.com; dev@example.com")
    }

    #[test]
    fn test_base64() {
        assert_eq!(base64(b""), "");
        assert_eq!(base64(b"f"), "Zg==");
        assert_eq!(base64(b"fo"), "Zm8=");
        assert_eq!(base64(b"foo"), "Zm9v");
        assert_eq!(base64(b"user@example.com"), "dXNlckBleGFtcGxlLmNvbQ==");
    }

    #[test]
    fn test_dot_stuffing() {
        let message = MailMessage {
            from: "a@x".into(),
            to: vec!["b@x".into()],
            cc: vec![],
            subject: "s".into(),
            body: "first\n.hidden\nlast".into(),
        };
        let data = render_data(&message);
        assert!(data.contains("\r\n\r\nfirst\r\n..hidden\r\nlast\r\n"));
        assert!(!data.contains("Cc:"));
    }

    #[test]
    fn test_missing_keys_are_config_errors() {
        let sink = EmailSink::with_transport(Arc::new(Outbox::default()));
        let host = HostInfo::default();
        let err = sink
            .initialize(&SinkConfig::new("mail").with("From", "a@x").with("To", "b@x"), &host)
            .unwrap_err();
        assert!(err.is_configuration());
        let err = sink
            .initialize(&config().with("To", ""), &host)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_one_message_per_event_and_failure_is_per_item() {
        let outbox = Arc::new(Outbox::default());
        let sink = EmailSink::with_transport(outbox.clone());
        sink.initialize(&config(), &HostInfo::default()).unwrap();

        let record = Arc::new(EventRecord::new(Severity::Error, "APP", 3, Some("disk full".into())));
        *outbox.fail_next.lock() = true;
        assert!(sink.write_one(sink.format(&record, None)).is_err());
        sink.write_one(sink.format(&record, None)).unwrap();

        let sent = outbox.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Error: APP");
        assert_eq!(sent[0].to, ["ops@example.com", "dev@example.com"]);
        assert!(sent[0].body.contains("disk full"));
        assert!(!sink.write_failure_is_fatal());
    }

    #[test]
    fn test_smtp_conversation() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut transcript = Vec::new();
            writer.write_all(b"220 test ready\r\n").unwrap();
            let mut in_data = false;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                transcript.push(line.clone());
                if in_data {
                    if line == "." {
                        in_data = false;
                        writer.write_all(b"250 queued\r\n").unwrap();
                    }
                    continue;
                }
                let reply: &[u8] = if line.starts_with("EHLO") {
                    b"250-test\r\n250 AUTH LOGIN\r\n"
                } else if line == "DATA" {
                    in_data = true;
                    b"354 go ahead\r\n"
                } else if line == "QUIT" {
                    writer.write_all(b"221 bye\r\n").unwrap();
                    break;
                } else {
                    b"250 ok\r\n"
                };
                writer.write_all(reply).unwrap();
            }
            transcript
        });

        let settings = SmtpSettings {
            server: "127.0.0.1".into(),
            port,
            user_name: None,
            password: None,
            timeout: Duration::from_secs(5),
        };
        let message = MailMessage {
            from: "app@example.com".into(),
            to: vec!["ops@example.com".into()],
            cc: vec!["dev@example.com".into()],
            subject: "Error: APP".into(),
            body: "hello".into(),
        };
        SmtpTransport.send(&settings, &message).unwrap();

        let transcript = server.join().unwrap();
        assert!(transcript.iter().any(|l| l == "MAIL FROM:<app@example.com>"));
        assert!(transcript.iter().any(|l| l == "RCPT TO:<ops@example.com>"));
        assert!(transcript.iter().any(|l| l == "RCPT TO:<dev@example.com>"));
        assert!(transcript.iter().any(|l| l == "Subject: Error: APP"));
        assert!(transcript.iter().any(|l| l == "hello"));
        assert_eq!(transcript.last().map(String::as_str), Some("QUIT"));
    }
}
