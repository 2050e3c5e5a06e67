//! Template compilation
//!
//! A template is a quoted skeleton in positional format syntax followed by a
//! comma-separated list of placeholder names:
//!
//! ```text
//! "{0:%H:%M:%S} [{1,-11}] {2}", LocalDateTime, Severity, UserMessage
//! ```
//!
//! Compilation resolves each name against a fixed table of [`EventRecord`]
//! accessors once. Unknown names and out-of-range slots render as empty text
//! and are reported on the internal-error channel; compilation never fails.

use super::event_record::EventRecord;
use super::internal;
use chrono::{DateTime, Local, TimeZone, Utc};
use std::fmt::Write as _;

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Widest `{n,align}` padding accepted in a skeleton
pub const MAX_ALIGN: usize = 1024;

/// Value produced by an accessor before slot formatting
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Text(String),
    Int(i64),
    Local(DateTime<Local>),
    Utc(DateTime<Utc>),
    Empty,
}

impl Rendered {
    /// Render with an optional slot format (`strftime` for dates, `x`/`X` for integers)
    pub fn format(&self, spec: Option<&str>) -> String {
        match self {
            Rendered::Text(s) => s.clone(),
            Rendered::Int(i) => match spec {
                Some("x") => format!("{:x}", i),
                Some("X") => format!("{:X}", i),
                _ => i.to_string(),
            },
            Rendered::Local(dt) => format_date(dt, spec),
            Rendered::Utc(dt) => format_date(dt, spec),
            Rendered::Empty => String::new(),
        }
    }
}

// An invalid strftime pattern falls back to the default instead of panicking
fn format_date<Tz: TimeZone>(dt: &DateTime<Tz>, spec: Option<&str>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::new();
    if write!(out, "{}", dt.format(spec.unwrap_or(DEFAULT_DATE_FORMAT))).is_err() {
        out.clear();
        let _ = write!(out, "{}", dt.format(DEFAULT_DATE_FORMAT));
    }
    out
}

impl std::fmt::Display for Rendered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format(None))
    }
}

/// Accessor from a record to one placeholder value
pub type Accessor = fn(&EventRecord) -> Rendered;

/// Output shape a sink wants from its compiled format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatFlavor {
    #[default]
    Plain,
    /// Free-text fields are CSV-escaped
    Csv,
}

fn text(value: impl Into<String>) -> Rendered {
    Rendered::Text(value.into())
}

// (name, accessor, may contain delimiter-significant characters)
const ACCESSORS: &[(&str, Accessor, bool)] = &[
    ("UserMessage", |r| text(r.user_message()), true),
    ("Exception", |r| text(r.exception().unwrap_or_default()), true),
    (
        "ExceptionMessage",
        |r| text(r.exception_message().unwrap_or_default()),
        true,
    ),
    (
        "ExceptionOrCallStack",
        |r| text(r.exception_or_call_stack()),
        true,
    ),
    ("CallStack", |r| text(r.call_stack()), true),
    ("Severity", |r| text(r.severity().to_str()), false),
    ("SeverityString", |r| text(r.severity_string()), false),
    ("SourceId", |r| Rendered::Int(i64::from(r.source_id())), false),
    ("SourceName", |r| text(r.source_name()), false),
    ("LocalDateTime", |r| Rendered::Local(r.local_date_time()), false),
    ("DateTime", |r| Rendered::Utc(r.date_time()), false),
    ("DomainName", |r| text(r.domain_name()), false),
    ("EntryAssemblyName", |r| text(r.entry_name()), false),
    (
        "ActivityId",
        |r| r.activity_id().map_or(Rendered::Empty, |id| text(id.to_string())),
        false,
    ),
    (
        "LogicalOperationStack",
        |r| text(r.logical_operation_stack().join(", ")),
        true,
    ),
    ("ProcessId", |r| Rendered::Int(i64::from(r.process_id())), false),
    ("ProcessName", |r| text(r.process_name()), false),
    ("ThreadId", |r| text(r.thread_id()), false),
    (
        "ThreadName",
        |r| r.thread_name().map_or(Rendered::Empty, text),
        true,
    ),
    ("Timestamp", |r| Rendered::Int(r.timestamp()), false),
    (
        "UserData",
        |r| r.user_data().map_or(Rendered::Empty, |d| text(d.to_json())),
        true,
    ),
    ("Version", |r| text(r.version()), false),
];

/// Look up the accessor for a placeholder name, ignoring case
pub fn resolve_accessor(name: &str) -> Option<Accessor> {
    lookup(name).map(|(_, accessor, _)| accessor)
}

/// All placeholder names understood by templates
pub fn placeholder_names() -> impl Iterator<Item = &'static str> {
    ACCESSORS.iter().map(|(name, _, _)| *name)
}

fn lookup(name: &str) -> Option<(&'static str, Accessor, bool)> {
    ACCESSORS
        .iter()
        .find(|(n, _, _)| n.eq_ignore_ascii_case(name))
        .copied()
}

/// Quote a field for CSV output.
///
/// Embedded quotes are doubled and the field is wrapped in quotes when it
/// contains a comma, quote or line break. Carriage returns not followed by a
/// line feed are dropped.
///
/// ```
/// use sourcelog::core::format::csv_escape;
///
/// assert_eq!(csv_escape("plain"), "plain");
/// assert_eq!(csv_escape("a,\"b\""), "\"a,\"\"b\"\"\"");
/// ```
pub fn csv_escape(value: &str) -> String {
    let cleaned = strip_bare_cr(value);
    if cleaned.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cleaned.replace('"', "\"\""))
    } else {
        cleaned
    }
}

/// Always-quoted CSV field
pub fn csv_quote(value: &str) -> String {
    format!("\"{}\"", strip_bare_cr(value).replace('"', "\"\""))
}

fn strip_bare_cr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' && chars.peek() != Some(&'\n') {
            continue;
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Slot {
        index: usize,
        align: Option<isize>,
        spec: Option<String>,
    },
}

#[derive(Clone)]
struct Field {
    name: String,
    accessor: Option<Accessor>,
    csv: bool,
}

/// A template resolved against the accessor table.
///
/// Immutable after compilation and shared by every event routed through a
/// sink instance.
#[derive(Clone)]
pub struct CompiledFormat {
    template: String,
    segments: Vec<Segment>,
    fields: Vec<Field>,
    diagnostics: Vec<String>,
}

impl std::fmt::Debug for CompiledFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFormat")
            .field("template", &self.template)
            .field("fields", &self.field_names().collect::<Vec<_>>())
            .finish()
    }
}

impl CompiledFormat {
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Problems found while compiling (unknown names, bad slots)
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn render(&self, record: &EventRecord) -> String {
        let mut out = String::with_capacity(128);
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Slot { index, align, spec } => {
                    let value = self.render_field(*index, spec.as_deref(), record);
                    match align {
                        Some(w) if *w < 0 => {
                            let _ = write!(out, "{:<width$}", value, width = w.unsigned_abs());
                        }
                        Some(w) => {
                            let _ = write!(out, "{:>width$}", value, width = *w as usize);
                        }
                        None => out.push_str(&value),
                    }
                }
            }
        }
        out
    }

    fn render_field(&self, index: usize, spec: Option<&str>, record: &EventRecord) -> String {
        let Some(field) = self.fields.get(index) else {
            return String::new();
        };
        let Some(accessor) = field.accessor else {
            return String::new();
        };
        let value = accessor(record).format(spec);
        if field.csv {
            csv_escape(&value)
        } else {
            value
        }
    }
}

/// Builds [`CompiledFormat`]s from template strings.
pub struct FormatCompiler;

impl FormatCompiler {
    /// Compile `template` for a sink of the given flavor.
    ///
    /// Returns `None` when no template is configured, meaning the sink
    /// should use its own default format.
    pub fn compile(template: Option<&str>, flavor: FormatFlavor) -> Option<CompiledFormat> {
        let template = template.map(str::trim).filter(|t| !t.is_empty())?;
        let mut diagnostics = Vec::new();

        let (skeleton, names) = split_template(template, &mut diagnostics);
        let segments = parse_skeleton(&skeleton, &mut diagnostics);

        let fields: Vec<Field> = names
            .into_iter()
            .map(|name| match lookup(&name) {
                Some((canonical, accessor, sensitive)) => Field {
                    name: canonical.to_string(),
                    accessor: Some(accessor),
                    csv: sensitive && flavor == FormatFlavor::Csv,
                },
                None => {
                    diagnostics.push(format!("unknown placeholder '{}'", name));
                    Field {
                        name,
                        accessor: None,
                        csv: false,
                    }
                }
            })
            .collect();

        for segment in &segments {
            if let Segment::Slot { index, .. } = segment {
                if *index >= fields.len() {
                    diagnostics.push(format!(
                        "slot {{{}}} has no placeholder ({} given)",
                        index,
                        fields.len()
                    ));
                }
            }
        }

        for problem in &diagnostics {
            internal::warn("format", format!("{} in template {}", problem, template));
        }

        Some(CompiledFormat {
            template: template.to_string(),
            segments,
            fields,
            diagnostics,
        })
    }
}

/// Split into the unescaped skeleton and the placeholder name list
fn split_template(template: &str, diagnostics: &mut Vec<String>) -> (String, Vec<String>) {
    let Some(body) = template.strip_prefix('"') else {
        return (template.to_string(), Vec::new());
    };

    let mut skeleton = String::with_capacity(body.len());
    let mut chars = body.char_indices();
    let mut rest = None;
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                rest = Some(&body[i + 1..]);
                break;
            }
            '\\' => match chars.next() {
                Some((_, '"')) => skeleton.push('"'),
                Some((_, 'r')) => skeleton.push('\r'),
                Some((_, 'n')) => skeleton.push('\n'),
                Some((_, 't')) => skeleton.push('\t'),
                Some((_, '\\')) => skeleton.push('\\'),
                Some((_, other)) => {
                    skeleton.push('\\');
                    skeleton.push(other);
                }
                None => skeleton.push('\\'),
            },
            _ => skeleton.push(c),
        }
    }

    let Some(rest) = rest else {
        diagnostics.push("unterminated skeleton quote".to_string());
        return (skeleton, Vec::new());
    };

    let names = rest
        .trim()
        .trim_start_matches(',')
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
        .collect();
    (skeleton, names)
}

fn parse_skeleton(skeleton: &str, diagnostics: &mut Vec<String>) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = skeleton;

    while let Some(pos) = rest.find(['{', '}']) {
        literal.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") {
            literal.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            literal.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            literal.push('}');
            rest = &tail[1..];
        } else {
            let Some(end) = tail.find('}') else {
                diagnostics.push("unterminated '{' in skeleton".to_string());
                literal.push_str(tail);
                rest = "";
                break;
            };
            match parse_slot(&tail[1..end]) {
                Some(slot) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(slot);
                }
                None => {
                    diagnostics.push(format!("invalid slot '{}'", &tail[..=end]));
                    literal.push_str(&tail[..=end]);
                }
            }
            rest = &tail[end + 1..];
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

fn parse_slot(body: &str) -> Option<Segment> {
    let (head, spec) = match body.split_once(':') {
        Some((head, spec)) => (head, Some(spec.to_string())),
        None => (body, None),
    };
    let (index, align) = match head.split_once(',') {
        Some((index, align)) => {
            let align = align.trim().parse::<isize>().ok()?;
            if align.unsigned_abs() > MAX_ALIGN {
                return None;
            }
            (index, Some(align))
        }
        None => (head, None),
    };
    Some(Segment::Slot {
        index: index.trim().parse().ok()?,
        align,
        spec,
    })
}
