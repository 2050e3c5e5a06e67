//! Property-based tests for sourcelog using proptest

use proptest::prelude::*;
use sourcelog::core::format::{csv_escape, csv_quote};
use sourcelog::prelude::*;
use sourcelog::sinks::rotating_file::RotatingFileSink;
use sourcelog::{FormatCompiler, FormatFlavor, Sink};
use std::sync::Arc;

/// Split one CSV record with quoted fields and doubled quotes
fn parse_csv_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;
    while let Some(c) = chars.next() {
        match (quoted, c) {
            (true, '"') if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            (true, '"') => quoted = false,
            (false, '"') if field.is_empty() => quoted = true,
            (false, ',') => fields.push(std::mem::take(&mut field)),
            (_, c) => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn strip_line_end(line: &str) -> &str {
    line.strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .unwrap_or(line)
}

fn record(message: &str) -> Arc<EventRecord> {
    Arc::new(EventRecord::new(
        Severity::Warning,
        "APP",
        3,
        Some(message.to_string()),
    ))
}

// ============================================================================
// CSV Tests
// ============================================================================

proptest! {
    /// The default file line yields the original message back
    #[test]
    fn test_default_file_line_round_trip(message in "[a-zA-Z0-9 ,\"\n=]{0,60}") {
        let sink = RotatingFileSink::new();
        let line = sink.format(&record(&message), None);
        let fields = parse_csv_record(strip_line_end(&line));
        prop_assert_eq!(fields.len(), 4);
        prop_assert_eq!(&fields[1], "Warning");
        prop_assert_eq!(&fields[2], "APP");
        prop_assert_eq!(&fields[3], &message);
    }

    /// Free-text placeholders are escaped in CSV templates
    #[test]
    fn test_csv_template_round_trip(message in "[a-z ,\"\n]{0,40}") {
        let compiled = FormatCompiler::compile(
            Some(r#""{0},{1},{2}", SourceName, UserMessage, SeverityString"#),
            FormatFlavor::Csv,
        ).expect("template present");
        let rendered = compiled.render(&record(&message));
        let fields = parse_csv_record(&rendered);
        prop_assert_eq!(fields, vec!["APP".to_string(), message.clone(), "Warning".to_string()]);
    }

    /// Escaping only quotes when it must, quoting always does
    #[test]
    fn test_escape_and_quote(value in "[a-z ,\"\n]{0,30}") {
        let escaped = csv_escape(&value);
        let needs_quotes = value.contains([',', '"', '\n']);
        prop_assert_eq!(escaped.starts_with('"'), needs_quotes);
        prop_assert_eq!(parse_csv_record(&escaped), vec![value.clone()]);
        prop_assert_eq!(parse_csv_record(&csv_quote(&value)), vec![value]);
    }

    /// Bare carriage returns never survive escaping
    #[test]
    fn test_bare_cr_stripped(left in "[a-z]{0,10}", right in "[a-z]{1,10}") {
        let value = format!("{}\r{}", left, right);
        prop_assert!(!csv_escape(&value).contains('\r'));
        prop_assert_eq!(parse_csv_record(&csv_quote(&value)), vec![format!("{}{}", left, right)]);
    }
}

// ============================================================================
// Template Tests
// ============================================================================

proptest! {
    /// Unknown placeholder names compile and render as empty text
    #[test]
    fn test_unknown_placeholder_renders_empty(name in "Zz[a-z]{1,12}") {
        let template = format!(r#""[{{0}}|{{1}}]", {}, SourceName"#, name);
        let compiled = FormatCompiler::compile(Some(&template), FormatFlavor::Plain)
            .expect("template present");
        prop_assert_eq!(compiled.diagnostics().len(), 1);
        prop_assert_eq!(compiled.render(&record("x")), "[|APP]");
    }

    /// Literal text without slots renders unchanged
    #[test]
    fn test_literal_skeleton(text in "[a-zA-Z0-9 .:-]{1,40}") {
        let template = format!("\"{}\"", text);
        let compiled = FormatCompiler::compile(Some(&template), FormatFlavor::Plain)
            .expect("template present");
        prop_assert_eq!(compiled.render(&record("x")), text);
    }
}

// ============================================================================
// Threshold Tests
// ============================================================================

fn severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Verbose),
        Just(Severity::Information),
        Just(Severity::Warning),
        Just(Severity::Error),
        Just(Severity::Critical),
    ]
}

proptest! {
    /// Display output parses back to the same threshold
    #[test]
    fn test_threshold_display_round_trip(bits in 0u32..=0xFFFF) {
        let threshold = Threshold::from_bits(bits);
        let parsed: Threshold = threshold.to_string().parse().expect("displayed threshold parses");
        prop_assert_eq!(parsed, threshold);
    }

    /// A severity threshold lets through exactly that severity and above
    #[test]
    fn test_threshold_gates_by_order(level in severity(), event in severity()) {
        let threshold = Threshold::at_least(level);
        prop_assert_eq!(threshold.allows(event, None), event >= level);
    }

    /// Parsing ignores case and surrounding space
    #[test]
    fn test_threshold_parse_case_insensitive(level in severity(), upper in any::<bool>()) {
        let name = if upper {
            level.to_str().to_uppercase()
        } else {
            format!("  {}  ", level.to_str().to_lowercase())
        };
        let parsed: Threshold = name.parse().expect("severity name parses");
        prop_assert_eq!(parsed, Threshold::at_least(level));
    }
}
