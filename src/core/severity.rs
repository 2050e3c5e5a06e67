//! Event severities, activity-tracing kinds and source thresholds

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

/// Ordered event importance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub enum Severity {
    Verbose = 0,
    #[default]
    Information = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Verbose,
        Severity::Information,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    pub fn to_str(&self) -> &'static str {
        match self {
            Severity::Verbose => "Verbose",
            Severity::Information => "Information",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Critical => "Critical",
        }
    }

    /// Event-type bit used for threshold masks.
    pub fn bit(&self) -> u32 {
        match self {
            Severity::Critical => 0x01,
            Severity::Error => 0x02,
            Severity::Warning => 0x04,
            Severity::Information => 0x08,
            Severity::Verbose => 0x10,
        }
    }

    #[cfg(feature = "console")]
    pub fn color_code(&self) -> colored::Color {
        use colored::Color::*;
        match self {
            Severity::Verbose => BrightBlack,
            Severity::Information => Green,
            Severity::Warning => Yellow,
            Severity::Error => Red,
            Severity::Critical => BrightRed,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verbose" => Ok(Severity::Verbose),
            "information" | "info" => Ok(Severity::Information),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" | "fatal" => Ok(Severity::Critical),
            _ => Err(format!("Invalid severity: '{}'", s)),
        }
    }
}

/// Activity-tracing event class, independent of the severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    Start,
    Stop,
    Suspend,
    Resume,
    Transfer,
}

impl ActivityKind {
    pub fn to_str(&self) -> &'static str {
        match self {
            ActivityKind::Start => "Start",
            ActivityKind::Stop => "Stop",
            ActivityKind::Suspend => "Suspend",
            ActivityKind::Resume => "Resume",
            ActivityKind::Transfer => "Transfer",
        }
    }

    pub fn bit(&self) -> u32 {
        match self {
            ActivityKind::Start => 0x0100,
            ActivityKind::Stop => 0x0200,
            ActivityKind::Suspend => 0x0400,
            ActivityKind::Resume => 0x0800,
            ActivityKind::Transfer => 0x1000,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

/// Bitmask of event types a source or sink lets through.
///
/// # Example
///
/// ```
/// use sourcelog::{Severity, Threshold};
///
/// let t: Threshold = "Warning".parse().unwrap();
/// assert!(t.allows(Severity::Error, None));
/// assert!(!t.allows(Severity::Information, None));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Threshold(u32);

impl Threshold {
    pub const OFF: Threshold = Threshold(0);
    pub const CRITICAL: Threshold = Threshold(0x01);
    pub const ERROR: Threshold = Threshold(0x03);
    pub const WARNING: Threshold = Threshold(0x07);
    pub const INFORMATION: Threshold = Threshold(0x0F);
    pub const VERBOSE: Threshold = Threshold(0x1F);
    pub const ACTIVITY_TRACING: Threshold = Threshold(0xFF00);
    pub const ALL: Threshold = Threshold(u32::MAX);

    pub const fn from_bits(bits: u32) -> Self {
        Threshold(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Threshold letting through `severity` and everything more severe.
    pub fn at_least(severity: Severity) -> Self {
        match severity {
            Severity::Verbose => Threshold::VERBOSE,
            Severity::Information => Threshold::INFORMATION,
            Severity::Warning => Threshold::WARNING,
            Severity::Error => Threshold::ERROR,
            Severity::Critical => Threshold::CRITICAL,
        }
    }

    pub fn allows(&self, severity: Severity, activity: Option<ActivityKind>) -> bool {
        match activity {
            Some(kind) => self.0 & kind.bit() != 0,
            None => self.0 & severity.bit() != 0,
        }
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold::INFORMATION
    }
}

impl BitOr for Threshold {
    type Output = Threshold;

    fn bitor(self, rhs: Threshold) -> Threshold {
        Threshold(self.0 | rhs.0)
    }
}

impl From<Severity> for Threshold {
    fn from(severity: Severity) -> Self {
        Threshold::at_least(severity)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMED: [(Threshold, &str); 6] = [
            (Threshold::VERBOSE, "Verbose"),
            (Threshold::INFORMATION, "Information"),
            (Threshold::WARNING, "Warning"),
            (Threshold::ERROR, "Error"),
            (Threshold::CRITICAL, "Critical"),
            (Threshold::ACTIVITY_TRACING, "ActivityTracing"),
        ];
        match *self {
            Threshold::OFF => return write!(f, "Off"),
            Threshold::ALL => return write!(f, "All"),
            _ => {}
        }
        let levels = self.0 & 0xFF;
        let activity = self.0 & 0xFF00;
        let mut parts = Vec::new();
        if let Some((_, name)) = NAMED[..5].iter().find(|(t, _)| t.0 == levels) {
            parts.push((*name).to_string());
        } else if levels != 0 {
            parts.push(format!("0x{:02X}", levels));
        }
        if activity == Threshold::ACTIVITY_TRACING.0 {
            parts.push(NAMED[5].1.to_string());
        } else if activity != 0 {
            parts.push(format!("0x{:04X}", activity));
        }
        write!(f, "{}", parts.join(", "))
    }
}

impl FromStr for Threshold {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bits = 0u32;
        for part in s.split([',', '|']).map(str::trim).filter(|p| !p.is_empty()) {
            let value = match part.to_ascii_lowercase().as_str() {
                "off" => 0,
                "all" => u32::MAX,
                "activitytracing" => Threshold::ACTIVITY_TRACING.0,
                other => {
                    if let Some(hex) = other.strip_prefix("0x") {
                        u32::from_str_radix(hex, 16)
                            .map_err(|_| format!("Invalid threshold: '{}'", part))?
                    } else {
                        Threshold::at_least(part.parse::<Severity>()?).0
                    }
                }
            };
            bits |= value;
        }
        Ok(Threshold(bits))
    }
}

impl TryFrom<String> for Threshold {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Threshold> for String {
    fn from(value: Threshold) -> Self {
        value.to_string()
    }
}
