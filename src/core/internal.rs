//! Internal-error side channel
//!
//! Logging failures never reach application code. They are reported here
//! instead: to a host-installed hook when one is set, otherwise as a
//! last-resort line on stderr.

use super::error::LogError;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// One report on the side channel
#[derive(Debug, Clone)]
pub struct InternalError {
    pub component: String,
    pub message: String,
    pub level: InternalLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalLevel {
    Warning,
    Error,
    Critical,
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.level {
            InternalLevel::Warning => "LOGGER WARNING",
            InternalLevel::Error => "LOGGER ERROR",
            InternalLevel::Critical => "LOGGER CRITICAL",
        };
        write!(f, "[{}] {}: {}", tag, self.component, self.message)
    }
}

/// Callback receiving internal errors in place of stderr
pub type InternalErrorHook = Arc<dyn Fn(&InternalError) + Send + Sync>;

static HOOK: RwLock<Option<InternalErrorHook>> = RwLock::new(None);

/// Install (or with `None`, remove) the process-wide internal error hook.
pub fn set_internal_error_hook(hook: Option<InternalErrorHook>) {
    *HOOK.write() = hook;
}

fn emit(report: InternalError) {
    let hook = HOOK.read().clone();
    match hook {
        Some(hook) => hook(&report),
        None => eprintln!("{}", report),
    }
}

pub fn report(component: &str, error: &LogError) {
    emit(InternalError {
        component: component.to_string(),
        message: error.to_string(),
        level: InternalLevel::Error,
    });
}

pub fn report_message(component: &str, message: impl Into<String>) {
    emit(InternalError {
        component: component.to_string(),
        message: message.into(),
        level: InternalLevel::Error,
    });
}

pub fn warn(component: &str, message: impl Into<String>) {
    emit(InternalError {
        component: component.to_string(),
        message: message.into(),
        level: InternalLevel::Warning,
    });
}

/// Report a panic payload caught from a sink
pub fn report_panic(component: &str, payload: Box<dyn Any + Send>) {
    let panic_msg = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    };
    emit(InternalError {
        component: component.to_string(),
        message: format!("panicked: {}", panic_msg),
        level: InternalLevel::Critical,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_error_display() {
        let report = InternalError {
            component: "file".to_string(),
            message: "disk full".to_string(),
            level: InternalLevel::Error,
        };
        assert_eq!(report.to_string(), "[LOGGER ERROR] file: disk full");
    }
}
