//! Process and context identity shared by every record of a context

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static PROCESS_NAME: OnceLock<String> = OnceLock::new();

/// Name of the running executable without extension
pub fn process_name() -> &'static str {
    PROCESS_NAME.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unknown".to_string())
    })
}

/// Identity of the host a [`LoggingContext`](crate::LoggingContext) runs in.
#[derive(Debug, Clone)]
pub struct HostInfo {
    context_name: String,
    app_version: String,
    base_dir: PathBuf,
    process_id: u32,
}

impl HostInfo {
    pub fn new(context_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        let base_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            context_name: context_name.into(),
            app_version: app_version.into(),
            base_dir,
            process_id: std::process::id(),
        }
    }

    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn process_name(&self) -> &'static str {
        process_name()
    }
}

impl Default for HostInfo {
    fn default() -> Self {
        HostInfo::new(process_name(), "")
    }
}
