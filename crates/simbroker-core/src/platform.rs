//! Host platform detection and session hosting modes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform family the broker runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    /// Returns the platform this binary was compiled for.
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    /// Whether native desktop UI automation is available.
    pub fn has_native_ui_automation(&self) -> bool {
        matches!(self, Self::Windows)
    }

    /// Suffix appended to launcher executable names.
    pub fn exe_suffix(&self) -> &'static str {
        match self {
            Self::Unix => "",
            Self::Windows => ".exe",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix => write!(f, "unix"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

/// How an ephemeral session host is executed.
///
/// A process-hosted session can be hard-terminated by the broker; a
/// thread-hosted one lives inside the broker process until its clients
/// disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostingMode {
    Process,
    Thread,
}

impl HostingMode {
    /// Default hosting mode for a platform.
    pub fn default_for(platform: Platform) -> Self {
        match platform {
            Platform::Unix => Self::Process,
            Platform::Windows => Self::Thread,
        }
    }

    #[must_use]
    pub fn supports_termination(&self) -> bool {
        matches!(self, Self::Process)
    }
}

impl Default for HostingMode {
    fn default() -> Self {
        Self::default_for(Platform::current())
    }
}

impl fmt::Display for HostingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process => f.pad("process"),
            Self::Thread => f.pad("thread"),
        }
    }
}
