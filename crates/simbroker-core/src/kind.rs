//! Application kinds and their construction parameters.
//!
//! The broker never interprets an application beyond creating and
//! releasing it, so the parameters here are passed through to whatever
//! factory the daemon is configured with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::platform::Platform;

/// Kind of application a session can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppKind {
    /// 3D full-wave frequency domain solver
    FullWave,

    /// Low-frequency electromagnetic solver
    Magnetic,

    /// Electronics cooling solver
    Thermal,

    /// Schematic circuit simulator
    Circuit,

    /// Layout database (board and package geometry)
    Layout,

    /// Signal-integrity tool driven through native UI automation
    SignalIntegrity,
}

impl AppKind {
    pub const ALL: [AppKind; 6] = [
        Self::FullWave,
        Self::Magnetic,
        Self::Thermal,
        Self::Circuit,
        Self::Layout,
        Self::SignalIntegrity,
    ];

    /// Whether this kind can be created on the given platform.
    pub fn is_supported_on(&self, platform: Platform) -> bool {
        match self {
            Self::SignalIntegrity => platform.has_native_ui_automation(),
            _ => true,
        }
    }

    /// Executable name of the launcher for this kind on a platform.
    pub fn launcher_name(&self, platform: Platform) -> String {
        let stem = match self {
            Self::SignalIntegrity => "sidesktop",
            _ => "emdesktop",
        };
        format!("{stem}{}", platform.exe_suffix())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullWave => "full_wave",
            Self::Magnetic => "magnetic",
            Self::Thermal => "thermal",
            Self::Circuit => "circuit",
            Self::Layout => "layout",
            Self::SignalIntegrity => "signal_integrity",
        }
    }
}

impl Default for AppKind {
    fn default() -> Self {
        Self::FullWave
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Construction parameters shared by design-oriented tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignParams {
    /// Project file to open or create
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Design inside the project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub design: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution_type: Option<String>,

    /// Application release, e.g. "2024.2"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Run without a graphical desktop
    pub non_graphical: bool,

    /// Always start a new desktop instead of attaching to a running one
    pub new_desktop: bool,
}

/// Construction parameters for the layout database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutParams {
    /// Database directory or importable layout file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A factory request: which kind to create, with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppRequest {
    FullWave(DesignParams),
    Magnetic(DesignParams),
    Thermal(DesignParams),
    Circuit(DesignParams),
    Layout(LayoutParams),
    SignalIntegrity(DesignParams),
}

impl AppRequest {
    pub fn kind(&self) -> AppKind {
        match self {
            Self::FullWave(_) => AppKind::FullWave,
            Self::Magnetic(_) => AppKind::Magnetic,
            Self::Thermal(_) => AppKind::Thermal,
            Self::Circuit(_) => AppKind::Circuit,
            Self::Layout(_) => AppKind::Layout,
            Self::SignalIntegrity(_) => AppKind::SignalIntegrity,
        }
    }

    /// Design parameters, for the kinds that take them.
    pub fn design_params(&self) -> Option<&DesignParams> {
        match self {
            Self::FullWave(p)
            | Self::Magnetic(p)
            | Self::Thermal(p)
            | Self::Circuit(p)
            | Self::SignalIntegrity(p) => Some(p),
            Self::Layout(_) => None,
        }
    }
}

/// Configuration for a `run_script` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Which launcher executes the script
    pub kind: AppKind,

    /// Installation root holding the launcher; falls back to the
    /// broker's configured root when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_root: Option<PathBuf>,
}

impl ScriptConfig {
    /// Resolves the launcher executable path.
    ///
    /// Returns `None` when neither this config nor `fallback_root`
    /// names an installation root.
    pub fn launcher_path(&self, fallback_root: Option<&Path>, platform: Platform) -> Option<PathBuf> {
        let root = self.install_root.as_deref().or(fallback_root)?;
        Some(root.join(self.kind.launcher_name(platform)))
    }
}
