//! Capability allow-lists for remotely proxied objects.
//!
//! File handles handed to remote callers expose a fixed, minimal method
//! set. Application handles are trusted and accept any method. A small set
//! of builtin introspection methods is reachable on every object.

use serde::{Deserialize, Serialize};

/// Methods exposed by a restricted read handle.
pub const READ_HANDLE_METHODS: &[&str] = &["readlines", "close"];

/// Methods exposed by a restricted write handle.
pub const WRITE_HANDLE_METHODS: &[&str] = &["read", "write", "close"];

/// Methods reachable on every proxied object regardless of policy.
pub const BUILTIN_METHODS: &[&str] = &["describe", "methods"];

/// Access policy for calls on a remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ReadHandle,
    WriteHandle,

    /// Any method is forwarded (trusted-client model)
    Permissive,
}

impl Capability {
    /// Explicit allow-list, or `None` for permissive objects.
    pub fn allow_list(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::ReadHandle => Some(READ_HANDLE_METHODS),
            Self::WriteHandle => Some(WRITE_HANDLE_METHODS),
            Self::Permissive => None,
        }
    }

    pub fn allows(&self, method: &str) -> bool {
        if BUILTIN_METHODS.contains(&method) {
            return true;
        }
        match self.allow_list() {
            Some(list) => list.contains(&method),
            None => true,
        }
    }
}
