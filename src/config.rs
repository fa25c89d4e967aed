//! Declarative backend configuration.
//!
//! Applications describe which concurrency backend they want in data
//! (typically a TOML fragment inside a larger application config) and
//! hand the parsed value to the backend selector.

use serde::{Deserialize, Serialize};

/// Which backend family to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Real OS threads: worker pools, a timer wheel thread, blocking locks.
    Threaded,

    /// A single logical context driven by a host event loop.
    Cooperative,
}

/// Configuration for constructing a [`crate::facade::Concurrency`] facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Backend family to use
    pub backend: BackendKind,

    /// Prefix for worker and timer thread names on the threaded backend
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_thread_name_prefix() -> String {
    "tandem".to_string()
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Threaded,
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl ConcurrencyConfig {
    /// Configuration for the threaded backend with default naming.
    pub fn threaded() -> Self {
        Self::default()
    }

    /// Configuration for the cooperative backend.
    pub fn cooperative() -> Self {
        Self {
            backend: BackendKind::Cooperative,
            ..Self::default()
        }
    }
}
