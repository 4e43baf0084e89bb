//! Trait surfaces that describe how `scanhive-core` interacts with the outside world:
//! metadata-extraction plugins, scanner lifecycle hooks, and the event bus the core
//! publishes progress and lifecycle events through.

mod event;
mod hook;
mod plugin;

pub use event::{EventBus, ScanEvent, ScanEventKind};
pub use hook::{ScanStats, ScannerHook};
pub use plugin::{FileHandlerPlugin, FileInfo, PluginContext};

use thiserror::Error;

/// Errors a plugin or hook may surface back to the core. The core logs these and
/// continues — a plugin failure never aborts a scan.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("plugin {plugin} failed on {path}: {source}")]
    Plugin {
        plugin: String,
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("hook call timed out after {0:?}")]
    HookTimeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, ContractError>;
