use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::event::EventBus;
use crate::Result;

/// Stat-derived facts about a candidate file, cheap enough to pass to every plugin's
/// `matches` call without re-statting.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub extension: Option<String>,
}

/// Everything a plugin needs to act on one file. `media_file` is a JSON snapshot of the
/// record the core just persisted (so plugins stay decoupled from the core's concrete
/// record type); a plugin that mutates the row does so through its own database access,
/// then the core reloads the row after the plugin returns.
pub struct PluginContext {
    pub job_id: Uuid,
    pub library_id: Uuid,
    pub media_file_id: Uuid,
    pub media_file: serde_json::Value,
    pub event_bus: Arc<dyn EventBus>,
    pub plugin_id: String,
}

/// A metadata-extraction plugin (spec §6). Multiple plugins may match one file; the core
/// invokes all matches and does not treat a plugin error as fatal to the file.
#[async_trait::async_trait]
pub trait FileHandlerPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn supported_extensions(&self) -> &[&str];

    fn matches(&self, path: &Path, _info: &FileInfo) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self
                .supported_extensions()
                .iter()
                .any(|e| e.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    async fn handle(&self, path: &Path, ctx: &PluginContext) -> Result<()>;
}
